//! Request shapes handed to the decision engine.
//!
//! Every host operation is reduced to an [`AccessRequestShape`]: who is asking,
//! what they want to do, which region/table they are touching, and which
//! families and columns are involved.

use crate::identity::Identity;
use serde::{Deserialize, Serialize};

/// Separator between a namespace and a table name (`ns:table`).
pub const NAMESPACE_SEPARATOR: &str = ":";

/// Wildcard used for unspecified resource levels.
pub const WILDCARD: &str = "*";

/// Action being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Read cells.
    Read,
    /// Write or delete cells.
    Write,
    /// Create, alter, flush or compact tables.
    Create,
    /// Administrative operations.
    Admin,
    /// Endpoint (coprocessor service) invocation.
    Execute,
}

impl Action {
    /// All actions, in grant order.
    pub const ALL: [Action; 5] = [
        Action::Read,
        Action::Write,
        Action::Create,
        Action::Admin,
        Action::Execute,
    ];

    /// Access-type string understood by the policy evaluator.
    pub fn access_type(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Create => "create",
            Action::Admin => "admin",
            Action::Execute => "execute",
        }
    }

    /// Map a single-letter permission code (`R`, `W`, `C`, `A`, `X`).
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'R' => Some(Action::Read),
            'W' => Some(Action::Write),
            'C' => Some(Action::Create),
            'A' => Some(Action::Admin),
            'X' => Some(Action::Execute),
            _ => None,
        }
    }

    /// Parse an access-type string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Some(Action::Read),
            "write" => Some(Action::Write),
            "create" => Some(Action::Create),
            "admin" => Some(Action::Admin),
            "execute" | "exec" => Some(Action::Execute),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.access_type())
    }
}

/// How much of the resource tree a single policy check considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingScope {
    /// Exactly the named node.
    #[default]
    SelfOnly,
    /// The named node or anything nested beneath it.
    SelfOrDescendants,
}

/// Hierarchical resource key: global, namespace, table, family or column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResourcePath {
    /// Namespace, for namespace-scoped checks.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Table name (possibly `ns:table`).
    #[serde(default)]
    pub table: Option<String>,
    /// Column family.
    #[serde(default)]
    pub family: Option<String>,
    /// Column qualifier.
    #[serde(default)]
    pub column: Option<String>,
}

impl ResourcePath {
    /// The global resource (no table).
    pub fn global() -> Self {
        Self::default()
    }

    /// A namespace.
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    /// A table.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            ..Self::default()
        }
    }

    /// Narrow to a family.
    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    /// Narrow to a column.
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// True when neither a namespace nor a table is named.
    pub fn is_global(&self) -> bool {
        self.namespace.is_none() && self.table.is_none()
    }
}

impl std::fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ns) = &self.namespace {
            return write!(f, "{}{}", ns, NAMESPACE_SEPARATOR);
        }
        match &self.table {
            None => f.write_str(WILDCARD),
            Some(table) => {
                f.write_str(table)?;
                if let Some(family) = &self.family {
                    write!(f, "/{}", family)?;
                    if let Some(column) = &self.column {
                        write!(f, "/{}", column)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Region an operation runs against, as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionContext {
    /// Raw table name bytes; absent for internal calls with no region.
    #[serde(default)]
    pub table: Option<Vec<u8>>,
    /// Whether this region belongs to the metadata (catalog) table.
    #[serde(default)]
    pub meta_region: bool,
}

impl RegionContext {
    /// A user-table region.
    pub fn for_table(table: impl AsRef<[u8]>) -> Self {
        Self {
            table: Some(table.as_ref().to_vec()),
            meta_region: false,
        }
    }

    /// A metadata-table region.
    pub fn meta(table: impl AsRef<[u8]>) -> Self {
        Self {
            table: Some(table.as_ref().to_vec()),
            meta_region: true,
        }
    }

    /// Table name, or `None` when missing, empty or not valid UTF-8.
    pub fn table_name(&self) -> Option<String> {
        match &self.table {
            Some(bytes) if !bytes.is_empty() => match std::str::from_utf8(bytes) {
                Ok(name) => Some(name.to_string()),
                Err(e) => {
                    tracing::warn!(table = %hex::encode(bytes), error = %e, "table name is not valid UTF-8");
                    None
                }
            },
            _ => None,
        }
    }
}

/// One family of a [`FamilyMap`] and the columns requested under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyEntry {
    /// Column family name.
    pub family: String,
    /// Requested qualifiers; empty means the whole family.
    #[serde(default)]
    pub columns: Vec<String>,
}

/// Ordered family → columns mapping.
///
/// Iteration follows insertion order. Re-inserting a family merges its
/// columns; a family inserted once with columns and once without keeps the
/// columns. Empty family names are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<FamilyEntry>", into = "Vec<FamilyEntry>")]
pub struct FamilyMap {
    entries: Vec<FamilyEntry>,
}

impl From<Vec<FamilyEntry>> for FamilyMap {
    fn from(entries: Vec<FamilyEntry>) -> Self {
        let mut map = Self::new();
        for entry in entries {
            map.insert(entry.family, entry.columns);
        }
        map
    }
}

impl From<FamilyMap> for Vec<FamilyEntry> {
    fn from(map: FamilyMap) -> Self {
        map.entries
    }
}

impl FamilyMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map of family-level requests.
    pub fn from_families<I, S>(families: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = Self::new();
        for family in families {
            map.insert(family, Vec::<String>::new());
        }
        map
    }

    /// Add a family-level request.
    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.insert(family, Vec::<String>::new());
        self
    }

    /// Add a column-level request.
    pub fn with_columns<I, S>(mut self, family: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(family, columns);
        self
    }

    /// Insert or merge a family.
    pub fn insert<I, S>(&mut self, family: impl Into<String>, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let family = family.into();
        if family.is_empty() {
            tracing::error!("empty column family name in family map, ignoring");
            return;
        }

        let idx = match self.entries.iter().position(|e| e.family == family) {
            Some(idx) => idx,
            None => {
                self.entries.push(FamilyEntry {
                    family,
                    columns: Vec::new(),
                });
                self.entries.len() - 1
            }
        };

        let entry = &mut self.entries[idx];
        for column in columns {
            let column = column.into();
            if !entry.columns.contains(&column) {
                entry.columns.push(column);
            }
        }
    }

    /// Iterate families and their columns in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|e| (e.family.as_str(), e.columns.as_slice()))
    }

    /// Family names in insertion order.
    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.family.as_str())
    }

    /// Drop the columns, keeping only family-level requests.
    pub fn families_only(&self) -> Self {
        Self::from_families(self.families().map(str::to_string))
    }

    /// Number of families.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no family is present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Display for FamilyMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (i, (family, columns)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}=[{}]", family, columns.join(","))?;
        }
        f.write_str("}")
    }
}

/// Everything the engine needs to decide one data-plane request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequestShape {
    /// Caller; absent identities are rejected as malformed.
    #[serde(default)]
    pub identity: Option<Identity>,
    /// Host operation name (`get`, `put`, `scannerOpen`, ...).
    pub operation: String,
    /// Requested action.
    pub action: Action,
    /// Region the operation targets.
    pub region: RegionContext,
    /// Requested families; absent or empty means a table-level request.
    #[serde(default)]
    pub families: Option<FamilyMap>,
    /// Free-form command description carried into audit events.
    #[serde(default)]
    pub other_info: Option<String>,
}

impl AccessRequestShape {
    /// Create a table-level request.
    pub fn new(
        identity: Option<Identity>,
        operation: impl Into<String>,
        action: Action,
        region: RegionContext,
    ) -> Self {
        Self {
            identity,
            operation: operation.into(),
            action,
            region,
            families: None,
            other_info: None,
        }
    }

    /// Attach the family map.
    pub fn with_families(mut self, families: FamilyMap) -> Self {
        self.families = Some(families);
        self
    }

    /// Attach a command description.
    pub fn with_other_info(mut self, info: impl Into<String>) -> Self {
        self.other_info = Some(info.into());
        self
    }

    /// True when no family map or an empty one was supplied.
    pub fn is_table_level(&self) -> bool {
        self.families.as_ref().map_or(true, FamilyMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_codes() {
        assert_eq!(Action::from_code('R'), Some(Action::Read));
        assert_eq!(Action::from_code('X'), Some(Action::Execute));
        assert_eq!(Action::from_code('Z'), None);
        assert_eq!(Action::parse("WRITE"), Some(Action::Write));
        assert_eq!(Action::Admin.to_string(), "admin");
    }

    #[test]
    fn test_family_map_preserves_order_and_merges() {
        let map = FamilyMap::new()
            .with_columns("cf2", ["b", "a"])
            .family("cf1")
            .with_columns("cf2", ["a", "c"]);

        let families: Vec<_> = map.families().collect();
        assert_eq!(families, vec!["cf2", "cf1"]);

        let (_, cols) = map.iter().next().unwrap();
        assert_eq!(cols, ["b", "a", "c"]);
    }

    #[test]
    fn test_family_map_drops_empty_family() {
        let mut map = FamilyMap::new();
        map.insert("", ["c1"]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_region_table_name() {
        assert_eq!(RegionContext::for_table("t1").table_name(), Some("t1".into()));
        assert_eq!(RegionContext::for_table("").table_name(), None);
        assert_eq!(RegionContext::default().table_name(), None);
        assert_eq!(RegionContext::for_table([0x74, 0xff, 0x31]).table_name(), None);
    }

    #[test]
    fn test_resource_path_display() {
        assert_eq!(ResourcePath::global().to_string(), "*");
        assert_eq!(ResourcePath::namespace("ns1").to_string(), "ns1:");
        assert_eq!(
            ResourcePath::table("t1").with_family("cf").with_column("q").to_string(),
            "t1/cf/q"
        );
    }

    #[test]
    fn test_shape_table_level() {
        let shape = AccessRequestShape::new(
            Some(Identity::new("alice")),
            "get",
            Action::Read,
            RegionContext::for_table("t1"),
        );
        assert!(shape.is_table_level());
        assert!(shape
            .clone()
            .with_families(FamilyMap::new())
            .is_table_level());
        assert!(!shape.with_families(FamilyMap::new().family("cf")).is_table_level());
    }

    #[test]
    fn test_family_map_json_shape() {
        let map: FamilyMap =
            serde_json::from_str(r#"[{"family":"cf1"},{"family":"cf2","columns":["c1"]}]"#)
                .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.to_string(), "{cf1=[], cf2=[c1]}");
    }

    #[test]
    fn test_family_map_json_merges_duplicates() {
        let map: FamilyMap = serde_json::from_str(
            r#"[{"family":"cf","columns":["c1"]},{"family":"cf","columns":["c2","c1"]},{"family":""}]"#,
        )
        .unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.to_string(), "{cf=[c1,c2]}");

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"[{"family":"cf","columns":["c1","c2"]}]"#);
    }
}
