//! Cellgate Command-Line Tool
//!
//! Evaluates a JSON access request against JSON policy rules and prints the
//! aggregated verdict.

mod formatter;
mod report;

use cellgate_core::{AccessRequestShape, Authorizer, AuthzConfig, InMemoryPolicyEngine};
use clap::{Parser, Subcommand};
use formatter::OutputFormat;
use report::Verdict;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Cellgate Command-Line Tool
#[derive(Parser, Debug)]
#[command(name = "cellgate")]
#[command(version, about = "Column-family authorization checker")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Output format
    #[arg(long, default_value = "table", value_enum, global = true)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate a request and print the verdict
    Check {
        /// Policy rules (JSON)
        #[arg(short, long)]
        policies: PathBuf,

        /// Request description (JSON)
        #[arg(short, long)]
        request: PathBuf,

        /// Authorizer configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Parse a policy file and report the rule count
    Validate {
        /// Policy rules (JSON)
        #[arg(short, long)]
        policies: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cellgate=info".parse().expect("valid directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<String, Box<dyn std::error::Error>> {
    let formatter = formatter::create_formatter(args.format);

    match args.command {
        Command::Check {
            policies,
            request,
            config,
        } => {
            let verdict = check(&policies, &request, config.as_deref())?;
            Ok(formatter.format_verdict(&verdict))
        }
        Command::Validate { policies } => {
            let engine = InMemoryPolicyEngine::from_json_file(&policies)?;
            tracing::info!(path = %policies.display(), rules = engine.len(), "policies valid");
            Ok(formatter.format_validation(engine.len(), engine.audit_unmatched()))
        }
    }
}

/// Load the request and policies, then aggregate the decision.
fn check(
    policies: &Path,
    request: &Path,
    config: Option<&Path>,
) -> Result<Verdict, Box<dyn std::error::Error>> {
    let engine = InMemoryPolicyEngine::from_json_file(policies)?;
    let config = match config {
        Some(path) => AuthzConfig::from_json_file(path)?,
        None => AuthzConfig::new(),
    };
    let shape = load_request(request)?;

    tracing::debug!(
        operation = %shape.operation,
        action = %shape.action,
        rules = engine.len(),
        "checking request"
    );

    let authorizer = Authorizer::new(Arc::new(engine), Arc::new(config));
    let result = authorizer.evaluate_access(&shape)?;
    Ok(Verdict::from(result))
}

fn load_request(path: &Path) -> Result<AccessRequestShape, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let shape = serde_json::from_str(&content)?;
    Ok(shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Outcome;
    use std::fs;
    use tempfile::TempDir;

    const POLICIES: &str = r#"{
        "rules": [
            {"id": 1, "users": ["alice"], "table": "t1", "family": "cf1", "accesses": ["read"]},
            {"id": 2, "users": ["alice"], "table": "t1", "family": "cf2", "column": "c1", "accesses": ["read"]}
        ]
    }"#;

    fn request(families: &str) -> String {
        format!(
            r#"{{
                "identity": {{"name": "alice@EXAMPLE.COM", "short_name": "alice"}},
                "operation": "get",
                "action": "read",
                "region": {{"table": [116, 49]}},
                "families": {}
            }}"#,
            families
        )
    }

    fn write_fixtures(dir: &TempDir, families: &str) -> (PathBuf, PathBuf) {
        let policies = dir.path().join("policies.json");
        let request_path = dir.path().join("request.json");
        fs::write(&policies, POLICIES).unwrap();
        fs::write(&request_path, request(families)).unwrap();
        (policies, request_path)
    }

    #[test]
    fn test_check_partial() {
        let dir = tempfile::tempdir().unwrap();
        let (policies, request) = write_fixtures(
            &dir,
            r#"[{"family": "cf1"}, {"family": "cf2", "columns": ["c1", "c2"]}]"#,
        );

        let verdict = check(&policies, &request, None).unwrap();
        assert_eq!(verdict.outcome, Outcome::Partial);
        assert!(verdict.denial_reason.unwrap().contains("column: c2"));
    }

    #[test]
    fn test_check_with_config() {
        let dir = tempfile::tempdir().unwrap();
        let (policies, request) = write_fixtures(&dir, r#"[{"family": "cf1", "columns": ["a", "b"]}]"#);
        let config = dir.path().join("authz.json");
        fs::write(&config, r#"{"column_auth_optimization": true}"#).unwrap();

        let verdict = check(&policies, &request, Some(&config)).unwrap();
        assert_eq!(verdict.outcome, Outcome::Granted);
        assert!(verdict.granted_events.is_empty());
        assert_eq!(verdict.family_level_granted_events.len(), 1);
    }

    #[test]
    fn test_run_validate_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (policies, _) = write_fixtures(&dir, "null");

        let output = run(Args {
            command: Command::Validate {
                policies: policies.clone(),
            },
            format: OutputFormat::Table,
        })
        .unwrap();
        assert_eq!(output, "2 rule(s) OK (audit unmatched: yes)");

        let bad = dir.path().join("bad.json");
        fs::write(&bad, r#"{"rules": [{"id": 1, "accesses": ["read"]}]}"#).unwrap();
        assert!(run(Args {
            command: Command::Validate { policies: bad },
            format: OutputFormat::Json,
        })
        .is_err());

        let missing = dir.path().join("missing.json");
        assert!(check(&policies, &missing, None).is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "cellgate", "check", "--policies", "p.json", "--request", "r.json", "--format", "json",
        ])
        .unwrap();
        assert_eq!(args.format, OutputFormat::Json);
        assert!(matches!(args.command, Command::Check { config: None, .. }));
    }
}
