/*!
Snapkeep CLI - scheduled entry point for EBS snapshot lifecycle runs.

Run it without arguments from cron. Every log line of the run is captured and,
at the end, mailed to the configured recipients or printed to stdout. The
process exits with 0 when every target completed and 1 when a fatal error
aborted the run.
*/

use clap::Parser;
use snapkeep_core::{
    config::DEFAULT_CONFIG_PATH,
    notify::{notifier_for, StdoutNotifier},
    Diagnostic, DiagnosticsObserver, Orchestrator, RepositoryProvider, RunSummary,
    SnapkeepConfig, TracingDiagnostics, Transcript, TranscriptGuard,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tabled::{Table, Tabled};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "snapkeep")]
#[command(about = "Create, tag and expire EBS snapshots for every configured target")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "SNAPKEEP_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// sendmail-compatible binary used to mail the transcript
    #[arg(long, env = "SNAPKEEP_SENDMAIL")]
    sendmail: Option<PathBuf>,
}

/// Every target completed.
const EXIT_SUCCESS: u8 = 0;
/// A fatal error aborted the run or the transcript was not delivered.
const EXIT_FAILURE: u8 = 1;

#[derive(Tabled)]
struct TargetRow {
    #[tabled(rename = "Target")]
    name: String,
    #[tabled(rename = "Volume")]
    volume_id: String,
    #[tabled(rename = "Listed")]
    listed: usize,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Deleted")]
    deleted: usize,
    #[tabled(rename = "Kept (expired)")]
    preserved: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let transcript = Transcript::new();
    init_logging(cli.verbose, &transcript);
    ExitCode::from(execute(&cli, transcript, open_provider))
}

/// Load the configuration, run every target and deliver the transcript.
/// Returns the process exit status.
fn execute<P, F>(cli: &Cli, transcript: Transcript, open_provider: F) -> u8
where
    P: RepositoryProvider,
    F: FnOnce() -> anyhow::Result<P>,
{
    info!(started_at = %chrono::Utc::now().to_rfc3339(), "Snapkeep run started");

    let config = match SnapkeepConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            // recipients are unknown without a configuration
            let guard = TranscriptGuard::new(transcript, StdoutNotifier);
            TracingDiagnostics.report(&Diagnostic::capture(&e));
            error!("Run aborted: {e}");
            return finish(guard, EXIT_FAILURE);
        }
    };

    let guard = TranscriptGuard::new(
        transcript.clone(),
        notifier_for(config.recipients(), cli.sendmail.clone()),
    );

    match run(&config, open_provider) {
        Ok(summary) => {
            info!(
                targets = summary.targets.len(),
                created = summary.created(),
                deleted = summary.deleted(),
                "Snapkeep run completed"
            );
            transcript.append_line(&render_summary(&summary));
            finish(guard, EXIT_SUCCESS)
        }
        Err(e) => {
            error!("Run aborted: {e:#}");
            finish(guard, EXIT_FAILURE)
        }
    }
}

fn init_logging(verbose: bool, transcript: &Transcript) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(transcript.clone())
        .init();
}

fn run<P, F>(config: &SnapkeepConfig, open_provider: F) -> anyhow::Result<RunSummary>
where
    P: RepositoryProvider,
    F: FnOnce() -> anyhow::Result<P>,
{
    let provider = open_provider()?;
    let summary = Orchestrator::new(config, provider, TracingDiagnostics).run()?;
    Ok(summary)
}

#[cfg(feature = "ec2")]
fn open_provider() -> anyhow::Result<snapkeep_core::Ec2RepositoryProvider> {
    Ok(snapkeep_core::Ec2RepositoryProvider::new()?)
}

#[cfg(not(feature = "ec2"))]
fn open_provider() -> anyhow::Result<snapkeep_core::MemorySnapshotRepository> {
    Err(anyhow::anyhow!("EC2 support not enabled"))
}

fn finish<N: snapkeep_core::Notifier>(guard: TranscriptGuard<N>, code: u8) -> u8 {
    match guard.finish() {
        Ok(()) => code,
        Err(e) => {
            eprintln!("Failed to deliver run transcript: {e}");
            EXIT_FAILURE
        }
    }
}

fn render_summary(summary: &RunSummary) -> String {
    let rows: Vec<TargetRow> = summary
        .targets
        .iter()
        .map(|t| TargetRow {
            name: t.name.clone(),
            volume_id: t.volume_id.clone(),
            listed: t.listed,
            created: t
                .created
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            deleted: t.deleted.len(),
            preserved: t
                .preserved_expired
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use snapkeep_core::{MemorySnapshotRepository, SnapshotId, TargetOutcome};
    use std::io::Write;

    const CONFIG: &str = r#"{
        "targets": {
            "web": {
                "volume_id": "vol-1",
                "credentials": { "access_key_id": "A", "secret_access_key": "B" }
            }
        }
    }"#;

    fn cli_for(path: &std::path::Path) -> Cli {
        Cli::try_parse_from(["snapkeep", "--config", path.to_str().unwrap()]).unwrap()
    }

    fn config_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_zero_arguments_use_default_config() {
        std::env::remove_var("SNAPKEEP_CONFIG");
        let cli = Cli::try_parse_from(["snapkeep"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_render_summary() {
        let summary = RunSummary {
            targets: vec![TargetOutcome {
                name: "web".into(),
                volume_id: "vol-1".into(),
                listed: 3,
                created: Some(SnapshotId::new("snap-new")),
                preserved_expired: None,
                deleted: vec![SnapshotId::new("snap-old")],
            }],
        };

        let table = render_summary(&summary);
        assert!(table.contains("Target"));
        assert!(table.contains("snap-new"));
        assert!(table.contains("vol-1"));
    }

    #[test]
    fn test_completed_run_exits_zero() {
        let file = config_file();
        let repo = MemorySnapshotRepository::new();
        let transcript = Transcript::new();

        let code = execute(&cli_for(file.path()), transcript.clone(), || Ok(repo.clone()));

        assert_eq!(code, EXIT_SUCCESS);
        assert_eq!(repo.snapshots().unwrap().len(), 1);
        assert!(transcript.contents().contains("vol-1"));
    }

    #[test]
    fn test_fatal_repository_error_exits_one() {
        let file = config_file();
        let repo = MemorySnapshotRepository::new();
        repo.fail_on("list_snapshots").unwrap();

        let code = execute(&cli_for(file.path()), Transcript::new(), || Ok(repo.clone()));

        assert_eq!(code, EXIT_FAILURE);
        assert!(repo.snapshots().unwrap().is_empty());
    }

    #[test]
    fn test_missing_config_exits_one() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_for(&dir.path().join("absent.json"));

        let code = execute(&cli, Transcript::new(), || -> anyhow::Result<MemorySnapshotRepository> {
            panic!("provider must not be opened without a configuration")
        });

        assert_eq!(code, EXIT_FAILURE);
    }

    #[test]
    fn test_provider_failure_exits_one() {
        let file = config_file();

        let code = execute(&cli_for(file.path()), Transcript::new(), || -> anyhow::Result<MemorySnapshotRepository> {
            Err(anyhow::anyhow!("no runtime"))
        });

        assert_eq!(code, EXIT_FAILURE);
    }
}
