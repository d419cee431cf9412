/*!
# Snapkeep Core Engine

Lifecycle management for EBS snapshots across independently configured
backup targets. For each target Snapkeep:

- takes a new snapshot unless one younger than 23h59m already exists,
- tags new snapshots with `Name=<target>_<yyMMddHHmm>` and `Backup=true`,
- deletes `Backup=true` snapshots older than the retention window, always
  keeping the newest one.

## Architecture

The decision logic ([`FreshnessGuard`], [`TaggingScheme`],
[`RetentionPolicyEngine`]) is pure. The [`Orchestrator`] drives it against a
[`SnapshotRepository`] port; the EC2 adapter lives behind the `ec2` feature and
an in-memory adapter is always available. Errors are reported to a
[`DiagnosticsObserver`], and the run transcript is delivered by a
[`TranscriptGuard`] on every exit path.

## Usage

```rust
use snapkeep_core::{MemorySnapshotRepository, Orchestrator, SnapkeepConfig, TracingDiagnostics};

let config = SnapkeepConfig::from_json_str(r#"{ "targets": { "web": {
    "volume_id": "vol-1",
    "credentials": { "access_key_id": "A", "secret_access_key": "B" } } } }"#)?;

let repo = MemorySnapshotRepository::new();
let summary = Orchestrator::new(&config, repo, TracingDiagnostics).run()?;
assert_eq!(summary.targets.len(), 1);
# Ok::<(), snapkeep_core::SnapkeepError>(())
```
*/

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod freshness;
pub mod notify;
pub mod orchestrator;
pub mod repository;
pub mod retention;
pub mod snapshot;
pub mod tagging;
pub mod transcript;


pub use config::{BackupTarget, SnapkeepConfig};
pub use diagnostics::{Diagnostic, DiagnosticsObserver, TracingDiagnostics};
pub use error::{ErrorKind, Result, SnapkeepError};
pub use freshness::FreshnessGuard;
pub use notify::{Notifier, SendmailNotifier, StdoutNotifier};
pub use orchestrator::{Orchestrator, RunSummary, TargetOutcome};
#[cfg(feature = "ec2")]
pub use repository::Ec2RepositoryProvider;
pub use repository::{MemorySnapshotRepository, RepositoryProvider, SnapshotRepository};
pub use retention::{RetentionPlan, RetentionPolicyEngine};
pub use snapshot::{Snapshot, SnapshotId, Tag, TagSet};
pub use tagging::TaggingScheme;
pub use transcript::{Transcript, TranscriptGuard};
