/*!
Per-target snapshot lifecycle.

The orchestrator walks the configured targets one at a time and, for each,
runs list → freshness check → (create → tag) → retention → delete against the
target's repository. The first fatal error ends the whole run; nothing done
before it is rolled back.
*/

use chrono::{DateTime, Utc};
use tracing::{debug, info, info_span};

use crate::config::{BackupTarget, SnapkeepConfig};
use crate::diagnostics::{Diagnostic, DiagnosticsObserver};
use crate::freshness::FreshnessGuard;
use crate::repository::{RepositoryProvider, SnapshotRepository};
use crate::retention::RetentionPolicyEngine;
use crate::snapshot::{SnapshotId, Tag, BACKUP_TAG, BACKUP_TAG_VALUE};
use crate::tagging::TaggingScheme;
use crate::Result;

/// Description given to every snapshot created by a run.
pub const SNAPSHOT_DESCRIPTION: &str = "Created by backup script.";

/// Notice code reported when the newest snapshot outlived its retention.
pub const EXPIRED_PRESERVED_CODE: &str = "N_EXPIRED_PRESERVED";

/// What happened to one target during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub name: String,
    pub volume_id: String,
    /// Managed snapshots found when the target was listed
    pub listed: usize,
    pub created: Option<SnapshotId>,
    /// Newest snapshot kept although it was past the retention cutoff
    pub preserved_expired: Option<SnapshotId>,
    pub deleted: Vec<SnapshotId>,
}

/// Outcome of a run that completed every target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub targets: Vec<TargetOutcome>,
}

impl RunSummary {
    pub fn created(&self) -> usize {
        self.targets.iter().filter(|t| t.created.is_some()).count()
    }

    pub fn deleted(&self) -> usize {
        self.targets.iter().map(|t| t.deleted.len()).sum()
    }
}

/// Sequences the decision components over every configured target
///
/// # Example
/// ```rust
/// use snapkeep_core::{MemorySnapshotRepository, Orchestrator, SnapkeepConfig, TracingDiagnostics};
///
/// let config = SnapkeepConfig::from_json_str(r#"{ "targets": { "web": {
///     "volume_id": "vol-1",
///     "credentials": { "access_key_id": "A", "secret_access_key": "B" } } } }"#)?;
/// let repo = MemorySnapshotRepository::new();
///
/// let summary = Orchestrator::new(&config, repo.clone(), TracingDiagnostics).run()?;
/// assert_eq!(summary.created(), 1);
/// # Ok::<(), snapkeep_core::SnapkeepError>(())
/// ```
pub struct Orchestrator<'a, P, D>
where
    P: RepositoryProvider,
    D: DiagnosticsObserver,
{
    config: &'a SnapkeepConfig,
    provider: P,
    diagnostics: D,
    freshness: FreshnessGuard,
    tagging: TaggingScheme,
    retention: RetentionPolicyEngine,
}

impl<'a, P, D> Orchestrator<'a, P, D>
where
    P: RepositoryProvider,
    D: DiagnosticsObserver,
{
    pub fn new(config: &'a SnapkeepConfig, provider: P, diagnostics: D) -> Self {
        Self {
            config,
            provider,
            diagnostics,
            freshness: FreshnessGuard::new(),
            tagging: TaggingScheme::new(),
            retention: RetentionPolicyEngine::new(),
        }
    }

    /// Process every target, reading the clock as each target starts.
    pub fn run(&self) -> Result<RunSummary> {
        self.run_with_clock(Utc::now)
    }

    /// Process every target as of a fixed instant.
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        self.run_with_clock(|| now)
    }

    fn run_with_clock<F: Fn() -> DateTime<Utc>>(&self, clock: F) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for target in self.config.targets() {
            let span = info_span!("target", name = %target.name);
            let _entered = span.enter();

            let repository = self.check(self.provider.open(&target))?;
            let outcome = self.process_target(repository.as_ref(), &target, clock())?;
            summary.targets.push(outcome);
        }
        Ok(summary)
    }

    /// Run the lifecycle for one target against `repository`.
    pub fn process_target(
        &self,
        repository: &dyn SnapshotRepository,
        target: &BackupTarget,
        now: DateTime<Utc>,
    ) -> Result<TargetOutcome> {
        info!(target_name = %target.name, volume_id = %target.volume_id, "Processing target");

        let filter = Tag::new(BACKUP_TAG, BACKUP_TAG_VALUE);
        let mut snapshots = self.check(repository.list_snapshots(&target.volume_id, &filter))?;
        for snapshot in &snapshots {
            debug!(
                snapshot_id = %snapshot.id,
                volume_id = %snapshot.volume_id,
                created_at = %snapshot.created_at,
                tags = %snapshot.tags,
                "Existing snapshot"
            );
        }

        let mut outcome = TargetOutcome {
            name: target.name.clone(),
            volume_id: target.volume_id.clone(),
            listed: snapshots.len(),
            created: None,
            preserved_expired: None,
            deleted: Vec::new(),
        };

        if self.freshness.should_create(&snapshots, now) {
            info!(volume_id = %target.volume_id, "Creating new snapshot");
            let mut created =
                self.check(repository.create_snapshot(&target.volume_id, SNAPSHOT_DESCRIPTION))?;

            let tags = self.tagging.compute_tags(&target.name, &created);
            info!(snapshot_id = %created.id, tags = %tags, "Tagging snapshot");
            self.check(repository.create_tags(&created.id, &tags))?;

            created.tags.extend(&tags);
            outcome.created = Some(created.id.clone());
            snapshots.push(created);
        }

        let plan = self
            .retention
            .evaluate(&snapshots, target.retention_days, now);
        if let Some(kept) = &plan.preserved_expired {
            self.diagnostics.report(&Diagnostic::notice(
                EXPIRED_PRESERVED_CODE,
                format!(
                    "Snapshot {kept} of volume {} is past its {} day retention and is kept as the newest",
                    target.volume_id, target.retention_days
                ),
            ));
        }
        outcome.preserved_expired = plan.preserved_expired;

        for snapshot_id in plan.delete {
            info!(snapshot_id = %snapshot_id, "Deleting snapshot");
            self.check(repository.delete_snapshot(&snapshot_id))?;
            outcome.deleted.push(snapshot_id);
        }

        info!(
            target_name = %target.name,
            created = outcome.created.is_some(),
            deleted = outcome.deleted.len(),
            "Finished target"
        );
        Ok(outcome)
    }

    #[track_caller]
    fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.diagnostics.report(&Diagnostic::capture(e));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::SnapkeepError;
    use crate::repository::{MemorySnapshotRepository, MockSnapshotRepository};
    use crate::snapshot::{Snapshot, TagSet, NAME_TAG};
    use chrono::{Duration, TimeZone};
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        seen: RefCell<Vec<Diagnostic>>,
    }

    impl DiagnosticsObserver for Recorder {
        fn report(&self, diagnostic: &Diagnostic) {
            self.seen.borrow_mut().push(diagnostic.clone());
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap()
    }

    fn config(names: &[(&str, &str)]) -> SnapkeepConfig {
        let targets: Vec<String> = names
            .iter()
            .map(|(name, volume)| {
                format!(
                    r#""{name}": {{ "volume_id": "{volume}", "retention_days": 7,
                        "credentials": {{ "access_key_id": "A", "secret_access_key": "B" }} }}"#
                )
            })
            .collect();
        SnapkeepConfig::from_json_str(&format!(r#"{{ "targets": {{ {} }} }}"#, targets.join(",")))
            .unwrap()
    }

    fn managed(id: &str, volume: &str, age: Duration) -> Snapshot {
        let tags: TagSet = [Tag::new(BACKUP_TAG, BACKUP_TAG_VALUE)].into_iter().collect();
        Snapshot::new(id, volume, now() - age).with_tags(tags)
    }

    #[test]
    fn test_empty_target_gets_tagged_snapshot() {
        let config = config(&[("vol1", "vol-1")]);
        let repo = MemorySnapshotRepository::new().with_fixed_time(now());
        let recorder = Recorder::default();

        let summary = Orchestrator::new(&config, repo.clone(), &recorder)
            .run_at(now())
            .unwrap();

        let outcome = &summary.targets[0];
        assert_eq!(outcome.listed, 0);
        assert!(outcome.deleted.is_empty());

        let created = repo.get(outcome.created.as_ref().unwrap()).unwrap().unwrap();
        assert_eq!(created.tags.get(NAME_TAG), Some("vol1_2405011030"));
        assert!(created.is_managed());
        assert!(recorder.seen.borrow().is_empty());
    }

    #[test]
    fn test_fresh_snapshot_skips_creation_and_prunes() {
        let config = config(&[("web", "vol-1")]);
        let repo = MemorySnapshotRepository::new();
        repo.insert(managed("snap-1h", "vol-1", Duration::hours(1))).unwrap();
        repo.insert(managed("snap-8d", "vol-1", Duration::days(8))).unwrap();
        repo.insert(managed("snap-3d", "vol-1", Duration::days(3))).unwrap();

        let summary = Orchestrator::new(&config, repo.clone(), Recorder::default())
            .run_at(now())
            .unwrap();

        let outcome = &summary.targets[0];
        assert_eq!(outcome.created, None);
        assert_eq!(outcome.deleted, vec![SnapshotId::new("snap-8d")]);
        assert_eq!(repo.snapshots().unwrap().len(), 2);
    }

    #[test]
    fn test_new_snapshot_takes_part_in_retention() {
        let config = config(&[("web", "vol-1")]);
        let repo = MemorySnapshotRepository::new().with_fixed_time(now());
        repo.insert(managed("snap-10d", "vol-1", Duration::days(10))).unwrap();
        repo.insert(managed("snap-20d", "vol-1", Duration::days(20))).unwrap();

        let summary = Orchestrator::new(&config, repo.clone(), Recorder::default())
            .run_at(now())
            .unwrap();

        let outcome = &summary.targets[0];
        assert!(outcome.created.is_some());
        assert_eq!(outcome.preserved_expired, None);
        assert_eq!(
            outcome.deleted,
            vec![SnapshotId::new("snap-10d"), SnapshotId::new("snap-20d")]
        );

        let remaining = repo.snapshots().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(Some(&remaining[0].id), outcome.created.as_ref());
    }

    #[test]
    fn test_unmanaged_snapshots_are_ignored() {
        let config = config(&[("web", "vol-1")]);
        let repo = MemorySnapshotRepository::new();
        repo.insert(managed("snap-1h", "vol-1", Duration::hours(1))).unwrap();
        repo.insert(Snapshot::new("snap-manual", "vol-1", now() - Duration::days(90)))
            .unwrap();

        let summary = Orchestrator::new(&config, repo.clone(), Recorder::default())
            .run_at(now())
            .unwrap();

        assert!(summary.targets[0].deleted.is_empty());
        assert!(repo.get(&SnapshotId::new("snap-manual")).unwrap().is_some());
    }

    #[test]
    fn test_tag_failure_aborts_before_retention() {
        let config = config(&[("web", "vol-1")]);
        let target = &config.targets()[0];
        let recorder = Recorder::default();

        let mut mock = MockSnapshotRepository::new();
        mock.expect_list_snapshots()
            .times(1)
            .returning(|volume, _| Ok(vec![managed("snap-30d", volume, Duration::days(30)), managed("snap-40d", volume, Duration::days(40))]));
        mock.expect_create_snapshot()
            .times(1)
            .returning(|volume, _| Ok(Snapshot::new("snap-new", volume, now())));
        mock.expect_create_tags()
            .times(1)
            .returning(|_, _| Err(SnapkeepError::repository("create_tags", "UnauthorizedOperation")));
        mock.expect_delete_snapshot().times(0);

        let orchestrator = Orchestrator::new(&config, MemorySnapshotRepository::new(), &recorder);
        let result = orchestrator.process_target(&mock, target, now());

        assert!(matches!(
            result,
            Err(SnapkeepError::Repository { operation: "create_tags", .. })
        ));
        let seen = recorder.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].code, "E_REPOSITORY");
        assert!(seen[0].location.unwrap().file().ends_with("orchestrator.rs"));
    }

    #[test]
    fn test_vanished_snapshot_aborts_run() {
        let config = config(&[("web", "vol-1")]);
        let target = &config.targets()[0];
        let recorder = Recorder::default();

        let mut mock = MockSnapshotRepository::new();
        mock.expect_list_snapshots().returning(|volume, _| {
            Ok(vec![
                managed("snap-1h", volume, Duration::hours(1)),
                managed("snap-8d", volume, Duration::days(8)),
                managed("snap-9d", volume, Duration::days(9)),
            ])
        });
        mock.expect_create_snapshot().times(0);
        mock.expect_delete_snapshot()
            .times(1)
            .returning(|id| Err(SnapkeepError::SnapshotNotFound(id.to_string())));

        let orchestrator = Orchestrator::new(&config, MemorySnapshotRepository::new(), &recorder);
        let result = orchestrator.process_target(&mock, target, now());

        assert!(matches!(result, Err(SnapkeepError::SnapshotNotFound(id)) if id == "snap-8d"));
        let seen = recorder.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, ErrorKind::Fatal);
        assert_eq!(seen[0].code, "E_SNAPSHOT_NOT_FOUND");
    }

    #[test]
    fn test_preserved_expired_snapshot_is_a_notice() {
        let config = SnapkeepConfig::from_json_str(
            r#"{ "targets": { "web": { "volume_id": "vol-1", "retention_days": 0,
                "credentials": { "access_key_id": "A", "secret_access_key": "B" } } } }"#,
        )
        .unwrap();
        let target = &config.targets()[0];
        let recorder = Recorder::default();
        let repo = MemorySnapshotRepository::new();
        repo.insert(managed("snap-1h", "vol-1", Duration::hours(1))).unwrap();
        repo.insert(managed("snap-3h", "vol-1", Duration::hours(3))).unwrap();

        let orchestrator = Orchestrator::new(&config, MemorySnapshotRepository::new(), &recorder);
        let outcome = orchestrator.process_target(&repo, target, now()).unwrap();

        assert_eq!(outcome.created, None);
        assert_eq!(outcome.preserved_expired, Some(SnapshotId::new("snap-1h")));
        assert_eq!(outcome.deleted, vec![SnapshotId::new("snap-3h")]);

        let seen = recorder.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, ErrorKind::Notice);
        assert_eq!(seen[0].code, EXPIRED_PRESERVED_CODE);
        assert!(seen[0].message.contains("snap-1h"));
    }

    #[test]
    fn test_fatal_delete_failure_stops_remaining_deletes() {
        let config = config(&[("web", "vol-1")]);
        let target = &config.targets()[0];

        let mut mock = MockSnapshotRepository::new();
        mock.expect_list_snapshots().returning(|volume, _| {
            Ok(vec![
                managed("snap-1h", volume, Duration::hours(1)),
                managed("snap-8d", volume, Duration::days(8)),
                managed("snap-9d", volume, Duration::days(9)),
            ])
        });
        mock.expect_delete_snapshot()
            .times(1)
            .returning(|_| Err(SnapkeepError::repository("delete_snapshot", "RequestLimitExceeded")));

        let orchestrator =
            Orchestrator::new(&config, MemorySnapshotRepository::new(), Recorder::default());
        assert!(orchestrator.process_target(&mock, target, now()).is_err());
    }

    #[test]
    fn test_fatal_error_aborts_remaining_targets() {
        let config = config(&[("alpha", "vol-a"), ("beta", "vol-b")]);
        let repo = MemorySnapshotRepository::new().with_fixed_time(now());
        repo.fail_on("create_tags").unwrap();

        let result = Orchestrator::new(&config, repo.clone(), Recorder::default()).run_at(now());

        assert!(result.is_err());
        let calls = repo.calls().unwrap();
        assert!(calls.contains(&"list_snapshots:vol-a".to_string()));
        assert!(!calls.iter().any(|c| c.ends_with("vol-b")));
        // the untagged snapshot stays behind
        assert_eq!(repo.snapshots().unwrap().len(), 1);
    }

    #[test]
    fn test_summary_counts() {
        let config = config(&[("alpha", "vol-a"), ("beta", "vol-b")]);
        let repo = MemorySnapshotRepository::new().with_fixed_time(now());
        repo.insert(managed("snap-b-2h", "vol-b", Duration::hours(2))).unwrap();
        repo.insert(managed("snap-b-9d", "vol-b", Duration::days(9))).unwrap();

        let summary = Orchestrator::new(&config, repo, Recorder::default())
            .run_at(now())
            .unwrap();

        let names: Vec<_> = summary.targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(summary.created(), 1);
        assert_eq!(summary.deleted(), 1);
    }
}
