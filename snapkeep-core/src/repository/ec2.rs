/*!
Amazon EC2 snapshot repository.

This module manages EBS snapshots through the official AWS SDK. Each target
gets its own client built from the target's static credentials and region.
*/

use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::config::Credentials;
use aws_sdk_ec2::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types::{Filter, Tag as Ec2Tag};
use aws_sdk_ec2::Client as Ec2Client;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, error, info};

use super::{RepositoryProvider, SnapshotRepository};
use crate::config::BackupTarget;
use crate::snapshot::{Snapshot, SnapshotId, Tag, TagSet};
use crate::{Result, SnapkeepError};

const CREDENTIALS_PROVIDER_NAME: &str = "snapkeep-config";

/// EC2 snapshot repository for one region and credential
///
/// Every call blocks on the shared runtime until the SDK request completes.
/// Requests are issued with `DryRun=false` and are never retried.
///
/// # Example
/// ```rust,no_run
/// use snapkeep_core::repository::{Ec2RepositoryProvider, RepositoryProvider};
/// use snapkeep_core::SnapkeepConfig;
///
/// let config = SnapkeepConfig::from_file("snapkeep.json")?;
/// let provider = Ec2RepositoryProvider::new()?;
/// for target in config.targets() {
///     let repository = provider.open(&target)?;
///     // list, create, tag and delete through `repository`
/// }
/// # Ok::<(), snapkeep_core::SnapkeepError>(())
/// ```
#[derive(Debug)]
pub struct Ec2SnapshotRepository {
    client: Ec2Client,
    region: String,
    runtime: Arc<Runtime>,
}

impl Ec2SnapshotRepository {
    /// Create a repository for `target`, sharing `runtime`. Bad credentials
    /// surface on the first request, not here.
    pub fn new(target: &BackupTarget, runtime: Arc<Runtime>) -> Self {
        let credentials = Credentials::new(
            target.credentials.access_key_id.clone(),
            target.credentials.secret_access_key.clone(),
            target.credentials.session_token.clone(),
            None,
            CREDENTIALS_PROVIDER_NAME,
        );

        let sdk_config = runtime.block_on(async {
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(target.region.clone()))
                .credentials_provider(credentials)
                .load()
                .await
        });

        let client = Ec2Client::new(&sdk_config);

        info!(region = %target.region, target_name = %target.name, "Initialized EC2 snapshot repository");

        Self {
            client,
            region: target.region.clone(),
            runtime,
        }
    }
}

impl SnapshotRepository for Ec2SnapshotRepository {
    fn list_snapshots(&self, volume_id: &str, tag_filter: &Tag) -> Result<Vec<Snapshot>> {
        debug!(
            region = %self.region,
            volume_id,
            tag = %format!("{}={}", tag_filter.key, tag_filter.value),
            "Starting EC2 describe_snapshots operation"
        );

        let mut snapshots = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let result = self.runtime.block_on(async {
                self.client
                    .describe_snapshots()
                    .filters(Filter::builder().name("volume-id").values(volume_id).build())
                    .filters(
                        Filter::builder()
                            .name(format!("tag:{}", tag_filter.key))
                            .values(&tag_filter.value)
                            .build(),
                    )
                    .set_next_token(next_token.clone())
                    .send()
                    .await
            });

            let output = result.map_err(|e| {
                let mapped = map_ec2_error("describe_snapshots", e, volume_id);
                error!(region = %self.region, volume_id, error = ?mapped, "Failed to list snapshots");
                mapped
            })?;

            for raw in output.snapshots() {
                snapshots.push(convert_snapshot(
                    raw.snapshot_id(),
                    raw.volume_id(),
                    raw.start_time(),
                    raw.tags(),
                )?);
            }

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(region = %self.region, volume_id, count = snapshots.len(), "Listed snapshots");
        Ok(snapshots)
    }

    fn create_snapshot(&self, volume_id: &str, description: &str) -> Result<Snapshot> {
        let result = self.runtime.block_on(async {
            self.client
                .create_snapshot()
                .volume_id(volume_id)
                .description(description)
                .dry_run(false)
                .send()
                .await
        });

        match result {
            Ok(output) => {
                let snapshot = convert_snapshot(
                    output.snapshot_id(),
                    output.volume_id(),
                    output.start_time(),
                    output.tags(),
                )?;
                debug!(region = %self.region, snapshot_id = %snapshot.id, "Created snapshot");
                Ok(snapshot)
            }
            Err(e) => {
                let mapped = map_ec2_error("create_snapshot", e, volume_id);
                error!(region = %self.region, volume_id, error = ?mapped, "Failed to create snapshot");
                Err(mapped)
            }
        }
    }

    fn create_tags(&self, resource_id: &SnapshotId, tags: &TagSet) -> Result<()> {
        let ec2_tags: Vec<Ec2Tag> = tags
            .iter()
            .map(|tag| Ec2Tag::builder().key(tag.key).value(tag.value).build())
            .collect();

        let result = self.runtime.block_on(async {
            self.client
                .create_tags()
                .resources(resource_id.as_str())
                .set_tags(Some(ec2_tags))
                .dry_run(false)
                .send()
                .await
        });

        result.map(|_| ()).map_err(|e| {
            let mapped = map_ec2_error("create_tags", e, resource_id.as_str());
            error!(region = %self.region, snapshot_id = %resource_id, error = ?mapped, "Failed to tag snapshot");
            mapped
        })
    }

    fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<()> {
        let result = self.runtime.block_on(async {
            self.client
                .delete_snapshot()
                .snapshot_id(snapshot_id.as_str())
                .dry_run(false)
                .send()
                .await
        });

        match result {
            Ok(_) => {
                debug!(region = %self.region, snapshot_id = %snapshot_id, "Deleted snapshot");
                Ok(())
            }
            Err(e) => Err(map_ec2_error("delete_snapshot", e, snapshot_id.as_str())),
        }
    }
}

/// Builds one [`Ec2SnapshotRepository`] per target on a shared runtime.
#[derive(Debug, Clone)]
pub struct Ec2RepositoryProvider {
    runtime: Arc<Runtime>,
}

impl Ec2RepositoryProvider {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                SnapkeepError::repository(
                    "init",
                    format!("Failed to create async runtime for EC2 client: {e}"),
                )
            })?;
        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }
}

impl RepositoryProvider for Ec2RepositoryProvider {
    fn open(&self, target: &BackupTarget) -> Result<Box<dyn SnapshotRepository>> {
        Ok(Box::new(Ec2SnapshotRepository::new(
            target,
            Arc::clone(&self.runtime),
        )))
    }
}

fn convert_snapshot(
    snapshot_id: Option<&str>,
    volume_id: Option<&str>,
    start_time: Option<&aws_sdk_ec2::primitives::DateTime>,
    tags: &[Ec2Tag],
) -> Result<Snapshot> {
    let id = snapshot_id
        .ok_or_else(|| SnapkeepError::repository("convert", "snapshot without SnapshotId"))?;
    let created_at = start_time
        .and_then(|t| to_utc(t.secs()))
        .ok_or_else(|| {
            SnapkeepError::repository("convert", format!("snapshot {id} without StartTime"))
        })?;

    let tag_set: TagSet = tags
        .iter()
        .filter_map(|t| match (t.key(), t.value()) {
            (Some(k), Some(v)) => Some(Tag::new(k, v)),
            _ => None,
        })
        .collect();

    Ok(Snapshot::new(id, volume_id.unwrap_or_default(), created_at).with_tags(tag_set))
}

fn to_utc(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Map AWS SDK errors to SnapkeepError with appropriate context
fn map_ec2_error<E: ProvideErrorMetadata + std::fmt::Debug, R: std::fmt::Debug>(
    op: &'static str,
    error: SdkError<E, R>,
    resource: &str,
) -> SnapkeepError {
    match &error {
        SdkError::DispatchFailure(dispatch_err) => SnapkeepError::repository(
            op,
            format!("request failed to dispatch: {dispatch_err:?}"),
        ),
        SdkError::TimeoutError(_) => {
            SnapkeepError::repository(op, format!("request timed out ({resource})"))
        }
        SdkError::ResponseError(response_err) => {
            SnapkeepError::repository(op, format!("response error: {response_err:?}"))
        }
        SdkError::ServiceError(service_err) => classify_service_error(
            op,
            service_err.err().code(),
            service_err.err().message(),
            resource,
        ),
        _ => SnapkeepError::repository(op, format!("{error:?}")),
    }
}

/// Classify an EC2 service error code.
fn classify_service_error(
    op: &'static str,
    code: Option<&str>,
    message: Option<&str>,
    resource: &str,
) -> SnapkeepError {
    let message = message.unwrap_or("Unknown error");
    match code {
        Some("InvalidSnapshot.NotFound") if op == "delete_snapshot" => {
            SnapkeepError::SnapshotNotFound(resource.to_string())
        }
        Some("InvalidVolume.NotFound") => {
            SnapkeepError::repository(op, format!("volume '{resource}' not found"))
        }
        Some("AuthFailure") | Some("UnauthorizedOperation") => SnapkeepError::repository(
            op,
            format!("access denied (check credentials and permissions): {message}"),
        ),
        Some(code) => SnapkeepError::repository(op, format!("service error ({code}): {message}")),
        None => SnapkeepError::repository(op, format!("service error: {message}")),
    }
}
