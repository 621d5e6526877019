//! Clone-based volume and snapshot lifecycle on top of the appliance.
//!
//! ZFS refuses to destroy a snapshot that still has clones and a volume that
//! still has snapshots. Volume-to-volume copies are therefore built from an
//! intermediate snapshot on the source, named after the new volume and
//! hidden from every listing. Deleting a clone garbage-collects the
//! intermediate snapshot it leaves behind.
//!
//! The manager keeps no resource state between calls. Every operation
//! re-reads the appliance and takes the per-volume lock from
//! [`LockTable`] for as long as it issues calls that depend on each other.

mod create;
mod delete;
mod list;
mod publish;
mod snapshot;
pub mod status;

use serde::Serialize;
use tracing::debug;

use crate::appliance::{
    Appliance, HttpTransport, Transport, TransportError, VolumeKind, VolumeRecord,
};
use crate::config::ApplianceConfig;
use crate::guard::LockTable;
use crate::ident::{SnapshotDesc, SnapshotRole, VolumeDesc};

pub use list::ListSnapshotsRequest;
pub use status::{Code, LifecycleError};

/// Requested capacity. Zero leaves a bound unset.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CapacityRange {
    /// Smallest acceptable size in bytes.
    pub required_bytes: u64,
    /// Largest acceptable size in bytes.
    pub limit_bytes: u64,
}

/// Content a new volume is populated from.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ContentSource {
    /// Caller-visible snapshot identifier.
    Snapshot(String),
    /// Backend identifier of a volume.
    Volume(String),
}

/// Parameters of [`LifecycleManager::create_volume`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateVolumeRequest {
    /// Caller-chosen volume name.
    pub name: String,
    /// Requested size bounds.
    pub capacity: CapacityRange,
    /// Optional content source.
    pub source: Option<ContentSource>,
}

/// A volume as reported to callers.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VolumeInfo {
    /// Backend identifier handed to callers.
    pub volume_id: String,
    /// Size in bytes.
    pub capacity_bytes: u64,
    /// Content the volume was created from, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ContentSource>,
}

/// A snapshot as reported to callers.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SnapshotInfo {
    /// Caller-visible snapshot identifier.
    pub snapshot_id: String,
    /// Backend identifier of the snapshotted volume.
    pub source_volume_id: String,
    /// Creation time as reported by the appliance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    /// Size of the snapshotted volume in bytes; zero when the listing does
    /// not carry it.
    pub size_bytes: u64,
    /// Snapshots are usable as soon as the appliance acknowledges them.
    pub ready_to_use: bool,
}

/// One window of a listing.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Paged<T> {
    /// Entries visible to callers.
    pub entries: Vec<T>,
    /// Token resuming the listing; `None` once exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// Pool capacity summary.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Capacity {
    /// Free bytes in the pool.
    pub available_bytes: u64,
    /// Smallest volume the plugin creates.
    pub minimum_volume_size: u64,
}

/// Tunables that shape lifecycle decisions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LifecycleSettings {
    /// Smallest volume the plugin creates, in bytes.
    pub min_volume_size: u64,
    /// IQN prefix of exported targets.
    pub iqn_prefix: String,
}

impl From<&ApplianceConfig> for LifecycleSettings {
    fn from(config: &ApplianceConfig) -> Self {
        Self {
            min_volume_size: config.min_volume_size,
            iqn_prefix: config.iqn_prefix.clone(),
        }
    }
}

/// Drives volume and snapshot lifecycles against one appliance pool.
#[derive(Debug)]
pub struct LifecycleManager<T> {
    appliance: Appliance<T>,
    locks: LockTable,
    settings: LifecycleSettings,
}

impl LifecycleManager<HttpTransport> {
    /// Builds a manager talking HTTP to the configured appliance and
    /// provisioning volumes of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the HTTP client cannot be built.
    pub fn from_config(
        config: &ApplianceConfig,
        kind: VolumeKind,
    ) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(
            Appliance::new(transport, config.pool.clone()).with_kind(kind),
            LifecycleSettings::from(config),
        ))
    }
}

impl<T: Transport> LifecycleManager<T> {
    /// Wraps an appliance client.
    #[must_use]
    pub fn new(appliance: Appliance<T>, settings: LifecycleSettings) -> Self {
        Self {
            appliance,
            locks: LockTable::new(),
            settings,
        }
    }

    /// Appliance client used by the manager.
    #[must_use]
    pub const fn appliance(&self) -> &Appliance<T> {
        &self.appliance
    }

    /// Lock table serialising operations per volume.
    #[must_use]
    pub const fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Looks up one volume.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidArgument`] for malformed ids and
    /// [`LifecycleError::NotFound`] when the volume is missing.
    pub async fn get_volume(&self, volume_id: &str) -> Result<VolumeInfo, LifecycleError> {
        let desc = VolumeDesc::from_backend_id(volume_id)?;
        let record = self.appliance.get_volume(desc.backend_id()).await?;
        Ok(volume_info(&record))
    }
}

/// Caller-facing view of a volume record.
fn volume_info(record: &VolumeRecord) -> VolumeInfo {
    VolumeInfo {
        volume_id: record.name.clone(),
        capacity_bytes: record.volsize,
        source: content_source(record),
    }
}

/// Derives the content source from a clone's origin.
fn content_source(record: &VolumeRecord) -> Option<ContentSource> {
    let origin = record.origin()?;
    let owner = VolumeDesc::from_backend_id(&origin.volume).ok()?;
    match SnapshotRole::of(&owner, &origin.snapshot) {
        SnapshotRole::Public(snapshot) => Some(ContentSource::Snapshot(snapshot.composite_id())),
        SnapshotRole::Intermediate(_) => Some(ContentSource::Volume(origin.volume)),
        SnapshotRole::Concealed | SnapshotRole::Foreign => {
            debug!(volume = %record.name, origin = %origin.snapshot, "origin not managed here");
            None
        }
    }
}

/// Human readable names of backend volume ids, for messages.
fn display_volumes(ids: &[String]) -> String {
    ids.iter()
        .map(|id| {
            VolumeDesc::from_backend_id(id)
                .map_or_else(|_| id.clone(), |desc| desc.display_name().to_owned())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human readable names of snapshots on `owner`, for messages.
fn display_snapshots(owner: &VolumeDesc, names: &[String]) -> String {
    names
        .iter()
        .map(|name| {
            SnapshotDesc::from_backend_id(owner.clone(), name)
                .map_or_else(|_| name.clone(), |desc| desc.display_name().to_owned())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Converts a caller-supplied `max_entries` into the engine's window size.
fn window_size(max_entries: i64) -> Result<usize, LifecycleError> {
    usize::try_from(max_entries).map_err(|_| {
        LifecycleError::InvalidArgument(format!("max_entries must not be negative, got {max_entries}"))
    })
}

#[cfg(test)]
mod tests;
