//! Caller-visible snapshots.

use tracing::{Instrument, debug, info};

use crate::appliance::{ErrorKind, SnapshotRecord, Transport};
use crate::ident::{SnapshotDesc, VolumeDesc};
use crate::logging::operation_span;

use super::{LifecycleError, LifecycleManager, SnapshotInfo, display_volumes};

impl<T: Transport> LifecycleManager<T> {
    /// Snapshots a volume under a caller-chosen name. Repeating the call
    /// returns the existing snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidArgument`] for bad ids or names,
    /// [`LifecycleError::NotFound`] when the volume is missing,
    /// [`LifecycleError::Aborted`] when the volume is busy, and the mapped
    /// appliance failure otherwise.
    pub async fn create_snapshot(
        &self,
        source_volume_id: &str,
        name: &str,
    ) -> Result<SnapshotInfo, LifecycleError> {
        let owner = VolumeDesc::from_backend_id(source_volume_id)?;
        let desc = SnapshotDesc::from_name(owner, name)?;
        let composite = desc.composite_id();
        let span = operation_span("create_snapshot", &composite);
        self.create_snapshot_inner(&desc).instrument(span).await
    }

    async fn create_snapshot_inner(
        &self,
        desc: &SnapshotDesc,
    ) -> Result<SnapshotInfo, LifecycleError> {
        let owner = desc.owner().backend_id();
        let _lock = self.locks.acquire(owner)?;
        match self.appliance.create_snapshot(owner, desc.backend_id()).await {
            Ok(()) => info!(snapshot = %desc, "snapshot created"),
            Err(err) if err.is(ErrorKind::AlreadyExists) => {
                debug!(snapshot = %desc, "snapshot already exists");
            }
            Err(err) => return Err(err.into()),
        }
        let record = self.appliance.get_snapshot(owner, desc.backend_id()).await?;
        Ok(snapshot_info(desc, &record))
    }

    /// Deletes a snapshot. Deleting a missing snapshot succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidArgument`] for malformed ids,
    /// [`LifecycleError::FailedPrecondition`] naming the volumes cloned from
    /// the snapshot, [`LifecycleError::Aborted`] when its volume is busy, and
    /// the mapped appliance failure otherwise.
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), LifecycleError> {
        let desc = SnapshotDesc::from_composite_id(snapshot_id)?;
        let span = operation_span("delete_snapshot", snapshot_id);
        self.delete_snapshot_inner(&desc).instrument(span).await
    }

    async fn delete_snapshot_inner(&self, desc: &SnapshotDesc) -> Result<(), LifecycleError> {
        let owner = desc.owner().backend_id();
        let _lock = self.locks.acquire(owner)?;
        let record = match self.appliance.get_snapshot(owner, desc.backend_id()).await {
            Ok(record) => record,
            Err(err) if err.is(ErrorKind::NotFound) => {
                debug!(snapshot = %desc, "snapshot already absent");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let clones = record.clone_names();
        if !clones.is_empty() {
            return Err(LifecycleError::FailedPrecondition(format!(
                "snapshot {} has dependent clones: {}",
                desc.display_name(),
                display_volumes(&clones)
            )));
        }
        match self.appliance.delete_snapshot(owner, desc.backend_id()).await {
            Ok(()) => {
                info!(snapshot = %desc, "snapshot deleted");
                Ok(())
            }
            Err(err) if err.is(ErrorKind::NotFound) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Looks up one snapshot by its caller-visible id.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidArgument`] for malformed ids and
    /// [`LifecycleError::NotFound`] when the snapshot or its volume is
    /// missing.
    pub async fn get_snapshot(&self, snapshot_id: &str) -> Result<SnapshotInfo, LifecycleError> {
        let desc = SnapshotDesc::from_composite_id(snapshot_id)?;
        let record = self
            .appliance
            .get_snapshot(desc.owner().backend_id(), desc.backend_id())
            .await?;
        Ok(snapshot_info(&desc, &record))
    }
}

pub(super) fn snapshot_info(desc: &SnapshotDesc, record: &SnapshotRecord) -> SnapshotInfo {
    SnapshotInfo {
        snapshot_id: desc.composite_id(),
        source_volume_id: desc.owner().backend_id().to_owned(),
        creation_time: record.creation.clone(),
        size_bytes: record.volsize,
        ready_to_use: true,
    }
}
