//! Volume deletion and the garbage collection of intermediate snapshots.

use std::collections::{HashSet, VecDeque};

use tracing::{Instrument, debug, info, warn};

use crate::appliance::{ErrorKind, Origin, ResourceError, SnapshotRecord, Transport};
use crate::guard::GuardError;
use crate::ident::{SnapshotRole, VolumeDesc, is_concealed_snapshot, is_concealed_volume};
use crate::logging::operation_span;

use super::{LifecycleError, LifecycleManager, display_snapshots, display_volumes};

/// What stands between a volume and its deletion.
#[derive(Debug, Default)]
struct Blockers {
    public: Vec<String>,
    dependents: Vec<String>,
    reclaimable: Vec<String>,
}

impl<T: Transport> LifecycleManager<T> {
    /// Deletes a volume. Deleting a missing volume succeeds.
    ///
    /// A volume whose only snapshots are unused intermediate ones is cleaned
    /// up and deleted. Once the volume is gone, the intermediate snapshot it
    /// was cloned from is collected as well.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::FailedPrecondition`] naming the snapshots or
    /// volumes that still depend on the volume, [`LifecycleError::Aborted`]
    /// when the volume is busy, and the mapped appliance failure otherwise.
    pub async fn delete_volume(&self, volume_id: &str) -> Result<(), LifecycleError> {
        let desc = VolumeDesc::from_backend_id(volume_id)?;
        let span = operation_span("delete_volume", desc.backend_id());
        self.delete_volume_inner(&desc).instrument(span).await
    }

    async fn delete_volume_inner(&self, desc: &VolumeDesc) -> Result<(), LifecycleError> {
        let _lock = self.locks.acquire(desc.backend_id())?;

        let record = match self.appliance.get_volume(desc.backend_id()).await {
            Ok(record) => record,
            Err(err) if err.is(ErrorKind::NotFound) => {
                debug!(volume = %desc, "volume already absent");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        self.unexport(desc).await?;
        match self.appliance.delete_volume(desc.backend_id()).await {
            Ok(()) => {}
            Err(err) if err.is(ErrorKind::NotFound) => return Ok(()),
            Err(err) if err.kind.is_busy() => {
                self.clear_blockers(desc, err).await?;
                match self.appliance.delete_volume(desc.backend_id()).await {
                    Ok(()) => {}
                    Err(retry) if retry.is(ErrorKind::NotFound) => {}
                    Err(retry) => return Err(retry.into()),
                }
            }
            Err(err) => return Err(err.into()),
        }
        info!(volume = %desc, "volume deleted");

        self.collect_garbage(record.origin()).await;
        Ok(())
    }

    /// Removes unused intermediate snapshots that keep the volume busy.
    /// Fails when anything still depends on the volume.
    async fn clear_blockers(
        &self,
        desc: &VolumeDesc,
        busy: ResourceError,
    ) -> Result<(), LifecycleError> {
        let blockers = match self.blockers(desc).await {
            Ok(blockers) => blockers,
            Err(err) if err.is(ErrorKind::NotFound) => {
                debug!(volume = %desc, "volume vanished while listing its snapshots");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        if !blockers.public.is_empty() {
            return Err(LifecycleError::FailedPrecondition(format!(
                "volume {} is dependent upon by snapshots: {}",
                desc.display_name(),
                display_snapshots(desc, &blockers.public)
            )));
        }
        if !blockers.dependents.is_empty() {
            let chain = self.dependent_chain(blockers.dependents).await;
            return Err(LifecycleError::FailedPrecondition(format!(
                "volume {} is dependent upon by volumes: {}",
                desc.display_name(),
                display_volumes(&chain)
            )));
        }
        if blockers.reclaimable.is_empty() {
            return Err(busy.into());
        }
        for snapshot in &blockers.reclaimable {
            match self.appliance.delete_snapshot(desc.backend_id(), snapshot).await {
                Ok(()) => {
                    debug!(volume = %desc, snapshot = %snapshot, "unused intermediate snapshot removed");
                }
                Err(err) if err.is(ErrorKind::NotFound) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn blockers(&self, desc: &VolumeDesc) -> Result<Blockers, ResourceError> {
        let snapshots = self.all_volume_snapshots(desc.backend_id()).await?;
        let mut blockers = Blockers::default();
        for snapshot in snapshots {
            let role = SnapshotRole::of(desc, &snapshot.name);
            if !role.is_concealed() {
                blockers.public.push(snapshot.name);
                continue;
            }
            let clones = snapshot.clone_names();
            if clones.is_empty() {
                blockers.reclaimable.push(snapshot.name);
            } else {
                blockers.dependents.extend(clones);
            }
        }
        Ok(blockers)
    }

    /// Expands direct clones into every volume cloned from them through
    /// concealed snapshots, in discovery order. Legacy concealed volumes are
    /// walked through but not named. Listing failures end the walk below the
    /// failing volume only.
    async fn dependent_chain(&self, direct: Vec<String>) -> Vec<String> {
        let mut pending: VecDeque<String> = direct.into();
        let mut visited = HashSet::new();
        let mut chain = Vec::new();
        while let Some(volume) = pending.pop_front() {
            if !visited.insert(volume.clone()) {
                continue;
            }
            if !is_concealed_volume(&volume) {
                chain.push(volume.clone());
            }
            match self.all_volume_snapshots(&volume).await {
                Ok(snapshots) => pending.extend(
                    snapshots
                        .iter()
                        .filter(|snapshot| is_concealed_snapshot(&snapshot.name))
                        .flat_map(SnapshotRecord::clone_names),
                ),
                Err(err) => debug!(volume = %volume, error = %err, "dependent walk stopped"),
            }
        }
        chain
    }

    /// Walks up the origin chain of a deleted volume, removing concealed
    /// snapshots nothing depends on any more. Failures are logged; the
    /// deletion that triggered the walk has already succeeded.
    async fn collect_garbage(&self, origin: Option<Origin>) {
        let mut pending: Vec<Origin> = origin.into_iter().collect();
        let mut visited = HashSet::new();
        while let Some(next) = pending.pop() {
            if !visited.insert(format!("{}@{}", next.volume, next.snapshot)) {
                continue;
            }
            match self.collect_origin(&next).await {
                Ok(Some(parent)) => pending.push(parent),
                Ok(None) => {}
                Err(err) => warn!(
                    volume = %next.volume,
                    snapshot = %next.snapshot,
                    error = %err,
                    "garbage collection step failed"
                ),
            }
        }
    }

    /// Collects one origin. Returns the origin of a concealed source volume
    /// that was removed as a consequence, so the walk can continue.
    async fn collect_origin(&self, origin: &Origin) -> Result<Option<Origin>, ResourceError> {
        if !is_concealed_snapshot(&origin.snapshot) {
            return Ok(None);
        }
        let _lock = match self.locks.acquire(&origin.volume) {
            Ok(lock) => lock,
            Err(GuardError::Held { .. }) => {
                debug!(volume = %origin.volume, "source busy, leaving collection for later");
                return Ok(None);
            }
            Err(err @ GuardError::NotHeld { .. }) => {
                return Err(ResourceError::new(ErrorKind::Busy, err.to_string()));
            }
        };

        match self
            .appliance
            .get_snapshot(&origin.volume, &origin.snapshot)
            .await
        {
            Ok(snapshot) if !snapshot.clone_names().is_empty() => return Ok(None),
            Ok(_) => match self
                .appliance
                .delete_snapshot(&origin.volume, &origin.snapshot)
                .await
            {
                Ok(()) => info!(
                    volume = %origin.volume,
                    snapshot = %origin.snapshot,
                    "intermediate snapshot collected"
                ),
                Err(err) if err.is(ErrorKind::NotFound) => {}
                Err(err) => return Err(err),
            },
            Err(err) if err.is(ErrorKind::NotFound) => {}
            Err(err) => return Err(err),
        }

        if !is_concealed_volume(&origin.volume) {
            return Ok(None);
        }
        let source = match self.appliance.get_volume(&origin.volume).await {
            Ok(source) => source,
            Err(err) if err.is(ErrorKind::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        };
        if !self.all_volume_snapshots(&origin.volume).await?.is_empty() {
            return Ok(None);
        }
        match self.appliance.delete_volume(&origin.volume).await {
            Ok(()) => info!(volume = %origin.volume, "concealed volume collected"),
            Err(err) if err.is(ErrorKind::NotFound) => {}
            Err(err) => return Err(err),
        }
        Ok(source.origin())
    }
}
