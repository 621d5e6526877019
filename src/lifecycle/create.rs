//! Volume creation: plain, from a snapshot, and from another volume.

use tracing::{Instrument, debug, info};

use crate::appliance::{ErrorKind, Origin, ResourceError, Transport};
use crate::ident::{SnapshotDesc, VolumeDesc};
use crate::logging::operation_span;

use super::{
    CapacityRange, ContentSource, CreateVolumeRequest, LifecycleError, LifecycleManager,
    VolumeInfo,
};

/// Source resolved to backend names.
enum ResolvedSource {
    Snapshot(SnapshotDesc),
    Volume(VolumeDesc),
}

impl<T: Transport> LifecycleManager<T> {
    /// Creates a volume, optionally populated from a snapshot or a volume.
    ///
    /// Creating a volume that already exists succeeds when the existing one
    /// satisfies the request.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidArgument`] for bad names or sources,
    /// [`LifecycleError::OutOfRange`] for unsatisfiable sizes,
    /// [`LifecycleError::AlreadyExists`] when a different volume holds the
    /// name, [`LifecycleError::Aborted`] when the volume or its source is
    /// busy, and the mapped appliance failure otherwise.
    pub async fn create_volume(
        &self,
        request: &CreateVolumeRequest,
    ) -> Result<VolumeInfo, LifecycleError> {
        let desc = VolumeDesc::from_name(&request.name)?;
        let span = operation_span("create_volume", desc.backend_id());
        self.create_volume_inner(&desc, request)
            .instrument(span)
            .await
    }

    async fn create_volume_inner(
        &self,
        desc: &VolumeDesc,
        request: &CreateVolumeRequest,
    ) -> Result<VolumeInfo, LifecycleError> {
        let capacity = request.capacity;
        if capacity.limit_bytes > 0 && capacity.required_bytes > capacity.limit_bytes {
            return Err(LifecycleError::OutOfRange(format!(
                "required size {} exceeds limit {}",
                capacity.required_bytes, capacity.limit_bytes
            )));
        }
        let source = request
            .source
            .as_ref()
            .map(|requested| resolve_source(desc, requested))
            .transpose()?;

        let _volume_lock = self.locks.acquire(desc.backend_id())?;
        let _source_lock = match &source {
            Some(ResolvedSource::Volume(src)) => Some(self.locks.acquire(src.backend_id())?),
            _ => None,
        };

        if let Some(existing) = self.comply(desc, request).await? {
            debug!(volume = %desc, "volume already exists and matches the request");
            self.export(desc).await?;
            return Ok(existing);
        }

        let created = match &source {
            None => self.create_plain(desc, capacity).await,
            Some(ResolvedSource::Snapshot(snapshot)) => {
                self.create_from_snapshot(desc, snapshot, capacity).await
            }
            Some(ResolvedSource::Volume(src)) => self.create_from_volume(desc, src, capacity).await,
        };

        let info = match created {
            Ok(size) => {
                info!(volume = %desc, size, "volume created");
                VolumeInfo {
                    volume_id: desc.backend_id().to_owned(),
                    capacity_bytes: size,
                    source: request.source.clone(),
                }
            }
            Err(CreateFailure::Rejected(err)) => return Err(err),
            Err(CreateFailure::Appliance(err)) if err.is(ErrorKind::AlreadyExists) => {
                // Someone created the name between the compliance check and now.
                self.comply(desc, request)
                    .await?
                    .ok_or_else(|| LifecycleError::from(err))?
            }
            Err(CreateFailure::Appliance(err)) => return Err(err.into()),
        };
        self.export(desc).await?;
        Ok(info)
    }

    /// Returns the existing volume when it satisfies `request`, `None` when
    /// the name is free.
    async fn comply(
        &self,
        desc: &VolumeDesc,
        request: &CreateVolumeRequest,
    ) -> Result<Option<VolumeInfo>, LifecycleError> {
        let record = match self.appliance.get_volume(desc.backend_id()).await {
            Ok(record) => record,
            Err(err) if err.is(ErrorKind::NotFound) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let size = record.volsize;
        let CapacityRange {
            required_bytes,
            limit_bytes,
        } = request.capacity;
        if required_bytes > 0 && size < required_bytes {
            return Err(LifecycleError::AlreadyExists(format!(
                "existing volume {} has size {size}, below the requested {required_bytes}",
                desc.display_name()
            )));
        }
        if limit_bytes > 0 && size > limit_bytes {
            return Err(LifecycleError::AlreadyExists(format!(
                "existing volume {} has size {size}, above the limit {limit_bytes}",
                desc.display_name()
            )));
        }

        let origin = record.origin();
        match &request.source {
            None => {}
            Some(ContentSource::Volume(source)) => {
                let expected = Origin {
                    volume: source.clone(),
                    snapshot: desc.backend_id().to_owned(),
                };
                if origin.as_ref() != Some(&expected) {
                    return Err(LifecycleError::AlreadyExists(format!(
                        "existing volume {} is not a copy of volume {source}",
                        desc.display_name()
                    )));
                }
            }
            Some(ContentSource::Snapshot(snapshot_id)) => {
                let snapshot = SnapshotDesc::from_composite_id(snapshot_id)?;
                let expected = Origin {
                    volume: snapshot.owner().backend_id().to_owned(),
                    snapshot: snapshot.backend_id().to_owned(),
                };
                if origin.as_ref() != Some(&expected) {
                    return Err(LifecycleError::AlreadyExists(format!(
                        "existing volume {} is not derived from snapshot {snapshot_id}",
                        desc.display_name()
                    )));
                }
            }
        }

        Ok(Some(VolumeInfo {
            volume_id: desc.backend_id().to_owned(),
            capacity_bytes: size,
            source: request.source.clone(),
        }))
    }

    /// Size of a plain volume for `capacity`.
    fn plain_size(&self, capacity: CapacityRange) -> Result<u64, LifecycleError> {
        let minimum = self.settings.min_volume_size;
        if capacity.limit_bytes > 0 && capacity.limit_bytes < minimum {
            return Err(LifecycleError::OutOfRange(format!(
                "volume size must be at least {minimum} bytes, limit is {}",
                capacity.limit_bytes
            )));
        }
        Ok(capacity
            .required_bytes
            .max(capacity.limit_bytes)
            .max(minimum))
    }

    async fn create_plain(
        &self,
        desc: &VolumeDesc,
        capacity: CapacityRange,
    ) -> Result<u64, CreateFailure> {
        let size = self.plain_size(capacity)?;
        self.appliance.create_volume(desc.backend_id(), size).await?;
        Ok(size)
    }

    async fn create_from_snapshot(
        &self,
        desc: &VolumeDesc,
        snapshot: &SnapshotDesc,
        capacity: CapacityRange,
    ) -> Result<u64, CreateFailure> {
        let owner = snapshot.owner().backend_id();
        let record = self
            .appliance
            .get_snapshot(owner, snapshot.backend_id())
            .await?;
        let size = match record.volsize {
            // NAS snapshots carry no size; the clone inherits the owner's quota.
            0 => self.appliance.get_volume(owner).await?.volsize,
            size => size,
        };
        check_inherited_size(size, capacity)?;
        self.appliance
            .create_clone(owner, snapshot.backend_id(), desc.backend_id())
            .await?;
        Ok(size)
    }

    async fn create_from_volume(
        &self,
        desc: &VolumeDesc,
        source: &VolumeDesc,
        capacity: CapacityRange,
    ) -> Result<u64, CreateFailure> {
        let record = self.appliance.get_volume(source.backend_id()).await?;
        check_inherited_size(record.volsize, capacity)?;

        // The intermediate snapshot carries the clone's own id, which keeps
        // it out of public listings and ties it to exactly one clone.
        let intermediate = desc.backend_id();
        match self
            .appliance
            .create_snapshot(source.backend_id(), intermediate)
            .await
        {
            Ok(()) => debug!(source = %source, snapshot = intermediate, "intermediate snapshot created"),
            Err(err) if err.is(ErrorKind::AlreadyExists) => {
                self.reuse_intermediate(desc, source).await?;
            }
            Err(err) => return Err(err.into()),
        }

        self.appliance
            .create_clone(source.backend_id(), intermediate, desc.backend_id())
            .await?;
        Ok(record.volsize)
    }

    /// Accepts a leftover intermediate snapshot from an earlier attempt when
    /// nothing but the volume being created depends on it.
    async fn reuse_intermediate(
        &self,
        desc: &VolumeDesc,
        source: &VolumeDesc,
    ) -> Result<(), CreateFailure> {
        let snapshot = self
            .appliance
            .get_snapshot(source.backend_id(), desc.backend_id())
            .await?;
        let clones = snapshot.clone_names();
        match clones.as_slice() {
            [] => {
                debug!(source = %source, snapshot = %desc, "reusing unused intermediate snapshot");
                Ok(())
            }
            [only] if only == desc.backend_id() => Ok(()),
            _ => Err(CreateFailure::Rejected(LifecycleError::AlreadyExists(
                format!(
                    "intermediate snapshot {} on volume {} backs other volumes: {}",
                    desc.backend_id(),
                    source.display_name(),
                    super::display_volumes(&clones)
                ),
            ))),
        }
    }
}

/// Failure of a creation path: either a local rejection or an appliance
/// answer that still needs interpreting.
enum CreateFailure {
    Rejected(LifecycleError),
    Appliance(ResourceError),
}

impl From<ResourceError> for CreateFailure {
    fn from(err: ResourceError) -> Self {
        Self::Appliance(err)
    }
}

impl From<LifecycleError> for CreateFailure {
    fn from(err: LifecycleError) -> Self {
        Self::Rejected(err)
    }
}

fn resolve_source(
    desc: &VolumeDesc,
    source: &ContentSource,
) -> Result<ResolvedSource, LifecycleError> {
    match source {
        ContentSource::Snapshot(id) => Ok(ResolvedSource::Snapshot(
            SnapshotDesc::from_composite_id(id)?,
        )),
        ContentSource::Volume(id) => {
            let volume = VolumeDesc::from_backend_id(id)?;
            if volume.backend_id() == desc.backend_id() {
                return Err(LifecycleError::InvalidArgument(format!(
                    "volume {} cannot be created from itself",
                    desc.display_name()
                )));
            }
            Ok(ResolvedSource::Volume(volume))
        }
    }
}

/// Clones inherit the source size and cannot be resized on creation.
fn check_inherited_size(source_size: u64, capacity: CapacityRange) -> Result<(), LifecycleError> {
    if capacity.limit_bytes > 0 && capacity.limit_bytes < source_size {
        return Err(LifecycleError::OutOfRange(format!(
            "source size {source_size} exceeds limit {}",
            capacity.limit_bytes
        )));
    }
    if capacity.required_bytes > source_size {
        return Err(LifecycleError::OutOfRange(format!(
            "required size {} exceeds source size {source_size}",
            capacity.required_bytes
        )));
    }
    Ok(())
}
