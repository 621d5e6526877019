//! Export bookkeeping and pool capacity.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::appliance::{ErrorKind, ResourceError, Transport, VolumeKind};
use crate::ident::VolumeDesc;

use super::{Capacity, LifecycleError, LifecycleManager};

/// Protocol reported when publishing block volumes.
pub const ISCSI_PROTOCOL_TYPE: &str = "iSCSI";

/// Protocol reported when publishing file volumes.
pub const NFS_PROTOCOL_TYPE: &str = "NFS";

impl<T: Transport> LifecycleManager<T> {
    /// Returns the publish context a node needs to attach the volume.
    ///
    /// Block volumes are described by an iSCSI target and LUN, file volumes
    /// by the path of their NFS share.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidArgument`] for malformed ids,
    /// [`LifecycleError::NotFound`] when the volume is missing, and the
    /// mapped appliance failure otherwise.
    pub async fn publish_volume(
        &self,
        volume_id: &str,
        read_only: bool,
    ) -> Result<BTreeMap<String, String>, LifecycleError> {
        let desc = VolumeDesc::from_backend_id(volume_id)?;
        self.appliance.get_volume(desc.backend_id()).await?;
        let mode = if read_only { "ro" } else { "wt" };
        let context = match self.appliance.kind() {
            VolumeKind::Block => {
                let target = format!("{}:{}", self.settings.iqn_prefix, desc.backend_id());
                info!(volume = %desc, %target, mode, "volume published");
                BTreeMap::from([
                    ("protocol_type".to_owned(), ISCSI_PROTOCOL_TYPE.to_owned()),
                    ("read_only".to_owned(), mode.to_owned()),
                    ("target".to_owned(), target),
                    ("lun".to_owned(), "0".to_owned()),
                ])
            }
            VolumeKind::File => {
                let share_path = format!("/{}", desc.backend_id());
                info!(volume = %desc, %share_path, mode, "volume published");
                BTreeMap::from([
                    ("protocol_type".to_owned(), NFS_PROTOCOL_TYPE.to_owned()),
                    ("read_only".to_owned(), mode.to_owned()),
                    ("share_path".to_owned(), share_path),
                ])
            }
        };
        Ok(context)
    }

    /// Withdraws a publication. A missing volume is already unpublished.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidArgument`] for malformed ids and the
    /// mapped appliance failure when the volume cannot be checked.
    pub async fn unpublish_volume(&self, volume_id: &str) -> Result<(), LifecycleError> {
        let desc = VolumeDesc::from_backend_id(volume_id)?;
        match self.appliance.get_volume(desc.backend_id()).await {
            Ok(_) => {
                debug!(volume = %desc, "volume present, no export to detach");
                Ok(())
            }
            Err(err) if err.is(ErrorKind::NotFound) => {
                debug!(volume = %desc, "volume absent, nothing to unpublish");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Makes sure a file volume is shared over NFS. Block volumes need no
    /// appliance-side export.
    pub(super) async fn export(&self, desc: &VolumeDesc) -> Result<(), ResourceError> {
        if self.appliance.kind() == VolumeKind::Block {
            return Ok(());
        }
        match self.appliance.create_share(desc.backend_id()).await {
            Ok(()) => {
                debug!(volume = %desc, "share created");
                Ok(())
            }
            Err(err) if err.is(ErrorKind::AlreadyExists) => {
                debug!(volume = %desc, "share already present");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Removes the NFS share of a file volume; a missing share is already
    /// gone.
    pub(super) async fn unexport(&self, desc: &VolumeDesc) -> Result<(), ResourceError> {
        if self.appliance.kind() == VolumeKind::Block {
            return Ok(());
        }
        match self.appliance.delete_share(desc.backend_id()).await {
            Ok(()) => {
                debug!(volume = %desc, "share removed");
                Ok(())
            }
            Err(err) if err.is(ErrorKind::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Reports free pool space and the smallest volume size.
    ///
    /// # Errors
    ///
    /// Returns the mapped appliance failure.
    pub async fn get_capacity(&self) -> Result<Capacity, LifecycleError> {
        let pool = self.appliance.get_pool().await?;
        debug!(pool = %pool.name, available = pool.available, "pool capacity");
        Ok(Capacity {
            available_bytes: pool.available,
            minimum_volume_size: self.settings.min_volume_size,
        })
    }
}
