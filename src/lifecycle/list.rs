//! Caller-visible listings of volumes and snapshots.

use tracing::{Instrument, debug};

use crate::appliance::{ErrorKind, PoolSnapshotRecord, ResourceError, SnapshotRecord, Transport};
use crate::ident::{SnapshotRole, VolumeDesc, is_concealed_volume};
use crate::listing::{self, Listing, ListingToken};
use crate::logging::operation_span;

use super::snapshot::snapshot_info;
use super::{
    LifecycleError, LifecycleManager, Paged, SnapshotInfo, VolumeInfo, volume_info, window_size,
};

/// Filters accepted by [`LifecycleManager::list_snapshots`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ListSnapshotsRequest {
    /// Window size; zero returns everything.
    pub max_entries: i64,
    /// Token from a previous call; empty to start afresh.
    pub starting_token: String,
    /// Restricts the listing to snapshots of one volume.
    pub source_volume_id: Option<String>,
    /// Looks up a single snapshot.
    pub snapshot_id: Option<String>,
}

impl<T: Transport> LifecycleManager<T> {
    /// Lists the pool's volumes, hiding datasets this plugin does not show.
    ///
    /// Hidden datasets still count against the window, so a page may carry
    /// fewer than `max_entries` entries while a next token is returned.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidArgument`] for a negative window,
    /// [`LifecycleError::Aborted`] for an unparsable token, and the mapped
    /// appliance failure otherwise.
    pub async fn list_volumes(
        &self,
        max_entries: i64,
        starting_token: &str,
    ) -> Result<Paged<VolumeInfo>, LifecycleError> {
        let window = window_size(max_entries)?;
        let token = ListingToken::parse(starting_token)?;
        let span = operation_span("list_volumes", self.appliance.pool());
        let Listing { items, next } = listing::list(
            window,
            token,
            |cursor| async move {
                self.appliance
                    .list_volumes_page(cursor.page(), cursor.disambiguator())
                    .await
            },
            |record| record.name.clone(),
        )
        .instrument(span)
        .await?;

        let entries = items
            .iter()
            .filter(|record| {
                !is_concealed_volume(&record.name)
                    && VolumeDesc::from_backend_id(&record.name).is_ok()
            })
            .map(volume_info)
            .collect();
        Ok(Paged {
            entries,
            next_token: next.map(|cursor| cursor.to_string()),
        })
    }

    /// Lists caller-visible snapshots: a single one by id, those of one
    /// volume, or every snapshot in the pool.
    ///
    /// A missing volume or snapshot yields an empty listing.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidArgument`] for a negative window or
    /// malformed ids, [`LifecycleError::Aborted`] for an unparsable token,
    /// and the mapped appliance failure otherwise.
    pub async fn list_snapshots(
        &self,
        request: &ListSnapshotsRequest,
    ) -> Result<Paged<SnapshotInfo>, LifecycleError> {
        let window = window_size(request.max_entries)?;
        if let Some(snapshot_id) = &request.snapshot_id {
            return self.lookup_snapshot(snapshot_id).await;
        }
        let token = ListingToken::parse(&request.starting_token)?;
        match &request.source_volume_id {
            Some(volume_id) => {
                let owner = VolumeDesc::from_backend_id(volume_id)?;
                let span = operation_span("list_volume_snapshots", owner.backend_id());
                self.list_volume_snapshots(&owner, window, token)
                    .instrument(span)
                    .await
            }
            None => {
                let span = operation_span("list_snapshots", self.appliance.pool());
                self.list_pool_snapshots(window, token).instrument(span).await
            }
        }
    }

    async fn lookup_snapshot(
        &self,
        snapshot_id: &str,
    ) -> Result<Paged<SnapshotInfo>, LifecycleError> {
        let entries = match self.get_snapshot(snapshot_id).await {
            Ok(info) => vec![info],
            Err(LifecycleError::NotFound(message)) => {
                debug!(snapshot = snapshot_id, %message, "snapshot lookup found nothing");
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        Ok(Paged {
            entries,
            next_token: None,
        })
    }

    async fn list_volume_snapshots(
        &self,
        owner: &VolumeDesc,
        window: usize,
        token: ListingToken,
    ) -> Result<Paged<SnapshotInfo>, LifecycleError> {
        let listed = listing::list(
            window,
            token,
            |cursor| async move {
                self.appliance
                    .list_volume_snapshots_page(
                        owner.backend_id(),
                        cursor.page(),
                        cursor.disambiguator(),
                    )
                    .await
            },
            |record| record.name.clone(),
        )
        .await;
        let Listing { items, next } = match listed {
            Ok(found) => found,
            Err(err) if err.is(ErrorKind::NotFound) => {
                debug!(volume = %owner, "volume missing, no snapshots to list");
                return Ok(Paged {
                    entries: Vec::new(),
                    next_token: None,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let entries = items
            .iter()
            .filter_map(|record| match SnapshotRole::of(owner, &record.name) {
                SnapshotRole::Public(desc) => Some(snapshot_info(&desc, record)),
                SnapshotRole::Intermediate(_) | SnapshotRole::Concealed | SnapshotRole::Foreign => {
                    None
                }
            })
            .collect();
        Ok(Paged {
            entries,
            next_token: next.map(|cursor| cursor.to_string()),
        })
    }

    async fn list_pool_snapshots(
        &self,
        window: usize,
        token: ListingToken,
    ) -> Result<Paged<SnapshotInfo>, LifecycleError> {
        let Listing { items, next } = listing::list(
            window,
            token,
            |cursor| async move {
                self.appliance
                    .list_snapshots_page(cursor.page(), cursor.disambiguator())
                    .await
            },
            |row| format!("{}@{}", row.volume, row.name),
        )
        .await?;

        let entries = items.iter().filter_map(pool_snapshot_info).collect();
        Ok(Paged {
            entries,
            next_token: next.map(|cursor| cursor.to_string()),
        })
    }

    /// Every snapshot of `volume`, across all pages.
    pub(super) async fn all_volume_snapshots(
        &self,
        volume: &str,
    ) -> Result<Vec<SnapshotRecord>, ResourceError> {
        let listed = listing::list(
            0,
            ListingToken::fresh(),
            |cursor| async move {
                self.appliance
                    .list_volume_snapshots_page(volume, cursor.page(), cursor.disambiguator())
                    .await
            },
            |record| record.name.clone(),
        )
        .await?;
        Ok(listed.items)
    }
}

fn pool_snapshot_info(row: &PoolSnapshotRecord) -> Option<SnapshotInfo> {
    if is_concealed_volume(&row.volume) {
        return None;
    }
    let owner = VolumeDesc::from_backend_id(&row.volume).ok()?;
    let SnapshotRole::Public(desc) = SnapshotRole::of(&owner, &row.name) else {
        return None;
    };
    Some(SnapshotInfo {
        snapshot_id: desc.composite_id(),
        source_volume_id: row.volume.clone(),
        creation_time: row.properties.creation.clone(),
        size_bytes: 0,
        ready_to_use: true,
    })
}

