//! Typed client for the appliance volume, snapshot and share endpoints.
//!
//! Every call goes through [`Transport`] exactly once and its answer is run
//! through [`classify`] exactly once, so callers only ever see
//! [`ResourceError`] values with a stable [`ErrorKind`].
//!
//! Block volumes live under `pools/{pool}/volumes`, file volumes under
//! `pools/{pool}/nas-volumes`; the client picks the collection from its
//! [`VolumeKind`].

pub mod classify;
pub mod error;
pub mod transport;
pub mod types;

use std::str::FromStr;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

pub use classify::{ErrorBody, classify, classify_body};
pub use error::{ErrorKind, ResourceError};
pub use transport::{ApiRequest, HttpTransport, Method, RawResponse, Transport, TransportError};
pub use types::{
    Entries, Origin, PoolRecord, PoolSnapshotRecord, SnapshotProperties, SnapshotRecord,
    VolumeRecord,
};

use types::{
    CreateCloneBody, CreateNasCloneBody, CreateNasSnapshotBody, CreateNasVolumeBody,
    CreateShareBody, CreateSnapshotBody, CreateVolumeBody, DeleteVolumeBody, Envelope,
    ShareNfsBody,
};

const API_ROOT: &str = "api/v3/pools";
const SHARES_ROOT: &str = "api/v3/shares";

/// Kind of dataset backing the volumes the plugin provisions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum VolumeKind {
    /// Zvols exported as iSCSI block devices.
    #[default]
    Block,
    /// NAS volumes exported through NFS shares.
    File,
}

impl VolumeKind {
    /// Pool collection holding datasets of this kind.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Block => "volumes",
            Self::File => "nas-volumes",
        }
    }
}

/// Raised when a volume kind name is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown volume kind '{0}', expected 'block' or 'file'")]
pub struct UnknownVolumeKind(pub String);

impl FromStr for VolumeKind {
    type Err = UnknownVolumeKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "block" | "zvol" | "iscsi" => Ok(Self::Block),
            "file" | "nas" | "nfs" => Ok(Self::File),
            other => Err(UnknownVolumeKind(other.to_owned())),
        }
    }
}

/// REST client bound to a single storage pool.
#[derive(Debug)]
pub struct Appliance<T> {
    transport: T,
    pool: String,
    kind: VolumeKind,
}

impl<T: Transport> Appliance<T> {
    /// Creates a client for block volumes in `pool` on top of `transport`.
    #[must_use]
    pub fn new(transport: T, pool: impl Into<String>) -> Self {
        Self {
            transport,
            pool: pool.into(),
            kind: VolumeKind::Block,
        }
    }

    /// Switches the client to volumes of `kind`.
    #[must_use]
    pub fn with_kind(mut self, kind: VolumeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Kind of volume the client manages.
    #[must_use]
    pub const fn kind(&self) -> VolumeKind {
        self.kind
    }

    /// Pool every request is scoped to.
    #[must_use]
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    fn volumes_path(&self) -> String {
        format!("{API_ROOT}/{}/{}", self.pool, self.kind.collection())
    }

    fn volume_path(&self, volume: &str) -> String {
        format!("{}/{volume}", self.volumes_path())
    }

    fn snapshots_path(&self, volume: &str) -> String {
        format!("{}/snapshots", self.volume_path(volume))
    }

    async fn call(&self, request: ApiRequest, success: &[u16]) -> Result<RawResponse, ResourceError> {
        debug!(method = %request.method, path = %request.path, "appliance request");
        let response = self.transport.send(&request).await?;
        classify(success, &response)?;
        Ok(response)
    }

    fn decode<D: DeserializeOwned>(response: &RawResponse) -> Result<D, ResourceError> {
        let envelope: Envelope<D> = serde_json::from_slice(&response.body).map_err(|err| {
            ResourceError::malformed_response(format!("unable to decode response body: {err}"))
        })?;
        envelope
            .data
            .ok_or_else(|| ResourceError::malformed_response("response carries no data"))
    }

    fn body<B: Serialize>(path: &str, body: &B) -> Result<serde_json::Value, ResourceError> {
        serde_json::to_value(body).map_err(|err| {
            ResourceError::new(
                ErrorKind::RequestMalformed,
                format!("unable to encode body for {path}: {err}"),
            )
        })
    }

    /// Fetches one volume.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotFound`] when the volume does not exist, or any
    /// other classified failure.
    pub async fn get_volume(&self, volume: &str) -> Result<VolumeRecord, ResourceError> {
        let request = ApiRequest::new(Method::Get, self.volume_path(volume));
        let response = self.call(request, &[200]).await?;
        Self::decode(&response)
    }

    /// Creates a zvol of `size` bytes, or a NAS volume with a `size` byte
    /// quota and reservation.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadyExists`] when the name is taken, or any
    /// other classified failure.
    pub async fn create_volume(&self, volume: &str, size: u64) -> Result<(), ResourceError> {
        let path = self.volumes_path();
        let (body, success): (_, &[u16]) = match self.kind {
            VolumeKind::Block => (
                Self::body(
                    &path,
                    &CreateVolumeBody {
                        name: volume,
                        size: size.to_string(),
                    },
                )?,
                &[201],
            ),
            VolumeKind::File => (
                Self::body(
                    &path,
                    &CreateNasVolumeBody {
                        name: volume,
                        quota: size.to_string(),
                        reservation: size.to_string(),
                    },
                )?,
                &[200, 201],
            ),
        };
        let request = ApiRequest::new(Method::Post, path).with_body(body);
        self.call(request, success).await.map(drop)
    }

    /// Destroys a volume. Snapshots are not removed recursively; a volume
    /// that still has them fails with [`ErrorKind::BusyHasSnapshots`].
    ///
    /// # Errors
    ///
    /// Returns the classified failure reported by the appliance.
    pub async fn delete_volume(&self, volume: &str) -> Result<(), ResourceError> {
        let path = self.volume_path(volume);
        let body = Self::body(
            &path,
            &DeleteVolumeBody {
                recursively_children: false,
                force_umount: false,
            },
        )?;
        let request = ApiRequest::new(Method::Delete, path).with_body(body);
        self.call(request, &[204]).await.map(drop)
    }

    /// Fetches one page of the pool's volumes.
    ///
    /// # Errors
    ///
    /// Returns the classified failure reported by the appliance.
    pub async fn list_volumes_page(
        &self,
        page: i64,
        disambiguator: i64,
    ) -> Result<Vec<VolumeRecord>, ResourceError> {
        let path = format!("{}?page={page}&_dc={disambiguator}", self.volumes_path());
        let response = self.call(ApiRequest::new(Method::Get, path), &[200]).await?;
        let entries: Entries<VolumeRecord> = Self::decode(&response)?;
        Ok(entries.entries)
    }

    /// Snapshots `volume` under `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadyExists`] when the snapshot name is taken,
    /// [`ErrorKind::NotFound`] when the volume is missing, or any other
    /// classified failure.
    pub async fn create_snapshot(&self, volume: &str, snapshot: &str) -> Result<(), ResourceError> {
        let path = self.snapshots_path(volume);
        let body = match self.kind {
            VolumeKind::Block => Self::body(
                &path,
                &CreateSnapshotBody {
                    snapshot_name: snapshot,
                },
            )?,
            VolumeKind::File => Self::body(&path, &CreateNasSnapshotBody { name: snapshot })?,
        };
        let request = ApiRequest::new(Method::Post, path).with_body(body);
        self.call(request, &[200, 201]).await.map(drop)
    }

    /// Fetches one snapshot, including its clone list.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotFound`] when either dataset is missing, or any
    /// other classified failure.
    pub async fn get_snapshot(
        &self,
        volume: &str,
        snapshot: &str,
    ) -> Result<SnapshotRecord, ResourceError> {
        let path = format!("{}/{snapshot}", self.snapshots_path(volume));
        let response = self.call(ApiRequest::new(Method::Get, path), &[200]).await?;
        Self::decode(&response)
    }

    /// Destroys one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::BusyHasClones`] while clones depend on it, or any
    /// other classified failure.
    pub async fn delete_snapshot(&self, volume: &str, snapshot: &str) -> Result<(), ResourceError> {
        let path = format!("{}/{snapshot}", self.snapshots_path(volume));
        let body = Self::body(
            &path,
            &DeleteVolumeBody {
                recursively_children: false,
                force_umount: false,
            },
        )?;
        let request = ApiRequest::new(Method::Delete, path).with_body(body);
        self.call(request, &[204]).await.map(drop)
    }

    /// Fetches one page of a volume's snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotFound`] when the volume is missing, or any
    /// other classified failure.
    pub async fn list_volume_snapshots_page(
        &self,
        volume: &str,
        page: i64,
        disambiguator: i64,
    ) -> Result<Vec<SnapshotRecord>, ResourceError> {
        let path = format!(
            "{}?page={page}&_dc={disambiguator}",
            self.snapshots_path(volume)
        );
        let response = self.call(ApiRequest::new(Method::Get, path), &[200]).await?;
        let entries: Entries<SnapshotRecord> = Self::decode(&response)?;
        Ok(entries.entries)
    }

    /// Fetches one page of every snapshot in the pool.
    ///
    /// # Errors
    ///
    /// Returns the classified failure reported by the appliance.
    pub async fn list_snapshots_page(
        &self,
        page: i64,
        disambiguator: i64,
    ) -> Result<Vec<PoolSnapshotRecord>, ResourceError> {
        let path = format!(
            "{}/snapshots?page={page}&_dc={disambiguator}",
            self.volumes_path()
        );
        let response = self.call(ApiRequest::new(Method::Get, path), &[200]).await?;
        let entries: Entries<PoolSnapshotRecord> = Self::decode(&response)?;
        Ok(entries.entries)
    }

    /// Clones `volume@snapshot` into a new volume named `clone`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadyExists`] when `clone` is taken,
    /// [`ErrorKind::NotFound`] when the origin is missing, or any other
    /// classified failure.
    pub async fn create_clone(
        &self,
        volume: &str,
        snapshot: &str,
        clone: &str,
    ) -> Result<(), ResourceError> {
        let (path, body) = match self.kind {
            VolumeKind::Block => {
                let path = format!("{}/clone", self.volume_path(volume));
                let body = Self::body(
                    &path,
                    &CreateCloneBody {
                        name: clone,
                        snapshot,
                    },
                )?;
                (path, body)
            }
            VolumeKind::File => {
                let path = format!("{}/{snapshot}/clones", self.snapshots_path(volume));
                let body = Self::body(&path, &CreateNasCloneBody { name: clone })?;
                (path, body)
            }
        };
        let request = ApiRequest::new(Method::Post, path).with_body(body);
        self.call(request, &[200, 201]).await.map(drop)
    }

    /// Exports the NAS volume `volume` as an active NFS share of the same
    /// name.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadyExists`] when the share exists,
    /// [`ErrorKind::NotFound`] when the volume is missing, or any other
    /// classified failure.
    pub async fn create_share(&self, volume: &str) -> Result<(), ResourceError> {
        let body = Self::body(
            SHARES_ROOT,
            &CreateShareBody {
                name: volume,
                path: format!("{}/{volume}/{volume}", self.pool),
                active: true,
                nfs: ShareNfsBody {
                    enabled: true,
                    all_squash: true,
                },
            },
        )?;
        let request = ApiRequest::new(Method::Post, SHARES_ROOT).with_body(body);
        self.call(request, &[200, 201]).await.map(drop)
    }

    /// Removes the NFS share named after `volume`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotFound`] when no such share exists, or any
    /// other classified failure.
    pub async fn delete_share(&self, volume: &str) -> Result<(), ResourceError> {
        let request = ApiRequest::new(Method::Delete, format!("{SHARES_ROOT}/{volume}"));
        self.call(request, &[200, 204]).await.map(drop)
    }

    /// Fetches the pool summary.
    ///
    /// # Errors
    ///
    /// Returns the classified failure reported by the appliance.
    pub async fn get_pool(&self) -> Result<PoolRecord, ResourceError> {
        let path = format!("{API_ROOT}/{}", self.pool);
        let response = self.call(ApiRequest::new(Method::Get, path), &[200]).await?;
        Self::decode(&response)
    }
}
