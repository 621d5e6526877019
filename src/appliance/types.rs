//! Wire payloads exchanged with the appliance REST API.
//!
//! Responses arrive wrapped in a `{"data": …, "error": …}` envelope and
//! listing endpoints nest their rows inside `{"results": n, "entries": […]}`.
//! Numeric properties are usually rendered as decimal strings, so size
//! fields accept both strings and numbers.

use serde::{Deserialize, Deserializer, Serialize};

/// Success envelope around every response body.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub(crate) data: Option<T>,
}

/// Listing wrapper returned by paged endpoints.
#[derive(Debug, Deserialize)]
pub struct Entries<T> {
    /// Total number of rows the appliance reports for the page.
    #[serde(default)]
    pub results: Option<u64>,
    /// Rows on the requested page.
    #[serde(default = "Vec::new")]
    pub entries: Vec<T>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeRepr {
    Number(u64),
    Text(String),
}

fn size_field<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let repr = Option::<SizeRepr>::deserialize(deserializer)?;
    match repr {
        None => Ok(0),
        Some(SizeRepr::Number(value)) => Ok(value),
        Some(SizeRepr::Text(text)) if text.trim().is_empty() => Ok(0),
        Some(SizeRepr::Text(text)) => text
            .trim()
            .parse::<u64>()
            .map_err(|err| serde::de::Error::custom(format!("invalid size '{text}': {err}"))),
    }
}

/// Dataset a clone was created from, parsed from `pool/volume@snapshot`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Origin {
    /// Backend name of the source volume.
    pub volume: String,
    /// Backend name of the source snapshot.
    pub snapshot: String,
}

impl Origin {
    /// Parses an origin property, tolerating a missing pool prefix.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "-" {
            return None;
        }
        let dataset = trimmed
            .split_once('/')
            .map_or(trimmed, |(_, rest)| rest);
        let (volume, snapshot) = dataset.split_once('@')?;
        if volume.is_empty() || snapshot.is_empty() {
            return None;
        }
        Some(Self {
            volume: volume.to_owned(),
            snapshot: snapshot.to_owned(),
        })
    }
}

/// A volume as reported by `GET pools/{pool}/volumes[/{name}]` or its
/// `nas-volumes` counterpart.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct VolumeRecord {
    /// Backend name of the volume.
    pub name: String,
    /// Logical size in bytes; the quota for NAS volumes.
    #[serde(default, alias = "quota", deserialize_with = "size_field")]
    pub volsize: u64,
    /// Raw `origin` property; empty or `-` for volumes that are not clones.
    #[serde(default)]
    pub origin: Option<String>,
}

impl VolumeRecord {
    /// Parsed origin of a cloned volume.
    #[must_use]
    pub fn origin(&self) -> Option<Origin> {
        self.origin.as_deref().and_then(Origin::parse)
    }
}

/// A snapshot as reported by the per-volume snapshot endpoints.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SnapshotRecord {
    /// Backend name of the snapshot, without the `volume@` prefix.
    pub name: String,
    /// Creation timestamp as rendered by the appliance.
    #[serde(default)]
    pub creation: Option<String>,
    /// Size of the snapshotted volume in bytes; NAS snapshots report none.
    #[serde(default, deserialize_with = "size_field")]
    pub volsize: u64,
    /// Comma separated `pool/volume` list of clones.
    #[serde(default)]
    pub clones: Option<String>,
}

impl SnapshotRecord {
    /// Backend names of the volumes cloned from this snapshot.
    #[must_use]
    pub fn clone_names(&self) -> Vec<String> {
        self.clones
            .as_deref()
            .map(split_clone_list)
            .unwrap_or_default()
    }
}

fn split_clone_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .rsplit_once('/')
                .map_or(entry, |(_, name)| name)
                .to_owned()
        })
        .collect()
}

/// Properties carried by pool-wide snapshot rows.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SnapshotProperties {
    /// Creation time in Unix seconds, rendered as a string.
    #[serde(default)]
    pub creation: Option<String>,
}

/// A row from the pool-wide `GET pools/{pool}/volumes/snapshots` listing.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PoolSnapshotRecord {
    /// Backend name of the volume owning the snapshot.
    pub volume: String,
    /// Backend name of the snapshot.
    pub name: String,
    /// Additional snapshot properties.
    #[serde(default)]
    pub properties: SnapshotProperties,
}

/// Pool summary from `GET pools/{pool}`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PoolRecord {
    /// Pool name.
    #[serde(default)]
    pub name: String,
    /// Free bytes available for new datasets.
    #[serde(default, deserialize_with = "size_field")]
    pub available: u64,
}

/// Body for `POST pools/{pool}/volumes`.
#[derive(Debug, Serialize)]
pub(crate) struct CreateVolumeBody<'a> {
    pub(crate) name: &'a str,
    pub(crate) size: String,
}

/// Body for `DELETE pools/{pool}/volumes/{volume}`.
#[derive(Debug, Serialize)]
pub(crate) struct DeleteVolumeBody {
    pub(crate) recursively_children: bool,
    pub(crate) force_umount: bool,
}

/// Body for `POST pools/{pool}/volumes/{volume}/snapshots`.
#[derive(Debug, Serialize)]
pub(crate) struct CreateSnapshotBody<'a> {
    pub(crate) snapshot_name: &'a str,
}

/// Body for `POST pools/{pool}/volumes/{volume}/clone`.
#[derive(Debug, Serialize)]
pub(crate) struct CreateCloneBody<'a> {
    pub(crate) name: &'a str,
    pub(crate) snapshot: &'a str,
}

/// Body for `POST pools/{pool}/nas-volumes`.
#[derive(Debug, Serialize)]
pub(crate) struct CreateNasVolumeBody<'a> {
    pub(crate) name: &'a str,
    pub(crate) quota: String,
    pub(crate) reservation: String,
}

/// Body for `POST pools/{pool}/nas-volumes/{volume}/snapshots`.
#[derive(Debug, Serialize)]
pub(crate) struct CreateNasSnapshotBody<'a> {
    pub(crate) name: &'a str,
}

/// Body for `POST pools/{pool}/nas-volumes/{volume}/snapshots/{snapshot}/clones`.
#[derive(Debug, Serialize)]
pub(crate) struct CreateNasCloneBody<'a> {
    pub(crate) name: &'a str,
}

/// Body for `POST shares`.
#[derive(Debug, Serialize)]
pub(crate) struct CreateShareBody<'a> {
    pub(crate) name: &'a str,
    pub(crate) path: String,
    pub(crate) active: bool,
    pub(crate) nfs: ShareNfsBody,
}

/// NFS settings of a new share.
#[derive(Debug, Serialize)]
pub(crate) struct ShareNfsBody {
    pub(crate) enabled: bool,
    pub(crate) all_squash: bool,
}
