//! Backend-safe identifiers for volumes and snapshots.
//!
//! Caller-supplied names are arbitrary strings, while appliance dataset names
//! are bounded and restricted to `[A-Za-z0-9._-]`. Names are mapped onto one
//! of three tiers, each marked by a two-letter prefix:
//!
//! | tier     | volume | snapshot | reversible |
//! |----------|--------|----------|------------|
//! | plain    | `vp_`  | `sp_`    | yes        |
//! | base64   | `vb_`  | `sb_`    | yes        |
//! | sha256   | `vs_`  | `ss_`    | no         |
//!
//! Snapshot identifiers are only meaningful next to their owning volume, so
//! the identifier handed to callers joins both: `<volume id>_<snapshot id>`.

use std::fmt;

use base64::Engine as _;
use base64::alphabet::Alphabet;
use base64::engine::{GeneralPurpose, general_purpose};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Longest encoded payload accepted by the plain and base64 tiers. Leaves
/// room for prefixes and separators under the 248-character dataset limit.
pub const MAX_ENCODED_LEN: usize = 240;

/// Prefix of datasets concealed by the substitution-based deletion scheme.
pub const CONCEALED_PREFIX: &str = "c_";

const DATASET_ALPHABET: Alphabet =
    match Alphabet::new("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-.") {
        Ok(alphabet) => alphabet,
        Err(_) => panic!("dataset alphabet must hold 64 unique printable symbols"),
    };

/// Base64 flavour whose output is a valid dataset-name component and never
/// contains `_`.
const DATASET_SAFE: GeneralPurpose = GeneralPurpose::new(&DATASET_ALPHABET, general_purpose::NO_PAD);

/// Encoding tier that produced a backend identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EncodingTag {
    /// The caller name is used verbatim.
    Plain,
    /// The caller name is base64 encoded.
    Base64,
    /// The caller name is hashed; the mapping cannot be reversed.
    Hash,
}

impl EncodingTag {
    const fn marker(self) -> char {
        match self {
            Self::Plain => 'p',
            Self::Base64 => 'b',
            Self::Hash => 's',
        }
    }
}

/// Errors raised while encoding names or parsing identifiers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum IdentError {
    /// Raised when the caller supplies an empty name.
    #[error("{resource} name must not be empty")]
    EmptyName {
        /// Resource kind (`volume` or `snapshot`).
        resource: &'static str,
    },
    /// Raised when an identifier does not carry a known tier prefix.
    #[error("{resource} id '{id}' has an unknown format")]
    UnknownFormat {
        /// Resource kind (`volume` or `snapshot`).
        resource: &'static str,
        /// Offending identifier.
        id: String,
    },
    /// Raised when the base64 payload of an identifier cannot be decoded.
    #[error("{resource} id '{id}' carries an invalid encoding: {message}")]
    InvalidEncoding {
        /// Resource kind (`volume` or `snapshot`).
        resource: &'static str,
        /// Offending identifier.
        id: String,
        /// Decoder error message.
        message: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Scope {
    Volume,
    Snapshot,
}

impl Scope {
    const fn letter(self) -> char {
        match self {
            Self::Volume => 'v',
            Self::Snapshot => 's',
        }
    }

    const fn resource(self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Snapshot => "snapshot",
        }
    }

    // Snapshot payloads must stay free of `_` so composite ids split cleanly.
    fn admits_plain(self, name: &str) -> bool {
        name.len() <= MAX_ENCODED_LEN
            && name.chars().all(|ch| match ch {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' => true,
                '_' => self == Self::Volume,
                _ => false,
            })
    }
}

fn encode(scope: Scope, name: &str) -> Result<(String, EncodingTag), IdentError> {
    if name.is_empty() {
        return Err(IdentError::EmptyName {
            resource: scope.resource(),
        });
    }
    let (tag, payload) = if scope.admits_plain(name) {
        (EncodingTag::Plain, name.to_owned())
    } else {
        let encoded = DATASET_SAFE.encode(name.as_bytes());
        if encoded.len() <= MAX_ENCODED_LEN {
            (EncodingTag::Base64, encoded)
        } else {
            (EncodingTag::Hash, hex::encode(Sha256::digest(name.as_bytes())))
        }
    };
    Ok((format!("{}{}_{payload}", scope.letter(), tag.marker()), tag))
}

fn decode(scope: Scope, id: &str) -> Result<(String, EncodingTag), IdentError> {
    let unknown = || IdentError::UnknownFormat {
        resource: scope.resource(),
        id: id.to_owned(),
    };
    let (prefix, payload) = id.split_once('_').ok_or_else(unknown)?;
    if payload.is_empty() {
        return Err(unknown());
    }
    let mut prefix_chars = prefix.chars();
    if prefix_chars.next() != Some(scope.letter()) {
        return Err(unknown());
    }
    match (prefix_chars.next(), prefix_chars.next()) {
        (Some('p'), None) if scope.admits_plain(payload) => {
            Ok((payload.to_owned(), EncodingTag::Plain))
        }
        (Some('b'), None) => {
            let bytes = DATASET_SAFE
                .decode(payload)
                .map_err(|err| IdentError::InvalidEncoding {
                    resource: scope.resource(),
                    id: id.to_owned(),
                    message: err.to_string(),
                })?;
            let name = String::from_utf8(bytes).map_err(|err| IdentError::InvalidEncoding {
                resource: scope.resource(),
                id: id.to_owned(),
                message: err.to_string(),
            })?;
            Ok((name, EncodingTag::Base64))
        }
        // Legacy identifiers carried only the scope letter before the hash.
        (Some('s'), None) | (None, None) if payload.chars().all(|ch| ch.is_ascii_hexdigit()) => {
            Ok((String::new(), EncodingTag::Hash))
        }
        _ => Err(unknown()),
    }
}

/// Identifies one logical volume.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct VolumeDesc {
    caller_name: String,
    backend_id: String,
    tag: EncodingTag,
}

impl VolumeDesc {
    /// Derives the descriptor for a caller-supplied volume name.
    ///
    /// # Errors
    ///
    /// Returns [`IdentError::EmptyName`] when `name` is empty.
    pub fn from_name(name: &str) -> Result<Self, IdentError> {
        let (backend_id, tag) = encode(Scope::Volume, name)?;
        Ok(Self {
            caller_name: name.to_owned(),
            backend_id,
            tag,
        })
    }

    /// Rebuilds a descriptor from a backend identifier. Hash-tier
    /// identifiers yield an empty caller name.
    ///
    /// # Errors
    ///
    /// Returns [`IdentError`] when `id` is not a volume identifier.
    pub fn from_backend_id(id: &str) -> Result<Self, IdentError> {
        let (caller_name, tag) = decode(Scope::Volume, id)?;
        Ok(Self {
            caller_name,
            backend_id: id.to_owned(),
            tag,
        })
    }

    /// Caller-supplied name; empty when it cannot be recovered.
    #[must_use]
    pub fn caller_name(&self) -> &str {
        &self.caller_name
    }

    /// Backend dataset name of the volume.
    #[must_use]
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Tier that produced [`Self::backend_id`].
    #[must_use]
    pub const fn tag(&self) -> EncodingTag {
        self.tag
    }

    /// Name suitable for messages: the caller name, or the backend id when
    /// the name is opaque.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.caller_name.is_empty() {
            &self.backend_id
        } else {
            &self.caller_name
        }
    }
}

impl fmt::Display for VolumeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.backend_id)
    }
}

/// Identifies a snapshot scoped to its owning volume.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SnapshotDesc {
    owner: VolumeDesc,
    caller_name: String,
    backend_id: String,
    tag: EncodingTag,
}

impl SnapshotDesc {
    /// Derives the descriptor for a caller-supplied snapshot name.
    ///
    /// # Errors
    ///
    /// Returns [`IdentError::EmptyName`] when `name` is empty.
    pub fn from_name(owner: VolumeDesc, name: &str) -> Result<Self, IdentError> {
        let (backend_id, tag) = encode(Scope::Snapshot, name)?;
        Ok(Self {
            owner,
            caller_name: name.to_owned(),
            backend_id,
            tag,
        })
    }

    /// Rebuilds a descriptor from the snapshot's backend name on `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentError`] when `id` is not a snapshot identifier.
    pub fn from_backend_id(owner: VolumeDesc, id: &str) -> Result<Self, IdentError> {
        let (caller_name, tag) = decode(Scope::Snapshot, id)?;
        Ok(Self {
            owner,
            caller_name,
            backend_id: id.to_owned(),
            tag,
        })
    }

    /// Parses the caller-visible `<volume id>_<snapshot id>` form.
    ///
    /// # Errors
    ///
    /// Returns [`IdentError`] when either half fails to parse.
    pub fn from_composite_id(id: &str) -> Result<Self, IdentError> {
        let malformed = || IdentError::UnknownFormat {
            resource: "snapshot",
            id: id.to_owned(),
        };
        let mut parts = id.rsplitn(3, '_');
        let payload = parts.next().ok_or_else(malformed)?;
        let tier = parts.next().ok_or_else(malformed)?;
        let volume = parts.next().ok_or_else(malformed)?;
        let owner = VolumeDesc::from_backend_id(volume)?;
        Self::from_backend_id(owner, &format!("{tier}_{payload}")).map_err(|_| malformed())
    }

    /// Volume that owns the snapshot.
    #[must_use]
    pub const fn owner(&self) -> &VolumeDesc {
        &self.owner
    }

    /// Caller-supplied name; empty when it cannot be recovered.
    #[must_use]
    pub fn caller_name(&self) -> &str {
        &self.caller_name
    }

    /// Backend snapshot name on the owning volume.
    #[must_use]
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Tier that produced [`Self::backend_id`].
    #[must_use]
    pub const fn tag(&self) -> EncodingTag {
        self.tag
    }

    /// Identifier handed to callers.
    #[must_use]
    pub fn composite_id(&self) -> String {
        format!("{}_{}", self.owner.backend_id, self.backend_id)
    }

    /// Name suitable for messages.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.caller_name.is_empty() {
            &self.backend_id
        } else {
            &self.caller_name
        }
    }
}

impl fmt::Display for SnapshotDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.composite_id())
    }
}

/// Role of a snapshot found on a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SnapshotRole {
    /// Caller-created snapshot, visible in listings.
    Public(SnapshotDesc),
    /// Intermediate snapshot backing the clone named by the volume.
    Intermediate(VolumeDesc),
    /// Snapshot concealed by the substitution-based deletion scheme.
    Concealed,
    /// Snapshot created outside this plugin.
    Foreign,
}

impl SnapshotRole {
    /// Classifies the snapshot `name` found on `owner`.
    #[must_use]
    pub fn of(owner: &VolumeDesc, name: &str) -> Self {
        if name.starts_with(CONCEALED_PREFIX) {
            return Self::Concealed;
        }
        if let Ok(snapshot) = SnapshotDesc::from_backend_id(owner.clone(), name) {
            return Self::Public(snapshot);
        }
        VolumeDesc::from_backend_id(name).map_or(Self::Foreign, Self::Intermediate)
    }

    /// Returns `true` for snapshots that must never be shown to callers and
    /// that this plugin may garbage collect.
    #[must_use]
    pub const fn is_concealed(&self) -> bool {
        matches!(self, Self::Intermediate(_) | Self::Concealed)
    }
}

/// Returns `true` when the snapshot `name` is hidden from callers and owned
/// by the garbage collector, whatever volume carries it.
#[must_use]
pub fn is_concealed_snapshot(name: &str) -> bool {
    name.starts_with(CONCEALED_PREFIX)
        || (decode(Scope::Snapshot, name).is_err() && decode(Scope::Volume, name).is_ok())
}

/// Returns `true` when `name` is a volume concealed by the substitution-based
/// deletion scheme.
#[must_use]
pub fn is_concealed_volume(name: &str) -> bool {
    name.starts_with(CONCEALED_PREFIX)
}
