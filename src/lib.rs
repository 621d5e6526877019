//! Volume and snapshot lifecycle core for ZFS storage appliances.
//!
//! The crate drives a JovianDSS-style appliance through its REST management
//! API. It maps caller names onto dataset-safe identifiers, classifies the
//! appliance's free-form error prose, stitches its unstable page listings
//! into resumable windows, and builds volume copies out of clones of hidden
//! intermediate snapshots that are garbage collected once unused.

pub mod appliance;
pub mod config;
pub mod guard;
pub mod ident;
pub mod lifecycle;
pub mod listing;
pub mod logging;
pub mod test_support;

pub use appliance::{Appliance, ErrorKind, HttpTransport, ResourceError, Transport, VolumeKind};
pub use config::{ApplianceConfig, ConfigError};
pub use guard::{GuardError, LockGuard, LockTable};
pub use ident::{SnapshotDesc, SnapshotRole, VolumeDesc};
pub use lifecycle::{
    Capacity, CapacityRange, Code, ContentSource, CreateVolumeRequest, LifecycleError,
    LifecycleManager, LifecycleSettings, ListSnapshotsRequest, Paged, SnapshotInfo, VolumeInfo,
};
pub use listing::{Listing, ListingToken, TokenError};
pub use logging::LogFormat;
