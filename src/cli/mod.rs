//! Command-line interface definitions for the `joviandss-csi` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `joviandss-csi` binary.
#[derive(Debug, Parser)]
#[command(
    name = "joviandss-csi",
    about = "Manage volumes and snapshots on a JovianDSS storage appliance",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create a volume, optionally copied from a snapshot or another volume.
    #[command(name = "create-volume")]
    CreateVolume(CreateVolumeCommand),
    /// Delete a volume and collect the intermediate snapshots it leaves behind.
    #[command(name = "delete-volume")]
    DeleteVolume(VolumeIdArg),
    /// Snapshot a volume.
    #[command(name = "create-snapshot")]
    CreateSnapshot(CreateSnapshotCommand),
    /// Delete a snapshot.
    #[command(name = "delete-snapshot")]
    DeleteSnapshot(SnapshotIdArg),
    /// List volumes one window at a time.
    #[command(name = "list-volumes")]
    ListVolumes(WindowArgs),
    /// List snapshots of the pool, of one volume, or a single snapshot.
    #[command(name = "list-snapshots")]
    ListSnapshots(ListSnapshotsCommand),
    /// Report free pool space and the minimum volume size.
    #[command(name = "capacity")]
    Capacity,
    /// Print the publish context of a volume.
    #[command(name = "publish")]
    Publish(PublishCommand),
}

/// Arguments for `joviandss-csi create-volume`.
#[derive(Debug, Args)]
pub(crate) struct CreateVolumeCommand {
    /// Caller-chosen volume name; any string is accepted.
    pub(crate) name: String,
    /// Minimum size in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    pub(crate) size: u64,
    /// Maximum size in bytes; 0 leaves the size unbounded.
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    pub(crate) limit: u64,
    /// Populate the volume from this snapshot id.
    #[arg(long, value_name = "SNAPSHOT_ID", conflicts_with = "from_volume")]
    pub(crate) from_snapshot: Option<String>,
    /// Populate the volume as a copy of this volume id.
    #[arg(long, value_name = "VOLUME_ID", conflicts_with = "from_snapshot")]
    pub(crate) from_volume: Option<String>,
}

/// A volume identifier as returned by `create-volume`.
#[derive(Debug, Args)]
pub(crate) struct VolumeIdArg {
    /// Volume id.
    pub(crate) volume_id: String,
}

/// A snapshot identifier as returned by `create-snapshot`.
#[derive(Debug, Args)]
pub(crate) struct SnapshotIdArg {
    /// Snapshot id.
    pub(crate) snapshot_id: String,
}

/// Arguments for `joviandss-csi create-snapshot`.
#[derive(Debug, Args)]
pub(crate) struct CreateSnapshotCommand {
    /// Id of the volume to snapshot.
    pub(crate) volume_id: String,
    /// Caller-chosen snapshot name.
    pub(crate) name: String,
}

/// Listing window shared by the list subcommands.
#[derive(Debug, Args)]
pub(crate) struct WindowArgs {
    /// Largest number of entries to return; 0 returns everything.
    #[arg(long, value_name = "COUNT", default_value_t = 0, allow_negative_numbers = true)]
    pub(crate) max_entries: i64,
    /// Token printed by a previous call, to resume the listing.
    #[arg(long, value_name = "TOKEN", default_value = "")]
    pub(crate) starting_token: String,
}

/// Arguments for `joviandss-csi list-snapshots`.
#[derive(Debug, Args)]
pub(crate) struct ListSnapshotsCommand {
    /// Listing window.
    #[command(flatten)]
    pub(crate) window: WindowArgs,
    /// Only list snapshots of this volume id.
    #[arg(long, value_name = "VOLUME_ID")]
    pub(crate) volume: Option<String>,
    /// Only look up this snapshot id.
    #[arg(long, value_name = "SNAPSHOT_ID")]
    pub(crate) snapshot: Option<String>,
}

/// Arguments for `joviandss-csi publish`.
#[derive(Debug, Args)]
pub(crate) struct PublishCommand {
    /// Volume id.
    pub(crate) volume_id: String,
    /// Export the volume read-only.
    #[arg(long)]
    pub(crate) read_only: bool,
}
