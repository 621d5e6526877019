//! Binary entry point for the `joviandss-csi` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;

use jovian_csi::appliance::TransportError;
use jovian_csi::{
    ApplianceConfig, CapacityRange, ConfigError, ContentSource, CreateVolumeRequest,
    LifecycleError, LifecycleManager, ListSnapshotsRequest, LogFormat, Transport, logging,
};

mod cli;

use cli::{Cli, CreateVolumeCommand, ListSnapshotsCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("{}: {}", .0.code(), .0.message())]
    Lifecycle(#[from] LifecycleError),
    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = ApplianceConfig::load_without_cli_args()?;
    config.validate()?;
    let format: LogFormat = config
        .log_format
        .parse()
        .map_err(|err: logging::UnknownLogFormat| ConfigError::Invalid(err.to_string()))?;
    logging::init(&config.log_level, format);

    let manager = LifecycleManager::from_config(&config, config.volume_kind()?)?;
    let output = dispatch(&manager, cli).await?;
    write_output(io::stdout(), &output)
}

async fn dispatch<T: Transport>(
    manager: &LifecycleManager<T>,
    cli: Cli,
) -> Result<serde_json::Value, CliError> {
    let output = match cli {
        Cli::CreateVolume(command) => {
            to_json(&manager.create_volume(&create_request(command)).await?)?
        }
        Cli::DeleteVolume(arg) => {
            manager.delete_volume(&arg.volume_id).await?;
            serde_json::json!({ "deleted": arg.volume_id })
        }
        Cli::CreateSnapshot(command) => to_json(
            &manager
                .create_snapshot(&command.volume_id, &command.name)
                .await?,
        )?,
        Cli::DeleteSnapshot(arg) => {
            manager.delete_snapshot(&arg.snapshot_id).await?;
            serde_json::json!({ "deleted": arg.snapshot_id })
        }
        Cli::ListVolumes(window) => to_json(
            &manager
                .list_volumes(window.max_entries, &window.starting_token)
                .await?,
        )?,
        Cli::ListSnapshots(command) => {
            to_json(&manager.list_snapshots(&snapshots_request(command)).await?)?
        }
        Cli::Capacity => to_json(&manager.get_capacity().await?)?,
        Cli::Publish(command) => to_json(
            &manager
                .publish_volume(&command.volume_id, command.read_only)
                .await?,
        )?,
    };
    Ok(output)
}

fn create_request(command: CreateVolumeCommand) -> CreateVolumeRequest {
    let source = match (command.from_snapshot, command.from_volume) {
        (Some(snapshot), _) => Some(ContentSource::Snapshot(snapshot)),
        (None, Some(volume)) => Some(ContentSource::Volume(volume)),
        (None, None) => None,
    };
    CreateVolumeRequest {
        name: command.name,
        capacity: CapacityRange {
            required_bytes: command.size,
            limit_bytes: command.limit,
        },
        source,
    }
}

fn snapshots_request(command: ListSnapshotsCommand) -> ListSnapshotsRequest {
    ListSnapshotsRequest {
        max_entries: command.window.max_entries,
        starting_token: command.window.starting_token,
        source_volume_id: command.volume,
        snapshot_id: command.snapshot,
    }
}

fn to_json(value: &impl Serialize) -> Result<serde_json::Value, CliError> {
    Ok(serde_json::to_value(value)?)
}

fn write_output(mut target: impl Write, output: &serde_json::Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(output)?;
    writeln!(target, "{rendered}").ok();
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
