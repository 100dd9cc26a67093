//! Command-line interface definitions for the `volctl` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI for the `volctl` binary.
#[derive(Debug, Parser)]
#[command(
    name = "volctl",
    about = "Create, attach, and mount block storage volumes on any supported backend",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Storage driver to use instead of the configured default.
    #[arg(long, global = true, value_name = "NAME")]
    pub(crate) driver: Option<String>,
    /// Enable debug logging on stderr.
    #[arg(long, global = true)]
    pub(crate) debug: bool,
    /// Rendering of volumes, attachments, and mappings on stdout.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub(crate) format: OutputFormat,
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Structured output encodings.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Pretty-printed JSON.
    #[default]
    Json,
    /// YAML documents.
    Yaml,
}

/// Command groups.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Manage volumes and their mounts on this host; lists volumes when no
    /// subcommand is given.
    Volume(VolumeArgs),
}

/// Arguments for `volctl volume`.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
pub(crate) struct VolumeArgs {
    #[command(subcommand)]
    pub(crate) command: Option<VolumeCommand>,
    #[command(flatten)]
    pub(crate) selection: VolumeSelection,
}

/// Subcommands of `volctl volume`.
#[derive(Debug, Subcommand)]
pub(crate) enum VolumeCommand {
    /// List volumes mapped to block devices on this host.
    Map,
    /// List volumes, optionally filtered by name or id.
    #[command(visible_aliases = ["ls", "list"])]
    Get(VolumeSelection),
    /// Create a volume, restore one from a snapshot, or re-fetch one by id.
    #[command(visible_alias = "new")]
    Create(CreateArgs),
    /// Remove a volume.
    #[command(visible_alias = "rm")]
    Remove(RemoveArgs),
    /// Attach a volume to an instance (this host by default).
    Attach(AttachmentArgs),
    /// Detach a volume from an instance (this host by default).
    Detach(AttachmentArgs),
    /// Format if needed and mount a locally attached volume.
    Mount(MountArgs),
    /// Unmount a volume from this host.
    Unmount(VolumeSelection),
    /// Print the mount point of a volume, or nothing when unmounted.
    Path(VolumeSelection),
}

/// Volume identity flags shared by several subcommands.
#[derive(Debug, Args)]
pub(crate) struct VolumeSelection {
    /// Volume name.
    #[arg(long = "volumename", value_name = "NAME", default_value = "")]
    pub(crate) name: String,
    /// Volume identifier; takes precedence over the name.
    #[arg(long = "volumeid", value_name = "ID", default_value = "")]
    pub(crate) id: String,
}

/// Arguments for `volctl volume create`.
#[derive(Debug, Args)]
pub(crate) struct CreateArgs {
    #[command(flatten)]
    pub(crate) volume: VolumeSelection,
    /// Snapshot to restore from.
    #[arg(long = "snapshotid", value_name = "ID")]
    pub(crate) snapshot_id: Option<String>,
    /// Backend-specific volume type.
    #[arg(long = "volumetype", value_name = "TYPE")]
    pub(crate) volume_type: Option<String>,
    /// Provisioned IOPS, where the backend supports them.
    #[arg(long, value_name = "IOPS")]
    pub(crate) iops: Option<u64>,
    /// Size in GiB.
    #[arg(long, value_name = "GIB")]
    pub(crate) size: Option<u64>,
    /// Availability zone, where the backend supports them.
    #[arg(long = "availabilityzone", value_name = "ZONE")]
    pub(crate) availability_zone: Option<String>,
    /// Return an operation id instead of waiting for completion.
    #[arg(long = "runasync")]
    pub(crate) run_async: bool,
}

/// Arguments for `volctl volume remove`.
#[derive(Debug, Args)]
pub(crate) struct RemoveArgs {
    /// Volume identifier.
    #[arg(long = "volumeid", value_name = "ID", required = true)]
    pub(crate) id: String,
}

/// Arguments for `volctl volume attach` and `volctl volume detach`.
#[derive(Debug, Args)]
pub(crate) struct AttachmentArgs {
    /// Volume identifier.
    #[arg(long = "volumeid", value_name = "ID", required = true)]
    pub(crate) id: String,
    /// Target instance; this host when omitted.
    #[arg(long = "instanceid", value_name = "ID", default_value = "")]
    pub(crate) instance_id: String,
    /// Return an operation id instead of waiting for completion.
    #[arg(long = "runasync")]
    pub(crate) run_async: bool,
    /// Take the volume from another instance, or force the detach.
    #[arg(long)]
    pub(crate) force: bool,
}

/// Arguments for `volctl volume mount`.
#[derive(Debug, Args)]
pub(crate) struct MountArgs {
    #[command(flatten)]
    pub(crate) volume: VolumeSelection,
    /// Reformat the device even when it already holds a filesystem.
    #[arg(long = "overwritefs")]
    pub(crate) overwrite_fs: bool,
    /// Filesystem for blank volumes.
    #[arg(long = "fstype", value_name = "FS")]
    pub(crate) fs_type: Option<String>,
    /// Pass the force flag to mkfs when formatting.
    #[arg(long)]
    pub(crate) force: bool,
}
