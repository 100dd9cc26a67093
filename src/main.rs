//! Binary entry point for the `volctl` CLI.

mod cli;

use std::fmt;
use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{
    AttachmentArgs, Cli, Command, CreateArgs, MountArgs, OutputFormat, VolumeArgs, VolumeCommand,
    VolumeSelection,
};
use volctl::{
    AttachmentRequest, ConfigError, CreateVolumeRequest, DriverRegistry, HostMountTable,
    MountRequest, ScalewayDriverConfig, Storage, StorageError, Tracked, VolctlConfig,
    VolumeManager,
};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Usage(&'static str),
    #[error("failed to write output: {0}")]
    Output(String),
}

impl From<io::Error> for CliError {
    fn from(value: io::Error) -> Self {
        Self::Output(value.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Output(value.to_string())
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Output(value.to_string())
    }
}

/// Loaded configuration plus the storage façade selected for this run.
struct Context {
    config: VolctlConfig,
    storage: Arc<Storage>,
}

impl Context {
    fn load(driver: Option<&str>) -> Result<Self, CliError> {
        let config = VolctlConfig::load_without_cli_args()?;
        let scaleway = ScalewayDriverConfig::load_without_cli_args()?;
        let registry = DriverRegistry::install(DriverRegistry::from_config(&config, &scaleway)?)?;
        let storage = match driver {
            Some(name) => registry.select(name)?,
            None => registry.default_storage()?,
        };
        Ok(Self { config, storage })
    }

    fn manager(&self) -> VolumeManager {
        VolumeManager::new(
            Arc::clone(&self.storage),
            Arc::new(HostMountTable::new(self.config.mounts_file.trim())),
            self.config.mount_root_path(),
        )
        .default_fs_type(self.config.default_fs_type.clone())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let Command::Volume(volume) = cli.command;
    let command = volume_command(volume);
    if let VolumeCommand::Create(args) = &command {
        check_create_source(args)?;
    }

    let context = Context::load(cli.driver.as_deref())?;
    let mut stdout = io::stdout().lock();
    let mut printer = Printer::new(&mut stdout, cli.format);
    run_volume_command(&context, command, &mut printer).await
}

/// `volctl volume` without a subcommand lists volumes.
fn volume_command(args: VolumeArgs) -> VolumeCommand {
    args.command.unwrap_or(VolumeCommand::Get(args.selection))
}

async fn run_volume_command<W: Write>(
    context: &Context,
    command: VolumeCommand,
    printer: &mut Printer<'_, W>,
) -> Result<(), CliError> {
    let storage = &context.storage;
    match command {
        VolumeCommand::Map => printer.list(&storage.list_volume_mappings().await?),
        VolumeCommand::Get(selection) => {
            printer.list(&storage.list_volumes(&selection.id, &selection.name).await?)
        }
        VolumeCommand::Create(args) => {
            let created = storage.create_volume(&create_request(args)).await?;
            printer.value(&created)
        }
        VolumeCommand::Remove(args) => Ok(storage.remove_volume(&args.id).await?),
        VolumeCommand::Attach(args) => {
            let attached = storage.attach_volume(&attachment_request(args)).await?;
            printer.value(&attached)
        }
        VolumeCommand::Detach(args) => {
            let detached = storage.detach_volume(&attachment_request(args)).await?;
            printer.pending(&detached)
        }
        VolumeCommand::Mount(args) => {
            let mount_point = context.manager().mount_volume(&mount_request(args)).await?;
            printer.line(&mount_point)
        }
        VolumeCommand::Unmount(VolumeSelection { name, id }) => {
            Ok(context.manager().unmount_volume(&name, &id).await?)
        }
        VolumeCommand::Path(VolumeSelection { name, id }) => {
            if let Some(mount_point) = context.manager().path_of_volume(&name, &id).await? {
                printer.line(&mount_point)?;
            }
            Ok(())
        }
    }
}

/// Rejects a create that names no source before any configuration is read.
fn check_create_source(args: &CreateArgs) -> Result<(), CliError> {
    let has_size = args.size.is_some_and(|size| size > 0);
    let has_snapshot = args
        .snapshot_id
        .as_deref()
        .is_some_and(|id| !id.trim().is_empty());
    let has_id = !args.volume.id.trim().is_empty();
    if has_size || has_snapshot || has_id {
        Ok(())
    } else {
        Err(CliError::Usage("missing --size"))
    }
}

fn create_request(args: CreateArgs) -> CreateVolumeRequest {
    CreateVolumeRequest::builder()
        .run_async(args.run_async)
        .name(args.volume.name)
        .id(args.volume.id)
        .snapshot_id(args.snapshot_id)
        .volume_type(args.volume_type)
        .iops(args.iops)
        .size(args.size.unwrap_or_default())
        .availability_zone(args.availability_zone)
        .build()
}

fn attachment_request(args: AttachmentArgs) -> AttachmentRequest {
    AttachmentRequest::new(args.id)
        .instance_id(args.instance_id)
        .run_async(args.run_async)
        .force(args.force)
}

fn mount_request(args: MountArgs) -> MountRequest {
    let request = if args.volume.id.trim().is_empty() {
        MountRequest::by_name(args.volume.name)
    } else {
        MountRequest::by_id(args.volume.id)
    };
    request
        .overwrite_fs(args.overwrite_fs)
        .fs_type(args.fs_type)
        .force_create(args.force)
}

/// Stdout writer that renders structured values in the selected format.
struct Printer<'a, W: Write> {
    out: &'a mut W,
    format: OutputFormat,
}

impl<'a, W: Write> Printer<'a, W> {
    const fn new(out: &'a mut W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    /// Renders `values`, or nothing when there are none.
    fn list<T: Serialize>(&mut self, values: &[T]) -> Result<(), CliError> {
        if values.is_empty() {
            return Ok(());
        }
        self.value(&values)
    }

    /// Renders the operation record of a fire-and-forget request; waited
    /// requests with no value print nothing.
    fn pending(&mut self, tracked: &Tracked<()>) -> Result<(), CliError> {
        if tracked.operation_id.is_none() {
            return Ok(());
        }
        self.value(tracked)
    }

    fn value(&mut self, value: &impl Serialize) -> Result<(), CliError> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut *self.out, value)?;
                writeln!(self.out)?;
            }
            OutputFormat::Yaml => serde_yaml::to_writer(&mut *self.out, value)?,
        }
        Ok(())
    }

    /// Plain paths are printed verbatim in every format.
    fn line(&mut self, text: &impl fmt::Display) -> Result<(), CliError> {
        writeln!(self.out, "{text}")?;
        Ok(())
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn create_args(size: Option<u64>, snapshot: Option<&str>, id: &str) -> CreateArgs {
        CreateArgs {
            volume: VolumeSelection {
                name: String::from("data"),
                id: id.to_owned(),
            },
            snapshot_id: snapshot.map(str::to_owned),
            volume_type: None,
            iops: None,
            size,
            availability_zone: None,
            run_async: false,
        }
    }

    #[rstest]
    #[case(Some(10), None, "", true)]
    #[case(None, Some("snap-1"), "", true)]
    #[case(None, None, "vol-1", true)]
    #[case(Some(0), None, "", false)]
    #[case(None, Some(" "), "", false)]
    fn create_requires_a_source(
        #[case] size: Option<u64>,
        #[case] snapshot: Option<&str>,
        #[case] id: &str,
        #[case] accepted: bool,
    ) {
        let result = check_create_source(&create_args(size, snapshot, id));
        assert_eq!(result.is_ok(), accepted, "{result:?}");
    }

    #[test]
    fn create_request_carries_flags() {
        let mut args = create_args(Some(20), None, "");
        args.volume_type = Some(String::from("b_ssd"));
        args.run_async = true;

        let request = create_request(args);
        assert_eq!(request.name, "data");
        assert_eq!(request.size, 20);
        assert_eq!(request.volume_type.as_deref(), Some("b_ssd"));
        assert!(request.run_async);
    }

    #[test]
    fn mount_request_prefers_id() {
        let request = mount_request(MountArgs {
            volume: VolumeSelection {
                name: String::from("data"),
                id: String::from("vol-1"),
            },
            overwrite_fs: false,
            fs_type: None,
            force: true,
        });
        assert_eq!(request, MountRequest::by_id("vol-1").force_create(true));
    }

    #[rstest]
    #[case::json(OutputFormat::Json)]
    #[case::yaml(OutputFormat::Yaml)]
    fn empty_lists_print_nothing(#[case] format: OutputFormat) {
        let mut buf = Vec::new();
        Printer::new(&mut buf, format)
            .list::<String>(&[])
            .expect("write");
        assert!(buf.is_empty());
    }

    #[rstest]
    #[case::json(OutputFormat::Json, "[\n  \"vol-1\"\n]\n")]
    #[case::yaml(OutputFormat::Yaml, "- vol-1\n")]
    fn lists_follow_the_selected_format(#[case] format: OutputFormat, #[case] expected: &str) {
        let mut buf = Vec::new();
        Printer::new(&mut buf, format)
            .list(&[String::from("vol-1")])
            .expect("write");
        assert_eq!(String::from_utf8(buf).expect("utf8"), expected);
    }

    #[test]
    fn bare_volume_command_lists_with_its_filter() {
        let cli =
            Cli::try_parse_from(["volctl", "volume", "--volumename", "data"]).expect("parse");
        let Command::Volume(volume) = cli.command;
        assert!(matches!(
            volume_command(volume),
            VolumeCommand::Get(VolumeSelection { ref name, .. }) if name == "data"
        ));
    }

    #[test]
    fn format_is_accepted_after_the_subcommand() {
        let cli =
            Cli::try_parse_from(["volctl", "volume", "get", "--format", "yaml"]).expect("parse");
        assert_eq!(cli.format, OutputFormat::Yaml);
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        write_error(&mut buf, &CliError::Usage("missing --size"));
        let rendered = String::from_utf8(buf).expect("utf8");
        assert_eq!(rendered, "missing --size\n");
    }
}
