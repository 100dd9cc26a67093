//! Host mount table and filesystem primitives.
//!
//! The mount table is never cached: every query re-reads the host's live
//! record (`/proc/self/mounts` by default) so state survives process restarts
//! and reflects mounts made out-of-band.

use std::ffi::OsString;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::exec::{CommandOutput, CommandRunner, ProcessCommandRunner};
use crate::model::MountRecord;

/// Default location of the kernel's mount table.
pub const DEFAULT_MOUNTS_FILE: &str = "/proc/self/mounts";

const BLKID_NO_MATCH: i32 = 2;

/// Host-side record of active mounts plus the filesystem operations the
/// volume manager needs. Implementations block; callers run them off the
/// async executor.
pub trait MountTable: Send + Sync {
    /// Returns the current mounts.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Host`] when the table cannot be read.
    fn mounts(&self) -> StorageResult<Vec<MountRecord>>;

    /// Returns the filesystem type present on `device`, or `None` when the
    /// device carries no recognisable signature.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Host`] when probing fails.
    fn probe_filesystem(&self, device: &Utf8Path) -> StorageResult<Option<String>>;

    /// Creates a filesystem of `fs_type` on `device`. `force` asks the tool to
    /// proceed over existing signatures.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Host`] when the filesystem cannot be created.
    fn make_filesystem(&self, device: &Utf8Path, fs_type: &str, force: bool) -> StorageResult<()>;

    /// Mounts `device` at `mount_point`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Host`] when the mount fails.
    fn mount(&self, device: &Utf8Path, mount_point: &Utf8Path, fs_type: &str)
    -> StorageResult<()>;

    /// Unmounts `mount_point`; `lazy` detaches it even while busy.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Host`] when the unmount fails.
    fn unmount(&self, mount_point: &Utf8Path, lazy: bool) -> StorageResult<()>;
}

/// Mount table backed by the kernel's mount file and the standard
/// `blkid`, `mkfs.*`, `mount`, and `umount` tools.
#[derive(Clone, Debug)]
pub struct HostMountTable<R: CommandRunner = ProcessCommandRunner> {
    mounts_file: Utf8PathBuf,
    runner: R,
}

impl HostMountTable<ProcessCommandRunner> {
    /// Creates a table reading `mounts_file` and running real host tools.
    #[must_use]
    pub fn new(mounts_file: impl Into<Utf8PathBuf>) -> Self {
        Self::with_runner(mounts_file, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> HostMountTable<R> {
    /// Creates a table that runs commands through `runner`.
    #[must_use]
    pub fn with_runner(mounts_file: impl Into<Utf8PathBuf>, runner: R) -> Self {
        Self {
            mounts_file: mounts_file.into(),
            runner,
        }
    }

    fn run_checked(&self, program: &str, args: &[OsString]) -> StorageResult<CommandOutput> {
        let output = self.runner.run(program, args)?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(StorageError::Host {
                program: program.to_owned(),
                message: output.failure_message(),
            })
        }
    }

    fn read_mounts_file(&self) -> StorageResult<String> {
        let read_error = |err: &io::Error| StorageError::Host {
            program: format!("read {}", self.mounts_file),
            message: err.to_string(),
        };
        let parent = self
            .mounts_file
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let file_name = self.mounts_file.file_name().ok_or_else(|| StorageError::Host {
            program: format!("read {}", self.mounts_file),
            message: String::from("mounts file path has no file name"),
        })?;
        let dir =
            Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| read_error(&err))?;
        dir.read_to_string(file_name)
            .map_err(|err| read_error(&err))
    }
}

impl<R: CommandRunner> MountTable for HostMountTable<R> {
    fn mounts(&self) -> StorageResult<Vec<MountRecord>> {
        Ok(parse_mounts(&self.read_mounts_file()?))
    }

    fn probe_filesystem(&self, device: &Utf8Path) -> StorageResult<Option<String>> {
        let args = vec![
            OsString::from("-o"),
            OsString::from("value"),
            OsString::from("-s"),
            OsString::from("TYPE"),
            OsString::from(device.as_str()),
        ];
        let output = self.runner.run("blkid", &args)?;
        if output.code == Some(BLKID_NO_MATCH) {
            return Ok(None);
        }
        if !output.is_success() {
            return Err(StorageError::Host {
                program: String::from("blkid"),
                message: output.failure_message(),
            });
        }
        let fs_type = output.stdout.trim();
        Ok((!fs_type.is_empty()).then(|| fs_type.to_owned()))
    }

    fn make_filesystem(&self, device: &Utf8Path, fs_type: &str, force: bool) -> StorageResult<()> {
        let program = format!("mkfs.{fs_type}");
        let mut args = Vec::new();
        if let Some(flag) = force_flag(fs_type).filter(|_| force) {
            args.push(OsString::from(flag));
        }
        args.push(OsString::from(device.as_str()));
        info!(%device, fs_type, force, "creating filesystem");
        self.run_checked(&program, &args)?;
        Ok(())
    }

    fn mount(
        &self,
        device: &Utf8Path,
        mount_point: &Utf8Path,
        fs_type: &str,
    ) -> StorageResult<()> {
        Dir::create_ambient_dir_all(mount_point, ambient_authority()).map_err(|err| {
            StorageError::Host {
                program: format!("mkdir {mount_point}"),
                message: err.to_string(),
            }
        })?;
        let args = vec![
            OsString::from("-t"),
            OsString::from(fs_type),
            OsString::from(device.as_str()),
            OsString::from(mount_point.as_str()),
        ];
        self.run_checked("mount", &args)?;
        debug!(%device, %mount_point, fs_type, "mounted device");
        Ok(())
    }

    fn unmount(&self, mount_point: &Utf8Path, lazy: bool) -> StorageResult<()> {
        let mut args = Vec::new();
        if lazy {
            args.push(OsString::from("-l"));
        }
        args.push(OsString::from(mount_point.as_str()));
        self.run_checked("umount", &args)?;
        debug!(%mount_point, lazy, "unmounted");
        Ok(())
    }
}

/// Flag that makes `mkfs.<fs_type>` overwrite existing signatures.
#[must_use]
pub fn force_flag(fs_type: &str) -> Option<&'static str> {
    match fs_type {
        "ext2" | "ext3" | "ext4" => Some("-F"),
        "xfs" | "btrfs" => Some("-f"),
        _ => None,
    }
}

/// Parses the `/proc/self/mounts` format, keeping block-device mounts only.
#[must_use]
pub fn parse_mounts(contents: &str) -> Vec<MountRecord> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let (Some(source), Some(target), Some(fs_type)) =
                (fields.next(), fields.next(), fields.next())
            else {
                return None;
            };
            source.starts_with('/').then(|| MountRecord {
                device_path: Utf8PathBuf::from(unescape(source)),
                mount_point: Utf8PathBuf::from(unescape(target)),
                filesystem_type: fs_type.to_owned(),
            })
        })
        .collect()
}

/// Decodes the `\NNN` octal escapes the kernel uses for whitespace.
fn unescape(field: &str) -> String {
    let mut decoded = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            let code: String = chars.clone().take(3).collect();
            if let Some(escaped) = decode_octal(&code) {
                decoded.push(escaped);
                let _skipped = chars.nth(2);
                continue;
            }
        }
        decoded.push(ch);
    }
    decoded
}

fn decode_octal(code: &str) -> Option<char> {
    if code.len() != 3 || !code.chars().all(|digit| digit.is_digit(8)) {
        return None;
    }
    u32::from_str_radix(code, 8).ok().and_then(char::from_u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use rstest::rstest;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/sda1 / ext4 rw,relatime 0 0
/dev/sdb /var/lib/volctl/volumes/data xfs rw,relatime 0 0
/dev/sdc /mnt/with\\040space ext4 rw 0 0
tmpfs /run tmpfs rw,nosuid 0 0
";

    #[test]
    fn parses_block_device_mounts() {
        let records = parse_mounts(SAMPLE);
        let points: Vec<&str> = records
            .iter()
            .map(|record| record.mount_point.as_str())
            .collect();
        assert_eq!(
            points,
            vec!["/", "/var/lib/volctl/volumes/data", "/mnt/with space"]
        );
        assert_eq!(
            records.get(1).map(|record| record.filesystem_type.as_str()),
            Some("xfs")
        );
    }

    #[rstest]
    #[case("plain", "plain")]
    #[case("tab\\011here", "tab\there")]
    #[case("back\\134slash", "back\\slash")]
    #[case("not\\9escape", "not\\9escape")]
    #[case("trailing\\04", "trailing\\04")]
    fn unescapes_octal_sequences(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(unescape(raw), expected);
    }

    #[rstest]
    #[case("ext4", Some("-F"))]
    #[case("xfs", Some("-f"))]
    #[case("vfat", None)]
    fn force_flags_follow_filesystem(#[case] fs_type: &str, #[case] expected: Option<&str>) {
        assert_eq!(force_flag(fs_type), expected);
    }

    #[test]
    fn reads_mounts_from_file() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = tmp.path().join("mounts");
        std::fs::write(&path, SAMPLE).unwrap_or_else(|err| panic!("write: {err}"));
        let utf8 = Utf8PathBuf::from_path_buf(path)
            .unwrap_or_else(|path| panic!("non-utf8 path: {}", path.display()));

        let table = HostMountTable::with_runner(utf8, ScriptedRunner::new());
        assert_eq!(table.mounts().expect("mounts").len(), 3);
    }

    #[rstest]
    #[case(Some(0), "ext4\n", Some("ext4"))]
    #[case(Some(2), "", None)]
    fn probe_interprets_blkid(
        #[case] code: Option<i32>,
        #[case] stdout: &str,
        #[case] expected: Option<&str>,
    ) {
        let runner = ScriptedRunner::new();
        runner.push_output(code, stdout, "");
        let table = HostMountTable::with_runner(DEFAULT_MOUNTS_FILE, runner.clone());

        let probed = table
            .probe_filesystem(Utf8Path::new("/dev/sdb"))
            .expect("probe");
        assert_eq!(probed.as_deref(), expected);
        let calls = runner.invocations();
        assert_eq!(
            calls.first().map(crate::test_support::CommandInvocation::command_string),
            Some(String::from("blkid -o value -s TYPE /dev/sdb"))
        );
    }

    #[test]
    fn probe_failure_is_host_error() {
        let runner = ScriptedRunner::new();
        runner.push_failure(4);
        let table = HostMountTable::with_runner(DEFAULT_MOUNTS_FILE, runner);
        let err = table
            .probe_filesystem(Utf8Path::new("/dev/sdb"))
            .expect_err("probe should fail");
        assert!(matches!(err, StorageError::Host { ref program, .. } if program == "blkid"));
    }

    #[test]
    fn make_filesystem_passes_force_flag() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_success();
        let table = HostMountTable::with_runner(DEFAULT_MOUNTS_FILE, runner.clone());

        table
            .make_filesystem(Utf8Path::new("/dev/sdb"), "ext4", true)
            .expect("mkfs forced");
        table
            .make_filesystem(Utf8Path::new("/dev/sdc"), "xfs", false)
            .expect("mkfs");

        let commands: Vec<String> = runner
            .invocations()
            .iter()
            .map(crate::test_support::CommandInvocation::command_string)
            .collect();
        assert_eq!(
            commands,
            vec!["mkfs.ext4 -F /dev/sdb", "mkfs.xfs /dev/sdc"]
        );
    }

    #[test]
    fn mount_creates_directory_and_runs_mount() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 path: {}", path.display()));
        let mount_point = root.join("volumes").join("data");
        let runner = ScriptedRunner::new();
        runner.push_success();
        let table = HostMountTable::with_runner(DEFAULT_MOUNTS_FILE, runner.clone());

        table
            .mount(Utf8Path::new("/dev/sdb"), &mount_point, "ext4")
            .expect("mount");

        assert!(mount_point.is_dir());
        let commands: Vec<String> = runner
            .invocations()
            .iter()
            .map(crate::test_support::CommandInvocation::command_string)
            .collect();
        assert_eq!(commands, vec![format!("mount -t ext4 /dev/sdb {mount_point}")]);
    }

    #[test]
    fn failed_unmount_reports_stderr() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(32), "", "target is busy");
        let table = HostMountTable::with_runner(DEFAULT_MOUNTS_FILE, runner);
        let err = table
            .unmount(Utf8Path::new("/mnt/data"), false)
            .expect_err("unmount should fail");
        assert_eq!(
            err,
            StorageError::Host {
                program: String::from("umount"),
                message: String::from("exited with status 32: target is busy"),
            }
        );
    }
}
