//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{StorageError, StorageResult};
use crate::exec::{CommandOutput, CommandRunner, SpawnError};
use crate::model::MountRecord;
use crate::mount_table::MountTable;

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<StdMutex<VecDeque<CommandOutput>>>,
    invocations: Arc<StdMutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SpawnError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| SpawnError {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// A filesystem creation observed by [`MemoryMountTable`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FormatCall {
    /// Formatted device.
    pub device: Utf8PathBuf,
    /// Filesystem type requested.
    pub fs_type: String,
    /// Whether the force flag was passed.
    pub force: bool,
}

#[derive(Debug, Default)]
struct MountState {
    mounts: Vec<MountRecord>,
    filesystems: HashMap<Utf8PathBuf, String>,
    formats: Vec<FormatCall>,
    failing_unmounts: u32,
    unmount_calls: Vec<(Utf8PathBuf, bool)>,
}

/// In-memory mount table that mimics the host tools without touching the
/// system. Cloning shares the underlying state.
#[derive(Clone, Debug, Default)]
pub struct MemoryMountTable {
    state: Arc<StdMutex<MountState>>,
    mount_delay: Duration,
}

impl MemoryMountTable {
    /// Creates an empty table with no filesystems.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `delay` inside every mount to widen race windows.
    #[must_use]
    pub const fn mount_delay(mut self, delay: Duration) -> Self {
        self.mount_delay = delay;
        self
    }

    /// Marks `device` as carrying a filesystem of `fs_type`.
    pub fn seed_filesystem(&self, device: impl Into<Utf8PathBuf>, fs_type: impl Into<String>) {
        lock(&self.state)
            .filesystems
            .insert(device.into(), fs_type.into());
    }

    /// Records a mount made outside the volume manager.
    pub fn seed_mount(&self, record: MountRecord) {
        lock(&self.state).mounts.push(record);
    }

    /// Makes the next `count` non-lazy unmounts fail, as a busy or vanished
    /// device would.
    pub fn fail_unmounts(&self, count: u32) {
        lock(&self.state).failing_unmounts = count;
    }

    /// Current mount records.
    #[must_use]
    pub fn records(&self) -> Vec<MountRecord> {
        lock(&self.state).mounts.clone()
    }

    /// Filesystem creations performed so far.
    #[must_use]
    pub fn formats(&self) -> Vec<FormatCall> {
        lock(&self.state).formats.clone()
    }

    /// Unmount attempts as `(mount point, lazy)` pairs.
    #[must_use]
    pub fn unmount_calls(&self) -> Vec<(Utf8PathBuf, bool)> {
        lock(&self.state).unmount_calls.clone()
    }

    /// Filesystem currently recorded for `device`.
    #[must_use]
    pub fn filesystem_of(&self, device: &Utf8Path) -> Option<String> {
        lock(&self.state).filesystems.get(device).cloned()
    }
}

impl MountTable for MemoryMountTable {
    fn mounts(&self) -> StorageResult<Vec<MountRecord>> {
        Ok(self.records())
    }

    fn probe_filesystem(&self, device: &Utf8Path) -> StorageResult<Option<String>> {
        Ok(self.filesystem_of(device))
    }

    fn make_filesystem(&self, device: &Utf8Path, fs_type: &str, force: bool) -> StorageResult<()> {
        let mut state = lock(&self.state);
        state.formats.push(FormatCall {
            device: device.to_owned(),
            fs_type: fs_type.to_owned(),
            force,
        });
        state
            .filesystems
            .insert(device.to_owned(), fs_type.to_owned());
        Ok(())
    }

    fn mount(
        &self,
        device: &Utf8Path,
        mount_point: &Utf8Path,
        fs_type: &str,
    ) -> StorageResult<()> {
        if !self.mount_delay.is_zero() {
            thread::sleep(self.mount_delay);
        }
        lock(&self.state).mounts.push(MountRecord {
            device_path: device.to_owned(),
            mount_point: mount_point.to_owned(),
            filesystem_type: fs_type.to_owned(),
        });
        Ok(())
    }

    fn unmount(&self, mount_point: &Utf8Path, lazy: bool) -> StorageResult<()> {
        let mut state = lock(&self.state);
        state.unmount_calls.push((mount_point.to_owned(), lazy));
        if !lazy && state.failing_unmounts > 0 {
            state.failing_unmounts -= 1;
            return Err(StorageError::Host {
                program: String::from("umount"),
                message: String::from("exited with status 32: target is busy"),
            });
        }
        state
            .mounts
            .retain(|record| record.mount_point != mount_point);
        Ok(())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Produces a minimal Scaleway Instance API volume object.
///
/// `server` names the instance the volume is attached to, if any.
#[must_use]
pub fn json_scaleway_volume(id: &str, name: &str, state: &str, server: Option<&str>) -> String {
    let server_json = server.map_or_else(
        || String::from("null"),
        |server_id| format!("{{\"id\":\"{server_id}\",\"name\":\"srv\"}}"),
    );
    format!(
        "{{\"id\":\"{id}\",\"name\":\"{name}\",\"size\":10000000000,\
\"volume_type\":\"b_ssd\",\"state\":\"{state}\",\"zone\":\"fr-par-1\",\
\"server\":{server_json}}}"
    )
}
