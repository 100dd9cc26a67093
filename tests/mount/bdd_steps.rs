//! BDD step definitions for the mount lifecycle.

use camino::Utf8PathBuf;
use rstest_bdd_macros::{given, then, when};
use volctl::{AttachmentRequest, CreateVolumeRequest, MountRequest, StorageError};

use super::test_helpers::{MountWorld, Outcome};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn create(world: &MountWorld, name: &str) -> Result<String, StepError> {
    let request = CreateVolumeRequest::builder().name(name).size(5).build();
    let volume = world.block_on(world.manager.storage().create_volume(&request))?;
    Ok(volume.value.id)
}

#[given("an attached volume named \"{name}\"")]
fn attached_volume(mount_world: &MountWorld, name: String) -> Result<(), StepError> {
    let volume_id = create(mount_world, &name)?;
    let storage = mount_world.manager.storage();
    mount_world.block_on(storage.attach_volume(&AttachmentRequest::new(volume_id.clone())))?;
    let mappings = mount_world.block_on(storage.list_volume_mappings())?;
    let device = mappings
        .into_iter()
        .find(|mapping| mapping.volume_id == volume_id)
        .map(|mapping| mapping.device_path)
        .ok_or_else(|| StepError::Assertion(format!("no device for {volume_id}")))?;
    mount_world.device.replace(Some(device));
    Ok(())
}

#[given("a detached volume named \"{name}\"")]
fn detached_volume(mount_world: &MountWorld, name: String) -> Result<(), StepError> {
    create(mount_world, &name).map(drop)
}

#[given("the device already holds an \"{fs_type}\" filesystem")]
fn existing_filesystem(mount_world: &MountWorld, fs_type: String) -> Result<(), StepError> {
    let device = mount_world
        .device
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("no attached device")))?;
    mount_world.table.seed_filesystem(device, fs_type);
    Ok(())
}

#[given("the volume \"{name}\" is mounted")]
fn volume_mounted(mount_world: &MountWorld, name: String) -> Result<(), StepError> {
    mount_world.block_on(mount_world.manager.mount_volume(&MountRequest::by_name(name)))?;
    Ok(())
}

#[given("the next unmount reports the target busy")]
fn unmount_busy(mount_world: &MountWorld) {
    mount_world.table.fail_unmounts(1);
}

#[when("I mount the volume \"{name}\"")]
fn mount(mount_world: &MountWorld, name: String) {
    let request = MountRequest::by_name(name);
    let result = mount_world.block_on(mount_world.manager.mount_volume(&request));
    mount_world.record(result, Outcome::Mounted);
}

#[when("I mount the volume \"{name}\" overwriting its filesystem")]
fn mount_overwriting(mount_world: &MountWorld, name: String) {
    let request = MountRequest::by_name(name).overwrite_fs(true);
    let result = mount_world.block_on(mount_world.manager.mount_volume(&request));
    mount_world.record(result, Outcome::Mounted);
}

#[when("I unmount the volume \"{name}\"")]
fn unmount(mount_world: &MountWorld, name: String) {
    let result = mount_world.block_on(mount_world.manager.unmount_volume(&name, ""));
    mount_world.record(result, |()| Outcome::Unmounted);
}

#[then("the device is formatted with \"{fs_type}\"")]
fn formatted_with(mount_world: &MountWorld, fs_type: String) -> Result<(), StepError> {
    let formats = mount_world.table.formats();
    if formats.iter().any(|call| call.fs_type == fs_type) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected a {fs_type} format, got {formats:?}"
        )))
    }
}

#[then("the device is not formatted")]
fn not_formatted(mount_world: &MountWorld) -> Result<(), StepError> {
    let formats = mount_world.table.formats();
    if formats.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected formats: {formats:?}")))
    }
}

#[then("the mount uses \"{fs_type}\"")]
fn mount_uses(mount_world: &MountWorld, fs_type: String) -> Result<(), StepError> {
    let records = mount_world.table.records();
    match records.as_slice() {
        [record] if record.filesystem_type == fs_type => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected one {fs_type} mount, got {other:?}"
        ))),
    }
}

#[then("the volume \"{name}\" is mounted at \"{path}\"")]
fn mounted_at(mount_world: &MountWorld, name: String, path: String) -> Result<(), StepError> {
    if let Some(Outcome::Failed(err)) = mount_world.outcome.borrow().as_ref() {
        return Err(StepError::Assertion(format!("mount failed: {err}")));
    }
    let current = mount_world.block_on(mount_world.manager.path_of_volume(&name, ""))?;
    if current == Some(Utf8PathBuf::from(&path)) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {name} at {path}, got {current:?}"
        )))
    }
}

#[then("the volume \"{name}\" has no mount path")]
fn no_mount_path(mount_world: &MountWorld, name: String) -> Result<(), StepError> {
    let current = mount_world.block_on(mount_world.manager.path_of_volume(&name, ""))?;
    match current {
        None => Ok(()),
        Some(path) => Err(StepError::Assertion(format!(
            "expected no mount path, got {path}"
        ))),
    }
}

#[then("a lazy unmount was issued")]
fn lazy_unmount(mount_world: &MountWorld) -> Result<(), StepError> {
    let calls = mount_world.table.unmount_calls();
    if calls.iter().any(|(_, lazy)| *lazy) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected a lazy unmount, got {calls:?}"
        )))
    }
}

#[then("the operation fails with \"{kind}\"")]
fn fails_with(mount_world: &MountWorld, kind: String) -> Result<(), StepError> {
    match mount_world.outcome.borrow().as_ref() {
        Some(Outcome::Failed(err)) if format!("{:?}", err.kind()) == kind => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a {kind} failure, got {other:?}"
        ))),
    }
}
