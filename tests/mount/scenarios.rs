//! BDD scenarios for the mount lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{MountWorld, mount_world};

#[scenario(
    path = "tests/features/mount.feature",
    name = "Format and mount a blank volume"
)]
fn scenario_format_blank(mount_world: MountWorld) {
    drop(mount_world);
}

#[scenario(
    path = "tests/features/mount.feature",
    name = "Preserve an existing filesystem"
)]
fn scenario_preserve_filesystem(mount_world: MountWorld) {
    drop(mount_world);
}

#[scenario(
    path = "tests/features/mount.feature",
    name = "Overwrite an existing filesystem on request"
)]
fn scenario_overwrite_filesystem(mount_world: MountWorld) {
    drop(mount_world);
}

#[scenario(
    path = "tests/features/mount.feature",
    name = "Refuse to mount a volume that is not attached here"
)]
fn scenario_not_attached(mount_world: MountWorld) {
    drop(mount_world);
}

#[scenario(
    path = "tests/features/mount.feature",
    name = "Unmount clears the mount path"
)]
fn scenario_unmount_clears_path(mount_world: MountWorld) {
    drop(mount_world);
}

#[scenario(
    path = "tests/features/mount.feature",
    name = "Fall back to a lazy unmount when the target is busy"
)]
fn scenario_lazy_unmount(mount_world: MountWorld) {
    drop(mount_world);
}

#[scenario(
    path = "tests/features/mount.feature",
    name = "Unmounting twice reports the volume as not mounted"
)]
fn scenario_double_unmount(mount_world: MountWorld) {
    drop(mount_world);
}
