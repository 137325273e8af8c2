//! Environment overrides honoured by the runtime client.

/// When set to `1`, bundle directories are kept after a container is deleted.
pub const NOCLEAN_ENV: &str = "BOCK_NOCLEAN";

/// When non-empty, tasks are created without `pivot_root` (rootfs on a ramdisk).
pub const RAMDISK_ENV: &str = "BOCK_RAMDISK";

/// Returns true if bundle cleanup has been disabled for debugging.
#[must_use]
pub fn no_clean() -> bool {
    std::env::var(NOCLEAN_ENV).is_ok_and(|v| v == "1")
}

/// Returns true if the container root filesystem lives on a ramdisk.
#[must_use]
pub fn ramdisk() -> bool {
    std::env::var(RAMDISK_ENV).is_ok_and(|v| !v.is_empty())
}
