//! Device and mount lifecycle for the release image.
//!
//! The image is attached to a loop device and one fixed partition of it is
//! mounted read-only at the configured mount point. Teardown never trusts
//! values remembered from mount time: the bound device is re-resolved from
//! the live mount table, so an unmount can run in a completely separate
//! invocation of the tool (the resume case).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::config::Config;
use crate::errors::UpgradeError;
use crate::process::Cmd;

const MOUNT_TABLE: &str = "/proc/self/mounts";

/// An active image mount.
#[derive(Debug, Clone)]
pub struct MountBinding {
    pub image: PathBuf,
    /// The backing loop device (e.g. /dev/loop3).
    pub device: String,
    /// The mounted partition (device + partition suffix).
    pub partition: String,
    pub mount_point: PathBuf,
}

/// Attach `image` to a loop device and mount its release partition
/// read-only at the configured mount point.
pub fn mount(config: &Config, image: &Path) -> Result<MountBinding> {
    let mount_point = &config.mount_dir;

    let table = read_mount_table()?;
    if let Some(device) = mount_source(&table, mount_point) {
        return Err(UpgradeError::Mount(format!(
            "{} is already mounted from {}; unmount it first (step 7) or resume past step 0",
            mount_point.display(),
            device
        ))
        .into());
    }

    fs::create_dir_all(mount_point)
        .map_err(|e| UpgradeError::Mount(format!("{}: {}", mount_point.display(), e)))?;

    let device = attach(config, image)?;
    let partition = format!("{}{}", device, config.partition_suffix);

    println!(
        "Mounting {} read-only at {}",
        partition,
        mount_point.display()
    );
    let mounted = Cmd::new(&config.mount)
        .args(["-o", "ro"])
        .arg(&partition)
        .arg_path(mount_point)
        .run();
    if let Err(e) = mounted {
        // Don't leak the loop device when the partition mount fails.
        let _ = Cmd::new(&config.losetup).arg("-d").arg(&device).allow_fail().run();
        return Err(UpgradeError::Mount(format!("{}: {}", partition, e)).into());
    }

    Ok(MountBinding {
        image: image.to_path_buf(),
        device,
        partition,
        mount_point: mount_point.clone(),
    })
}

/// Unmount the configured mount point and detach its backing device.
///
/// The device is resolved from the live mount table, not from any stored
/// state, so this works across process restarts.
pub fn unmount(config: &Config) -> Result<()> {
    let mount_point = &config.mount_dir;

    let table = read_mount_table()?;
    let partition = mount_source(&table, mount_point).ok_or_else(|| {
        UpgradeError::Unmount(format!(
            "nothing is mounted at {}",
            mount_point.display()
        ))
    })?;

    println!("Unmounting {}", mount_point.display());
    Cmd::new(&config.umount)
        .arg_path(mount_point)
        .run()
        .map_err(|e| UpgradeError::Unmount(format!("{}: {}", mount_point.display(), e)))?;

    let device = strip_partition(&partition, &config.partition_suffix);
    println!("Detaching {}", device);
    Cmd::new(&config.losetup)
        .arg("-d")
        .arg(device)
        .run()
        .map_err(|e| UpgradeError::VirtualDevice(format!("detach {}: {}", device, e)))?;

    Ok(())
}

/// Attach the image file to a free loop device, with partition scanning.
fn attach(config: &Config, image: &Path) -> Result<String> {
    println!("Attaching {}", image.display());
    let result = Cmd::new(&config.losetup)
        .args(["--find", "--show", "--partscan"])
        .arg_path(image)
        .run()
        .map_err(|e| UpgradeError::VirtualDevice(format!("attach {}: {}", image.display(), e)))?;

    let device = result.stdout_trimmed().to_string();
    if device.is_empty() {
        return Err(UpgradeError::VirtualDevice(format!(
            "attach {}: losetup reported no device",
            image.display()
        ))
        .into());
    }
    Ok(device)
}

fn read_mount_table() -> Result<String> {
    fs::read_to_string(MOUNT_TABLE)
        .map_err(|e| UpgradeError::Mount(format!("{}: {}", MOUNT_TABLE, e)).into())
}

/// Find the device mounted at `mount_point` in a /proc/self/mounts table.
pub fn mount_source(table: &str, mount_point: &Path) -> Option<String> {
    let wanted = mount_point.to_string_lossy();
    for line in table.lines() {
        let mut fields = line.split_whitespace();
        let device = fields.next()?;
        let point = fields.next()?;
        if unescape_mount_field(point) == wanted {
            return Some(unescape_mount_field(device));
        }
    }
    None
}

/// Undo the octal escaping the kernel applies to mount-table fields
/// (`\040` for space, `\011` tab, `\012` newline, `\134` backslash).
fn unescape_mount_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let bytes = field.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let oct = &field[i + 1..i + 4];
            if oct.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
                if let Ok(v) = u8::from_str_radix(oct, 8) {
                    out.push(v as char);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

/// Strip the partition suffix from a device name, recovering the backing
/// device to detach (e.g. /dev/loop3p1 -> /dev/loop3).
pub fn strip_partition<'a>(device: &'a str, suffix: &str) -> &'a str {
    device.strip_suffix(suffix).unwrap_or(device)
}
