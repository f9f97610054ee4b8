//! Memory hotplug interface below `/sys/devices/system/memory`.

use crate::LinuxPlatformError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// State of one hotplug memory block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct HotplugBlock {
    pub online: bool,
    /// Node from the `nodeN` link, if present
    pub node: Option<usize>,
    /// Zone name, if `valid_zones` names exactly one zone
    pub zone: Option<String>,
}

impl HotplugBlock {
    /// Value to write to `state` to bring the block back into its zone.
    pub fn online_state(&self) -> &'static str {
        match self.zone.as_deref() {
            Some("Movable") => "online_movable",
            _ => "online",
        }
    }
}

pub(crate) fn block_dir(root: &Path, index: u64) -> PathBuf {
    root.join(format!("memory{}", index))
}

fn read_trimmed(path: &Path) -> Result<String, LinuxPlatformError> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_owned())
        .map_err(LinuxPlatformError::io(path))
}

/// Hotplug block size in bytes (`block_size_bytes`, hexadecimal without prefix).
pub(crate) fn read_block_size(root: &Path) -> Result<u64, LinuxPlatformError> {
    let path = root.join("block_size_bytes");
    let content = read_trimmed(&path)?;
    u64::from_str_radix(content.trim_start_matches("0x"), 16)
        .ok()
        .filter(|&size| size > 0)
        .ok_or(LinuxPlatformError::Parse { path, content })
}

/// Reads block `index`. Returns `None` if the block does not exist.
pub(crate) fn read_block(root: &Path, index: u64) -> Result<Option<HotplugBlock>, LinuxPlatformError> {
    let dir = block_dir(root, index);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LinuxPlatformError::io(&dir)(e)),
    };
    let node = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()?
                .strip_prefix("node")?
                .parse::<usize>()
                .ok()
        })
        .next();

    let path = dir.join("online");
    let online = match read_trimmed(&path)?.as_str() {
        "1" => true,
        "0" => false,
        content => {
            return Err(LinuxPlatformError::Parse {
                path,
                content: content.to_owned(),
            });
        }
    };

    let zones = read_trimmed(&dir.join("valid_zones"))?;
    let mut names = zones.split_whitespace();
    let zone = match (names.next(), names.next()) {
        (Some("none"), _) => None,
        (Some(name), None) => Some(name.to_owned()),
        _ => None,
    };
    Ok(Some(HotplugBlock { online, node, zone }))
}

/// Writes `state` to the `state` file of block `index`.
pub(crate) fn set_state(root: &Path, index: u64, state: &'static str) -> Result<(), LinuxPlatformError> {
    fs::write(block_dir(root, index).join("state"), state).map_err(|source| {
        LinuxPlatformError::State {
            index,
            state,
            source,
        }
    })
}
