//! Fake procfs/sysfs tree for tests.

use crate::LinuxPaths;
use memstream_core::util::PAGE_SIZE;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Hotplug block size of the fake system
pub const PAGES_PER_BLOCK: u64 = 4;

pub struct FakeSystem {
    root: PathBuf,
}

impl FakeSystem {
    pub fn new(name: &str) -> io::Result<Self> {
        let root = std::env::temp_dir().join(format!(
            "memstream-linux-{}-{}",
            std::process::id(),
            name
        ));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(root.join("memory"))?;
        let sys = FakeSystem { root };
        sys.write(
            "memory/block_size_bytes",
            &format!("{:x}\n", PAGES_PER_BLOCK as usize * PAGE_SIZE),
        )?;
        Ok(sys)
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn paths(&self) -> LinuxPaths {
        LinuxPaths {
            memory: self.path("memory"),
            zoneinfo: self.path("zoneinfo"),
            kpageflags: self.path("kpageflags"),
            dev_mem: self.path("mem"),
        }
    }

    pub fn write(&self, rel: &str, content: &str) -> io::Result<()> {
        fs::write(self.path(rel), content)
    }

    pub fn read(&self, rel: &str) -> io::Result<String> {
        fs::read_to_string(self.path(rel))
    }

    pub fn memory_block(&self, index: u64, node: usize, online: bool, zones: &str) -> io::Result<()> {
        let dir = format!("memory/memory{}", index);
        fs::create_dir_all(self.path(&format!("{}/node{}", dir, node)))?;
        self.write(&format!("{}/online", dir), if online { "1\n" } else { "0\n" })?;
        self.write(
            &format!("{}/state", dir),
            if online { "online" } else { "offline" },
        )?;
        self.write(&format!("{}/valid_zones", dir), &format!("{}\n", zones))
    }

    /// `(node, name, start_pfn, spanned)` per zone
    pub fn zoneinfo(&self, zones: &[(usize, &str, u64, u64)]) -> io::Result<()> {
        let content = zones
            .iter()
            .map(|(node, name, start, spanned)| {
                format!(
                    "Node {}, zone {:>8}\n  pages free     0\n        spanned  {}\n  start_pfn:           {}\n",
                    node, name, spanned, start
                )
            })
            .collect::<String>();
        self.write("zoneinfo", &content)
    }

    pub fn kpageflags(&self, flags: &[u64]) -> io::Result<()> {
        let bytes = flags
            .iter()
            .flat_map(|f| f.to_ne_bytes())
            .collect::<Vec<_>>();
        fs::write(self.path("kpageflags"), bytes)
    }

    /// Physical memory of `pages` pages, each filled with the low byte of its PFN.
    pub fn dev_mem(&self, pages: u64) -> io::Result<()> {
        let bytes = (0..pages)
            .flat_map(|pfn| std::iter::repeat_n(pfn as u8, PAGE_SIZE))
            .collect::<Vec<_>>();
        fs::write(self.path("mem"), bytes)
    }
}

impl Drop for FakeSystem {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}
