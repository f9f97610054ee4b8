//! Reader for `/proc/kpageflags`, one native-endian `u64` of flags per PFN.

use std::fs::File;
use std::io;
use std::ops::Range;
use std::os::unix::fs::FileExt;

/// Page is reserved (`KPF_RESERVED`)
pub(crate) const KPF_RESERVED: u64 = 32;

/// Returns `true` if `bit` is set in `flags`.
pub(crate) fn has_flag(flags: u64, bit: u64) -> bool {
    flags & (1 << bit) != 0
}

/// Reads the flags of every PFN in `pfns`.
pub(crate) fn read_flags(file: &File, pfns: Range<u64>) -> io::Result<Vec<u64>> {
    const ENTRY: usize = size_of::<u64>();
    let mut buf = vec![0u8; (pfns.end - pfns.start) as usize * ENTRY];
    file.read_exact_at(&mut buf, pfns.start * ENTRY as u64)?;
    Ok(buf
        .chunks_exact(ENTRY)
        .map(|entry| {
            let mut bytes = [0u8; ENTRY];
            bytes.copy_from_slice(entry);
            u64::from_ne_bytes(bytes)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeSystem;

    #[test]
    fn reads_range() -> anyhow::Result<()> {
        let sys = FakeSystem::new("kpageflags")?;
        let mut flags = vec![0u64; 16];
        flags[5] = 1 << KPF_RESERVED;
        flags[6] = 1 << 10;
        sys.kpageflags(&flags)?;
        let file = File::open(sys.path("kpageflags"))?;

        let read = read_flags(&file, 4..8)?;
        assert_eq!(read, vec![0, 1 << KPF_RESERVED, 1 << 10, 0]);
        assert!(has_flag(read[1], KPF_RESERVED));
        assert!(!has_flag(read[2], KPF_RESERVED));
        assert!(read_flags(&file, 12..20).is_err());
        Ok(())
    }
}
