use super::{PAGE_SHIFT, PAGE_SIZE};

/// Memory size representation supporting common units.
///
/// All units use binary (base-2) multipliers (1 KB = 1024 bytes). Block
/// granularities are usually expressed in pages, see [`Size::from_pages`].
///
/// # Examples
///
/// ```
/// use memstream_core::util::Size;
///
/// let size = Size::MB(4);
/// assert_eq!(size.bytes(), 4 * 1024 * 1024);
/// assert_eq!(size.pages(), 1024);
///
/// let block = Size::from_pages(32768);
/// assert_eq!(block.bytes(), 128 << 20);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Size {
    /// Size in bytes
    B(usize),
    /// Size in kilobytes (1 KB = 1024 bytes)
    KB(usize),
    /// Size in megabytes (1 MB = 1024 KB)
    MB(usize),
    /// Size in gigabytes (1 GB = 1024 MB)
    GB(usize),
}

impl Size {
    /// Size of `pages` base pages.
    pub const fn from_pages(pages: u64) -> Self {
        Size::B((pages as usize) << PAGE_SHIFT)
    }

    /// Converts this size to bytes.
    pub const fn bytes(&self) -> usize {
        match self {
            Size::B(bytes) => *bytes,
            Size::KB(kb) => *kb * (1 << 10),
            Size::MB(mb) => *mb * (1 << 20),
            Size::GB(gb) => *gb * (1 << 30),
        }
    }

    /// Number of whole base pages covered by this size.
    pub const fn pages(&self) -> u64 {
        (self.bytes() / PAGE_SIZE) as u64
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Size::B(bytes) if *bytes >= 1 << 20 && bytes.is_multiple_of(1 << 20) => {
                write!(f, "{} MB", bytes >> 20)
            }
            Size::B(bytes) => write!(f, "{} B", bytes),
            Size::KB(kb) => write!(f, "{} KB", kb),
            Size::MB(mb) => write!(f, "{} MB", mb),
            Size::GB(gb) => write!(f, "{} GB", gb),
        }
    }
}
