/// Page shift value (12 bits) for 4KB pages
pub const PAGE_SHIFT: usize = 12;
/// Standard page size (4096 bytes)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Cache line size (64 bytes) for x86_64
pub const CL_SIZE: usize = 64;

/// Largest buddy allocator order on x86_64 Linux
pub const MAX_ORDER: usize = 10;
/// Pages in a maximum-order buddy block (4 MB with 4 KB pages)
pub const MAX_ORDER_NR_PAGES: u64 = 1 << MAX_ORDER;
