use std::sync::OnceLock;

#[cfg(target_family = "unix")]
pub mod unix;
#[cfg(target_family = "windows")]
pub mod windows;

/// Returns the granularity, in bytes, at which the OS maps, locks and
/// releases memory. Queried once and cached for the life of the process.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    #[cfg(target_family = "unix")]
    {
        *PAGE_SIZE.get_or_init(self::unix::page_size)
    }
    #[cfg(target_family = "windows")]
    {
        *PAGE_SIZE.get_or_init(self::windows::page_size)
    }
}

/// Rounds `len` up to a whole number of pages.
#[inline]
pub fn page_aligned(len: usize) -> usize {
    let page = page_size();
    (len + page - 1) / page * page
}
