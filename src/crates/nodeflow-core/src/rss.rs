//! Resident-set sampling for run records.

/// Peak resident set size of this process in bytes, via `getrusage`.
///
/// `ru_maxrss` is reported in kilobytes on Linux and in bytes on macOS;
/// normalized to bytes here. Returns 0 on failure.
#[cfg(unix)]
pub(crate) fn max_rss_bytes() -> i64 {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return 0;
    }
    let raw = usage.ru_maxrss as i64;
    if cfg!(target_os = "macos") {
        raw
    } else {
        raw * 1024
    }
}

#[cfg(not(unix))]
pub(crate) fn max_rss_bytes() -> i64 {
    0
}
