//! Memory readings for sizing the dense fallback and reporting run costs.
//!
//! Both functions read Linux `/proc` files. On other platforms they return
//! `None` and log a warning once.

/// Reads a `<key>: <value> kB` field from a `/proc` status-style file.
fn proc_field_kb(content: &str, key: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with(key))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}

/// Peak resident set size of this process (`VmHWM`, the RSS high-water mark),
/// in kilobytes.
#[cfg(target_os = "linux")]
pub fn peak_rss_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    proc_field_kb(&status, "VmHWM:")
}

/// Memory the kernel reports as available for new allocations (`MemAvailable`), in bytes.
#[cfg(target_os = "linux")]
pub fn available_memory_bytes() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    proc_field_kb(&meminfo, "MemAvailable:").map(|kb| kb * 1024)
}

#[cfg(not(target_os = "linux"))]
fn warn_unsupported() {
    use std::sync::Once;
    static WARN_ONCE: Once = Once::new();
    WARN_ONCE.call_once(|| {
        log::warn!("Memory readings are only supported on Linux.");
    });
}

#[cfg(not(target_os = "linux"))]
pub fn peak_rss_kb() -> Option<u64> {
    warn_unsupported();
    None
}

#[cfg(not(target_os = "linux"))]
pub fn available_memory_bytes() -> Option<u64> {
    warn_unsupported();
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proc_field_parsing() {
        let content = "MemTotal:       16318844 kB\nMemAvailable:    9876543 kB\n";
        assert_eq!(proc_field_kb(content, "MemAvailable:"), Some(9_876_543));
        assert_eq!(proc_field_kb(content, "SwapTotal:"), None);

        let status = "VmPeak:\t  912340 kB\nVmSize:\t  912000 kB\nVmHWM:\t   20480 kB\n";
        assert_eq!(proc_field_kb(status, "VmHWM:"), Some(20_480));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_readings_report_on_linux() {
        let rss = peak_rss_kb().unwrap();
        assert!(rss > 0);
        // Resident memory never exceeds the peak virtual size.
        let status = std::fs::read_to_string("/proc/self/status").unwrap();
        let virtual_peak = proc_field_kb(&status, "VmPeak:").unwrap();
        assert!(rss <= virtual_peak);
        assert!(available_memory_bytes().is_some());
    }
}
