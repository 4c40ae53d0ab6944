//! Process memory probing for the background sweep

/// Best-effort resident set size of the current process, in bytes
pub fn process_resident_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| parse_vm_rss(&status))
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Parse the `VmRSS:` line of `/proc/<pid>/status` (reported in kB)
pub(crate) fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let mut fields = line.split_whitespace().skip(1);
    let value: u64 = fields.next()?.parse().ok()?;
    match fields.next() {
        Some("kB") | None => Some(value * 1024),
        Some(_) => None,
    }
}
