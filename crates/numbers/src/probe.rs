// Host capability probe.
//
// Cache geometry and free disk space are read once at startup into an
// immutable snapshot that is passed to everything downstream. A value the
// host cannot report is kept as 0; benchmarks tied to it are skipped.

use std::path::Path;

pub const KIB: usize = 1 << 10;
pub const MIB: usize = KIB * KIB;

/// Bounds on the working set used for the main-memory and disk benchmarks.
pub const MIN_LARGE_WORKING_SET: usize = 256 * MIB;
pub const MAX_LARGE_WORKING_SET: usize = 1024 * MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilitySnapshot {
    pub page_size: usize,
    pub l1_size: usize,
    pub l2_size: usize,
    pub l3_size: usize,
    pub cache_line_size: usize,
    pub core_count: usize,
    pub large_working_set_size: usize,
    pub disk_available_bytes: u64,
}

/// Raw values as reported by the host, before derivation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostReport {
    pub page_size: usize,
    pub l1_size: usize,
    pub l2_size: usize,
    pub l3_size: usize,
    pub cache_line_size: usize,
    pub core_count: usize,
    pub disk_available_bytes: u64,
}

impl CapabilitySnapshot {
    pub fn from_report(report: HostReport) -> Self {
        Self {
            page_size: report.page_size,
            l1_size: report.l1_size,
            l2_size: report.l2_size,
            l3_size: report.l3_size,
            cache_line_size: report.cache_line_size,
            core_count: report.core_count,
            large_working_set_size: large_working_set_size(report.l3_size, report.core_count),
            disk_available_bytes: report.disk_available_bytes,
        }
    }

    /// Queries this host; free space is measured on the filesystem holding
    /// `disk_dir`.
    pub fn probe(disk_dir: &Path) -> Self {
        let report = HostReport {
            page_size: os::page_size(),
            l1_size: os::l1_dcache_size(),
            l2_size: os::l2_cache_size(),
            l3_size: os::l3_cache_size(),
            cache_line_size: os::cache_line_size(),
            core_count: num_cpus::get(),
            disk_available_bytes: os::available_bytes(disk_dir),
        };
        log::debug!("host report: {report:?}");
        Self::from_report(report)
    }

    /// Strictly more free space than the file the disk benchmarks write.
    pub fn disk_benchmarks_enabled(&self) -> bool {
        self.disk_available_bytes > self.large_working_set_size as u64
    }
}

/// `L3 size * cores`, clamped to `[256 MiB, 1 GiB]`.
pub fn large_working_set_size(l3_size: usize, core_count: usize) -> usize {
    l3_size
        .saturating_mul(core_count)
        .clamp(MIN_LARGE_WORKING_SET, MAX_LARGE_WORKING_SET)
}

mod os {
    use std::path::Path;

    #[cfg(unix)]
    fn sysconf(name: libc::c_int) -> usize {
        // SAFETY: sysconf has no memory safety preconditions.
        let value = unsafe { libc::sysconf(name) };
        // -1 (unsupported) and 0 (unknown) both mean "not measurable"
        if value > 0 { value as usize } else { 0 }
    }

    #[cfg(unix)]
    pub fn page_size() -> usize {
        sysconf(libc::_SC_PAGESIZE)
    }

    #[cfg(not(unix))]
    pub fn page_size() -> usize {
        0
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    pub fn l1_dcache_size() -> usize {
        sysconf(libc::_SC_LEVEL1_DCACHE_SIZE)
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    pub fn cache_line_size() -> usize {
        sysconf(libc::_SC_LEVEL1_DCACHE_LINESIZE)
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    pub fn l2_cache_size() -> usize {
        sysconf(libc::_SC_LEVEL2_CACHE_SIZE)
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    pub fn l3_cache_size() -> usize {
        sysconf(libc::_SC_LEVEL3_CACHE_SIZE)
    }

    // Only glibc exposes cache geometry through sysconf.

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    pub fn l1_dcache_size() -> usize {
        0
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    pub fn cache_line_size() -> usize {
        0
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    pub fn l2_cache_size() -> usize {
        0
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    pub fn l3_cache_size() -> usize {
        0
    }

    /// Bytes available to unprivileged users, or 0 when unknown.
    #[cfg(unix)]
    pub fn available_bytes(dir: &Path) -> u64 {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let Ok(c_path) = CString::new(dir.as_os_str().as_bytes()) else {
            return 0;
        };

        // SAFETY: statvfs is plain old data, zero is a valid bit pattern.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: c_path is NUL terminated and stat is writable.
        let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if ret != 0 {
            log::warn!(
                "statvfs({}) failed: {}",
                dir.display(),
                std::io::Error::last_os_error()
            );
            return 0;
        }

        (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64)
    }

    #[cfg(not(unix))]
    pub fn available_bytes(_dir: &Path) -> u64 {
        0
    }
}
