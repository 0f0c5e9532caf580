// Hardware event counters read around every measured epoch.
//
// On Linux the counters come from perf_event_open(2), restricted to user
// space. Anywhere else, or when the kernel refuses to open them (missing
// CAP_PERFMON, paranoid sysctl, virtualised PMU), a null source reporting
// zero is used instead.

/// Counts accumulated over one epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterReading {
    pub branch_misses: u64,
    pub cpu_cycles: u64,
}

/// A source of hardware event counts that can bracket a measured region.
pub trait EventCounters {
    /// Zero the counters and start counting.
    fn start(&mut self);

    /// Stop counting and return what accumulated since `start`.
    fn stop(&mut self) -> CounterReading;

    /// Whether the readings carry real hardware counts.
    fn is_available(&self) -> bool;
}

/// Counter source for hosts without usable hardware counters.
#[derive(Debug, Default)]
pub struct NullCounters;

impl EventCounters for NullCounters {
    fn start(&mut self) {}

    fn stop(&mut self) -> CounterReading {
        CounterReading::default()
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Opens the best counter source for this host.
pub fn open_counters() -> Box<dyn EventCounters> {
    #[cfg(target_os = "linux")]
    {
        if let Some(counters) = perf::PerfCounters::open() {
            return Box::new(counters);
        }
    }

    log::debug!("perf_event_open refused, using null counters");
    Box::new(NullCounters)
}

#[cfg(target_os = "linux")]
pub use perf::PerfCounters;

#[cfg(target_os = "linux")]
mod perf {
    use super::{CounterReading, EventCounters};
    use std::os::unix::io::RawFd;

    /// Branch-miss and cycle counters for the calling thread.
    ///
    /// Both descriptors are closed on drop.
    #[derive(Debug)]
    pub struct PerfCounters {
        branch_misses: RawFd,
        cpu_cycles: RawFd,
    }

    impl PerfCounters {
        /// Opens both counters, or neither.
        pub fn open() -> Option<Self> {
            let mut attr = PerfEventAttr::new();
            attr.type_ = PERF_TYPE_HARDWARE;

            attr.config = PERF_COUNT_HW_BRANCH_MISSES;
            let branch_misses = perf_event_open(&attr)?;

            attr.config = PERF_COUNT_HW_CPU_CYCLES;
            let Some(cpu_cycles) = perf_event_open(&attr) else {
                close_fd(branch_misses);
                return None;
            };

            log::debug!("perf counters open: branch_misses={branch_misses} cycles={cpu_cycles}");
            Some(Self {
                branch_misses,
                cpu_cycles,
            })
        }
    }

    impl EventCounters for PerfCounters {
        fn start(&mut self) {
            for fd in [self.branch_misses, self.cpu_cycles] {
                // SAFETY: fd is an open perf event descriptor owned by self.
                unsafe {
                    libc::ioctl(fd, PERF_EVENT_IOC_RESET, 0);
                    libc::ioctl(fd, PERF_EVENT_IOC_ENABLE, 0);
                }
            }
        }

        fn stop(&mut self) -> CounterReading {
            for fd in [self.branch_misses, self.cpu_cycles] {
                // SAFETY: as above.
                unsafe {
                    libc::ioctl(fd, PERF_EVENT_IOC_DISABLE, 0);
                }
            }

            CounterReading {
                branch_misses: read_scaled_counter(self.branch_misses),
                cpu_cycles: read_scaled_counter(self.cpu_cycles),
            }
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    impl Drop for PerfCounters {
        fn drop(&mut self) {
            close_fd(self.branch_misses);
            close_fd(self.cpu_cycles);
        }
    }

    /// Leading part of the kernel's `struct perf_event_attr`
    /// (PERF_ATTR_SIZE_VER1); the kernel accepts the shorter layout.
    #[repr(C)]
    #[derive(Clone, Copy)]
    struct PerfEventAttr {
        type_: u32,
        size: u32,
        config: u64,
        sample_period_or_freq: u64,
        sample_type: u64,
        read_format: u64,
        flags: u64,
        wakeup_events: u32,
        bp_type: u32,
        config1: u64,
        config2: u64,
    }

    impl PerfEventAttr {
        fn new() -> Self {
            Self {
                type_: 0,
                size: std::mem::size_of::<Self>() as u32,
                config: 0,
                sample_period_or_freq: 0,
                sample_type: 0,
                read_format: PERF_FORMAT_TOTAL_TIME_ENABLED | PERF_FORMAT_TOTAL_TIME_RUNNING,
                flags: PERF_ATTR_FLAG_DISABLED
                    | PERF_ATTR_FLAG_EXCLUDE_KERNEL
                    | PERF_ATTR_FLAG_EXCLUDE_HV,
                wakeup_events: 0,
                bp_type: 0,
                config1: 0,
                config2: 0,
            }
        }
    }

    // see perf_event_open(2)

    const PERF_TYPE_HARDWARE: u32 = 0;
    const PERF_COUNT_HW_CPU_CYCLES: u64 = 0;
    const PERF_COUNT_HW_BRANCH_MISSES: u64 = 5;

    const PERF_FORMAT_TOTAL_TIME_ENABLED: u64 = 1 << 0;
    const PERF_FORMAT_TOTAL_TIME_RUNNING: u64 = 1 << 1;

    const PERF_ATTR_FLAG_DISABLED: u64 = 1 << 0;
    const PERF_ATTR_FLAG_EXCLUDE_KERNEL: u64 = 1 << 5;
    const PERF_ATTR_FLAG_EXCLUDE_HV: u64 = 1 << 6;

    // _IO('$', nr)
    const fn perf_ioc(nr: u64) -> libc::c_ulong {
        (((b'$' as u64) << 8) | nr) as libc::c_ulong
    }

    const PERF_EVENT_IOC_ENABLE: libc::c_ulong = perf_ioc(0);
    const PERF_EVENT_IOC_DISABLE: libc::c_ulong = perf_ioc(1);
    const PERF_EVENT_IOC_RESET: libc::c_ulong = perf_ioc(3);

    fn perf_event_open(attr: &PerfEventAttr) -> Option<RawFd> {
        // SAFETY: attr points to a live, correctly sized perf_event_attr prefix.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_perf_event_open,
                attr as *const PerfEventAttr,
                0 as libc::pid_t,
                -1 as libc::c_int,
                -1 as libc::c_int,
                0 as libc::c_ulong,
            )
        };
        if ret < 0 { None } else { Some(ret as RawFd) }
    }

    fn close_fd(fd: RawFd) {
        // SAFETY: fd was returned by perf_event_open and is closed once.
        unsafe {
            libc::close(fd);
        }
    }

    #[repr(C)]
    struct PerfRead {
        value: u64,
        time_enabled: u64,
        time_running: u64,
    }

    /// Reads a counter, scaling up when the kernel multiplexed it.
    fn read_scaled_counter(fd: RawFd) -> u64 {
        let mut data = PerfRead {
            value: 0,
            time_enabled: 0,
            time_running: 0,
        };
        // SAFETY: data is a writable buffer of exactly the size passed.
        let bytes = unsafe {
            libc::read(
                fd,
                &mut data as *mut PerfRead as *mut libc::c_void,
                std::mem::size_of::<PerfRead>(),
            )
        };
        if bytes != std::mem::size_of::<PerfRead>() as isize {
            return 0;
        }

        if data.time_running > 0 && data.time_enabled > data.time_running {
            ((data.value as f64) * (data.time_enabled as f64) / (data.time_running as f64)) as u64
        } else {
            data.value
        }
    }
}
