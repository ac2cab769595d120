use std::io;

/// Kernel clock ticks per second as exposed through `/proc` (`USER_HZ`),
/// fixed at 100 by the Linux userspace ABI.
const USER_HZ: f64 = 100.0;

pub const RECLAIM_TIERS: &[&str] = &["kswapd", "direct"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
}

/// Cumulative page-reclaim counters for one reclaim tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimStats {
    pub tier: String,
    pub scanned: u64,
    pub stolen: u64,
}

/// Source of raw process statistics. Every read may fail; callers treat a
/// failure as "not available this tick".
pub trait ProcessProbe: Send {
    /// Cumulative user + system CPU time in seconds.
    fn cpu_seconds(&self) -> io::Result<f64>;
    fn memory(&self) -> io::Result<MemoryUsage>;
    fn open_fds(&self) -> io::Result<u64>;
    /// Soft limit on open file descriptors.
    fn max_fds(&self) -> io::Result<u64>;
    fn reclaim_stats(&self) -> io::Result<Vec<ReclaimStats>>;
    fn threads(&self) -> io::Result<u64>;
}

/// Reads the current process through procfs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsProbe;

impl ProcessProbe for ProcfsProbe {
    fn cpu_seconds(&self) -> io::Result<f64> {
        parse_stat_cpu_seconds(&read_proc("/proc/self/stat")?)
    }

    fn memory(&self) -> io::Result<MemoryUsage> {
        let status = read_proc("/proc/self/status")?;
        Ok(MemoryUsage {
            resident_bytes: parse_status_value(&status, "VmRSS:")?.saturating_mul(1024),
            virtual_bytes: parse_status_value(&status, "VmSize:")?.saturating_mul(1024),
        })
    }

    fn open_fds(&self) -> io::Result<u64> {
        let entries = list_proc_dir("/proc/self/fd")?;
        Ok(entries as u64)
    }

    fn max_fds(&self) -> io::Result<u64> {
        parse_limits_soft_nofile(&read_proc("/proc/self/limits")?)
    }

    fn reclaim_stats(&self) -> io::Result<Vec<ReclaimStats>> {
        parse_vmstat_reclaim(&read_proc("/proc/vmstat")?)
    }

    fn threads(&self) -> io::Result<u64> {
        parse_status_value(&read_proc("/proc/self/status")?, "Threads:")
    }
}

#[cfg(target_os = "linux")]
fn read_proc(path: &str) -> io::Result<String> {
    std::fs::read_to_string(path)
}

#[cfg(not(target_os = "linux"))]
fn read_proc(path: &str) -> io::Result<String> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{path} requires procfs"),
    ))
}

#[cfg(target_os = "linux")]
fn list_proc_dir(path: &str) -> io::Result<usize> {
    Ok(std::fs::read_dir(path)?.count())
}

#[cfg(not(target_os = "linux"))]
fn list_proc_dir(path: &str) -> io::Result<usize> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{path} requires procfs"),
    ))
}

fn parse_stat_cpu_seconds(stat: &str) -> io::Result<f64> {
    // The command name may contain spaces, so fields are counted after its closing paren.
    let fields = stat
        .rfind(')')
        .map(|index| stat[index + 1..].split_whitespace().collect::<Vec<_>>())
        .ok_or_else(|| malformed("/proc/self/stat"))?;

    // utime and stime are fields 14 and 15 of the full line.
    let ticks = |index: usize| {
        fields
            .get(index)
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| malformed("/proc/self/stat"))
    };

    Ok((ticks(11)? + ticks(12)?) as f64 / USER_HZ)
}

fn parse_status_value(status: &str, key: &str) -> io::Result<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse::<u64>().ok())
        .ok_or_else(|| malformed(key))
}

fn parse_limits_soft_nofile(limits: &str) -> io::Result<u64> {
    let soft = limits
        .lines()
        .find_map(|line| line.strip_prefix("Max open files"))
        .and_then(|rest| rest.split_whitespace().next())
        .ok_or_else(|| malformed("Max open files"))?;

    soft.parse::<u64>().map_err(|_| {
        io::Error::new(
            io::ErrorKind::Unsupported,
            format!("open file limit is {soft}"),
        )
    })
}

fn parse_vmstat_reclaim(vmstat: &str) -> io::Result<Vec<ReclaimStats>> {
    let lookup = |key: String| {
        vmstat.lines().find_map(|line| {
            let (name, value) = line.split_once(' ')?;
            (name == key).then(|| value.trim().parse::<u64>().ok()).flatten()
        })
    };

    let stats = RECLAIM_TIERS
        .iter()
        .filter_map(|tier| {
            Some(ReclaimStats {
                tier: (*tier).to_string(),
                scanned: lookup(format!("pgscan_{tier}"))?,
                stolen: lookup(format!("pgsteal_{tier}"))?,
            })
        })
        .collect::<Vec<_>>();

    if stats.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "kernel does not report page reclaim counters",
        ));
    }

    Ok(stats)
}

fn malformed(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed {what}"))
}
