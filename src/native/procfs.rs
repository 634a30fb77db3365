use std::sync::LazyLock;
use std::time::Duration;

/// The handful of `/proc/<pid>/stat` fields the executor cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcStat {
    pub pid: i32,
    pub state: char,
    pub ppid: i32,
    pub pgrp: i32,
    pub utime: u64,
    pub stime: u64,
    pub cutime: u64,
    pub cstime: u64,
    pub starttime: u64,
}

impl ProcStat {
    pub fn is_zombie(&self) -> bool {
        matches!(self.state, 'Z' | 'X')
    }

    /// User time of the process and every child it has reaped.
    pub fn user_time(&self) -> Duration {
        ticks_to_duration(self.utime + self.cutime)
    }

    pub fn system_time(&self) -> Duration {
        ticks_to_duration(self.stime + self.cstime)
    }
}

pub fn parse_stat(content: &str) -> Option<ProcStat> {
    // comm may contain spaces and parentheses, so split around the last ')'
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let pid = content[..open].trim().parse().ok()?;
    let fields: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();

    // fields[0] is field 3 of proc(5)
    let field = |n: usize| fields.get(n - 3).copied();
    let number = |n: usize| field(n).and_then(|f| f.parse::<i64>().ok());

    Some(ProcStat {
        pid,
        state: field(3)?.chars().next()?,
        ppid: number(4)? as i32,
        pgrp: number(5)? as i32,
        utime: number(14)?.max(0) as u64,
        stime: number(15)?.max(0) as u64,
        cutime: number(16)?.max(0) as u64,
        cstime: number(17)?.max(0) as u64,
        starttime: number(22)?.max(0) as u64,
    })
}

pub fn read_stat(pid: i32) -> Option<ProcStat> {
    let content = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_stat(&content)
}

/// Every process currently visible in `/proc`.
pub fn all_stats() -> Vec<ProcStat> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
        .filter_map(read_stat)
        .collect()
}

/// Value of a `kB` line of `/proc/<pid>/status`, in bytes.
pub fn parse_status_bytes(content: &str, key: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let value = line.strip_prefix(key)?.strip_prefix(':')?;
        let kb = value.split_whitespace().next()?.parse::<u64>().ok()?;
        Some(kb * 1024)
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryInfo {
    pub rss_bytes: u64,
    pub hwm_bytes: u64,
}

pub fn read_memory(pid: i32) -> Option<MemoryInfo> {
    let content = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    Some(MemoryInfo {
        rss_bytes: parse_status_bytes(&content, "VmRSS").unwrap_or(0),
        hwm_bytes: parse_status_bytes(&content, "VmHWM").unwrap_or(0),
    })
}

static CLOCK_TICKS: LazyLock<u64> = LazyLock::new(|| {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as u64 } else { 100 }
});

pub fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_micros(ticks.saturating_mul(1_000_000) / *CLOCK_TICKS)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "4242 (my (weird) prog) S 4200 4242 4242 0 -1 4194560 120 0 0 0 \
        37 5 2 1 20 0 1 0 987654 1000000 200 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 3 0 0 0 0 0";

    const STATUS: &str = "Name:\tprog\nState:\tS (sleeping)\nVmPeak:\t   10000 kB\n\
        VmHWM:\t    2048 kB\nVmRSS:\t    1024 kB\nThreads:\t1\n";

    #[test]
    fn test_parse_stat_handles_parentheses_in_name() {
        let stat = parse_stat(STAT).unwrap();

        assert_eq!(stat.pid, 4242);
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.ppid, 4200);
        assert_eq!(stat.pgrp, 4242);
        assert_eq!((stat.utime, stat.stime, stat.cutime, stat.cstime), (37, 5, 2, 1));
        assert_eq!(stat.starttime, 987654);
        assert!(!stat.is_zombie());
    }

    #[test]
    fn test_parse_stat_rejects_garbage() {
        assert_eq!(parse_stat("not a stat line"), None);
        assert_eq!(parse_stat("12 (short) R 1"), None);
    }

    #[test]
    fn test_parse_status_bytes() {
        assert_eq!(parse_status_bytes(STATUS, "VmRSS"), Some(1024 * 1024));
        assert_eq!(parse_status_bytes(STATUS, "VmHWM"), Some(2048 * 1024));
        assert_eq!(parse_status_bytes(STATUS, "VmSwap"), None);
    }

    #[test]
    fn test_read_own_stat() {
        let pid = std::process::id() as i32;
        let stat = read_stat(pid).unwrap();
        assert_eq!(stat.pid, pid);
        assert!(read_memory(pid).unwrap().rss_bytes > 0);
        assert!(all_stats().iter().any(|s| s.pid == pid));
    }
}
