use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::sys::wait::{Id, WaitPidFlag, WaitStatus, waitid};
use nix::unistd::Pid;
use tokio::time::Instant;

use crate::constants::{
    KILL_ATTEMPTS, KILL_CONFIRM_POLL_MS, KILL_CONFIRM_TIMEOUT_MS, KILL_RETRY_DELAY_MS,
};
use crate::native::procfs::{self, MemoryInfo, ProcStat};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KillReason {
    TimeLimit,
    MemoryLimit,
    Watchdog,
    Cancelled,
}

/// A spawned program and everything it forked.
///
/// The leader runs in its own process group, so the group id equals the
/// leader pid. Descendants that left the group are tracked by parentage
/// while their parent is alive, and by the pids seen during sampling.
#[derive(Clone, Debug)]
pub struct ProcessTree {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    root: i32,
    kill_reason: OnceLock<KillReason>,
    /// pid -> starttime, so a recycled pid is never signalled.
    seen: Mutex<HashMap<i32, u64>>,
}

impl ProcessTree {
    pub fn new(root_pid: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root_pid as i32,
                kill_reason: OnceLock::new(),
                seen: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn root(&self) -> i32 {
        self.inner.root
    }

    /// The reason recorded by whoever killed the tree first.
    pub fn kill_reason(&self) -> Option<KillReason> {
        self.inner.kill_reason.get().copied()
    }

    /// Processes currently belonging to the tree, zombies included.
    pub fn members(&self) -> Vec<ProcStat> {
        let all = procfs::all_stats();
        let members = select_members(self.inner.root, &all, &self.seen_snapshot());
        self.remember(&members);
        members
    }

    /// Sum of resident memory over the live tree, or the leader's high-water
    /// mark when that is larger.
    pub fn memory_usage(&self) -> u64 {
        let members = self.members();
        let resident: u64 = members
            .iter()
            .filter(|m| !m.is_zombie())
            .filter_map(|m| procfs::read_memory(m.pid))
            .map(|m| m.rss_bytes)
            .sum();
        let leader = procfs::read_memory(self.inner.root).unwrap_or(MemoryInfo::default());

        resident.max(leader.hwm_bytes)
    }

    /// True once the leader has exited, whether or not it has been reaped.
    pub fn root_has_exited(&self) -> bool {
        let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
        match waitid(Id::Pid(Pid::from_raw(self.inner.root)), flags) {
            Ok(WaitStatus::StillAlive) => false,
            Ok(_) => true,
            Err(Errno::ECHILD) => true,
            Err(e) => {
                tracing::debug!(pid = self.inner.root, "waitid failed: {}", e);
                false
            }
        }
    }

    /// Kills the tree and records `reason`, unless the leader already exited
    /// on its own. Returns whether the reason was recorded by this call.
    pub async fn terminate(&self, reason: KillReason) -> bool {
        if self.root_has_exited() {
            tracing::debug!(pid = self.inner.root, ?reason, "Leader already exited, sweeping leftovers");
            self.sweep();
            return false;
        }

        let recorded = self.inner.kill_reason.set(reason).is_ok();
        if !recorded {
            tracing::debug!(pid = self.inner.root, ?reason, "Tree is already being killed");
        }

        self.kill_with_retries().await;
        recorded
    }

    /// Kills whatever is left of the tree without recording a kill.
    pub fn sweep(&self) {
        self.signal_tree();
    }

    async fn kill_with_retries(&self) -> bool {
        for attempt in 1..=KILL_ATTEMPTS {
            self.signal_tree();

            if self
                .wait_until_gone(Duration::from_millis(KILL_CONFIRM_TIMEOUT_MS))
                .await
            {
                tracing::debug!(pid = self.inner.root, attempt, "Process tree killed");
                return true;
            }

            tracing::warn!(pid = self.inner.root, attempt, "Process tree survived SIGKILL");
            if attempt < KILL_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(KILL_RETRY_DELAY_MS)).await;
            }
        }

        tracing::error!(
            pid = self.inner.root,
            "Failed to kill process tree after {} attempts",
            KILL_ATTEMPTS
        );
        false
    }

    fn signal_tree(&self) {
        let group = Pid::from_raw(self.inner.root);

        // A stopped process can't fork, so the snapshot below stays complete.
        let _ = killpg(group, Signal::SIGSTOP);
        let members = self.members();

        match killpg(group, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pid = self.inner.root, "killpg failed: {}", e),
        }

        for member in members.iter().filter(|m| !m.is_zombie()) {
            match kill(Pid::from_raw(member.pid), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!(pid = member.pid, "kill failed: {}", e),
            }
        }
    }

    async fn wait_until_gone(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.members().iter().all(ProcStat::is_zombie) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(KILL_CONFIRM_POLL_MS)).await;
        }
    }

    fn seen_snapshot(&self) -> HashMap<i32, u64> {
        match self.inner.seen.lock() {
            Ok(seen) => seen.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn remember(&self, members: &[ProcStat]) {
        let mut seen = match self.inner.seen.lock() {
            Ok(seen) => seen,
            Err(poisoned) => poisoned.into_inner(),
        };
        for member in members {
            seen.insert(member.pid, member.starttime);
        }
    }
}

/// Members are the leader's process group, every descendant of the leader,
/// and previously seen processes that are still the same process.
fn select_members(root: i32, all: &[ProcStat], seen: &HashMap<i32, u64>) -> Vec<ProcStat> {
    let mut children: HashMap<i32, Vec<&ProcStat>> = HashMap::new();
    for stat in all {
        children.entry(stat.ppid).or_default().push(stat);
    }

    let mut selected: HashSet<i32> = all
        .iter()
        .filter(|s| s.pgrp == root || s.pid == root)
        .map(|s| s.pid)
        .collect();
    selected.extend(
        all.iter()
            .filter(|s| seen.get(&s.pid) == Some(&s.starttime))
            .map(|s| s.pid),
    );

    let mut queue: VecDeque<i32> = selected.iter().copied().collect();
    while let Some(pid) = queue.pop_front() {
        for child in children.get(&pid).into_iter().flatten() {
            if selected.insert(child.pid) {
                queue.push_back(child.pid);
            }
        }
    }

    all.iter()
        .filter(|s| selected.contains(&s.pid))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(pid: i32, ppid: i32, pgrp: i32, starttime: u64) -> ProcStat {
        ProcStat {
            pid,
            state: 'S',
            ppid,
            pgrp,
            utime: 0,
            stime: 0,
            cutime: 0,
            cstime: 0,
            starttime,
        }
    }

    #[test]
    fn test_select_members_follows_group_and_parentage() {
        let all = vec![
            stat(1, 0, 1, 1),
            stat(100, 1, 100, 10),
            stat(101, 100, 100, 11),
            // left the group with setsid, still a descendant
            stat(102, 101, 102, 12),
            stat(103, 102, 102, 13),
            stat(200, 1, 200, 20),
        ];

        let mut pids: Vec<i32> = select_members(100, &all, &HashMap::new())
            .iter()
            .map(|s| s.pid)
            .collect();
        pids.sort();

        assert_eq!(pids, vec![100, 101, 102, 103]);
    }

    #[test]
    fn test_select_members_keeps_seen_orphans_only_with_same_starttime() {
        let all = vec![
            stat(1, 0, 1, 1),
            stat(100, 1, 100, 10),
            // reparented to init after its parent died
            stat(150, 1, 150, 15),
            // recycled pid of a previously seen process
            stat(151, 1, 151, 99),
        ];
        let seen = HashMap::from([(150, 15), (151, 16)]);

        let mut pids: Vec<i32> = select_members(100, &all, &seen)
            .iter()
            .map(|s| s.pid)
            .collect();
        pids.sort();

        assert_eq!(pids, vec![100, 150]);
    }
}
