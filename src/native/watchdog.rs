use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::native::process_tree::{KillReason, ProcessTree};

/// How long the watchdog waits: the primary timeout plus a quarter of it,
/// at most `extra_cap` more, and never past `ceiling`.
pub fn watchdog_timeout(primary: Duration, extra_cap: Duration, ceiling: Duration) -> Duration {
    primary.saturating_add((primary / 4).min(extra_cap)).min(ceiling)
}

/// Second line of defence behind the primary timeout. Force-kills the tree
/// and cancels `scope` if the process outlives its deadline.
#[derive(Debug)]
pub struct Watchdog {
    disarm: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn arm(tree: ProcessTree, after: Duration, scope: CancellationToken) -> Self {
        let disarm = CancellationToken::new();
        let disarmed = disarm.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = disarmed.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    tracing::warn!(
                        pid = tree.root(),
                        after_ms = after.as_millis() as u64,
                        "Watchdog fired, force-killing process tree"
                    );
                    tree.terminate(KillReason::Watchdog).await;
                    scope.cancel();
                }
            }
        });

        Self {
            disarm,
            handle: Some(handle),
        }
    }

    pub fn disarm(mut self) {
        self.disarm.cancel();
        // a kill already in progress is left to finish
        self.handle.take();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchdog_timeout_adds_a_quarter() {
        let timeout = watchdog_timeout(
            Duration::from_millis(1000),
            Duration::from_secs(5),
            Duration::from_secs(60),
        );
        assert_eq!(timeout, Duration::from_millis(1250));
    }

    #[test]
    fn test_watchdog_timeout_caps_extra_time() {
        let timeout = watchdog_timeout(
            Duration::from_secs(40),
            Duration::from_secs(5),
            Duration::from_secs(120),
        );
        assert_eq!(timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_watchdog_timeout_respects_ceiling() {
        let timeout = watchdog_timeout(
            Duration::from_secs(100),
            Duration::from_secs(5),
            Duration::from_secs(60),
        );
        assert_eq!(timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_watchdog_timeout_saturates() {
        let timeout = watchdog_timeout(Duration::MAX, Duration::from_secs(5), Duration::MAX);
        assert_eq!(timeout, Duration::MAX);
    }

    #[tokio::test]
    async fn test_watchdog_kills_and_cancels_scope() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let tree = ProcessTree::new(child.id().unwrap());
        let scope = CancellationToken::new();

        let _watchdog = Watchdog::arm(tree.clone(), Duration::from_millis(50), scope.clone());

        tokio::time::timeout(Duration::from_secs(5), scope.cancelled())
            .await
            .expect("Watchdog should cancel the scope");
        assert_eq!(tree.kill_reason(), Some(KillReason::Watchdog));

        let status = tokio::time::timeout(Duration::from_secs(2), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_disarmed_watchdog_does_nothing() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("1")
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let tree = ProcessTree::new(child.id().unwrap());
        let scope = CancellationToken::new();

        let watchdog = Watchdog::arm(tree.clone(), Duration::from_millis(50), scope.clone());
        watchdog.disarm();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!scope.is_cancelled());
        assert_eq!(tree.kill_reason(), None);
        child.kill().await.unwrap();
    }
}
