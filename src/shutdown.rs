use std::time::Duration;

use tokio::sync::watch;

/// Sets the shared shutdown flag. Setting it more than once has no further effect.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Observer side of the shutdown flag. Every clone sees the same signal; it is never reset.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    /// True once the flag is set or the trigger has been dropped
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Sleep for `duration` unless shutdown arrives first. Returns true when shutdown was
    /// triggered (before or during the sleep).
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        let interrupted = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            // Also resolves with an error when the trigger is gone.
            _ = self.rx.wait_for(|triggered| *triggered) => true,
        };
        interrupted || self.is_triggered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn every_clone_observes_the_signal() {
        let (trigger, shutdown) = channel();
        let other = shutdown.clone();
        assert!(!shutdown.is_triggered());

        trigger.trigger();
        trigger.trigger();

        assert!(shutdown.is_triggered());
        assert!(other.is_triggered());
    }

    #[tokio::test]
    async fn sleep_is_cut_short_by_shutdown() {
        let (trigger, mut shutdown) = channel();
        let started = Instant::now();

        let sleeper = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();

        assert!(sleeper.await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn sleep_runs_to_completion_without_shutdown() {
        let (_trigger, mut shutdown) = channel();
        assert!(!shutdown.sleep(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn dropped_trigger_counts_as_shutdown() {
        let (trigger, mut shutdown) = channel();
        drop(trigger);

        assert!(shutdown.is_triggered());
        let started = Instant::now();
        assert!(shutdown.sleep(Duration::from_secs(30)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
