//! Periodic tasks with cooperative shutdown.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// A named fixed-period loop.
///
/// The task body runs on the first tick and then every `period`. A shutdown
/// signal is only observed between iterations, so an iteration that has
/// started always runs to completion.
#[derive(Debug, Clone)]
pub struct Ticker {
    name: &'static str,
    period: Duration,
}

impl Ticker {
    pub fn new(name: &'static str, period: Duration) -> Self {
        Ticker { name, period }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn spawn<F, Fut>(self, mut shutdown: watch::Receiver<bool>, mut task: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut timer = interval(self.period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            log::info!("{} ticker started ({:?})", self.name, self.period);

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = timer.tick() => {
                        log::debug!("{} tick", self.name);
                        task().await;
                    }
                    changed = shutdown.changed() => {
                        // A dropped sender means nobody can stop us any more; stop now.
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            log::info!("{} ticker stopped", self.name);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_every_period() {
        let (tx, rx) = watch::channel(false);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = Ticker::new("test", Duration::from_secs(30)).spawn(rx, move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);

        tx.send(true).unwrap();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_iteration_finishes_before_exit() {
        let (tx, rx) = watch::channel(false);
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        let handle = Ticker::new("slow", Duration::from_secs(60)).spawn(rx, move || {
            let d = Arc::clone(&d);
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                d.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        let handle = Ticker::new("orphan", Duration::from_secs(3600)).spawn(rx, || async {});
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
