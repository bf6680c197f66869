//! Periodic driver for analysis cycles
//!
//! One ticker task fires every interval. A tick only starts a cycle if no
//! other cycle is in flight; otherwise it is skipped and counted, never
//! queued. Stopping aborts the ticker and advances the generation, so a cycle
//! that is still waiting on the reasoning backend finishes but sees a stale
//! token and discards its results.

use log::{debug, info, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Work run on every claimed tick
pub trait AnalysisCycle: Send + Sync + 'static {
    fn run_cycle(&self, token: CycleToken) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Ties a running cycle to the scheduler generation that started it
#[derive(Debug, Clone)]
pub struct CycleToken {
    generation: u64,
    current: Option<Arc<AtomicU64>>,
}

impl CycleToken {
    /// Token for a cycle run outside the scheduler, always current
    pub fn detached() -> Self {
        Self {
            generation: 0,
            current: None,
        }
    }

    /// Whether the scheduler that started this cycle has not been stopped since
    pub fn is_current(&self) -> bool {
        match &self.current {
            Some(current) => current.load(Ordering::SeqCst) == self.generation,
            None => true,
        }
    }
}

/// Held for the duration of one cycle; resets the in-flight flag on drop,
/// even on panic or abort
#[derive(Debug)]
pub struct FlightGuard(Arc<AtomicBool>);

impl FlightGuard {
    fn claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ObserverScheduler {
    interval: Duration,
    ticker: Option<JoinHandle<()>>,
    cycle_running: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
}

impl ObserverScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ticker: None,
            cycle_running: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            skipped: Arc::new(AtomicU64::new(0)),
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start ticking, returning `false` if already running or no tokio
    /// runtime is available
    pub fn start(&mut self, runner: Arc<dyn AnalysisCycle>) -> bool {
        if self.is_running() {
            debug!("Scheduler already running, ignoring start");
            return false;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Cannot start scheduler outside a tokio runtime: {}", e);
                return false;
            }
        };

        let period = self.interval;
        let generation = self.generation.load(Ordering::SeqCst);
        let current = Arc::clone(&self.generation);
        let cycle_running = Arc::clone(&self.cycle_running);
        let skipped = Arc::clone(&self.skipped);
        let completed = Arc::clone(&self.completed);

        self.ticker = Some(handle.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let Some(guard) = FlightGuard::claim(&cycle_running) else {
                    let total = skipped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(
                        "Previous analysis cycle still running, skipping tick ({} skipped)",
                        total
                    );
                    continue;
                };

                let runner = Arc::clone(&runner);
                let completed = Arc::clone(&completed);
                let token = CycleToken {
                    generation,
                    current: Some(Arc::clone(&current)),
                };

                tokio::spawn(async move {
                    let _guard = guard;
                    runner.run_cycle(token).await;
                    completed.fetch_add(1, Ordering::Relaxed);
                });
            }
        }));

        info!("Scheduler started with interval {:?}", period);
        true
    }

    /// Cancel the ticker and invalidate tokens of in-flight cycles
    pub fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
            info!("Scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker
            .as_ref()
            .is_some_and(|ticker| !ticker.is_finished())
    }

    /// Claim the single-flight slot for a cycle run outside the ticker
    ///
    /// Returns `None` while another cycle is in flight. Ticks that fire while
    /// the guard is held are skipped.
    pub fn try_claim(&self) -> Option<FlightGuard> {
        FlightGuard::claim(&self.cycle_running)
    }

    /// Whether a cycle is still in flight
    pub fn is_cycle_running(&self) -> bool {
        self.cycle_running.load(Ordering::Acquire)
    }

    /// Takes effect on the next `start`
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Ticks dropped because a cycle was still in flight
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn completed_cycles(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

impl Drop for ObserverScheduler {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct TestCycle {
        started: AtomicUsize,
        release: Option<Arc<Notify>>,
        token_currency: Mutex<Vec<bool>>,
    }

    impl TestCycle {
        fn blocking(release: Arc<Notify>) -> Self {
            Self {
                release: Some(release),
                ..Default::default()
            }
        }

        fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }
    }

    impl AnalysisCycle for TestCycle {
        fn run_cycle(&self, token: CycleToken) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            Box::pin(async move {
                self.started.fetch_add(1, Ordering::SeqCst);
                if let Some(release) = &self.release {
                    release.notified().await;
                }
                self.token_currency.lock().unwrap().push(token.is_current());
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_run_every_interval() {
        let cycle = Arc::new(TestCycle::default());
        let mut scheduler = ObserverScheduler::new(Duration::from_secs(1));

        assert!(scheduler.start(cycle.clone()));
        time::sleep(Duration::from_millis(3_500)).await;

        assert_eq!(cycle.started(), 3);
        assert_eq!(scheduler.completed_cycles(), 3);
        assert_eq!(scheduler.skipped_ticks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_one_interval() {
        let cycle = Arc::new(TestCycle::default());
        let mut scheduler = ObserverScheduler::new(Duration::from_secs(30));

        scheduler.start(cycle.clone());
        time::sleep(Duration::from_secs(29)).await;
        assert_eq!(cycle.started(), 0);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cycle.started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_noop_when_running() {
        let cycle = Arc::new(TestCycle::default());
        let mut scheduler = ObserverScheduler::new(Duration::from_secs(1));

        assert!(scheduler.start(cycle.clone()));
        assert!(!scheduler.start(cycle.clone()));
        assert!(scheduler.is_running());

        time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(cycle.started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_ticks_are_skipped_not_queued() {
        let release = Arc::new(Notify::new());
        let cycle = Arc::new(TestCycle::blocking(release.clone()));
        let mut scheduler = ObserverScheduler::new(Duration::from_secs(1));

        scheduler.start(cycle.clone());
        time::sleep(Duration::from_millis(5_500)).await;

        assert_eq!(cycle.started(), 1);
        assert!(scheduler.is_cycle_running());
        assert_eq!(scheduler.skipped_ticks(), 4);

        release.notify_one();
        time::sleep(Duration::from_millis(100)).await;
        assert!(!scheduler.is_cycle_running());

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cycle.started(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_cycle() {
        let release = Arc::new(Notify::new());
        let cycle = Arc::new(TestCycle::blocking(release.clone()));
        let mut scheduler = ObserverScheduler::new(Duration::from_secs(1));

        scheduler.start(cycle.clone());
        time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(cycle.started(), 1);

        scheduler.stop();
        assert!(!scheduler.is_running());

        release.notify_one();
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*cycle.token_currency.lock().unwrap(), vec![false]);

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(cycle.started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_uses_new_interval() {
        let cycle = Arc::new(TestCycle::default());
        let mut scheduler = ObserverScheduler::new(Duration::from_secs(1));

        scheduler.start(cycle.clone());
        scheduler.stop();
        scheduler.set_interval(Duration::from_secs(10));
        assert!(scheduler.start(cycle.clone()));

        time::sleep(Duration::from_secs(9)).await;
        assert_eq!(cycle.started(), 0);
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cycle.started(), 1);
        assert_eq!(*cycle.token_currency.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_start_without_runtime_is_refused() {
        let cycle = Arc::new(TestCycle::default());
        let mut scheduler = ObserverScheduler::new(Duration::from_secs(1));
        assert!(!scheduler.start(cycle));
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_claimed_slot_blocks_ticks() {
        let cycle = Arc::new(TestCycle::default());
        let mut scheduler = ObserverScheduler::new(Duration::from_secs(1));

        let guard = scheduler.try_claim().unwrap();
        assert!(scheduler.try_claim().is_none());
        scheduler.start(cycle.clone());
        time::sleep(Duration::from_millis(2_500)).await;

        assert_eq!(cycle.started(), 0);
        assert_eq!(scheduler.skipped_ticks(), 2);

        drop(guard);
        assert!(!scheduler.is_cycle_running());
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cycle.started(), 1);
    }

    #[test]
    fn test_detached_token_is_always_current() {
        assert!(CycleToken::detached().is_current());
    }
}
