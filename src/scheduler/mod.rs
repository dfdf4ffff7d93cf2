use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

const TICK: Duration = Duration::from_secs(1);

type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// What the UI shows next to the refresh button.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleState {
    pub last_refresh: Option<DateTime<Local>>,
    pub countdown_secs: u64,
    pub paused: bool,
    pub interval: Duration,
    pub refresh_count: u64,
}

impl ScheduleState {
    fn new(interval: Duration) -> Self {
        Self {
            last_refresh: None,
            countdown_secs: countdown_for(interval),
            paused: false,
            interval,
            refresh_count: 0,
        }
    }
}

#[derive(Debug)]
enum Command {
    Refresh,
    Pause,
    Resume,
    SetInterval(Duration),
}

/// Whole seconds, rounded up.
fn countdown_for(interval: Duration) -> u64 {
    let millis = interval.as_millis().div_ceil(1_000);
    u64::try_from(millis).unwrap_or(u64::MAX).max(1)
}

fn ticker() -> Interval {
    let mut ticker = interval_at(Instant::now() + TICK, TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}

/// Countdown-driven periodic refresh.
///
/// One background task owns the one-second ticker, the countdown and the
/// published [`ScheduleState`]. Handles talk to it over a command channel, so
/// there is never more than one active ticker per scheduler. Dropping the
/// handle stops the ticker.
pub struct RefreshScheduler {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ScheduleState>,
    task: JoinHandle<()>,
}

impl RefreshScheduler {
    /// Start counting down from `interval`; `on_refresh` runs each time the
    /// countdown reaches zero or [`refresh`](Self::refresh) is called.
    pub fn start<F, Fut>(interval: Duration, on_refresh: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: RefreshFn = Arc::new(move || on_refresh().boxed());
        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ScheduleState::new(interval));
        let task = tokio::spawn(drive(receiver, state_tx, callback));
        log::info!("refresh scheduler started with {}s interval", interval.as_secs());

        Self {
            commands,
            state,
            task,
        }
    }

    /// Refresh now and restart the countdown.
    pub fn refresh(&self) {
        self.send(Command::Refresh);
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    /// Change the interval; the countdown restarts from the new value.
    pub fn set_interval(&self, interval: Duration) {
        self.send(Command::SetInterval(interval));
    }

    pub fn state(&self) -> ScheduleState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScheduleState> {
        self.state.clone()
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::debug!("refresh scheduler already stopped");
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive(
    mut commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ScheduleState>,
    on_refresh: RefreshFn,
) {
    let mut ticker = Some(ticker());

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Refresh => fire(&state_tx, &on_refresh, "manual"),
                    Command::Pause => {
                        ticker = None;
                        state_tx.send_modify(|state| state.paused = true);
                    }
                    Command::Resume => {
                        if ticker.is_none() {
                            ticker = Some(self::ticker());
                        }
                        state_tx.send_modify(|state| state.paused = false);
                    }
                    Command::SetInterval(interval) => {
                        state_tx.send_modify(|state| {
                            state.interval = interval;
                            state.countdown_secs = countdown_for(interval);
                        });
                        if ticker.is_some() {
                            ticker = Some(self::ticker());
                        }
                    }
                }
            }
            _ = next_tick(&mut ticker) => {
                let mut due = false;
                state_tx.send_modify(|state| {
                    state.countdown_secs = state.countdown_secs.saturating_sub(1);
                    due = state.countdown_secs == 0;
                });
                if due {
                    fire(&state_tx, &on_refresh, "scheduled");
                }
            }
        }
    }
}

fn fire(state_tx: &watch::Sender<ScheduleState>, on_refresh: &RefreshFn, reason: &str) {
    state_tx.send_modify(|state| {
        state.countdown_secs = countdown_for(state.interval);
        state.last_refresh = Some(Local::now());
        state.refresh_count += 1;
    });
    log::debug!("{reason} refresh triggered");
    tokio::spawn(on_refresh());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn counting(interval: Duration) -> (RefreshScheduler, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let scheduler = RefreshScheduler::start(interval, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (scheduler, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_and_fires_at_zero() {
        let (scheduler, calls) = counting(Duration::from_secs(3));
        assert_eq!(scheduler.state().countdown_secs, 3);

        sleep(Duration::from_millis(1_500)).await;
        assert_eq!(scheduler.state().countdown_secs, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(2)).await;
        let state = scheduler.state();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.countdown_secs, 3);
        assert!(state.last_refresh.is_some());

        sleep(Duration::from_secs(3)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_refresh_resets_countdown() {
        let (scheduler, calls) = counting(Duration::from_secs(10));

        sleep(Duration::from_millis(4_500)).await;
        assert_eq!(scheduler.state().countdown_secs, 6);

        scheduler.refresh();
        sleep(Duration::from_millis(10)).await;
        let state = scheduler.state();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.countdown_secs, 10);
        assert_eq!(state.refresh_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_countdown_and_timestamp() {
        let (scheduler, calls) = counting(Duration::from_secs(3));

        sleep(Duration::from_millis(3_500)).await;
        let before = scheduler.state();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        scheduler.pause();
        sleep(Duration::from_secs(30)).await;
        let paused = scheduler.state();
        assert!(paused.paused);
        assert_eq!(paused.countdown_secs, before.countdown_secs);
        assert_eq!(paused.last_refresh, before.last_refresh);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        scheduler.resume();
        sleep(Duration::from_millis(3_500)).await;
        assert!(!scheduler.state().paused);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn changing_interval_restarts_countdown() {
        let (scheduler, calls) = counting(Duration::from_secs(60));

        sleep(Duration::from_millis(2_500)).await;
        scheduler.set_interval(Duration::from_secs(5));
        sleep(Duration::from_millis(10)).await;
        let state = scheduler.state();
        assert_eq!(state.countdown_secs, 5);
        assert_eq!(state.interval, Duration::from_secs(5));

        sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_resume_keeps_a_single_ticker() {
        let (scheduler, calls) = counting(Duration::from_secs(10));

        scheduler.resume();
        scheduler.resume();
        sleep(Duration::from_millis(2_500)).await;
        assert_eq!(scheduler.state().countdown_secs, 8);

        scheduler.pause();
        scheduler.resume();
        scheduler.resume();
        sleep(Duration::from_millis(2_000)).await;
        assert_eq!(scheduler.state().countdown_secs, 6);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn countdown_rounds_partial_seconds_up() {
        assert_eq!(countdown_for(Duration::from_millis(1_500)), 2);
        assert_eq!(countdown_for(Duration::from_millis(60_000)), 60);
        assert_eq!(countdown_for(Duration::ZERO), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_stops_refreshes() {
        let (scheduler, calls) = counting(Duration::from_secs(1));
        drop(scheduler);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
