use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time fixed at construction, advanced by the monotonic clock.
/// Jumps of the system clock after start-up do not move it.
#[derive(Debug, Clone, Copy)]
pub struct AnchoredClock {
    anchor: DateTime<Utc>,
    origin: Instant,
}

impl AnchoredClock {
    pub fn new(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            origin: Instant::now(),
        }
    }

    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor + elapsed
    }
}

/// Seconds left of a `duration_minutes` test started at `start`, clamped to
/// `0..=duration`.
pub fn remaining_seconds(duration_minutes: u32, start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let total = i64::from(duration_minutes) * 60;
    let elapsed = now.signed_duration_since(start).num_seconds().max(0);
    (total - elapsed).clamp(0, total)
}

pub fn elapsed_seconds(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(start).num_seconds().max(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    /// Test countdown, and the delayed auto-submit retry after expiry.
    Countdown,
    RedirectTicker,
    RedirectTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    Tick(i64),
    TimeExpired,
    RetrySubmit,
    RedirectTick(u32),
    RedirectDue,
}

/// A timer event tagged with the arming it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheduled {
    pub slot: TimerSlot,
    pub ticket: u64,
    pub event: TimerEvent,
}

/// Owns every scheduled task of a session. Re-arming a slot aborts its
/// previous task; dropping the registry aborts all of them.
#[derive(Debug)]
pub struct Timers {
    tx: UnboundedSender<Scheduled>,
    next_ticket: u64,
    slots: HashMap<TimerSlot, (u64, JoinHandle<()>)>,
}

impl Timers {
    pub fn new(tx: UnboundedSender<Scheduled>) -> Self {
        Self {
            tx,
            next_ticket: 0,
            slots: HashMap::new(),
        }
    }

    fn arm<F>(&mut self, slot: TimerSlot, spawn: F)
    where
        F: FnOnce(UnboundedSender<Scheduled>, u64) -> JoinHandle<()>,
    {
        self.cancel(slot);
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let handle = spawn(self.tx.clone(), ticket);
        self.slots.insert(slot, (ticket, handle));
    }

    pub fn start_countdown(
        &mut self,
        start: DateTime<Utc>,
        duration_minutes: u32,
        clock: Arc<dyn Clock>,
    ) {
        self.arm(TimerSlot::Countdown, move |tx, ticket| {
            tokio::spawn(run_countdown(start, duration_minutes, clock, tx, ticket))
        });
    }

    pub fn schedule_retry(&mut self, delay: Duration) {
        self.arm(TimerSlot::Countdown, move |tx, ticket| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Scheduled {
                    slot: TimerSlot::Countdown,
                    ticket,
                    event: TimerEvent::RetrySubmit,
                });
            })
        });
    }

    /// Arms the visible countdown and the redirect itself.
    pub fn start_redirect(&mut self, secs: u32) {
        self.arm(TimerSlot::RedirectTicker, move |tx, ticket| {
            tokio::spawn(run_redirect_ticker(secs, tx, ticket))
        });
        self.arm(TimerSlot::RedirectTimeout, move |tx, ticket| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(u64::from(secs))).await;
                let _ = tx.send(Scheduled {
                    slot: TimerSlot::RedirectTimeout,
                    ticket,
                    event: TimerEvent::RedirectDue,
                });
            })
        });
    }

    pub fn cancel(&mut self, slot: TimerSlot) {
        if let Some((_, handle)) = self.slots.remove(&slot) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.slots.drain() {
            handle.abort();
        }
    }

    pub fn is_armed(&self, slot: TimerSlot) -> bool {
        self.slots.contains_key(&slot)
    }

    /// False for events from a cancelled or replaced timer.
    pub fn is_current(&self, scheduled: &Scheduled) -> bool {
        self.slots
            .get(&scheduled.slot)
            .is_some_and(|(ticket, _)| *ticket == scheduled.ticket)
    }

    /// Forgets a one-shot timer that has fired.
    pub fn release(&mut self, slot: TimerSlot) {
        self.slots.remove(&slot);
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn run_countdown(
    start: DateTime<Utc>,
    duration_minutes: u32,
    clock: Arc<dyn Clock>,
    tx: UnboundedSender<Scheduled>,
    ticket: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let secs = remaining_seconds(duration_minutes, start, clock.now());
        let event = if secs <= 0 {
            TimerEvent::TimeExpired
        } else {
            TimerEvent::Tick(secs)
        };
        let expired = event == TimerEvent::TimeExpired;

        if tx
            .send(Scheduled {
                slot: TimerSlot::Countdown,
                ticket,
                event,
            })
            .is_err()
            || expired
        {
            break;
        }
    }
}

async fn run_redirect_ticker(secs: u32, tx: UnboundedSender<Scheduled>, ticket: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    for left in (1..=secs).rev() {
        interval.tick().await;
        let sent = tx.send(Scheduled {
            slot: TimerSlot::RedirectTicker,
            ticket,
            event: TimerEvent::RedirectTick(left),
        });
        if sent.is_err() {
            break;
        }
    }
}

/// `m:ss`, as shown next to the question.
pub fn format_clock(total_secs: i64) -> String {
    let total_secs = total_secs.max(0);
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}

pub fn format_duration(total_secs: i64) -> String {
    if total_secs <= 0 {
        return "0s".to_string();
    }
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    #[test]
    fn remaining_is_zero_once_duration_elapsed() {
        for minutes in [1u32, 5, 45, 480] {
            let total = i64::from(minutes) * 60;
            for extra in [0, 1, 59, 3600] {
                assert_eq!(remaining_seconds(minutes, at(0), at(total + extra)), 0);
            }
        }
    }

    #[test]
    fn remaining_never_exceeds_duration_on_clock_skew() {
        assert_eq!(remaining_seconds(2, at(30), at(0)), 120);
    }

    #[test]
    fn remaining_counts_down_whole_seconds() {
        assert_eq!(remaining_seconds(1, at(0), at(0)), 60);
        assert_eq!(remaining_seconds(1, at(0), at(59)), 1);
        assert_eq!(
            remaining_seconds(1, at(0), at(0) + chrono::Duration::milliseconds(59_500)),
            1
        );
        assert_eq!(remaining_seconds(1, at(0), at(60)), 0);
    }

    #[test]
    fn clock_format() {
        assert_eq!(format_clock(0), "0:00");
        assert_eq!(format_clock(65), "1:05");
        assert_eq!(format_clock(3600), "60:00");
        assert_eq!(format_clock(-4), "0:00");
        assert_eq!(format_duration(3725), "1h 02m 05s");
        assert_eq!(format_duration(42), "42s");
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_expires_once_and_stops() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        let clock = Arc::new(AnchoredClock::new(at(0)));
        timers.start_countdown(at(0), 1, clock);

        let mut ticks = 0;
        let mut expiries = 0;
        while let Ok(Some(scheduled)) =
            tokio::time::timeout(Duration::from_secs(5), rx.recv()).await
        {
            match scheduled.event {
                TimerEvent::Tick(_) => ticks += 1,
                TimerEvent::TimeExpired => expiries += 1,
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(ticks, 60);
        assert_eq!(expiries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_countdown_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.start_countdown(at(0), 1, Arc::new(AnchoredClock::new(at(0))));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, TimerEvent::Tick(60));
        timers.cancel_all();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
        assert!(!timers.is_current(&first));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_invalidates_earlier_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        let clock: Arc<dyn Clock> = Arc::new(AnchoredClock::new(at(0)));
        timers.start_countdown(at(0), 1, clock.clone());
        let stale = rx.recv().await.unwrap();

        timers.start_countdown(at(0), 1, clock);
        let fresh = rx.recv().await.unwrap();

        assert!(!timers.is_current(&stale));
        assert!(timers.is_current(&fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn redirect_counts_down_then_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.start_redirect(3);

        let mut seen = Vec::new();
        while let Some(scheduled) = rx.recv().await {
            let due = scheduled.event == TimerEvent::RedirectDue;
            seen.push(scheduled.event);
            if due {
                break;
            }
        }

        assert_eq!(
            seen,
            vec![
                TimerEvent::RedirectTick(3),
                TimerEvent::RedirectTick(2),
                TimerEvent::RedirectTick(1),
                TimerEvent::RedirectDue,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_registry_aborts_tasks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut timers = Timers::new(tx);
            timers.start_redirect(30);
            let _ = rx.recv().await;
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
        let mut remaining = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            remaining.push(ev);
        }
        assert!(remaining.is_empty());
        assert!(rx.recv().await.is_none());
    }
}
