//! Timer callback list
//!
//! Timed callbacks that drive the reactor's sleep. Entries are kept in
//! registration order and fire in that order within a tick.
//!
//! ## Modes
//!
//! - **OneShot**: fires once, then goes `Down`
//! - **Astable**: next expiry = tick start + period (fixed cadence)
//! - **FlipFlop**: next expiry = callback completion + period (self-pacing)
//! - **Off**: disables an entry without removing it
//!
//! An entry is identified by its callback *and* user data: registering the
//! same pair again reconfigures the existing entry in place.
//!
//! The list is generic over the context handed to callbacks, so it can be
//! driven by the reactor ([`crate::Comms`]) or by anything else implementing
//! [`TimerHost`].

use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Timer callback, receiving the host context and the registered user data
pub type TimerCallback<C> = Rc<dyn Fn(&mut C, u64)>;

/// How an entry reschedules after firing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    Off,
    OneShot,
    Astable,
    FlipFlop,
}

/// Whether an entry is armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Up,
    Down,
}

/// Index of an entry in the list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(usize);

struct TimerEntry<C> {
    callback: TimerCallback<C>,
    user_data: u64,
    period_ms: u64,
    mode: TimerMode,
    status: TimerStatus,
    next_expiry: u64,
    /// Bumped on every registration so a callback that reconfigures its own
    /// entry is not overwritten by the post-fire reschedule
    generation: u64,
}

/// Snapshot of an entry's configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerInfo {
    pub user_data: u64,
    pub period_ms: u64,
    pub mode: TimerMode,
    pub status: TimerStatus,
    pub next_expiry: u64,
}

/// Ordered list of timed callbacks
pub struct TimerList<C> {
    entries: Vec<TimerEntry<C>>,
}

impl<C> Default for TimerList<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<C> std::fmt::Debug for TimerList<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerList")
            .field("entries", &self.entries.len())
            .field("armed", &self.armed_count())
            .finish()
    }
}

impl<C> TimerList<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, or reconfigure the one with the same callback and user data
    ///
    /// Callbacks compare by `Rc` allocation, so only a clone of the original
    /// `Rc` reconfigures an entry.
    pub fn register(
        &mut self,
        period_ms: u64,
        mode: TimerMode,
        user_data: u64,
        callback: TimerCallback<C>,
        now: u64,
    ) -> TimerId {
        let status = if mode == TimerMode::Off {
            TimerStatus::Down
        } else {
            TimerStatus::Up
        };

        let existing = self.entries.iter().position(|e| {
            e.user_data == user_data && std::ptr::addr_eq(Rc::as_ptr(&e.callback), Rc::as_ptr(&callback))
        });

        match existing {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                entry.period_ms = period_ms;
                entry.mode = mode;
                entry.status = status;
                entry.next_expiry = now.saturating_add(period_ms);
                entry.generation += 1;
                tracing::debug!(timer = idx, ?mode, period_ms, "timer reconfigured");
                TimerId(idx)
            }
            None => {
                self.entries.push(TimerEntry {
                    callback,
                    user_data,
                    period_ms,
                    mode,
                    status,
                    next_expiry: now.saturating_add(period_ms),
                    generation: 0,
                });
                let idx = self.entries.len() - 1;
                tracing::debug!(timer = idx, ?mode, period_ms, "timer registered");
                TimerId(idx)
            }
        }
    }

    /// Entries due at `now`, in list order
    pub fn due(&self, now: u64) -> Vec<TimerId> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == TimerStatus::Up && e.next_expiry <= now)
            .map(|(idx, _)| TimerId(idx))
            .collect()
    }

    /// Milliseconds until the earliest armed expiry, capped at `cap`
    pub fn next_wait(&self, now: u64, cap: u64) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.status == TimerStatus::Up)
            .map(|e| e.next_expiry.saturating_sub(now))
            .min()
            .map_or(cap, |wait| wait.min(cap))
    }

    pub fn info(&self, id: TimerId) -> Option<TimerInfo> {
        self.entries.get(id.0).map(|e| TimerInfo {
            user_data: e.user_data,
            period_ms: e.period_ms,
            mode: e.mode,
            status: e.status,
            next_expiry: e.next_expiry,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn armed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == TimerStatus::Up)
            .count()
    }

    fn prepare_fire(&self, id: TimerId) -> Option<(TimerCallback<C>, u64, u64)> {
        let entry = self.entries.get(id.0)?;
        (entry.status == TimerStatus::Up)
            .then(|| (entry.callback.clone(), entry.user_data, entry.generation))
    }

    fn reschedule(&mut self, id: TimerId, generation: u64, tick_start: u64, completed: u64) {
        let Some(entry) = self.entries.get_mut(id.0) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        match entry.mode {
            TimerMode::Astable => entry.next_expiry = tick_start.saturating_add(entry.period_ms),
            TimerMode::FlipFlop => entry.next_expiry = completed.saturating_add(entry.period_ms),
            TimerMode::OneShot | TimerMode::Off => entry.status = TimerStatus::Down,
        }
    }
}

/// Context that owns a timer list and a time source
pub trait TimerHost: Sized {
    fn timers_mut(&mut self) -> &mut TimerList<Self>;

    fn now_ms(&self) -> u64;
}

/// Fire every due entry in list order and return the wait until the next one
///
/// Returns `cap` when no entry is armed.
pub fn run_due<H: TimerHost>(host: &mut H, cap: u64) -> u64 {
    let tick_start = host.now_ms();
    let due = host.timers_mut().due(tick_start);

    for id in due {
        let Some((callback, user_data, generation)) = host.timers_mut().prepare_fire(id) else {
            continue;
        };
        callback(host, user_data);
        let completed = host.now_ms();
        host.timers_mut()
            .reschedule(id, generation, tick_start, completed);
    }

    let now = host.now_ms();
    host.timers_mut().next_wait(now, cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    struct Host {
        timers: TimerList<Host>,
        clock: ManualClock,
        fired: Vec<(u64, u64)>,
        rearm: Option<TimerCallback<Host>>,
    }

    impl Host {
        fn new() -> Self {
            Self {
                timers: TimerList::new(),
                clock: ManualClock::new(1000),
                fired: Vec::new(),
                rearm: None,
            }
        }

        fn register(&mut self, period: u64, mode: TimerMode, data: u64, cb: TimerCallback<Host>) -> TimerId {
            let now = self.clock.now_ms();
            self.timers.register(period, mode, data, cb, now)
        }
    }

    impl TimerHost for Host {
        fn timers_mut(&mut self) -> &mut TimerList<Self> {
            &mut self.timers
        }

        fn now_ms(&self) -> u64 {
            self.clock.now_ms()
        }
    }

    fn recorder() -> TimerCallback<Host> {
        Rc::new(|host: &mut Host, data: u64| {
            let now = host.clock.now_ms();
            host.fired.push((now, data));
        })
    }

    #[test]
    fn test_one_shot_fires_once() {
        let mut host = Host::new();
        host.register(10, TimerMode::OneShot, 1, recorder());

        for _ in 0..1000 {
            host.clock.advance(1);
            run_due(&mut host, 100);
        }

        assert_eq!(host.fired, vec![(1010, 1)]);
    }

    #[test]
    fn test_astable_fixed_cadence_despite_slow_callback() {
        let mut host = Host::new();
        let slow: TimerCallback<Host> = Rc::new(|host: &mut Host, data: u64| {
            let now = host.clock.now_ms();
            host.fired.push((now, data));
            host.clock.advance(7);
        });
        host.register(20, TimerMode::Astable, 0, slow);

        let t0 = 1000;
        for k in 1..=5 {
            host.clock.set(t0 + 20 * k);
            run_due(&mut host, 1000);
        }

        let times: Vec<u64> = host.fired.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![1020, 1040, 1060, 1080, 1100]);
    }

    #[test]
    fn test_flip_flop_paces_from_completion() {
        let mut host = Host::new();
        let slow: TimerCallback<Host> = Rc::new(|host: &mut Host, data: u64| {
            let now = host.clock.now_ms();
            host.fired.push((now, data));
            host.clock.advance(15);
        });
        let id = host.register(20, TimerMode::FlipFlop, 0, slow);

        host.clock.set(1020);
        run_due(&mut host, 1000);
        // callback finished at 1035
        assert_eq!(host.timers.info(id).unwrap().next_expiry, 1055);

        host.clock.set(1040);
        run_due(&mut host, 1000);
        assert_eq!(host.fired.len(), 1);

        host.clock.set(1055);
        run_due(&mut host, 1000);
        assert_eq!(host.fired.len(), 2);
        assert_eq!(host.fired[1].0, 1055);
    }

    #[test]
    fn test_same_callback_and_data_reconfigures() {
        let mut host = Host::new();
        let cb = recorder();
        let a = host.register(10, TimerMode::Astable, 5, cb.clone());
        let b = host.register(50, TimerMode::OneShot, 5, cb.clone());
        let c = host.register(10, TimerMode::Astable, 6, cb);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(host.timers.len(), 2);
        let info = host.timers.info(a).unwrap();
        assert_eq!(info.period_ms, 50);
        assert_eq!(info.mode, TimerMode::OneShot);
    }

    #[test]
    fn test_off_disables_without_removing() {
        let mut host = Host::new();
        let cb = recorder();
        let id = host.register(10, TimerMode::Astable, 1, cb.clone());
        host.register(10, TimerMode::Off, 1, cb.clone());

        assert_eq!(host.timers.len(), 1);
        assert_eq!(host.timers.info(id).unwrap().status, TimerStatus::Down);

        host.clock.advance(100);
        run_due(&mut host, 100);
        assert!(host.fired.is_empty());

        host.register(10, TimerMode::Astable, 1, cb);
        assert_eq!(host.timers.info(id).unwrap().status, TimerStatus::Up);
    }

    #[test]
    fn test_simultaneous_timers_fire_in_registration_order() {
        let mut host = Host::new();
        host.register(30, TimerMode::OneShot, 1, recorder());
        host.register(10, TimerMode::OneShot, 2, recorder());
        host.register(20, TimerMode::OneShot, 3, recorder());

        host.clock.advance(30);
        run_due(&mut host, 100);

        let order: Vec<u64> = host.fired.iter().map(|(_, d)| *d).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_next_wait_is_min_capped() {
        let mut host = Host::new();
        assert_eq!(run_due(&mut host, 500), 500);

        host.register(300, TimerMode::Astable, 1, recorder());
        host.register(120, TimerMode::Astable, 2, recorder());
        assert_eq!(run_due(&mut host, 500), 120);
        assert_eq!(run_due(&mut host, 50), 50);

        host.clock.advance(100);
        assert_eq!(run_due(&mut host, 500), 20);
    }

    #[test]
    fn test_callback_can_rearm_its_own_one_shot() {
        let mut host = Host::new();
        let cb: TimerCallback<Host> = Rc::new(|host: &mut Host, data: u64| {
            let now = host.clock.now_ms();
            host.fired.push((now, data));
            if host.fired.len() < 3 {
                if let Some(me) = host.rearm.clone() {
                    host.timers.register(10, TimerMode::OneShot, data, me, now);
                }
            }
        });
        host.rearm = Some(cb.clone());
        let id = host.register(10, TimerMode::OneShot, 9, cb);

        for _ in 0..100 {
            host.clock.advance(1);
            run_due(&mut host, 100);
        }

        let times: Vec<u64> = host.fired.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![1010, 1020, 1030]);
        assert_eq!(host.timers.len(), 1);
        assert_eq!(host.timers.info(id).unwrap().status, TimerStatus::Down);
    }

    #[test]
    fn test_huge_period_never_wraps() {
        let mut host = Host::new();
        let id = host.register(u64::MAX, TimerMode::OneShot, 1, recorder());
        assert_eq!(host.timers.info(id).unwrap().next_expiry, u64::MAX);

        host.clock.advance(1_000_000);
        assert_eq!(run_due(&mut host, 100), 100);
        assert!(host.fired.is_empty());
    }

    #[test]
    fn test_reschedule_saturates_at_end_of_time() {
        let mut host = Host::new();
        host.clock.set(u64::MAX - 10);
        let id = host.register(20, TimerMode::Astable, 2, recorder());
        assert_eq!(host.timers.info(id).unwrap().next_expiry, u64::MAX);

        host.clock.set(u64::MAX);
        run_due(&mut host, 100);
        assert_eq!(host.fired, vec![(u64::MAX, 2)]);
        assert_eq!(host.timers.info(id).unwrap().next_expiry, u64::MAX);
    }

    #[test]
    fn test_fresh_rc_is_a_new_timer() {
        let mut host = Host::new();
        let a = host.register(10, TimerMode::Astable, 1, recorder());
        let b = host.register(10, TimerMode::Astable, 1, recorder());

        assert_ne!(a, b);
        assert_eq!(host.timers.len(), 2);
    }
}
