//! Usage governor: per-caller sliding-window rate limiting with escalating
//! temporary bans.

pub mod clock;
pub mod sweeper;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::domain::caller::CallerId;

pub use clock::{Clock, ManualClock, SystemClock};
pub use sweeper::{GovernorSweeper, SweeperHandle};

pub const MINOR_BAN_SECS: u64 = 60;
pub const MODERATE_BAN_SECS: u64 = 600;
pub const SEVERE_BAN_SECS: u64 = 3600;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct GovernorConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self { max_requests: 10, window_seconds: 60 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateState {
    pub request_timestamps: VecDeque<DateTime<Utc>>,
    pub banned_until: Option<DateTime<Utc>>,
}

impl RateState {
    fn evict_before(&mut self, window_start: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        while self.request_timestamps.front().is_some_and(|oldest| *oldest < window_start) {
            self.request_timestamps.pop_front();
            evicted += 1;
        }
        evicted
    }

    fn in_window(&self, window_start: DateTime<Utc>) -> usize {
        self.request_timestamps.iter().filter(|at| **at >= window_start).count()
    }

    fn active_ban(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.banned_until.filter(|until| *until > now)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: u32 },
    Banned { until: DateTime<Utc> },
    Throttled { ban_secs: u64, until: DateTime<Utc> },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Whole seconds until the caller may retry, rounded up.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        match self {
            Self::Allowed { .. } => 0,
            Self::Throttled { ban_secs, .. } => *ban_secs,
            Self::Banned { until } => ceil_secs(*until - now),
        }
    }
}

/// Ban length for a denial, from the window size before the denied attempt.
pub fn penalty_secs(window_len: usize, max_requests: u32) -> u64 {
    let max = max_requests as usize;
    if window_len >= max.saturating_mul(3) {
        SEVERE_BAN_SECS
    } else if window_len >= max.saturating_mul(2) {
        MODERATE_BAN_SECS
    } else {
        MINOR_BAN_SECS
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CallerStatus {
    pub caller_id: String,
    pub recent_requests: usize,
    pub max_requests: u32,
    pub window_seconds: u64,
    pub remaining_requests: u32,
    pub is_banned: bool,
    pub ban_expires: Option<DateTime<Utc>>,
    pub ban_time_remaining_secs: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GovernorStatistics {
    pub active_callers: usize,
    pub total_recent_requests: usize,
    pub active_bans: usize,
    pub max_requests_per_window: u32,
    pub window_seconds: u64,
    pub tracked_callers: usize,
    pub total_ban_entries: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub evicted_timestamps: usize,
    pub expired_bans: usize,
    pub removed_callers: usize,
}

pub struct UsageGovernor {
    config: GovernorConfig,
    clock: Arc<dyn Clock>,
    callers: Mutex<HashMap<CallerId, RateState>>,
}

impl UsageGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: GovernorConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            event_name = "core.governor.initialized",
            max_requests = config.max_requests,
            window_seconds = config.window_seconds,
            "usage governor initialized"
        );
        Self { config, clock, callers: Mutex::new(HashMap::new()) }
    }

    pub fn config(&self) -> GovernorConfig {
        self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn admit(&self, caller: &CallerId) -> bool {
        self.evaluate(caller).is_allowed()
    }

    pub fn evaluate(&self, caller: &CallerId) -> Admission {
        let now = self.clock.now();
        let Some(mut callers) = self.lock("evaluate") else {
            return Admission::Allowed { remaining: self.config.max_requests };
        };
        let state = callers.entry(caller.clone()).or_default();

        if let Some(until) = state.active_ban(now) {
            warn!(
                event_name = "core.governor.banned",
                caller_id = %caller,
                banned_until = %until,
                "caller is temporarily banned"
            );
            return Admission::Banned { until };
        }
        state.banned_until = None;

        state.evict_before(self.window_start(now));
        let window_len = state.request_timestamps.len();

        if window_len >= self.config.max_requests as usize {
            let ban_secs = penalty_secs(window_len, self.config.max_requests);
            let until = ban_expiry(now, ban_secs);
            state.banned_until = Some(until);
            warn!(
                event_name = "core.governor.throttled",
                caller_id = %caller,
                window_len,
                window_seconds = self.config.window_seconds,
                ban_secs,
                "rate limit exceeded; temporary ban applied"
            );
            return Admission::Throttled { ban_secs, until };
        }

        state.request_timestamps.push_back(now);
        let used = u32::try_from(window_len + 1).unwrap_or(u32::MAX);
        Admission::Allowed { remaining: self.config.max_requests.saturating_sub(used) }
    }

    /// Read-only snapshot of one caller.
    pub fn status(&self, caller: &CallerId) -> CallerStatus {
        let now = self.clock.now();
        let window_start = self.window_start(now);
        let (recent_requests, ban_expires) = self
            .lock("status")
            .and_then(|callers| {
                callers.get(caller).map(|state| (state.in_window(window_start), state.active_ban(now)))
            })
            .unwrap_or((0, None));

        let used = u32::try_from(recent_requests).unwrap_or(u32::MAX);
        CallerStatus {
            caller_id: caller.to_string(),
            recent_requests,
            max_requests: self.config.max_requests,
            window_seconds: self.config.window_seconds,
            remaining_requests: self.config.max_requests.saturating_sub(used),
            is_banned: ban_expires.is_some(),
            ban_expires,
            ban_time_remaining_secs: ban_expires.map_or(0, |until| ceil_secs(until - now)),
        }
    }

    pub fn reset(&self, caller: &CallerId) {
        if let Some(mut callers) = self.lock("reset") {
            callers.remove(caller);
            info!(event_name = "core.governor.reset", caller_id = %caller, "caller limits reset");
        }
    }

    pub fn statistics(&self) -> GovernorStatistics {
        let now = self.clock.now();
        let window_start = self.window_start(now);
        let mut statistics = GovernorStatistics {
            max_requests_per_window: self.config.max_requests,
            window_seconds: self.config.window_seconds,
            ..GovernorStatistics::default()
        };

        let Some(callers) = self.lock("statistics") else {
            return statistics;
        };
        for state in callers.values() {
            let recent = state.in_window(window_start);
            if recent > 0 {
                statistics.active_callers += 1;
                statistics.total_recent_requests += recent;
            }
            if state.active_ban(now).is_some() {
                statistics.active_bans += 1;
            }
            if state.banned_until.is_some() {
                statistics.total_ban_entries += 1;
            }
        }
        statistics.tracked_callers = callers.len();
        statistics
    }

    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let window_start = self.window_start(now);
        let mut report = SweepReport::default();

        let Some(mut callers) = self.lock("sweep") else {
            return report;
        };
        callers.retain(|_, state| {
            report.evicted_timestamps += state.evict_before(window_start);
            if state.banned_until.is_some_and(|until| until <= now) {
                state.banned_until = None;
                report.expired_bans += 1;
            }
            let keep = !state.request_timestamps.is_empty() || state.banned_until.is_some();
            if !keep {
                report.removed_callers += 1;
            }
            keep
        });
        report
    }

    /// Windows reaching past the representable range cover all history.
    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        secs(self.config.window_seconds)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn lock(&self, operation: &'static str) -> Option<MutexGuard<'_, HashMap<CallerId, RateState>>> {
        match self.callers.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                error!(
                    event_name = "core.governor.lock_poisoned",
                    operation,
                    "governor state unavailable; failing open"
                );
                None
            }
        }
    }
}

fn secs(seconds: u64) -> Option<Duration> {
    i64::try_from(seconds).ok().and_then(Duration::try_seconds)
}

fn ban_expiry(now: DateTime<Utc>, ban_secs: u64) -> DateTime<Utc> {
    secs(ban_secs)
        .and_then(|ban| now.checked_add_signed(ban))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn ceil_secs(remaining: Duration) -> u64 {
    let millis = remaining.num_milliseconds().max(0);
    u64::try_from((millis + 999) / 1_000).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{penalty_secs, Admission, GovernorConfig, ManualClock, UsageGovernor};
    use crate::domain::caller::CallerId;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).single().unwrap_or_default()
    }

    fn governor(max_requests: u32, window_seconds: u64) -> (UsageGovernor, ManualClock) {
        let clock = ManualClock::new(start());
        let governor = UsageGovernor::with_clock(
            GovernorConfig { max_requests, window_seconds },
            Arc::new(clock.clone()),
        );
        (governor, clock)
    }

    #[test]
    fn fourth_request_in_window_is_denied_with_minute_ban() {
        let (governor, clock) = governor(3, 60);
        let caller = CallerId::from(42_i64);

        for second in 0..3 {
            clock.set(start() + Duration::seconds(second));
            assert!(governor.admit(&caller), "request at t={second} should pass");
        }

        clock.set(start() + Duration::seconds(3));
        let denied = governor.evaluate(&caller);
        assert_eq!(
            denied,
            Admission::Throttled { ban_secs: 60, until: start() + Duration::seconds(63) }
        );

        clock.set(start() + Duration::seconds(30));
        assert!(!governor.admit(&caller));
        assert_eq!(governor.status(&caller).recent_requests, 3);
    }

    #[test]
    fn expired_ban_is_reevaluated_against_window() {
        let (governor, clock) = governor(3, 60);
        let caller = CallerId::from("alice");

        for _ in 0..3 {
            assert!(governor.admit(&caller));
        }
        assert!(!governor.admit(&caller));

        clock.advance_secs(64);
        assert_eq!(governor.evaluate(&caller), Admission::Allowed { remaining: 2 });
    }

    #[test]
    fn ban_blocks_even_after_window_empties() {
        let (governor, clock) = governor(1, 10);
        let caller = CallerId::from(1_u64);

        assert!(governor.admit(&caller));
        assert!(!governor.admit(&caller));

        clock.advance_secs(30);
        assert!(matches!(governor.evaluate(&caller), Admission::Banned { .. }));

        clock.advance_secs(31);
        assert!(governor.admit(&caller));
    }

    #[test]
    fn callers_are_isolated() {
        let (governor, _clock) = governor(1, 60);

        assert!(governor.admit(&CallerId::from(1_i64)));
        assert!(!governor.admit(&CallerId::from(1_i64)));
        assert!(governor.admit(&CallerId::from(2_i64)));
    }

    #[test]
    fn status_reports_without_mutating() {
        let (governor, clock) = governor(2, 60);
        let caller = CallerId::from(9_i64);

        assert!(governor.admit(&caller));
        assert!(governor.admit(&caller));
        assert!(!governor.admit(&caller));
        clock.advance_secs(20);

        let status = governor.status(&caller);
        assert_eq!(status.recent_requests, 2);
        assert_eq!(status.remaining_requests, 0);
        assert!(status.is_banned);
        assert_eq!(status.ban_time_remaining_secs, 40);
        assert_eq!(governor.status(&caller), status);

        let stranger = governor.status(&CallerId::from(10_i64));
        assert_eq!(stranger.recent_requests, 0);
        assert_eq!(stranger.remaining_requests, 2);
        assert!(!stranger.is_banned);
        assert_eq!(governor.statistics().tracked_callers, 1);
    }

    #[test]
    fn reset_clears_window_and_ban() {
        let (governor, _clock) = governor(1, 60);
        let caller = CallerId::from(5_i64);

        assert!(governor.admit(&caller));
        assert!(!governor.admit(&caller));
        governor.reset(&caller);

        assert!(!governor.status(&caller).is_banned);
        assert!(governor.admit(&caller));
    }

    #[test]
    fn statistics_count_active_callers_and_bans() {
        let (governor, _clock) = governor(2, 60);

        assert!(governor.admit(&CallerId::from(1_i64)));
        assert!(governor.admit(&CallerId::from(2_i64)));
        assert!(governor.admit(&CallerId::from(2_i64)));
        assert!(!governor.admit(&CallerId::from(2_i64)));

        let statistics = governor.statistics();
        assert_eq!(statistics.active_callers, 2);
        assert_eq!(statistics.total_recent_requests, 3);
        assert_eq!(statistics.active_bans, 1);
        assert_eq!(statistics.tracked_callers, 2);
        assert_eq!(statistics.total_ban_entries, 1);
        assert_eq!(statistics.max_requests_per_window, 2);
    }

    #[test]
    fn sweep_drops_idle_callers_and_expired_bans() {
        let (governor, clock) = governor(1, 60);

        assert!(governor.admit(&CallerId::from(1_i64)));
        assert!(!governor.admit(&CallerId::from(1_i64)));
        clock.advance_secs(30);
        assert!(governor.admit(&CallerId::from(2_i64)));

        clock.advance_secs(40);
        let report = governor.sweep();

        assert_eq!(report.removed_callers, 1);
        assert_eq!(report.expired_bans, 1);
        assert_eq!(report.evicted_timestamps, 1);
        assert_eq!(governor.statistics().tracked_callers, 1);
    }

    #[test]
    fn penalty_escalates_with_window_size() {
        assert_eq!(penalty_secs(10, 10), 60);
        assert_eq!(penalty_secs(20, 10), 600);
        assert_eq!(penalty_secs(30, 10), 3600);
    }

    #[test]
    fn retry_after_rounds_up_remaining_ban() {
        let banned = Admission::Banned { until: start() + Duration::milliseconds(1_500) };
        assert_eq!(banned.retry_after_secs(start()), 2);
        assert_eq!(Admission::Allowed { remaining: 1 }.retry_after_secs(start()), 0);
    }

    #[test]
    fn oversized_window_covers_all_history_without_poisoning() {
        let (governor, clock) = governor(2, u64::MAX);
        let caller = CallerId::from("wide");

        assert!(governor.admit(&caller));
        assert!(governor.admit(&caller));
        assert!(!governor.admit(&caller));

        clock.advance_secs(61);
        assert!(!governor.admit(&caller), "old requests stay inside an unbounded window");

        let status = governor.status(&caller);
        assert_eq!(status.recent_requests, 2);
        assert_eq!(status.window_seconds, u64::MAX);
        assert_eq!(governor.statistics().tracked_callers, 1);
        assert!(governor.callers.lock().is_ok());
    }

    #[test]
    fn ban_expiry_saturates_at_the_end_of_time() {
        assert_eq!(super::ban_expiry(DateTime::<Utc>::MAX_UTC, 60), DateTime::<Utc>::MAX_UTC);
        assert_eq!(super::ban_expiry(start(), 600), start() + Duration::seconds(600));
    }

    #[test]
    fn concurrent_admits_and_sweeps_never_exceed_the_quota() {
        let governor = Arc::new(UsageGovernor::new(GovernorConfig {
            max_requests: 5,
            window_seconds: 60,
        }));
        let caller = CallerId::from("shared");

        let workers: Vec<_> = (0..64)
            .map(|index| {
                let governor = Arc::clone(&governor);
                let caller = caller.clone();
                std::thread::spawn(move || {
                    if index % 4 == 0 {
                        governor.sweep();
                        false
                    } else {
                        governor.admit(&caller)
                    }
                })
            })
            .collect();

        let allowed = workers
            .into_iter()
            .map(|worker| worker.join().expect("worker thread"))
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(allowed, 5);
        let status = governor.status(&caller);
        assert_eq!(status.recent_requests, 5);
        assert!(status.is_banned);
    }

    #[test]
    fn poisoned_state_fails_open() {
        let (governor, _clock) = governor(1, 60);
        let governor = Arc::new(governor);
        let poisoner = Arc::clone(&governor);

        let _ = std::thread::spawn(move || {
            let _guard = poisoner.callers.lock();
            panic!("poison the governor state");
        })
        .join();

        let caller = CallerId::from(3_i64);
        assert!(governor.admit(&caller));
        assert!(governor.admit(&caller));
        assert_eq!(governor.statistics().tracked_callers, 0);
    }
}
