//! Transaction timing knobs and the per-transaction timer table.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// RFC 3261 timing estimates driving every transaction timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    /// Initial round-trip estimate.
    pub t1: Duration,
    /// Maximum non-INVITE retransmission interval.
    pub t2: Duration,
    /// Maximum segment lifetime in the network.
    pub t4: Duration,
    /// Grace before the INVITE server auto-emits 100 Trying.
    pub t100: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            t100: Duration::from_millis(200),
        }
    }
}

impl Timings {
    pub fn with_t1(t1: Duration) -> Self {
        Self {
            t1,
            ..Default::default()
        }
    }

    /// 64·T1, the overall transaction timeout (timers B, F, H, L, M and
    /// unreliable J).
    pub fn t1x64(&self) -> Duration {
        self.t1 * 64
    }

    /// Timer D: completed-state lingering for INVITE clients.
    pub fn timer_d(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            Duration::from_secs(32)
        }
    }

    /// Timer I: ACK absorption in Confirmed.
    pub fn timer_i(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.t4
        }
    }

    /// Timer J: non-INVITE server completed-state lingering.
    pub fn timer_j(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.t1x64()
        }
    }

    /// Timer K: non-INVITE client completed-state lingering.
    pub fn timer_k(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.t4
        }
    }
}

/// The RFC 3261/6026 transaction timers, plus the 100 Trying grace timer
/// of the INVITE server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    A,
    B,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    Trying100,
}

#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    deadline: Instant,
    scheduled_at: SystemTime,
    duration: Duration,
}

/// Serialized form of one armed timer: when it was scheduled and for how
/// long. The residual on restore is `scheduled_at + duration - now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub kind: TimerKind,
    /// Unix epoch milliseconds.
    pub scheduled_at: u64,
    /// Milliseconds.
    pub duration: u64,
}

/// The armed timers of one transaction.
///
/// The owning task drives them through [`next_deadline`] and
/// [`take_due`]; snapshots capture wall-clock schedule points so a
/// restore on another process computes residuals with only minor
/// wall-clock jitter.
///
/// [`next_deadline`]: TimerTable::next_deadline
/// [`take_due`]: TimerTable::take_due
#[derive(Debug, Default)]
pub(crate) struct TimerTable {
    entries: HashMap<TimerKind, TimerEntry>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `kind`, replacing any previous schedule.
    pub fn arm(&mut self, kind: TimerKind, duration: Duration) {
        self.entries.insert(
            kind,
            TimerEntry {
                deadline: Instant::now() + duration,
                scheduled_at: SystemTime::now(),
                duration,
            },
        );
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.entries.remove(&kind);
    }

    pub fn cancel_all(&mut self) {
        self.entries.clear();
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// The earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.deadline).min()
    }

    /// Removes and returns every timer due at `now`, earliest first,
    /// together with the duration it was armed with.
    pub fn take_due(&mut self, now: Instant) -> Vec<(TimerKind, Duration)> {
        let mut due: Vec<(TimerKind, TimerEntry)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(k, e)| (*k, *e))
            .collect();
        due.sort_by_key(|(_, e)| e.deadline);

        for (kind, _) in &due {
            self.entries.remove(kind);
        }
        due.into_iter().map(|(k, e)| (k, e.duration)).collect()
    }

    pub fn snapshot(&self) -> Vec<TimerSnapshot> {
        let mut timers: Vec<TimerSnapshot> = self
            .entries
            .iter()
            .map(|(kind, entry)| TimerSnapshot {
                kind: *kind,
                scheduled_at: entry
                    .scheduled_at
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64,
                duration: entry.duration.as_millis() as u64,
            })
            .collect();
        timers.sort_by_key(|t| (t.scheduled_at, t.duration));
        timers
    }

    /// Rebuilds the table from a snapshot. Residuals are computed against
    /// the current wall clock; a timer whose residual is zero fires on the
    /// next poll.
    pub fn restore(snapshots: &[TimerSnapshot]) -> Self {
        let now_wall = SystemTime::now();
        let now = Instant::now();
        let mut entries = HashMap::with_capacity(snapshots.len());

        for snap in snapshots {
            let scheduled_at = UNIX_EPOCH + Duration::from_millis(snap.scheduled_at);
            let duration = Duration::from_millis(snap.duration);
            let elapsed = now_wall
                .duration_since(scheduled_at)
                .unwrap_or(Duration::ZERO);
            let residual = duration.saturating_sub(elapsed);

            entries.insert(
                snap.kind,
                TimerEntry {
                    deadline: now + residual,
                    scheduled_at,
                    duration,
                },
            );
        }
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let timings = Timings::default();

        assert_eq!(timings.t1, Duration::from_millis(500));
        assert_eq!(timings.t2, Duration::from_secs(4));
        assert_eq!(timings.t4, Duration::from_secs(5));
        assert_eq!(timings.t1x64(), Duration::from_secs(32));
    }

    #[test]
    fn test_reliable_transports_skip_linger_timers() {
        let timings = Timings::default();

        assert_eq!(timings.timer_d(true), Duration::ZERO);
        assert!(timings.timer_d(false) >= Duration::from_secs(32));
        assert_eq!(timings.timer_i(true), Duration::ZERO);
        assert_eq!(timings.timer_i(false), timings.t4);
        assert_eq!(timings.timer_j(false), timings.t1x64());
        assert_eq!(timings.timer_k(false), timings.t4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_and_fire() {
        let mut table = TimerTable::new();
        table.arm(TimerKind::A, Duration::from_millis(500));
        table.arm(TimerKind::B, Duration::from_secs(32));

        assert!(table.take_due(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(501)).await;
        let due = table.take_due(Instant::now());

        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, TimerKind::A);
        assert!(table.is_armed(TimerKind::B));
        assert!(!table.is_armed(TimerKind::A));
    }

    #[test]
    fn test_cancel() {
        let mut table = TimerTable::new();
        table.arm(TimerKind::F, Duration::from_secs(1));
        table.cancel(TimerKind::F);

        assert!(table.next_deadline().is_none());
    }

    #[test]
    fn test_snapshot_round_trip_preserves_schedule() {
        let mut table = TimerTable::new();
        table.arm(TimerKind::D, Duration::from_secs(32));

        let snapshot = table.snapshot();
        let restored = TimerTable::restore(&snapshot);

        assert!(restored.is_armed(TimerKind::D));
        assert_eq!(restored.snapshot(), snapshot);
    }

    #[test]
    fn test_restore_with_elapsed_schedule_fires_immediately() {
        let snapshot = TimerSnapshot {
            kind: TimerKind::K,
            scheduled_at: 0,
            duration: 5_000,
        };

        let mut restored = TimerTable::restore(&[snapshot]);
        let due = restored.take_due(Instant::now());

        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, TimerKind::K);
    }
}
