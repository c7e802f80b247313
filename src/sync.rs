use serde::{Deserialize, Serialize};

/// Shell tick cadence; the scheduler decides on each tick whether a poll is
/// actually due.
pub const TICK_INTERVAL_MS: u64 = 5_000;

/// Offer-poll interval while the realtime channel is healthy; pushes carry
/// the low-latency path and the poll is only a safety net.
pub const OFFER_POLL_SLOW_MS: u64 = 60_000;

/// Offer-poll interval while the realtime channel is down or unknown.
pub const OFFER_POLL_FAST_MS: u64 = 10_000;

/// Current-ride snapshot interval.
pub const CURRENT_RIDE_POLL_MS: u64 = 15_000;

/// How long a non-terminal local ride survives continuous 204 responses
/// before it is considered orphaned and dropped.
pub const STALE_RIDE_TIMEOUT_MS: u64 = 600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeConnection {
    Connected,
    Disconnected,
    #[default]
    Unknown,
}

impl RealtimeConnection {
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Reconciliation pacing state. Owns its own last-run timestamps; nothing is
/// read off ambient globals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncScheduler {
    pub last_current_poll_ms: Option<u64>,
    pub last_offer_poll_ms: Option<u64>,
    /// Set by a `ride.requested` push to force the next offer poll through
    /// regardless of the interval gate.
    pub offers_due_now: bool,
    /// Start of the current run of 204-preserves of a non-terminal ride.
    pub preserved_since_ms: Option<u64>,
}

impl SyncScheduler {
    /// Effective offer-poll interval for the given channel health. Always
    /// within `[OFFER_POLL_FAST_MS, OFFER_POLL_SLOW_MS]`.
    #[must_use]
    pub const fn effective_offer_interval_ms(connection: RealtimeConnection) -> u64 {
        if connection.is_healthy() {
            OFFER_POLL_SLOW_MS
        } else {
            OFFER_POLL_FAST_MS
        }
    }

    #[must_use]
    pub fn should_poll_offers(&self, now_ms: u64, connection: RealtimeConnection) -> bool {
        if self.offers_due_now {
            return true;
        }
        match self.last_offer_poll_ms {
            None => true,
            Some(last) => {
                now_ms.saturating_sub(last) >= Self::effective_offer_interval_ms(connection)
            }
        }
    }

    pub fn mark_offers_polled(&mut self, now_ms: u64) {
        self.last_offer_poll_ms = Some(now_ms);
        self.offers_due_now = false;
    }

    pub fn request_immediate_offer_poll(&mut self) {
        self.offers_due_now = true;
    }

    #[must_use]
    pub fn should_poll_current(&self, now_ms: u64) -> bool {
        match self.last_current_poll_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= CURRENT_RIDE_POLL_MS,
        }
    }

    pub fn mark_current_polled(&mut self, now_ms: u64) {
        self.last_current_poll_ms = Some(now_ms);
    }

    /// Records one more 204-preserve of a non-terminal ride. Returns true
    /// once the ride has been preserved past [`STALE_RIDE_TIMEOUT_MS`] and
    /// should be dropped as orphaned.
    pub fn note_preserved(&mut self, now_ms: u64) -> bool {
        match self.preserved_since_ms {
            None => {
                self.preserved_since_ms = Some(now_ms);
                false
            }
            Some(since) => now_ms.saturating_sub(since) >= STALE_RIDE_TIMEOUT_MS,
        }
    }

    pub fn clear_preserved(&mut self) {
        self.preserved_since_ms = None;
    }

    /// Forgets all pacing state; used when the driver goes offline or the
    /// session is torn down.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_interval_is_clamped() {
        for connection in [
            RealtimeConnection::Connected,
            RealtimeConnection::Disconnected,
            RealtimeConnection::Unknown,
        ] {
            let interval = SyncScheduler::effective_offer_interval_ms(connection);
            assert!(interval >= OFFER_POLL_FAST_MS);
            assert!(interval <= OFFER_POLL_SLOW_MS);
        }
    }

    #[test]
    fn first_poll_is_always_due() {
        let scheduler = SyncScheduler::default();
        assert!(scheduler.should_poll_offers(0, RealtimeConnection::Unknown));
        assert!(scheduler.should_poll_current(0));
    }

    #[test]
    fn healthy_channel_stretches_the_offer_interval() {
        let mut scheduler = SyncScheduler::default();
        scheduler.mark_offers_polled(0);

        assert!(!scheduler.should_poll_offers(15_000, RealtimeConnection::Connected));
        assert!(scheduler.should_poll_offers(15_000, RealtimeConnection::Disconnected));
        assert!(scheduler.should_poll_offers(60_000, RealtimeConnection::Connected));
    }

    #[test]
    fn connection_flapping_never_polls_faster_than_fast_interval() {
        let mut scheduler = SyncScheduler::default();
        scheduler.mark_offers_polled(0);

        for now in (1_000..OFFER_POLL_FAST_MS).step_by(1_000) {
            assert!(!scheduler.should_poll_offers(now, RealtimeConnection::Connected));
            assert!(!scheduler.should_poll_offers(now, RealtimeConnection::Disconnected));
            assert!(!scheduler.should_poll_offers(now, RealtimeConnection::Unknown));
        }
    }

    #[test]
    fn push_forces_immediate_offer_poll() {
        let mut scheduler = SyncScheduler::default();
        scheduler.mark_offers_polled(0);
        assert!(!scheduler.should_poll_offers(1_000, RealtimeConnection::Connected));

        scheduler.request_immediate_offer_poll();
        assert!(scheduler.should_poll_offers(1_000, RealtimeConnection::Connected));

        scheduler.mark_offers_polled(1_000);
        assert!(!scheduler.should_poll_offers(2_000, RealtimeConnection::Connected));
    }

    #[test]
    fn preserve_window_expires_after_timeout() {
        let mut scheduler = SyncScheduler::default();

        assert!(!scheduler.note_preserved(1_000));
        assert!(!scheduler.note_preserved(1_000 + STALE_RIDE_TIMEOUT_MS - 1));
        assert!(scheduler.note_preserved(1_000 + STALE_RIDE_TIMEOUT_MS));

        scheduler.clear_preserved();
        assert!(!scheduler.note_preserved(2_000_000));
    }

    #[test]
    fn reset_forgets_pacing_state() {
        let mut scheduler = SyncScheduler::default();
        scheduler.mark_offers_polled(5_000);
        scheduler.mark_current_polled(5_000);
        scheduler.request_immediate_offer_poll();

        scheduler.reset();
        assert_eq!(scheduler, SyncScheduler::default());
    }
}
