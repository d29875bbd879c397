//! Process-wide runtime state shared between the session manager, the
//! dispatch pipeline and status commands.

use tokio::sync::Mutex;

/// Where the connection currently is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionPhase {
    #[default]
    Idle,
    Resolving,
    Connecting,
    Open,
    ClosingTransient,
    ClosingPermanent,
}

impl ConnectionPhase {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionPhase::Idle => "idle",
            ConnectionPhase::Resolving => "resolving",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Open => "open",
            ConnectionPhase::ClosingTransient => "closing (transient)",
            ConnectionPhase::ClosingPermanent => "closing (permanent)",
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Inner {
    phase: ConnectionPhase,
    consecutive_timeouts: u32,
    last_error_timestamp: i64,
    /// One-shot latch so the connection announcement is sent at most once
    /// per process, even across reconnects.
    announced: bool,
    /// Command processing switch (`on`/`off` reserved controls).
    active: bool,
}

/// Shared mutable runtime state. Mutated only by the session manager and the
/// reserved control commands; everyone else reads snapshots.
pub struct SharedState {
    inner: Mutex<Inner>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                active: true,
                ..Inner::default()
            }),
        }
    }

    pub async fn phase(&self) -> ConnectionPhase {
        self.inner.lock().await.phase
    }

    pub async fn set_phase(&self, phase: ConnectionPhase) {
        self.inner.lock().await.phase = phase;
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.phase == ConnectionPhase::Open
    }

    /// Record a successful open: resets the timeout streak.
    pub async fn mark_open(&self) {
        let mut st = self.inner.lock().await;
        st.phase = ConnectionPhase::Open;
        st.consecutive_timeouts = 0;
    }

    /// Record a timeout close; returns the new streak length.
    pub async fn mark_timeout(&self, timestamp: i64) -> u32 {
        let mut st = self.inner.lock().await;
        st.phase = ConnectionPhase::ClosingTransient;
        st.consecutive_timeouts += 1;
        st.last_error_timestamp = timestamp;
        st.consecutive_timeouts
    }

    /// Seed the streak from the durable counter at startup.
    pub async fn seed_timeouts(&self, count: u32, timestamp: i64) {
        let mut st = self.inner.lock().await;
        st.consecutive_timeouts = count;
        st.last_error_timestamp = timestamp;
    }

    pub async fn consecutive_timeouts(&self) -> u32 {
        self.inner.lock().await.consecutive_timeouts
    }

    pub async fn reset_timeouts(&self) {
        self.inner.lock().await.consecutive_timeouts = 0;
    }

    /// Returns true the first time only; later calls see the latch set.
    pub async fn claim_announcement(&self) -> bool {
        let mut st = self.inner.lock().await;
        if st.announced {
            return false;
        }
        st.announced = true;
        true
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.active
    }

    pub async fn set_active(&self, active: bool) {
        self.inner.lock().await.active = active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_resets_timeout_streak() {
        let st = SharedState::new();
        assert_eq!(st.mark_timeout(1).await, 1);
        assert_eq!(st.mark_timeout(2).await, 2);
        st.mark_open().await;
        assert_eq!(st.consecutive_timeouts().await, 0);
        assert!(st.is_connected().await);
    }

    #[tokio::test]
    async fn announcement_latch_fires_once() {
        let st = SharedState::new();
        assert!(st.claim_announcement().await);
        assert!(!st.claim_announcement().await);
    }
}
