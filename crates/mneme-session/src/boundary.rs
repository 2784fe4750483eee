//! Session boundary tracking based on inactivity gaps.
//!
//! A session window is never explicitly destroyed: it is either current or
//! implicitly superseded by a new one. Expiry is computed lazily when a turn
//! arrives, never by a background sweep, so there is no race between sweep
//! and access.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use mneme_types::{OwnerKey, Timestamp};

/// The active conversation window for one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    /// When this window's first turn arrived.
    pub started_at: Timestamp,
    /// When the owner's most recent turn arrived.
    pub last_activity: Timestamp,
}

/// Result of observing a turn.
#[derive(Debug, Clone, Copy)]
pub struct ObservedWindow {
    /// The window the turn belongs to (post-update).
    pub window: SessionWindow,
    /// True if this turn started a new window.
    pub rolled: bool,
}

/// Tracks per-owner session windows.
///
/// The outer map lock is held only to look up or insert an owner's slot;
/// window state mutates under its own per-owner lock.
pub struct SessionBoundaryTracker {
    windows: RwLock<HashMap<OwnerKey, Arc<Mutex<SessionWindow>>>>,
    threshold: Duration,
}

impl SessionBoundaryTracker {
    /// Create a tracker with the given inactivity threshold.
    pub fn new(threshold: Duration) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            threshold,
        }
    }

    /// The configured inactivity threshold.
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Record a turn arriving at `now` and return the window it belongs to.
    ///
    /// The first turn ever creates a window; a turn after the inactivity
    /// threshold retires the old window and starts a new one at `now`.
    pub fn observe(&self, owner: &OwnerKey, now: Timestamp) -> ObservedWindow {
        let slot = self.slot(owner, now);
        let mut window = slot.lock();

        let gap = (now - window.last_activity)
            .to_std()
            .unwrap_or(Duration::ZERO);

        if gap > self.threshold {
            debug!(
                user_id = %owner.user_id,
                namespace = %owner.namespace,
                gap_secs = gap.as_secs(),
                "Inactivity gap exceeded, starting new session window"
            );
            *window = SessionWindow {
                started_at: now,
                last_activity: now,
            };
            return ObservedWindow {
                window: *window,
                rolled: true,
            };
        }

        window.last_activity = now;
        ObservedWindow {
            window: *window,
            rolled: false,
        }
    }

    /// The current window for an owner without recording activity.
    ///
    /// Returns `None` if the owner has never been seen or the window has
    /// lapsed past the inactivity threshold as of `now`.
    pub fn current(&self, owner: &OwnerKey, now: Timestamp) -> Option<SessionWindow> {
        let slot = {
            let windows = self.windows.read();
            windows.get(owner).cloned()
        }?;

        let window = *slot.lock();
        let gap = (now - window.last_activity)
            .to_std()
            .unwrap_or(Duration::ZERO);

        (gap <= self.threshold).then_some(window)
    }

    fn slot(&self, owner: &OwnerKey, now: Timestamp) -> Arc<Mutex<SessionWindow>> {
        {
            let windows = self.windows.read();
            if let Some(slot) = windows.get(owner) {
                return Arc::clone(slot);
            }
        }

        let mut windows = self.windows.write();
        Arc::clone(windows.entry(owner.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(SessionWindow {
                started_at: now,
                last_activity: now,
            }))
        }))
    }
}
