//! Displayed points, level and badges, plus the level-up celebration.
//!
//! Points are always taken from the server's running total, never summed
//! locally, so a missed event cannot make the display drift.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use donorlink_core::{GamificationState, PointsUpdate};

use crate::toast::deadline_after;

/// Level-up celebration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Celebration {
    #[default]
    Idle,
    Celebrating { level: u32 },
}

impl Celebration {
    pub fn is_celebrating(&self) -> bool {
        matches!(self, Celebration::Celebrating { .. })
    }
}

#[derive(Default)]
struct TrackerState {
    progress: GamificationState,
    celebration: Celebration,
    until: Option<Instant>,
    generation: u64,
}

impl TrackerState {
    fn expire(&mut self, now: Instant) {
        if matches!(self.until, Some(until) if now >= until) {
            self.celebration = Celebration::Idle;
            self.until = None;
        }
    }
}

struct TrackerInner {
    state: Mutex<TrackerState>,
    duration: Duration,
    revision: watch::Sender<u64>,
}

impl TrackerInner {
    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

/// Session-scoped progression tracker. Cheap to clone.
#[derive(Clone)]
pub struct ProgressionTracker {
    inner: Arc<TrackerInner>,
}

impl fmt::Debug for ProgressionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressionTracker")
            .field("progress", &self.snapshot())
            .field("celebration", &self.celebration())
            .finish()
    }
}

impl ProgressionTracker {
    /// `celebration` is how long a level-up stays in `Celebrating`.
    pub fn new(celebration: Duration) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(TrackerInner {
                state: Mutex::new(TrackerState::default()),
                duration: celebration,
                revision,
            }),
        }
    }

    /// Seed from a profile fetch. Does not celebrate.
    pub fn load(&self, progress: GamificationState) {
        debug!(points = progress.points, level = progress.level, "Progression loaded");
        self.inner.state().progress = progress;
        self.inner.bump();
    }

    /// Apply a points event.
    ///
    /// The total replaces the displayed points. A level-up adopts the new
    /// level (if given) and (re)starts the celebration; a second level-up
    /// while celebrating restarts the timer rather than stacking. A new
    /// level without the level-up flag is adopted silently.
    pub fn apply_points_event(&self, update: PointsUpdate) {
        let celebrate = {
            let mut state = self.inner.state();
            state.progress.points = update.total_points;
            if let Some(level) = update.new_level {
                state.progress.level = level;
            }
            if update.level_up {
                let level = state.progress.level;
                state.generation += 1;
                state.celebration = Celebration::Celebrating { level };
                state.until = Some(deadline_after(self.inner.duration));
                Some((state.generation, level))
            } else {
                None
            }
        };

        if let Some((generation, level)) = celebrate {
            info!(level, points = update.total_points, "Level up");
            self.schedule_idle(generation);
        }
        self.inner.bump();
    }

    fn schedule_idle(&self, generation: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = Arc::downgrade(&self.inner);
        let duration = self.inner.duration;
        handle.spawn(async move {
            tokio::time::sleep(duration).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let reverted = {
                let mut state = inner.state();
                if state.generation == generation && state.celebration.is_celebrating() {
                    state.celebration = Celebration::Idle;
                    state.until = None;
                    true
                } else {
                    false
                }
            };
            if reverted {
                inner.bump();
            }
        });
    }

    /// Record a badge. Returns `false` when it was already held.
    pub fn apply_badge_event(&self, badge_id: impl Into<String>) -> bool {
        let badge_id = badge_id.into();
        let inserted = self.inner.state().progress.badges.insert(badge_id.clone());
        if inserted {
            debug!(badge_id = %badge_id, "Badge earned");
            self.inner.bump();
        }
        inserted
    }

    pub fn snapshot(&self) -> GamificationState {
        self.inner.state().progress.clone()
    }

    pub fn points(&self) -> u64 {
        self.inner.state().progress.points
    }

    pub fn level(&self) -> u32 {
        self.inner.state().progress.level
    }

    pub fn badges(&self) -> Vec<String> {
        self.inner.state().progress.badges.iter().cloned().collect()
    }

    pub fn has_badge(&self, badge_id: &str) -> bool {
        self.inner.state().progress.badges.contains(badge_id)
    }

    pub fn celebration(&self) -> Celebration {
        let mut state = self.inner.state();
        state.expire(Instant::now());
        state.celebration
    }

    pub fn celebration_duration(&self) -> Duration {
        self.inner.duration
    }

    /// Revision counter bumped on every change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}
