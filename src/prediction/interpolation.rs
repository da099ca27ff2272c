//! Smoothing for vehicles the client only observes.
//!
//! Remote cars have no local physics, so their visual transform is driven from
//! the last two snapshots: damped extrapolation for position, bracketed slerp
//! (or angular-velocity extrapolation) for orientation, and an adaptive blend
//! that catches up faster the longer the server has been silent.

use glam::{Quat, Vec3};

use crate::game::snapshot::Snapshot;

/// Tuning for remote-vehicle smoothing
#[derive(Debug, Clone, Copy)]
pub struct RemoteSmoothing {
    /// Exponential decay rate (1/s) of extrapolated velocity
    pub velocity_damping: f32,
    /// Extrapolation stops after this long without a snapshot
    pub max_extrapolation_ms: u64,
    /// How far behind "now" the pair of samples is replayed. Once the delayed
    /// instant passes the newest sample, both position and orientation are
    /// extrapolated from it at "now".
    pub render_delay_ms: u64,
    /// Blend factor right after a snapshot
    pub base_alpha: f32,
    /// Added to the blend factor per second of silence
    pub alpha_gain_per_sec: f32,
}

impl Default for RemoteSmoothing {
    fn default() -> Self {
        Self {
            velocity_damping: 2.0,
            max_extrapolation_ms: 500,
            render_delay_ms: 100,
            base_alpha: 0.15,
            alpha_gain_per_sec: 4.0,
        }
    }
}

/// Where a remote car is drawn
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualTransform {
    pub position: Vec3,
    pub orientation: Quat,
}

/// A snapshot plus the local time it arrived
#[derive(Debug, Clone)]
pub struct Sample {
    pub snapshot: Snapshot,
    pub received_at: u64,
}

#[derive(Debug, Clone, Default)]
pub enum TrackerState {
    #[default]
    Uninitialized,
    Tracking {
        previous: Option<Sample>,
        latest: Sample,
    },
}

/// Per remote vehicle smoothing state
#[derive(Debug, Clone, Default)]
pub struct RemoteTracker {
    state: TrackerState,
    visual: Option<VisualTransform>,
    smoothing: RemoteSmoothing,
}

impl RemoteTracker {
    pub fn new(smoothing: RemoteSmoothing) -> Self {
        Self {
            state: TrackerState::Uninitialized,
            visual: None,
            smoothing,
        }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, TrackerState::Tracking { .. })
    }

    pub fn visual(&self) -> Option<VisualTransform> {
        self.visual
    }

    pub fn latest(&self) -> Option<&Sample> {
        match &self.state {
            TrackerState::Uninitialized => None,
            TrackerState::Tracking { latest, .. } => Some(latest),
        }
    }

    /// Record a snapshot received at local time `received_at` (ms)
    pub fn push(&mut self, snapshot: Snapshot, received_at: u64) {
        let sample = Sample {
            snapshot,
            received_at,
        };

        self.state = match std::mem::take(&mut self.state) {
            TrackerState::Uninitialized => {
                // Nothing to blend from yet
                self.visual = Some(VisualTransform {
                    position: sample.snapshot.position,
                    orientation: sample.snapshot.orientation,
                });
                TrackerState::Tracking {
                    previous: None,
                    latest: sample,
                }
            }
            TrackerState::Tracking { latest, .. } => TrackerState::Tracking {
                previous: Some(latest),
                latest: sample,
            },
        };
    }

    /// Blend factor for `now`: grows with time since the last snapshot
    pub fn blend_alpha(&self, now: u64) -> f32 {
        let s = &self.smoothing;
        let Some(latest) = self.latest() else {
            return 1.0;
        };
        let silent = now.saturating_sub(latest.received_at) as f32 / 1000.0;
        (s.base_alpha + s.alpha_gain_per_sec * silent).clamp(s.base_alpha, 1.0)
    }

    /// Where the car should be at `now`, before visual blending
    pub fn target(&self, now: u64) -> Option<VisualTransform> {
        let TrackerState::Tracking { previous, latest } = &self.state else {
            return None;
        };
        let s = &self.smoothing;

        // Between the two samples both halves are drawn at the same delayed instant
        let render_at = now.saturating_sub(s.render_delay_ms);
        if let Some(prev) = previous {
            if render_at >= prev.received_at && render_at < latest.received_at {
                let span = (latest.received_at - prev.received_at) as f32;
                let fraction = (render_at - prev.received_at) as f32 / span;
                return Some(VisualTransform {
                    position: prev.snapshot.position.lerp(latest.snapshot.position, fraction),
                    orientation: prev
                        .snapshot
                        .orientation
                        .slerp(latest.snapshot.orientation, fraction)
                        .normalize(),
                });
            }
        }

        let elapsed_ms = now
            .saturating_sub(latest.received_at)
            .min(s.max_extrapolation_ms);
        let elapsed = elapsed_ms as f32 / 1000.0;
        let snap = &latest.snapshot;

        let position = snap.position + snap.linear_velocity * damped_time(elapsed, s.velocity_damping);
        let orientation =
            (Quat::from_scaled_axis(snap.angular_velocity * elapsed) * snap.orientation).normalize();

        Some(VisualTransform {
            position,
            orientation,
        })
    }

    /// Advance the visual transform toward the target for `now`
    pub fn update(&mut self, now: u64) -> Option<VisualTransform> {
        let target = self.target(now)?;
        let alpha = self.blend_alpha(now);

        let next = match self.visual {
            None => target,
            Some(current) => VisualTransform {
                position: current.position.lerp(target.position, alpha),
                orientation: current
                    .orientation
                    .slerp(target.orientation, alpha)
                    .normalize(),
            },
        };
        self.visual = Some(next);
        Some(next)
    }
}

/// Integral of e^{-k t} from 0 to t: how far a velocity decaying at rate k carries
fn damped_time(t: f32, k: f32) -> f32 {
    if k <= f32::EPSILON {
        return t;
    }
    (1.0 - (-k * t).exp()) / k
}
