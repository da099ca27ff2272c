//! Delta-threshold state broadcast

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use super::ids::UserId;
use super::registry::RoomRegistry;
use super::room::Room;
use super::snapshot::Snapshot;
use crate::config::SimulationConfig;
use crate::util::delta::ChangeThreshold;
use crate::util::time::monotonic_millis;
use crate::ws::protocol::ServerMsg;

/// Decides which vehicles are worth sending
#[derive(Debug, Clone, Copy)]
pub struct BroadcastPolicy {
    /// Per-axis position change that forces a send
    pub position_epsilon: f32,
    /// Per-component quaternion change that forces a send
    pub rotation_epsilon: f32,
}

impl Default for BroadcastPolicy {
    fn default() -> Self {
        Self {
            position_epsilon: 0.01,
            rotation_epsilon: 0.001,
        }
    }
}

impl BroadcastPolicy {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            position_epsilon: config.position_epsilon,
            rotation_epsilon: config.rotation_epsilon,
        }
    }

    /// No baseline always counts as changed
    pub fn changed(&self, baseline: Option<&Snapshot>, current: &Snapshot) -> bool {
        match baseline {
            None => true,
            Some(last) => {
                current.position.exceeds(&last.position, self.position_epsilon)
                    || current
                        .orientation
                        .exceeds(&last.orientation, self.rotation_epsilon)
            }
        }
    }

    /// Messages for one broadcast tick, in send order: roster, state, leaderboard.
    /// Included vehicles become the new baselines.
    pub fn collect(&self, room: &mut Room) -> Vec<ServerMsg> {
        let mut out = Vec::new();

        if room.take_roster_dirty() {
            out.push(ServerMsg::Roster {
                users: room.roster(),
            });
        }

        let (vehicles, baselines) = room.broadcast_view();
        let mut included: Vec<(UserId, Snapshot)> = Vec::new();
        for (user_id, vehicle) in vehicles {
            let current = vehicle.state();
            if self.changed(baselines.get(user_id), &current) {
                included.push((user_id.clone(), current));
            }
        }

        if !included.is_empty() {
            out.push(ServerMsg::state(
                monotonic_millis(),
                included.iter().map(|(u, s)| (u, s)),
            ));
            for (user_id, snapshot) in included {
                baselines.insert(user_id, snapshot);
            }
        }

        if room.take_leaderboard_dirty() {
            out.push(ServerMsg::Leaderboard {
                entries: room.leaderboard(),
            });
        }

        out
    }
}

/// Periodic task fanning room state out to subscribers
pub struct BroadcastLoop {
    registry: Arc<RoomRegistry>,
    policy: BroadcastPolicy,
    period: Duration,
    idle_grace: Duration,
}

impl BroadcastLoop {
    pub fn new(registry: Arc<RoomRegistry>, config: &SimulationConfig) -> Self {
        Self {
            registry,
            policy: BroadcastPolicy::from_config(config),
            period: Duration::from_millis(config.broadcast_interval_ms.max(1)),
            idle_grace: Duration::from_secs(config.idle_room_grace_secs),
        }
    }

    /// One pass over every room. Returns how many messages went out.
    pub fn broadcast_once(&self) -> usize {
        let mut sent = 0;
        for handle in self.registry.handles() {
            let messages = {
                let mut room = handle.room.lock();
                if room.is_closed() {
                    continue;
                }
                self.policy.collect(&mut room)
            };

            for msg in messages {
                // No subscribers is fine
                if handle.outbound.send(msg).is_ok() {
                    sent += 1;
                } else {
                    trace!(room_id = %handle.id, "No subscribers for broadcast");
                }
            }
        }
        sent
    }

    pub async fn run(self) {
        info!(period_ms = self.period.as_millis() as u64, "Broadcast loop started");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let sent = self.broadcast_once();
            if sent > 0 {
                debug!(messages = sent, "Broadcast tick");
            }
            self.registry.reap_idle(self.idle_grace);
        }
    }
}
