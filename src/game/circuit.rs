//! Circuit geometry handoff
//!
//! Track generation lives outside the simulation core. A [`CircuitSource`]
//! produces a [`Circuit`] once per room: static collidables for the
//! integrator, a closed checkpoint path and a spawn pose. The default
//! [`OvalCircuit`] is a seeded stand-in so a room always has somewhere to drive.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use glam::{Quat, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::ids::RoomId;
use super::physics::StaticCollider;

/// A checkpoint gate on the closed path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Checkpoint {
    pub position: Vec3,
    /// Horizontal trigger radius
    pub radius: f32,
}

impl Checkpoint {
    /// True when `point` is inside the gate (height ignored)
    pub fn contains(&self, point: Vec3) -> bool {
        let dx = point.x - self.position.x;
        let dz = point.z - self.position.z;
        dx * dx + dz * dz <= self.radius * self.radius
    }
}

/// Spawn position and heading for the grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnPose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for SpawnPose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

impl SpawnPose {
    /// Grid slot `slot` is offset sideways (alternating) and back in rows of two
    pub fn grid_slot(&self, slot: usize) -> SpawnPose {
        let side = if slot % 2 == 0 { -1.5 } else { 1.5 };
        let row = (slot / 2) as f32 * 5.0;
        // Vehicle forward is -Z, so "back" is +Z in local space
        let local = Vec3::new(side, 0.0, row);
        SpawnPose {
            position: self.position + self.orientation * local,
            orientation: self.orientation,
        }
    }
}

/// Everything the core needs from the track
#[derive(Debug, Clone)]
pub struct Circuit {
    pub colliders: Vec<StaticCollider>,
    pub checkpoints: Vec<Checkpoint>,
    pub spawn: SpawnPose,
}

/// Produces circuit geometry for a new room
pub trait CircuitSource: Send + Sync {
    fn generate(&self, room_id: &RoomId) -> Circuit;
}

/// Flat ground with a ring of checkpoints, jittered by a seed derived from the room id
#[derive(Debug, Clone)]
pub struct OvalCircuit {
    pub radius_x: f32,
    pub radius_z: f32,
    pub checkpoint_count: usize,
    pub checkpoint_radius: f32,
}

impl Default for OvalCircuit {
    fn default() -> Self {
        Self {
            radius_x: 120.0,
            radius_z: 70.0,
            checkpoint_count: 8,
            checkpoint_radius: 12.0,
        }
    }
}

impl OvalCircuit {
    fn seed_for(room_id: &RoomId) -> u64 {
        let mut hasher = DefaultHasher::new();
        room_id.hash(&mut hasher);
        hasher.finish()
    }
}

impl CircuitSource for OvalCircuit {
    fn generate(&self, room_id: &RoomId) -> Circuit {
        let mut rng = ChaCha8Rng::seed_from_u64(Self::seed_for(room_id));
        let count = self.checkpoint_count.max(2);

        let checkpoints: Vec<Checkpoint> = (0..count)
            .map(|i| {
                let angle = i as f32 / count as f32 * std::f32::consts::TAU;
                let wobble = rng.gen_range(0.9..1.1);
                Checkpoint {
                    position: Vec3::new(
                        angle.cos() * self.radius_x * wobble,
                        0.0,
                        angle.sin() * self.radius_z * wobble,
                    ),
                    radius: self.checkpoint_radius,
                }
            })
            .collect();

        // Ground plus a low barrier ring around the whole oval
        let extent_x = self.radius_x * 1.5;
        let extent_z = self.radius_z * 1.5;
        let wall = 1.0;
        let colliders = vec![
            StaticCollider::Plane {
                normal: Vec3::Y,
                offset: 0.0,
            },
            StaticCollider::Box {
                center: Vec3::new(0.0, 1.0, extent_z + wall),
                half_extents: Vec3::new(extent_x + wall, 1.0, wall),
            },
            StaticCollider::Box {
                center: Vec3::new(0.0, 1.0, -extent_z - wall),
                half_extents: Vec3::new(extent_x + wall, 1.0, wall),
            },
            StaticCollider::Box {
                center: Vec3::new(extent_x + wall, 1.0, 0.0),
                half_extents: Vec3::new(wall, 1.0, extent_z + wall),
            },
            StaticCollider::Box {
                center: Vec3::new(-extent_x - wall, 1.0, 0.0),
                half_extents: Vec3::new(wall, 1.0, extent_z + wall),
            },
        ];

        // Spawn just past the first checkpoint, heading along the ring (+Z at angle 0)
        let first = checkpoints[0].position;
        let spawn = SpawnPose {
            position: Vec3::new(first.x, 0.0, first.z),
            orientation: Quat::from_rotation_y(std::f32::consts::PI),
        };

        Circuit {
            colliders,
            checkpoints,
            spawn,
        }
    }
}

/// Flat, featureless circuit: one ground plane, one checkpoint at the origin
#[derive(Debug, Clone, Default)]
pub struct FlatCircuit;

impl CircuitSource for FlatCircuit {
    fn generate(&self, _room_id: &RoomId) -> Circuit {
        Circuit {
            colliders: vec![StaticCollider::Plane {
                normal: Vec3::Y,
                offset: 0.0,
            }],
            checkpoints: vec![Checkpoint {
                position: Vec3::ZERO,
                radius: 5.0,
            }],
            spawn: SpawnPose::default(),
        }
    }
}
