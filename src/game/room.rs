//! One isolated simulation world and everything it owns

use std::collections::HashMap;

use tracing::{debug, info};

use super::circuit::Circuit;
use super::error::GameError;
use super::ids::{RoomId, UserId, VehicleId};
use super::input::InputState;
use super::leaderboard::{rank, CheckpointEntry};
use super::physics::PhysicsWorld;
use super::snapshot::Snapshot;
use super::vehicle::{Vehicle, VehicleTuning};
use crate::util::time::monotonic_millis;

/// Room state. Access is serialized by the registry's per-room lock.
pub struct Room {
    id: RoomId,
    world: PhysicsWorld,
    circuit: Circuit,
    tuning: VehicleTuning,
    vehicles: HashMap<UserId, Vehicle>,
    inputs: HashMap<UserId, InputState>,
    /// Last snapshot broadcast per user; absent means "never sent"
    baselines: HashMap<UserId, Snapshot>,
    checkpoints: HashMap<UserId, CheckpointEntry>,
    /// Grid slot held by each present user
    spawn_slots: HashMap<UserId, usize>,
    /// When the room last became empty; `None` while anyone is in it
    empty_since: Option<u64>,
    roster_dirty: bool,
    leaderboard_dirty: bool,
    tick: u64,
    closed: bool,
}

impl Room {
    pub fn new(id: RoomId, circuit: Circuit, tuning: VehicleTuning) -> Self {
        Self {
            id,
            world: PhysicsWorld::new(circuit.colliders.clone()),
            circuit,
            tuning,
            vehicles: HashMap::new(),
            inputs: HashMap::new(),
            baselines: HashMap::new(),
            checkpoints: HashMap::new(),
            spawn_slots: HashMap::new(),
            empty_since: Some(monotonic_millis()),
            roster_dirty: false,
            leaderboard_dirty: false,
            tick: 0,
            closed: false,
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn vehicle(&self, user_id: &UserId) -> Option<&Vehicle> {
        self.vehicles.get(user_id)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    /// Sorted user ids of everyone in the room
    pub fn roster(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.vehicles.keys().cloned().collect();
        users.sort();
        users
    }

    /// Add a vehicle for `user_id`, or hand back the one it already has
    pub fn join(&mut self, user_id: &UserId, display_name: &str) -> Result<VehicleId, GameError> {
        if self.closed {
            return Err(GameError::RoomNotFound(self.id.clone()));
        }

        if let Some(existing) = self.vehicles.get(user_id) {
            debug!(room_id = %self.id, user_id = %user_id, "User already has a vehicle");
            return Ok(existing.id());
        }

        let slot = self.free_spawn_slot();
        let spawn = self.circuit.spawn.grid_slot(slot);
        self.spawn_slots.insert(user_id.clone(), slot);
        self.empty_since = None;

        let vehicle = Vehicle::simulated(self.id.clone(), user_id.clone(), spawn, self.tuning.clone());
        let vehicle_id = vehicle.id();
        self.vehicles.insert(user_id.clone(), vehicle);
        self.checkpoints.insert(
            user_id.clone(),
            CheckpointEntry::new(user_id.clone(), display_name.to_string(), monotonic_millis()),
        );

        // Newcomers need everybody's full state, not just future deltas
        self.baselines.clear();
        self.roster_dirty = true;
        self.leaderboard_dirty = true;

        info!(
            room_id = %self.id,
            user_id = %user_id,
            vehicle_id = %vehicle_id,
            vehicle_count = self.vehicles.len(),
            "Vehicle joined room"
        );

        Ok(vehicle_id)
    }

    /// Remove every trace of `user_id`. Returns false if the user was not here.
    pub fn leave(&mut self, user_id: &UserId) -> bool {
        let removed = self.vehicles.remove(user_id).is_some();
        self.inputs.remove(user_id);
        self.baselines.remove(user_id);
        self.checkpoints.remove(user_id);
        self.spawn_slots.remove(user_id);

        if removed {
            if self.vehicles.is_empty() {
                self.empty_since = Some(monotonic_millis());
            }
            self.roster_dirty = true;
            self.leaderboard_dirty = true;
            info!(
                room_id = %self.id,
                user_id = %user_id,
                vehicle_count = self.vehicles.len(),
                "Vehicle left room"
            );
        }
        removed
    }

    /// Lowest grid slot nobody present is holding
    fn free_spawn_slot(&self) -> usize {
        (0..)
            .find(|slot| !self.spawn_slots.values().any(|taken| taken == slot))
            .unwrap_or_default()
    }

    /// True when the room has had no vehicles since before `cutoff` (ms)
    pub fn idle_since_before(&self, cutoff: u64) -> bool {
        matches!(self.empty_since, Some(since) if since <= cutoff)
    }

    /// Replace the user's input wholesale
    pub fn set_input(&mut self, user_id: &UserId, input: InputState) -> Result<(), GameError> {
        if !self.vehicles.contains_key(user_id) {
            return Err(GameError::StaleInput {
                room_id: self.id.clone(),
                user_id: user_id.clone(),
            });
        }
        self.inputs.insert(user_id.clone(), input);
        Ok(())
    }

    /// One fixed step: all inputs first, then a single physics step for the room
    pub fn simulate(&mut self, dt: f32) {
        if self.closed {
            return;
        }
        self.tick += 1;

        for (user_id, vehicle) in self.vehicles.iter_mut() {
            if let Some(input) = self.inputs.get(user_id) {
                vehicle.apply_input(input, dt);
            }
        }

        for vehicle in self.vehicles.values_mut() {
            vehicle.step(&self.world, dt);
        }

        self.world
            .step(self.vehicles.values_mut().filter_map(|v| v.body_mut()), dt);

        let now = monotonic_millis();
        for (user_id, vehicle) in self.vehicles.iter_mut() {
            vehicle.after_step();

            if let Some(entry) = self.checkpoints.get_mut(user_id) {
                if entry.observe(vehicle.position(), &self.circuit.checkpoints, now) {
                    debug!(
                        room_id = %self.id,
                        user_id = %user_id,
                        checkpoint = entry.checkpoint_index,
                        laps = entry.laps,
                        "Checkpoint crossed"
                    );
                    self.leaderboard_dirty = true;
                }
            }
        }
    }

    /// Mutable view used by the broadcast policy: current vehicles and their baselines
    pub fn broadcast_view(&mut self) -> (&HashMap<UserId, Vehicle>, &mut HashMap<UserId, Snapshot>) {
        (&self.vehicles, &mut self.baselines)
    }

    pub fn baseline(&self, user_id: &UserId) -> Option<&Snapshot> {
        self.baselines.get(user_id)
    }

    /// Clear and return the roster-changed flag
    pub fn take_roster_dirty(&mut self) -> bool {
        std::mem::take(&mut self.roster_dirty)
    }

    /// Clear and return the leaderboard-changed flag
    pub fn take_leaderboard_dirty(&mut self) -> bool {
        std::mem::take(&mut self.leaderboard_dirty)
    }

    pub fn leaderboard(&self) -> Vec<CheckpointEntry> {
        rank(self.checkpoints.values().cloned())
    }

    /// Drop everything. The room refuses joins and ticks afterwards.
    pub fn close(&mut self) {
        self.closed = true;
        self.vehicles.clear();
        self.inputs.clear();
        self.baselines.clear();
        self.checkpoints.clear();
        self.spawn_slots.clear();
        info!(room_id = %self.id, tick = self.tick, "Room closed");
    }
}
