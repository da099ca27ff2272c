//! Registry of all live rooms

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::circuit::{CircuitSource, OvalCircuit};
use super::error::GameError;
use super::ids::{RoomId, UserId, VehicleId};
use super::input::InputState;
use super::leaderboard::CheckpointEntry;
use super::room::Room;
use super::vehicle::VehicleTuning;
use crate::util::time::monotonic_millis;
use crate::ws::protocol::ServerMsg;

/// Outbound messages buffered per room before slow receivers start lagging
const ROOM_CHANNEL_CAPACITY: usize = 64;

/// Handle to a live room: the locked state plus its outbound channel
#[derive(Clone)]
pub struct RoomHandle {
    pub id: RoomId,
    pub room: Arc<Mutex<Room>>,
    pub outbound: broadcast::Sender<ServerMsg>,
}

/// Counts for the health endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryStats {
    pub rooms: usize,
    pub vehicles: usize,
}

/// Arena of rooms keyed by room id. Each room is locked on its own, so no two
/// rooms ever share mutable state.
pub struct RoomRegistry {
    rooms: DashMap<RoomId, RoomHandle>,
    circuits: Arc<dyn CircuitSource>,
    tuning: VehicleTuning,
    auto_teardown: bool,
}

impl RoomRegistry {
    pub fn new(tuning: VehicleTuning) -> Self {
        Self::with_circuits(Arc::new(OvalCircuit::default()), tuning)
    }

    pub fn with_circuits(circuits: Arc<dyn CircuitSource>, tuning: VehicleTuning) -> Self {
        Self {
            rooms: DashMap::new(),
            circuits,
            tuning,
            auto_teardown: true,
        }
    }

    /// Keep empty rooms alive until destroyed explicitly
    pub fn keep_empty_rooms(mut self) -> Self {
        self.auto_teardown = false;
        self
    }

    fn build_room(&self, id: &RoomId) -> RoomHandle {
        let circuit = self.circuits.generate(id);
        let checkpoints = circuit.checkpoints.len();
        let room = Room::new(id.clone(), circuit, self.tuning.clone());
        let (outbound, _) = broadcast::channel(ROOM_CHANNEL_CAPACITY);
        info!(room_id = %id, checkpoints, "Room created");
        RoomHandle {
            id: id.clone(),
            room: Arc::new(Mutex::new(room)),
            outbound,
        }
    }

    pub fn create_room(&self, id: RoomId) -> Result<RoomHandle, GameError> {
        match self.rooms.entry(id.clone()) {
            Entry::Occupied(_) => Err(GameError::DuplicateRoom(id)),
            Entry::Vacant(slot) => {
                let handle = self.build_room(&id);
                slot.insert(handle.clone());
                Ok(handle)
            }
        }
    }

    /// Create the room unless it already exists
    pub fn ensure_room(&self, id: &RoomId) -> RoomHandle {
        self.rooms
            .entry(id.clone())
            .or_insert_with(|| self.build_room(id))
            .value()
            .clone()
    }

    /// Remove the room and everything in it
    pub fn destroy_room(&self, id: &RoomId) -> Result<(), GameError> {
        let (_, handle) = self
            .rooms
            .remove(id)
            .ok_or_else(|| GameError::RoomNotFound(id.clone()))?;
        handle.room.lock().close();
        Ok(())
    }

    pub fn get(&self, id: &RoomId) -> Option<RoomHandle> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    fn require(&self, id: &RoomId) -> Result<RoomHandle, GameError> {
        self.get(id).ok_or_else(|| GameError::RoomNotFound(id.clone()))
    }

    pub fn join_room(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        display_name: &str,
    ) -> Result<VehicleId, GameError> {
        let handle = self.require(room_id)?;
        let vehicle_id = handle.room.lock().join(user_id, display_name)?;
        Ok(vehicle_id)
    }

    /// Safe to call for absent users and rooms
    pub fn leave_room(&self, room_id: &RoomId, user_id: &UserId) {
        let Some(handle) = self.get(room_id) else {
            debug!(room_id = %room_id, user_id = %user_id, "Leave for unknown room");
            return;
        };

        let now_empty = {
            let mut room = handle.room.lock();
            room.leave(user_id);
            room.is_empty() && !room.is_closed()
        };

        if now_empty && self.auto_teardown && self.teardown_if(&handle, Room::is_empty) {
            info!(room_id = %room_id, "Empty room torn down");
        }
    }

    /// Unregister and close the room behind `handle` if it is still the
    /// registered one and `condition` holds. The check and the close happen
    /// under the same room lock, so a concurrent join either lands first and
    /// keeps the room, or finds it closed.
    fn teardown_if(&self, handle: &RoomHandle, condition: impl FnOnce(&Room) -> bool) -> bool {
        self.rooms
            .remove_if(&handle.id, |_, registered| {
                if !Arc::ptr_eq(&registered.room, &handle.room) {
                    return false;
                }
                let mut room = registered.room.lock();
                if !condition(&room) {
                    return false;
                }
                room.close();
                true
            })
            .is_some()
    }

    /// Tear down rooms that have stayed empty for longer than `grace`
    pub fn reap_idle(&self, grace: Duration) -> usize {
        self.reap_idle_at(monotonic_millis(), grace)
    }

    fn reap_idle_at(&self, now: u64, grace: Duration) -> usize {
        if !self.auto_teardown {
            return 0;
        }
        let Some(cutoff) = now.checked_sub(grace.as_millis() as u64) else {
            return 0;
        };

        let mut reaped = 0;
        for handle in self.handles() {
            if self.teardown_if(&handle, |room| room.idle_since_before(cutoff)) {
                info!(room_id = %handle.id, "Idle room reaped");
                reaped += 1;
            }
        }
        reaped
    }

    pub fn submit_input(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        keys: &HashMap<String, bool>,
    ) -> Result<(), GameError> {
        let handle = self.require(room_id)?;
        let input = InputState::from_keys(keys);
        let mut room = handle.room.lock();
        room.set_input(user_id, input)
    }

    pub fn subscribe(&self, room_id: &RoomId) -> Result<broadcast::Receiver<ServerMsg>, GameError> {
        Ok(self.require(room_id)?.outbound.subscribe())
    }

    pub fn leaderboard(&self, room_id: &RoomId) -> Result<Vec<CheckpointEntry>, GameError> {
        let handle = self.require(room_id)?;
        let entries = handle.room.lock().leaderboard();
        Ok(entries)
    }

    /// Point-in-time copy of all handles; the caller locks rooms one at a time
    pub fn handles(&self) -> Vec<RoomHandle> {
        self.rooms.iter().map(|r| r.value().clone()).collect()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn stats(&self) -> RegistryStats {
        self.rooms
            .iter()
            .fold(RegistryStats::default(), |mut stats, entry| {
                stats.rooms += 1;
                stats.vehicles += entry.value().room.lock().vehicle_count();
                stats
            })
    }
}
