//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::{BTreeMap, HashMap};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::game::ids::{RoomId, UserId};
use crate::game::leaderboard::CheckpointEntry;
use crate::game::snapshot::{Snapshot, WheelSummary};
use crate::game::vehicle::WHEEL_COUNT;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Full key state; replaces whatever the server held before
    Input {
        #[serde(default)]
        keys: HashMap<String, bool>,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave the room without closing the socket
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    #[serde(rename_all = "camelCase")]
    Welcome {
        user_id: UserId,
        room_id: RoomId,
        server_time: u64,
    },

    /// Vehicles whose state moved past the broadcast thresholds
    State {
        /// Server monotonic ms
        timestamp: u64,
        vehicles: BTreeMap<String, VehicleStateMsg>,
    },

    /// Everybody currently in the room
    Roster { users: Vec<UserId> },

    Leaderboard { entries: Vec<CheckpointEntry> },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// State message for a set of (user, snapshot) pairs
    pub fn state<'a>(timestamp: u64, vehicles: impl IntoIterator<Item = (&'a UserId, &'a Snapshot)>) -> Self {
        Self::State {
            timestamp,
            vehicles: vehicles
                .into_iter()
                .map(|(user_id, snapshot)| (user_id.to_string(), VehicleStateMsg::from(snapshot)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3Msg {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<Vec3> for Vec3Msg {
    fn from(v: Vec3) -> Self {
        Self { x: v.x, y: v.y, z: v.z }
    }
}

impl From<Vec3Msg> for Vec3 {
    fn from(v: Vec3Msg) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuatMsg {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl From<Quat> for QuatMsg {
    fn from(q: Quat) -> Self {
        Self {
            x: q.x,
            y: q.y,
            z: q.z,
            w: q.w,
        }
    }
}

impl From<QuatMsg> for Quat {
    fn from(q: QuatMsg) -> Self {
        Quat::from_xyzw(q.x, q.y, q.z, q.w)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WheelMsg {
    pub steering: f32,
    pub roll: f32,
    pub engine_force: f32,
    pub brake: f32,
    pub slip: f32,
    pub suspension_length: f32,
}

impl From<&WheelSummary> for WheelMsg {
    fn from(w: &WheelSummary) -> Self {
        Self {
            steering: w.steering,
            roll: w.roll,
            engine_force: w.engine_force,
            brake: w.brake,
            slip: w.slip,
            suspension_length: w.suspension_length,
        }
    }
}

impl From<WheelMsg> for WheelSummary {
    fn from(w: WheelMsg) -> Self {
        Self {
            steering: w.steering,
            roll: w.roll,
            engine_force: w.engine_force,
            brake: w.brake,
            slip: w.slip,
            suspension_length: w.suspension_length,
        }
    }
}

/// One vehicle inside a `state` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStateMsg {
    pub position: Vec3Msg,
    pub orientation: QuatMsg,
    pub velocity: Vec3Msg,
    pub angular_velocity: Vec3Msg,
    pub wheels: [WheelMsg; WHEEL_COUNT],
}

impl From<&Snapshot> for VehicleStateMsg {
    fn from(s: &Snapshot) -> Self {
        Self {
            position: s.position.into(),
            orientation: s.orientation.into(),
            velocity: s.linear_velocity.into(),
            angular_velocity: s.angular_velocity.into(),
            wheels: s.wheels.each_ref().map(WheelMsg::from),
        }
    }
}

impl VehicleStateMsg {
    /// Rebuild a snapshot; the wire carries one timestamp per message
    pub fn into_snapshot(self, timestamp: u64) -> Snapshot {
        Snapshot {
            position: self.position.into(),
            orientation: self.orientation.into(),
            linear_velocity: self.velocity.into(),
            angular_velocity: self.angular_velocity.into(),
            wheels: self.wheels.map(WheelSummary::from),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::circuit::SpawnPose;
    use crate::game::vehicle::{Vehicle, VehicleTuning};

    #[test]
    fn input_message_parses() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"input","keys":{"arrowup":true,"shift":false}}"#).unwrap();
        match msg {
            ClientMsg::Input { keys } => {
                assert_eq!(keys.get("arrowup"), Some(&true));
                assert_eq!(keys.get("shift"), Some(&false));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn input_without_keys_is_empty() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"input"}"#).unwrap();
        assert_eq!(msg, ClientMsg::Input { keys: HashMap::new() });
    }

    #[test]
    fn malformed_messages_are_rejected() {
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"teleport"}"#).is_err());
        assert!(serde_json::from_str::<ClientMsg>(r#"{"keys":{}}"#).is_err());
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"input","keys":{"w":"yes"}}"#).is_err());
        assert!(serde_json::from_str::<ClientMsg>("not json").is_err());
    }

    #[test]
    fn welcome_uses_camel_case_fields() {
        let msg = ServerMsg::Welcome {
            user_id: UserId::from("U1"),
            room_id: RoomId::from("R1"),
            server_time: 42,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "welcome");
        assert_eq!(json["userId"], "U1");
        assert_eq!(json["roomId"], "R1");
        assert_eq!(json["serverTime"], 42);
    }

    #[test]
    fn state_message_layout() {
        let mut snapshot = Snapshot::at_rest(Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY);
        snapshot.angular_velocity = Vec3::new(0.0, 0.5, 0.0);
        snapshot.wheels[2].engine_force = 1000.0;
        let user = UserId::from("U1");
        let msg = ServerMsg::state(7, [(&user, &snapshot)]);

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "state");
        assert_eq!(json["timestamp"], 7);
        let vehicle = &json["vehicles"]["U1"];
        assert_eq!(vehicle["position"]["z"], 3.0);
        assert_eq!(vehicle["orientation"]["w"], 1.0);
        assert_eq!(vehicle["angularVelocity"]["y"], 0.5);
        assert_eq!(vehicle["wheels"].as_array().unwrap().len(), 4);
        assert_eq!(vehicle["wheels"][2]["engineForce"], 1000.0);
        assert!(vehicle["wheels"][0].get("suspensionLength").is_some());
    }

    #[test]
    fn snapshot_survives_the_wire_into_a_vehicle() {
        let mut snapshot = Snapshot::at_rest(Vec3::new(12.5, 0.75, -3.25), Quat::from_rotation_y(0.5));
        snapshot.linear_velocity = Vec3::new(0.5, 0.0, -4.0);
        snapshot.angular_velocity = Vec3::new(0.0, 0.25, 0.0);
        snapshot.wheels[0].steering = 0.25;

        let user = UserId::from("U1");
        let text = serde_json::to_string(&ServerMsg::state(99, [(&user, &snapshot)])).unwrap();
        let ServerMsg::State { timestamp, mut vehicles } = serde_json::from_str(&text).unwrap() else {
            panic!("expected state");
        };
        let decoded = vehicles.remove("U1").unwrap().into_snapshot(timestamp);

        let mut vehicle = Vehicle::simulated(
            RoomId::from("R1"),
            user,
            SpawnPose::default(),
            VehicleTuning::default(),
        );
        vehicle.sync_from_snapshot(&decoded);
        let state = vehicle.state();
        assert!(state.same_motion(&snapshot));
    }

    #[test]
    fn wrong_wheel_count_is_rejected() {
        let text = r#"{"type":"state","timestamp":1,"vehicles":{"U1":{
            "position":{"x":0,"y":0,"z":0},
            "orientation":{"x":0,"y":0,"z":0,"w":1},
            "velocity":{"x":0,"y":0,"z":0},
            "angularVelocity":{"x":0,"y":0,"z":0},
            "wheels":[]}}}"#;
        assert!(serde_json::from_str::<ServerMsg>(text).is_err());
    }
}
