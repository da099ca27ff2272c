//! Vehicle model: one chassis body, four raycast wheels, steering and drift control
//!
//! Control flow per tick: [`Vehicle::apply_input`] turns keys into steering,
//! engine, brake and coast targets; [`Vehicle::step`] ray-casts the
//! suspension and pushes the resulting forces onto the body; the room's
//! physics world integrates; [`Vehicle::after_step`] does wheel bookkeeping
//! and recovers bodies that left the valid state space.

use std::fmt;
use std::str::FromStr;

use glam::{Quat, Vec3};
use tracing::{debug, warn};

use super::circuit::SpawnPose;
use super::error::GameError;
use super::ids::{RoomId, UserId, VehicleId};
use super::input::InputState;
use super::physics::{PhysicsWorld, RigidBody, GRAVITY};
use super::snapshot::{Snapshot, WheelSummary};
use crate::util::time::monotonic_millis;

/// Wheel layout is fixed: front-left, front-right, rear-left, rear-right
pub const WHEEL_COUNT: usize = 4;
pub const FRONT_WHEELS: [usize; 2] = [0, 1];
pub const REAR_WHEELS: [usize; 2] = [2, 3];

/// Chassis-space forward axis
pub const FORWARD: Vec3 = Vec3::NEG_Z;

/// Which wheels switch to the drift friction coefficient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriftFrictionScope {
    #[default]
    RearWheels,
    AllWheels,
}

impl DriftFrictionScope {
    pub fn covers(&self, wheel: usize) -> bool {
        match self {
            DriftFrictionScope::RearWheels => REAR_WHEELS.contains(&wheel),
            DriftFrictionScope::AllWheels => wheel < WHEEL_COUNT,
        }
    }
}

impl FromStr for DriftFrictionScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rear" | "rear_wheels" => Ok(Self::RearWheels),
            "all" | "all_wheels" => Ok(Self::AllWheels),
            other => Err(format!("unknown drift friction scope: {other}")),
        }
    }
}

impl fmt::Display for DriftFrictionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriftFrictionScope::RearWheels => f.write_str("rear"),
            DriftFrictionScope::AllWheels => f.write_str("all"),
        }
    }
}

/// Drift control state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriftState {
    #[default]
    Normal,
    Drifting,
}

/// Chassis, suspension and handling constants
#[derive(Debug, Clone)]
pub struct VehicleTuning {
    pub chassis_mass: f32,
    pub chassis_half_extents: Vec3,
    /// Suspension anchor points in chassis space, in wheel order
    pub wheel_anchors: [Vec3; WHEEL_COUNT],
    pub wheel_radius: f32,
    pub suspension_rest_length: f32,
    /// Compression at which four springs carry the chassis weight
    pub static_compression: f32,
    /// 1.0 = critically damped
    pub damping_ratio: f32,
    pub max_suspension_force: f32,

    /// Maximum steering angle (radians)
    pub max_steer: f32,
    /// Exponential smoothing rate toward the steering target (1/s)
    pub steer_rate: f32,
    /// Smallest dt accepted by the control code
    pub min_dt: f32,

    /// Engine force per rear wheel (N)
    pub engine_force: f32,
    /// Fraction of engine force available in reverse
    pub reverse_ratio: f32,
    pub max_forward_speed: f32,
    pub max_reverse_speed: f32,
    /// Brake force per wheel (N)
    pub brake_force: f32,
    /// Coasting deceleration per unit speed (1/s)
    pub coast_decel: f32,

    pub normal_friction: f32,
    pub drift_friction: f32,
    /// Fraction of a wheel's sideways velocity its tyre tries to cancel per tick
    pub lateral_grip: f32,

    pub drift_turn_threshold: f32,
    pub drift_min_speed: f32,
    pub drift_recovery_speed: f32,
    pub drift_scope: DriftFrictionScope,

    /// Anything below this height has fallen off the world
    pub min_height: f32,
}

impl Default for VehicleTuning {
    fn default() -> Self {
        Self {
            chassis_mass: 150.0,
            chassis_half_extents: Vec3::new(1.0, 0.5, 2.0),
            wheel_anchors: [
                Vec3::new(-1.0, -0.2, -1.3),
                Vec3::new(1.0, -0.2, -1.3),
                Vec3::new(-1.0, -0.2, 1.3),
                Vec3::new(1.0, -0.2, 1.3),
            ],
            wheel_radius: 0.5,
            suspension_rest_length: 0.3,
            static_compression: 0.1,
            damping_ratio: 1.0,
            max_suspension_force: 100_000.0,

            max_steer: 0.5,
            steer_rate: 10.0,
            min_dt: 1.0e-3,

            engine_force: 1000.0,
            reverse_ratio: 0.5,
            max_forward_speed: 10.0,
            max_reverse_speed: 4.0,
            brake_force: 800.0,
            coast_decel: 0.8,

            normal_friction: 1.5,
            drift_friction: 0.4,
            lateral_grip: 0.5,

            drift_turn_threshold: 0.25,
            drift_min_speed: 5.0,
            drift_recovery_speed: 3.0,
            drift_scope: DriftFrictionScope::RearWheels,

            min_height: -20.0,
        }
    }
}

impl VehicleTuning {
    /// Spring rate so four wheels hold the chassis at `static_compression`
    pub fn spring_stiffness(&self) -> f32 {
        self.chassis_mass * GRAVITY / (WHEEL_COUNT as f32 * self.static_compression)
    }

    pub fn damping(&self) -> f32 {
        let quarter_mass = self.chassis_mass / WHEEL_COUNT as f32;
        2.0 * self.damping_ratio * (self.spring_stiffness() * quarter_mass).sqrt()
    }

    /// Chassis centre height above flat ground at rest
    pub fn ride_height(&self) -> f32 {
        -self.wheel_anchors[0].y + self.suspension_rest_length - self.static_compression
            + self.wheel_radius
    }

    /// Steady forward acceleration with the engine on and nothing else acting
    pub fn engine_acceleration(&self) -> f32 {
        self.engine_force * REAR_WHEELS.len() as f32 / self.chassis_mass
    }
}

/// Per-wheel runtime state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wheel {
    pub steering: f32,
    pub roll: f32,
    /// Roll change during the last tick
    pub delta_rotation: f32,
    pub engine_force: f32,
    pub brake: f32,
    pub suspension_length: f32,
    pub suspension_compression: f32,
    pub slip: f32,
    pub friction: f32,
    pub in_contact: bool,
}

impl Wheel {
    fn new(tuning: &VehicleTuning) -> Self {
        Self {
            steering: 0.0,
            roll: 0.0,
            delta_rotation: 0.0,
            engine_force: 0.0,
            brake: 0.0,
            suspension_length: tuning.suspension_rest_length,
            suspension_compression: 0.0,
            slip: 0.0,
            friction: tuning.normal_friction,
            in_contact: false,
        }
    }

    fn summary(&self) -> WheelSummary {
        WheelSummary {
            steering: self.steering,
            roll: self.roll,
            engine_force: self.engine_force,
            brake: self.brake,
            slip: self.slip,
            suspension_length: self.suspension_length,
        }
    }
}

/// Physics-backed on the server and for a client's own car; snapshot-backed for
/// cars a client only observes. Callers read both through [`Vehicle::state`].
#[derive(Debug, Clone)]
pub enum VehicleBody {
    Simulated { body: RigidBody },
    Remote { last_snapshot: Snapshot },
}

/// One car in one room
#[derive(Debug, Clone)]
pub struct Vehicle {
    id: VehicleId,
    room_id: RoomId,
    user_id: UserId,
    body: VehicleBody,
    wheels: [Wheel; WHEEL_COUNT],
    steering: f32,
    drift: DriftState,
    input: InputState,
    /// Longitudinal coasting force chosen by the last `apply_input`
    coast_force: f32,
    spawn: SpawnPose,
    tuning: VehicleTuning,
}

impl Vehicle {
    /// Physics-backed vehicle resting on flat ground at `spawn`
    pub fn simulated(room_id: RoomId, user_id: UserId, spawn: SpawnPose, tuning: VehicleTuning) -> Self {
        let body = RigidBody::new_box(
            tuning.chassis_mass,
            tuning.chassis_half_extents,
            Self::spawn_position(&spawn, &tuning),
            spawn.orientation,
        );
        Self::with_body(room_id, user_id, VehicleBody::Simulated { body }, spawn, tuning)
    }

    /// Snapshot-backed vehicle for remote observation
    pub fn remote(room_id: RoomId, user_id: UserId, snapshot: Snapshot) -> Self {
        let spawn = SpawnPose {
            position: snapshot.position,
            orientation: snapshot.orientation,
        };
        let tuning = VehicleTuning::default();
        let mut vehicle = Self::with_body(
            room_id,
            user_id,
            VehicleBody::Remote {
                last_snapshot: snapshot.clone(),
            },
            spawn,
            tuning,
        );
        vehicle.copy_wheels_from(&snapshot);
        vehicle
    }

    fn with_body(
        room_id: RoomId,
        user_id: UserId,
        body: VehicleBody,
        spawn: SpawnPose,
        tuning: VehicleTuning,
    ) -> Self {
        let wheel = Wheel::new(&tuning);
        Self {
            id: VehicleId::next(),
            room_id,
            user_id,
            body,
            wheels: [wheel; WHEEL_COUNT],
            steering: 0.0,
            drift: DriftState::Normal,
            input: InputState::default(),
            coast_force: 0.0,
            spawn,
            tuning,
        }
    }

    fn spawn_position(spawn: &SpawnPose, tuning: &VehicleTuning) -> Vec3 {
        spawn.position + spawn.orientation * Vec3::new(0.0, tuning.ride_height(), 0.0)
    }

    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn wheels(&self) -> &[Wheel; WHEEL_COUNT] {
        &self.wheels
    }

    pub fn steering(&self) -> f32 {
        self.steering
    }

    pub fn drift_state(&self) -> DriftState {
        self.drift
    }

    pub fn is_drifting(&self) -> bool {
        self.drift == DriftState::Drifting
    }

    pub fn tuning(&self) -> &VehicleTuning {
        &self.tuning
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.body, VehicleBody::Simulated { .. })
    }

    pub fn body(&self) -> Option<&RigidBody> {
        match &self.body {
            VehicleBody::Simulated { body } => Some(body),
            VehicleBody::Remote { .. } => None,
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut RigidBody> {
        match &mut self.body {
            VehicleBody::Simulated { body } => Some(body),
            VehicleBody::Remote { .. } => None,
        }
    }

    /// World-space forward axis
    pub fn forward(&self) -> Vec3 {
        self.orientation() * FORWARD
    }

    pub fn position(&self) -> Vec3 {
        match &self.body {
            VehicleBody::Simulated { body } => body.position,
            VehicleBody::Remote { last_snapshot } => last_snapshot.position,
        }
    }

    pub fn orientation(&self) -> Quat {
        match &self.body {
            VehicleBody::Simulated { body } => body.orientation,
            VehicleBody::Remote { last_snapshot } => last_snapshot.orientation,
        }
    }

    pub fn linear_velocity(&self) -> Vec3 {
        match &self.body {
            VehicleBody::Simulated { body } => body.linear_velocity,
            VehicleBody::Remote { last_snapshot } => last_snapshot.linear_velocity,
        }
    }

    /// Signed speed along the forward axis (negative when reversing)
    pub fn forward_speed(&self) -> f32 {
        self.linear_velocity().dot(self.forward())
    }

    /// Turn keys into control targets for the coming physics step.
    pub fn apply_input(&mut self, input: &InputState, dt: f32) {
        let dt = dt.max(self.tuning.min_dt);
        self.input = *input;

        // Steering: exponential approach, so a larger dt converges further
        let target = match (input.left, input.right) {
            (true, false) => self.tuning.max_steer,
            (false, true) => -self.tuning.max_steer,
            _ => 0.0,
        };
        let alpha = 1.0 - (-self.tuning.steer_rate * dt).exp();
        self.steering += (target - self.steering) * alpha;
        self.steering = self
            .steering
            .clamp(-self.tuning.max_steer, self.tuning.max_steer);
        for &i in &FRONT_WHEELS {
            self.wheels[i].steering = self.steering;
        }

        let speed = self.forward_speed();

        for wheel in &mut self.wheels {
            wheel.engine_force = 0.0;
            wheel.brake = 0.0;
        }

        let engine = match (input.forward, input.backward) {
            (true, false) if speed < self.tuning.max_forward_speed => self.tuning.engine_force,
            (false, true) if -speed < self.tuning.max_reverse_speed => {
                -self.tuning.engine_force * self.tuning.reverse_ratio
            }
            _ => 0.0,
        };
        for &i in &REAR_WHEELS {
            self.wheels[i].engine_force = engine;
        }

        if input.brake {
            for wheel in &mut self.wheels {
                wheel.brake = self.tuning.brake_force;
            }
        }

        // Coasting: opposes motion, never strong enough to reverse it within one step
        self.coast_force = if !input.throttle() && !input.brake {
            let mass = self.tuning.chassis_mass;
            let wanted = -self.tuning.coast_decel * mass * speed;
            let limit = speed.abs() * mass / dt;
            wanted.clamp(-limit, limit)
        } else {
            0.0
        };

        self.update_drift(input, speed);
    }

    fn update_drift(&mut self, input: &InputState, speed: f32) {
        let speed = speed.abs();
        let next = match self.drift {
            DriftState::Normal
                if input.drift
                    && self.steering.abs() > self.tuning.drift_turn_threshold
                    && speed > self.tuning.drift_min_speed =>
            {
                DriftState::Drifting
            }
            DriftState::Drifting if !input.drift || speed < self.tuning.drift_recovery_speed => {
                DriftState::Normal
            }
            current => current,
        };

        if next != self.drift {
            debug!(
                room_id = %self.room_id,
                user_id = %self.user_id,
                from = ?self.drift,
                to = ?next,
                "Drift state changed"
            );
            self.drift = next;
            self.apply_friction();
        }
    }

    /// Set every wheel's friction from the drift state in one go
    fn apply_friction(&mut self) {
        let drifting = self.is_drifting();
        let scope = self.tuning.drift_scope;
        for (i, wheel) in self.wheels.iter_mut().enumerate() {
            wheel.friction = if drifting && scope.covers(i) {
                self.tuning.drift_friction
            } else {
                self.tuning.normal_friction
            };
        }
    }

    /// Accumulate this tick's suspension, drive, brake and tyre forces on the body.
    /// Integration is left to the world's single physics step.
    pub fn step(&mut self, world: &PhysicsWorld, dt: f32) {
        let dt = dt.max(self.tuning.min_dt);
        let tuning = &self.tuning;
        let VehicleBody::Simulated { body } = &mut self.body else {
            return;
        };

        let up = body.orientation * Vec3::Y;
        let forward = body.orientation * FORWARD;
        let stiffness = tuning.spring_stiffness();
        let damping = tuning.damping();
        let quarter_mass = body.mass / WHEEL_COUNT as f32;
        let cast_length = tuning.suspension_rest_length + tuning.wheel_radius;

        for (i, wheel) in self.wheels.iter_mut().enumerate() {
            let anchor = body.position + body.orientation * tuning.wheel_anchors[i];

            let Some(hit) = world.raycast(anchor, -up, cast_length) else {
                wheel.in_contact = false;
                wheel.suspension_length = tuning.suspension_rest_length;
                wheel.suspension_compression = 0.0;
                wheel.slip = 0.0;
                wheel.delta_rotation = 0.0;
                continue;
            };

            wheel.in_contact = true;
            let length = (hit.distance - tuning.wheel_radius).max(0.0);
            wheel.suspension_length = length;
            wheel.suspension_compression = tuning.suspension_rest_length - length;

            // Spring-damper along the contact normal
            let point_velocity = body.point_velocity(anchor);
            let normal_speed = point_velocity.dot(hit.normal);
            let load = (stiffness * wheel.suspension_compression - damping * normal_speed)
                .clamp(0.0, tuning.max_suspension_force);
            body.apply_force_at(hit.normal * load, anchor);

            // Wheel frame on the contact plane
            let steered = Quat::from_axis_angle(up, wheel.steering) * forward;
            let wheel_forward =
                (steered - hit.normal * steered.dot(hit.normal)).normalize_or_zero();
            let wheel_side = hit.normal.cross(wheel_forward).normalize_or_zero();

            // Drive and brake act through the centre of mass (no pitch)
            let long_speed = point_velocity.dot(wheel_forward);
            let mut long_force = wheel.engine_force;
            if wheel.brake > 0.0 {
                let stopping = long_speed.abs() * quarter_mass / dt;
                long_force -= long_speed.signum() * wheel.brake.min(stopping);
            }
            if long_force != 0.0 {
                body.apply_central_force(wheel_forward * long_force);
            }

            // Sideways grip, capped by friction * load. Applied at the wheel's
            // horizontal offset so it produces yaw but no roll.
            let side_speed = point_velocity.dot(wheel_side);
            let wanted = -side_speed * quarter_mass / dt * tuning.lateral_grip;
            let limit = wheel.friction * load;
            let side_force = wanted.clamp(-limit, limit);
            wheel.slip = if wanted == 0.0 {
                0.0
            } else if limit <= 0.0 {
                1.0
            } else {
                (wanted.abs() / limit).min(1.0)
            };
            let lever = anchor - body.position;
            let lever = lever - up * lever.dot(up);
            body.apply_force_at(wheel_side * side_force, body.position + lever);

            wheel.delta_rotation = long_speed / tuning.wheel_radius * dt;
        }

        if self.coast_force != 0.0 {
            body.apply_central_force(forward * self.coast_force);
        }
    }

    /// Wheel roll bookkeeping and invalid-state recovery after integration.
    /// Returns true when the vehicle had to be reset to its spawn pose.
    pub fn after_step(&mut self) -> bool {
        for wheel in &mut self.wheels {
            wheel.roll = (wheel.roll + wheel.delta_rotation).rem_euclid(std::f32::consts::TAU);
        }

        match self.validate() {
            Ok(()) => false,
            Err(e) => {
                warn!(room_id = %self.room_id, error = %e, "Resetting vehicle to spawn");
                self.reset_to_spawn();
                true
            }
        }
    }

    fn validate(&self) -> Result<(), GameError> {
        let Some(body) = self.body() else {
            return Ok(());
        };

        let reason = if !body.is_finite() {
            Some("non-finite transform".to_string())
        } else if body.position.y < self.tuning.min_height {
            Some(format!("fell below {}", self.tuning.min_height))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(GameError::InvalidVehicleState {
                user_id: self.user_id.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Back to the spawn pose with zero motion and neutral controls
    pub fn reset_to_spawn(&mut self) {
        let position = Self::spawn_position(&self.spawn, &self.tuning);
        let orientation = self.spawn.orientation;
        match &mut self.body {
            VehicleBody::Simulated { body } => body.reset_to(position, orientation),
            VehicleBody::Remote { last_snapshot } => {
                *last_snapshot = Snapshot::at_rest(position, orientation);
            }
        }
        self.steering = 0.0;
        self.coast_force = 0.0;
        self.drift = DriftState::Normal;
        self.wheels = [Wheel::new(&self.tuning); WHEEL_COUNT];
    }

    /// Current state; no side effects.
    pub fn state(&self) -> Snapshot {
        match &self.body {
            VehicleBody::Simulated { body } => Snapshot {
                position: body.position,
                orientation: body.orientation,
                linear_velocity: body.linear_velocity,
                angular_velocity: body.angular_velocity,
                wheels: self.wheels.map(|w| w.summary()),
                timestamp: monotonic_millis(),
            },
            VehicleBody::Remote { last_snapshot } => last_snapshot.clone(),
        }
    }

    /// Overwrite transform and velocities from a snapshot
    pub fn sync_from_snapshot(&mut self, snapshot: &Snapshot) {
        match &mut self.body {
            VehicleBody::Simulated { body } => {
                body.position = snapshot.position;
                body.orientation = snapshot.orientation;
                body.linear_velocity = snapshot.linear_velocity;
                body.angular_velocity = snapshot.angular_velocity;
                body.clear_forces();
            }
            VehicleBody::Remote { last_snapshot } => {
                *last_snapshot = snapshot.clone();
                self.copy_wheels_from(snapshot);
            }
        }
    }

    fn copy_wheels_from(&mut self, snapshot: &Snapshot) {
        for (wheel, summary) in self.wheels.iter_mut().zip(snapshot.wheels.iter()) {
            wheel.steering = summary.steering;
            wheel.roll = summary.roll;
            wheel.engine_force = summary.engine_force;
            wheel.brake = summary.brake;
            wheel.slip = summary.slip;
            wheel.suspension_length = summary.suspension_length;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::circuit::{CircuitSource, FlatCircuit};

    const DT: f32 = 1.0 / 60.0;

    fn flat_world() -> (PhysicsWorld, SpawnPose) {
        let circuit = FlatCircuit.generate(&RoomId::from("test"));
        (PhysicsWorld::new(circuit.colliders), circuit.spawn)
    }

    fn car(spawn: SpawnPose) -> Vehicle {
        Vehicle::simulated(
            RoomId::from("test"),
            UserId::from("u1"),
            spawn,
            VehicleTuning::default(),
        )
    }

    fn tick(vehicle: &mut Vehicle, world: &PhysicsWorld, input: &InputState) {
        vehicle.apply_input(input, DT);
        vehicle.step(world, DT);
        if let Some(body) = vehicle.body_mut() {
            world.step([body], DT);
        }
        vehicle.after_step();
    }

    fn assert_friction_consistent(vehicle: &Vehicle) {
        let t = vehicle.tuning();
        for (i, wheel) in vehicle.wheels().iter().enumerate() {
            assert!(
                wheel.friction == t.normal_friction || wheel.friction == t.drift_friction,
                "intermediate friction {}",
                wheel.friction
            );
            let expect = if vehicle.is_drifting() && t.drift_scope.covers(i) {
                t.drift_friction
            } else {
                t.normal_friction
            };
            assert_eq!(wheel.friction, expect);
        }
    }

    #[test]
    fn steering_converges_monotonically_within_bounds() {
        let (_, spawn) = flat_world();
        let mut vehicle = car(spawn);
        let max = vehicle.tuning().max_steer;
        let left = InputState {
            left: true,
            ..Default::default()
        };
        let right = InputState {
            right: true,
            ..Default::default()
        };

        // Mixed, including tiny and zero dt
        let dts = [DT, 0.0, 1e-6, 0.1, DT, 0.5, 2.0, DT];
        let mut prev = vehicle.steering();
        for &dt in &dts {
            vehicle.apply_input(&left, dt);
            let s = vehicle.steering();
            assert!(s >= prev, "steering moved away from target");
            assert!(s <= max && s >= -max);
            prev = s;
        }

        for &dt in &dts {
            vehicle.apply_input(&right, dt);
            let s = vehicle.steering();
            assert!(s <= prev, "steering moved away from target");
            assert!(s >= -max, "steering overshot");
            prev = s;
        }
    }

    #[test]
    fn larger_dt_converges_further() {
        let (_, spawn) = flat_world();
        let left = InputState {
            left: true,
            ..Default::default()
        };

        let mut small = car(spawn);
        small.apply_input(&left, 0.01);
        let mut large = car(spawn);
        large.apply_input(&left, 0.1);
        assert!(large.steering() > small.steering());
    }

    #[test]
    fn releasing_keys_returns_steering_to_center() {
        let (_, spawn) = flat_world();
        let mut vehicle = car(spawn);
        let left = InputState {
            left: true,
            ..Default::default()
        };
        for _ in 0..30 {
            vehicle.apply_input(&left, DT);
        }
        assert!(vehicle.steering() > 0.4);
        for _ in 0..120 {
            vehicle.apply_input(&InputState::default(), DT);
        }
        assert!(vehicle.steering().abs() < 1e-3);
    }

    #[test]
    fn vehicle_rests_on_ground_at_spawn() {
        let (world, spawn) = flat_world();
        let mut vehicle = car(spawn);
        let start_y = vehicle.position().y;
        for _ in 0..60 {
            tick(&mut vehicle, &world, &InputState::default());
        }
        assert!(vehicle.wheels().iter().all(|w| w.in_contact));
        assert!((vehicle.position().y - start_y).abs() < 0.05);
        assert!(vehicle.forward_speed().abs() < 1e-3);
    }

    #[test]
    fn forward_speed_rises_then_plateaus_at_cap() {
        let (world, spawn) = flat_world();
        let mut vehicle = car(spawn);
        let cap = vehicle.tuning().max_forward_speed;
        let per_step = vehicle.tuning().engine_acceleration() * DT;
        let throttle = InputState {
            forward: true,
            ..Default::default()
        };

        let mut prev = vehicle.forward_speed();
        let mut reached_cap = false;
        for _ in 0..60 {
            tick(&mut vehicle, &world, &throttle);
            let speed = vehicle.forward_speed();
            assert!(speed >= prev - 1e-4, "speed dropped: {prev} -> {speed}");
            assert!(speed <= cap + per_step + 1e-3, "speed {speed} overshot cap");
            if speed >= cap {
                reached_cap = true;
            }
            prev = speed;
        }
        assert!(reached_cap);
    }

    #[test]
    fn coasting_slows_without_reversing() {
        let (world, spawn) = flat_world();
        let mut vehicle = car(spawn);
        let throttle = InputState {
            forward: true,
            ..Default::default()
        };
        for _ in 0..30 {
            tick(&mut vehicle, &world, &throttle);
        }
        let mut prev = vehicle.forward_speed();
        assert!(prev > 1.0);
        for _ in 0..600 {
            tick(&mut vehicle, &world, &InputState::default());
            let speed = vehicle.forward_speed();
            assert!(speed <= prev + 1e-4);
            assert!(speed >= -1e-3, "coasting reversed direction");
            prev = speed;
        }
        assert!(prev < 0.1);
    }

    #[test]
    fn brake_stops_without_reversing() {
        let (world, spawn) = flat_world();
        let mut vehicle = car(spawn);
        let throttle = InputState {
            forward: true,
            ..Default::default()
        };
        for _ in 0..30 {
            tick(&mut vehicle, &world, &throttle);
        }
        let brake = InputState {
            brake: true,
            ..Default::default()
        };
        for _ in 0..240 {
            tick(&mut vehicle, &world, &brake);
            assert!(vehicle.forward_speed() >= -1e-3);
        }
        assert!(vehicle.forward_speed().abs() < 0.05);
        assert!(vehicle.wheels().iter().all(|w| w.brake > 0.0));
    }

    #[test]
    fn drift_enters_and_recovers_with_atomic_friction() {
        let (world, spawn) = flat_world();
        let mut vehicle = car(spawn);
        assert_friction_consistent(&vehicle);

        let throttle = InputState {
            forward: true,
            ..Default::default()
        };
        for _ in 0..45 {
            tick(&mut vehicle, &world, &throttle);
            assert_friction_consistent(&vehicle);
        }
        assert!(vehicle.forward_speed() > vehicle.tuning().drift_min_speed);

        let drift_turn = InputState {
            forward: true,
            left: true,
            drift: true,
            ..Default::default()
        };
        let mut entered = false;
        for _ in 0..20 {
            tick(&mut vehicle, &world, &drift_turn);
            assert_friction_consistent(&vehicle);
            entered |= vehicle.is_drifting();
        }
        assert!(entered, "never started drifting");

        // Releasing the drift key restores grip immediately
        tick(&mut vehicle, &world, &throttle);
        assert!(!vehicle.is_drifting());
        assert_friction_consistent(&vehicle);
    }

    #[test]
    fn drift_ends_when_speed_drops_below_recovery() {
        let (world, spawn) = flat_world();
        let mut vehicle = car(spawn);
        let recovery = vehicle.tuning().drift_recovery_speed;
        let throttle = InputState {
            forward: true,
            ..Default::default()
        };
        for _ in 0..45 {
            tick(&mut vehicle, &world, &throttle);
        }
        let drift_turn = InputState {
            forward: true,
            left: true,
            drift: true,
            ..Default::default()
        };
        for _ in 0..20 {
            tick(&mut vehicle, &world, &drift_turn);
            if vehicle.is_drifting() {
                break;
            }
        }
        assert!(vehicle.is_drifting(), "never started drifting");

        // Drift key stays down; only the loss of speed ends the drift
        let drift_brake = InputState {
            left: true,
            drift: true,
            brake: true,
            ..Default::default()
        };
        let mut speed_at_exit = None;
        for _ in 0..600 {
            let speed = vehicle.forward_speed().abs();
            tick(&mut vehicle, &world, &drift_brake);
            assert_friction_consistent(&vehicle);
            if !vehicle.is_drifting() {
                speed_at_exit = Some(speed);
                break;
            }
        }
        let speed_at_exit = speed_at_exit.expect("drift never recovered");
        assert!(speed_at_exit < recovery, "left drift at {speed_at_exit} m/s");
        let normal = vehicle.tuning().normal_friction;
        assert!(vehicle.wheels().iter().all(|w| w.friction == normal));

        // Slow car with the key still held stays out of the drift
        for _ in 0..10 {
            tick(&mut vehicle, &world, &drift_brake);
            assert!(!vehicle.is_drifting());
        }
    }

    #[test]
    fn drift_requires_turn_and_speed() {
        let (world, spawn) = flat_world();
        let mut vehicle = car(spawn);
        let drift_only = InputState {
            drift: true,
            left: true,
            ..Default::default()
        };
        // Standing still: no drift however hard we steer
        for _ in 0..30 {
            tick(&mut vehicle, &world, &drift_only);
        }
        assert!(!vehicle.is_drifting());
    }

    #[test]
    fn all_wheel_scope_covers_front_axle() {
        let (world, spawn) = flat_world();
        let tuning = VehicleTuning {
            drift_scope: DriftFrictionScope::AllWheels,
            ..Default::default()
        };
        let mut vehicle = Vehicle::simulated(RoomId::from("t"), UserId::from("u"), spawn, tuning);
        let throttle = InputState {
            forward: true,
            ..Default::default()
        };
        for _ in 0..45 {
            tick(&mut vehicle, &world, &throttle);
        }
        let drift_turn = InputState {
            forward: true,
            left: true,
            drift: true,
            ..Default::default()
        };
        for _ in 0..20 {
            tick(&mut vehicle, &world, &drift_turn);
            if vehicle.is_drifting() {
                break;
            }
        }
        assert!(vehicle.is_drifting());
        let drift = vehicle.tuning().drift_friction;
        assert!(vehicle.wheels().iter().all(|w| w.friction == drift));
    }

    #[test]
    fn snapshot_round_trip_is_exact() {
        let (_, spawn) = flat_world();
        let mut vehicle = car(spawn);
        let snapshot = Snapshot {
            position: Vec3::new(1.5, 0.75, -3.25),
            orientation: Quat::from_xyzw(0.0, 0.6, 0.0, 0.8),
            linear_velocity: Vec3::new(0.5, -0.125, 4.0),
            angular_velocity: Vec3::new(0.0, 0.25, 0.0),
            wheels: Default::default(),
            timestamp: 42,
        };
        vehicle.sync_from_snapshot(&snapshot);
        assert!(vehicle.state().same_motion(&snapshot));
    }

    #[test]
    fn falling_off_world_resets_to_spawn() {
        let world = PhysicsWorld::new(Vec::new());
        let spawn = SpawnPose {
            position: Vec3::new(5.0, 0.0, 5.0),
            orientation: Quat::IDENTITY,
        };
        let mut vehicle = car(spawn);
        let start = vehicle.position();
        let mut reset = false;
        for _ in 0..600 {
            vehicle.apply_input(&InputState::default(), DT);
            vehicle.step(&world, DT);
            if let Some(body) = vehicle.body_mut() {
                world.step([body], DT);
            }
            if vehicle.after_step() {
                reset = true;
                break;
            }
        }
        assert!(reset);
        assert_eq!(vehicle.position(), start);
        assert_eq!(vehicle.linear_velocity(), Vec3::ZERO);
    }

    #[test]
    fn nan_state_is_recovered_not_surfaced() {
        let (_, spawn) = flat_world();
        let mut vehicle = car(spawn);
        let start = vehicle.position();
        if let Some(body) = vehicle.body_mut() {
            body.position.x = f32::NAN;
        }
        assert!(vehicle.after_step());
        assert_eq!(vehicle.position(), start);
    }

    #[test]
    fn remote_vehicle_reads_back_synced_snapshot() {
        let snapshot = Snapshot::at_rest(Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY);
        let mut vehicle = Vehicle::remote(RoomId::from("r"), UserId::from("u"), snapshot.clone());
        assert!(!vehicle.is_simulated());
        assert_eq!(vehicle.state(), snapshot);

        let moved = Snapshot::at_rest(Vec3::new(4.0, 2.0, 3.0), Quat::IDENTITY);
        vehicle.sync_from_snapshot(&moved);
        assert_eq!(vehicle.state(), moved);
    }
}
