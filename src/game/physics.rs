//! Rigid-body integration and static world geometry
//!
//! The vehicle model never integrates on its own: it accumulates forces on a
//! [`RigidBody`] and the room's [`PhysicsWorld`] advances every body once per
//! tick through its [`Integrator`].

use glam::{Mat3, Quat, Vec3};

/// Standard gravity (m/s^2)
pub const GRAVITY: f32 = 9.82;

/// A single dynamic body
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Mass in kg
    pub mass: f32,
    /// Diagonal of the body-space inverse inertia tensor
    pub inv_inertia_local: Vec3,
    /// Radius of the collision sphere used against static geometry
    pub collision_radius: f32,
    /// Fraction of angular velocity removed per second
    pub angular_damping: f32,
    force: Vec3,
    torque: Vec3,
}

impl RigidBody {
    /// Box-shaped body with uniform density
    pub fn new_box(mass: f32, half_extents: Vec3, position: Vec3, orientation: Quat) -> Self {
        let size = half_extents * 2.0;
        let inertia = Vec3::new(
            mass / 12.0 * (size.y * size.y + size.z * size.z),
            mass / 12.0 * (size.x * size.x + size.z * size.z),
            mass / 12.0 * (size.x * size.x + size.y * size.y),
        );

        Self {
            position,
            orientation,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            mass,
            inv_inertia_local: inertia.recip(),
            collision_radius: half_extents.y,
            angular_damping: 0.5,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
        }
    }

    /// Force through the centre of mass
    pub fn apply_central_force(&mut self, force: Vec3) {
        self.force += force;
    }

    /// Force at a world-space point, adds torque about the centre of mass
    pub fn apply_force_at(&mut self, force: Vec3, world_point: Vec3) {
        self.force += force;
        self.torque += (world_point - self.position).cross(force);
    }

    /// Velocity of a world-space point rigidly attached to the body
    pub fn point_velocity(&self, world_point: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(world_point - self.position)
    }

    /// World-space inverse inertia: R * I^-1 * R^T
    pub fn inv_inertia_world(&self) -> Mat3 {
        let r = Mat3::from_quat(self.orientation);
        r * Mat3::from_diagonal(self.inv_inertia_local) * r.transpose()
    }

    pub fn clear_forces(&mut self) {
        self.force = Vec3::ZERO;
        self.torque = Vec3::ZERO;
    }

    /// Teleport with zero motion
    pub fn reset_to(&mut self, position: Vec3, orientation: Quat) {
        self.position = position;
        self.orientation = orientation;
        self.linear_velocity = Vec3::ZERO;
        self.angular_velocity = Vec3::ZERO;
        self.clear_forces();
    }

    /// True when every transform and velocity component is finite
    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.orientation.is_finite()
            && self.linear_velocity.is_finite()
            && self.angular_velocity.is_finite()
    }
}

/// Advances one body by `dt` using the forces accumulated on it
pub trait Integrator: Send + Sync {
    fn integrate(&self, body: &mut RigidBody, gravity: Vec3, dt: f32);
}

/// Symplectic Euler: velocities first, then positions from the new velocities
#[derive(Debug, Clone, Copy, Default)]
pub struct SemiImplicitEuler;

impl Integrator for SemiImplicitEuler {
    fn integrate(&self, body: &mut RigidBody, gravity: Vec3, dt: f32) {
        let accel = body.force / body.mass + gravity;
        body.linear_velocity += accel * dt;

        let angular_accel = body.inv_inertia_world() * body.torque;
        body.angular_velocity += angular_accel * dt;
        body.angular_velocity *= (1.0 - body.angular_damping * dt).max(0.0);

        body.position += body.linear_velocity * dt;

        // dq/dt = 0.5 * w * q
        let w = body.angular_velocity;
        let spin = Quat::from_xyzw(w.x, w.y, w.z, 0.0) * body.orientation;
        body.orientation = (body.orientation + spin * (0.5 * dt)).normalize();

        body.clear_forces();
    }
}

/// Static collidable geometry handed over by the circuit provider
#[derive(Debug, Clone, PartialEq)]
pub enum StaticCollider {
    /// Infinite plane: points p with `normal.dot(p) == offset`
    Plane { normal: Vec3, offset: f32 },
    /// Axis-aligned box (barriers, walls)
    Box { center: Vec3, half_extents: Vec3 },
}

/// Result of a ray cast against static geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
}

impl StaticCollider {
    fn raycast(&self, origin: Vec3, dir: Vec3, max_distance: f32) -> Option<RayHit> {
        match *self {
            StaticCollider::Plane { normal, offset } => {
                let denom = normal.dot(dir);
                if denom.abs() < 1e-6 {
                    return None;
                }
                let t = (offset - normal.dot(origin)) / denom;
                if !(0.0..=max_distance).contains(&t) {
                    return None;
                }
                // Only hit from the front side
                let hit_normal = if denom < 0.0 { normal } else { -normal };
                Some(RayHit {
                    point: origin + dir * t,
                    normal: hit_normal,
                    distance: t,
                })
            }
            StaticCollider::Box {
                center,
                half_extents,
            } => {
                // Slab test
                let min = center - half_extents;
                let max = center + half_extents;
                let mut t_min = 0.0f32;
                let mut t_max = max_distance;
                let mut normal = Vec3::ZERO;

                for axis in 0..3 {
                    let o = origin[axis];
                    let d = dir[axis];
                    if d.abs() < 1e-8 {
                        if o < min[axis] || o > max[axis] {
                            return None;
                        }
                        continue;
                    }
                    let inv = 1.0 / d;
                    let mut t0 = (min[axis] - o) * inv;
                    let mut t1 = (max[axis] - o) * inv;
                    let mut n = Vec3::ZERO;
                    n[axis] = -1.0;
                    if t0 > t1 {
                        std::mem::swap(&mut t0, &mut t1);
                        n[axis] = 1.0;
                    }
                    if t0 > t_min {
                        t_min = t0;
                        normal = n;
                    }
                    t_max = t_max.min(t1);
                    if t_min > t_max {
                        return None;
                    }
                }

                Some(RayHit {
                    point: origin + dir * t_min,
                    normal: if normal == Vec3::ZERO { Vec3::Y } else { normal },
                    distance: t_min,
                })
            }
        }
    }

    /// Push a sphere out of this collider; returns the contact normal if touching
    fn resolve_sphere(&self, center: Vec3, radius: f32) -> Option<(Vec3, f32)> {
        match *self {
            StaticCollider::Plane { normal, offset } => {
                let dist = normal.dot(center) - offset;
                (dist < radius).then_some((normal, radius - dist))
            }
            StaticCollider::Box {
                center: box_center,
                half_extents,
            } => {
                let closest = center.clamp(box_center - half_extents, box_center + half_extents);
                let offset = center - closest;
                let dist = offset.length();
                if dist >= radius || dist < 1e-6 {
                    return None;
                }
                Some((offset / dist, radius - dist))
            }
        }
    }
}

/// One room's isolated physics world: static geometry, gravity and the integrator
pub struct PhysicsWorld {
    gravity: Vec3,
    colliders: Vec<StaticCollider>,
    integrator: Box<dyn Integrator>,
}

impl PhysicsWorld {
    pub fn new(colliders: Vec<StaticCollider>) -> Self {
        Self::with_integrator(colliders, Box::new(SemiImplicitEuler))
    }

    pub fn with_integrator(colliders: Vec<StaticCollider>, integrator: Box<dyn Integrator>) -> Self {
        Self {
            gravity: Vec3::new(0.0, -GRAVITY, 0.0),
            colliders,
            integrator,
        }
    }

    /// Closest hit along `dir` (unit) within `max_distance`
    pub fn raycast(&self, origin: Vec3, dir: Vec3, max_distance: f32) -> Option<RayHit> {
        self.colliders
            .iter()
            .filter_map(|c| c.raycast(origin, dir, max_distance))
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Integrate every body once, then push bodies out of static geometry
    pub fn step<'a, I>(&self, bodies: I, dt: f32)
    where
        I: IntoIterator<Item = &'a mut RigidBody>,
    {
        for body in bodies {
            self.integrator.integrate(body, self.gravity, dt);

            for collider in &self.colliders {
                if let Some((normal, depth)) =
                    collider.resolve_sphere(body.position, body.collision_radius)
                {
                    body.position += normal * depth;
                    let into = body.linear_velocity.dot(normal);
                    if into < 0.0 {
                        body.linear_velocity -= normal * into;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ground() -> Vec<StaticCollider> {
        vec![StaticCollider::Plane {
            normal: Vec3::Y,
            offset: 0.0,
        }]
    }

    #[test]
    fn raycast_down_hits_ground_plane() {
        let world = PhysicsWorld::new(ground());
        let hit = world
            .raycast(Vec3::new(3.0, 2.0, -1.0), Vec3::NEG_Y, 5.0)
            .expect("hit");
        assert!((hit.distance - 2.0).abs() < 1e-6);
        assert_eq!(hit.normal, Vec3::Y);
    }

    #[test]
    fn raycast_respects_max_distance() {
        let world = PhysicsWorld::new(ground());
        assert!(world.raycast(Vec3::new(0.0, 2.0, 0.0), Vec3::NEG_Y, 1.0).is_none());
    }

    #[test]
    fn raycast_hits_nearest_box_face() {
        let world = PhysicsWorld::new(vec![StaticCollider::Box {
            center: Vec3::new(0.0, 0.0, -10.0),
            half_extents: Vec3::new(5.0, 1.0, 1.0),
        }]);
        let hit = world.raycast(Vec3::ZERO, Vec3::NEG_Z, 50.0).expect("hit");
        assert!((hit.distance - 9.0).abs() < 1e-5);
        assert_eq!(hit.normal, Vec3::Z);
    }

    #[test]
    fn free_body_falls_under_gravity() {
        let world = PhysicsWorld::new(Vec::new());
        let mut body = RigidBody::new_box(10.0, Vec3::ONE, Vec3::new(0.0, 10.0, 0.0), Quat::IDENTITY);
        world.step([&mut body], 0.1);
        assert!((body.linear_velocity.y + GRAVITY * 0.1).abs() < 1e-5);
        assert!(body.position.y < 10.0);
    }

    #[test]
    fn central_force_does_not_spin() {
        let world = PhysicsWorld::new(Vec::new());
        let mut body = RigidBody::new_box(10.0, Vec3::ONE, Vec3::ZERO, Quat::IDENTITY);
        body.apply_central_force(Vec3::new(100.0, 0.0, 0.0));
        world.step([&mut body], 0.1);
        assert_eq!(body.angular_velocity, Vec3::ZERO);
        assert_eq!(body.orientation, Quat::IDENTITY);
        assert!((body.linear_velocity.x - 1.0).abs() < 1e-5);
    }

    struct Frozen;

    impl Integrator for Frozen {
        fn integrate(&self, body: &mut RigidBody, _gravity: Vec3, _dt: f32) {
            body.clear_forces();
        }
    }

    #[test]
    fn world_steps_through_its_integrator() {
        let world = PhysicsWorld::with_integrator(ground(), Box::new(Frozen));
        let start = Vec3::new(0.0, 5.0, 0.0);
        let mut body = RigidBody::new_box(10.0, Vec3::splat(0.5), start, Quat::IDENTITY);
        body.apply_central_force(Vec3::new(100.0, 0.0, 0.0));
        world.step([&mut body], 0.1);
        assert_eq!(body.position, start);
        assert_eq!(body.linear_velocity, Vec3::ZERO);
    }

    #[test]
    fn body_is_pushed_out_of_ground() {
        let world = PhysicsWorld::new(ground());
        let mut body = RigidBody::new_box(10.0, Vec3::splat(0.5), Vec3::new(0.0, 0.1, 0.0), Quat::IDENTITY);
        world.step([&mut body], 1.0 / 60.0);
        assert!(body.position.y >= 0.5 - 1e-4);
        assert!(body.linear_velocity.y >= 0.0);
    }
}
