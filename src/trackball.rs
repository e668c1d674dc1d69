//! Virtual trackball for rotating models with the mouse.
use glam::{IVec2, Quat, Vec2, Vec3};

use crate::Timer;

/// Upper bound of the angular velocity, in radians per millisecond.
pub const MAX_VELOCITY: f32 = 720.0 * std::f32::consts::PI / 180.0 / 1000.0;

/// Maps mouse drags onto a hemisphere and accumulates the resulting rotation.
///
/// After the button is released the model keeps spinning around the last
/// axis at the last velocity.
#[derive(Debug, Clone)]
pub struct TrackBall {
    axis: Vec3,
    velocity: f32,
    rotation: Quat,
    duration_since_last_event: f32,
    last_position: Vec3,
    last_time: Timer,
    mouse_tracking: bool,
    viewport_size: IVec2,
}

impl TrackBall {
    /// Creates a trackball at rest.
    pub fn new() -> Self {
        TrackBall {
            axis: Vec3::ONE,
            velocity: 0.0,
            rotation: Quat::IDENTITY,
            duration_since_last_event: 0.0,
            last_position: Vec3::ZERO,
            last_time: Timer::new(),
            mouse_tracking: false,
            viewport_size: IVec2::ZERO,
        }
    }

    /// Updates the rotation while dragging.
    pub fn mouse_move(&mut self, position: IVec2) {
        if !self.mouse_tracking {
            return;
        }

        self.duration_since_last_event = (self.last_time.restart() * 1000.0) as f32;

        let current = self.project(position);
        if current.abs_diff_eq(self.last_position, f32::EPSILON) {
            return;
        }

        let axis = self.last_position.cross(current);
        let angle = axis.length();
        self.axis = axis.normalize_or_zero();

        self.velocity = (angle / (self.duration_since_last_event + f32::EPSILON))
            .clamp(0.0, MAX_VELOCITY);

        if self.axis != Vec3::ZERO {
            self.rotation = Quat::from_axis_angle(self.axis, angle) * self.rotation;
        }
        self.last_position = current;
    }

    /// Starts a drag.
    pub fn mouse_press(&mut self, position: IVec2) {
        self.rotation = self.rotation();
        self.mouse_tracking = true;
        self.last_time.restart();
        self.last_position = self.project(position);
        self.velocity = 0.0;
    }

    /// Ends a drag.
    pub fn mouse_release(&mut self, position: IVec2) {
        self.mouse_move(position);

        let duration = self.duration_since_last_event;
        self.velocity /= duration.max(1.0);
        self.mouse_tracking = false;
    }

    /// Sets the viewport used to normalize mouse positions.
    #[inline]
    pub fn resize_viewport(&mut self, size: IVec2) {
        self.viewport_size = size;
    }

    /// Current rotation, including the spin accumulated since release.
    pub fn rotation(&self) -> Quat {
        if self.mouse_tracking || self.axis == Vec3::ZERO {
            return self.rotation;
        }
        let angle = self.velocity * (self.last_time.elapsed() * 1000.0) as f32;
        Quat::from_axis_angle(self.axis.normalize(), angle) * self.rotation
    }

    /// Sets the rotation axis.
    #[inline]
    pub fn set_axis(&mut self, axis: Vec3) {
        self.axis = axis;
    }

    /// Sets the angular velocity in radians per millisecond.
    #[inline]
    pub fn set_velocity(&mut self, velocity: f32) {
        self.velocity = velocity;
    }

    /// Angular velocity in radians per millisecond.
    #[inline]
    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    /// Current rotation axis.
    #[inline]
    pub fn axis(&self) -> Vec3 {
        self.axis
    }

    /// Projects a window position onto the unit hemisphere facing the viewer.
    pub fn project(&self, position: IVec2) -> Vec3 {
        let size = self.viewport_size.max(IVec2::ONE).as_vec2();
        let ndc = Vec2::new(
            2.0 * position.x as f32 / size.x - 1.0,
            1.0 - 2.0 * position.y as f32 / size.y,
        );

        let squared_length = ndc.length_squared();
        if squared_length >= 1.0 {
            ndc.normalize().extend(0.0)
        } else {
            ndc.extend((1.0 - squared_length).sqrt())
        }
    }
}

impl Default for TrackBall {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trackball() -> TrackBall {
        let mut trackball = TrackBall::new();
        trackball.resize_viewport(IVec2::new(100, 100));
        trackball
    }

    #[test]
    fn center_projects_to_pole() {
        let p = trackball().project(IVec2::new(50, 50));
        assert!(p.abs_diff_eq(Vec3::Z, 1e-6));
    }

    #[test]
    fn corner_projects_to_rim() {
        let p = trackball().project(IVec2::new(100, 0));
        assert!((p.length() - 1.0).abs() < 1e-6);
        assert_eq!(p.z, 0.0);
        assert!(p.x > 0.0 && p.y > 0.0);
    }

    #[test]
    fn projection_is_on_unit_sphere() {
        let t = trackball();
        for (x, y) in [(10, 20), (50, 70), (90, 90), (0, 50)] {
            let p = t.project(IVec2::new(x, y));
            assert!((p.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn idle_trackball_has_identity_rotation() {
        let mut t = trackball();
        t.set_velocity(0.0);
        assert!(t.rotation().abs_diff_eq(Quat::IDENTITY, 1e-6));
    }

    #[test]
    fn moves_without_press_are_ignored() {
        let mut t = trackball();
        t.mouse_move(IVec2::new(80, 50));
        assert_eq!(t.velocity(), 0.0);
    }

    #[test]
    fn drag_rotates_around_vertical_axis() {
        let mut t = trackball();
        t.mouse_press(IVec2::new(50, 50));
        std::thread::sleep(std::time::Duration::from_millis(5));
        t.mouse_move(IVec2::new(70, 50));

        let axis = t.axis();
        assert!(axis.y > 0.99);
        assert!(t.velocity() > 0.0 && t.velocity() <= MAX_VELOCITY);

        let rotated = t.rotation() * Vec3::Z;
        assert!(rotated.x > 0.0);
    }

    #[test]
    fn release_keeps_velocity_bounded() {
        let mut t = trackball();
        t.mouse_press(IVec2::new(50, 50));
        std::thread::sleep(std::time::Duration::from_millis(5));
        t.mouse_release(IVec2::new(60, 50));
        assert!(t.velocity() <= MAX_VELOCITY);
    }

    #[test]
    fn release_divides_velocity_by_drag_duration() {
        let mut t = trackball();
        t.mouse_press(IVec2::new(50, 50));
        std::thread::sleep(std::time::Duration::from_millis(20));
        t.mouse_move(IVec2::new(60, 50));
        let dragging = t.velocity();
        assert!(dragging > 0.0);

        // Releasing where the last move ended keeps the axis and only scales
        // the velocity down by the time since that move.
        std::thread::sleep(std::time::Duration::from_millis(20));
        t.mouse_release(IVec2::new(60, 50));
        assert!(t.velocity() > 0.0);
        assert!(t.velocity() < dragging);
    }

    #[test]
    fn keeps_spinning_after_release() {
        let mut t = trackball();
        t.mouse_press(IVec2::new(50, 50));
        std::thread::sleep(std::time::Duration::from_millis(5));
        t.mouse_release(IVec2::new(70, 50));
        assert!(t.velocity() > 0.0);

        let a = t.rotation();
        std::thread::sleep(std::time::Duration::from_millis(50));
        let b = t.rotation();
        assert!(!a.abs_diff_eq(b, 1e-6));

        let (axis, angle) = (b * a.inverse()).to_axis_angle();
        assert!(angle > 0.0);
        assert!(axis.y.abs() > 0.99);
    }

    #[test]
    fn idle_spin_advances_with_time() {
        let mut t = trackball();
        t.set_axis(Vec3::Y);
        t.set_velocity(0.001);

        let a = t.rotation();
        std::thread::sleep(std::time::Duration::from_millis(30));
        let b = t.rotation();

        let (axis, angle) = (b * a.inverse()).to_axis_angle();
        assert!(axis.abs_diff_eq(Vec3::Y, 1e-3));
        // At least 30 ms at 0.001 rad/ms.
        assert!(angle >= 0.029);
    }
}
