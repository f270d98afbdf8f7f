// Fly camera
//
// WASD moves, Space/Shift go up/down, holding the right mouse button looks
// around, the wheel changes field of view.

use crate::config::{CameraConfig, ControlsConfig};
use crate::input::InputState;
use glam::{Mat4, Vec3};
use winit::event::MouseButton;
use winit::keyboard::KeyCode;

const MAX_PITCH: f32 = 89.0;

#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    /// Degrees, 0 looks down -Z
    pub yaw: f32,
    /// Degrees, clamped to ±89
    pub pitch: f32,
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    move_speed: f32,
    sensitivity: f32,
}

impl Camera {
    pub fn new(camera: &CameraConfig, controls: &ControlsConfig) -> Self {
        let position = Vec3::from(camera.position);
        // Start out looking at the origin
        let to_origin = -position;
        let yaw = to_origin.x.atan2(-to_origin.z).to_degrees();
        let pitch = to_origin
            .y
            .atan2(Vec3::new(to_origin.x, 0.0, to_origin.z).length())
            .to_degrees()
            .clamp(-MAX_PITCH, MAX_PITCH);

        Self {
            position,
            yaw,
            pitch,
            fov_degrees: camera.fov_degrees,
            near: camera.near,
            far: camera.far,
            move_speed: controls.move_speed,
            sensitivity: controls.mouse_sensitivity,
        }
    }

    pub fn forward(&self) -> Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        Vec3::new(yaw.sin() * pitch.cos(), pitch.sin(), -yaw.cos() * pitch.cos()).normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(Vec3::Y).normalize()
    }

    pub fn update(&mut self, input: &InputState, dt: f32) {
        if input.is_button_held(MouseButton::Right) {
            let (dx, dy) = input.cursor_delta();
            self.yaw += dx as f32 * self.sensitivity;
            self.pitch = (self.pitch - dy as f32 * self.sensitivity).clamp(-MAX_PITCH, MAX_PITCH);
        }

        let forward = self.forward();
        let right = self.right();
        let movement = forward * input.axis(KeyCode::KeyS, KeyCode::KeyW)
            + right * input.axis(KeyCode::KeyA, KeyCode::KeyD)
            + Vec3::Y * input.axis(KeyCode::ShiftLeft, KeyCode::Space);

        if movement != Vec3::ZERO {
            self.position += movement.normalize() * self.move_speed * dt;
        }

        if input.scroll() != 0.0 {
            self.fov_degrees = (self.fov_degrees - input.scroll() * 2.0).clamp(20.0, 100.0);
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), Vec3::Y)
    }

    /// Right-handed perspective with depth 0..1 and Y flipped for Vulkan's
    /// downward clip-space Y.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut projection =
            Mat4::perspective_rh(self.fov_degrees.to_radians(), aspect.max(1e-3), self.near, self.far);
        projection.y_axis.y *= -1.0;
        projection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use winit::event::ElementState;

    fn camera_at(position: [f32; 3]) -> Camera {
        Camera::new(
            &CameraConfig {
                position,
                ..Default::default()
            },
            &ControlsConfig::default(),
        )
    }

    #[test]
    fn starts_looking_at_origin() {
        let camera = camera_at([0.0, 0.0, 5.0]);
        let forward = camera.forward();
        assert_relative_eq!(forward.z, -1.0, epsilon = 1e-5);
        assert_relative_eq!(forward.x, 0.0, epsilon = 1e-5);

        let camera = camera_at([3.0, 3.0, 0.0]);
        let expected = (-Vec3::new(3.0, 3.0, 0.0)).normalize();
        assert!(camera.forward().abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let camera = camera_at([0.0, 0.0, 5.0]);
        let clip = camera.projection(1.0) * camera.view() * Vec3::new(0.0, 1.0, 0.0).extend(1.0);
        assert!(clip.y / clip.w < 0.0);
        let depth = clip.z / clip.w;
        assert!((0.0..=1.0).contains(&depth));
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = camera_at([0.0, 0.0, 5.0]);
        let mut input = InputState::new();
        input.mouse_button(MouseButton::Right, ElementState::Pressed);
        input.cursor_moved(0.0, 0.0);
        input.cursor_moved(0.0, -100_000.0);

        camera.update(&input, 0.016);
        assert_relative_eq!(camera.pitch, MAX_PITCH);
    }

    #[test]
    fn moves_forward_at_configured_speed() {
        let mut camera = camera_at([0.0, 0.0, 5.0]);
        let mut input = InputState::new();
        input.key_event(KeyCode::KeyW, ElementState::Pressed, false);

        camera.update(&input, 0.5);
        assert_relative_eq!(camera.position.z, 5.0 - 3.0 * 0.5, epsilon = 1e-4);
    }
}
