//! Orbit camera with damping.
//!
//! Left-drag rotates around the target, the wheel zooms. Rotation input is
//! accumulated and bled into the view a fraction per frame, so the camera
//! glides to rest after the mouse stops.

use std::f32::consts::{FRAC_PI_2, TAU};

use bevy::ecs::message::MessageReader;
use bevy::input::mouse::{MouseMotion, MouseScrollUnit, MouseWheel};
use bevy::prelude::*;
use bevy::window::PrimaryWindow;
use bevy_egui::EguiContexts;

/// Fraction of pending rotation applied each frame.
pub const DAMPING_FACTOR: f32 = 0.05;
/// Distance multiplier per wheel step.
pub const ZOOM_STEP: f32 = 0.95;
pub const MIN_RADIUS: f32 = 0.1;
pub const MAX_RADIUS: f32 = 500.0;
/// Keeps the camera off the poles, where `looking_at` degenerates.
const MAX_PITCH: f32 = FRAC_PI_2 - 0.01;
/// Pending rotation below this is dropped.
const REST_EPSILON: f32 = 1e-5;

/// Plugin for the orbit camera controls.
pub struct OrbitCameraPlugin;

impl Plugin for OrbitCameraPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, (orbit_input, apply_orbit).chain());
    }
}

/// Spherical camera state around a target point.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub radius: f32,
    /// Rotation about the vertical axis; zero looks down -Z from +Z.
    pub yaw: f32,
    /// Elevation above the horizontal plane.
    pub pitch: f32,
    pending_yaw: f32,
    pending_pitch: f32,
}

impl OrbitCamera {
    /// A camera at `position` looking at `target`.
    #[must_use]
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        let offset = position - target;
        let radius = offset.length().clamp(MIN_RADIUS, MAX_RADIUS);
        let horizontal = Vec2::new(offset.x, offset.z).length();
        Self {
            target,
            radius,
            yaw: offset.x.atan2(offset.z),
            pitch: offset.y.atan2(horizontal).clamp(-MAX_PITCH, MAX_PITCH),
            pending_yaw: 0.0,
            pending_pitch: 0.0,
        }
    }

    /// Queue a rotation from a mouse drag of `delta` pixels.
    ///
    /// A drag across the full viewport height turns one full circle.
    pub fn rotate(&mut self, delta: Vec2, viewport_height: f32) {
        if viewport_height <= 0.0 {
            return;
        }
        self.pending_yaw -= TAU * delta.x / viewport_height;
        self.pending_pitch += TAU * delta.y / viewport_height;
    }

    /// Zoom by `steps` wheel notches; positive moves closer.
    pub fn zoom(&mut self, steps: f32) {
        self.radius = (self.radius * ZOOM_STEP.powf(steps)).clamp(MIN_RADIUS, MAX_RADIUS);
    }

    /// Apply one frame of damped rotation.
    pub fn update(&mut self) {
        self.yaw += self.pending_yaw * DAMPING_FACTOR;
        self.pitch = (self.pitch + self.pending_pitch * DAMPING_FACTOR).clamp(-MAX_PITCH, MAX_PITCH);

        self.pending_yaw *= 1.0 - DAMPING_FACTOR;
        self.pending_pitch *= 1.0 - DAMPING_FACTOR;
        if self.pending_yaw.abs() < REST_EPSILON {
            self.pending_yaw = 0.0;
        }
        if self.pending_pitch.abs() < REST_EPSILON {
            self.pending_pitch = 0.0;
        }
    }

    #[must_use]
    pub fn is_at_rest(&self) -> bool {
        self.pending_yaw == 0.0 && self.pending_pitch == 0.0
    }

    #[must_use]
    pub fn position(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.target
            + self.radius * Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw)
    }

    #[must_use]
    pub fn transform(&self) -> Transform {
        Transform::from_translation(self.position()).looking_at(self.target, Vec3::Y)
    }
}

/// Feed mouse input into every orbit camera.
fn orbit_input(
    mouse: Res<ButtonInput<MouseButton>>,
    mut mouse_motion: MessageReader<MouseMotion>,
    mut scroll_events: MessageReader<MouseWheel>,
    window: Single<&Window, With<PrimaryWindow>>,
    mut contexts: EguiContexts,
    mut cameras: Query<&mut OrbitCamera>,
) {
    let egui_wants_pointer = contexts
        .ctx_mut()
        .ok()
        .is_some_and(|ctx| ctx.is_pointer_over_area() || ctx.is_using_pointer());

    let mut drag = Vec2::ZERO;
    for event in mouse_motion.read() {
        drag += event.delta;
    }
    let mut scroll = 0.0;
    for event in scroll_events.read() {
        // Web reports pixels, native reports lines.
        scroll += match event.unit {
            MouseScrollUnit::Line => event.y,
            MouseScrollUnit::Pixel => event.y / 120.0,
        };
    }

    if egui_wants_pointer {
        return;
    }

    let dragging = mouse.pressed(MouseButton::Left) && drag != Vec2::ZERO;
    for mut camera in &mut cameras {
        if dragging {
            camera.rotate(drag, window.height());
        }
        if scroll != 0.0 {
            camera.zoom(scroll);
        }
    }
}

fn apply_orbit(mut cameras: Query<(&mut OrbitCamera, &mut Transform)>) {
    for (mut camera, mut transform) in &mut cameras {
        if !camera.is_at_rest() {
            camera.update();
        }
        let target = camera.transform();
        if *transform != target {
            *transform = target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_vec3_near(a: Vec3, b: Vec3) {
        assert!(a.abs_diff_eq(b, 1e-5), "{a} != {b}");
    }

    #[test]
    fn test_looking_at_round_trips_position() {
        let camera = OrbitCamera::looking_at(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO);
        assert!((camera.radius - 2.0).abs() < 1e-6);
        assert!(camera.yaw.abs() < 1e-6);
        assert!(camera.pitch.abs() < 1e-6);
        assert_vec3_near(camera.position(), Vec3::new(0.0, 0.0, 2.0));

        let camera = OrbitCamera::looking_at(Vec3::new(1.0, 1.0, -1.0), Vec3::new(0.0, 0.5, 0.0));
        assert_vec3_near(camera.position(), Vec3::new(1.0, 1.0, -1.0));
    }

    #[test]
    fn test_transform_faces_target() {
        let camera = OrbitCamera::looking_at(Vec3::new(3.0, 2.0, 1.0), Vec3::ZERO);
        let transform = camera.transform();
        let expected = (Vec3::ZERO - transform.translation).normalize();
        assert_vec3_near(*transform.forward(), expected);
    }

    #[test]
    fn test_rotation_is_damped() {
        let mut camera = OrbitCamera::looking_at(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO);
        // Quarter of the viewport height turns a quarter circle in total.
        camera.rotate(Vec2::new(-100.0, 0.0), 400.0);

        camera.update();
        let first = camera.yaw;
        assert!((first - FRAC_PI_2 * DAMPING_FACTOR).abs() < 1e-6);

        for _ in 0..1000 {
            camera.update();
        }
        assert!(camera.is_at_rest());
        assert!((camera.yaw - FRAC_PI_2).abs() < 1e-3);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut camera = OrbitCamera::looking_at(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO);
        camera.rotate(Vec2::new(0.0, 10_000.0), 100.0);
        for _ in 0..1000 {
            camera.update();
        }
        assert!(camera.pitch <= MAX_PITCH);
        assert!(camera.position().is_finite());
    }

    #[test]
    fn test_zoom_scales_and_clamps_radius() {
        let mut camera = OrbitCamera::looking_at(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO);
        camera.zoom(1.0);
        assert!((camera.radius - 1.9).abs() < 1e-6);
        camera.zoom(-1.0);
        assert!((camera.radius - 2.0).abs() < 1e-5);

        camera.zoom(1_000.0);
        assert_eq!(camera.radius, MIN_RADIUS);
        camera.zoom(-10_000.0);
        assert_eq!(camera.radius, MAX_RADIUS);
    }

    #[test]
    fn test_zero_height_viewport_ignores_drag() {
        let mut camera = OrbitCamera::looking_at(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO);
        camera.rotate(Vec2::new(50.0, 50.0), 0.0);
        assert!(camera.is_at_rest());
    }
}
