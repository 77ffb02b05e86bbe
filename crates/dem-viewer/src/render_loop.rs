//! An explicit render loop with its own lifecycle.
//!
//! [`RenderLoop`] tracks whether frames are being drawn, counts them, and
//! forwards viewport changes to callbacks registered with
//! [`RenderLoop::on_resize`]. It has no window dependency, so it can be driven
//! by hand in tests; [`RenderLoopPlugin`] wires it to Bevy's schedule and
//! window events.

use std::time::Duration;

use bevy::ecs::message::MessageReader;
use bevy::prelude::*;
use bevy::window::{PrimaryWindow, WindowResized};

/// Largest device pixel ratio passed on to shaders.
///
/// Bevy always renders at the window's full physical size, so this only
/// scales pixel-sized shader effects; it does not shrink the surface.
pub const MAX_PIXEL_RATIO: f32 = 2.0;

/// Size of the drawing surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Logical width.
    pub width: f32,
    /// Logical height.
    pub height: f32,
    /// Physical pixels per logical pixel.
    pub scale_factor: f32,
}

impl Viewport {
    /// Device pixel ratio clamped to [`MAX_PIXEL_RATIO`].
    #[must_use]
    pub fn pixel_ratio(&self) -> f32 {
        self.scale_factor.min(MAX_PIXEL_RATIO)
    }

    /// Size of the drawing surface in physical pixels, at the unclamped
    /// scale factor. Fragment coordinates are measured against this.
    #[must_use]
    pub fn physical_size(&self) -> Vec2 {
        (Vec2::new(self.width, self.height) * self.scale_factor).round()
    }
}

type ResizeCallback = Box<dyn FnMut(Viewport) + Send + Sync>;

/// Lifecycle and timing of the frame loop.
#[derive(Resource, Default)]
pub struct RenderLoop {
    running: bool,
    frames: u64,
    elapsed: Duration,
    viewport: Option<Viewport>,
    resize_callbacks: Vec<ResizeCallback>,
}

impl RenderLoop {
    pub fn start(&mut self) {
        if !self.running {
            tracing::info!("render loop started");
        }
        self.running = true;
    }

    pub fn stop(&mut self) {
        if self.running {
            tracing::info!(frames = self.frames, "render loop stopped");
        }
        self.running = false;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Advance by one frame. Has no effect while stopped.
    pub fn tick(&mut self, delta: Duration) {
        if self.running {
            self.frames += 1;
            self.elapsed += delta;
        }
    }

    /// Frames drawn since creation.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Time spent running, excluding stopped periods.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Register a callback for viewport changes.
    ///
    /// If a viewport is already known the callback receives it immediately.
    pub fn on_resize(&mut self, mut callback: impl FnMut(Viewport) + Send + Sync + 'static) {
        if let Some(viewport) = self.viewport {
            callback(viewport);
        }
        self.resize_callbacks.push(Box::new(callback));
    }

    /// Report a new viewport. Repeats of the current size are ignored.
    pub fn resize(&mut self, viewport: Viewport) {
        if self.viewport == Some(viewport) {
            return;
        }
        tracing::debug!(
            width = viewport.width,
            height = viewport.height,
            scale_factor = viewport.scale_factor,
            "viewport resized"
        );
        self.viewport = Some(viewport);
        for callback in &mut self.resize_callbacks {
            callback(viewport);
        }
    }

    #[must_use]
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }
}

/// Drives [`RenderLoop`] from the app schedule.
pub struct RenderLoopPlugin;

impl Plugin for RenderLoopPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<RenderLoop>()
            .add_systems(Startup, start_render_loop)
            .add_systems(
                Update,
                (forward_window_resize, tick_render_loop, sync_camera_activity),
            );
    }
}

#[allow(clippy::needless_pass_by_value)]
fn start_render_loop(
    mut render_loop: ResMut<RenderLoop>,
    windows: Query<&Window, With<PrimaryWindow>>,
) {
    if let Ok(window) = windows.single() {
        render_loop.resize(viewport_of(window));
    }
    render_loop.start();
}

#[allow(clippy::needless_pass_by_value)]
fn tick_render_loop(mut render_loop: ResMut<RenderLoop>, time: Res<Time>) {
    render_loop.tick(time.delta());
}

fn forward_window_resize(
    mut render_loop: ResMut<RenderLoop>,
    mut resized: MessageReader<WindowResized>,
    windows: Query<&Window, With<PrimaryWindow>>,
) {
    // Only the latest size matters.
    let Some(event) = resized.read().last() else {
        return;
    };
    if let Ok(window) = windows.get(event.window) {
        render_loop.resize(viewport_of(window));
    }
}

/// Stopped loops keep the app alive but draw no 3D scene.
#[allow(clippy::needless_pass_by_value)]
fn sync_camera_activity(
    render_loop: Res<RenderLoop>,
    mut cameras: Query<&mut Camera, With<Camera3d>>,
) {
    let running = render_loop.is_running();
    for mut camera in &mut cameras {
        if camera.is_active != running {
            camera.is_active = running;
        }
    }
}

fn viewport_of(window: &Window) -> Viewport {
    Viewport {
        width: window.width(),
        height: window.height(),
        scale_factor: window.scale_factor(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn viewport(width: f32, height: f32, scale_factor: f32) -> Viewport {
        Viewport {
            width,
            height,
            scale_factor,
        }
    }

    #[test]
    fn test_tick_counts_only_while_running() {
        let mut render_loop = RenderLoop::default();
        render_loop.tick(Duration::from_millis(16));
        assert_eq!(render_loop.frames(), 0);

        render_loop.start();
        render_loop.tick(Duration::from_millis(16));
        render_loop.tick(Duration::from_millis(16));
        assert_eq!(render_loop.frames(), 2);
        assert_eq!(render_loop.elapsed(), Duration::from_millis(32));

        render_loop.stop();
        render_loop.tick(Duration::from_millis(16));
        assert_eq!(render_loop.frames(), 2);
        assert!(!render_loop.is_running());
    }

    #[test]
    fn test_resize_invokes_callbacks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut render_loop = RenderLoop::default();
        let sink = Arc::clone(&seen);
        render_loop.on_resize(move |v| sink.lock().unwrap().push(v));

        render_loop.resize(viewport(800.0, 600.0, 1.0));
        render_loop.resize(viewport(800.0, 600.0, 1.0));
        render_loop.resize(viewport(1024.0, 768.0, 2.0));

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![viewport(800.0, 600.0, 1.0), viewport(1024.0, 768.0, 2.0)]
        );
    }

    #[test]
    fn test_late_callback_receives_current_viewport() {
        let mut render_loop = RenderLoop::default();
        render_loop.resize(viewport(640.0, 480.0, 1.5));

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        render_loop.on_resize(move |v| *sink.lock().unwrap() = Some(v));

        assert_eq!(*seen.lock().unwrap(), Some(viewport(640.0, 480.0, 1.5)));
    }

    #[test]
    fn test_pixel_ratio_is_clamped() {
        assert_eq!(viewport(100.0, 50.0, 1.5).pixel_ratio(), 1.5);
        assert_eq!(viewport(100.0, 50.0, 3.0).pixel_ratio(), 2.0);
        assert_eq!(
            viewport(100.0, 50.0, 3.0).physical_size(),
            Vec2::new(300.0, 150.0)
        );
    }

    #[test]
    fn test_stopping_deactivates_camera() {
        let mut app = App::new();
        app.init_resource::<RenderLoop>()
            .add_systems(Update, sync_camera_activity);
        let camera = app.world_mut().spawn(Camera3d::default()).id();
        let overlay = app.world_mut().spawn(Camera::default()).id();

        app.world_mut().resource_mut::<RenderLoop>().stop();
        app.update();
        assert!(!app.world().get::<Camera>(camera).unwrap().is_active);
        assert!(app.world().get::<Camera>(overlay).unwrap().is_active);

        app.world_mut().resource_mut::<RenderLoop>().start();
        app.update();
        assert!(app.world().get::<Camera>(camera).unwrap().is_active);
    }

    #[test]
    fn test_camera_follows_loop_while_ticking() {
        let mut app = App::new();
        app.init_resource::<RenderLoop>()
            .init_resource::<Time>()
            .add_systems(Update, (tick_render_loop, sync_camera_activity).chain());
        let camera = app.world_mut().spawn(Camera3d::default()).id();
        app.world_mut().resource_mut::<RenderLoop>().start();
        app.update();

        // Something else flips the camera while the loop keeps ticking.
        app.world_mut().get_mut::<Camera>(camera).unwrap().is_active = false;
        app.update();
        assert!(app.world().get::<Camera>(camera).unwrap().is_active);

        app.world_mut().resource_mut::<RenderLoop>().stop();
        app.update();
        app.update();
        assert!(!app.world().get::<Camera>(camera).unwrap().is_active);
    }
}
