//! Debug UI showing load progress, mesh size, and render loop state.

use bevy::camera::ClearColorConfig;
use bevy::diagnostic::{DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use bevy_egui::{
    EguiContexts, EguiGlobalSettings, EguiPlugin, EguiPrimaryContextPass, PrimaryEguiContext, egui,
};

use crate::launch_params::LaunchParams;
use crate::loader::LoadStatus;
use crate::render_loop::RenderLoop;

/// Plugin for debug UI overlay.
pub struct DebugUiPlugin;

impl Plugin for DebugUiPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(EguiPlugin::default())
            .insert_resource(EguiGlobalSettings {
                auto_create_primary_context: false,
                ..default()
            })
            .add_plugins(FrameTimeDiagnosticsPlugin::default())
            .add_systems(Startup, spawn_ui_camera)
            .add_systems(EguiPrimaryContextPass, debug_ui_system);
    }
}

/// Overlay camera that owns the egui context.
///
/// It stays active while the render loop is stopped, so the panel can
/// restart it. Order 1 draws it after the 3D camera.
fn spawn_ui_camera(mut commands: Commands) {
    commands.spawn((
        Camera2d,
        Camera {
            order: 1,
            clear_color: ClearColorConfig::None,
            ..default()
        },
        PrimaryEguiContext,
    ));
}

/// One line describing the load status.
fn status_line(status: &LoadStatus) -> String {
    match status {
        LoadStatus::Loading => "Status: loading...".to_string(),
        LoadStatus::Loaded(_) => "Status: loaded".to_string(),
        LoadStatus::Failed(message) => format!("Status: failed: {message}"),
    }
}

#[allow(clippy::needless_pass_by_value)]
fn debug_ui_system(
    mut contexts: EguiContexts,
    diagnostics: Res<DiagnosticsStore>,
    status: Res<LoadStatus>,
    params: Res<LaunchParams>,
    mut render_loop: ResMut<RenderLoop>,
) -> Result {
    let ctx = contexts.ctx_mut()?;

    let fps = diagnostics
        .get(&FrameTimeDiagnosticsPlugin::FPS)
        .and_then(bevy::diagnostic::Diagnostic::smoothed)
        .unwrap_or(0.0);

    egui::Window::new("Terrain")
        .default_pos([10.0, 10.0])
        .show(ctx, |ui| {
            ui.label(format!("FPS: {fps:.0}"));
            ui.separator();

            let [lng1, lat1, lng2, lat2] = params.bbox.bounds();
            ui.label(format!("Bounds: ({lng1}, {lat1}) - ({lng2}, {lat2})"));

            let line = status_line(&status);
            if matches!(*status, LoadStatus::Failed(_)) {
                ui.colored_label(egui::Color32::LIGHT_RED, line);
            } else {
                ui.label(line);
            }
            if let LoadStatus::Loaded(stats) = &*status {
                ui.label(format!("Grid: {} x {}", stats.width, stats.height));
                ui.label(format!(
                    "Mesh: {} vertices, {} triangles",
                    stats.vertices, stats.triangles
                ));
                ui.label(format!("Max height: {:.1}", stats.max));
            }

            ui.separator();
            let running = render_loop.is_running();
            if ui.button(if running { "Stop" } else { "Start" }).clicked() {
                if running {
                    render_loop.stop();
                } else {
                    render_loop.start();
                }
            }
            ui.label(format!("Frames: {}", render_loop.frames()));
            if let Some(viewport) = render_loop.viewport() {
                let size = viewport.physical_size();
                ui.label(format!(
                    "Viewport: {:.0} x {:.0} (ratio {:.2})",
                    size.x,
                    size.y,
                    viewport.pixel_ratio()
                ));
            }

            ui.separator();
            ui.label("Controls:");
            ui.label("  Left drag - Orbit");
            ui.label("  Wheel - Zoom");
        });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        assert_eq!(status_line(&LoadStatus::Loading), "Status: loading...");
        assert_eq!(
            status_line(&LoadStatus::Failed("http status 404".to_string())),
            "Status: failed: http status 404"
        );
    }
}
