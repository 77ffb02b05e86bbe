//! 3D height-field viewer for cloud-optimized GeoTIFF elevation data.
//!
//! Fetches one window of a DEM at startup, turns it into a height-field
//! mesh, and shows it with an orbit camera and a debug panel.

mod async_runtime;
mod axes;
mod camera;
mod height_material;
mod launch_params;
mod loader;
mod mesh;
mod render_loop;
mod ui;

use async_runtime::AsyncRuntimePlugin;
use axes::AxesPlugin;
use bevy::core_pipeline::tonemapping::Tonemapping;
use bevy::prelude::*;
use camera::{OrbitCamera, OrbitCameraPlugin};
use height_material::HeightMaterialPlugin;
use loader::TerrainLoaderPlugin;
use render_loop::RenderLoopPlugin;
use ui::DebugUiPlugin;

/// Where the camera starts, looking at the origin.
const START_POSITION: Vec3 = Vec3::new(0.0, 0.0, 2.0);

/// Plugin for the main application.
pub struct AppPlugin;

impl Plugin for AppPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins((
            RenderLoopPlugin,
            HeightMaterialPlugin,
            OrbitCameraPlugin,
            TerrainLoaderPlugin,
            AxesPlugin,
            DebugUiPlugin,
        ))
        .add_systems(Startup, setup_scene);
    }
}

fn setup_scene(mut commands: Commands) {
    let orbit = OrbitCamera::looking_at(START_POSITION, Vec3::ZERO);

    commands.spawn((
        Camera3d::default(),
        Camera {
            clear_color: bevy::camera::ClearColorConfig::Custom(Color::BLACK),
            ..default()
        },
        orbit.transform(),
        Projection::Perspective(PerspectiveProjection {
            fov: std::f32::consts::FRAC_PI_4,
            near: 0.1,
            far: 1000.0,
            ..Default::default()
        }),
        // The height shader does its own shading.
        Tonemapping::None,
        orbit,
    ));

    tracing::info!("Scene setup complete - drag to orbit, scroll to zoom");
}

fn main() {
    #[cfg(not(target_family = "wasm"))]
    {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Logs go to the browser console.
    #[cfg(target_family = "wasm")]
    {
        console_error_panic_hook::set_once();
        tracing_wasm::set_as_global_default();
    }

    let params = launch_params::parse();
    tracing::info!(url = %params.url, "launching viewer");

    let mut app = App::new();

    #[allow(unused_mut)]
    let mut window = Window {
        title: "dem-viewer".to_string(),
        resolution: (1280, 720).into(),
        ..Default::default()
    };

    #[cfg(target_family = "wasm")]
    {
        window.fit_canvas_to_parent = true;
        window.prevent_default_event_handling = true;
    }

    app.add_plugins(DefaultPlugins.set(WindowPlugin {
        primary_window: Some(window),
        ..Default::default()
    }))
    .add_plugins(AsyncRuntimePlugin)
    .insert_resource(params)
    .add_plugins(AppPlugin)
    .run();
}
