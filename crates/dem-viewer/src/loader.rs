//! Fetches the elevation window once at startup and spawns the terrain.
//!
//! The fetch runs in the background through [`TaskSpawner`]; its result comes
//! back over an `async_channel` and is turned into a mesh on the main thread.

use std::sync::Arc;

use bevy::prelude::*;
use dem::{BoundingBox, Client, MemoryCache, MeshBuffers, SampleGrid};

use crate::async_runtime::TaskSpawner;
use crate::height_material::HeightMaterial;
use crate::launch_params::LaunchParams;
use crate::mesh::{TerrainMesh, terrain_mesh};

/// Plugin that loads the terrain described by [`LaunchParams`].
pub struct TerrainLoaderPlugin;

impl Plugin for TerrainLoaderPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<LoadStatus>()
            .init_resource::<LoaderChannel>()
            .add_systems(Startup, start_fetch)
            .add_systems(Update, poll_fetch);
    }
}

/// Summary of the loaded terrain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainStats {
    pub width: u32,
    pub height: u32,
    pub vertices: usize,
    pub triangles: usize,
    /// Height the samples were normalized against.
    pub max: f32,
}

/// Progress of the one terrain fetch.
#[derive(Resource, Debug, Clone, Default, PartialEq)]
pub enum LoadStatus {
    #[default]
    Loading,
    Loaded(TerrainStats),
    Failed(String),
}

type FetchResult = dem::Result<SampleGrid>;

#[derive(Resource)]
struct LoaderChannel {
    tx: async_channel::Sender<FetchResult>,
    rx: async_channel::Receiver<FetchResult>,
}

impl Default for LoaderChannel {
    fn default() -> Self {
        let (tx, rx) = async_channel::bounded(1);
        Self { tx, rx }
    }
}

#[allow(clippy::needless_pass_by_value)]
fn start_fetch(params: Res<LaunchParams>, channel: Res<LoaderChannel>, spawner: TaskSpawner) {
    let client = Arc::new(
        Client::with_cache(MemoryCache::new())
            .with_prefetch_size(params.prefetch_kib.saturating_mul(1024)),
    );
    let url = params.url.clone();
    let bbox: BoundingBox = params.bbox;

    let [lng1, lat1, lng2, lat2] = bbox.bounds();
    tracing::info!(
        url = %url,
        lng1,
        lat1,
        lng2,
        lat2,
        res_x = bbox.res_x(),
        res_y = bbox.res_y(),
        "fetching elevation window"
    );

    spawner.spawn_into(
        async move { client.fetch_grid(&url, &bbox).await },
        channel.tx.clone(),
    );
}

fn poll_fetch(
    mut commands: Commands,
    mut status: ResMut<LoadStatus>,
    channel: Res<LoaderChannel>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<HeightMaterial>>,
) {
    if *status != LoadStatus::Loading {
        return;
    }
    let Ok(result) = channel.rx.try_recv() else {
        return;
    };

    match finish_load(result) {
        Ok((stats, buffers)) => {
            tracing::info!(
                width = stats.width,
                height = stats.height,
                vertices = stats.vertices,
                triangles = stats.triangles,
                max = stats.max,
                "terrain loaded"
            );
            commands.spawn((
                Mesh3d(meshes.add(terrain_mesh(&buffers))),
                MeshMaterial3d(materials.add(HeightMaterial::default())),
                Transform::IDENTITY,
                TerrainMesh,
            ));
            *status = LoadStatus::Loaded(stats);
        }
        Err(message) => {
            tracing::error!("Failed to load terrain: {message}");
            *status = LoadStatus::Failed(message);
        }
    }
}

/// Build mesh buffers from a fetch result.
///
/// Errors become their display text; a failed fetch is final.
fn finish_load(result: FetchResult) -> Result<(TerrainStats, MeshBuffers), String> {
    let grid = result.map_err(|e| e.to_string())?;
    let buffers = dem::build_height_field(&grid);
    let stats = TerrainStats {
        width: grid.width(),
        height: grid.height(),
        vertices: buffers.vertex_count(),
        triangles: buffers.triangle_count(),
        max: dem::normalization_max(&grid),
    };
    Ok((stats, buffers))
}

#[cfg(test)]
mod tests {
    use dem::{Error, NO_DATA};

    use super::*;

    #[test]
    fn test_finish_load_builds_buffers() {
        let grid = SampleGrid::new(3, 2, vec![1.0, 2.0, 4.0, NO_DATA, 8.0, 2.0]).unwrap();
        let (stats, buffers) = finish_load(Ok(grid)).unwrap();

        assert_eq!(
            stats,
            TerrainStats {
                width: 3,
                height: 2,
                vertices: 6,
                triangles: 4,
                max: 8.0,
            }
        );
        assert_eq!(buffers.indices.len(), 12);
    }

    #[test]
    fn test_finish_load_reports_error() {
        let error = Error::HttpStatus {
            url: "https://example.com/dem.tif".to_string(),
            status: 403,
        };
        let message = finish_load(Err(error)).unwrap_err();
        assert!(message.contains("403"));
    }

    #[test]
    fn test_failed_fetch_sets_status() {
        let mut app = App::new();
        app.init_resource::<LoadStatus>()
            .init_resource::<LoaderChannel>()
            .init_resource::<Assets<Mesh>>()
            .init_resource::<Assets<HeightMaterial>>()
            .add_systems(Update, poll_fetch);

        let tx = app.world().resource::<LoaderChannel>().tx.clone();
        tx.try_send(Err(Error::Http {
            url: "https://example.com/dem.tif".to_string(),
            message: "connection refused".to_string(),
        }))
        .unwrap();
        app.update();

        let status = app.world().resource::<LoadStatus>();
        assert!(matches!(status, LoadStatus::Failed(m) if m.contains("connection refused")));
    }

    #[test]
    fn test_loaded_grid_spawns_terrain() {
        let mut app = App::new();
        app.init_resource::<LoadStatus>()
            .init_resource::<LoaderChannel>()
            .init_resource::<Assets<Mesh>>()
            .init_resource::<Assets<HeightMaterial>>()
            .add_systems(Update, poll_fetch);

        let grid = SampleGrid::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let tx = app.world().resource::<LoaderChannel>().tx.clone();
        tx.try_send(Ok(grid)).unwrap();
        app.update();

        let world = app.world_mut();
        let count = world.query::<&TerrainMesh>().iter(world).count();
        assert_eq!(count, 1);
        assert!(matches!(
            world.resource::<LoadStatus>(),
            LoadStatus::Loaded(TerrainStats { vertices: 4, .. })
        ));
    }
}
