//! Shader material for height-field meshes.
//!
//! The material carries a single uniform with the elapsed time and the
//! drawing buffer resolution. Time follows [`RenderLoop::elapsed`];
//! resolution arrives through a [`RenderLoop::on_resize`] callback.

use std::marker::PhantomData;

use bevy::asset::uuid::Uuid;
use bevy::mesh::MeshVertexBufferLayoutRef;
use bevy::pbr::{Material, MaterialPipeline, MaterialPipelineKey, MaterialPlugin};
use bevy::prelude::*;
use bevy::render::render_resource::{
    AsBindGroup, RenderPipelineDescriptor, SpecializedMeshPipelineError,
};
use bevy::shader::ShaderRef;

use crate::render_loop::{RenderLoop, Viewport};

/// UUID for the embedded height shader asset.
const HEIGHT_SHADER_UUID: Uuid = Uuid::from_u128(0x5c1e_77d2_90ab_4e3f_8a61_d04b_2f9e_13c7);

fn shader_handle() -> Handle<Shader> {
    Handle::Uuid(HEIGHT_SHADER_UUID, PhantomData::<fn() -> Shader>)
}

/// Registers [`HeightMaterial`], its shader, and the systems feeding its uniform.
pub struct HeightMaterialPlugin;

impl Plugin for HeightMaterialPlugin {
    fn build(&self, app: &mut App) {
        bevy::asset::load_internal_asset!(
            app,
            Handle::Uuid(HEIGHT_SHADER_UUID, PhantomData::<fn() -> Shader>),
            "height_material.wgsl",
            Shader::from_wgsl
        );
        app.add_plugins(MaterialPlugin::<HeightMaterial>::default())
            .init_resource::<ViewportChannel>()
            .add_systems(Startup, subscribe_to_resize)
            .add_systems(Update, (apply_viewport, advance_time));
    }
}

/// Colors a height field by elevation.
///
/// `params` packs `(time, width, height, pixel_ratio)`; a single `vec4`
/// keeps the uniform 16-byte aligned for WebGL.
#[derive(Asset, TypePath, AsBindGroup, Debug, Clone, Default)]
pub struct HeightMaterial {
    #[uniform(0)]
    pub params: Vec4,
}

impl HeightMaterial {
    pub fn set_time(&mut self, seconds: f32) {
        self.params.x = seconds;
    }

    /// Store the surface size and the clamped pixel ratio.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        let size = viewport.physical_size();
        self.params.y = size.x;
        self.params.z = size.y;
        self.params.w = viewport.pixel_ratio();
    }
}

impl Material for HeightMaterial {
    fn vertex_shader() -> ShaderRef {
        ShaderRef::Handle(shader_handle())
    }

    fn fragment_shader() -> ShaderRef {
        ShaderRef::Handle(shader_handle())
    }

    fn enable_shadows() -> bool {
        false
    }

    fn enable_prepass() -> bool {
        false
    }

    fn specialize(
        _pipeline: &MaterialPipeline,
        descriptor: &mut RenderPipelineDescriptor,
        layout: &MeshVertexBufferLayoutRef,
        _key: MaterialPipelineKey<Self>,
    ) -> Result<(), SpecializedMeshPipelineError> {
        // Positions are the only vertex attribute.
        let vertex_layout = layout
            .0
            .get_layout(&[Mesh::ATTRIBUTE_POSITION.at_shader_location(0)])?;
        descriptor.vertex.buffers = vec![vertex_layout];
        // Cell winding is fixed by the mesh builder, so draw both faces.
        descriptor.primitive.cull_mode = None;
        Ok(())
    }
}

/// Viewport updates from [`RenderLoop`] callbacks, drained each frame.
#[derive(Resource)]
pub struct ViewportChannel {
    tx: async_channel::Sender<Viewport>,
    rx: async_channel::Receiver<Viewport>,
    current: Option<Viewport>,
}

impl Default for ViewportChannel {
    fn default() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            tx,
            rx,
            current: None,
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
fn subscribe_to_resize(mut render_loop: ResMut<RenderLoop>, channel: Res<ViewportChannel>) {
    let tx = channel.tx.clone();
    render_loop.on_resize(move |viewport| {
        // Unbounded, so this only fails once the app is shutting down.
        let _ = tx.try_send(viewport);
    });
}

/// Push the newest viewport into every height material.
fn apply_viewport(
    mut channel: ResMut<ViewportChannel>,
    mut materials: ResMut<Assets<HeightMaterial>>,
    added: Query<&MeshMaterial3d<HeightMaterial>, Added<MeshMaterial3d<HeightMaterial>>>,
) {
    let mut latest = None;
    while let Ok(viewport) = channel.rx.try_recv() {
        latest = Some(viewport);
    }

    if let Some(viewport) = latest {
        channel.current = Some(viewport);
        for (_, material) in materials.iter_mut() {
            material.set_viewport(viewport);
        }
    } else if let Some(viewport) = channel.current {
        // Materials created after the last resize.
        for handle in &added {
            if let Some(material) = materials.get_mut(&handle.0) {
                material.set_viewport(viewport);
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::needless_pass_by_value)]
fn advance_time(render_loop: Res<RenderLoop>, mut materials: ResMut<Assets<HeightMaterial>>) {
    if !render_loop.is_running() {
        return;
    }
    let seconds = render_loop.elapsed().as_secs_f64() as f32;
    for (_, material) in materials.iter_mut() {
        material.set_time(seconds);
    }
}

#[cfg(test)]
impl HeightMaterial {
    fn time(&self) -> f32 {
        self.params.x
    }

    fn resolution(&self) -> Vec2 {
        Vec2::new(self.params.y, self.params.z)
    }

    fn pixel_ratio(&self) -> f32 {
        self.params.w
    }
}
