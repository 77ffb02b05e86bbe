//! Conversion from height-field buffers to Bevy meshes.

use bevy::asset::RenderAssetUsages;
use bevy::mesh::{Indices, PrimitiveTopology};
use bevy::prelude::*;
use dem::MeshBuffers;

/// Marker for the spawned terrain entity.
#[derive(Component)]
pub struct TerrainMesh;

/// Build a triangle-list mesh with positions and `u32` indices.
///
/// No normals or UVs are attached; the height shader derives shading from
/// screen-space derivatives.
#[must_use]
pub fn terrain_mesh(buffers: &MeshBuffers) -> Mesh {
    let mut mesh = Mesh::new(
        PrimitiveTopology::TriangleList,
        RenderAssetUsages::default(),
    );
    mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, buffers.positions_xyz());
    mesh.insert_indices(Indices::U32(buffers.indices.clone()));
    mesh
}

#[cfg(test)]
mod tests {
    use bevy::mesh::VertexAttributeValues;
    use dem::{NO_DATA, SampleGrid, build_height_field};

    use super::*;

    #[test]
    fn test_terrain_mesh_keeps_buffers() {
        let grid = SampleGrid::new(2, 2, vec![10.0, 20.0, NO_DATA, 40.0]).unwrap();
        let buffers = build_height_field(&grid);
        let mesh = terrain_mesh(&buffers);

        assert_eq!(mesh.primitive_topology(), PrimitiveTopology::TriangleList);
        assert_eq!(mesh.count_vertices(), 4);

        let Some(VertexAttributeValues::Float32x3(positions)) =
            mesh.attribute(Mesh::ATTRIBUTE_POSITION)
        else {
            panic!("missing positions");
        };
        assert_eq!(positions[0], [-1.0, 0.25, -1.0]);
        assert_eq!(positions[2], [-1.0, 0.0, 1.0]);
        assert_eq!(positions[3], [1.0, 1.0, 1.0]);

        let Some(Indices::U32(indices)) = mesh.indices() else {
            panic!("missing u32 indices");
        };
        assert_eq!(indices, &[0, 3, 2, 0, 1, 3]);
    }

    #[test]
    fn test_single_row_has_no_triangles() {
        let grid = SampleGrid::new(3, 1, vec![1.0, 2.0, 3.0]).unwrap();
        let mesh = terrain_mesh(&build_height_field(&grid));

        assert_eq!(mesh.count_vertices(), 3);
        assert_eq!(mesh.indices().map(Indices::len), Some(0));
    }
}
