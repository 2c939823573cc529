//! Renderable static-mesh description.
//!
//! This is the engine-side format produced by the mesh emitter: shared vertex positions, vertex
//! instances carrying per-corner attributes, and polygon groups (one per material slot) listing
//! triangles as vertex-instance triples. [`StaticMeshDescription::pack`] interleaves it into
//! GPU-ready byte buffers when the scene builds its static meshes.

/// One corner of a triangle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VertexInstance {
    pub vertex: u32,
    pub normal: [f32; 3],
    pub uv0: [f32; 2],
    pub uv3: [f32; 2],
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolygonGroup {
    pub material_slot_name: String,
    /// Triangles as vertex-instance ids, already in engine winding order.
    pub triangles: Vec<[u32; 3]>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StaticMeshDescription {
    pub vertex_positions: Vec<[f32; 3]>,
    pub vertex_instances: Vec<VertexInstance>,
    pub polygon_groups: Vec<PolygonGroup>,
}

impl StaticMeshDescription {
    pub fn polygon_count(&self) -> usize {
        self.polygon_groups.iter().map(|g| g.triangles.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.polygon_count() == 0
    }

    /**
     * Interleaves vertex instances into a vertex buffer and concatenates the polygon groups into
     * one index buffer. The returned ranges address the index buffer per polygon group.
     */
    pub fn pack(&self) -> PackedStaticMesh {
        let vertices: Vec<StaticMeshVertex> = self
            .vertex_instances
            .iter()
            .map(|instance| StaticMeshVertex {
                position: self
                    .vertex_positions
                    .get(instance.vertex as usize)
                    .copied()
                    .unwrap_or_default(),
                normal: instance.normal,
                uv0: instance.uv0,
                uv3: instance.uv3,
            })
            .collect();

        let mut indices: Vec<u32> = Vec::new();
        let mut sections = Vec::new();
        for group in &self.polygon_groups {
            let start = indices.len() as u32;
            indices.extend(group.triangles.iter().flatten());
            sections.push(start..indices.len() as u32);
        }

        PackedStaticMesh {
            vertex_bytes: bytemuck::cast_slice(&vertices).to_vec(),
            index_bytes: bytemuck::cast_slice(&indices).to_vec(),
            num_elements: indices.len() as u32,
            sections,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StaticMeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv0: [f32; 2],
    pub uv3: [f32; 2],
}

/// Result of a static-mesh build.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PackedStaticMesh {
    pub vertex_bytes: Vec<u8>,
    pub index_bytes: Vec<u8>,
    pub num_elements: u32,
    pub sections: Vec<std::ops::Range<u32>>,
}
