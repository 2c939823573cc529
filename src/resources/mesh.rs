use std::collections::HashSet;

use cgmath::{InnerSpace, Vector2, Vector3, Zero};

use crate::{
    data_structures::{material, model::Mesh},
    render::{PolygonGroup, StaticMeshDescription, VertexInstance},
};

/**
 * Converts a domain mesh into the renderable description.
 *
 * Every source vertex is created up front. A vertex instance may only reference a vertex no
 * other instance uses yet, so any reuse of a source vertex appends a duplicate position instead.
 * Triangles are emitted with instances 0 and 2 swapped because the domain and the engine
 * disagree in handedness.
 *
 * UV0 is the primary texture UV with `v` flipped, UV3 carries the city object index unchanged.
 * One polygon group is created per sub-mesh, named after the texture's base file name.
 */
pub fn emit_mesh(mesh: &Mesh) -> StaticMeshDescription {
    let mut desc = StaticMeshDescription {
        vertex_positions: mesh
            .vertices
            .iter()
            .map(|v| [v.x as f32, v.y as f32, v.z as f32])
            .collect(),
        ..Default::default()
    };

    let mut used_vertices: HashSet<u32> = HashSet::new();
    for sub_mesh in &mesh.sub_meshes {
        let mut group = PolygonGroup {
            material_slot_name: material::slot_name(sub_mesh.texture_path.as_deref()),
            triangles: Vec::new(),
        };

        let end = sub_mesh.end.min(mesh.indices.len());
        let start = sub_mesh.start.min(end);
        for tri in mesh.indices[start..end].chunks_exact(3) {
            if tri.iter().any(|i| *i as usize >= mesh.vertices.len()) {
                log::warn!(
                    "skipping triangle {:?} referencing a vertex outside of {} vertices",
                    tri,
                    mesh.vertices.len()
                );
                continue;
            }

            let mut corners = [0u32; 3];
            for (corner, source) in corners.iter_mut().zip(tri) {
                let mut vertex = *source;
                if !used_vertices.insert(vertex) {
                    vertex = desc.vertex_positions.len() as u32;
                    desc.vertex_positions
                        .push(desc.vertex_positions[*source as usize]);
                    used_vertices.insert(vertex);
                }

                let uv1 = mesh.uv1_at(*source as usize);
                let uv4 = mesh.uv4_at(*source as usize).unwrap_or(Vector2::zero());
                *corner = desc.vertex_instances.len() as u32;
                desc.vertex_instances.push(VertexInstance {
                    vertex,
                    normal: [0.0; 3],
                    uv0: [uv1.x, 1.0 - uv1.y],
                    uv3: [uv4.x, uv4.y],
                });
            }
            group.triangles.push([corners[2], corners[1], corners[0]]);
        }
        desc.polygon_groups.push(group);
    }

    compute_normals(&mut desc);
    desc
}

/// Flat per-face normals accumulated on each vertex instance, then normalized.
fn compute_normals(desc: &mut StaticMeshDescription) {
    let mut accumulated = vec![Vector3::<f32>::zero(); desc.vertex_instances.len()];
    for group in &desc.polygon_groups {
        for triangle in &group.triangles {
            // Source order is the reverse of the stored engine winding.
            let [i0, i1, i2] = [triangle[2], triangle[1], triangle[0]];
            let position = |instance: u32| -> Vector3<f32> {
                let vertex = desc.vertex_instances[instance as usize].vertex as usize;
                desc.vertex_positions[vertex].into()
            };
            let (p0, p1, p2) = (position(i0), position(i1), position(i2));
            let face = (p0 - p1).cross(p0 - p2);
            if face.magnitude2() == 0.0 {
                continue;
            }
            let face = face.normalize();
            for instance in [i0, i1, i2] {
                accumulated[instance as usize] += face;
            }
        }
    }

    for (instance, normal) in desc.vertex_instances.iter_mut().zip(accumulated) {
        if normal.magnitude2() > 0.0 {
            instance.normal = normal.normalize().into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::model::SubMesh;

    fn quad() -> Mesh {
        Mesh {
            vertices: vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
            uv1: vec![
                Vector2::new(0.0, 0.0),
                Vector2::new(1.0, 0.0),
                Vector2::new(1.0, 1.0),
                Vector2::new(0.0, 0.25),
            ],
            uv4: vec![Vector2::new(2.0, -1.0); 4],
            sub_meshes: vec![
                SubMesh::new(0, 3, Some("tex/wall.png".into())),
                SubMesh::new(3, 6, None),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn single_triangle_reverses_winding() {
        let mesh = Mesh {
            vertices: vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            indices: vec![0, 1, 2],
            sub_meshes: vec![SubMesh::new(0, 3, None)],
            ..Default::default()
        };

        let desc = emit_mesh(&mesh);
        assert_eq!(desc.vertex_instances.len(), 3);
        assert_eq!(desc.polygon_count(), 1);
        assert_eq!(desc.polygon_groups[0].triangles[0], [2, 1, 0]);
        let corners: Vec<u32> = desc.polygon_groups[0].triangles[0]
            .iter()
            .map(|i| desc.vertex_instances[*i as usize].vertex)
            .collect();
        assert_eq!(corners, vec![2, 1, 0]);
        assert_eq!(desc.polygon_groups[0].material_slot_name, "DefaultMaterial");
    }

    #[test]
    fn reused_vertices_are_duplicated() {
        let mesh = quad();
        let desc = emit_mesh(&mesh);

        assert_eq!(desc.polygon_count(), mesh.triangle_count());
        // vertices 0 and 2 are shared by both triangles
        assert_eq!(desc.vertex_positions.len(), mesh.vertices.len() + 2);
        let mut referenced: Vec<u32> = desc.vertex_instances.iter().map(|i| i.vertex).collect();
        referenced.sort();
        referenced.dedup();
        assert_eq!(referenced.len(), desc.vertex_instances.len());
        assert_eq!(desc.polygon_groups[0].material_slot_name, "wall");
    }

    #[test]
    fn uv_channels_and_normals() {
        let desc = emit_mesh(&quad());

        // Instance 5 is the last corner of the second triangle, source vertex 3.
        assert_eq!(desc.vertex_instances[5].uv0, [0.0, 0.75]);
        assert!(desc.vertex_instances.iter().all(|i| i.uv3 == [2.0, -1.0]));
        for instance in &desc.vertex_instances {
            let n: Vector3<f32> = instance.normal.into();
            assert!((n.magnitude() - 1.0).abs() < 1e-5);
            assert!((n.z.abs() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn out_of_range_triangles_are_skipped() {
        let mut mesh = quad();
        mesh.indices[4] = 42;
        let desc = emit_mesh(&mesh);
        assert_eq!(desc.polygon_count(), 1);
        assert_eq!(desc.polygon_groups.len(), 2);
    }
}
