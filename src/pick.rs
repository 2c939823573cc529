//! City object picking.
//!
//! Maps a hit on a placed component back to the city object under it:
//! 1. the hit names a component, a polygon of its static mesh and barycentric weights
//! 2. the weights interpolate the UV channel of the polygon's three vertex instances
//! 3. the city object channel (UV3) rounds to a [`CityObjectIndex`]
//! 4. the index is resolved against the component's `CityObjectGroup` payload
//!
//! Hosts run the raycast themselves; only the resolution lives here.

use cgmath::Vector2;

use crate::data_structures::{
    city_object::{CityObject, CityObjectGroupData, CityObjectIndex},
    scene_graph::{ComponentId, Scene},
};

/// Result of a raycast against a placed component.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HitResult {
    pub component: ComponentId,
    /// Polygon index across all polygon groups, in group order.
    pub face_index: usize,
    /// Weights of the polygon's three corners as stored in the description.
    pub barycentric: [f32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UvChannel {
    /// UV0, the texture coordinates.
    Texture,
    /// UV3, the encoded city object index.
    CityObject,
}

/// Interpolates `channel` at the hit location. `None` for unbuilt meshes or stale face indices.
pub fn find_collision_uv(
    scene: &Scene,
    hit: &HitResult,
    channel: UvChannel,
) -> Option<Vector2<f32>> {
    let description = scene.static_mesh_of(hit.component)?.description.as_ref()?;
    let triangle = description
        .polygon_groups
        .iter()
        .flat_map(|g| g.triangles.iter())
        .nth(hit.face_index)?;

    let mut uv = Vector2::new(0.0, 0.0);
    for (corner, weight) in triangle.iter().zip(hit.barycentric) {
        let instance = description.vertex_instances.get(*corner as usize)?;
        let corner_uv = match channel {
            UvChannel::Texture => instance.uv0,
            UvChannel::CityObject => instance.uv3,
        };
        uv += Vector2::new(corner_uv[0], corner_uv[1]) * weight;
    }
    Some(uv)
}

pub fn get_city_object_by_uv(data: &CityObjectGroupData, uv: Vector2<f32>) -> Option<&CityObject> {
    data.get_city_object_by_index(CityObjectIndex::from_uv(uv))
}

fn hit_index<'a>(
    scene: &'a Scene,
    hit: &HitResult,
) -> Option<(&'a CityObjectGroupData, CityObjectIndex)> {
    let data = scene.get(hit.component)?.city_object_group()?;
    let uv = find_collision_uv(scene, hit, UvChannel::CityObject)?;
    Some((data, CityObjectIndex::from_uv(uv)))
}

/// Primary feature under the hit, e.g. the building whose wall was hit.
pub fn get_primary_city_object_by_raycast<'a>(
    scene: &'a Scene,
    hit: &HitResult,
) -> Option<&'a CityObject> {
    let (data, index) = hit_index(scene, hit)?;
    data.get_city_object_by_index(index.primary_of())
}

/// Most specific feature under the hit: the atomic object if there is one, else the primary.
pub fn get_atomic_city_object_by_raycast<'a>(
    scene: &'a Scene,
    hit: &HitResult,
) -> Option<&'a CityObject> {
    let (data, index) = hit_index(scene, hit)?;
    data.get_city_object_by_index(index)
        .or_else(|| data.get_city_object_by_index(index.primary_of()))
}
