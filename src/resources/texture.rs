use crate::data_structures::{material::Material, model::Mesh};

/**
 * One material per sub-mesh, in sub-mesh order, matching the polygon groups of the emitted mesh.
 *
 * Sub-meshes with a classification override keep it, but carry their texture along so a later
 * export can restore it. Everything else gets a default material bound to the sub-mesh texture.
 */
pub fn resolve_materials(mesh: &Mesh) -> Vec<Material> {
    mesh.sub_meshes
        .iter()
        .map(|sub| match &sub.material {
            Some(material) => Material {
                texture_path: sub.texture_path.clone(),
                ..material.clone()
            },
            None => Material::default_for_texture(sub.texture_path.as_deref()),
        })
        .collect()
}
