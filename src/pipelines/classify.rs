//! Material classification of exported meshes.

use crate::data_structures::{
    city_object::{CityModel, CityObject, CityObjectIndex},
    material::Material,
    model::{Mesh, Model, Node, SubMesh},
};

/**
 * Splits every sub-mesh into runs of triangles that resolve to the same material.
 *
 * `material_of` receives the city object of a triangle (atomic when the triangle belongs to
 * one) and its primary object. `None` keeps the sub-mesh's default texture material.
 */
pub fn classify<F>(model: &mut Model, city_model: &CityModel, material_of: F)
where
    F: Fn(&CityObject, Option<&CityObject>) -> Option<Material>,
{
    fn visit<F>(node: &mut Node, city_model: &CityModel, material_of: &F)
    where
        F: Fn(&CityObject, Option<&CityObject>) -> Option<Material>,
    {
        if let Some(mesh) = &mut node.mesh {
            classify_mesh(mesh, city_model, material_of);
        }
        for child in &mut node.children {
            visit(child, city_model, material_of);
        }
    }
    for root in &mut model.root_nodes {
        visit(root, city_model, &material_of);
    }
}

fn triangle_material<F>(
    mesh: &Mesh,
    triangle: &[u32],
    city_model: &CityModel,
    material_of: &F,
) -> Option<Material>
where
    F: Fn(&CityObject, Option<&CityObject>) -> Option<Material>,
{
    let index = CityObjectIndex::from_uv(mesh.uv4_at(*triangle.first()? as usize)?);
    let lookup = |index: CityObjectIndex| {
        mesh.city_object_list
            .get(index)
            .and_then(|id| city_model.get_city_object_by_id(id))
    };
    let primary = lookup(index.primary_of());
    let object = lookup(index).or(primary)?;
    material_of(object, primary)
}

fn classify_mesh<F>(mesh: &mut Mesh, city_model: &CityModel, material_of: &F)
where
    F: Fn(&CityObject, Option<&CityObject>) -> Option<Material>,
{
    let mut classified: Vec<SubMesh> = Vec::new();
    for sub_mesh in &mesh.sub_meshes {
        let end = sub_mesh.end.min(mesh.indices.len());
        if sub_mesh.start >= end {
            classified.push(sub_mesh.clone());
            continue;
        }

        let mut current: Option<SubMesh> = None;
        for start in (sub_mesh.start..end).step_by(3) {
            let triangle = &mesh.indices[start..(start + 3).min(end)];
            let material = triangle_material(mesh, triangle, city_model, material_of)
                .or_else(|| sub_mesh.material.clone());
            match &mut current {
                Some(run) if run.material == material => run.end = start + 3,
                _ => {
                    classified.extend(current.take());
                    current = Some(SubMesh {
                        start,
                        end: start + 3,
                        texture_path: sub_mesh.texture_path.clone(),
                        material,
                    });
                }
            }
        }
        classified.extend(current);
    }
    mesh.sub_meshes = classified;
}

#[cfg(test)]
mod tests {
    use cgmath::{Vector2, Vector3};

    use super::*;
    use crate::data_structures::city_object::CityObjectType;

    fn house() -> (Model, CityModel) {
        let wall = CityObjectIndex::new(0, 0).to_uv();
        let roof = CityObjectIndex::new(0, 1).to_uv();
        let mut mesh = Mesh {
            vertices: vec![Vector3::new(0.0, 0.0, 0.0); 9],
            indices: (0..9).collect(),
            uv4: vec![wall, wall, wall, roof, roof, roof, wall, wall, wall],
            uv1: vec![Vector2::new(0.0, 0.0); 9],
            sub_meshes: vec![SubMesh::new(0, 9, Some("tex/house.png".into()))],
            ..Default::default()
        };
        mesh.city_object_list
            .insert(CityObjectIndex::primary(0), "bldg");
        mesh.city_object_list
            .insert(CityObjectIndex::new(0, 0), "wall");
        mesh.city_object_list
            .insert(CityObjectIndex::new(0, 1), "roof");

        let mut city_model = CityModel::new("a_bldg_6697.gml");
        city_model.insert(CityObject::new("bldg", CityObjectType::BUILDING).with_children(vec![
            CityObject::new("wall", CityObjectType::WALL_SURFACE),
            CityObject::new("roof", CityObjectType::ROOF_SURFACE),
        ]));
        (Model::new(vec![Node::with_mesh("bldg", mesh)]), city_model)
    }

    #[test]
    fn runs_of_equal_material_become_sub_meshes() {
        let (mut model, city_model) = house();
        let roof_material = Material::asset("/Game/Roof");
        classify(&mut model, &city_model, |object, _| {
            (object.ty == CityObjectType::ROOF_SURFACE).then(|| roof_material.clone())
        });

        let sub_meshes = &model.root_nodes[0].mesh.as_ref().unwrap().sub_meshes;
        let ranges: Vec<_> = sub_meshes.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(ranges, vec![(0, 3), (3, 6), (6, 9)]);
        assert_eq!(sub_meshes[0].material, None);
        assert_eq!(sub_meshes[1].material, Some(roof_material));
        assert_eq!(sub_meshes[2].texture_path.as_deref(), Some("tex/house.png"));
    }

    #[test]
    fn primary_is_passed_along() {
        let (mut model, city_model) = house();
        let building = Material::asset("/Game/Building");
        classify(&mut model, &city_model, |_, primary| {
            primary
                .filter(|p| p.ty == CityObjectType::BUILDING)
                .map(|_| building.clone())
        });
        let sub_meshes = &model.root_nodes[0].mesh.as_ref().unwrap().sub_meshes;
        assert_eq!(sub_meshes.len(), 1);
        assert_eq!(sub_meshes[0].material, Some(building));
    }
}
