//! Scene components back to the domain model.
//!
//! Reconstruction starts from placed components, so their committed static meshes are read back
//! into [`Mesh`]es and arranged as GML file → LOD → feature nodes again. The read happens in two
//! steps: [`snapshot`] copies what is needed on the mutation thread, [`export_model`] does the
//! actual conversion on the worker.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use cgmath::{Vector2, Vector3};

use crate::{
    data_structures::{
        city_object::{CityModel, CityObjectGroupData, CityObjectList},
        granularity::ConvertGranularity,
        material::Material,
        model::{Mesh, Model, Node, SubMesh},
        scene_graph::{ComponentId, Scene},
    },
    filter::original_component_name,
    render::StaticMeshDescription,
};

/// What export needs to know about one `CityObjectGroup` component.
#[derive(Clone, Debug)]
pub struct ComponentSnapshot {
    pub id: ComponentId,
    pub name: String,
    pub parent: Option<ComponentId>,
    pub gml_name: Option<String>,
    pub lod_name: Option<String>,
    pub visible: bool,
    pub data: CityObjectGroupData,
    pub description: Option<Arc<StaticMeshDescription>>,
    pub materials: Vec<Material>,
}

impl ComponentSnapshot {
    pub fn granularity(&self) -> ConvertGranularity {
        self.data.granularity
    }

    /// Node name in the exported model: the single root city object or the component name.
    fn node_name(&self) -> String {
        match self.data.city_objects.as_slice() {
            [only] => only.gml_id.clone(),
            _ => original_component_name(&self.name).to_string(),
        }
    }
}

/// Copies a `CityObjectGroup` component. Other component kinds yield `None`.
pub fn snapshot(scene: &Scene, id: ComponentId) -> Option<ComponentSnapshot> {
    let component = scene.get(id)?;
    let data = component.city_object_group()?.clone();

    // Walk up to the component directly below the actor root (GML) and its child (LOD).
    let mut path = vec![id];
    let mut current = id;
    while let Some(parent) = scene.parent(current) {
        if parent == scene.root() {
            break;
        }
        path.push(parent);
        current = parent;
    }
    path.reverse();
    let gml_name = path
        .first()
        .filter(|g| **g != id)
        .and_then(|g| scene.name(*g))
        .map(str::to_string);
    let lod_name = path
        .get(1)
        .filter(|l| **l != id)
        .and_then(|l| scene.name(*l))
        .map(str::to_string);

    let static_mesh = scene.static_mesh_of(id);
    Some(ComponentSnapshot {
        id,
        name: component.name.clone(),
        parent: component.parent(),
        gml_name,
        lod_name,
        visible: component.visible,
        data,
        description: static_mesh.and_then(|m| m.description.clone()),
        materials: static_mesh.map(|m| m.materials.clone()).unwrap_or_default(),
    })
}

/// Exported model plus the city objects of all exported components, keyed by GML ID.
#[derive(Clone, Debug, Default)]
pub struct ExportedModel {
    pub model: Model,
    pub city_model: CityModel,
}

pub fn export_model(targets: &[ComponentSnapshot], export_hidden: bool) -> ExportedModel {
    let targets: Vec<&ComponentSnapshot> = targets
        .iter()
        .filter(|t| export_hidden || t.visible)
        .collect();
    let ids: HashSet<ComponentId> = targets.iter().map(|t| t.id).collect();

    let mut city_model = CityModel::default();
    let mut children_of: HashMap<ComponentId, Vec<usize>> = HashMap::new();
    let mut top_level = Vec::new();
    for (i, target) in targets.iter().enumerate() {
        for object in &target.data.city_objects {
            city_model.insert(object.clone());
        }
        match target.parent.filter(|p| ids.contains(p)) {
            Some(parent) => children_of.entry(parent).or_default().push(i),
            None => top_level.push(i),
        }
    }

    fn build(
        i: usize,
        targets: &[&ComponentSnapshot],
        children_of: &HashMap<ComponentId, Vec<usize>>,
    ) -> Node {
        let target = targets[i];
        let mesh = target.description.as_ref().map(|desc| {
            export_mesh(desc, &target.materials, target.data.city_object_list())
        });
        Node {
            name: target.node_name(),
            mesh,
            children: children_of
                .get(&target.id)
                .map(|c| c.iter().map(|i| build(*i, targets, children_of)).collect())
                .unwrap_or_default(),
        }
    }

    let mut roots: Vec<Node> = Vec::new();
    for i in top_level {
        let node = build(i, &targets, &children_of);
        let target = targets[i];
        let Some(gml_name) = &target.gml_name else {
            roots.push(node);
            continue;
        };
        let gml = match roots.iter().position(|r| r.name == *gml_name) {
            Some(g) => g,
            None => {
                roots.push(Node::new(gml_name.clone()));
                roots.len() - 1
            }
        };
        let Some(lod_name) = &target.lod_name else {
            roots[gml].children.push(node);
            continue;
        };
        let lods = &mut roots[gml].children;
        let lod = match lods.iter().position(|l| l.name == *lod_name) {
            Some(l) => l,
            None => {
                lods.push(Node::new(lod_name.clone()));
                lods.len() - 1
            }
        };
        lods[lod].children.push(node);
    }

    ExportedModel {
        model: Model::new(roots),
        city_model,
    }
}

/**
 * Reads a renderable description back into a domain mesh.
 *
 * Every vertex instance becomes its own vertex, winding is restored to domain order and the
 * texture `v` flip is undone. Default materials turn back into plain texture references, other
 * materials are kept as overrides on their sub-mesh.
 */
pub fn export_mesh(
    desc: &StaticMeshDescription,
    materials: &[Material],
    city_object_list: CityObjectList,
) -> Mesh {
    let mut mesh = Mesh {
        city_object_list,
        ..Default::default()
    };
    for (g, group) in desc.polygon_groups.iter().enumerate() {
        let start = mesh.indices.len();
        for triangle in &group.triangles {
            let corners = [triangle[2], triangle[1], triangle[0]];
            let instances: Option<Vec<_>> = corners
                .iter()
                .map(|c| desc.vertex_instances.get(*c as usize))
                .collect();
            let Some(instances) = instances else {
                log::warn!("triangle {:?} references a missing vertex instance", triangle);
                continue;
            };
            for instance in instances {
                let p = desc
                    .vertex_positions
                    .get(instance.vertex as usize)
                    .copied()
                    .unwrap_or_default();
                mesh.indices.push(mesh.vertices.len() as u32);
                mesh.vertices
                    .push(Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64));
                mesh.uv1
                    .push(Vector2::new(instance.uv0[0], 1.0 - instance.uv0[1]));
                mesh.uv4.push(Vector2::new(instance.uv3[0], instance.uv3[1]));
            }
        }

        let material = materials.get(g);
        mesh.sub_meshes.push(SubMesh {
            start,
            end: mesh.indices.len(),
            texture_path: material.and_then(|m| m.texture_path.clone()),
            material: material.filter(|m| !m.is_default()).map(|m| Material {
                texture_path: None,
                ..m.clone()
            }),
        });
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data_structures::{
            city_object::{CityObject, CityObjectIndex, CityObjectType},
            scene_graph::{ComponentKind, Mobility},
        },
        resources::mesh::emit_mesh,
    };

    fn triangle(texture: Option<&str>) -> Mesh {
        let mut mesh = Mesh {
            vertices: vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(2.0, 0.0, 0.0),
                Vector3::new(0.0, 2.0, 0.0),
            ],
            indices: vec![0, 1, 2],
            uv1: vec![
                Vector2::new(0.0, 0.0),
                Vector2::new(1.0, 0.0),
                Vector2::new(0.0, 0.5),
            ],
            uv4: vec![CityObjectIndex::primary(0).to_uv(); 3],
            sub_meshes: vec![SubMesh::new(0, 3, texture.map(str::to_string))],
            ..Default::default()
        };
        mesh.city_object_list
            .insert(CityObjectIndex::primary(0), "bldg-a");
        mesh
    }

    #[test]
    fn export_restores_domain_winding_and_uvs() {
        let source = triangle(Some("tex/roof.png"));
        let desc = emit_mesh(&source);
        let materials = vec![Material::default_for_texture(Some("tex/roof.png"))];

        let exported = export_mesh(&desc, &materials, source.city_object_list.clone());
        assert_eq!(exported.vertices, source.vertices);
        assert_eq!(exported.uv1, source.uv1);
        assert_eq!(exported.uv4, source.uv4);
        assert_eq!(exported.sub_meshes[0].texture_path.as_deref(), Some("tex/roof.png"));
        assert_eq!(exported.sub_meshes[0].material, None);
    }

    #[test]
    fn export_keeps_classified_materials() {
        let source = triangle(None);
        let desc = emit_mesh(&source);
        let roof = Material::asset("/Game/Roof");
        let exported = export_mesh(&desc, &[roof.clone()], CityObjectList::default());
        assert_eq!(exported.sub_meshes[0].material, Some(roof));
    }

    #[test]
    fn export_rebuilds_gml_and_lod_nodes() {
        let mut scene = Scene::new("actor");
        let root = scene.root();
        let gml = scene
            .create_component(ComponentKind::Scene, "53392642_bldg_6697_op", root, Mobility::Static)
            .unwrap();
        let lod = scene
            .create_component(ComponentKind::Scene, "LOD2", gml, Mobility::Static)
            .unwrap();
        let mesh = triangle(None);
        let data = CityObjectGroupData {
            city_objects: vec![CityObject {
                gml_id: "bldg-a".into(),
                index: CityObjectIndex::primary(0),
                ty: CityObjectType::BUILDING,
                ..Default::default()
            }],
            ..Default::default()
        };
        let feature = scene
            .create_component(ComponentKind::CityObjectGroup(data), "bldg-a", lod, Mobility::Static)
            .unwrap();
        let static_mesh = scene.create_static_mesh(feature, "bldg-a");
        scene
            .commit_mesh_description(static_mesh, emit_mesh(&mesh))
            .unwrap();
        scene
            .set_materials(static_mesh, vec![Material::default_for_texture(None)])
            .unwrap();
        scene.batch_build(&[static_mesh]);

        let target = snapshot(&scene, feature).unwrap();
        assert_eq!(target.gml_name.as_deref(), Some("53392642_bldg_6697_op"));
        assert_eq!(target.lod_name.as_deref(), Some("LOD2"));
        assert!(snapshot(&scene, lod).is_none());

        let exported = export_model(&[target], false);
        let gml_node = &exported.model.root_nodes[0];
        assert_eq!(gml_node.name, "53392642_bldg_6697_op");
        assert_eq!(gml_node.children[0].name, "LOD2");
        let feature_node = &gml_node.children[0].children[0];
        assert_eq!(feature_node.name, "bldg-a");
        assert_eq!(feature_node.mesh.as_ref().unwrap().triangle_count(), 1);
        assert!(exported.city_model.get_city_object_by_id("bldg-a").is_some());
    }
}
