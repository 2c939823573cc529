//! Granularity conversion.
//!
//! [`convert`] regroups the geometry of a [`Model`] under a [`ConvertGranularity`]. Container
//! nodes (GML files, LOD levels) are kept as they are. Below each container, every triangle is
//! assigned to the city object its first vertex belongs to (through UV4 and the mesh's city
//! object list), and triangles sharing a merge key end up in one new node. Vertex data is copied
//! with rebased indices and the city object table of every new mesh is renumbered.
//!
//! Groups, vertices and sub-meshes keep the order in which they were first encountered, so
//! converting the same model twice produces the same result.

use std::collections::HashMap;

use crate::data_structures::{
    city_object::{CityObjectIndex, CityObjectList},
    granularity::ConvertGranularity,
    material::Material,
    model::{Mesh, Model, Node, SubMesh},
};

/// Name of the single node produced per container by [`ConvertGranularity::PerCityModelArea`].
pub const AREA_NODE_NAME: &str = "combined";

pub fn convert(model: Model, granularity: ConvertGranularity) -> Model {
    Model::new(convert_nodes(model.root_nodes, granularity))
}

fn convert_nodes(nodes: Vec<Node>, granularity: ConvertGranularity) -> Vec<Node> {
    let mut converted = Vec::new();
    let mut features = Vec::new();
    for node in nodes {
        if node.is_container() {
            converted.push(Node {
                children: convert_nodes(node.children, granularity),
                name: node.name,
                mesh: None,
            });
        } else {
            features.push(node);
        }
    }

    if !features.is_empty() {
        let mut area = AreaBuilder::new(granularity);
        for feature in &features {
            area.add_subtree(feature, &feature.name);
        }
        converted.extend(area.into_nodes());
    }
    converted
}

/// City object a triangle or vertex belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ObjectRef {
    primary: String,
    atomic: Option<String>,
}

impl ObjectRef {
    fn merge_key(&self, granularity: ConvertGranularity) -> ObjectRef {
        match granularity {
            ConvertGranularity::PerAtomicFeatureObject => self.clone(),
            ConvertGranularity::PerPrimaryFeatureObject | ConvertGranularity::MaterialInPrimary => {
                ObjectRef {
                    primary: self.primary.clone(),
                    atomic: None,
                }
            }
            ConvertGranularity::PerCityModelArea => ObjectRef {
                primary: String::new(),
                atomic: None,
            },
        }
    }
}

/// Resolves the object of a source vertex, falling back to the node hierarchy when the mesh
/// carries no usable city object data.
fn object_of(mesh: &Mesh, vertex: u32, fallback: &ObjectRef) -> ObjectRef {
    let list = &mesh.city_object_list;
    let Some(index) = mesh.uv4_at(vertex as usize).map(CityObjectIndex::from_uv) else {
        return fallback.clone();
    };
    let Some(gml_id) = list.get(index) else {
        return fallback.clone();
    };
    if index.is_primary() {
        return ObjectRef {
            primary: gml_id.to_string(),
            atomic: None,
        };
    }
    ObjectRef {
        primary: list
            .get(index.primary_of())
            .map(str::to_string)
            .unwrap_or_else(|| fallback.primary.clone()),
        atomic: Some(gml_id.to_string()),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum SlotKey {
    /// Sub-mesh `.1` of the `.0`-th source mesh.
    Source(usize, usize),
    Material(Option<String>, Option<Material>),
}

#[derive(Debug)]
struct Slot {
    texture_path: Option<String>,
    material: Option<Material>,
    triangles: Vec<[u32; 3]>,
}

#[derive(Debug)]
struct GroupBuilder {
    key: ObjectRef,
    vertices: Vec<cgmath::Vector3<f64>>,
    uv1: Vec<cgmath::Vector2<f32>>,
    uv4: Vec<cgmath::Vector2<f32>>,
    vertex_map: HashMap<(usize, u32), u32>,
    primaries: Vec<String>,
    atomics: Vec<Vec<String>>,
    city_object_list: CityObjectList,
    slots: Vec<Slot>,
    slot_index: HashMap<SlotKey, usize>,
}

impl GroupBuilder {
    fn new(key: ObjectRef) -> Self {
        Self {
            key,
            vertices: Vec::new(),
            uv1: Vec::new(),
            uv4: Vec::new(),
            vertex_map: HashMap::new(),
            primaries: Vec::new(),
            atomics: Vec::new(),
            city_object_list: CityObjectList::default(),
            slots: Vec::new(),
            slot_index: HashMap::new(),
        }
    }

    /// Renumbers `object` inside this group's city object table.
    fn index_for(&mut self, object: &ObjectRef) -> CityObjectIndex {
        let primary = match self.primaries.iter().position(|p| *p == object.primary) {
            Some(p) => p,
            None => {
                self.primaries.push(object.primary.clone());
                self.atomics.push(Vec::new());
                self.primaries.len() - 1
            }
        };
        self.city_object_list
            .insert(CityObjectIndex::primary(primary as i32), object.primary.clone());

        let Some(atomic_id) = &object.atomic else {
            return CityObjectIndex::primary(primary as i32);
        };
        let atomics = &mut self.atomics[primary];
        let atomic = match atomics.iter().position(|a| a == atomic_id) {
            Some(a) => a,
            None => {
                atomics.push(atomic_id.clone());
                atomics.len() - 1
            }
        };
        let index = CityObjectIndex::new(primary as i32, atomic as i32);
        self.city_object_list.insert(index, atomic_id.clone());
        index
    }

    fn vertex(&mut self, ordinal: usize, mesh: &Mesh, source: u32, fallback: &ObjectRef) -> u32 {
        if let Some(v) = self.vertex_map.get(&(ordinal, source)) {
            return *v;
        }
        let object = object_of(mesh, source, fallback);
        let index = self.index_for(&object);
        let v = self.vertices.len() as u32;
        self.vertices.push(mesh.vertices[source as usize]);
        self.uv1.push(mesh.uv1_at(source as usize));
        self.uv4.push(index.to_uv());
        self.vertex_map.insert((ordinal, source), v);
        v
    }

    fn slot(&mut self, key: SlotKey, sub_mesh: &SubMesh) -> usize {
        if let Some(slot) = self.slot_index.get(&key) {
            return *slot;
        }
        self.slots.push(Slot {
            texture_path: sub_mesh.texture_path.clone(),
            material: sub_mesh.material.clone(),
            triangles: Vec::new(),
        });
        self.slot_index.insert(key, self.slots.len() - 1);
        self.slots.len() - 1
    }

    fn into_mesh(self) -> Mesh {
        let mut indices = Vec::new();
        let mut sub_meshes = Vec::new();
        for slot in self.slots {
            let start = indices.len();
            indices.extend(slot.triangles.iter().flatten());
            sub_meshes.push(SubMesh {
                start,
                end: indices.len(),
                texture_path: slot.texture_path,
                material: slot.material,
            });
        }
        Mesh {
            vertices: self.vertices,
            indices,
            uv1: self.uv1,
            uv4: self.uv4,
            sub_meshes,
            city_object_list: self.city_object_list,
        }
    }
}

/// Collects the geometry of all feature nodes below one container.
struct AreaBuilder {
    granularity: ConvertGranularity,
    groups: Vec<GroupBuilder>,
    group_index: HashMap<ObjectRef, usize>,
    next_ordinal: usize,
}

impl AreaBuilder {
    fn new(granularity: ConvertGranularity) -> Self {
        Self {
            granularity,
            groups: Vec::new(),
            group_index: HashMap::new(),
            next_ordinal: 0,
        }
    }

    fn add_subtree(&mut self, node: &Node, feature_name: &str) {
        if let Some(mesh) = &node.mesh {
            let fallback = ObjectRef {
                primary: feature_name.to_string(),
                atomic: (node.name != feature_name).then(|| node.name.clone()),
            };
            self.add_mesh(mesh, &fallback);
        }
        for child in &node.children {
            self.add_subtree(child, feature_name);
        }
    }

    fn group_for(&mut self, object: &ObjectRef) -> usize {
        let key = object.merge_key(self.granularity);
        if let Some(g) = self.group_index.get(&key) {
            return *g;
        }
        self.groups.push(GroupBuilder::new(key.clone()));
        self.group_index.insert(key, self.groups.len() - 1);
        self.groups.len() - 1
    }

    fn slot_key(&self, ordinal: usize, sub_index: usize, sub_mesh: &SubMesh) -> SlotKey {
        match self.granularity {
            ConvertGranularity::MaterialInPrimary => {
                let (texture, material) = sub_mesh.material_key();
                SlotKey::Material(texture.map(str::to_string), material.cloned())
            }
            _ => SlotKey::Source(ordinal, sub_index),
        }
    }

    fn add_mesh(&mut self, mesh: &Mesh, fallback: &ObjectRef) {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;

        let mut first_group = None;
        let mut empty_sub_meshes = Vec::new();
        for (sub_index, sub_mesh) in mesh.sub_meshes.iter().enumerate() {
            let end = sub_mesh.end.min(mesh.indices.len());
            let start = sub_mesh.start.min(end);
            let slot_key = self.slot_key(ordinal, sub_index, sub_mesh);
            let mut added = false;
            for tri in mesh.indices[start..end].chunks_exact(3) {
                if tri.iter().any(|i| *i as usize >= mesh.vertices.len()) {
                    log::warn!("dropping triangle {:?} with an out of range vertex", tri);
                    continue;
                }
                let object = object_of(mesh, tri[0], fallback);
                let g = self.group_for(&object);
                first_group.get_or_insert(g);

                let group = &mut self.groups[g];
                let triangle = [
                    group.vertex(ordinal, mesh, tri[0], fallback),
                    group.vertex(ordinal, mesh, tri[1], fallback),
                    group.vertex(ordinal, mesh, tri[2], fallback),
                ];
                let slot = group.slot(slot_key.clone(), sub_mesh);
                group.slots[slot].triangles.push(triangle);
                added = true;
            }
            if !added {
                empty_sub_meshes.push((sub_index, slot_key));
            }
        }

        if empty_sub_meshes.is_empty() {
            return;
        }
        let g = match first_group {
            Some(g) => g,
            None => self.group_for(fallback),
        };
        let group = &mut self.groups[g];
        group.index_for(fallback);
        for (sub_index, slot_key) in empty_sub_meshes {
            group.slot(slot_key, &mesh.sub_meshes[sub_index]);
        }
    }

    fn into_nodes(self) -> Vec<Node> {
        match self.granularity {
            ConvertGranularity::PerCityModelArea => self
                .groups
                .into_iter()
                .map(|g| Node::with_mesh(AREA_NODE_NAME, g.into_mesh()))
                .collect(),
            ConvertGranularity::PerPrimaryFeatureObject
            | ConvertGranularity::MaterialInPrimary => self
                .groups
                .into_iter()
                .map(|g| Node::with_mesh(g.key.primary.clone(), g.into_mesh()))
                .collect(),
            ConvertGranularity::PerAtomicFeatureObject => {
                let mut nodes: Vec<Node> = Vec::new();
                let mut node_index: HashMap<String, usize> = HashMap::new();
                for group in self.groups {
                    let n = *node_index.entry(group.key.primary.clone()).or_insert_with(|| {
                        nodes.push(Node::new(group.key.primary.clone()));
                        nodes.len() - 1
                    });
                    match group.key.atomic.clone() {
                        Some(atomic) => nodes[n]
                            .children
                            .push(Node::with_mesh(atomic, group.into_mesh())),
                        None => nodes[n].mesh = Some(group.into_mesh()),
                    }
                }
                nodes
            }
        }
    }
}
