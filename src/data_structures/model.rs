//! Domain-side city model graph.
//!
//! A [`Model`] is what the dataset collaborator hands over (or what the exporter rebuilds from
//! scene components): an ordered list of root [`Node`]s, each optionally carrying a [`Mesh`].
//! Models are created fresh for every conversion and dropped once the scene has been rebuilt.

use cgmath::{Vector2, Vector3};

use crate::data_structures::{city_object::CityObjectList, material::Material};

/// A contiguous range of triangle indices sharing one texture and material.
///
/// `start..end` addresses `Mesh::indices` and is always a multiple of 3 wide.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubMesh {
    pub start: usize,
    pub end: usize,
    pub texture_path: Option<String>,
    /// Engine material assigned by classification. `None` means the texture based default.
    pub material: Option<Material>,
}

impl SubMesh {
    pub fn new(start: usize, end: usize, texture_path: Option<String>) -> Self {
        Self {
            start,
            end,
            texture_path,
            material: None,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.end.saturating_sub(self.start) / 3
    }

    /// Identity used when sub-meshes are merged per material.
    pub fn material_key(&self) -> (Option<&str>, Option<&Material>) {
        (self.texture_path.as_deref(), self.material.as_ref())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vector3<f64>>,
    pub indices: Vec<u32>,
    /// Primary texture coordinates, one per vertex.
    pub uv1: Vec<Vector2<f32>>,
    /// City object index per vertex encoded as `(primary, atomic)`.
    pub uv4: Vec<Vector2<f32>>,
    pub sub_meshes: Vec<SubMesh>,
    pub city_object_list: CityObjectList,
}

impl Mesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Checks the structural invariants the converter and the emitter rely on.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.indices.len() % 3 != 0 {
            anyhow::bail!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            );
        }
        if let Some(idx) = self.indices.iter().find(|i| **i as usize >= self.vertices.len()) {
            anyhow::bail!(
                "index {} out of range for {} vertices",
                idx,
                self.vertices.len()
            );
        }
        let mut previous_end = 0;
        for sub_mesh in &self.sub_meshes {
            if sub_mesh.start > sub_mesh.end || sub_mesh.end > self.indices.len() {
                anyhow::bail!(
                    "sub-mesh {}..{} exceeds {} indices",
                    sub_mesh.start,
                    sub_mesh.end,
                    self.indices.len()
                );
            }
            if sub_mesh.start % 3 != 0 || sub_mesh.end % 3 != 0 {
                anyhow::bail!(
                    "sub-mesh {}..{} is not triangle aligned",
                    sub_mesh.start,
                    sub_mesh.end
                );
            }
            if sub_mesh.start < previous_end {
                anyhow::bail!("sub-mesh {}..{} overlaps", sub_mesh.start, sub_mesh.end);
            }
            previous_end = sub_mesh.end;
        }
        Ok(())
    }

    /// Per-vertex texture coordinate, zero when the channel is shorter than the vertex list.
    pub fn uv1_at(&self, vertex: usize) -> Vector2<f32> {
        self.uv1.get(vertex).copied().unwrap_or(Vector2::new(0.0, 0.0))
    }

    pub fn uv4_at(&self, vertex: usize) -> Option<Vector2<f32>> {
        self.uv4.get(vertex).copied()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Node {
    pub name: String,
    pub mesh: Option<Mesh>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mesh: None,
            children: Vec::new(),
        }
    }

    pub fn with_mesh(name: impl Into<String>, mesh: Mesh) -> Self {
        Self {
            name: name.into(),
            mesh: Some(mesh),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    /**
     * A container groups features (GML file, LOD level) rather than being one.
     *
     * Nodes without a mesh are containers unless some mesh in their subtree references the node
     * name as a city object, which marks a primary feature whose geometry lives in its children.
     */
    pub fn is_container(&self) -> bool {
        self.mesh.is_none() && !self.children.iter().any(|c| c.references(&self.name))
    }

    fn references(&self, gml_id: &str) -> bool {
        self.mesh
            .as_ref()
            .is_some_and(|m| m.city_object_list.contains_gml_id(gml_id))
            || self.children.iter().any(|c| c.references(gml_id))
    }

    /// Depth-first walk over this node and all descendants.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    pub fn find(&self, name: &str) -> Option<&Node> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Model {
    pub root_nodes: Vec<Node>,
}

impl Model {
    pub fn new(root_nodes: Vec<Node>) -> Self {
        Self { root_nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.root_nodes.is_empty()
    }

    pub fn walk<'a>(&'a self, mut visit: impl FnMut(&'a Node)) {
        for root in &self.root_nodes {
            root.walk(&mut visit);
        }
    }

    /// Every node that carries a mesh, depth-first.
    pub fn mesh_nodes(&self) -> Vec<&Node> {
        let mut nodes = Vec::new();
        self.walk(|n| {
            if n.mesh.is_some() {
                nodes.push(n);
            }
        });
        nodes
    }

    pub fn find(&self, name: &str) -> Option<&Node> {
        self.root_nodes.iter().find_map(|r| r.find(name))
    }
}
