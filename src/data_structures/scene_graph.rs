//! Scene graph and hierarchical scene organization.
//!
//! The host engine's component tree is modelled as an arena: components are addressed by stable
//! [`ComponentId`] handles, parents are explicit links and children are ordered id lists. Handles
//! of destroyed components stay invalid forever, so a stale id can never alias a new component.
//!
//! All methods here are mutation-thread only. Workers reach the scene through
//! [`crate::flow::MainThread`].

use std::{collections::HashSet, sync::Arc};

use crate::{
    data_structures::{city_object::CityObjectGroupData, material::Material},
    pipelines::landscape::HeightmapCreationResult,
    render::{PackedStaticMesh, StaticMeshDescription},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StaticMeshId(u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mobility {
    #[default]
    Static,
    Movable,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CollisionResponse {
    #[default]
    Block,
    Ignore,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CollisionTrace {
    #[default]
    Default,
    ComplexAsSimple,
}

#[derive(Clone, Debug)]
pub enum ComponentKind {
    /// Plain transform node (actor root, GML file, LOD level, legacy feature).
    Scene,
    /// Renderable component without city object data.
    StaticMesh,
    CityObjectGroup(CityObjectGroupData),
    Landscape(HeightmapCreationResult),
}

#[derive(Clone, Debug)]
pub struct Component {
    pub name: String,
    pub kind: ComponentKind,
    pub visible: bool,
    pub collision: CollisionResponse,
    pub mobility: Mobility,
    pub static_mesh: Option<StaticMeshId>,
    parent: Option<ComponentId>,
    children: Vec<ComponentId>,
}

impl Component {
    fn new(kind: ComponentKind, mobility: Mobility) -> Self {
        Self {
            name: String::new(),
            kind,
            visible: true,
            collision: CollisionResponse::Block,
            mobility,
            static_mesh: None,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<ComponentId> {
        self.parent
    }

    pub fn children(&self) -> &[ComponentId] {
        &self.children
    }

    pub fn city_object_group(&self) -> Option<&CityObjectGroupData> {
        match &self.kind {
            ComponentKind::CityObjectGroup(data) => Some(data),
            _ => None,
        }
    }

    pub fn city_object_group_mut(&mut self) -> Option<&mut CityObjectGroupData> {
        match &mut self.kind {
            ComponentKind::CityObjectGroup(data) => Some(data),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StaticMesh {
    pub name: String,
    pub owner: ComponentId,
    pub description: Option<Arc<StaticMeshDescription>>,
    pub materials: Vec<Material>,
    pub packed: Option<PackedStaticMesh>,
    pub collision_trace: CollisionTrace,
}

#[derive(Debug)]
pub struct Scene {
    components: Vec<Option<Component>>,
    static_meshes: Vec<Option<StaticMesh>>,
    names: HashSet<String>,
    root: ComponentId,
}

impl Scene {
    pub fn new(root_name: &str) -> Self {
        let mut scene = Self {
            components: Vec::new(),
            static_meshes: Vec::new(),
            names: HashSet::new(),
            root: ComponentId(0),
        };
        let root = scene.spawn(ComponentKind::Scene, Mobility::Static);
        scene.rename_unique(root, root_name);
        scene.root = root;
        scene
    }

    pub fn root(&self) -> ComponentId {
        self.root
    }

    /// Creates a detached, unnamed component.
    pub fn spawn(&mut self, kind: ComponentKind, mobility: Mobility) -> ComponentId {
        let id = ComponentId(self.components.len() as u32);
        self.components.push(Some(Component::new(kind, mobility)));
        id
    }

    /// Spawns, names and attaches in one step.
    pub fn create_component(
        &mut self,
        kind: ComponentKind,
        desired_name: &str,
        parent: ComponentId,
        mobility: Mobility,
    ) -> anyhow::Result<ComponentId> {
        let id = self.spawn(kind, mobility);
        self.rename_unique(id, desired_name);
        self.attach(id, parent)?;
        Ok(id)
    }

    pub fn get(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.components.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    pub fn is_alive(&self, id: ComponentId) -> bool {
        self.get(id).is_some()
    }

    pub fn name(&self, id: ComponentId) -> Option<&str> {
        self.get(id).map(|c| c.name.as_str())
    }

    pub fn parent(&self, id: ComponentId) -> Option<ComponentId> {
        self.get(id).and_then(|c| c.parent)
    }

    pub fn children(&self, id: ComponentId) -> &[ComponentId] {
        self.get(id).map(|c| c.children.as_slice()).unwrap_or_default()
    }

    pub fn find_child(&self, parent: ComponentId, name: &str) -> Option<ComponentId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|c| self.name(*c) == Some(name))
    }

    /// All descendants in depth-first pre-order, excluding `id` itself.
    pub fn descendants(&self, id: ComponentId) -> Vec<ComponentId> {
        let mut out = Vec::new();
        let mut stack: Vec<ComponentId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev());
        }
        out
    }

    /// Ids of all live components, in creation order.
    pub fn components(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .map(|(i, _)| ComponentId(i as u32))
    }

    /**
     * Renames `id` to `desired` if no other component uses that name, otherwise to the first free
     * `desired_N`. Returns the name actually assigned.
     */
    pub fn rename_unique(&mut self, id: ComponentId, desired: &str) -> String {
        let Some(current) = self.get(id).map(|c| c.name.clone()) else {
            return String::new();
        };
        if current == desired {
            return current;
        }
        let name = if self.names.contains(desired) {
            (1..)
                .map(|n| format!("{desired}_{n}"))
                .find(|candidate| !self.names.contains(candidate))
                .unwrap_or_else(|| desired.to_string())
        } else {
            desired.to_string()
        };
        self.names.remove(&current);
        self.names.insert(name.clone());
        if let Some(component) = self.get_mut(id) {
            component.name = name.clone();
        }
        name
    }

    pub fn attach(&mut self, child: ComponentId, parent: ComponentId) -> anyhow::Result<()> {
        if !self.is_alive(child) || !self.is_alive(parent) {
            anyhow::bail!("cannot attach {:?} to {:?}: component destroyed", child, parent);
        }
        if child == parent || self.descendants(child).contains(&parent) {
            anyhow::bail!("attaching {:?} to {:?} would create a cycle", child, parent);
        }
        self.detach(child);
        if let Some(c) = self.get_mut(child) {
            c.parent = Some(parent);
        }
        if let Some(p) = self.get_mut(parent) {
            p.children.push(child);
        }
        Ok(())
    }

    fn detach(&mut self, child: ComponentId) {
        let Some(old_parent) = self.get_mut(child).and_then(|c| c.parent.take()) else {
            return;
        };
        if let Some(p) = self.get_mut(old_parent) {
            p.children.retain(|c| *c != child);
        }
    }

    pub fn set_visibility(&mut self, id: ComponentId, visible: bool, propagate: bool) {
        let mut targets = vec![id];
        if propagate {
            targets.extend(self.descendants(id));
        }
        for target in targets {
            if let Some(c) = self.get_mut(target) {
                c.visible = visible;
            }
        }
    }

    pub fn is_visible(&self, id: ComponentId) -> bool {
        self.get(id).is_some_and(|c| c.visible)
    }

    pub fn set_collision_response(
        &mut self,
        id: ComponentId,
        response: CollisionResponse,
        propagate: bool,
    ) {
        let mut targets = vec![id];
        if propagate {
            targets.extend(self.descendants(id));
        }
        for target in targets {
            if let Some(c) = self.get_mut(target) {
                c.collision = response;
            }
        }
    }

    /// Destroys `id` together with its subtree and the static meshes they own.
    pub fn destroy(&mut self, id: ComponentId) {
        if id == self.root {
            log::warn!("refusing to destroy the scene root");
            return;
        }
        if !self.is_alive(id) {
            return;
        }
        self.detach(id);
        let mut doomed = self.descendants(id);
        doomed.push(id);
        for target in doomed {
            if let Some(component) = self.components[target.0 as usize].take() {
                self.names.remove(&component.name);
                if let Some(mesh) = component.static_mesh {
                    self.static_meshes[mesh.0 as usize] = None;
                }
            }
        }
        self.static_meshes
            .iter_mut()
            .filter(|m| {
                m.as_ref()
                    .is_some_and(|m| self.components[m.owner.0 as usize].is_none())
            })
            .for_each(|m| *m = None);
    }

    pub fn create_static_mesh(&mut self, owner: ComponentId, name: &str) -> StaticMeshId {
        let id = StaticMeshId(self.static_meshes.len() as u32);
        self.static_meshes.push(Some(StaticMesh {
            name: name.to_string(),
            owner,
            description: None,
            materials: Vec::new(),
            packed: None,
            collision_trace: CollisionTrace::Default,
        }));
        id
    }

    pub fn static_mesh(&self, id: StaticMeshId) -> Option<&StaticMesh> {
        self.static_meshes.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn static_mesh_mut(&mut self, id: StaticMeshId) -> Option<&mut StaticMesh> {
        self.static_meshes.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Static mesh assigned to a component by a finished build.
    pub fn static_mesh_of(&self, component: ComponentId) -> Option<&StaticMesh> {
        self.get(component)
            .and_then(|c| c.static_mesh)
            .and_then(|id| self.static_mesh(id))
    }

    pub fn commit_mesh_description(
        &mut self,
        id: StaticMeshId,
        description: StaticMeshDescription,
    ) -> anyhow::Result<()> {
        let mesh = self
            .static_mesh_mut(id)
            .ok_or_else(|| anyhow::anyhow!("static mesh {:?} no longer exists", id))?;
        mesh.description = Some(Arc::new(description));
        Ok(())
    }

    pub fn set_materials(
        &mut self,
        id: StaticMeshId,
        materials: Vec<Material>,
    ) -> anyhow::Result<()> {
        let mesh = self
            .static_mesh_mut(id)
            .ok_or_else(|| anyhow::anyhow!("static mesh {:?} no longer exists", id))?;
        mesh.materials = materials;
        Ok(())
    }

    /**
     * Builds every pending static mesh and hands it to its owning component, switching the
     * component's collision to complex-as-simple. Returns the number of meshes built.
     */
    pub fn batch_build(&mut self, pending: &[StaticMeshId]) -> usize {
        let mut built = 0;
        for id in pending {
            let Some(mesh) = self.static_mesh_mut(*id) else {
                log::warn!("static mesh {:?} was destroyed before it could be built", id);
                continue;
            };
            let Some(description) = mesh.description.clone() else {
                log::warn!("static mesh {} has no committed description", mesh.name);
                continue;
            };
            mesh.packed = Some(description.pack());
            mesh.collision_trace = CollisionTrace::ComplexAsSimple;
            let owner = mesh.owner;
            if let Some(component) = self.get_mut(owner) {
                component.static_mesh = Some(*id);
                built += 1;
            }
        }
        built
    }
}
