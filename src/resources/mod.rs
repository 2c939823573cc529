/**
 * This module contains all logic for bringing domain models into the scene and back out.
 *
 * - `mesh` emits renderable descriptions from domain meshes
 * - `texture` resolves the material of every sub-mesh
 * - `export` reads placed components back into a domain model
 * - `dataset` is the seam to the CityGML parser
 */
pub mod dataset;
pub mod export;
pub mod mesh;
pub mod texture;

use std::sync::Arc;

use crate::{
    city_model::InstancedCityModel,
    data_structures::{
        city_object::{CityModel, CityObjectGroupData},
        granularity::ConvertGranularity,
        model::{Mesh, Model, Node},
        scene_graph::{ComponentId, ComponentKind, Mobility, StaticMeshId},
    },
    flow::{MainThread, Progress},
};

#[derive(Clone, Copy, Debug)]
pub struct LoadOptions {
    /// Create `CityObjectGroup` components instead of plain ones.
    pub include_attr_info: bool,
    pub mobility: Mobility,
    /// Reuse an existing child with the same name for container nodes (GML file, LOD).
    pub reuse_containers: bool,
    /// Granularity recorded on created `CityObjectGroup` components.
    pub granularity: ConvertGranularity,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            include_attr_info: true,
            mobility: Mobility::Static,
            reuse_containers: false,
            granularity: ConvertGranularity::default(),
        }
    }
}

/**
 * Places a domain model below a scene component.
 *
 * Runs on a worker. Every scene step is a blocking hop to the mutation thread; mesh emission and
 * material resolution happen on the worker in between. Static meshes are collected while a root
 * node is loaded and built in one batch afterwards.
 */
pub struct MeshLoader<'a> {
    main: &'a MainThread<InstancedCityModel>,
    options: LoadOptions,
    city_model: Option<Arc<CityModel>>,
    pending: Vec<StaticMeshId>,
    created: Vec<ComponentId>,
}

impl<'a> MeshLoader<'a> {
    pub fn new(
        main: &'a MainThread<InstancedCityModel>,
        options: LoadOptions,
        city_model: Option<Arc<CityModel>>,
    ) -> Self {
        Self {
            main,
            options,
            city_model,
            pending: Vec::new(),
            created: Vec::new(),
        }
    }

    /// Loads every root node below `parent` and returns the components created, in creation order.
    ///
    /// Cancellation is checked between nodes; whatever was placed until then stays in the scene.
    pub fn load_model(
        mut self,
        parent: ComponentId,
        model: &Model,
        progress: &Progress,
    ) -> Vec<ComponentId> {
        for root in &model.root_nodes {
            if progress.is_canceled() {
                log::info!("loading canceled before {}", root.name);
                break;
            }
            self.load_node_recursive(parent, root, progress);
            self.build_pending();
        }
        self.created
    }

    fn build_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        match self.main.run(move |city| city.scene.batch_build(&pending)) {
            Ok(built) if built < count => {
                log::warn!("built {} of {} static meshes", built, count)
            }
            Ok(built) => log::debug!("built {} static meshes", built),
            Err(e) => log::warn!("static mesh build failed: {}", e),
        }
    }

    fn load_node_recursive(&mut self, parent: ComponentId, node: &Node, progress: &Progress) {
        // Nodes that could not be placed pass their children on to the parent.
        let component = self.load_node(parent, node).unwrap_or(parent);
        for child in &node.children {
            if progress.is_canceled() {
                return;
            }
            self.load_node_recursive(component, child, progress);
        }
    }

    fn load_node(&mut self, parent: ComponentId, node: &Node) -> Option<ComponentId> {
        match &node.mesh {
            None => self.load_scene_node(parent, node),
            Some(mesh) if mesh.vertices.is_empty() => {
                log::debug!("skipping {}: mesh has no vertices", node.name);
                None
            }
            Some(mesh) => self.load_mesh_node(parent, node, mesh),
        }
    }

    /// Blocking hop that logs and swallows failures, so one bad node never aborts a load.
    fn hop<R, F>(&self, node: &str, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut InstancedCityModel) -> anyhow::Result<R> + Send + 'static,
    {
        match self.main.run(f) {
            Ok(Ok(result)) => Some(result),
            Ok(Err(e)) => {
                log::warn!("{}: {:#}", node, e);
                None
            }
            Err(e) => {
                log::warn!("{}: {}", node, e);
                None
            }
        }
    }

    /// Like [`MeshLoader::hop`], but destroys the half-built `component` when the hop fails.
    fn hop_or_discard<R, F>(&self, node: &str, component: ComponentId, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut InstancedCityModel) -> anyhow::Result<R> + Send + 'static,
    {
        let result = self.hop(node, f);
        if result.is_none() {
            self.hop(node, move |city| {
                city.scene.destroy(component);
                Ok(())
            });
        }
        result
    }

    fn outside_children(node: &Node) -> Vec<String> {
        node.children
            .iter()
            .filter(|c| !c.is_container())
            .map(|c| c.name.clone())
            .collect()
    }

    fn load_scene_node(&mut self, parent: ComponentId, node: &Node) -> Option<ComponentId> {
        let container = node.is_container();
        let reuse = container && self.options.reuse_containers;
        let data = (!container && self.options.include_attr_info).then(|| CityObjectGroupData {
            outside_children: Self::outside_children(node),
            ..CityObjectGroupData::from_city_object(
                &node.name,
                self.city_model.as_deref(),
                self.options.granularity,
            )
        });
        let name = node.name.clone();
        let mobility = self.options.mobility;

        let (component, created) = self.hop(&node.name, move |city| {
            if reuse {
                if let Some(existing) = city.scene.find_child(parent, &name) {
                    return Ok((existing, false));
                }
            }
            let kind = match data {
                Some(data) => ComponentKind::CityObjectGroup(data),
                None => ComponentKind::Scene,
            };
            Ok((city.scene.create_component(kind, &name, parent, mobility)?, true))
        })?;
        if created {
            self.created.push(component);
        }
        Some(component)
    }

    fn load_mesh_node(
        &mut self,
        parent: ComponentId,
        node: &Node,
        mesh: &Mesh,
    ) -> Option<ComponentId> {
        let kind = if self.options.include_attr_info {
            ComponentKind::CityObjectGroup(CityObjectGroupData {
                outside_children: Self::outside_children(node),
                ..CityObjectGroupData::from_mesh(
                    mesh,
                    self.city_model.as_deref(),
                    self.options.granularity,
                )
            })
        } else {
            ComponentKind::StaticMesh
        };
        let mobility = self.options.mobility;
        let mesh_name = node.name.clone();
        let (component, static_mesh) = self.hop(&node.name, move |city| {
            let component = city.scene.spawn(kind, mobility);
            let static_mesh = city.scene.create_static_mesh(component, &mesh_name);
            Ok((component, static_mesh))
        })?;

        let description = mesh::emit_mesh(mesh);
        if description.is_empty() {
            log::debug!("{} produced no polygons", node.name);
        }
        self.hop_or_discard(&node.name, component, move |city| {
            city.scene.commit_mesh_description(static_mesh, description)
        })?;
        self.pending.push(static_mesh);

        let materials = texture::resolve_materials(mesh);
        let name = node.name.clone();
        self.hop_or_discard(&node.name, component, move |city| {
            city.scene.set_materials(static_mesh, materials)?;
            city.scene.rename_unique(component, &name);
            city.scene.attach(component, parent)
        })?;
        self.created.push(component);
        Some(component)
    }
}
