//! Terrain conversion: heightmaps from relief meshes, grid meshes or landscape components from
//! heightmaps, and draping road meshes onto the terrain.
//!
//! Rasterizing the heightmap itself is left to a [`TerrainBuilder`]. Heightmaps sample the `x`/`y`
//! plane of the exported model and store heights along `z`.

use cgmath::{Vector2, Vector3};

use crate::{
    city_model::InstancedCityModel,
    context::Context,
    data_structures::{
        city_object::Package,
        granularity::ConvertGranularity,
        model::{Mesh, Model, Node, SubMesh},
        scene_graph::{ComponentId, ComponentKind},
    },
    flow::{MainThread, Phase, Progress},
    pipelines::{ModelReconstruct, Strategy, reconstruct},
    resources::{LoadOptions, MeshLoader, export::export_model},
};

#[derive(Clone, Debug)]
pub struct LandscapeParam {
    /// Heightmap resolution.
    pub texture_width: u32,
    pub texture_height: u32,
    /// Replace the relief targets by a grid mesh or landscape.
    pub convert_terrain: bool,
    /// Create a landscape component instead of a grid mesh.
    pub convert_to_landscape: bool,
    /// Drape Road package meshes onto the generated heightmaps.
    pub align_land: bool,
    /// Added to the sampled height of draped vertices.
    pub align_offset: f64,
    /// Destroy replaced components instead of hiding them.
    pub destroy_original: bool,
}

impl Default for LandscapeParam {
    fn default() -> Self {
        Self {
            texture_width: 513,
            texture_height: 513,
            convert_terrain: true,
            convert_to_landscape: false,
            align_land: true,
            align_offset: 0.0,
            destroy_original: true,
        }
    }
}

/// Heightmap produced from one relief node.
#[derive(Clone, Debug, PartialEq)]
pub struct HeightmapCreationResult {
    pub node_name: String,
    pub width: u32,
    pub height: u32,
    /// Row-major samples, row 0 at `min.y`. `0` maps to `min.z`, `u16::MAX` to `max.z`.
    pub data: Vec<u16>,
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
    pub min_uv: Vector2<f32>,
    pub max_uv: Vector2<f32>,
    pub texture_path: Option<String>,
}

impl Default for HeightmapCreationResult {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            width: 0,
            height: 0,
            data: Vec::new(),
            min: Vector3::new(0.0, 0.0, 0.0),
            max: Vector3::new(0.0, 0.0, 0.0),
            min_uv: Vector2::new(0.0, 0.0),
            max_uv: Vector2::new(0.0, 0.0),
            texture_path: None,
        }
    }
}

impl HeightmapCreationResult {
    fn sample(&self, x: u32, y: u32) -> f64 {
        let raw = self
            .data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
            .unwrap_or(0);
        self.min.z + (self.max.z - self.min.z) * raw as f64 / u16::MAX as f64
    }

    fn is_usable(&self) -> bool {
        self.width >= 2
            && self.height >= 2
            && self.data.len() >= self.width as usize * self.height as usize
            && self.max.x > self.min.x
            && self.max.y > self.min.y
    }

    /// Bilinearly interpolated height at `(x, y)`, `None` outside the covered area.
    pub fn height_at(&self, x: f64, y: f64) -> Option<f64> {
        if !self.is_usable()
            || x < self.min.x
            || x > self.max.x
            || y < self.min.y
            || y > self.max.y
        {
            return None;
        }
        let fx = (x - self.min.x) / (self.max.x - self.min.x) * (self.width - 1) as f64;
        let fy = (y - self.min.y) / (self.max.y - self.min.y) * (self.height - 1) as f64;
        let x0 = (fx.floor() as u32).min(self.width - 2);
        let y0 = (fy.floor() as u32).min(self.height - 2);
        let (tx, ty) = (fx - x0 as f64, fy - y0 as f64);

        let bottom = self.sample(x0, y0) * (1.0 - tx) + self.sample(x0 + 1, y0) * tx;
        let top = self.sample(x0, y0 + 1) * (1.0 - tx) + self.sample(x0 + 1, y0 + 1) * tx;
        Some(bottom * (1.0 - ty) + top * ty)
    }

    /// Regular grid mesh over the heightmap, two triangles per cell, textured with `texture_path`.
    pub fn to_mesh(&self) -> Mesh {
        let mut mesh = Mesh::default();
        if !self.is_usable() {
            return mesh;
        }
        let (w, h) = (self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                let tx = x as f64 / (w - 1) as f64;
                let ty = y as f64 / (h - 1) as f64;
                mesh.vertices.push(Vector3::new(
                    self.min.x + (self.max.x - self.min.x) * tx,
                    self.min.y + (self.max.y - self.min.y) * ty,
                    self.sample(x, y),
                ));
                mesh.uv1.push(Vector2::new(
                    self.min_uv.x + (self.max_uv.x - self.min_uv.x) * tx as f32,
                    self.min_uv.y + (self.max_uv.y - self.min_uv.y) * ty as f32,
                ));
            }
        }
        for y in 0..h - 1 {
            for x in 0..w - 1 {
                let i = y * w + x;
                mesh.indices
                    .extend_from_slice(&[i, i + 1, i + w + 1, i, i + w + 1, i + w]);
            }
        }
        mesh.sub_meshes.push(SubMesh::new(
            0,
            mesh.indices.len(),
            self.texture_path.clone(),
        ));
        mesh
    }
}

/// Rasterizes the relief meshes of an exported model into heightmaps.
pub trait TerrainBuilder: Send + Sync {
    fn create_height_map(
        &self,
        model: &Model,
        param: &LandscapeParam,
    ) -> anyhow::Result<Vec<HeightmapCreationResult>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LandscapeCreationResult {
    Success,
    Fail,
}

#[derive(Clone, Debug)]
pub struct LandscapeOutcome {
    pub result: LandscapeCreationResult,
    /// Grid mesh, landscape and re-aligned road components.
    pub components: Vec<ComponentId>,
}

/// Moves every vertex that lies over a heightmap onto it.
pub fn drape(model: &mut Model, heightmaps: &[HeightmapCreationResult], offset: f64) {
    fn drape_node(node: &mut Node, heightmaps: &[HeightmapCreationResult], offset: f64) {
        if let Some(mesh) = &mut node.mesh {
            for vertex in &mut mesh.vertices {
                if let Some(z) = heightmaps.iter().find_map(|h| h.height_at(vertex.x, vertex.y)) {
                    vertex.z = z + offset;
                }
            }
        }
        for child in &mut node.children {
            drape_node(child, heightmaps, offset);
        }
    }
    for root in &mut model.root_nodes {
        drape_node(root, heightmaps, offset);
    }
}

/**
 * Re-creates the visible Road package components draped onto `heightmaps`, one pass per
 * granularity present, replacing the originals.
 */
fn align_land(
    main: &MainThread<InstancedCityModel>,
    ctx: &Context,
    heightmaps: &[HeightmapCreationResult],
    param: &LandscapeParam,
    progress: &Progress,
) -> anyhow::Result<Vec<ComponentId>> {
    let targets = main.run(|city| {
        let roads = city.get_components_by_package(Package::ROAD);
        ModelReconstruct::get_domain_objects_from_components(city, &roads)
    })?;
    log::info!("aligning {} road components", targets.len());

    let mut created = Vec::new();
    for granularity in ConvertGranularity::ALL {
        let subset = ModelReconstruct::filter_by_granularity(&targets, granularity);
        if subset.is_empty() {
            continue;
        }
        let reconstruct = ModelReconstruct::new(Strategy::Reconstruct, granularity);
        created.extend(reconstruct::reconstruct_task(
            main,
            ctx,
            &reconstruct,
            subset,
            param.destroy_original,
            progress,
            |model| drape(model, heightmaps, param.align_offset),
        )?);
    }
    Ok(created)
}

/// Worker body of `create_landscape`. The completion event is sent by the caller.
pub fn create_landscape_task(
    main: &MainThread<InstancedCityModel>,
    ctx: &Context,
    targets: Vec<ComponentId>,
    param: &LandscapeParam,
    progress: &Progress,
) -> anyhow::Result<LandscapeOutcome> {
    progress.enter(Phase::Selecting);
    let snapshots = main
        .run(move |city| ModelReconstruct::get_domain_objects_from_components(city, &targets))?;
    let exported = export_model(&snapshots, false);

    progress.enter(Phase::Converting);
    let terrain = ctx
        .terrain
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("no terrain builder configured"))?;
    let heightmaps = terrain.create_height_map(&exported.model, param)?;
    log::info!("{} heightmaps created", heightmaps.len());

    let mut components = Vec::new();
    if param.align_land && !heightmaps.is_empty() {
        components.extend(align_land(main, ctx, &heightmaps, param, progress)?);
    }

    progress.enter(Phase::Rebuilding);
    let result = if heightmaps.is_empty() {
        LandscapeCreationResult::Fail
    } else {
        LandscapeCreationResult::Success
    };
    // Without heightmaps there is nothing to replace the relief with.
    if param.convert_terrain && !heightmaps.is_empty() {
        let root = main.run(|city| city.scene.root())?;
        for heightmap in heightmaps {
            if progress.is_canceled() {
                break;
            }
            if param.convert_to_landscape {
                let mobility = ctx.settings.mobility;
                let component = main.run(move |city| {
                    let name = heightmap.node_name.clone();
                    city.scene.create_component(
                        ComponentKind::Landscape(heightmap),
                        &name,
                        root,
                        mobility,
                    )
                })??;
                components.push(component);
            } else {
                let model = Model::new(vec![Node::with_mesh(
                    heightmap.node_name.clone(),
                    heightmap.to_mesh(),
                )]);
                let options = LoadOptions {
                    include_attr_info: false,
                    mobility: ctx.settings.mobility,
                    ..Default::default()
                };
                components.extend(MeshLoader::new(main, options, None).load_model(
                    root,
                    &model,
                    progress,
                ));
            }
        }

        progress.enter(Phase::Destroying);
        let replaced: Vec<ComponentId> = snapshots.iter().map(|s| s.id).collect();
        let destroy = param.destroy_original;
        main.run(move |city| city.destroy_or_hide_components(&replaced, destroy))?;
    }

    Ok(LandscapeOutcome { result, components })
}
