use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::JoinHandle,
};

use city_ngin::{
    CityModelHandle, Context, InstancedCityModel, Vector2, Vector3,
    data_structures::{
        city_object::{AttributeValue, CityModel, CityObject, CityObjectIndex, CityObjectType},
        model::{Mesh, Model, Node, SubMesh},
        scene_graph::ComponentId,
    },
    pipelines::landscape::{HeightmapCreationResult, LandscapeParam, TerrainBuilder},
    resources::dataset::DatasetSource,
    spawn_main_thread,
};

pub(crate) const BLDG_GML: &str = "53392642_bldg_6697_op.gml";
pub(crate) const ROAD_GML: &str = "53392642_tran_6697_op.gml";
pub(crate) const DEM_GML: &str = "53392642_dem_6697_op.gml";

/// Dataset collaborator serving prepared city models and counting parse requests.
#[derive(Default)]
pub(crate) struct StubDataset {
    models: HashMap<String, Arc<CityModel>>,
    loads: AtomicUsize,
}

impl StubDataset {
    pub fn with_model(mut self, city_model: CityModel) -> Self {
        self.models
            .insert(city_model.gml_name.clone(), Arc::new(city_model));
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl DatasetSource for StubDataset {
    fn load_city_model(&self, _: &str, gml_name: &str) -> anyhow::Result<Arc<CityModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.models
            .get(gml_name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{} is not part of the dataset", gml_name))
    }
}

/// Terrain collaborator returning one flat heightmap at `height` over `[0, 10]²`, or nothing.
pub(crate) struct FlatTerrain {
    pub height: Option<f64>,
}

impl TerrainBuilder for FlatTerrain {
    fn create_height_map(
        &self,
        model: &Model,
        param: &LandscapeParam,
    ) -> anyhow::Result<Vec<HeightmapCreationResult>> {
        let Some(height) = self.height else {
            return Ok(Vec::new());
        };
        if model.mesh_nodes().is_empty() {
            return Ok(Vec::new());
        }
        let (width, rows) = (param.texture_width.max(2), param.texture_height.max(2));
        Ok(vec![HeightmapCreationResult {
            node_name: "dem-terrain".into(),
            width,
            height: rows,
            data: vec![u16::MAX; (width * rows) as usize],
            min: Vector3::new(0.0, 0.0, 0.0),
            max: Vector3::new(10.0, 10.0, height),
            max_uv: Vector2::new(1.0, 1.0),
            ..Default::default()
        }])
    }
}

/// Axis aligned square at `z`, two triangles, every vertex tagged with `index`.
pub(crate) fn square(origin: f64, z: f64, index: CityObjectIndex, texture: Option<&str>) -> Mesh {
    Mesh {
        vertices: vec![
            Vector3::new(origin, origin, z),
            Vector3::new(origin + 1.0, origin, z),
            Vector3::new(origin + 1.0, origin + 1.0, z),
            Vector3::new(origin, origin + 1.0, z),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
        uv1: vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(1.0, 1.0),
            Vector2::new(0.0, 1.0),
        ],
        uv4: vec![index.to_uv(); 4],
        sub_meshes: vec![SubMesh::new(0, 6, texture.map(str::to_string))],
        ..Default::default()
    }
}

/// Appends `other` to `mesh` as an extra sub-mesh.
pub(crate) fn append(mesh: &mut Mesh, other: Mesh) {
    let base = mesh.vertices.len() as u32;
    let start = mesh.indices.len();
    mesh.vertices.extend(other.vertices);
    mesh.uv1.extend(other.uv1);
    mesh.uv4.extend(other.uv4);
    mesh.indices.extend(other.indices.iter().map(|i| i + base));
    for sub_mesh in other.sub_meshes {
        mesh.sub_meshes.push(SubMesh {
            start: sub_mesh.start + start,
            end: sub_mesh.end + start,
            ..sub_mesh
        });
    }
}

fn primary_square(gml_id: &str, origin: f64) -> Node {
    let mut mesh = square(origin, 0.0, CityObjectIndex::primary(0), None);
    mesh.city_object_list
        .insert(CityObjectIndex::primary(0), gml_id);
    Node::with_mesh(gml_id, mesh)
}

/// Building with a wall and a roof surface, primary granularity, no own geometry.
fn detailed_building() -> Node {
    let mut mesh = square(0.0, 0.0, CityObjectIndex::new(0, 0), Some("tex/wall.jpg"));
    append(
        &mut mesh,
        square(0.0, 3.0, CityObjectIndex::new(0, 1), Some("tex/roof.png")),
    );
    mesh.city_object_list
        .insert(CityObjectIndex::primary(0), "bldg-a");
    mesh.city_object_list
        .insert(CityObjectIndex::new(0, 0), "wall-a");
    mesh.city_object_list
        .insert(CityObjectIndex::new(0, 1), "roof-a");
    Node::with_mesh("bldg-a", mesh)
}

/// LOD1 with `bldg-a` and `bldg-b`, LOD2 with a detailed `bldg-a`.
pub(crate) fn building_model() -> Model {
    Model::new(vec![
        Node::new("LOD1").with_children(vec![
            primary_square("bldg-a", 0.0),
            primary_square("bldg-b", 5.0),
        ]),
        Node::new("LOD2").with_children(vec![detailed_building()]),
    ])
}

pub(crate) fn building_city_model() -> CityModel {
    let mut city_model = CityModel::new(BLDG_GML);
    city_model.insert(
        CityObject::new("bldg-a", CityObjectType::BUILDING)
            .with_attribute("usage", AttributeValue::String("office".into()))
            .with_children(vec![
                CityObject::new("wall-a", CityObjectType::WALL_SURFACE),
                CityObject::new("roof-a", CityObjectType::ROOF_SURFACE),
            ]),
    );
    city_model.insert(
        CityObject::new("bldg-b", CityObjectType::BUILDING)
            .with_attribute("usage", AttributeValue::String("residential".into())),
    );
    city_model
}

pub(crate) fn road_model() -> Model {
    Model::new(vec![
        Node::new("LOD1").with_children(vec![primary_square("road-1", 2.0)]),
    ])
}

pub(crate) fn road_city_model() -> CityModel {
    let mut city_model = CityModel::new(ROAD_GML);
    city_model.insert(CityObject::new("road-1", CityObjectType::ROAD));
    city_model
}

pub(crate) fn relief_model() -> Model {
    Model::new(vec![
        Node::new("LOD1").with_children(vec![primary_square("dem-1", 0.0)]),
    ])
}

pub(crate) fn relief_city_model() -> CityModel {
    let mut city_model = CityModel::new(DEM_GML);
    city_model.insert(CityObject::new("dem-1", CityObjectType::TIN_RELIEF));
    city_model
}

pub(crate) fn dataset() -> StubDataset {
    StubDataset::default()
        .with_model(building_city_model())
        .with_model(road_city_model())
        .with_model(relief_city_model())
}

/// Handle on a fresh city model whose mutation thread runs on a dedicated thread.
pub(crate) fn spawn_city(ctx: Context) -> (CityModelHandle, JoinHandle<InstancedCityModel>) {
    city_ngin::init_logging();
    let (main, thread) = spawn_main_thread(|| InstancedCityModel::new("PLATEAU_City", "tokyo"));
    let handle = CityModelHandle::new(main, ctx, tokio::runtime::Handle::current());
    (handle, thread)
}

/// Places a model and returns its GML component.
pub(crate) async fn import(
    handle: &CityModelHandle,
    gml_file_name: &str,
    model: Model,
) -> ComponentId {
    let created = handle
        .load_model(gml_file_name, model, Default::default())
        .join()
        .await
        .unwrap();
    created[0]
}

/// Ids of the live `CityObjectGroup` components whose single root object is `gml_id`.
pub(crate) async fn components_of(handle: &CityModelHandle, gml_id: &str) -> Vec<ComponentId> {
    let gml_id = gml_id.to_string();
    handle
        .main_thread()
        .run_async(move |city| {
            city.scene
                .components()
                .filter(|id| {
                    city.scene
                        .get(*id)
                        .and_then(|c| c.city_object_group())
                        .is_some_and(|data| {
                            matches!(data.root_city_objects(), [only] if only.gml_id == gml_id)
                        })
                })
                .collect()
        })
        .await
        .unwrap()
}

pub(crate) async fn is_visible(handle: &CityModelHandle, id: ComponentId) -> bool {
    handle
        .main_thread()
        .run_async(move |city| city.scene.is_visible(id))
        .await
        .unwrap()
}

pub(crate) async fn shutdown(handle: CityModelHandle, thread: JoinHandle<InstancedCityModel>) {
    handle.main_thread().shutdown();
    drop(handle);
    tokio::task::spawn_blocking(move || thread.join().unwrap())
        .await
        .unwrap();
}
