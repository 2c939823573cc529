//! The instanced city model: placed scene plus the asynchronous operations on it.
//!
//! [`InstancedCityModel`] is the mutation-thread state. It is only ever touched from closures
//! queued through [`MainThread`]. [`CityModelHandle`] is the cloneable front used by UI and
//! automation: every long running operation returns a [`Job`] and fires exactly one
//! [`CityModelEvent`] when it ends, whether it succeeded, failed, found nothing to do or was
//! canceled.

use std::{collections::HashMap, sync::Arc};

use tokio::{runtime::Handle, sync::broadcast};

use crate::{
    context::Context,
    data_structures::{
        city_object::{
            CityModel, CityObject, CityObjectInfo, CityObjectType, MinMaxLod, Package,
        },
        granularity::{ConvertGranularity, MeshGranularity},
        material::Material,
        model::Model,
        scene_graph::{CollisionResponse, ComponentId, ComponentKind, Scene},
    },
    filter::{original_component_name, parse_lod_component},
    flow::{Job, MainThread, Phase},
    pipelines::{
        Strategy,
        landscape::{self, LandscapeCreationResult, LandscapeOutcome, LandscapeParam},
        reconstruct,
    },
    resources::{LoadOptions, MeshLoader},
};

/// Name prefix of billboard components, which are never treated as GML components.
pub const BILLBOARD_PREFIX: &str = "Billboard";

#[derive(Debug)]
pub struct InstancedCityModel {
    pub scene: Scene,
    pub dataset_name: String,
    is_filtering: bool,
}

impl InstancedCityModel {
    pub fn new(actor_name: &str, dataset_name: &str) -> Self {
        Self {
            scene: Scene::new(actor_name),
            dataset_name: dataset_name.to_string(),
            is_filtering: false,
        }
    }

    /// True while a feature-type filter job is between its selection and filter hops.
    pub fn is_filtering(&self) -> bool {
        self.is_filtering
    }

    pub fn set_filtering(&mut self, filtering: bool) {
        self.is_filtering = filtering;
    }

    /// Direct children of the actor root that represent GML files.
    pub fn gml_components(&self) -> Vec<ComponentId> {
        self.scene
            .children(self.scene.root())
            .iter()
            .copied()
            .filter(|id| {
                self.scene.get(*id).is_some_and(|c| {
                    !c.name.starts_with(BILLBOARD_PREFIX)
                        && matches!(c.kind, ComponentKind::Scene)
                })
            })
            .collect()
    }

    pub fn gml_file_name(&self, gml: ComponentId) -> Option<String> {
        self.scene.name(gml).map(|name| format!("{name}.gml"))
    }

    pub fn city_model_package(&self, gml: ComponentId) -> Package {
        self.scene
            .name(gml)
            .map(Package::from_gml_file_name)
            .unwrap_or(Package::UNKNOWN)
    }

    /// Union of the packages of all GML components.
    pub fn get_city_model_packages(&self) -> Package {
        self.gml_components()
            .into_iter()
            .fold(Package::empty(), |all, gml| all | self.city_model_package(gml))
    }

    /// GML components whose package is part of the `package` mask.
    pub fn get_components_by_package(&self, package: Package) -> Vec<ComponentId> {
        self.gml_components()
            .into_iter()
            .filter(|gml| package.intersects(self.city_model_package(*gml)))
            .collect()
    }

    /// GML component `id` belongs to, `id` itself for GML components.
    fn gml_of(&self, id: ComponentId) -> Option<ComponentId> {
        let root = self.scene.root();
        let mut current = id;
        loop {
            let parent = self.scene.parent(current)?;
            if parent == root {
                return Some(current);
            }
            current = parent;
        }
    }

    /// Package and LOD of the GML/LOD components above `id`.
    pub fn get_component_classification(&self, id: ComponentId) -> (Package, Option<i32>) {
        let Some(gml) = self.gml_of(id) else {
            return (Package::UNKNOWN, None);
        };
        let lod = std::iter::successors(Some(id), |c| self.scene.parent(*c))
            .take_while(|c| *c != gml)
            .filter_map(|c| self.scene.name(c).and_then(parse_lod_component))
            .last();
        (self.city_model_package(gml), lod)
    }

    pub fn get_city_object_info(&self, id: ComponentId) -> Option<CityObjectInfo> {
        let component = self.scene.get(id)?;
        let gml_name = self.gml_of(id).and_then(|gml| self.gml_file_name(gml))?;
        let gml_id = component
            .city_object_group()
            .and_then(|data| data.primary_city_object())
            .map(|object| object.gml_id.clone())
            .unwrap_or_else(|| original_component_name(&component.name).to_string());
        Some(CityObjectInfo {
            dataset_name: self.dataset_name.clone(),
            gml_name,
            id: gml_id,
        })
    }

    pub fn get_all_root_city_objects(&self) -> Vec<CityObject> {
        self.scene
            .components()
            .filter_map(|id| self.scene.get(id)?.city_object_group())
            .flat_map(|data| data.root_city_objects().iter().cloned())
            .collect()
    }

    pub fn has_attribute_info(&self) -> bool {
        self.scene
            .components()
            .any(|id| self.scene.get(id).is_some_and(|c| c.city_object_group().is_some()))
    }

    pub fn destroy_or_hide_components(&mut self, components: &[ComponentId], destroy: bool) {
        for id in components {
            if destroy {
                self.scene.destroy(*id);
            } else {
                self.scene.set_visibility(*id, false, false);
                self.scene
                    .set_collision_response(*id, CollisionResponse::Ignore, false);
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CityModelEvent {
    ReconstructFinished,
    ClassifyFinished,
    LandscapeCreationFinished(LandscapeCreationResult),
}

/// Cloneable front of one instanced city model.
#[derive(Clone)]
pub struct CityModelHandle {
    main: MainThread<InstancedCityModel>,
    ctx: Arc<Context>,
    events: broadcast::Sender<CityModelEvent>,
    runtime: Handle,
}

impl CityModelHandle {
    pub fn new(main: MainThread<InstancedCityModel>, ctx: Context, runtime: Handle) -> Self {
        let (events, _) = broadcast::channel(ctx.settings.event_capacity.max(1));
        Self {
            main,
            ctx: Arc::new(ctx),
            events,
            runtime,
        }
    }

    pub fn main_thread(&self) -> &MainThread<InstancedCityModel> {
        &self.main
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CityModelEvent> {
        self.events.subscribe()
    }

    fn fire(events: &broadcast::Sender<CityModelEvent>, event: CityModelEvent) {
        log::info!("{:?}", event);
        if events.send(event).is_err() {
            log::debug!("no subscribers for city model events");
        }
    }

    /**
     * Places a freshly extracted model of one GML file below a new GML component.
     *
     * With attribute info enabled the GML file is parsed through the dataset collaborator; a
     * parse failure degrades to components without attributes. Non-max LODs are hidden once
     * everything is placed.
     */
    pub fn load_model(
        &self,
        gml_file_name: &str,
        model: Model,
        granularity: ConvertGranularity,
    ) -> Job<Vec<ComponentId>> {
        let main = self.main.clone();
        let ctx = self.ctx.clone();
        let gml_file_name = gml_file_name.to_string();
        Job::spawn(&self.runtime, move |progress| {
            progress.enter(Phase::Selecting);
            let dataset_name = main.run(|city| city.dataset_name.clone())?;
            let city_model = if ctx.settings.include_attr_info {
                match ctx.dataset.load_city_model(&dataset_name, &gml_file_name) {
                    Ok(city_model) => Some(city_model),
                    Err(e) => {
                        log::warn!("{:#}", e);
                        None
                    }
                }
            } else {
                None
            };

            let stem = gml_file_name
                .strip_suffix(".gml")
                .unwrap_or(&gml_file_name)
                .to_string();
            let mobility = ctx.settings.mobility;
            let gml = main.run(move |city| {
                let root = city.scene.root();
                city.scene
                    .create_component(ComponentKind::Scene, &stem, root, mobility)
            })??;

            progress.enter(Phase::Rebuilding);
            let options = LoadOptions {
                include_attr_info: ctx.settings.include_attr_info,
                mobility,
                reuse_containers: false,
                granularity,
            };
            let mut created = vec![gml];
            created.extend(MeshLoader::new(&main, options, city_model).load_model(
                gml,
                &model,
                &progress,
            ));
            main.run(move |city| city.filter_low_lods(gml, 0, i32::MAX))?;
            progress.enter(Phase::Done);
            Ok(created)
        })
    }

    fn spawn_reconstruction(
        &self,
        strategy: Strategy,
        targets: Vec<ComponentId>,
        granularity: MeshGranularity,
        destroy_original: bool,
    ) -> Job<Vec<ComponentId>> {
        let main = self.main.clone();
        let ctx = self.ctx.clone();
        let events = self.events.clone();
        let event = if strategy.is_classification() {
            CityModelEvent::ClassifyFinished
        } else {
            CityModelEvent::ReconstructFinished
        };
        Job::spawn(&self.runtime, move |progress| {
            let result = reconstruct::run_passes(
                &main,
                &ctx,
                strategy,
                targets,
                granularity,
                destroy_original,
                &progress,
            );
            progress.enter(Phase::NotifyingCompletion);
            if let Err(e) = &result {
                log::error!("{:#}", e);
            }
            Self::fire(&events, event);
            progress.enter(Phase::Done);
            result
        })
    }

    pub fn reconstruct_model(
        &self,
        targets: Vec<ComponentId>,
        granularity: MeshGranularity,
        destroy_original: bool,
    ) -> Job<Vec<ComponentId>> {
        self.spawn_reconstruction(Strategy::Reconstruct, targets, granularity, destroy_original)
    }

    pub fn classify_by_type(
        &self,
        targets: Vec<ComponentId>,
        materials: HashMap<CityObjectType, Material>,
        granularity: MeshGranularity,
        destroy_original: bool,
    ) -> Job<Vec<ComponentId>> {
        self.spawn_reconstruction(
            Strategy::ClassifyByType(materials),
            targets,
            granularity,
            destroy_original,
        )
    }

    pub fn classify_by_attribute(
        &self,
        targets: Vec<ComponentId>,
        attribute_key: &str,
        materials: HashMap<String, Material>,
        granularity: MeshGranularity,
        destroy_original: bool,
    ) -> Job<Vec<ComponentId>> {
        self.spawn_reconstruction(
            Strategy::ClassifyByAttribute {
                attribute_key: attribute_key.to_string(),
                materials,
            },
            targets,
            granularity,
            destroy_original,
        )
    }

    pub fn create_landscape(
        &self,
        targets: Vec<ComponentId>,
        param: LandscapeParam,
    ) -> Job<LandscapeOutcome> {
        let main = self.main.clone();
        let ctx = self.ctx.clone();
        let events = self.events.clone();
        Job::spawn(&self.runtime, move |progress| {
            let outcome = landscape::create_landscape_task(&main, &ctx, targets, &param, &progress);
            progress.enter(Phase::NotifyingCompletion);
            let result = match &outcome {
                Ok(outcome) => outcome.result,
                Err(e) => {
                    log::error!("{:#}", e);
                    LandscapeCreationResult::Fail
                }
            };
            Self::fire(&events, CityModelEvent::LandscapeCreationFinished(result));
            progress.enter(Phase::Done);
            outcome
        })
    }

    /// Shows only the max LOD per feature inside `[min, max]` below one GML component.
    pub async fn filter_low_lods(
        &self,
        gml: ComponentId,
        min: i32,
        max: i32,
    ) -> anyhow::Result<()> {
        Ok(self
            .main
            .run_async(move |city| city.filter_low_lods(gml, min, max))
            .await?)
    }

    /// Actor-wide LOD filter using the configured ranges and max-LOD mode.
    pub async fn filter_by_lods(&self, packages: Package) -> anyhow::Result<()> {
        let ranges = self.ctx.settings.lod_ranges.clone();
        let only_max_lod = self.ctx.settings.only_max_lod;
        Ok(self
            .main
            .run_async(move |city| city.filter_by_lods(packages, &ranges, only_max_lod))
            .await?)
    }

    /**
     * Hides visible features whose type does not intersect `mask`.
     *
     * Models imported without attribute info have no types on their components; the GML files
     * are then parsed through the dataset collaborator first and the filter runs on the parsed
     * city models.
     */
    pub fn filter_by_feature_types(&self, mask: CityObjectType) -> Job<()> {
        let main = self.main.clone();
        let ctx = self.ctx.clone();
        Job::spawn(&self.runtime, move |progress| {
            progress.enter(Phase::Selecting);
            let (has_attribute_info, dataset_name, gml_files) = main.run(|city| {
                city.set_filtering(true);
                // Relief is never type filtered, so its files are not parsed.
                let gml_files: Vec<String> = city
                    .gml_components()
                    .into_iter()
                    .filter(|gml| city.city_model_package(*gml) != Package::RELIEF)
                    .filter_map(|gml| city.gml_file_name(gml))
                    .collect();
                (city.has_attribute_info(), city.dataset_name.clone(), gml_files)
            })?;

            if has_attribute_info {
                main.run(move |city| {
                    city.filter_by_feature_types(mask);
                    city.set_filtering(false);
                })?;
                progress.enter(Phase::Done);
                return Ok(());
            }

            progress.enter(Phase::Converting);
            let mut city_models: HashMap<String, Arc<CityModel>> = HashMap::new();
            for gml_file in gml_files {
                match ctx.dataset.load_city_model(&dataset_name, &gml_file) {
                    Ok(city_model) => {
                        city_models.insert(gml_file, city_model);
                    }
                    Err(e) => log::warn!("{:#}", e),
                }
            }
            main.run(move |city| {
                city.filter_by_feature_types_legacy(mask, &city_models);
                city.set_filtering(false);
            })?;
            progress.enter(Phase::Done);
            Ok(())
        })
    }

    pub async fn get_min_max_lod(&self, package: Package) -> anyhow::Result<Option<MinMaxLod>> {
        Ok(self
            .main
            .run_async(move |city| city.get_min_max_lod(package))
            .await?)
    }

    pub async fn get_city_model_packages(&self) -> anyhow::Result<Package> {
        Ok(self
            .main
            .run_async(|city| city.get_city_model_packages())
            .await?)
    }

    pub async fn get_components_by_package(
        &self,
        package: Package,
    ) -> anyhow::Result<Vec<ComponentId>> {
        Ok(self
            .main
            .run_async(move |city| city.get_components_by_package(package))
            .await?)
    }

    pub async fn get_city_object_info(
        &self,
        id: ComponentId,
    ) -> anyhow::Result<Option<CityObjectInfo>> {
        Ok(self
            .main
            .run_async(move |city| city.get_city_object_info(id))
            .await?)
    }

    pub async fn is_filtering(&self) -> anyhow::Result<bool> {
        Ok(self.main.run_async(|city| city.is_filtering()).await?)
    }
}
