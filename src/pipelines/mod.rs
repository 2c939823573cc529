/**
 * This module contains the reconstruction pipelines that turn placed components into new ones.
 *
 * - `reconstruct` runs the export → convert → destroy/hide → rebuild sequence
 * - `classify` assigns materials per city object before conversion
 * - `landscape` turns relief into grid meshes or landscapes and drapes roads onto them
 */
pub mod classify;
pub mod landscape;
pub mod reconstruct;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    city_model::InstancedCityModel,
    context::Context,
    convert::convert,
    data_structures::{
        city_object::{CityModel, CityObjectType},
        granularity::ConvertGranularity,
        material::Material,
        model::Model,
        scene_graph::ComponentId,
    },
    flow::{MainThread, Progress},
    resources::{
        LoadOptions, MeshLoader,
        export::{ComponentSnapshot, export_model, snapshot},
    },
};

/// What happens to the exported model before it is converted.
#[derive(Clone, Debug, Default)]
pub enum Strategy {
    /// Regroup only.
    #[default]
    Reconstruct,
    /// Assign materials by city object type.
    ClassifyByType(HashMap<CityObjectType, Material>),
    /// Assign materials by the textual value of one attribute (`a/b` paths reach nested sets).
    ClassifyByAttribute {
        attribute_key: String,
        materials: HashMap<String, Material>,
    },
}

impl Strategy {
    pub fn is_classification(&self) -> bool {
        !matches!(self, Self::Reconstruct)
    }

    fn apply(&self, model: &mut Model, city_model: &CityModel) {
        match self {
            Self::Reconstruct => {}
            Self::ClassifyByType(materials) => {
                classify::classify(model, city_model, |object, _| {
                    materials.get(&object.ty).cloned()
                })
            }
            Self::ClassifyByAttribute {
                attribute_key,
                materials,
            } => classify::classify(model, city_model, |object, primary| {
                object
                    .attribute(attribute_key)
                    .or_else(|| primary.and_then(|p| p.attribute(attribute_key)))
                    .and_then(|value| value.as_string())
                    .and_then(|value| materials.get(&value).cloned())
            }),
        }
    }
}

/// One reconstruction run at a fixed granularity.
#[derive(Clone, Debug)]
pub struct ModelReconstruct {
    strategy: Strategy,
    granularity: ConvertGranularity,
}

impl ModelReconstruct {
    pub fn new(strategy: Strategy, granularity: ConvertGranularity) -> Self {
        Self {
            strategy,
            granularity,
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn convert_granularity(&self) -> ConvertGranularity {
        self.granularity
    }

    pub fn set_convert_granularity(&mut self, granularity: ConvertGranularity) {
        self.granularity = granularity;
    }

    /**
     * Snapshots the `CityObjectGroup` components among `targets` and their descendants.
     *
     * Each component appears once, in depth-first order of the first target that reaches it.
     * Mutation thread only.
     */
    pub fn get_domain_objects_from_components(
        city: &InstancedCityModel,
        targets: &[ComponentId],
    ) -> Vec<ComponentSnapshot> {
        let mut seen = HashSet::new();
        let mut snapshots = Vec::new();
        for target in targets {
            let mut ids = vec![*target];
            ids.extend(city.scene.descendants(*target));
            for id in ids {
                if !seen.insert(id) {
                    continue;
                }
                if let Some(s) = snapshot(&city.scene, id) {
                    snapshots.push(s);
                }
            }
        }
        snapshots
    }

    pub fn filter_by_granularity(
        targets: &[ComponentSnapshot],
        granularity: ConvertGranularity,
    ) -> Vec<ComponentSnapshot> {
        targets
            .iter()
            .filter(|t| t.granularity() == granularity)
            .cloned()
            .collect()
    }

    /// Exports `targets`, applies the strategy and `adjust`, then converts. Worker side.
    pub fn convert_model_for_reconstruct(
        &self,
        targets: &[ComponentSnapshot],
        adjust: impl FnOnce(&mut Model),
    ) -> (Model, Arc<CityModel>) {
        let exported = export_model(targets, false);
        let mut model = exported.model;
        self.strategy.apply(&mut model, &exported.city_model);
        adjust(&mut model);
        (
            convert(model, self.granularity),
            Arc::new(exported.city_model),
        )
    }

    /// Places a converted model below the actor root, reusing the GML and LOD components.
    pub fn reconstruct_from_converted_model(
        &self,
        main: &MainThread<InstancedCityModel>,
        ctx: &Context,
        model: &Model,
        city_model: Arc<CityModel>,
        progress: &Progress,
    ) -> anyhow::Result<Vec<ComponentId>> {
        let root = main.run(|city| city.scene.root())?;
        let options = LoadOptions {
            include_attr_info: true,
            mobility: ctx.settings.mobility,
            reuse_containers: true,
            granularity: self.granularity,
        };
        Ok(MeshLoader::new(main, options, Some(city_model)).load_model(root, model, progress))
    }
}
