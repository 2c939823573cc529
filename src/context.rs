use std::{collections::HashMap, fmt::Debug, sync::Arc};

use crate::{
    data_structures::{
        city_object::{MinMaxLod, Package},
        scene_graph::Mobility,
    },
    pipelines::landscape::TerrainBuilder,
    resources::dataset::DatasetSource,
};

/// Import and filter settings of an instanced city model.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Create `CityObjectGroup` components carrying serialized city objects.
    pub include_attr_info: bool,
    pub mobility: Mobility,
    /// Show only the highest available LOD per feature when filtering by LOD.
    pub only_max_lod: bool,
    pub lod_ranges: HashMap<Package, MinMaxLod>,
    /// Capacity of the completion event channel.
    pub event_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            include_attr_info: true,
            mobility: Mobility::Static,
            only_max_lod: true,
            lod_ranges: HashMap::new(),
            event_capacity: 16,
        }
    }
}

/**
 * Everything a worker task needs besides the scene: settings and the external collaborators.
 *
 * The context is shared behind an `Arc` and never mutated after the handle was created. Use
 * [`Context::configure`] to adjust the settings up front.
 */
#[derive(Clone)]
pub struct Context {
    pub settings: Settings,
    pub dataset: Arc<dyn DatasetSource>,
    pub terrain: Option<Arc<dyn TerrainBuilder>>,
}

impl Context {
    pub fn new(dataset: Arc<dyn DatasetSource>) -> Self {
        Self {
            settings: Settings::default(),
            dataset,
            terrain: None,
        }
    }

    pub fn with_terrain(mut self, terrain: Arc<dyn TerrainBuilder>) -> Self {
        self.terrain = Some(terrain);
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut Settings)) -> Self {
        f(&mut self.settings);
        self
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("settings", &self.settings)
            .field("terrain", &self.terrain.is_some())
            .finish()
    }
}
