//! LOD and feature-type filtering of placed city models.
//!
//! Filters only toggle visibility and collision. They never create or destroy components, so
//! running any filter again with other arguments restores what an earlier run hid.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    ops::Bound,
    sync::Arc,
};

use crate::{
    city_model::InstancedCityModel,
    data_structures::{
        city_object::{CityModel, CityObjectType, MinMaxLod, Package},
        scene_graph::{CollisionResponse, ComponentId},
    },
};

/// Strips the `_N` suffix added by unique renaming: `bldg-a_2` → `bldg-a`.
pub fn original_component_name(name: &str) -> &str {
    match name.rsplit_once('_') {
        Some((base, suffix))
            if !base.is_empty()
                && !suffix.is_empty()
                && suffix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            base
        }
        _ => name,
    }
}

/// Parses the LOD of a `LODn` component. Unique-rename suffixes are ignored.
pub fn parse_lod_component(name: &str) -> Option<i32> {
    original_component_name(name)
        .get(3..)
        .and_then(|lod| lod.parse().ok())
}

impl InstancedCityModel {
    fn show(&mut self, id: ComponentId, visible: bool, propagate: bool) {
        self.scene.set_visibility(id, visible, propagate);
        let response = if visible {
            CollisionResponse::Block
        } else {
            CollisionResponse::Ignore
        };
        self.scene.set_collision_response(id, response, propagate);
    }

    fn show_features(&mut self, lod_component: ComponentId, visible: bool) {
        for feature in self.scene.children(lod_component).to_vec() {
            self.show(feature, visible, true);
        }
    }

    /**
     * Shows, per feature of one GML component, only the highest LOD inside `[min, max]`.
     *
     * A feature of LOD `n` stays visible unless a feature with the same original name exists at
     * some higher LOD in range. Features of LODs outside the range are hidden. The GML and LOD
     * components themselves are left as they are.
     */
    pub fn filter_low_lods(&mut self, gml: ComponentId, min: i32, max: i32) {
        let range = MinMaxLod::new(min, max);
        let lods: Vec<(ComponentId, i32)> = self
            .scene
            .children(gml)
            .iter()
            .filter_map(|lod| {
                let parsed = self.scene.name(*lod).and_then(parse_lod_component);
                if parsed.is_none() {
                    log::debug!(
                        "{:?} is not a LOD component",
                        self.scene.name(*lod).unwrap_or_default()
                    );
                }
                parsed.map(|p| (*lod, p))
            })
            .collect();

        let mut features_by_lod: BTreeMap<i32, HashSet<String>> = BTreeMap::new();
        for (lod_component, lod) in &lods {
            let features = features_by_lod.entry(*lod).or_default();
            if !range.contains(*lod) {
                continue;
            }
            for feature in self.scene.children(*lod_component) {
                if let Some(name) = self.scene.name(*feature) {
                    features.insert(original_component_name(name).to_string());
                }
            }
        }

        for (lod_component, lod) in lods {
            if !range.contains(lod) {
                self.show_features(lod_component, false);
                continue;
            }
            let features = self.scene.children(lod_component).to_vec();
            for feature in features {
                let name = self
                    .scene
                    .name(feature)
                    .map(|n| original_component_name(n).to_string())
                    .unwrap_or_default();
                let shadowed = features_by_lod
                    .range((Bound::Excluded(lod), Bound::Unbounded))
                    .any(|(_, higher)| higher.contains(&name));
                self.show(feature, !shadowed, true);
            }
        }
    }

    /**
     * Applies per-package LOD ranges to the whole model.
     *
     * All features are hidden first. Packages outside `packages` stay hidden. With `only_max_lod`
     * every selected package goes through [`InstancedCityModel::filter_low_lods`], otherwise
     * every feature of a LOD in range is shown.
     */
    pub fn filter_by_lods(
        &mut self,
        packages: Package,
        ranges: &HashMap<Package, MinMaxLod>,
        only_max_lod: bool,
    ) {
        for gml in self.gml_components() {
            let lod_components = self.scene.children(gml).to_vec();
            for lod_component in &lod_components {
                self.show_features(*lod_component, false);
            }
            let package = self.city_model_package(gml);
            if !packages.intersects(package) {
                continue;
            }
            let range = ranges.get(&package).copied().unwrap_or_default();
            if only_max_lod {
                self.filter_low_lods(gml, range.min, range.max);
                continue;
            }
            for lod_component in lod_components {
                let lod = self.scene.name(lod_component).and_then(parse_lod_component);
                if lod.is_some_and(|lod| range.contains(lod)) {
                    self.show_features(lod_component, true);
                }
            }
        }
    }

    fn feature_filter_candidates(&self) -> Vec<(ComponentId, ComponentId)> {
        let mut candidates = Vec::new();
        for gml in self.gml_components() {
            if self.city_model_package(gml) == Package::RELIEF {
                continue;
            }
            for lod in self.scene.children(gml) {
                for feature in self.scene.descendants(*lod) {
                    if self.scene.is_visible(feature) {
                        candidates.push((gml, feature));
                    }
                }
            }
        }
        candidates
    }

    /**
     * Hides visible features whose city object type does not intersect `mask`.
     *
     * Types are read from the `CityObjectGroup` payload. Components without exactly one root
     * object are left alone. Relief is never filtered by type. Only hides, never shows.
     */
    pub fn filter_by_feature_types(&mut self, mask: CityObjectType) {
        for (_, feature) in self.feature_filter_candidates() {
            let ty = match self
                .scene
                .get(feature)
                .and_then(|c| c.city_object_group())
                .map(|data| data.root_city_objects())
            {
                Some([only]) => only.ty,
                _ => continue,
            };
            if !ty.intersects(mask) {
                self.show(feature, false, false);
            }
        }
    }

    /// Type filter for models imported without attribute info, using parsed city models keyed
    /// by GML file name.
    pub fn filter_by_feature_types_legacy(
        &mut self,
        mask: CityObjectType,
        city_models: &HashMap<String, Arc<CityModel>>,
    ) {
        for (gml, feature) in self.feature_filter_candidates() {
            let Some(city_model) = self
                .gml_file_name(gml)
                .and_then(|name| city_models.get(&name))
            else {
                continue;
            };
            let Some(object) = self
                .scene
                .name(feature)
                .and_then(|n| city_model.get_city_object_by_id(original_component_name(n)))
            else {
                continue;
            };
            if !object.ty.intersects(mask) {
                self.show(feature, false, false);
            }
        }
    }

    /// Smallest and largest LOD present among the GML components of `package`.
    pub fn get_min_max_lod(&self, package: Package) -> Option<MinMaxLod> {
        let lods: Vec<i32> = self
            .get_components_by_package(package)
            .into_iter()
            .flat_map(|gml| self.scene.children(gml).to_vec())
            .filter_map(|lod| self.scene.name(lod).and_then(parse_lod_component))
            .collect();
        Some(MinMaxLod::new(
            *lods.iter().min()?,
            *lods.iter().max()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn original_names() {
        assert_eq!(original_component_name("bldg-a_2"), "bldg-a");
        assert_eq!(original_component_name("bldg-a"), "bldg-a");
        assert_eq!(original_component_name("LOD2_13"), "LOD2");
        assert_eq!(original_component_name("road_"), "road_");
        assert_eq!(original_component_name("_7"), "_7");
    }

    #[test]
    fn lod_component_names() {
        assert_eq!(parse_lod_component("LOD0"), Some(0));
        assert_eq!(parse_lod_component("LOD3_1"), Some(3));
        assert_eq!(parse_lod_component("Mesh"), None);
        assert_eq!(parse_lod_component("LO"), None);
    }
}
