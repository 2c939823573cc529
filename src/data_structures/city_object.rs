//! City objects, their serialized form on scene components and the package classification.
//!
//! Every renderable vertex carries a [`CityObjectIndex`] in its fourth UV channel. The index is
//! resolved through the mesh's [`CityObjectList`] to a GML ID, which in turn is looked up in the
//! [`CityModel`] parsed by the dataset collaborator (or in the [`CityObjectGroupData`] stored on
//! an already placed component).

use std::collections::{BTreeMap, HashMap, HashSet};

use cgmath::Vector2;
use serde::{Deserialize, Serialize};

use crate::data_structures::{granularity::ConvertGranularity, model::Mesh};

/// `(primary, atomic)` position of a city object inside one mesh. `atomic == -1` addresses the
/// primary object itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityObjectIndex {
    pub primary_index: i32,
    pub atomic_index: i32,
}

impl CityObjectIndex {
    pub const fn new(primary_index: i32, atomic_index: i32) -> Self {
        Self {
            primary_index,
            atomic_index,
        }
    }

    pub const fn primary(primary_index: i32) -> Self {
        Self::new(primary_index, -1)
    }

    pub fn is_primary(&self) -> bool {
        self.atomic_index < 0
    }

    pub fn primary_of(&self) -> Self {
        Self::primary(self.primary_index)
    }

    pub fn from_uv(uv: Vector2<f32>) -> Self {
        Self::new(uv.x.round() as i32, uv.y.round() as i32)
    }

    pub fn to_uv(self) -> Vector2<f32> {
        Vector2::new(self.primary_index as f32, self.atomic_index as f32)
    }
}

/// Per-mesh lookup from [`CityObjectIndex`] to GML ID.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CityObjectList {
    entries: BTreeMap<CityObjectIndex, String>,
}

impl CityObjectList {
    pub fn insert(&mut self, index: CityObjectIndex, gml_id: impl Into<String>) {
        self.entries.insert(index, gml_id.into());
    }

    pub fn get(&self, index: CityObjectIndex) -> Option<&str> {
        self.entries.get(&index).map(String::as_str)
    }

    pub fn index_of(&self, gml_id: &str) -> Option<CityObjectIndex> {
        self.entries
            .iter()
            .find_map(|(idx, id)| (id == gml_id).then_some(*idx))
    }

    pub fn contains_gml_id(&self, gml_id: &str) -> bool {
        self.entries.values().any(|id| id == gml_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CityObjectIndex, &str)> {
        self.entries.iter().map(|(idx, id)| (*idx, id.as_str()))
    }

    pub fn primaries(&self) -> impl Iterator<Item = (CityObjectIndex, &str)> {
        self.iter().filter(|(idx, _)| idx.is_primary())
    }

    pub fn atomics_of(&self, primary_index: i32) -> impl Iterator<Item = (CityObjectIndex, &str)> {
        self.iter()
            .filter(move |(idx, _)| idx.primary_index == primary_index && !idx.is_primary())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

bitflags::bitflags! {
    /// CityGML object classes. Masks of these select features in the type filter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct CityObjectType: u64 {
        const GENERIC_CITY_OBJECT = 1 << 0;
        const BUILDING = 1 << 1;
        const ROOM = 1 << 2;
        const BUILDING_INSTALLATION = 1 << 3;
        const BUILDING_FURNITURE = 1 << 4;
        const DOOR = 1 << 5;
        const WINDOW = 1 << 6;
        const CITY_FURNITURE = 1 << 7;
        const TRACK = 1 << 8;
        const ROAD = 1 << 9;
        const RAILWAY = 1 << 10;
        const SQUARE = 1 << 11;
        const PLANT_COVER = 1 << 12;
        const SOLITARY_VEGETATION_OBJECT = 1 << 13;
        const WATER_BODY = 1 << 14;
        const RELIEF_FEATURE = 1 << 15;
        const LAND_USE = 1 << 16;
        const TUNNEL = 1 << 17;
        const BRIDGE = 1 << 18;
        const BRIDGE_CONSTRUCTION_ELEMENT = 1 << 19;
        const BRIDGE_INSTALLATION = 1 << 20;
        const BRIDGE_PART = 1 << 21;
        const BUILDING_PART = 1 << 22;
        const WALL_SURFACE = 1 << 23;
        const ROOF_SURFACE = 1 << 24;
        const GROUND_SURFACE = 1 << 25;
        const CLOSURE_SURFACE = 1 << 26;
        const FLOOR_SURFACE = 1 << 27;
        const INTERIOR_WALL_SURFACE = 1 << 28;
        const CEILING_SURFACE = 1 << 29;
        const CITY_OBJECT_GROUP = 1 << 30;
        const OUTER_CEILING_SURFACE = 1 << 31;
        const OUTER_FLOOR_SURFACE = 1 << 32;
        const TRANSPORTATION_OBJECT = 1 << 33;
        const INT_BUILDING_INSTALLATION = 1 << 34;
        const WATER_SURFACE = 1 << 35;
        const RELIEF_COMPONENT = 1 << 36;
        const TIN_RELIEF = 1 << 37;
        const MASSPOINT_RELIEF = 1 << 38;
        const BREAKLINE_RELIEF = 1 << 39;
        const RASTER_RELIEF = 1 << 40;
        const AUXILIARY_TRAFFIC_AREA = 1 << 41;
        const TRAFFIC_AREA = 1 << 42;
        const UNKNOWN = 1 << 63;
    }
}

impl Default for CityObjectType {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags::bitflags! {
    /// Dataset categories. Every GML file belongs to exactly one package.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Package: u32 {
        const BUILDING = 1 << 0;
        const ROAD = 1 << 1;
        const URBAN_PLANNING_DECISION = 1 << 2;
        const LAND_USE = 1 << 3;
        const CITY_FURNITURE = 1 << 4;
        const VEGETATION = 1 << 5;
        const RELIEF = 1 << 6;
        const DISASTER_RISK = 1 << 7;
        const RAILWAY = 1 << 8;
        const WATERWAY = 1 << 9;
        const WATER_BODY = 1 << 10;
        const BRIDGE = 1 << 11;
        const TRACK = 1 << 12;
        const SQUARE = 1 << 13;
        const TUNNEL = 1 << 14;
        const UNDERGROUND_FACILITY = 1 << 15;
        const UNDERGROUND_BUILDING = 1 << 16;
        const AREA = 1 << 17;
        const OTHER_CONSTRUCTION = 1 << 18;
        const GENERIC = 1 << 19;
        const UNKNOWN = 1 << 31;
    }
}

impl Package {
    /// Maps a dataset sub folder / file name segment such as `bldg` to its package.
    pub fn from_feature_type(feature_type: &str) -> Self {
        match feature_type {
            "bldg" => Self::BUILDING,
            "tran" => Self::ROAD,
            "urf" => Self::URBAN_PLANNING_DECISION,
            "luse" => Self::LAND_USE,
            "frn" => Self::CITY_FURNITURE,
            "veg" => Self::VEGETATION,
            "dem" => Self::RELIEF,
            "fld" | "tnm" | "lsld" | "htd" | "ifld" => Self::DISASTER_RISK,
            "rwy" => Self::RAILWAY,
            "wwy" => Self::WATERWAY,
            "wtr" => Self::WATER_BODY,
            "brid" => Self::BRIDGE,
            "trk" => Self::TRACK,
            "squr" => Self::SQUARE,
            "tun" => Self::TUNNEL,
            "unf" => Self::UNDERGROUND_FACILITY,
            "ubld" => Self::UNDERGROUND_BUILDING,
            "area" => Self::AREA,
            "cons" => Self::OTHER_CONSTRUCTION,
            "gen" => Self::GENERIC,
            _ => Self::UNKNOWN,
        }
    }

    /// `53392642_bldg_6697_op.gml` belongs to [`Package::BUILDING`].
    pub fn from_gml_file_name(gml_file_name: &str) -> Self {
        gml_file_name
            .split('_')
            .nth(1)
            .map(|segment| Self::from_feature_type(segment.trim_end_matches(".gml")))
            .unwrap_or(Self::UNKNOWN)
    }
}

/// Inclusive LOD range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinMaxLod {
    pub min: i32,
    pub max: i32,
}

impl MinMaxLod {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, lod: i32) -> bool {
        self.min <= lod && lod <= self.max
    }
}

impl Default for MinMaxLod {
    fn default() -> Self {
        Self::new(0, i32::MAX)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum AttributeValue {
    String(String),
    Double(f64),
    Integer(i64),
    Boolean(bool),
    Date(String),
    Uri(String),
    Measure(f64),
    AttributeSet(Attributes),
}

pub type Attributes = BTreeMap<String, AttributeValue>;

impl AttributeValue {
    /// Textual form used as a classification key. Nested sets have none.
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::String(s) | Self::Date(s) | Self::Uri(s) => Some(s.clone()),
            Self::Double(v) | Self::Measure(v) => Some(v.to_string()),
            Self::Integer(v) => Some(v.to_string()),
            Self::Boolean(v) => Some(v.to_string()),
            Self::AttributeSet(_) => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CityObject {
    #[serde(rename = "gmlID")]
    pub gml_id: String,
    #[serde(rename = "cityObjectIndex")]
    pub index: CityObjectIndex,
    #[serde(rename = "cityObjectType")]
    pub ty: CityObjectType,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CityObject>,
}

impl Default for CityObjectIndex {
    fn default() -> Self {
        Self::primary(0)
    }
}

impl CityObject {
    pub fn new(gml_id: impl Into<String>, ty: CityObjectType) -> Self {
        Self {
            gml_id: gml_id.into(),
            ty,
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_children(mut self, children: Vec<CityObject>) -> Self {
        self.children = children;
        self
    }

    /// Resolves `a/b/c` style keys through nested attribute sets.
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        let mut segments = key.split('/');
        let mut current = self.attributes.get(segments.next()?)?;
        for segment in segments {
            match current {
                AttributeValue::AttributeSet(set) => current = set.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn find(&self, gml_id: &str) -> Option<&CityObject> {
        if self.gml_id == gml_id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(gml_id))
    }

    fn find_by_index(&self, index: CityObjectIndex) -> Option<&CityObject> {
        if self.index == index {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_index(index))
    }

    /// Copy without nested children, placed at `index`.
    fn detached(&self, index: CityObjectIndex) -> CityObject {
        CityObject {
            gml_id: self.gml_id.clone(),
            index,
            ty: self.ty,
            attributes: self.attributes.clone(),
            children: Vec::new(),
        }
    }
}

/// Parsed content of one GML file as delivered by the dataset collaborator.
#[derive(Clone, Debug, Default)]
pub struct CityModel {
    pub gml_name: String,
    objects: HashMap<String, CityObject>,
}

impl CityModel {
    pub fn new(gml_name: impl Into<String>) -> Self {
        Self {
            gml_name: gml_name.into(),
            objects: HashMap::new(),
        }
    }

    /// Registers `object` and every nested child under their GML IDs.
    pub fn insert(&mut self, object: CityObject) {
        for child in &object.children {
            self.insert(child.clone());
        }
        self.objects.insert(object.gml_id.clone(), object);
    }

    pub fn get_city_object_by_id(&self, gml_id: &str) -> Option<&CityObject> {
        self.objects.get(gml_id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Serialized city objects stored on a `CityObjectGroup` component.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityObjectGroupData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outside_parent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outside_children: Vec<String>,
    pub city_objects: Vec<CityObject>,
    pub granularity: ConvertGranularity,
}

impl CityObjectGroupData {
    /**
     * Builds the component payload for a mesh.
     *
     * Root objects are the primaries of the mesh, with its atomic objects nested as children. At
     * atomic granularity a primary only counts if its own geometry is in `mesh`; atomic objects
     * whose primary has no geometry here become roots themselves and the primary is recorded as
     * `outside_parent`.
     */
    pub fn from_mesh(
        mesh: &Mesh,
        city_model: Option<&CityModel>,
        granularity: ConvertGranularity,
    ) -> Self {
        let list = &mesh.city_object_list;
        // Only atomic pieces can lack their primary's geometry.
        let owned: HashSet<i32> = if mesh.uv4.is_empty()
            || granularity != ConvertGranularity::PerAtomicFeatureObject
        {
            list.primaries().map(|(idx, _)| idx.primary_index).collect()
        } else {
            mesh.uv4
                .iter()
                .map(|uv| CityObjectIndex::from_uv(*uv))
                .filter(|idx| idx.is_primary())
                .map(|idx| idx.primary_index)
                .collect()
        };

        let lookup = |gml_id: &str, index: CityObjectIndex| match city_model
            .and_then(|m| m.get_city_object_by_id(gml_id))
        {
            Some(object) => object.detached(index),
            None => {
                log::debug!("city object {} not found, storing it without attributes", gml_id);
                CityObject {
                    gml_id: gml_id.to_string(),
                    index,
                    ..Default::default()
                }
            }
        };

        let mut data = Self {
            granularity,
            ..Default::default()
        };
        for (index, gml_id) in list.primaries() {
            if !owned.contains(&index.primary_index) {
                continue;
            }
            let mut root = lookup(gml_id, index);
            root.children = list
                .atomics_of(index.primary_index)
                .map(|(idx, id)| lookup(id, idx))
                .collect();
            data.city_objects.push(root);
        }
        for (index, gml_id) in list.iter() {
            if index.is_primary() || owned.contains(&index.primary_index) {
                continue;
            }
            data.city_objects.push(lookup(gml_id, index));
            if data.outside_parent.is_none() {
                data.outside_parent = list.get(index.primary_of()).map(str::to_string);
            }
        }
        data
    }

    /// Payload for a mesh-less feature node.
    pub fn from_city_object(
        gml_id: &str,
        city_model: Option<&CityModel>,
        granularity: ConvertGranularity,
    ) -> Self {
        let root = city_model
            .and_then(|m| m.get_city_object_by_id(gml_id))
            .map(|o| o.detached(CityObjectIndex::primary(0)))
            .unwrap_or_else(|| CityObject {
                gml_id: gml_id.to_string(),
                ..Default::default()
            });
        Self {
            city_objects: vec![root],
            granularity,
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn root_city_objects(&self) -> &[CityObject] {
        &self.city_objects
    }

    pub fn primary_city_object(&self) -> Option<&CityObject> {
        self.city_objects.first()
    }

    pub fn get_city_object_by_id(&self, gml_id: &str) -> Option<&CityObject> {
        self.city_objects.iter().find_map(|o| o.find(gml_id))
    }

    pub fn get_city_object_by_index(&self, index: CityObjectIndex) -> Option<&CityObject> {
        self.city_objects.iter().find_map(|o| o.find_by_index(index))
    }

    /// Every object stored on the component, roots first, then their children.
    pub fn all_city_objects(&self) -> Vec<&CityObject> {
        let mut all: Vec<&CityObject> = self.city_objects.iter().collect();
        for root in &self.city_objects {
            all.extend(root.children.iter());
        }
        all
    }

    /// Rebuilds the per-mesh index table from the stored objects.
    pub fn city_object_list(&self) -> CityObjectList {
        let mut list = CityObjectList::default();
        for object in self.all_city_objects() {
            list.insert(object.index, object.gml_id.clone());
        }
        if let Some(parent) = &self.outside_parent {
            for object in &self.city_objects {
                let primary = object.index.primary_of();
                if !object.index.is_primary() && list.get(primary).is_none() {
                    list.insert(primary, parent.clone());
                }
            }
        }
        list
    }
}

/// Identification of the feature behind a component.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CityObjectInfo {
    pub dataset_name: String,
    pub gml_name: String,
    pub id: String,
}

#[cfg(test)]
mod tests {
    use cgmath::Vector3;

    use super::*;
    use crate::data_structures::model::SubMesh;

    fn wall_only_mesh() -> Mesh {
        let mut mesh = Mesh {
            vertices: vec![Vector3::new(0.0, 0.0, 0.0); 3],
            indices: vec![0, 1, 2],
            uv4: vec![CityObjectIndex::new(0, 0).to_uv(); 3],
            sub_meshes: vec![SubMesh::new(0, 3, None)],
            ..Default::default()
        };
        mesh.city_object_list
            .insert(CityObjectIndex::primary(0), "bldg_1");
        mesh.city_object_list
            .insert(CityObjectIndex::new(0, 0), "wall_1");
        mesh
    }

    #[test]
    fn package_from_gml_file_name() {
        assert_eq!(
            Package::from_gml_file_name("53392642_bldg_6697_op.gml"),
            Package::BUILDING
        );
        assert_eq!(Package::from_gml_file_name("533926_dem_6697"), Package::RELIEF);
        assert_eq!(Package::from_gml_file_name("nonsense"), Package::UNKNOWN);
    }

    #[test]
    fn atomic_only_mesh_records_outside_parent() {
        let mut city_model = CityModel::new("53392642_bldg_6697_op.gml");
        city_model.insert(
            CityObject::new("bldg_1", CityObjectType::BUILDING).with_children(vec![
                CityObject::new("wall_1", CityObjectType::WALL_SURFACE),
            ]),
        );

        let data = CityObjectGroupData::from_mesh(
            &wall_only_mesh(),
            Some(&city_model),
            ConvertGranularity::PerAtomicFeatureObject,
        );

        assert_eq!(data.outside_parent.as_deref(), Some("bldg_1"));
        assert_eq!(data.city_objects.len(), 1);
        assert_eq!(data.city_objects[0].ty, CityObjectType::WALL_SURFACE);
        assert_eq!(
            data.city_object_list().get(CityObjectIndex::primary(0)),
            Some("bldg_1")
        );
    }

    #[test]
    fn nested_attribute_lookup_and_json() {
        let mut details = Attributes::new();
        details.insert("height".into(), AttributeValue::Measure(12.5));
        let object = CityObject::new("bldg_1", CityObjectType::BUILDING)
            .with_attribute("usage", AttributeValue::String("office".into()))
            .with_attribute("details", AttributeValue::AttributeSet(details));

        assert_eq!(
            object.attribute("details/height").and_then(|v| v.as_string()),
            Some("12.5".to_string())
        );
        assert!(object.attribute("details/missing").is_none());

        let data = CityObjectGroupData {
            city_objects: vec![object],
            ..Default::default()
        };
        let json = data.to_json().unwrap();
        assert_eq!(CityObjectGroupData::from_json(&json).unwrap(), data);
    }
}
