use serde::{Deserialize, Serialize};

/// How many source features end up in one renderable unit after conversion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConvertGranularity {
    /// One node per atomic feature (wall, roof, ...), nested below its primary.
    PerAtomicFeatureObject,
    /// One node per primary feature (one building).
    #[default]
    PerPrimaryFeatureObject,
    /// Everything under a container merged into a single node.
    PerCityModelArea,
    /// One node per primary feature with one sub-mesh per distinct material.
    MaterialInPrimary,
}

impl ConvertGranularity {
    /// Pass order used when the granularity of the targets is kept.
    pub const ALL: [ConvertGranularity; 4] = [
        ConvertGranularity::PerAtomicFeatureObject,
        ConvertGranularity::PerPrimaryFeatureObject,
        ConvertGranularity::PerCityModelArea,
        ConvertGranularity::MaterialInPrimary,
    ];
}

/// Granularity requested by a reconstruct or classify call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MeshGranularity {
    /// Keep each target's current granularity, running one pass per granularity present.
    #[default]
    DoNotChange,
    PerAtomicFeatureObject,
    PerPrimaryFeatureObject,
    PerCityModelArea,
    MaterialInPrimary,
}

impl MeshGranularity {
    pub fn to_convert_granularity(self) -> Option<ConvertGranularity> {
        match self {
            Self::DoNotChange => None,
            Self::PerAtomicFeatureObject => Some(ConvertGranularity::PerAtomicFeatureObject),
            Self::PerPrimaryFeatureObject => Some(ConvertGranularity::PerPrimaryFeatureObject),
            Self::PerCityModelArea => Some(ConvertGranularity::PerCityModelArea),
            Self::MaterialInPrimary => Some(ConvertGranularity::MaterialInPrimary),
        }
    }
}

impl From<ConvertGranularity> for MeshGranularity {
    fn from(value: ConvertGranularity) -> Self {
        match value {
            ConvertGranularity::PerAtomicFeatureObject => Self::PerAtomicFeatureObject,
            ConvertGranularity::PerPrimaryFeatureObject => Self::PerPrimaryFeatureObject,
            ConvertGranularity::PerCityModelArea => Self::PerCityModelArea,
            ConvertGranularity::MaterialInPrimary => Self::MaterialInPrimary,
        }
    }
}
