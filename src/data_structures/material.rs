use std::path::Path;

/// Slot name used for untextured sub-meshes.
pub const DEFAULT_MATERIAL_NAME: &str = "DefaultMaterial";

/// Parent material for untextured sub-meshes.
pub const DEFAULT_NO_TEXTURE_BASE: &str = "DefaultMaterial_No_Texture";

/// Parent material for textured sub-meshes.
pub const DEFAULT_TEXTURED_BASE: &str = "DefaultMaterial_Textured";

/// An engine material reference.
///
/// `base` names the parent material asset the instance derives from; `texture_path` is bound as
/// its diffuse texture when present.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Material {
    pub name: String,
    pub base: String,
    pub texture_path: Option<String>,
}

impl Material {
    /// A user supplied material asset, e.g. the target of a classification mapping.
    pub fn asset(path: impl Into<String>) -> Self {
        let base: String = path.into();
        Self {
            name: base_file_name(&base).unwrap_or_else(|| base.clone()),
            base,
            texture_path: None,
        }
    }

    /// Material created for a sub-mesh that carries no classification override.
    pub fn default_for_texture(texture_path: Option<&str>) -> Self {
        match texture_path {
            Some(path) => Self {
                name: slot_name(Some(path)),
                base: DEFAULT_TEXTURED_BASE.to_string(),
                texture_path: Some(path.to_string()),
            },
            None => Self {
                name: DEFAULT_MATERIAL_NAME.to_string(),
                base: DEFAULT_NO_TEXTURE_BASE.to_string(),
                texture_path: None,
            },
        }
    }

    pub fn is_default(&self) -> bool {
        self.base == DEFAULT_TEXTURED_BASE || self.base == DEFAULT_NO_TEXTURE_BASE
    }
}

/// Material slot name for a sub-mesh: the texture's base file name or the default name.
pub fn slot_name(texture_path: Option<&str>) -> String {
    texture_path
        .and_then(base_file_name)
        .unwrap_or_else(|| DEFAULT_MATERIAL_NAME.to_string())
}

fn base_file_name(path: &str) -> Option<String> {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
