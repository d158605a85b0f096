use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// How skins that share joints are mapped onto armatures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SkinSharing {
    /// Skins with overlapping joint sets share one armature.
    #[default]
    Merge,
    /// Every skin gets its own armature; shared joints are duplicated.
    PerSkin,
}

/// Import options shared by the CLI and library callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImportOptions {
    /// Wrap the whole import in a named empty object.
    pub add_root: bool,
    /// Name of the wrapper object; the document name is used when `None`.
    pub root_name: Option<String>,
    /// Smallest bone length handed to the host.
    pub min_bone_length: f32,
    /// Length of a joint with no child joints and no joint parent.
    pub default_bone_length: f32,
    /// Tolerance when deciding whether a joint scale is uniform.
    pub uniform_scale_epsilon: f32,
    pub skin_sharing: SkinSharing,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            add_root: false,
            root_name: None,
            min_bone_length: 0.001,
            default_bone_length: 1.0,
            uniform_scale_epsilon: 1e-4,
            skin_sharing: SkinSharing::Merge,
        }
    }
}

impl ImportOptions {
    /// Reject values the builder cannot work with.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(self.min_bone_length > 0.0) {
            return Err(format!(
                "min_bone_length must be positive, got {}",
                self.min_bone_length
            ));
        }
        if !(self.default_bone_length > 0.0) {
            return Err(format!(
                "default_bone_length must be positive, got {}",
                self.default_bone_length
            ));
        }
        if !(self.uniform_scale_epsilon >= 0.0) {
            return Err(format!(
                "uniform_scale_epsilon must not be negative, got {}",
                self.uniform_scale_epsilon
            ));
        }
        Ok(())
    }
}

pub fn save_import_options(path: &Path, options: &ImportOptions) -> Result<()> {
    let content =
        serde_json::to_string_pretty(options).context("failed to serialize import options")?;
    fs::write(path, content)
        .with_context(|| format!("failed to write import options: {}", path.display()))?;
    Ok(())
}

pub fn load_import_options(path: &Path) -> Result<ImportOptions> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read import options: {}", path.display()))?;
    let options: ImportOptions =
        serde_json::from_str(&content).context("failed to parse import options JSON")?;
    if let Err(reason) = options.validate() {
        bail!("invalid import options in {}: {}", path.display(), reason);
    }
    Ok(options)
}
