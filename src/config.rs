//! Pipeline configuration.
//!
//! Every tuning constant of the reconstruction lives here instead of in the
//! stages themselves. Each section deserializes with `#[serde(default)]`, so a
//! JSON file only needs to name the values it changes.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    enums::{Connectivity, StlFormat},
    error::{ReconstructionError, Result},
};

/// Physical size of one voxel along each axis, in millimetres.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysicalSpacing {
    /// Column direction.
    pub x: f32,
    /// Row direction.
    pub y: f32,
    /// Slice direction.
    pub z: f32,
}

impl PhysicalSpacing {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn uniform(size: f32) -> Self {
        Self::new(size, size, size)
    }

    fn is_valid(&self) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }
}

impl Default for PhysicalSpacing {
    fn default() -> Self {
        Self::uniform(4.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinarizeConfig {
    /// Added to the Otsu threshold before thresholding.
    pub threshold_offset: u8,
    /// Foreground components smaller than this many pixels are dropped.
    pub min_component_area: usize,
    /// Iterations of the 3x3 dilation, and of the matching erosion.
    pub gap_close_iterations: usize,
}

impl Default for BinarizeConfig {
    fn default() -> Self {
        Self {
            threshold_offset: 59,
            min_component_area: 70,
            gap_close_iterations: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssembleConfig {
    /// Nearest-neighbour downsampling ratio in `(0, 1]`.
    pub resize_ratio: f32,
    pub spacing: PhysicalSpacing,
}

impl Default for AssembleConfig {
    fn default() -> Self {
        Self {
            resize_ratio: 0.9,
            spacing: PhysicalSpacing::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub close_iterations: usize,
    pub connectivity: Connectivity,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            close_iterations: 2,
            connectivity: Connectivity::Full,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub level: f32,
    /// Marching-cubes stride in voxels; 1 gives the finest mesh.
    pub step_size: usize,
    /// Surround the volume with background so the surface is capped at the border.
    pub closed_boundary: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            level: 0.5,
            step_size: 1,
            closed_boundary: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub width: u32,
    pub height: u32,
    pub elevation_deg: f32,
    pub azimuth_deg: f32,
    /// Face colour as linear RGB in `[0, 1]`.
    pub face_color: [f32; 3],
    pub alpha: f32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            width: 600,
            height: 600,
            elevation_deg: 30.0,
            azimuth_deg: -60.0,
            face_color: [0.7, 0.7, 0.8],
            alpha: 0.6,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub stl_format: StlFormat,
    /// Name stored in the STL header.
    pub solid_name: String,
    pub preview: PreviewConfig,
    /// Write the repaired axial slices next to the STL for inspection.
    pub dump_repaired_slices: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            stl_format: StlFormat::Binary,
            solid_name: "bone_model".to_string(),
            preview: PreviewConfig::default(),
            dump_repaired_slices: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub binarize: BinarizeConfig,
    pub assemble: AssembleConfig,
    pub repair: RepairConfig,
    pub extract: ExtractConfig,
    pub output: OutputConfig,
}

impl PipelineConfig {
    /// Read a JSON config file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            ReconstructionError::InvalidConfig(format!("{}: {e}", path.display()))
        })
    }

    pub fn validate(&self) -> Result<()> {
        let ratio = self.assemble.resize_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ReconstructionError::InvalidConfig(format!(
                "resize ratio must be in (0, 1], got {ratio}"
            )));
        }
        if !self.assemble.spacing.is_valid() {
            return Err(ReconstructionError::InvalidConfig(format!(
                "voxel spacing must be positive, got {:?}",
                self.assemble.spacing
            )));
        }
        if self.extract.step_size == 0 {
            return Err(ReconstructionError::InvalidConfig(
                "marching step size must be at least 1".to_string(),
            ));
        }
        let level = self.extract.level;
        if !(level > 0.0 && level < 1.0) {
            return Err(ReconstructionError::InvalidConfig(format!(
                "iso level must be strictly between 0 and 1, got {level}"
            )));
        }
        let preview = &self.output.preview;
        if preview.width == 0 || preview.height == 0 {
            return Err(ReconstructionError::InvalidConfig(
                "preview size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default()
            .validate()
            .expect("default config should validate");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{ "binarize": { "threshold_offset": 40 }, "assemble": { "resize_ratio": 1.0 } }"#;
        let config: PipelineConfig = serde_json::from_str(json).expect("should parse");
        assert_eq!(config.binarize.threshold_offset, 40);
        assert_eq!(config.binarize.min_component_area, 70);
        assert_eq!(config.assemble.resize_ratio, 1.0);
        assert_eq!(config.assemble.spacing, PhysicalSpacing::uniform(4.0));
        assert_eq!(config.repair.close_iterations, 2);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = PipelineConfig::default();
        config.assemble.resize_ratio = 0.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.assemble.resize_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.extract.step_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.assemble.spacing = PhysicalSpacing::new(1.0, -1.0, 1.0);
        assert!(config.validate().is_err());
    }
}
