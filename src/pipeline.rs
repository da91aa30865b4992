//! Stage driver: slices → masks → volume → repaired volume → mesh → files.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use image::GrayImage;
use rayon::prelude::*;
use tracing::{info, info_span, warn};
use web_time::Instant;

use crate::{
    config::PipelineConfig,
    enums::Orientation,
    error::{ReconstructionError, Result},
    mesh::Mesh,
    mesh_writer::MeshWriter,
    slice_binarizer::{BatchSummary, SliceBinarizer},
    surface_extractor::SurfaceExtractor,
    topology_repairer::{RepairReport, TopologyRepairer},
    volume::Volume,
    volume_assembler::{IndexedMask, VolumeAssembler},
};

/// What happened to the extracted mesh.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshOutcome {
    Written {
        stl: PathBuf,
        preview: Option<PathBuf>,
    },
    /// Extraction produced no faces; nothing was written.
    Degenerate,
}

/// Wall-clock time spent in each stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub binarize: Option<Duration>,
    pub assemble: Duration,
    pub repair: Duration,
    pub extract: Duration,
    pub write: Duration,
}

#[derive(Debug, Clone)]
pub struct ReconstructionReport {
    /// Present when the run started from grayscale slices.
    pub binarize: Option<BatchSummary>,
    pub slice_count: usize,
    /// `(depth, height, width)` after downsampling.
    pub volume_shape: (usize, usize, usize),
    pub repair: RepairReport,
    pub vertex_count: usize,
    pub face_count: usize,
    pub timings: StageTimings,
    pub outcome: MeshOutcome,
}

/// Volume and mesh produced by the in-memory stages.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub volume: Volume,
    pub repair: RepairReport,
    pub mesh: Mesh,
    pub timings: StageTimings,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// # Errors
    ///
    /// Returns error if the configuration does not validate
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Binarize every slice image in `slice_dir` into `mask_dir`.
    pub fn binarize_slices(
        &self,
        slice_dir: impl AsRef<Path>,
        mask_dir: impl AsRef<Path>,
    ) -> Result<BatchSummary> {
        let _span = info_span!("binarize").entered();
        SliceBinarizer::new(self.config.binarize.clone()).binarize_directory(slice_dir, mask_dir)
    }

    /// Assemble, repair and extract from masks already in memory.
    pub fn reconstruct_from_masks(&self, masks: Vec<IndexedMask>) -> Result<Reconstruction> {
        let start = Instant::now();
        let volume = {
            let _span = info_span!("assemble").entered();
            VolumeAssembler::assemble(masks, &self.config.assemble)?
        };
        let assemble = start.elapsed();
        Ok(self.reconstruct_volume(volume, assemble))
    }

    /// Binarize grayscale slices in memory and reconstruct the mesh.
    ///
    /// Slices are `(index, image)` pairs in any order.
    pub fn mesh_from_slices(&self, slices: Vec<(i64, GrayImage)>) -> Result<Reconstruction> {
        let start = Instant::now();
        let binarizer = SliceBinarizer::new(self.config.binarize.clone());
        let masks: Vec<IndexedMask> = {
            let _span = info_span!("binarize").entered();
            slices
                .par_iter()
                .map(|(index, slice)| IndexedMask::new(*index, binarizer.binarize(slice)))
                .collect()
        };
        let binarize = start.elapsed();

        let mut reconstruction = self.reconstruct_from_masks(masks)?;
        reconstruction.timings.binarize = Some(binarize);
        Ok(reconstruction)
    }

    /// Reconstruct from the mask directory and write the STL and preview.
    ///
    /// A degenerate mesh is logged and reported; no files are written for it.
    pub fn reconstruct_directory(
        &self,
        mask_dir: impl AsRef<Path>,
        stl_path: impl AsRef<Path>,
        preview_path: Option<&Path>,
    ) -> Result<ReconstructionReport> {
        let start = Instant::now();
        let volume = {
            let _span = info_span!("assemble").entered();
            VolumeAssembler::load_from_directory(mask_dir, &self.config.assemble)?
        };
        let assemble = start.elapsed();

        let reconstruction = self.reconstruct_volume(volume, assemble);
        self.write_outputs(reconstruction, stl_path.as_ref(), preview_path)
    }

    /// Binarize `slice_dir` into `mask_dir`, then reconstruct from the masks.
    pub fn run(
        &self,
        slice_dir: impl AsRef<Path>,
        mask_dir: impl AsRef<Path>,
        stl_path: impl AsRef<Path>,
        preview_path: Option<&Path>,
    ) -> Result<ReconstructionReport> {
        let mask_dir = mask_dir.as_ref();
        let start = Instant::now();
        let summary = self.binarize_slices(slice_dir, mask_dir)?;
        let binarize = start.elapsed();
        info!(
            processed = summary.processed.len(),
            skipped = summary.skipped.len(),
            elapsed_ms = binarize.as_millis() as u64,
            "binarization finished"
        );

        let mut report = self.reconstruct_directory(mask_dir, stl_path, preview_path)?;
        report.timings.binarize = Some(binarize);
        report.binarize = Some(summary);
        Ok(report)
    }

    fn reconstruct_volume(&self, mut volume: Volume, assemble: Duration) -> Reconstruction {
        let start = Instant::now();
        let repair = {
            let _span = info_span!("repair").entered();
            TopologyRepairer::new(self.config.repair.clone()).repair(&mut volume)
        };
        let repair_time = start.elapsed();

        let start = Instant::now();
        let mesh = {
            let _span = info_span!("extract").entered();
            SurfaceExtractor::new(self.config.extract.clone()).extract(&volume)
        };
        let extract = start.elapsed();

        info!(
            assemble_ms = assemble.as_millis() as u64,
            repair_ms = repair_time.as_millis() as u64,
            extract_ms = extract.as_millis() as u64,
            "volume stages finished"
        );

        Reconstruction {
            volume,
            repair,
            mesh,
            timings: StageTimings {
                binarize: None,
                assemble,
                repair: repair_time,
                extract,
                write: Duration::ZERO,
            },
        }
    }

    fn write_outputs(
        &self,
        reconstruction: Reconstruction,
        stl_path: &Path,
        preview_path: Option<&Path>,
    ) -> Result<ReconstructionReport> {
        let Reconstruction {
            volume,
            repair,
            mesh,
            mut timings,
        } = reconstruction;
        let _span = info_span!("write").entered();
        let start = Instant::now();

        if self.config.output.dump_repaired_slices {
            dump_axial_slices(&volume, &repaired_slice_dir(stl_path))?;
        }

        let outcome = if mesh.is_empty() {
            warn!("surface extraction produced no faces, skipping STL and preview");
            MeshOutcome::Degenerate
        } else {
            let writer = MeshWriter::from_config(&self.config.output);
            writer.write_stl(&mesh, stl_path)?;
            if let Some(preview) = preview_path {
                writer.write_preview(&mesh, &self.config.output.preview, preview)?;
            }
            MeshOutcome::Written {
                stl: stl_path.to_path_buf(),
                preview: preview_path.map(Path::to_path_buf),
            }
        };
        timings.write = start.elapsed();

        Ok(ReconstructionReport {
            binarize: None,
            slice_count: volume.dim().0,
            volume_shape: volume.dim(),
            repair,
            vertex_count: mesh.vertex_count(),
            face_count: mesh.face_count(),
            timings,
            outcome,
        })
    }
}

/// `model.stl` → `model_slices/`
fn repaired_slice_dir(stl_path: &Path) -> PathBuf {
    let stem = stl_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mesh".to_string());
    stl_path.with_file_name(format!("{stem}_slices"))
}

fn dump_axial_slices(volume: &Volume, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    for index in 0..volume.dim().0 {
        let image = volume
            .slice_image(index, Orientation::Axial)
            .ok_or_else(|| ReconstructionError::InvalidConfig(format!("no axial slice {index}")))?;
        image.save(dir.join(format!("{index:04}.png")))?;
    }
    info!(slices = volume.dim().0, dir = %dir.display(), "dumped repaired slices");
    Ok(())
}
