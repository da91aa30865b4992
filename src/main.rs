//! Command-line front end for the bone-mesh reconstruction pipeline.
//!
//! # Commands
//!
//! - `bone-mesh dicom <INPUT> <OUTPUT>` - Convert a DICOM series into PNG slices
//! - `bone-mesh binarize <INPUT> <OUTPUT>` - Binarize a directory of slices
//! - `bone-mesh reconstruct <MASKS>` - Build the STL and preview from masks
//! - `bone-mesh run <SLICES> <MASKS>` - Binarize, then reconstruct
//! - `bone-mesh inspect <STL>` - Print mesh statistics
//! - `bone-mesh print-config` - Print the effective configuration as JSON

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use bone_mesh::{
    DicomExporter, MeshOutcome, Pipeline, PipelineConfig, ReconstructionReport,
    enums::{Connectivity, SortBy, StlFormat},
    mesh_writer::read_stl,
};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Reconstruct a printable surface mesh from medical cross-section images
#[derive(Parser)]
#[command(name = "bone-mesh")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON pipeline configuration; flags override its values
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a DICOM series into numbered PNG slices
    Dicom {
        input: PathBuf,
        output: PathBuf,

        /// Key used to order the slices
        #[arg(long, value_enum, default_value_t = SortBy::ImagePositionPatient)]
        sort_by: SortBy,
    },

    /// Binarize every slice image in a directory
    Binarize {
        input: PathBuf,
        output: PathBuf,

        #[command(flatten)]
        binarize: BinarizeArgs,
    },

    /// Reconstruct the STL and preview from a directory of masks
    Reconstruct {
        masks: PathBuf,

        #[command(flatten)]
        reconstruct: ReconstructArgs,
    },

    /// Binarize a directory of slices, then reconstruct from the masks
    Run {
        slices: PathBuf,
        masks: PathBuf,

        #[command(flatten)]
        binarize: BinarizeArgs,

        #[command(flatten)]
        reconstruct: ReconstructArgs,
    },

    /// Print face and vertex counts, bounds and closedness of an STL file
    Inspect {
        #[arg(name = "STL")]
        stl: PathBuf,
    },

    /// Print the effective configuration as JSON
    PrintConfig,
}

#[derive(Args)]
struct BinarizeArgs {
    /// Added to the Otsu threshold of each slice
    #[arg(long)]
    threshold_offset: Option<u8>,

    /// Foreground components smaller than this many pixels are dropped
    #[arg(long)]
    min_area: Option<usize>,
}

#[derive(Args)]
struct ReconstructArgs {
    /// Output STL path
    #[arg(long, default_value = "bone_model.stl")]
    stl: PathBuf,

    /// Output preview path
    #[arg(long, default_value = "bone_model.png")]
    preview: PathBuf,

    /// Skip the preview image
    #[arg(long)]
    no_preview: bool,

    /// Edge length of a voxel in millimetres, applied to all axes
    #[arg(long)]
    voxel_size: Option<f32>,

    /// Downsampling ratio for each mask, in (0, 1]
    #[arg(long)]
    resize_ratio: Option<f32>,

    /// Marching cubes step in voxels
    #[arg(long)]
    step: Option<usize>,

    #[arg(long, value_enum)]
    connectivity: Option<Connectivity>,

    #[arg(long, value_enum)]
    format: Option<StlFormat>,

    /// Write the repaired axial slices next to the STL
    #[arg(long)]
    dump_slices: bool,
}

impl BinarizeArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(offset) = self.threshold_offset {
            config.binarize.threshold_offset = offset;
        }
        if let Some(area) = self.min_area {
            config.binarize.min_component_area = area;
        }
    }
}

impl ReconstructArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(size) = self.voxel_size {
            config.assemble.spacing = bone_mesh::PhysicalSpacing::uniform(size);
        }
        if let Some(ratio) = self.resize_ratio {
            config.assemble.resize_ratio = ratio;
        }
        if let Some(step) = self.step {
            config.extract.step_size = step;
        }
        if let Some(connectivity) = self.connectivity {
            config.repair.connectivity = connectivity;
        }
        if let Some(format) = self.format {
            config.output.stl_format = format;
        }
        if self.dump_slices {
            config.output.dump_repaired_slices = true;
        }
    }

    fn preview_path(&self) -> Option<&Path> {
        (!self.no_preview).then_some(self.preview.as_path())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match &cli.command {
        Commands::Dicom {
            input,
            output,
            sort_by,
        } => {
            let summary = DicomExporter::export_directory(input, output, *sort_by)
                .with_context(|| format!("failed to export DICOM series {}", input.display()))?;
            info!(
                written = summary.written.len(),
                skipped = summary.skipped.len(),
                output = %output.display(),
                "exported slices"
            );
        }
        Commands::Binarize {
            input,
            output,
            binarize,
        } => {
            binarize.apply(&mut config);
            let pipeline = Pipeline::new(config)?;
            let summary = pipeline
                .binarize_slices(input, output)
                .with_context(|| format!("failed to binarize {}", input.display()))?;
            info!(
                processed = summary.processed.len(),
                skipped = summary.skipped.len(),
                "binarized slices"
            );
        }
        Commands::Reconstruct { masks, reconstruct } => {
            reconstruct.apply(&mut config);
            let pipeline = Pipeline::new(config)?;
            let report = pipeline
                .reconstruct_directory(masks, &reconstruct.stl, reconstruct.preview_path())
                .with_context(|| format!("failed to reconstruct {}", masks.display()))?;
            print_report(&report);
        }
        Commands::Run {
            slices,
            masks,
            binarize,
            reconstruct,
        } => {
            binarize.apply(&mut config);
            reconstruct.apply(&mut config);
            let pipeline = Pipeline::new(config)?;
            let report = pipeline
                .run(slices, masks, &reconstruct.stl, reconstruct.preview_path())
                .with_context(|| format!("failed to reconstruct {}", slices.display()))?;
            print_report(&report);
        }
        Commands::Inspect { stl } => inspect(stl)?,
        Commands::PrintConfig => {
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn print_report(report: &ReconstructionReport) {
    let (depth, height, width) = report.volume_shape;
    println!("Volume: {depth} x {height} x {width} voxels");
    println!(
        "Foreground: {} -> {} voxels ({} added by repair)",
        report.repair.foreground_before,
        report.repair.foreground_after_filling,
        report.repair.voxels_added()
    );
    println!(
        "Mesh: {} vertices, {} faces",
        report.vertex_count, report.face_count
    );
    match &report.outcome {
        MeshOutcome::Written { stl, preview } => {
            println!("STL: {}", stl.display());
            if let Some(preview) = preview {
                println!("Preview: {}", preview.display());
            }
        }
        MeshOutcome::Degenerate => println!("No surface found; nothing written"),
    }
}

fn inspect(path: &Path) -> Result<()> {
    let mesh = read_stl(path).with_context(|| format!("failed to read {}", path.display()))?;
    let Some(bounds) = mesh.bounding_box() else {
        bail!("{} contains no triangles", path.display());
    };
    println!("File: {}", path.display());
    println!("Vertices: {}", mesh.vertex_count());
    println!("Faces: {}", mesh.face_count());
    println!("Bounds min: {:?}", bounds.min);
    println!("Bounds max: {:?}", bounds.max);
    println!("Size: {:?}", bounds.size());
    println!("Open edges: {}", mesh.open_edge_count());
    println!("Closed: {}", mesh.is_closed());
    println!("Surface area: {:.3}", mesh.surface_area());
    println!("Signed volume: {:.3}", mesh.signed_volume());
    Ok(())
}
