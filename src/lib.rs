//! # Bone-mesh library
//!
//! This crate reconstructs a printable surface mesh from a stack of 2D
//! cross-section images, such as the slices of a CT series.
//!
//! The reconstruction runs in stages, each a plain transformation of the
//! previous stage's output:
//!  - Binarization: every grayscale slice becomes a clean 0/255 mask
//!    (Otsu threshold with a bias, speck removal, contour filling)
//!  - Assembly: the masks are stacked by slice number into a [`Volume`],
//!    optionally downsampled
//!  - Repair: 3D closing bridges gaps between slices, enclosed cavities are
//!    filled
//!  - Extraction: marching cubes turns the volume into a closed triangle
//!    [`Mesh`]
//!  - Output: the mesh is saved as binary or ASCII STL together with a
//!    static preview image
//!
//! Slices can be produced from a DICOM series with [`DicomExporter`].
//! Binarization runs in parallel using rayon. Every stage takes an explicit
//! configuration; [`PipelineConfig`] bundles them and can be loaded from JSON.
//!
//! # Examples
//!
//! ## Reconstructing a mesh from a directory of slices
//!
//! Binarize every slice in `slices/` into `masks/`, then write the STL and a
//! preview of the reconstructed surface.
//!
//! ```no_run
//! # use bone_mesh::{Pipeline, PipelineConfig};
//! # use std::path::Path;
//! let pipeline = Pipeline::new(PipelineConfig::default())
//!     .expect("default config should be valid");
//! let report = pipeline
//!     .run("slices", "masks", "bone_model.stl", Some(Path::new("bone_model.png")))
//!     .expect("should have reconstructed the slices");
//! println!("{} faces", report.face_count);
//! ```

pub mod config;
pub mod dicom_export;
pub mod enums;
pub mod error;
mod interpolator;
pub mod mesh;
pub mod mesh_writer;
pub mod morphology;
pub mod pipeline;
pub mod preview;
pub mod slice_binarizer;
pub mod surface_extractor;
mod tables;
pub mod topology_repairer;
pub mod volume;
pub mod volume_assembler;

pub use config::{PhysicalSpacing, PipelineConfig};
pub use dicom_export::{DicomExportError, DicomExporter, ExportSummary};
pub use error::{ReconstructionError, Result};
pub use mesh::Mesh;
pub use mesh_writer::MeshWriter;
pub use pipeline::{MeshOutcome, Pipeline, ReconstructionReport};
pub use slice_binarizer::SliceBinarizer;
pub use surface_extractor::SurfaceExtractor;
pub use topology_repairer::TopologyRepairer;
pub use volume::Volume;
pub use volume_assembler::{IndexedMask, VolumeAssembler};
