//! Marching-cubes isosurface extraction over a voxel volume.

use std::collections::HashMap;

use ndarray::{Array3, s};
use tracing::{debug, info};

use crate::{
    config::{ExtractConfig, PhysicalSpacing},
    mesh::Mesh,
    tables::{EDGE_TABLE, TRI_TABLE},
    volume::Volume,
};

/// Cube corners as `(x, y, z)` offsets.
const CORNER_OFFSETS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

const EDGE_ENDPOINTS: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [4, 5],
    [5, 6],
    [6, 7],
    [7, 4],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

/// Grid edge identified by its lower endpoint `(x, y, z)` and axis.
type EdgeKey = (usize, usize, usize, u8);

#[derive(Debug, Clone, Default)]
pub struct SurfaceExtractor {
    config: ExtractConfig,
}

impl SurfaceExtractor {
    pub fn new(config: ExtractConfig) -> Self {
        Self { config }
    }

    /// Extract the isosurface of `volume` at the configured level.
    ///
    /// Vertex coordinates are `(column, row, slice)` scaled by the volume's
    /// spacing. An all-background volume gives an empty mesh.
    pub fn extract(&self, volume: &Volume) -> Mesh {
        let step = self.config.step_size.max(1);
        let (field, pad) = if self.config.closed_boundary {
            (padded_field(volume.data(), step), step as f32)
        } else {
            (volume.data().mapv(f32::from), 0.0)
        };
        debug!(shape = ?field.dim(), step, "marching cubes field");

        let mesh = marching_cubes(&field, self.config.level, step, volume.spacing, [-pad; 3]);
        info!(
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            "extracted surface"
        );
        mesh
    }
}

/// Copy `data` into a background-filled field with `step` layers of padding
/// on both sides of each axis.
///
/// Cells start at padded index 0, so data index 0 is the second sample along
/// each axis and the outermost sampled layers are empty.
fn padded_field(data: &Array3<u8>, step: usize) -> Array3<f32> {
    let (depth, height, width) = data.dim();
    let pad = 2 * step;
    let mut field = Array3::<f32>::zeros((depth + pad, height + pad, width + pad));
    field
        .slice_mut(s![step..depth + step, step..height + step, step..width + step])
        .assign(&data.mapv(f32::from));
    field
}

/// Run marching cubes over `field`, indexed `[z, y, x]`.
///
/// Corners with a value above `level` are inside. Cells span `step` samples
/// along each axis. Grid position `g` maps to `(g + origin) * spacing`.
pub fn marching_cubes(
    field: &Array3<f32>,
    level: f32,
    step: usize,
    spacing: PhysicalSpacing,
    origin: [f32; 3],
) -> Mesh {
    let (nz, ny, nx) = field.dim();
    let step = step.max(1);
    let scale = [spacing.x, spacing.y, spacing.z];

    let mut vertices = Vec::<[f32; 3]>::new();
    let mut faces = Vec::<[u32; 3]>::new();
    let mut vertex_cache = HashMap::<EdgeKey, u32>::new();
    let mut corner_values = [0.0f32; 8];
    let mut corner_grid = [[0usize; 3]; 8];

    for z in (0..nz.saturating_sub(step)).step_by(step) {
        for y in (0..ny.saturating_sub(step)).step_by(step) {
            for x in (0..nx.saturating_sub(step)).step_by(step) {
                let mut case_index = 0usize;
                for (corner_id, offset) in CORNER_OFFSETS.iter().enumerate() {
                    let g = [x + offset[0] * step, y + offset[1] * step, z + offset[2] * step];
                    let value = field[[g[2], g[1], g[0]]];
                    corner_values[corner_id] = value;
                    corner_grid[corner_id] = g;
                    if value > level {
                        case_index |= 1 << corner_id;
                    }
                }

                if EDGE_TABLE[case_index] == 0 {
                    continue;
                }

                let row = &TRI_TABLE[case_index];
                for triangle in row.chunks_exact(3).take_while(|t| t[0] >= 0) {
                    let mut face = [0u32; 3];
                    for (slot, &edge_id) in face.iter_mut().zip(triangle) {
                        let [a, b] = EDGE_ENDPOINTS[edge_id as usize];
                        let key = edge_key(corner_grid[a], corner_grid[b]);
                        *slot = *vertex_cache.entry(key).or_insert_with(|| {
                            let point = interpolate_edge(
                                corner_grid[a],
                                corner_grid[b],
                                corner_values[a],
                                corner_values[b],
                                level,
                            );
                            vertices.push([
                                (point[0] + origin[0]) * scale[0],
                                (point[1] + origin[1]) * scale[1],
                                (point[2] + origin[2]) * scale[2],
                            ]);
                            (vertices.len() - 1) as u32
                        });
                    }
                    faces.push(face);
                }
            }
        }
    }

    Mesh::from_parts(vertices, faces)
}

#[inline]
fn edge_key(a: [usize; 3], b: [usize; 3]) -> EdgeKey {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let axis = (0..3).find(|&i| lo[i] != hi[i]).unwrap_or(0) as u8;
    (lo[0], lo[1], lo[2], axis)
}

#[inline]
fn interpolate_edge(p1: [usize; 3], p2: [usize; 3], v1: f32, v2: f32, level: f32) -> [f32; 3] {
    let dv = v2 - v1;
    let t = if dv.abs() <= f32::EPSILON {
        0.5
    } else {
        (level - v1) / dv
    };
    [
        p1[0] as f32 + t * (p2[0] as f32 - p1[0] as f32),
        p1[1] as f32 + t * (p2[1] as f32 - p1[1] as f32),
        p1[2] as f32 + t * (p2[2] as f32 - p1[2] as f32),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use approx::assert_relative_eq;
    use ndarray::Array3;

    use super::*;

    fn extractor(closed_boundary: bool, step_size: usize) -> SurfaceExtractor {
        SurfaceExtractor::new(ExtractConfig {
            level: 0.5,
            step_size,
            closed_boundary,
        })
    }

    fn volume(data: Array3<u8>) -> Volume {
        Volume::new(data, PhysicalSpacing::uniform(1.0))
    }

    fn ball(size: usize, radius: f32) -> Array3<u8> {
        let c = (size as f32 - 1.0) / 2.0;
        Array3::from_shape_fn((size, size, size), |(z, y, x)| {
            let d2 = (x as f32 - c).powi(2) + (y as f32 - c).powi(2) + (z as f32 - c).powi(2);
            u8::from(d2 <= radius * radius)
        })
    }

    #[test]
    fn all_background_gives_empty_mesh() {
        let data = Array3::<u8>::zeros((6, 6, 6));
        assert!(extractor(true, 1).extract(&volume(data.clone())).is_empty());
        assert!(extractor(false, 1).extract(&volume(data)).is_empty());
    }

    #[test]
    fn all_foreground_without_capping_gives_empty_mesh() {
        let data = Array3::<u8>::ones((4, 4, 4));
        assert!(extractor(false, 1).extract(&volume(data)).is_empty());
    }

    #[test]
    fn all_foreground_with_capping_is_closed_box() {
        let data = Array3::<u8>::ones((4, 4, 4));
        let mesh = extractor(true, 1).extract(&volume(data));
        assert!(mesh.is_closed());
        let bounds = mesh.bounding_box().expect("bounds");
        assert_eq!(bounds.min, [-0.5, -0.5, -0.5]);
        assert_eq!(bounds.max, [3.5, 3.5, 3.5]);
    }

    #[test]
    fn single_voxel_gives_closed_octahedron() {
        let mut data = Array3::<u8>::zeros((3, 3, 3));
        data[[1, 1, 1]] = 1;
        let mesh = extractor(false, 1).extract(&volume(data));
        assert_eq!(mesh.face_count(), 8);
        assert_eq!(mesh.vertex_count(), 6);
        assert!(mesh.is_closed());
        assert!(mesh.signed_volume() > 0.0);

        let bounds = mesh.bounding_box().expect("bounds");
        assert_eq!(bounds.min, [0.5, 0.5, 0.5]);
        assert_eq!(bounds.max, [1.5, 1.5, 1.5]);
    }

    #[test]
    fn single_voxel_volume_is_capped() {
        let data = Array3::<u8>::ones((1, 1, 1));
        let mesh = SurfaceExtractor::default().extract(&volume(data));
        assert_eq!(mesh.face_count(), 8);
        assert!(mesh.is_closed());
    }

    #[test]
    fn spacing_scales_coordinates() {
        let mut data = Array3::<u8>::zeros((3, 3, 3));
        data[[1, 1, 1]] = 1;
        let spaced = Volume::new(data, PhysicalSpacing::new(2.0, 3.0, 4.0));
        let mesh = extractor(false, 1).extract(&spaced);
        let bounds = mesh.bounding_box().expect("bounds");
        assert_eq!(bounds.min, [1.0, 1.5, 2.0]);
        assert_eq!(bounds.max, [3.0, 4.5, 6.0]);
    }

    #[test]
    fn ball_is_watertight_outward_and_non_degenerate() {
        let mesh = extractor(true, 1).extract(&volume(ball(16, 6.0)));
        assert!(mesh.is_closed());
        assert!(mesh.has_valid_indices());
        assert!(mesh.signed_volume() > 0.0);

        let expected = 4.0 / 3.0 * std::f64::consts::PI * 6.0f64.powi(3);
        let rel = (mesh.signed_volume() - expected).abs() / expected;
        assert!(rel < 0.15, "volume relative error {rel:.3}");

        for i in 0..mesh.face_count() {
            let n = mesh.normals[i];
            assert_relative_eq!(crate::mesh::dot(n, n), 1.0, epsilon = 1e-4);
        }
        let unique: HashSet<[u32; 3]> = mesh.faces.iter().copied().collect();
        assert_eq!(unique.len(), mesh.face_count());
    }

    #[test]
    fn coarser_step_gives_fewer_faces() {
        let data = ball(20, 8.0);
        let fine = extractor(true, 1).extract(&volume(data.clone()));
        let coarse = extractor(true, 2).extract(&volume(data));
        assert!(!coarse.is_empty());
        assert!(coarse.face_count() < fine.face_count());
        assert!(coarse.is_closed());
    }

    #[test]
    fn border_touching_foreground_is_capped_for_any_step() {
        let data = Array3::<u8>::ones((5, 6, 7));
        for step in 1..=3 {
            let mesh = extractor(true, step).extract(&volume(data.clone()));
            assert!(mesh.is_closed(), "open mesh at step {step}");
        }
    }

    #[test]
    fn stepped_extraction_samples_first_layer() {
        let mut data = Array3::<u8>::zeros((3, 6, 6));
        data.slice_mut(s![0, .., ..]).fill(1);
        let mesh = extractor(true, 2).extract(&volume(data));
        assert!(!mesh.is_empty());
        assert!(mesh.is_closed());
        assert!(mesh.signed_volume() > 0.0);

        let bounds = mesh.bounding_box().expect("bounds");
        assert_eq!(bounds.min, [-1.0, -1.0, -1.0]);
        assert_eq!(bounds.max[2], 1.0);
    }

    #[test]
    fn stepped_extraction_samples_first_row_and_column() {
        let mut data = Array3::<u8>::zeros((5, 5, 5));
        data[[2, 0, 0]] = 1;
        data[[2, 0, 1]] = 1;
        data[[2, 1, 0]] = 1;
        data[[2, 1, 1]] = 1;
        let mesh = extractor(true, 2).extract(&volume(data));
        assert!(mesh.is_closed());
    }

    #[test]
    fn random_volumes_extract_closed_surfaces() {
        let mut state = 0x2545_f491_u32;
        for _ in 0..20 {
            let data = Array3::from_shape_fn((6, 7, 8), |_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                u8::from(state % 3 == 0)
            });
            let mesh = extractor(true, 1).extract(&volume(data));
            assert!(mesh.is_empty() || mesh.is_closed());
            assert!(mesh.is_empty() || mesh.signed_volume() > 0.0);
        }
    }

    #[test]
    fn extraction_is_deterministic() {
        let data = ball(12, 4.5);
        let a = SurfaceExtractor::default().extract(&volume(data.clone()));
        let b = SurfaceExtractor::default().extract(&volume(data));
        assert_eq!(a, b);
    }
}
