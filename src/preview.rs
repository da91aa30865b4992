//! Static perspective preview of a mesh.
//!
//! Triangles are drawn back to front with a flat, semi-transparent fill on a
//! white background. No axes, no depth buffer: overlapping translucent faces
//! accumulate, which makes the preview read like an X-ray of the solid.

use image::{Rgb, RgbImage};

use crate::{
    config::PreviewConfig,
    mesh::{Mesh, cross, dot, normalize, sub},
};

/// Ambient share of the face brightness; the rest is Lambert shading.
const AMBIENT: f32 = 0.35;
/// Camera distance in bounding-sphere radii.
const CAMERA_DISTANCE: f32 = 3.0;
/// Share of the shorter image side covered by the bounding sphere.
const FILL: f32 = 0.9;

struct Camera {
    eye: [f32; 3],
    right: [f32; 3],
    up: [f32; 3],
    forward: [f32; 3],
    focal: f32,
    cx: f32,
    cy: f32,
}

impl Camera {
    fn looking_at(mesh: &Mesh, config: &PreviewConfig) -> Option<Self> {
        let bounds = mesh.bounding_box()?;
        let center = bounds.center();
        let size = bounds.size();
        let radius = (0.5 * dot(size, size).sqrt()).max(1e-6);

        let elev = config.elevation_deg.to_radians();
        let azim = config.azimuth_deg.to_radians();
        let towards_eye = [elev.cos() * azim.cos(), elev.cos() * azim.sin(), elev.sin()];
        let distance = radius * CAMERA_DISTANCE;
        let eye = [
            center[0] + towards_eye[0] * distance,
            center[1] + towards_eye[1] * distance,
            center[2] + towards_eye[2] * distance,
        ];

        let forward = normalize(sub(center, eye));
        let mut right = normalize(cross(forward, [0.0, 0.0, 1.0]));
        if dot(right, right) == 0.0 {
            right = normalize(cross(forward, [0.0, 1.0, 0.0]));
        }
        let up = cross(right, forward);

        let half_angle = (radius / distance).asin();
        let half_extent = 0.5 * FILL * config.width.min(config.height) as f32;
        Some(Self {
            eye,
            right,
            up,
            forward,
            focal: half_extent / half_angle.tan(),
            cx: config.width as f32 * 0.5,
            cy: config.height as f32 * 0.5,
        })
    }

    /// Pixel position and view depth of a world point.
    fn project(&self, p: [f32; 3]) -> [f32; 3] {
        let v = sub(p, self.eye);
        let depth = dot(v, self.forward).max(1e-6);
        [
            self.cx + self.focal * dot(v, self.right) / depth,
            self.cy - self.focal * dot(v, self.up) / depth,
            depth,
        ]
    }
}

/// Render `mesh` into an RGB image of the configured size.
pub fn render_preview(mesh: &Mesh, config: &PreviewConfig) -> RgbImage {
    let (width, height) = (config.width, config.height);
    let mut canvas = vec![[1.0f32; 3]; (width as usize) * (height as usize)];

    if let Some(camera) = Camera::looking_at(mesh, config) {
        // headlight
        let light = camera.forward.map(|c| -c);

        let mut projected: Vec<([[f32; 3]; 3], f32, f32)> = (0..mesh.face_count())
            .map(|i| {
                let corners = mesh.triangle(i).map(|p| camera.project(p));
                let depth = (corners[0][2] + corners[1][2] + corners[2][2]) / 3.0;
                let shade = AMBIENT + (1.0 - AMBIENT) * dot(mesh.face_normal(i), light).abs();
                (corners, depth, shade)
            })
            .collect();
        projected.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (corners, _, shade) in &projected {
            let color = config.face_color.map(|c| (c * shade).clamp(0.0, 1.0));
            fill_triangle(&mut canvas, width, height, corners, color, config.alpha);
        }
    }

    RgbImage::from_fn(width, height, |x, y| {
        let px = canvas[(y * width + x) as usize];
        Rgb(px.map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8))
    })
}

#[inline]
fn edge(a: [f32; 3], b: [f32; 3], px: f32, py: f32) -> f32 {
    (b[0] - a[0]) * (py - a[1]) - (b[1] - a[1]) * (px - a[0])
}

fn fill_triangle(
    canvas: &mut [[f32; 3]],
    width: u32,
    height: u32,
    corners: &[[f32; 3]; 3],
    color: [f32; 3],
    alpha: f32,
) {
    let [a, b, c] = *corners;
    let area = edge(a, b, c[0], c[1]);
    if area.abs() <= f32::EPSILON {
        return;
    }

    let min_x = a[0].min(b[0]).min(c[0]).floor().max(0.0) as u32;
    let min_y = a[1].min(b[1]).min(c[1]).floor().max(0.0) as u32;
    let max_x = (a[0].max(b[0]).max(c[0]).ceil() as i64).min(width as i64 - 1);
    let max_y = (a[1].max(b[1]).max(c[1]).ceil() as i64).min(height as i64 - 1);
    if max_x < 0 || max_y < 0 {
        return;
    }

    for y in min_y..=max_y as u32 {
        for x in min_x..=max_x as u32 {
            let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(b, c, px, py) / area;
            let w1 = edge(c, a, px, py) / area;
            let w2 = edge(a, b, px, py) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let dst = &mut canvas[(y * width + x) as usize];
            for k in 0..3 {
                dst[k] = alpha * color[k] + (1.0 - alpha) * dst[k];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube() -> Mesh {
        let v = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 1.0],
        ];
        let f = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [3, 7, 6],
            [3, 6, 2],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ];
        Mesh::from_parts(v, f)
    }

    #[test]
    fn preview_has_configured_size() {
        let config = PreviewConfig {
            width: 120,
            height: 80,
            ..PreviewConfig::default()
        };
        let image = render_preview(&cube(), &config);
        assert_eq!(image.dimensions(), (120, 80));
    }

    #[test]
    fn empty_mesh_renders_blank_canvas() {
        let image = render_preview(&Mesh::empty(), &PreviewConfig::default());
        assert!(image.pixels().all(|p| p.0 == [255, 255, 255]));
    }

    #[test]
    fn mesh_is_drawn_centred() {
        let config = PreviewConfig {
            width: 100,
            height: 100,
            ..PreviewConfig::default()
        };
        let image = render_preview(&cube(), &config);
        assert_ne!(image.get_pixel(50, 50).0, [255, 255, 255]);
        assert_eq!(image.get_pixel(0, 0).0, [255, 255, 255]);
    }
}
