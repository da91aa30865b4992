use std::collections::HashMap;

/// Triangle mesh in physical coordinates.
///
/// `normals` holds one unit normal per face, in face order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<[f32; 3]>,
    pub faces: Vec<[u32; 3]>,
    pub normals: Vec<[f32; 3]>,
}

/// Axis-aligned bounds of a mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl BoundingBox {
    pub fn size(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn center(&self) -> [f32; 3] {
        [
            (self.max[0] + self.min[0]) * 0.5,
            (self.max[1] + self.min[1]) * 0.5,
            (self.max[2] + self.min[2]) * 0.5,
        ]
    }
}

#[inline]
pub(crate) fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub(crate) fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub(crate) fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub(crate) fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = dot(v, v).sqrt();
    if len <= f32::EPSILON {
        [0.0, 0.0, 0.0]
    } else {
        [v[0] / len, v[1] / len, v[2] / len]
    }
}

impl Mesh {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a mesh and compute its face normals.
    pub fn from_parts(vertices: Vec<[f32; 3]>, faces: Vec<[u32; 3]>) -> Self {
        let mut mesh = Self {
            vertices,
            faces,
            normals: Vec::new(),
        };
        mesh.normals = (0..mesh.faces.len()).map(|i| mesh.face_normal(i)).collect();
        mesh
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Corner positions of face `index`.
    pub fn triangle(&self, index: usize) -> [[f32; 3]; 3] {
        let [a, b, c] = self.faces[index];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    /// Unit normal of face `index` from its winding; zero for degenerate faces.
    pub fn face_normal(&self, index: usize) -> [f32; 3] {
        let [a, b, c] = self.triangle(index);
        normalize(cross(sub(b, a), sub(c, a)))
    }

    /// Area-weighted vertex normals.
    pub fn vertex_normals(&self) -> Vec<[f32; 3]> {
        let mut sums = vec![[0.0f32; 3]; self.vertices.len()];
        for (i, face) in self.faces.iter().enumerate() {
            let [a, b, c] = self.triangle(i);
            let weighted = cross(sub(b, a), sub(c, a));
            for &v in face {
                let sum = &mut sums[v as usize];
                sum[0] += weighted[0];
                sum[1] += weighted[1];
                sum[2] += weighted[2];
            }
        }
        sums.into_iter().map(normalize).collect()
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let first = *self.vertices.first()?;
        let bounds = self.vertices.iter().fold(
            BoundingBox {
                min: first,
                max: first,
            },
            |mut acc, v| {
                for axis in 0..3 {
                    acc.min[axis] = acc.min[axis].min(v[axis]);
                    acc.max[axis] = acc.max[axis].max(v[axis]);
                }
                acc
            },
        );
        Some(bounds)
    }

    pub fn surface_area(&self) -> f64 {
        (0..self.faces.len())
            .map(|i| {
                let [a, b, c] = self.triangle(i);
                let n = cross(sub(b, a), sub(c, a));
                f64::from(dot(n, n).sqrt()) * 0.5
            })
            .sum()
    }

    /// Enclosed volume; positive when faces are wound outward.
    pub fn signed_volume(&self) -> f64 {
        (0..self.faces.len())
            .map(|i| {
                let [a, b, c] = self.triangle(i);
                f64::from(dot(a, cross(b, c))) / 6.0
            })
            .sum()
    }

    /// Number of undirected edges not shared by exactly two faces.
    pub fn open_edge_count(&self) -> usize {
        let mut counts = HashMap::<(u32, u32), usize>::new();
        for face in &self.faces {
            for k in 0..3 {
                let (a, b) = (face[k], face[(k + 1) % 3]);
                let key = if a <= b { (a, b) } else { (b, a) };
                *counts.entry(key).or_insert(0) += 1;
            }
        }
        counts.values().filter(|&&count| count != 2).count()
    }

    /// Every edge is shared by exactly two faces.
    pub fn is_closed(&self) -> bool {
        !self.is_empty() && self.open_edge_count() == 0
    }

    pub fn has_valid_indices(&self) -> bool {
        let count = self.vertices.len() as u64;
        self.faces
            .iter()
            .all(|face| face.iter().all(|&v| u64::from(v) < count))
    }
}
