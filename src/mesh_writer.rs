//! STL output and read-back.
//!
//! # Binary layout
//!
//! ```text
//! UINT8[80]    – Header (solid name, zero padded)
//! UINT32       – Number of triangles
//! foreach triangle
//!     REAL32[3] – Normal vector
//!     REAL32[3] – Vertex 1
//!     REAL32[3] – Vertex 2
//!     REAL32[3] – Vertex 3
//!     UINT16    – Attribute byte count (0)
//! end
//! ```
//!
//! Vertices are written in face-index order; the winding produced by the
//! extractor is kept as is.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use image::RgbImage;
use tracing::info;

use crate::{
    config::{OutputConfig, PreviewConfig},
    enums::StlFormat,
    error::{ReconstructionError, Result},
    mesh::Mesh,
    preview::render_preview,
};

const HEADER_SIZE: usize = 80;
const TRIANGLE_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct MeshWriter {
    format: StlFormat,
    solid_name: String,
}

impl Default for MeshWriter {
    fn default() -> Self {
        Self::from_config(&OutputConfig::default())
    }
}

impl MeshWriter {
    pub fn new(format: StlFormat, solid_name: impl Into<String>) -> Self {
        Self {
            format,
            solid_name: solid_name.into(),
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(config.stl_format, config.solid_name.clone())
    }

    /// Serialize `mesh` in the configured STL layout.
    pub fn encode(&self, mesh: &Mesh) -> Vec<u8> {
        match self.format {
            StlFormat::Binary => to_binary_stl(mesh, &self.solid_name),
            StlFormat::Ascii => to_ascii_stl(mesh, &self.solid_name).into_bytes(),
        }
    }

    /// Write `mesh` to `path`. An empty mesh is refused.
    pub fn write_stl(&self, mesh: &Mesh, path: impl AsRef<Path>) -> Result<()> {
        if mesh.is_empty() {
            return Err(ReconstructionError::DegenerateMesh);
        }
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&self.encode(mesh))?;
        writer.flush()?;
        info!(
            stl = %path.display(),
            faces = mesh.face_count(),
            format = ?self.format,
            "saved STL"
        );
        Ok(())
    }

    /// Render the preview image and save it to `path`.
    pub fn write_preview(
        &self,
        mesh: &Mesh,
        config: &PreviewConfig,
        path: impl AsRef<Path>,
    ) -> Result<RgbImage> {
        if mesh.is_empty() {
            return Err(ReconstructionError::DegenerateMesh);
        }
        let path = path.as_ref();
        let image = render_preview(mesh, config);
        image.save(path)?;
        info!(preview = %path.display(), "saved preview");
        Ok(image)
    }
}

fn face_normal_or_stored(mesh: &Mesh, index: usize) -> [f32; 3] {
    mesh.normals
        .get(index)
        .copied()
        .unwrap_or_else(|| mesh.face_normal(index))
}

#[inline]
fn push_f32_triplet(bytes: &mut Vec<u8>, value: [f32; 3]) {
    for component in value {
        bytes.extend_from_slice(&component.to_le_bytes());
    }
}

pub fn to_binary_stl(mesh: &Mesh, name: &str) -> Vec<u8> {
    let mut bytes = Vec::<u8>::with_capacity(HEADER_SIZE + 4 + mesh.face_count() * TRIANGLE_SIZE);

    let mut header = [0u8; HEADER_SIZE];
    let name_bytes = name.as_bytes();
    let header_len = name_bytes.len().min(HEADER_SIZE);
    header[..header_len].copy_from_slice(&name_bytes[..header_len]);
    bytes.extend_from_slice(&header);

    let tri_count = mesh.face_count() as u32;
    bytes.extend_from_slice(&tri_count.to_le_bytes());

    for i in 0..mesh.face_count() {
        let [a, b, c] = mesh.triangle(i);
        push_f32_triplet(&mut bytes, face_normal_or_stored(mesh, i));
        push_f32_triplet(&mut bytes, a);
        push_f32_triplet(&mut bytes, b);
        push_f32_triplet(&mut bytes, c);
        bytes.extend_from_slice(&0u16.to_le_bytes());
    }

    bytes
}

pub fn to_ascii_stl(mesh: &Mesh, name: &str) -> String {
    let mut out = String::new();
    out.push_str("solid ");
    out.push_str(name);
    out.push('\n');

    for i in 0..mesh.face_count() {
        let [a, b, c] = mesh.triangle(i);
        let n = face_normal_or_stored(mesh, i);

        out.push_str(&format!("  facet normal {} {} {}\n", n[0], n[1], n[2]));
        out.push_str("    outer loop\n");
        for v in [a, b, c] {
            out.push_str(&format!("      vertex {} {} {}\n", v[0], v[1], v[2]));
        }
        out.push_str("    endloop\n");
        out.push_str("  endfacet\n");
    }

    out.push_str("endsolid ");
    out.push_str(name);
    out.push('\n');
    out
}

/// Read an STL file written in either layout.
pub fn read_stl(path: impl AsRef<Path>) -> Result<Mesh> {
    let bytes = std::fs::read(path.as_ref())?;
    parse_stl(&bytes)
}

/// Parse STL bytes, welding identical vertex positions in first-seen order.
pub fn parse_stl(bytes: &[u8]) -> Result<Mesh> {
    if is_binary_stl(bytes) {
        parse_binary(bytes)
    } else if bytes.trim_ascii_start().starts_with(b"solid") {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ReconstructionError::invalid_stl("ASCII STL is not valid UTF-8"))?;
        parse_ascii(text)
    } else {
        Err(ReconstructionError::invalid_stl(
            "neither a binary nor an ASCII STL",
        ))
    }
}

/// A binary STL's length is fully determined by its face count.
fn is_binary_stl(bytes: &[u8]) -> bool {
    if bytes.len() < HEADER_SIZE + 4 {
        return false;
    }
    let count = read_u32(&bytes[HEADER_SIZE..HEADER_SIZE + 4]) as usize;
    count
        .checked_mul(TRIANGLE_SIZE)
        .and_then(|body| body.checked_add(HEADER_SIZE + 4))
        == Some(bytes.len())
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn read_f32_triplet(buf: &[u8]) -> [f32; 3] {
    let f = |i: usize| f32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
    [f(0), f(4), f(8)]
}

#[derive(Default)]
struct Welder {
    mesh: Mesh,
    lookup: HashMap<[u32; 3], u32>,
}

impl Welder {
    fn vertex(&mut self, position: [f32; 3]) -> u32 {
        let key = position.map(f32::to_bits);
        let vertices = &mut self.mesh.vertices;
        *self.lookup.entry(key).or_insert_with(|| {
            vertices.push(position);
            (vertices.len() - 1) as u32
        })
    }

    fn face(&mut self, normal: [f32; 3], corners: [[f32; 3]; 3]) {
        let face = corners.map(|c| self.vertex(c));
        self.mesh.faces.push(face);
        self.mesh.normals.push(normal);
    }
}

fn parse_binary(bytes: &[u8]) -> Result<Mesh> {
    let mut welder = Welder::default();
    for record in bytes[HEADER_SIZE + 4..].chunks_exact(TRIANGLE_SIZE) {
        let normal = read_f32_triplet(&record[0..12]);
        let corners = [
            read_f32_triplet(&record[12..24]),
            read_f32_triplet(&record[24..36]),
            read_f32_triplet(&record[36..48]),
        ];
        welder.face(normal, corners);
    }
    Ok(welder.mesh)
}

fn parse_floats(parts: &[&str], line_no: usize) -> Result<[f32; 3]> {
    if parts.len() != 3 {
        return Err(ReconstructionError::invalid_stl(format!(
            "line {line_no}: expected 3 coordinates"
        )));
    }
    let mut out = [0.0f32; 3];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part.parse().map_err(|_| {
            ReconstructionError::invalid_stl(format!("line {line_no}: bad number '{part}'"))
        })?;
    }
    Ok(out)
}

fn parse_ascii(text: &str) -> Result<Mesh> {
    let mut welder = Welder::default();
    let mut normal = [0.0f32; 3];
    let mut corners: Vec<[f32; 3]> = Vec::with_capacity(3);

    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["facet", "normal", rest @ ..] => {
                normal = parse_floats(rest, line_no)?;
                corners.clear();
            }
            ["vertex", rest @ ..] => corners.push(parse_floats(rest, line_no)?),
            ["endfacet"] => {
                let [a, b, c] = corners.as_slice() else {
                    return Err(ReconstructionError::invalid_stl(format!(
                        "line {line_no}: facet has {} vertices",
                        corners.len()
                    )));
                };
                welder.face(normal, [*a, *b, *c]);
                corners.clear();
            }
            _ => {}
        }
    }
    Ok(welder.mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_mesh() -> Mesh {
        Mesh::from_parts(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.25, 0.5, -1.5]],
            vec![[0, 1, 2], [0, 3, 1]],
        )
    }

    #[test]
    fn binary_stl_has_valid_size_and_triangle_count() {
        let bytes = to_binary_stl(&simple_mesh(), "test");
        assert_eq!(bytes.len(), 84 + 2 * 50);
        let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]);
        assert_eq!(count, 2);
        assert!(bytes.starts_with(b"test\0"));
    }

    #[test]
    fn binary_stl_writes_normal_then_vertices_in_face_order() {
        let bytes = to_binary_stl(&simple_mesh(), "order");
        let record = &bytes[84..134];
        assert_eq!(read_f32_triplet(&record[0..12]), [0.0, 0.0, 1.0]);
        assert_eq!(read_f32_triplet(&record[12..24]), [0.0, 0.0, 0.0]);
        assert_eq!(read_f32_triplet(&record[24..36]), [1.0, 0.0, 0.0]);
        assert_eq!(read_f32_triplet(&record[36..48]), [0.0, 1.0, 0.0]);
    }

    #[test]
    fn ascii_stl_contains_required_tokens() {
        let stl = to_ascii_stl(&simple_mesh(), "tri");
        assert!(stl.starts_with("solid tri"));
        assert!(stl.contains("facet normal 0 0 1"));
        assert!(stl.contains("outer loop"));
        assert!(stl.contains("vertex 0.25 0.5 -1.5"));
        assert!(stl.ends_with("endsolid tri\n"));
    }

    #[test]
    fn both_layouts_round_trip_topology() {
        let mesh = simple_mesh();
        for format in [StlFormat::Binary, StlFormat::Ascii] {
            let bytes = MeshWriter::new(format, "rt").encode(&mesh);
            let parsed = parse_stl(&bytes).expect("parse");
            assert_eq!(parsed.vertices, mesh.vertices, "{format:?}");
            assert_eq!(parsed.faces, mesh.faces, "{format:?}");
            assert_eq!(parsed.normals, mesh.normals, "{format:?}");
        }
    }

    #[test]
    fn binary_header_starting_with_solid_is_still_binary() {
        let bytes = to_binary_stl(&simple_mesh(), "solid trap");
        let parsed = parse_stl(&bytes).expect("parse");
        assert_eq!(parsed.face_count(), 2);
    }

    #[test]
    fn rejects_garbage_and_truncated_facets() {
        assert!(parse_stl(b"hello").is_err());
        let broken = "solid x\n facet normal 0 0 1\n outer loop\n vertex 0 0 0\n endloop\n endfacet\nendsolid x\n";
        assert!(parse_stl(broken.as_bytes()).is_err());
    }

    #[test]
    fn empty_mesh_is_not_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = MeshWriter::default()
            .write_stl(&Mesh::empty(), dir.path().join("empty.stl"))
            .expect_err("empty mesh");
        assert!(matches!(err, ReconstructionError::DegenerateMesh));
        assert!(!dir.path().join("empty.stl").exists());
    }
}
