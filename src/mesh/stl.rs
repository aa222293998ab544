//! src/mesh/stl.rs

use crate::error::{CfdError, CfdResult};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use stl_io::Triangle;

/// A 2D outline in the XY plane, obtained by projecting STL triangles
#[derive(Debug, Clone)]
pub struct StlOutline {
    triangles: Vec<[(f64, f64); 3]>,
}

impl StlOutline {
    /// Build an outline directly from projected triangles
    pub fn from_triangles(triangles: Vec<[(f64, f64); 3]>) -> Self {
        Self { triangles }
    }

    /// Axis-aligned bounding box as `(min, max)` corners
    pub fn bounds(&self) -> ((f64, f64), (f64, f64)) {
        let mut min = (f64::INFINITY, f64::INFINITY);
        let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for triangle in &self.triangles {
            for &(x, y) in triangle {
                min.0 = min.0.min(x);
                min.1 = min.1.min(y);
                max.0 = max.0.max(x);
                max.1 = max.1.max(y);
            }
        }
        (min, max)
    }

    /// Whether a point lies inside the outline
    pub fn contains(&self, point: (f64, f64)) -> bool {
        self.triangles.iter().any(|t| point_in_triangle(point, t))
    }

    /// The projected triangles
    pub fn triangles(&self) -> &[[(f64, f64); 3]] {
        &self.triangles
    }
}

fn point_in_triangle(p: (f64, f64), t: &[(f64, f64); 3]) -> bool {
    let sign = |a: (f64, f64), b: (f64, f64), c: (f64, f64)| {
        (a.0 - c.0) * (b.1 - c.1) - (b.0 - c.0) * (a.1 - c.1)
    };
    let d1 = sign(p, t[0], t[1]);
    let d2 = sign(p, t[1], t[2]);
    let d3 = sign(p, t[2], t[0]);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

/// Reads an ASCII or binary STL file and projects it onto the XY plane.
pub fn read_outline(path: &str) -> CfdResult<StlOutline> {
    let file = File::open(path).map_err(|e| CfdError::StlRead {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    let mut reader = BufReader::new(file);
    let mesh = stl_io::read_stl(&mut reader).map_err(|e| CfdError::StlRead {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    let triangles = mesh
        .faces
        .iter()
        .map(|face| {
            let v = |i: usize| {
                let vertex = mesh.vertices[face.vertices[i]];
                (vertex[0] as f64, vertex[1] as f64)
            };
            [v(0), v(1), v(2)]
        })
        .collect();
    Ok(StlOutline::from_triangles(triangles))
}

/// Writes a mesh to an STL file.
pub fn write_stl(path: &str, triangles: &[Triangle]) -> Result<(), std::io::Error> {
    let mut file = BufWriter::new(File::create(path)?);
    stl_io::write_stl(&mut file, triangles.iter())?;
    Ok(())
}
