//! lbm/vtk.rs - VTK Snapshot Output
//!
//! Writes the lattice state as legacy VTK structured-points files plus a
//! `.pvd` master file that collects the time series for rendering.

use crate::error::{CfdError, CfdResult};
use crate::lbm::lattice::{Lattice, MAT_NONE};
use crate::lbm::units::UnitConverter;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Collects the snapshots of one CFD module
#[derive(Debug, Clone)]
pub struct VtkWriter {
    directory: PathBuf,
    name: String,
    snapshots: Vec<(f64, PathBuf)>,
}

impl VtkWriter {
    /// Create a writer emitting into `directory` with the given base name
    pub fn new(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            name: name.into(),
            snapshots: Vec::new(),
        }
    }

    fn io_error(path: &Path, error: std::io::Error) -> CfdError {
        CfdError::VtkWrite {
            path: path.display().to_string(),
            reason: error.to_string(),
        }
    }

    /// Write one snapshot of the lattice at the given simulation time and
    /// record it in the master file
    pub fn write_snapshot(
        &mut self,
        lattice: &Lattice,
        converter: &UnitConverter,
        time: f64,
    ) -> CfdResult<PathBuf> {
        fs::create_dir_all(&self.directory).map_err(|e| Self::io_error(&self.directory, e))?;
        let (nx, ny) = lattice.extent();
        let step = self.snapshots.len();
        let path = self.directory.join(format!("{}_{step:06}.vtk", self.name));

        let mut out = String::new();
        let _ = writeln!(out, "# vtk DataFile Version 3.0");
        let _ = writeln!(out, "{}", self.name);
        let _ = writeln!(out, "ASCII");
        let _ = writeln!(out, "DATASET STRUCTURED_POINTS");
        let _ = writeln!(out, "DIMENSIONS {nx} {ny} 1");
        let _ = writeln!(out, "ORIGIN 0 0 0");
        let dx = converter.spacing();
        let _ = writeln!(out, "SPACING {dx} {dx} 1");
        let _ = writeln!(out, "POINT_DATA {}", nx * ny);

        let _ = writeln!(out, "SCALARS pressure double 1");
        let _ = writeln!(out, "LOOKUP_TABLE default");
        for cell in 0..nx * ny {
            let value = if lattice.material()[cell] == MAT_NONE {
                0.0
            } else {
                converter.phys_pressure(lattice.density(cell))
            };
            let _ = writeln!(out, "{value}");
        }

        let _ = writeln!(out, "VECTORS velocity double");
        for cell in 0..nx * ny {
            let (ux, uy) = if lattice.material()[cell] == MAT_NONE {
                (0.0, 0.0)
            } else {
                lattice.velocity(cell)
            };
            let _ = writeln!(
                out,
                "{} {} 0",
                converter.phys_velocity(ux),
                converter.phys_velocity(uy)
            );
        }

        fs::write(&path, out).map_err(|e| Self::io_error(&path, e))?;
        self.snapshots.push((time, path.clone()));
        self.write_master()?;
        Ok(path)
    }

    /// Rewrite the `.pvd` master file referencing every snapshot
    fn write_master(&self) -> CfdResult<()> {
        let path = self.master_path();
        let mut out = String::new();
        let _ = writeln!(out, "<?xml version=\"1.0\"?>");
        let _ = writeln!(
            out,
            "<VTKFile type=\"Collection\" version=\"0.1\" byte_order=\"LittleEndian\">"
        );
        let _ = writeln!(out, "  <Collection>");
        for (time, file) in &self.snapshots {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "    <DataSet timestep=\"{time}\" group=\"\" part=\"0\" file=\"{name}\"/>"
            );
        }
        let _ = writeln!(out, "  </Collection>");
        let _ = writeln!(out, "</VTKFile>");
        fs::write(&path, out).map_err(|e| Self::io_error(&path, e))
    }

    /// Path of the `.pvd` master file
    pub fn master_path(&self) -> PathBuf {
        self.directory.join(format!("{}.pvd", self.name))
    }

    /// Paths of the written snapshots
    pub fn snapshot_paths(&self) -> Vec<PathBuf> {
        self.snapshots.iter().map(|(_, p)| p.clone()).collect()
    }
}
