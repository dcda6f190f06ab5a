use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use nalgebra::DVector;

use crate::{
    datatypes::{dof_index, Axis},
    error::{FemError, Result},
    mesh::Mesh,
};

/// VTK cell type of a linear triangle
const VTK_TRIANGLE: u8 = 5;

/// One row of a displacement table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplacementRecord {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub ux: f64,
    pub uy: f64,
}

impl DisplacementRecord {
    pub fn magnitude(&self) -> f64 {
        f64::sqrt(f64::powi(self.ux, 2) + f64::powi(self.uy, 2))
    }
}

/// Pairs every node with its solved displacement
///
/// # Arguments
/// * `mesh` - The solved mesh
/// * `displacements` - The global displacement vector, 2 entries per node
pub fn displacement_records(
    mesh: &Mesh,
    displacements: &DVector<f64>,
) -> Result<Vec<DisplacementRecord>> {
    mesh.nodes()
        .iter()
        .map(|node| {
            let (x_dof, y_dof) = match (dof_index(node.id, Axis::X), dof_index(node.id, Axis::Y)) {
                (Some(x), Some(y)) if y < displacements.len() => (x, y),
                _ => return Err(FemError::NodeNotFound(node.id)),
            };
            Ok(DisplacementRecord {
                id: node.id,
                x: node.vertex.x,
                y: node.vertex.y,
                ux: displacements[x_dof],
                uy: displacements[y_dof],
            })
        })
        .collect()
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|err| FemError::io(parent, err))?;
        }
    }
    let file = File::create(path).map_err(|err| FemError::io(path, err))?;
    Ok(BufWriter::new(file))
}

/// Writes the per-node displacement table
///
/// # Arguments
/// * `path` - The output file, parent directories are created
/// * `mesh` - The solved mesh
/// * `displacements` - The global displacement vector
pub fn write_displacement_table(
    path: &Path,
    mesh: &Mesh,
    displacements: &DVector<f64>,
) -> Result<()> {
    let records = displacement_records(mesh, displacements)?;
    let mut file = create(path)?;

    let write = |file: &mut BufWriter<File>| -> std::io::Result<()> {
        writeln!(file, "# nodal displacements")?;
        writeln!(file, "# nodes: {}", records.len())?;
        writeln!(file, "# id x y ux uy |u|")?;
        for r in &records {
            writeln!(
                file,
                "{} {:e} {:e} {:e} {:e} {:e}",
                r.id,
                r.x,
                r.y,
                r.ux,
                r.uy,
                r.magnitude()
            )?;
        }
        file.flush()
    };
    write(&mut file).map_err(|err| FemError::io(path, err))?;

    println!("info: wrote displacements to {}", path.display());
    Ok(())
}

/// Parses a displacement table written by [`write_displacement_table`].
///
/// Lines starting with `#` and blank lines are skipped. The magnitude column
/// is optional and ignored.
pub fn parse_displacement_table(contents: &str) -> Result<Vec<DisplacementRecord>> {
    let mut records = Vec::new();

    for (i, line) in contents.lines().enumerate() {
        let line_no = i + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 5 {
            return Err(FemError::parse(
                line_no,
                format!("expected at least 5 columns, found {}", tokens.len()),
            ));
        }

        let id: usize = tokens[0]
            .parse()
            .map_err(|_| FemError::parse(line_no, format!("invalid node id '{}'", tokens[0])))?;
        let mut values = [0.0; 4];
        for (value, token) in values.iter_mut().zip(&tokens[1..5]) {
            *value = token
                .parse()
                .map_err(|_| FemError::parse(line_no, format!("invalid number '{token}'")))?;
        }

        records.push(DisplacementRecord {
            id,
            x: values[0],
            y: values[1],
            ux: values[2],
            uy: values[3],
        });
    }

    Ok(records)
}

pub fn read_displacement_table(path: &Path) -> Result<Vec<DisplacementRecord>> {
    let contents = std::fs::read_to_string(path).map_err(|err| FemError::io(path, err))?;
    parse_displacement_table(&contents)
}

/// Writes a legacy VTK unstructured grid of the deformed state
///
/// Points carry the displacement vector `U`. Cells carry the von Mises stress
/// when every active element has one.
///
/// # Arguments
/// * `path` - The output file, parent directories are created
/// * `mesh` - The solved mesh
/// * `displacements` - The global displacement vector
pub fn write_vtk(path: &Path, mesh: &Mesh, displacements: &DVector<f64>) -> Result<()> {
    let records = displacement_records(mesh, displacements)?;

    // vtk point indices are 0-based positions in the POINTS block
    let mut point_index = std::collections::HashMap::with_capacity(records.len());
    for (i, r) in records.iter().enumerate() {
        point_index.insert(r.id, i);
    }
    let mut cells = Vec::with_capacity(mesh.element_count());
    for element in mesh.elements() {
        let mut cell = [0usize; 3];
        for (slot, node_id) in cell.iter_mut().zip(element.nodes) {
            *slot = *point_index
                .get(&node_id)
                .ok_or(FemError::NodeNotFound(node_id))?;
        }
        cells.push(cell);
    }
    let stresses: Option<Vec<f64>> = mesh
        .elements()
        .iter()
        .map(|e| if e.is_active() { e.von_mises() } else { Some(0.0) })
        .collect();

    let mut file = create(path)?;
    let write = |file: &mut BufWriter<File>| -> std::io::Result<()> {
        writeln!(file, "# vtk DataFile Version 3.0")?;
        writeln!(file, "trifem displacement results")?;
        writeln!(file, "ASCII")?;
        writeln!(file, "DATASET UNSTRUCTURED_GRID")?;

        writeln!(file, "POINTS {} double", records.len())?;
        for r in &records {
            writeln!(file, "{:e} {:e} 0", r.x, r.y)?;
        }

        writeln!(file, "CELLS {} {}", cells.len(), cells.len() * 4)?;
        for [a, b, c] in &cells {
            writeln!(file, "3 {a} {b} {c}")?;
        }
        writeln!(file, "CELL_TYPES {}", cells.len())?;
        for _ in &cells {
            writeln!(file, "{VTK_TRIANGLE}")?;
        }

        writeln!(file, "POINT_DATA {}", records.len())?;
        writeln!(file, "VECTORS U double")?;
        for r in &records {
            writeln!(file, "{:e} {:e} 0", r.ux, r.uy)?;
        }

        if let Some(stresses) = &stresses {
            writeln!(file, "CELL_DATA {}", stresses.len())?;
            writeln!(file, "SCALARS von_mises double 1")?;
            writeln!(file, "LOOKUP_TABLE default")?;
            for s in stresses {
                writeln!(file, "{s:e}")?;
            }
        }
        file.flush()
    };
    write(&mut file).map_err(|err| FemError::io(path, err))?;

    println!("info: wrote visualization to {}", path.display());
    Ok(())
}
