use indicatif::ProgressBar;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::{
    datatypes::DOF,
    error::{FemError, Result},
    mesh::Mesh,
};

/// Compiles element stiffness matrices into the global stiffness matrix
///
/// Every active element scatters its 6x6 stiffness onto the global dofs of its
/// three nodes. Entries that land on the same global pair are summed, so the
/// result does not depend on element order beyond round-off.
///
/// # Arguments
/// * `mesh` - A mesh whose elements have been initialized
/// * `bar` - Progress bar advanced once per element
///
/// # Returns
/// A 2N x 2N sparse matrix
pub fn build_total_stiffness_matrix(mesh: &Mesh, bar: &ProgressBar) -> Result<CsrMatrix<f64>> {
    let dofs = DOF * mesh.node_count();
    let mut triplets: CooMatrix<f64> = CooMatrix::new(dofs, dofs);

    for element in mesh.elements() {
        bar.inc(1);

        if !element.is_active() {
            continue;
        }

        let dof_map = element
            .dof_map()
            .ok_or(FemError::NodeNotFound(0))?;
        if let Some(&dof) = dof_map.iter().find(|&&d| d >= dofs) {
            return Err(FemError::InvalidDof { dof, dofs });
        }

        for (local_row, global_row) in dof_map.iter().enumerate() {
            for (local_col, global_col) in dof_map.iter().enumerate() {
                triplets.push(
                    *global_row,
                    *global_col,
                    element.stiffness[(local_row, local_col)],
                );
            }
        }
    }
    bar.finish_and_clear();

    let total_stiffness_matrix = CsrMatrix::from(&triplets);
    println!(
        "info: assembled total stiffness matrix {dofs}x{dofs}, nnz = {}",
        total_stiffness_matrix.nnz()
    );

    Ok(total_stiffness_matrix)
}

/// Value stored at `(row, col)`, zero when the entry is not in the pattern
pub fn entry(matrix: &CsrMatrix<f64>, row: usize, col: usize) -> f64 {
    matrix
        .get_entry(row, col)
        .map(|e| e.into_value())
        .unwrap_or(0.0)
}
