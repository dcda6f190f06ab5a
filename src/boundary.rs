use std::collections::BTreeMap;

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::{
    datatypes::{dof_index, Axis},
    error::{FemError, Result},
};

/// Prescribed displacements and applied forces, keyed by global dof.
///
/// Forces on the same dof are summed. A dof can carry both kinds; when the
/// conditions are applied the displacement wins. Prescribing two different
/// displacements on one dof is refused and the first value is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundaryConditions {
    dirichlet: BTreeMap<usize, f64>,
    neumann: BTreeMap<usize, f64>,
}

fn node_dof(node_id: usize, axis: Axis) -> Result<usize> {
    dof_index(node_id, axis).ok_or(FemError::NodeNotFound(node_id))
}

impl BoundaryConditions {
    pub fn new() -> BoundaryConditions {
        BoundaryConditions::default()
    }

    pub fn add_dirichlet(&mut self, dof: usize, value: f64) -> Result<()> {
        match self.dirichlet.get(&dof) {
            Some(&existing) if existing != value => Err(FemError::ConflictingDirichlet {
                dof,
                existing,
                requested: value,
            }),
            Some(_) => Ok(()),
            None => {
                self.dirichlet.insert(dof, value);
                Ok(())
            }
        }
    }

    pub fn set_dirichlet(&mut self, node_id: usize, axis: Axis, value: f64) -> Result<()> {
        self.add_dirichlet(node_dof(node_id, axis)?, value)
    }

    /// Blocks both displacements of a node
    pub fn fix_node(&mut self, node_id: usize) -> Result<()> {
        self.fix_node_x(node_id)?;
        self.fix_node_y(node_id)
    }

    pub fn fix_node_x(&mut self, node_id: usize) -> Result<()> {
        self.set_dirichlet(node_id, Axis::X, 0.0)
    }

    pub fn fix_node_y(&mut self, node_id: usize) -> Result<()> {
        self.set_dirichlet(node_id, Axis::Y, 0.0)
    }

    pub fn add_neumann(&mut self, dof: usize, value: f64) {
        *self.neumann.entry(dof).or_insert(0.0) += value;
    }

    pub fn add_force(&mut self, node_id: usize, fx: f64, fy: f64) -> Result<()> {
        self.add_force_x(node_id, fx)?;
        self.add_force_y(node_id, fy)
    }

    pub fn add_force_x(&mut self, node_id: usize, fx: f64) -> Result<()> {
        self.add_neumann(node_dof(node_id, Axis::X)?, fx);
        Ok(())
    }

    pub fn add_force_y(&mut self, node_id: usize, fy: f64) -> Result<()> {
        self.add_neumann(node_dof(node_id, Axis::Y)?, fy);
        Ok(())
    }

    pub fn dirichlet(&self) -> &BTreeMap<usize, f64> {
        &self.dirichlet
    }

    pub fn neumann(&self) -> &BTreeMap<usize, f64> {
        &self.neumann
    }

    pub fn dirichlet_count(&self) -> usize {
        self.dirichlet.len()
    }

    pub fn neumann_count(&self) -> usize {
        self.neumann.len()
    }

    /// Sum of applied forces as (fx, fy)
    pub fn total_force(&self) -> (f64, f64) {
        self.neumann
            .iter()
            .fold((0.0, 0.0), |(fx, fy), (&dof, &value)| {
                if dof % 2 == 0 {
                    (fx + value, fy)
                } else {
                    (fx, fy + value)
                }
            })
    }

    pub fn clear(&mut self) {
        self.dirichlet.clear();
        self.neumann.clear();
    }

    pub fn print_summary(&self) {
        let (fx, fy) = self.total_force();
        println!("info: boundary conditions");
        println!("  - prescribed dofs: {}", self.dirichlet_count());
        println!("  - loaded dofs: {}", self.neumann_count());
        println!("  - total force: ({fx:e}, {fy:e})");
    }

    /// Applies the conditions to an assembled system
    ///
    /// Forces are added to `loads` first. Each prescribed dof then has its row
    /// and column removed from the stiffness, a unit diagonal, and its load set
    /// to the prescribed value. The column entries times the prescribed value
    /// are moved to the loads of the free rows, so non-zero displacements keep
    /// the solution of the original system.
    ///
    /// # Arguments
    /// * `stiffness` - The fully assembled global stiffness matrix
    /// * `loads` - The global load vector, updated in place
    ///
    /// # Returns
    /// The constrained stiffness matrix
    pub fn apply(
        &self,
        stiffness: &CsrMatrix<f64>,
        loads: &mut DVector<f64>,
    ) -> Result<CsrMatrix<f64>> {
        let dofs = stiffness.nrows();
        if loads.len() != dofs {
            return Err(FemError::Solver(format!(
                "load vector has {} entries for {dofs} dofs",
                loads.len()
            )));
        }
        if let Some(&dof) = self
            .dirichlet
            .keys()
            .chain(self.neumann.keys())
            .find(|&&dof| dof >= dofs)
        {
            return Err(FemError::InvalidDof { dof, dofs });
        }

        for (&dof, &value) in &self.neumann {
            loads[dof] += value;
        }

        let mut prescribed: Vec<Option<f64>> = vec![None; dofs];
        for (&dof, &value) in &self.dirichlet {
            prescribed[dof] = Some(value);
        }

        let mut triplets: CooMatrix<f64> = CooMatrix::new(dofs, dofs);
        for (row, col, &value) in stiffness.triplet_iter() {
            match (prescribed[row], prescribed[col]) {
                (None, None) => triplets.push(row, col, value),
                (None, Some(displacement)) => loads[row] -= value * displacement,
                _ => {}
            }
        }
        for (&dof, &value) in &self.dirichlet {
            triplets.push(dof, dof, 1.0);
            loads[dof] = value;
        }

        Ok(CsrMatrix::from(&triplets))
    }
}
