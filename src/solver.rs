use std::fmt;

use crate::{
    assembly::build_total_stiffness_matrix,
    boundary::BoundaryConditions,
    datatypes::{dof_index, Axis, DOF},
    element::compute_element_stress,
    error::{FemError, Result},
    mesh::Mesh,
    material::MaterialLibrary,
    preconditioner::IncompleteCholesky,
};
use argmin_observer_slog::SlogLogger;
use indicatif::ProgressBar;
use nalgebra::{DVector, SMatrix};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};

pub const DEFAULT_TOLERANCE: f64 = 1e-10;
pub const DEFAULT_MAX_ITERATIONS: u64 = 10_000;
pub const DEFAULT_LOG_EVERY: u64 = 100;

/// Resolution of the progress bar driven by the residual
const PROGRESS_STEPS: u64 = 1000;

/// Restarts from the true residual after the first conjugate gradient run
const MAX_REFINEMENTS: usize = 4;

/// Tightens the preconditioned target of each restart
const REFINEMENT_MARGIN: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings {
    /// Relative residual the conjugate gradient has to reach
    pub tolerance: f64,
    pub max_iterations: u64,
    pub show_progress: bool,
    /// Logs conjugate gradient iterations to the terminal
    pub verbose: bool,
    pub log_every: u64,
}

impl Default for SolverSettings {
    fn default() -> SolverSettings {
        SolverSettings {
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            show_progress: true,
            verbose: false,
            log_every: DEFAULT_LOG_EVERY,
        }
    }
}

impl SolverSettings {
    fn progress_bar(&self, len: u64) -> ProgressBar {
        if self.show_progress {
            ProgressBar::new(len)
        } else {
            ProgressBar::hidden()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    Unassembled,
    Assembled,
    BoundaryApplied,
    Solved,
    Failed,
}

impl fmt::Display for SolverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolverState::Unassembled => "unassembled",
            SolverState::Assembled => "assembled",
            SolverState::BoundaryApplied => "boundary conditions applied",
            SolverState::Solved => "solved",
            SolverState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStats {
    pub iterations: u64,
    /// True relative residual `‖F - K·U‖ / ‖F‖`
    pub residual: f64,
    pub seconds: f64,
}

/// Applies the split preconditioned stiffness `L⁻¹ K L⁻ᵗ`
struct ConjugateGradientOperator<'a> {
    a: &'a CsrMatrix<f64>,
    factor: &'a IncompleteCholesky,
}

impl<'a> Operator for ConjugateGradientOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> std::result::Result<Self::Output, Error> {
        let z = self.factor.solve_upper(&DVector::from_vec(x.clone()));
        Ok(self.factor.solve_lower(&(self.a * &z)).as_slice().to_vec())
    }
}

/// Observer bar for argmin solver
struct ConjugateGradientObserverBar {
    bar: ProgressBar,
    initial_mag: f64,
    final_mag: f64,
}

impl ConjugateGradientObserverBar {
    fn new(bar: ProgressBar, initial_cost: f64, target_cost: f64) -> ConjugateGradientObserverBar {
        ConjugateGradientObserverBar {
            bar,
            initial_mag: initial_cost.log10(),
            final_mag: target_cost.log10(),
        }
    }
}

impl<I> Observe<I> for ConjugateGradientObserverBar
where
    I: State<Float = f64>,
{
    fn observe_init(&mut self, _name: &str, _state: &I, _kv: &KV) -> std::result::Result<(), Error> {
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> std::result::Result<(), Error> {
        let cost = state.get_cost();
        if !cost.is_finite() || cost <= 0.0 {
            return Ok(());
        }
        let span = self.initial_mag - self.final_mag;
        if span <= 0.0 {
            return Ok(());
        }
        let fraction = ((self.initial_mag - cost.log10()) / span).clamp(0.0, 1.0);
        self.bar.set_position((fraction * PROGRESS_STEPS as f64) as u64);

        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> std::result::Result<(), Error> {
        self.bar.finish_and_clear();
        Ok(())
    }
}

/// Runs argmin's conjugate gradient on `(L⁻¹ K L⁻ᵗ) y = L⁻¹ rhs`.
///
/// argmin's cost is the squared norm of the preconditioned residual, so the
/// run stops once `‖L⁻¹(rhs - K·x)‖ <= target`.
///
/// # Returns
/// `x = L⁻ᵗ y` and the number of iterations used
fn run_preconditioned_pass(
    a: &CsrMatrix<f64>,
    factor: &IncompleteCholesky,
    rhs: &DVector<f64>,
    target: f64,
    max_iterations: u64,
    settings: &SolverSettings,
) -> Result<(DVector<f64>, u64)> {
    let rhs_tilde = factor.solve_lower(rhs);
    let initial_cost = rhs_tilde.norm_squared();
    let target_cost = target * target;

    let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(rhs_tilde.as_slice().to_vec());
    let initial_guess: Vec<f64> = vec![0.0; rhs.len()];
    let operator = ConjugateGradientOperator { a, factor };

    let mut executor = Executor::new(operator, solver).configure(|state| {
        state
            .param(initial_guess)
            .max_iters(max_iterations)
            .target_cost(target_cost)
    });
    if settings.show_progress {
        let observer = ConjugateGradientObserverBar::new(
            ProgressBar::new(PROGRESS_STEPS),
            initial_cost,
            target_cost,
        );
        executor = executor.add_observer(observer, ObserverMode::NewBest);
    }
    if settings.verbose {
        executor = executor.add_observer(
            SlogLogger::term(),
            ObserverMode::Every(settings.log_every.max(1)),
        );
    }

    let res = executor
        .run()
        .map_err(|err| FemError::Solver(format!("Conjugate Gradient error: {err}")))?;
    let state = res.state();

    let best_param = state.get_best_param().ok_or_else(|| {
        FemError::Solver("Conjugate Gradient could not produce best parameter".to_owned())
    })?;
    let x = factor.solve_upper(&DVector::from_vec(best_param.clone()));

    Ok((x, state.get_iter()))
}

/// Solves a symmetric positive definite system with preconditioned conjugate
/// gradient.
///
/// The incomplete Cholesky factor `L` splits the system into
/// `(L⁻¹ K L⁻ᵗ) y = L⁻¹ b`, `x = L⁻ᵗ y`. Convergence is judged on the true
/// relative residual `‖b - A·x‖ / ‖b‖`; when the preconditioned run stops
/// short of it, conjugate gradient restarts on the remaining residual.
///
/// # Arguments
/// * `a` - A square positive definite matrix
/// * `b` - The right hand side
/// * `settings` - Tolerance, iteration budget and diagnostics
///
/// # Returns
/// An approximation of `x` in `Ax=b` and the number of iterations used
fn run_conjugate_gradient(
    a: &CsrMatrix<f64>,
    b: &DVector<f64>,
    settings: &SolverSettings,
) -> Result<(DVector<f64>, u64)> {
    let factor = IncompleteCholesky::new(a)?;

    let b_norm = b.norm();
    if b_norm == 0.0 {
        return Ok((DVector::zeros(b.len()), 0));
    }
    let goal = settings.tolerance * b_norm;

    let mut x = DVector::zeros(b.len());
    let mut residual = b.clone();
    let mut iterations = 0;

    for pass in 0..=MAX_REFINEMENTS {
        let budget = settings.max_iterations.saturating_sub(iterations);
        if budget == 0 {
            break;
        }

        // maps the true goal onto the preconditioned residual of this pass
        let margin = if pass == 0 { 1.0 } else { REFINEMENT_MARGIN };
        let target = margin * goal * factor.solve_lower(&residual).norm() / residual.norm();

        let (correction, used) =
            run_preconditioned_pass(a, &factor, &residual, target, budget, settings)?;
        iterations += used;
        x += correction;
        residual = b - a * &x;

        let residual_norm = residual.norm();
        if !residual_norm.is_finite() {
            break;
        }
        if residual_norm <= goal {
            if x.iter().any(|u| !u.is_finite()) {
                return Err(FemError::Solver(
                    "Conjugate Gradient produced a non-finite solution".to_owned(),
                ));
            }
            return Ok((x, iterations));
        }
        if pass < MAX_REFINEMENTS && iterations < settings.max_iterations {
            println!(
                "info: relative residual {:e} above tolerance, restarting conjugate gradient",
                residual_norm / b_norm
            );
        }
    }

    Err(FemError::NotConverged {
        iterations,
        residual: residual.norm() / b_norm,
    })
}

/// `‖b - A·x‖ / ‖b‖`
fn relative_residual(a: &CsrMatrix<f64>, x: &DVector<f64>, b: &DVector<f64>) -> f64 {
    (b - a * x).norm() / b.norm()
}

/// Owns the global system of one run over a borrowed mesh.
///
/// The system is sized once from the node count. Operations must follow
/// `assemble`, `apply_boundary_conditions`, `solve`; anything else is
/// refused with [`FemError::InvalidState`].
pub struct Solver<'a> {
    mesh: &'a mut Mesh,
    materials: &'a MaterialLibrary,
    settings: SolverSettings,
    dofs: usize,
    stiffness: CsrMatrix<f64>,
    constrained: CsrMatrix<f64>,
    loads: DVector<f64>,
    displacements: DVector<f64>,
    prescribed: usize,
    state: SolverState,
}

impl<'a> Solver<'a> {
    pub fn new(
        mesh: &'a mut Mesh,
        materials: &'a MaterialLibrary,
        settings: SolverSettings,
    ) -> Result<Solver<'a>> {
        mesh.validate_numbering()?;
        let dofs = DOF * mesh.node_count();
        if dofs == 0 {
            return Err(FemError::Mesh("Cannot solve an empty mesh".to_owned()));
        }

        Ok(Solver {
            mesh,
            materials,
            settings,
            dofs,
            stiffness: CsrMatrix::from(&CooMatrix::<f64>::new(dofs, dofs)),
            constrained: CsrMatrix::from(&CooMatrix::<f64>::new(dofs, dofs)),
            loads: DVector::zeros(dofs),
            displacements: DVector::zeros(dofs),
            prescribed: 0,
            state: SolverState::Unassembled,
        })
    }

    fn require(&self, operation: &'static str, allowed: &[SolverState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(FemError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    /// Computes every element stiffness and builds the global matrix.
    ///
    /// Resets loads and displacements.
    pub fn assemble(&mut self) -> Result<()> {
        self.require(
            "assemble",
            &[
                SolverState::Unassembled,
                SolverState::Assembled,
                SolverState::BoundaryApplied,
            ],
        )?;

        println!("info: building element stiffness matrices...");
        let bar = self.settings.progress_bar(self.mesh.element_count() as u64);
        self.mesh
            .initialize_elements_with_progress(self.materials, &bar)?;

        println!("info: building total stiffness matrix...");
        let bar = self.settings.progress_bar(self.mesh.element_count() as u64);
        self.stiffness = build_total_stiffness_matrix(self.mesh, &bar)?;
        self.loads = DVector::zeros(self.dofs);
        self.displacements = DVector::zeros(self.dofs);
        self.state = SolverState::Assembled;

        Ok(())
    }

    /// Builds the load vector and the constrained matrix from `bcs`.
    ///
    /// Can be repeated with another set before solving; each call starts over
    /// from the assembled matrix.
    pub fn apply_boundary_conditions(&mut self, bcs: &BoundaryConditions) -> Result<()> {
        self.require(
            "apply boundary conditions",
            &[SolverState::Assembled, SolverState::BoundaryApplied],
        )?;

        if bcs.dirichlet_count() == 0 {
            println!(
                "warning [solver]: no displacement constraints, rigid-body modes are free"
            );
        }

        let mut loads = DVector::zeros(self.dofs);
        self.constrained = bcs.apply(&self.stiffness, &mut loads)?;
        self.loads = loads;
        self.prescribed = bcs.dirichlet_count();
        self.state = SolverState::BoundaryApplied;

        println!(
            "info: applied {} prescribed dofs and {} loaded dofs",
            bcs.dirichlet_count(),
            bcs.neumann_count()
        );

        Ok(())
    }

    /// Solves for the nodal displacements and recovers element stresses
    pub fn solve(&mut self) -> Result<SolveStats> {
        self.require("solve", &[SolverState::BoundaryApplied])?;
        if self.prescribed == 0 {
            self.state = SolverState::Failed;
            return Err(FemError::Solver(
                "No displacement constraints, the stiffness matrix is singular".to_owned(),
            ));
        }

        println!("info: solving {} dofs...", self.dofs);
        let start = std::time::Instant::now();
        let (displacements, iterations) =
            match run_conjugate_gradient(&self.constrained, &self.loads, &self.settings) {
                Ok(solution) => solution,
                Err(err) => {
                    self.state = SolverState::Failed;
                    return Err(err);
                }
            };
        let seconds = (std::time::Instant::now() - start).as_secs_f64();

        let residual = if self.loads.norm() == 0.0 {
            0.0
        } else {
            relative_residual(&self.constrained, &displacements, &self.loads)
        };
        println!(
            "info: solved system in {seconds:.3} seconds ({iterations} iterations, relative residual {residual:e})"
        );

        self.displacements = displacements;
        if let Err(err) = self.compute_stress() {
            self.state = SolverState::Failed;
            return Err(err);
        }
        self.state = SolverState::Solved;

        Ok(SolveStats {
            iterations,
            residual,
            seconds,
        })
    }

    /// Stores `σ = C·B·u` on every active element
    fn compute_stress(&mut self) -> Result<()> {
        for i in 0..self.mesh.element_count() {
            let element = &self.mesh.elements()[i];
            if !element.is_active() {
                continue;
            }
            let material = element
                .material
                .and_then(|id| self.materials.get(id))
                .ok_or_else(|| {
                    FemError::Mesh(format!("Element {} lost its material", element.id))
                })?;
            let dof_map = element
                .dof_map()
                .ok_or(FemError::ElementNotFound(element.id))?;
            let [n1, n2, n3] = self.mesh.element_nodes(element)?;

            let nodal_displacements: SMatrix<f64, { DOF * 3 }, 1> =
                SMatrix::from_iterator(dof_map.iter().map(|&d| self.displacements[d]));
            let stress = compute_element_stress(
                &n1.vertex,
                &n2.vertex,
                &n3.vertex,
                &material.stiffness_matrix(),
                &nodal_displacements,
            );

            self.mesh.elements_mut()[i].stress = Some(stress);
        }

        Ok(())
    }

    /// Nodal forces `K·U` of the unconstrained system, which include the
    /// support reactions at prescribed dofs
    pub fn reactions(&self) -> Result<DVector<f64>> {
        self.require("compute reactions", &[SolverState::Solved])?;
        Ok(&self.stiffness * &self.displacements)
    }

    pub fn displacements(&self) -> Result<&DVector<f64>> {
        self.require("read displacements", &[SolverState::Solved])?;
        Ok(&self.displacements)
    }

    /// (ux, uy) of a node
    pub fn node_displacement(&self, node_id: usize) -> Result<(f64, f64)> {
        let displacements = self.displacements()?;
        self.mesh.node(node_id)?;
        match (dof_index(node_id, Axis::X), dof_index(node_id, Axis::Y)) {
            (Some(x), Some(y)) if y < self.dofs => Ok((displacements[x], displacements[y])),
            _ => Err(FemError::NodeNotFound(node_id)),
        }
    }

    pub fn stiffness(&self) -> &CsrMatrix<f64> {
        &self.stiffness
    }

    pub fn loads(&self) -> &DVector<f64> {
        &self.loads
    }

    pub fn mesh(&self) -> &Mesh {
        self.mesh
    }

    pub fn dofs(&self) -> usize {
        self.dofs
    }

    pub fn state(&self) -> SolverState {
        self.state
    }
}
