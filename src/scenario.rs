//! Specimen tests run end to end: traction, flexion and a two-material
//! composite. Each one loads a mesh, builds its boundary conditions from the
//! mesh geometry, solves, writes results, and compares against beam theory.

use std::path::PathBuf;

use crate::{
    boundary::BoundaryConditions,
    config::{Config, TestType},
    datatypes::{Vertex, FIBER_TAG, MATRIX_TAG},
    error::{FemError, Result},
    material::{MaterialLibrary, TagMaterials},
    mesh::{Mesh, Side},
    mesh_reader::read_gmsh_file,
    post_processor::{write_displacement_table, write_vtk},
    solver::{SolveStats, Solver},
};

/// A computed quantity, with its analytical counterpart when one exists
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub label: &'static str,
    pub value: f64,
    pub reference: Option<f64>,
    pub unit: &'static str,
}

impl Measurement {
    fn new(label: &'static str, value: f64, reference: Option<f64>, unit: &'static str) -> Measurement {
        Measurement {
            label,
            value,
            reference,
            unit,
        }
    }

    /// `|value - reference| / |reference|`
    pub fn relative_error(&self) -> Option<f64> {
        self.reference
            .filter(|r| *r != 0.0)
            .map(|r| (self.value - r).abs() / r.abs())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    pub test_type: TestType,
    pub nodes: usize,
    pub elements: usize,
    pub width: f64,
    pub height: f64,
    pub stats: SolveStats,
    pub measurements: Vec<Measurement>,
    pub displacement_file: PathBuf,
    pub vtk_file: PathBuf,
}

impl ScenarioReport {
    pub fn measurement(&self, label: &str) -> Option<&Measurement> {
        self.measurements.iter().find(|m| m.label == label)
    }

    pub fn print(&self) {
        println!("info: {} test results", self.test_type);
        println!(
            "  - specimen: {:e} x {:e} m, {} nodes, {} elements",
            self.width, self.height, self.nodes, self.elements
        );
        for m in &self.measurements {
            match (m.reference, m.relative_error()) {
                (Some(reference), Some(error)) => println!(
                    "  - {}: {:e} {} (theory {:e}, error {:.3}%)",
                    m.label,
                    m.value,
                    m.unit,
                    reference,
                    error * 100.0
                ),
                _ => println!("  - {}: {:e} {}", m.label, m.value, m.unit),
            }
        }
    }
}

/// Registers the matrix material on tag 1, and the fiber material on tag 2
/// for composite runs
pub fn material_setup(config: &Config) -> (MaterialLibrary, TagMaterials) {
    let mut library = MaterialLibrary::new();
    let mut tags = TagMaterials::new();

    tags.insert(MATRIX_TAG, library.add(config.material.clone()));
    if config.test_type == TestType::Composite {
        tags.insert(FIBER_TAG, library.add(config.fiber_or_matrix()));
    }

    (library, tags)
}

fn sorted_by_y(mesh: &Mesh, ids: &[usize]) -> Result<Vec<(usize, f64)>> {
    let mut nodes = ids
        .iter()
        .map(|&id| mesh.node(id).map(|n| (id, n.vertex.y)))
        .collect::<Result<Vec<_>>>()?;
    nodes.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(nodes)
}

/// Splits `total` over nodes of a straight edge in proportion to the
/// half-segments each node owns
///
/// # Arguments
/// * `positions` - Node ids with their coordinate along the edge, sorted
/// * `total` - The resultant force
///
/// # Returns
/// The force of each node, or a mesh error when several nodes share one
/// position and the edge has no length
fn tributary_forces(positions: &[(usize, f64)], total: f64) -> Result<Vec<(usize, f64)>> {
    match positions {
        [] => Ok(Vec::new()),
        [(id, _)] => Ok(vec![(*id, total)]),
        _ => {
            let n = positions.len();
            let span = positions[n - 1].1 - positions[0].1;
            if !(span > 0.0) {
                return Err(FemError::Mesh(format!(
                    "Loaded edge of {n} nodes has zero length, cannot split the force"
                )));
            }
            Ok((0..n)
                .map(|i| {
                    let lower = positions[i.saturating_sub(1)].1;
                    let upper = positions[(i + 1).min(n - 1)].1;
                    (positions[i].0, total * 0.5 * (upper - lower) / span)
                })
                .collect())
        }
    }
}

/// Boundary conditions of a traction specimen
///
/// The left edge is blocked along x, nodes at mid-height are blocked along y,
/// and the total force is spread along x over the right edge.
pub fn traction_conditions(mesh: &Mesh, force: f64) -> Result<BoundaryConditions> {
    let bbox = mesh
        .bounding_box()
        .ok_or_else(|| FemError::Mesh("Mesh has no nodes".to_owned()))?;
    let left = mesh.boundary_nodes(Side::Left);
    let right = mesh.boundary_nodes(Side::Right);
    if left.is_empty() || right.is_empty() {
        return Err(FemError::Mesh(
            "Specimen needs nodes on its left and right edges".to_owned(),
        ));
    }

    let mut bcs = BoundaryConditions::new();
    for &id in &left {
        bcs.fix_node_x(id)?;
    }

    let mut mid = mesh.nodes_at_y(bbox.mid_height());
    if mid.is_empty() {
        println!("warning [scenario]: no node at mid-height, blocking y on the nearest left node");
        let target = Vertex::new(bbox.x_min, bbox.mid_height());
        mid.extend(mesh.nearest_node(&left, &target));
    }
    for &id in &mid {
        bcs.fix_node_y(id)?;
    }

    for (id, fx) in tributary_forces(&sorted_by_y(mesh, &right)?, force)? {
        bcs.add_force_x(id, fx)?;
    }

    Ok(bcs)
}

/// Boundary conditions of a cantilever
///
/// # Returns
/// The conditions and the id of the loaded node
pub fn flexion_conditions(mesh: &Mesh, force: f64) -> Result<(BoundaryConditions, usize)> {
    let bbox = mesh
        .bounding_box()
        .ok_or_else(|| FemError::Mesh("Mesh has no nodes".to_owned()))?;
    let left = mesh.boundary_nodes(Side::Left);
    if left.is_empty() {
        return Err(FemError::Mesh("Cantilever needs nodes on its left edge".to_owned()));
    }

    let mut bcs = BoundaryConditions::new();
    for &id in &left {
        bcs.fix_node(id)?;
    }

    let right = mesh.boundary_nodes(Side::Right);
    let load_node = mesh
        .nearest_node(&right, &Vertex::new(bbox.x_max, bbox.mid_height()))
        .ok_or_else(|| FemError::Mesh("Cantilever needs nodes on its right edge".to_owned()))?;
    bcs.add_force_y(load_node, force)?;

    Ok((bcs, load_node))
}

fn mean_displacement(solver: &Solver, ids: &[usize], y: bool) -> Result<f64> {
    if ids.is_empty() {
        return Ok(0.0);
    }
    let mut sum = 0.0;
    for &id in ids {
        let (ux, uy) = solver.node_displacement(id)?;
        sum += if y { uy } else { ux };
    }
    Ok(sum / ids.len() as f64)
}

/// Mean right edge elongation and mean lateral contraction
fn stretch(solver: &Solver) -> Result<(f64, f64)> {
    let mesh = solver.mesh();
    let ux = mean_displacement(solver, &mesh.boundary_nodes(Side::Right), false)?;
    let top = mean_displacement(solver, &mesh.boundary_nodes(Side::Top), true)?;
    let bottom = mean_displacement(solver, &mesh.boundary_nodes(Side::Bottom), true)?;
    Ok((ux, 0.5 * (top.abs() + bottom.abs())))
}

/// Runs the configured test on a mesh that is already loaded
///
/// # Arguments
/// * `mesh` - The specimen, its elements are initialized by the solver
/// * `materials` - The library element materials point into
/// * `config` - Test type, loads, solver settings and output location
pub fn run_on_mesh(
    mesh: &mut Mesh,
    materials: &MaterialLibrary,
    config: &Config,
) -> Result<ScenarioReport> {
    let bbox = mesh
        .bounding_box()
        .ok_or_else(|| FemError::Mesh("Mesh has no nodes".to_owned()))?;
    let (width, height) = (bbox.width(), bbox.height());
    if width <= 0.0 || height <= 0.0 {
        return Err(FemError::Mesh(format!(
            "Specimen must have a positive size, got {width} x {height}"
        )));
    }
    println!(
        "info: {} test on a {width:e} x {height:e} m specimen",
        config.test_type
    );

    let force = config.force_value;
    let (bcs, load_node) = match config.test_type {
        TestType::Traction | TestType::Composite => (traction_conditions(mesh, force)?, None),
        TestType::Flexion => {
            let (bcs, node) = flexion_conditions(mesh, force)?;
            (bcs, Some(node))
        }
    };
    bcs.print_summary();

    let (nodes, elements) = (mesh.node_count(), mesh.element_count());
    let mut solver = Solver::new(mesh, materials, config.solver.clone())?;
    solver.assemble()?;
    solver.apply_boundary_conditions(&bcs)?;
    let stats = solver.solve()?;

    let displacement_file = config.displacement_path();
    let vtk_file = config.vtk_path();
    write_displacement_table(&displacement_file, solver.mesh(), solver.displacements()?)?;
    write_vtk(&vtk_file, solver.mesh(), solver.displacements()?)?;

    let e = config.material.axial_modulus();
    let nu = config.material.major_poisson_ratio();
    let measurements = match (config.test_type, load_node) {
        (TestType::Flexion, Some(node)) => {
            let (_, uy) = solver.node_displacement(node)?;
            let inertia = f64::powi(height, 3) / 12.0;
            vec![Measurement::new(
                "deflection",
                uy.abs(),
                Some(force.abs() * f64::powi(width, 3) / (3.0 * e * inertia)),
                "m",
            )]
        }
        (TestType::Composite, _) => {
            let (ux, uy) = stretch(&solver)?;
            let strain_x = ux / width;
            let strain_y = -uy / (0.5 * height);
            let stress_x = force / height;
            vec![
                Measurement::new("elongation", ux, None, "m"),
                Measurement::new("contraction", uy, None, "m"),
                Measurement::new("effective modulus", stress_x / strain_x, Some(e), "Pa"),
                Measurement::new("effective poisson ratio", -strain_y / strain_x, Some(nu), ""),
            ]
        }
        _ => {
            let (ux, uy) = stretch(&solver)?;
            vec![
                Measurement::new("elongation", ux, Some(force * width / (height * e)), "m"),
                Measurement::new("contraction", uy, Some(nu * force / (2.0 * e)), "m"),
            ]
        }
    };

    let report = ScenarioReport {
        test_type: config.test_type,
        nodes,
        elements,
        width,
        height,
        stats,
        measurements,
        displacement_file,
        vtk_file,
    };
    report.print();

    Ok(report)
}

/// Loads the configured mesh and runs the configured test
pub fn run(config: &Config) -> Result<ScenarioReport> {
    let (materials, tags) = material_setup(config);
    let (mut mesh, _) = read_gmsh_file(&config.mesh_file, &tags)?;
    run_on_mesh(&mut mesh, &materials, config)
}
