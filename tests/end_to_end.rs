mod common;

use std::path::Path;

use approx::assert_relative_eq;
use trifem::{
    config::Config,
    datatypes::{dof_index, Axis},
    mesh_reader::{parse_gmsh, read_gmsh_file},
    post_processor::{read_displacement_table, write_displacement_table},
    scenario, BoundaryConditions, FemError, Material, MaterialLibrary, Solver, SolverSettings,
    SolverState, TagMaterials, TestType,
};

const LENGTH: f64 = 10.0;
const HEIGHT: f64 = 2.0;

fn quiet() -> SolverSettings {
    SolverSettings {
        show_progress: false,
        ..SolverSettings::default()
    }
}

fn write_mesh(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("specimen.msh");
    std::fs::write(&path, contents).unwrap();
    path
}

fn config(dir: &Path, test_type: TestType, mesh: &str) -> Config {
    Config {
        test_type,
        mesh_file: write_mesh(dir, mesh),
        output_dir: dir.join("results"),
        output_prefix: test_type.to_string(),
        solver: quiet(),
        ..Config::default()
    }
}

fn homogeneous() -> String {
    common::rectangle_msh(LENGTH, HEIGHT, 20, 4, |_, _| false)
}

/// Stiff horizontal band through the middle of the specimen
fn banded() -> String {
    common::rectangle_msh(LENGTH, HEIGHT, 20, 4, |_, y| (y - 1.0).abs() < 0.5)
}

#[test]
fn traction_matches_bar_theory() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), TestType::Traction, &homogeneous());

    let report = scenario::run(&config).unwrap();

    let elongation = report.measurement("elongation").unwrap();
    assert_relative_eq!(elongation.reference.unwrap(), 1000.0 * LENGTH / (HEIGHT * 200e9));
    assert!(elongation.relative_error().unwrap() < 0.01);

    let contraction = report.measurement("contraction").unwrap();
    assert_relative_eq!(contraction.reference.unwrap(), 0.3 * 1000.0 / (2.0 * 200e9));
    assert!(contraction.relative_error().unwrap() < 0.01);

    assert_eq!(report.nodes, 21 * 5);
    assert_eq!(report.elements, 160);
    assert!(report.stats.residual <= config.solver.tolerance);
    assert!(report.vtk_file.exists());

    // right edge nodes in the table carry the reported elongation
    let records = read_displacement_table(&report.displacement_file).unwrap();
    assert_eq!(records.len(), report.nodes);
    let right: Vec<f64> = records
        .iter()
        .filter(|r| (r.x - LENGTH).abs() < 1e-9)
        .map(|r| r.ux)
        .collect();
    assert_eq!(right.len(), 5);
    let mean = right.iter().sum::<f64>() / right.len() as f64;
    assert_relative_eq!(mean, elongation.value, max_relative = 1e-12);
}

#[test]
fn flexion_deflects_towards_the_load() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), TestType::Flexion, &homogeneous());

    let report = scenario::run(&config).unwrap();
    let deflection = report.measurement("deflection").unwrap();
    let theory = deflection.reference.unwrap();

    // linear triangles are stiffer than the beam in bending
    assert!(deflection.value > 0.3 * theory);
    assert!(deflection.value < 1.2 * theory);
}

#[test]
fn composite_of_one_material_has_matrix_properties() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), TestType::Composite, &banded());

    let report = scenario::run(&config).unwrap();
    let modulus = report.measurement("effective modulus").unwrap();
    let poisson = report.measurement("effective poisson ratio").unwrap();

    // no fiber configured, both tags share the matrix material
    assert!(modulus.relative_error().unwrap() < 0.01);
    assert!(poisson.relative_error().unwrap() < 0.01);
}

#[test]
fn stiff_fiber_raises_the_effective_modulus() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), TestType::Composite, &banded());
    config.fiber = Some(Material::isotropic("fiber", 400e9, 0.3, 2000.0));

    let report = scenario::run(&config).unwrap();
    let modulus = report.measurement("effective modulus").unwrap().value;

    // half the section is fiber
    assert!(modulus > 200e9);
    assert!(modulus < 400e9);
    assert_relative_eq!(modulus, 300e9, max_relative = 0.05);
}

#[test]
fn fiber_without_material_is_not_solved_as_void() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), TestType::Traction, &banded());

    let (_, tags) = scenario::material_setup(&config);
    let (_, statistics) = read_gmsh_file(&config.mesh_file, &tags).unwrap();
    assert!(statistics.unassigned_tags.contains(&2));
    assert_eq!(statistics.fiber_triangles, 80);

    // nodes inside the band touch no stiffness at all
    let result = scenario::run(&config);
    assert!(matches!(result, Err(FemError::FactorizationFailed { .. })));
}

#[test]
fn iteration_budget_is_not_reported_as_a_solution() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), TestType::Traction, &homogeneous());
    config.solver.max_iterations = 3;

    match scenario::run(&config) {
        Err(FemError::NotConverged {
            iterations,
            residual,
        }) => {
            assert_eq!(iterations, 3);
            assert!(residual > config.solver.tolerance);
        }
        other => panic!("expected NotConverged, got {other:?}"),
    }
}

#[test]
fn enclosed_void_is_solved_as_a_hole() {
    let dir = tempfile::tempdir().unwrap();
    // one interior cell of the 0.5 x 0.5 grid has no material
    let mesh = common::rectangle_msh(LENGTH, HEIGHT, 20, 4, |x, y| {
        (x - 4.75).abs() < 0.25 && (y - 1.25).abs() < 0.25
    });
    let config = config(dir.path(), TestType::Traction, &mesh);

    let (_, tags) = scenario::material_setup(&config);
    let (_, statistics) = read_gmsh_file(&config.mesh_file, &tags).unwrap();
    assert!(statistics.unassigned_tags.contains(&2));
    assert_eq!(statistics.fiber_triangles, 2);

    let report = scenario::run(&config).unwrap();
    let elongation = report.measurement("elongation").unwrap();

    // the hole makes the specimen more compliant than the full bar
    assert!(elongation.value > elongation.reference.unwrap());
    assert!(report.stats.residual <= config.solver.tolerance);
}

#[test]
fn unconstrained_mesh_reports_a_failure() {
    let mut library = MaterialLibrary::new();
    let mut tags = TagMaterials::new();
    tags.insert(1, library.add(Material::isotropic("steel", 200e9, 0.3, 7850.0)));
    let (mut mesh, _) = parse_gmsh(&homogeneous())
        .unwrap()
        .into_mesh(&tags)
        .unwrap();

    let mut bcs = BoundaryConditions::new();
    for id in mesh.boundary_nodes(trifem::mesh::Side::Right) {
        bcs.add_force_x(id, 100.0).unwrap();
    }

    let mut solver = Solver::new(&mut mesh, &library, quiet()).unwrap();
    solver.assemble().unwrap();
    solver.apply_boundary_conditions(&bcs).unwrap();

    assert!(solver.solve().is_err());
    assert_eq!(solver.state(), SolverState::Failed);
    assert!(solver.displacements().is_err());
}

#[test]
fn saved_table_reproduces_the_solution() {
    let mut library = MaterialLibrary::new();
    let mut tags = TagMaterials::new();
    tags.insert(1, library.add(Material::isotropic("aluminium", 70e9, 0.33, 2700.0)));
    let (mut mesh, _) = parse_gmsh(&common::rectangle_msh(3.0, 1.0, 6, 2, |_, _| false))
        .unwrap()
        .into_mesh(&tags)
        .unwrap();

    let left = mesh.boundary_nodes(trifem::mesh::Side::Left);
    let right = mesh.boundary_nodes(trifem::mesh::Side::Right);
    let mut bcs = BoundaryConditions::new();
    for &id in &left {
        bcs.fix_node(id).unwrap();
    }
    for &id in &right {
        bcs.add_force(id, 10.0, -25.0).unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("displacement_roundtrip.txt");

    let mut solver = Solver::new(&mut mesh, &library, quiet()).unwrap();
    solver.assemble().unwrap();
    solver.apply_boundary_conditions(&bcs).unwrap();
    solver.solve().unwrap();
    let u = solver.displacements().unwrap().clone();
    write_displacement_table(&path, solver.mesh(), &u).unwrap();

    let records = read_displacement_table(&path).unwrap();
    assert_eq!(records.len(), mesh.node_count());
    for (record, node) in records.iter().zip(mesh.nodes()) {
        assert_eq!(record.id, node.id);
        assert_eq!(record.x, node.vertex.x);
        assert_eq!(record.y, node.vertex.y);
        assert_eq!(record.ux, u[dof_index(node.id, Axis::X).unwrap()]);
        assert_eq!(record.uy, u[dof_index(node.id, Axis::Y).unwrap()]);
    }
}
