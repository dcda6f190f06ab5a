pub mod assembly;
pub mod boundary;
pub mod config;
pub mod datatypes;
pub mod element;
pub mod error;
pub mod material;
pub mod mesh;
pub mod mesh_reader;
pub mod post_processor;
pub mod preconditioner;
pub mod scenario;
pub mod solver;

pub use boundary::BoundaryConditions;
pub use config::{Config, TestType};
pub use error::{FemError, Result};
pub use material::{Material, MaterialId, MaterialLibrary, TagMaterials};
pub use mesh::Mesh;
pub use solver::{SolveStats, Solver, SolverSettings, SolverState};
