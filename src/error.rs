use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FemError>;

#[derive(Debug, Error)]
pub enum FemError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Mesh error: {0}")]
    Mesh(String),

    #[error("Reference error: node {0} not found")]
    NodeNotFound(usize),

    #[error("Reference error: element {0} not found")]
    ElementNotFound(usize),

    #[error("Boundary error: dof {dof} is outside the system ({dofs} dofs)")]
    InvalidDof { dof: usize, dofs: usize },

    #[error(
        "Boundary error: dof {dof} already prescribed to {existing}, refusing {requested}"
    )]
    ConflictingDirichlet {
        dof: usize,
        existing: f64,
        requested: f64,
    },

    #[error("Solver error: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error(
        "Solver error: incomplete factorization failed at row {row} (pivot {pivot:e}); \
         the system is singular or not positive definite, check the displacement constraints"
    )]
    FactorizationFailed { row: usize, pivot: f64 },

    #[error(
        "Solver error: conjugate gradient did not converge after {iterations} iterations \
         (relative residual {residual:e})"
    )]
    NotConverged { iterations: u64, residual: f64 },

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Post Processor error: {0}")]
    PostProcessor(String),
}

impl FemError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> FemError {
        FemError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(line: usize, message: impl Into<String>) -> FemError {
        FemError::Parse {
            line,
            message: message.into(),
        }
    }
}
