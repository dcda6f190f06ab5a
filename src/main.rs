use std::path::PathBuf;

use clap::Parser;
use trifem::{config::Config, scenario, TestType};

/// Plane stress finite element tests on triangular meshes
#[derive(Debug, Parser)]
#[command(name = "trifem", version)]
struct Args {
    /// Json configuration file
    config: PathBuf,

    /// Mesh file, overrides the configuration
    #[arg(long)]
    mesh: Option<PathBuf>,

    /// traction, flexion or composite
    #[arg(long)]
    test_type: Option<TestType>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Logs conjugate gradient iterations
    #[arg(long)]
    verbose: bool,

    /// Hides progress bars
    #[arg(long)]
    no_progress: bool,
}

fn run(args: Args) -> trifem::Result<()> {
    let mut config = Config::load(&args.config)?;

    if let Some(mesh) = args.mesh {
        config.mesh_file = mesh;
    }
    if let Some(test_type) = args.test_type {
        config.test_type = test_type;
    }
    if let Some(output_dir) = args.output_dir {
        config.output_dir = output_dir;
    }
    config.solver.verbose = args.verbose;
    config.solver.show_progress = !args.no_progress;
    config.print();

    scenario::run(&config)?;
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(err) = run(args) {
        println!("error: {err}");
        std::process::exit(1)
    }
}
