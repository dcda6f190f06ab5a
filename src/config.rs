use std::{fmt, path::Path, path::PathBuf, str::FromStr};

use json::JsonValue;

use crate::{
    error::{FemError, Result},
    material::Material,
    solver::SolverSettings,
};

pub const DEFAULT_MESH_FILE: &str = "mesh/rectangle1.msh";
pub const DEFAULT_OUTPUT_DIR: &str = "results";
pub const DEFAULT_OUTPUT_PREFIX: &str = "test";
pub const DEFAULT_FORCE: f64 = 1000.0;

pub const DEFAULT_YOUNGS_MODULUS: f64 = 200e9;
pub const DEFAULT_POISSON_RATIO: f64 = 0.3;
pub const DEFAULT_DENSITY: f64 = 7850.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestType {
    Traction,
    Flexion,
    Composite,
}

impl FromStr for TestType {
    type Err = FemError;

    fn from_str(s: &str) -> Result<TestType> {
        match s.trim().to_ascii_lowercase().as_str() {
            "traction" => Ok(TestType::Traction),
            "flexion" => Ok(TestType::Flexion),
            "composite" => Ok(TestType::Composite),
            other => Err(FemError::Input(format!(
                "Unknown test type '{other}', expected traction, flexion or composite"
            ))),
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestType::Traction => "traction",
            TestType::Flexion => "flexion",
            TestType::Composite => "composite",
        };
        write!(f, "{name}")
    }
}

/// Everything a run needs besides the mesh itself
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub test_type: TestType,
    pub mesh_file: PathBuf,
    /// Material of triangles tagged as matrix
    pub material: Material,
    /// Material of triangles tagged as fiber, composite runs only
    pub fiber: Option<Material>,
    /// Total applied force in newtons
    pub force_value: f64,
    pub output_dir: PathBuf,
    pub output_prefix: String,
    pub solver: SolverSettings,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            test_type: TestType::Traction,
            mesh_file: PathBuf::from(DEFAULT_MESH_FILE),
            material: Material::isotropic(
                "matrix",
                DEFAULT_YOUNGS_MODULUS,
                DEFAULT_POISSON_RATIO,
                DEFAULT_DENSITY,
            ),
            fiber: None,
            force_value: DEFAULT_FORCE,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_owned(),
            solver: SolverSettings::default(),
        }
    }
}

fn read_f64(section: &JsonValue, path: &str, key: &str, default: f64) -> Result<f64> {
    if !section.has_key(key) {
        return Ok(default);
    }
    section[key]
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| FemError::Input(format!("Input json field {path}{key} must be a number")))
}

fn read_u64(section: &JsonValue, path: &str, key: &str, default: u64) -> Result<u64> {
    if !section.has_key(key) {
        return Ok(default);
    }
    section[key].as_u64().ok_or_else(|| {
        FemError::Input(format!(
            "Input json field {path}{key} must be a non-negative integer"
        ))
    })
}

fn read_str<'a>(section: &'a JsonValue, path: &str, key: &str) -> Result<Option<&'a str>> {
    if !section.has_key(key) {
        return Ok(None);
    }
    section[key]
        .as_str()
        .map(Some)
        .ok_or_else(|| FemError::Input(format!("Input json field {path}{key} must be a string")))
}

fn object<'a>(root: &'a JsonValue, key: &str) -> Result<Option<&'a JsonValue>> {
    if !root.has_key(key) {
        return Ok(None);
    }
    if !root[key].is_object() {
        return Err(FemError::Input(format!(
            "Input json field {key} must be an object"
        )));
    }
    Ok(Some(&root[key]))
}

fn check_isotropic(path: &str, youngs_modulus: f64, poisson_ratio: f64) -> Result<()> {
    if youngs_modulus <= 0.0 {
        return Err(FemError::Input(format!(
            "{path} youngs_modulus must be positive, got {youngs_modulus}"
        )));
    }
    if !(0.0..1.0).contains(&poisson_ratio) {
        return Err(FemError::Input(format!(
            "{path} poisson_ratio must lie in [0, 1), got {poisson_ratio}"
        )));
    }
    Ok(())
}

fn parse_matrix_material(section: &JsonValue) -> Result<Material> {
    let youngs_modulus = read_f64(
        section,
        "material.",
        "youngs_modulus",
        DEFAULT_YOUNGS_MODULUS,
    )?;
    let poisson_ratio = read_f64(section, "material.", "poisson_ratio", DEFAULT_POISSON_RATIO)?;
    let density = read_f64(section, "material.", "density", DEFAULT_DENSITY)?;
    check_isotropic("material", youngs_modulus, poisson_ratio)?;

    Ok(Material::isotropic(
        "matrix",
        youngs_modulus,
        poisson_ratio,
        density,
    ))
}

/// Parses the fiber section. An orthotropic fiber is selected with
/// `"type": "orthotropic"` or by the presence of `e1`; missing isotropic keys
/// fall back to the matrix values.
fn parse_fiber_material(section: &JsonValue, matrix: &Material) -> Result<Material> {
    let path = "fiber.";
    let kind = read_str(section, path, "type")?;
    let orthotropic = match kind {
        Some(k) if k.eq_ignore_ascii_case("orthotropic") => true,
        Some(k) if k.eq_ignore_ascii_case("isotropic") => false,
        Some(k) => {
            return Err(FemError::Input(format!(
                "Unknown fiber type '{k}', expected isotropic or orthotropic"
            )))
        }
        None => section.has_key("e1"),
    };

    let density = read_f64(section, path, "density", matrix.density())?;

    if orthotropic {
        let mut values = [0.0; 4];
        for (value, key) in values.iter_mut().zip(["e1", "e2", "nu12", "g12"]) {
            if !section.has_key(key) {
                return Err(FemError::Input(format!(
                    "Input json missing {path}{key} for an orthotropic fiber"
                )));
            }
            *value = read_f64(section, path, key, 0.0)?;
        }
        let [e1, e2, nu12, g12] = values;
        if e1 <= 0.0 || e2 <= 0.0 || g12 <= 0.0 {
            return Err(FemError::Input(
                "fiber moduli e1, e2 and g12 must be positive".to_owned(),
            ));
        }
        if nu12 * nu12 * e2 / e1 >= 1.0 {
            return Err(FemError::Input(format!(
                "fiber nu12 = {nu12} makes the plane stress law singular"
            )));
        }
        return Ok(Material::orthotropic("fiber", e1, e2, nu12, g12, density));
    }

    let youngs_modulus = read_f64(section, path, "youngs_modulus", matrix.axial_modulus())?;
    let poisson_ratio = read_f64(
        section,
        path,
        "poisson_ratio",
        matrix.major_poisson_ratio(),
    )?;
    check_isotropic("fiber", youngs_modulus, poisson_ratio)?;

    Ok(Material::isotropic(
        "fiber",
        youngs_modulus,
        poisson_ratio,
        density,
    ))
}

impl Config {
    /// Parses a json configuration. Absent keys keep their defaults.
    pub fn parse(contents: &str) -> Result<Config> {
        let root = json::parse(contents)
            .map_err(|err| FemError::Input(format!("Error in input file json: {err}")))?;
        if !root.is_object() {
            return Err(FemError::Input(
                "Input json must be an object at the top level".to_owned(),
            ));
        }

        let mut config = Config::default();

        if let Some(test_type) = read_str(&root, "", "test_type")? {
            config.test_type = test_type.parse()?;
        }
        if let Some(mesh_file) = read_str(&root, "", "mesh_file")? {
            config.mesh_file = PathBuf::from(mesh_file);
        }
        if let Some(section) = object(&root, "material")? {
            config.material = parse_matrix_material(section)?;
        }
        if let Some(section) = object(&root, "fiber")? {
            config.fiber = Some(parse_fiber_material(section, &config.material)?);
        }
        config.force_value = read_f64(&root, "", "force_value", DEFAULT_FORCE)?;
        if let Some(output_dir) = read_str(&root, "", "output_dir")? {
            config.output_dir = PathBuf::from(output_dir);
        }
        if let Some(prefix) = read_str(&root, "", "output_prefix")? {
            config.output_prefix = prefix.to_owned();
        }

        if let Some(section) = object(&root, "solver")? {
            let solver = &mut config.solver;
            solver.tolerance = read_f64(section, "solver.", "tolerance", solver.tolerance)?;
            solver.max_iterations =
                read_u64(section, "solver.", "max_iterations", solver.max_iterations)?;
            solver.log_every = read_u64(section, "solver.", "log_every", solver.log_every)?;
        }
        if config.solver.tolerance <= 0.0 {
            return Err(FemError::Input(
                "solver.tolerance must be positive".to_owned(),
            ));
        }
        if config.solver.max_iterations == 0 {
            return Err(FemError::Input(
                "solver.max_iterations must be at least 1".to_owned(),
            ));
        }

        Ok(config)
    }

    /// Loads a configuration file, falling back to defaults when it cannot be
    /// read
    pub fn load(path: &Path) -> Result<Config> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config = Config::parse(&contents)?;
                println!("info: loaded configuration from {}", path.display());
                Ok(config)
            }
            Err(err) => {
                println!(
                    "warning [config]: cannot read {} ({err}), using defaults",
                    path.display()
                );
                Ok(Config::default())
            }
        }
    }

    /// Material used where no fiber material is configured
    pub fn fiber_or_matrix(&self) -> Material {
        self.fiber.clone().unwrap_or_else(|| self.material.clone())
    }

    pub fn displacement_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("displacement_{}.txt", self.output_prefix))
    }

    pub fn vtk_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("results_{}.vtk", self.output_prefix))
    }

    pub fn print(&self) {
        println!("info: configuration");
        println!("  - test type: {}", self.test_type);
        println!("  - mesh: {}", self.mesh_file.display());
        println!("  - matrix material: {:?}", self.material);
        if let Some(fiber) = &self.fiber {
            println!("  - fiber material: {fiber:?}");
        }
        println!("  - force: {:e} N", self.force_value);
        println!(
            "  - solver: tolerance {:e}, at most {} iterations",
            self.solver.tolerance, self.solver.max_iterations
        );
        println!("  - output: {}", self.output_dir.display());
    }
}
