use std::collections::HashMap;

use nalgebra::{matrix, Matrix3};

/// Index of a material inside a [`MaterialLibrary`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub usize);

/// Physical tag to material association, supplied before mesh loading
pub type TagMaterials = HashMap<usize, MaterialId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Isotropic,
    Orthotropic,
}

/// Linear elastic plane stress material.
///
/// Parameters are taken as given: `E > 0` and `0 <= nu < 1` (isotropic) are the
/// caller's responsibility.
#[derive(Debug, Clone, PartialEq)]
pub enum Material {
    Isotropic {
        name: String,
        youngs_modulus: f64,
        poisson_ratio: f64,
        density: f64,
    },
    /// Fiber-like material with principal axes aligned to x (1) and y (2)
    Orthotropic {
        name: String,
        e1: f64,
        e2: f64,
        nu12: f64,
        g12: f64,
        density: f64,
    },
}

impl Material {
    pub fn isotropic(name: &str, youngs_modulus: f64, poisson_ratio: f64, density: f64) -> Material {
        Material::Isotropic {
            name: name.to_owned(),
            youngs_modulus,
            poisson_ratio,
            density,
        }
    }

    pub fn orthotropic(name: &str, e1: f64, e2: f64, nu12: f64, g12: f64, density: f64) -> Material {
        Material::Orthotropic {
            name: name.to_owned(),
            e1,
            e2,
            nu12,
            g12,
            density,
        }
    }

    /// Calculates the plane stress constitutive matrix
    ///
    /// # Returns
    /// A 3x3 matrix mapping (εx, εy, γxy) to (σx, σy, τxy)
    pub fn stiffness_matrix(&self) -> Matrix3<f64> {
        match self {
            Material::Isotropic {
                youngs_modulus,
                poisson_ratio,
                ..
            } => {
                let nu = *poisson_ratio;
                let mut stress_strain_mat: Matrix3<f64> = matrix![
                    1.0, nu, 0.0;
                    nu, 1.0, 0.0;
                    0.0, 0.0, (1.0 - nu) / 2.0;
                ];
                stress_strain_mat *= youngs_modulus / (1.0 - f64::powi(nu, 2));
                stress_strain_mat
            }
            Material::Orthotropic {
                e1, e2, nu12, g12, ..
            } => {
                let nu21 = nu12 * e2 / e1;
                let d = 1.0 - nu12 * nu21;
                matrix![
                    e1 / d, nu12 * e2 / d, 0.0;
                    nu12 * e2 / d, e2 / d, 0.0;
                    0.0, 0.0, *g12;
                ]
            }
        }
    }

    pub fn density(&self) -> f64 {
        match self {
            Material::Isotropic { density, .. } | Material::Orthotropic { density, .. } => {
                *density
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Material::Isotropic { name, .. } | Material::Orthotropic { name, .. } => name,
        }
    }

    pub fn kind(&self) -> MaterialKind {
        match self {
            Material::Isotropic { .. } => MaterialKind::Isotropic,
            Material::Orthotropic { .. } => MaterialKind::Orthotropic,
        }
    }

    /// Young's modulus along x, used for analytical comparisons
    pub fn axial_modulus(&self) -> f64 {
        match self {
            Material::Isotropic { youngs_modulus, .. } => *youngs_modulus,
            Material::Orthotropic { e1, .. } => *e1,
        }
    }

    /// Contraction along y under a stress along x
    pub fn major_poisson_ratio(&self) -> f64 {
        match self {
            Material::Isotropic { poisson_ratio, .. } => *poisson_ratio,
            Material::Orthotropic { nu12, .. } => *nu12,
        }
    }
}

/// Owns every material of a run. Elements refer to entries by [`MaterialId`].
#[derive(Debug, Clone, Default)]
pub struct MaterialLibrary {
    materials: Vec<Material>,
}

impl MaterialLibrary {
    pub fn new() -> MaterialLibrary {
        MaterialLibrary::default()
    }

    pub fn add(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    pub fn get(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MaterialId, &Material)> {
        self.materials
            .iter()
            .enumerate()
            .map(|(i, m)| (MaterialId(i), m))
    }
}
