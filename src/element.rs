//! Constant strain triangle kernel.
//!
//! Strain is uniform over a linear triangle, so the stiffness integral is exact
//! with a single evaluation: `Ke = area * Bᵗ C B`.

use nalgebra::{matrix, Matrix3, SMatrix, Vector3};

use crate::datatypes::{Element, ElementStatus, ElementStiffness, Node, Vertex};
use crate::material::Material;

/// Elements with an area below this are degenerate
pub const AREA_EPSILON: f64 = 1e-12;

/// Signed shoelace area, positive for counter-clockwise vertices
pub fn signed_area(v0: &Vertex, v1: &Vertex, v2: &Vertex) -> f64 {
    0.5 * (v0.x * (v1.y - v2.y) + v1.x * (v2.y - v0.y) + v2.x * (v0.y - v1.y))
}

/// Calculates the area of a triangle
///
/// # Returns
/// The unsigned area, identical for any ordering of the vertices
pub fn compute_element_area(v0: &Vertex, v1: &Vertex, v2: &Vertex) -> f64 {
    signed_area(v0, v1, v2).abs()
}

/// Calculates the strain-displacement matrix of a triangle
///
/// Row 0 is εx, row 1 is εy, row 2 is γxy against the dofs
/// [ux1, uy1, ux2, uy2, ux3, uy3]. With `b_i = y_{i+1} - y_{i-1}` and
/// `c_i = x_{i-1} - x_{i+1}` the sign of `area` follows the vertex orientation;
/// stiffness is insensitive to it, recovered stress is not.
///
/// # Returns
/// A 3x6 strain-displacement matrix
pub fn compute_strain_displacement_matrix(
    v0: &Vertex,
    v1: &Vertex,
    v2: &Vertex,
    area: f64,
) -> SMatrix<f64, 3, 6> {
    let beta_1 = v1.y - v2.y;
    let beta_2 = v2.y - v0.y;
    let beta_3 = v0.y - v1.y;

    let gamma_1 = v2.x - v1.x;
    let gamma_2 = v0.x - v2.x;
    let gamma_3 = v1.x - v0.x;

    let mut strain_displacement_mat: SMatrix<f64, 3, 6> = matrix![
        beta_1, 0., beta_2, 0., beta_3, 0.;
        0., gamma_1, 0., gamma_2, 0., gamma_3;
        gamma_1, beta_1, gamma_2, beta_2, gamma_3, beta_3;
    ];

    strain_displacement_mat /= 2.0 * area;

    strain_displacement_mat
}

/// Computes the stiffness matrix of a non-degenerate triangle
///
/// # Arguments
/// * `area` - The unsigned element area
/// * `stress_strain_mat` - The plane stress constitutive matrix
///
/// # Returns
/// A symmetric 6x6 stiffness matrix
pub fn compute_element_stiffness_matrix(
    v0: &Vertex,
    v1: &Vertex,
    v2: &Vertex,
    area: f64,
    stress_strain_mat: &Matrix3<f64>,
) -> ElementStiffness {
    let strain_displacement_mat = compute_strain_displacement_matrix(v0, v1, v2, area);

    let stiffness =
        (strain_displacement_mat.transpose() * stress_strain_mat) * strain_displacement_mat * area;

    // round-off can break the exact symmetry of Bᵗ C B
    (stiffness + stiffness.transpose()) * 0.5
}

/// Recovers (σx, σy, τxy) from the six nodal displacements of a triangle
pub fn compute_element_stress(
    v0: &Vertex,
    v1: &Vertex,
    v2: &Vertex,
    stress_strain_mat: &Matrix3<f64>,
    displacements: &SMatrix<f64, 6, 1>,
) -> Vector3<f64> {
    let area = signed_area(v0, v1, v2);
    stress_strain_mat * compute_strain_displacement_matrix(v0, v1, v2, area) * displacements
}

impl Element {
    /// Stores the unsigned area of the triangle formed by `n1`, `n2`, `n3`
    pub fn compute_area(&mut self, n1: &Node, n2: &Node, n3: &Node) -> f64 {
        self.area = compute_element_area(&n1.vertex, &n2.vertex, &n3.vertex);
        self.area
    }

    /// Computes and stores the element stiffness.
    ///
    /// A degenerate triangle keeps a zero stiffness and is flagged; so is an
    /// element without material. Geometry is checked first, so a flat triangle
    /// without material is reported as degenerate. Call
    /// [`Element::compute_area`] first.
    pub fn compute_ke(&mut self, n1: &Node, n2: &Node, n3: &Node, material: Option<&Material>) {
        self.stiffness = ElementStiffness::zeros();

        if self.area < AREA_EPSILON {
            self.status = ElementStatus::Degenerate;
            return;
        }

        let material = match material {
            Some(m) => m,
            None => {
                self.status = ElementStatus::MissingMaterial;
                return;
            }
        };

        self.stiffness = compute_element_stiffness_matrix(
            &n1.vertex,
            &n2.vertex,
            &n3.vertex,
            self.area,
            &material.stiffness_matrix(),
        );
        self.status = ElementStatus::Active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::MATRIX_TAG;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, Matrix6, SVector};

    fn steel() -> Material {
        Material::isotropic("steel", 200e9, 0.3, 7850.0)
    }

    fn stiffness_of(vertices: [Vertex; 3], material: &Material) -> ElementStiffness {
        let area = compute_element_area(&vertices[0], &vertices[1], &vertices[2]);
        compute_element_stiffness_matrix(
            &vertices[0],
            &vertices[1],
            &vertices[2],
            area,
            &material.stiffness_matrix(),
        )
    }

    fn general_triangle() -> [Vertex; 3] {
        [
            Vertex::new(0.3, -0.2),
            Vertex::new(2.1, 0.4),
            Vertex::new(0.9, 1.7),
        ]
    }

    #[test]
    fn right_triangle_area() {
        let a = Vertex::new(0.0, 0.0);
        let b = Vertex::new(3.0, 0.0);
        let c = Vertex::new(0.0, 4.0);

        assert_relative_eq!(compute_element_area(&a, &b, &c), 6.0);
        assert_relative_eq!(signed_area(&a, &b, &c), 6.0);
        assert_relative_eq!(signed_area(&a, &c, &b), -6.0);
    }

    #[test]
    fn area_is_reorder_invariant() {
        let [a, b, c] = general_triangle();
        let reference = compute_element_area(&a, &b, &c);
        for (p, q, r) in [(a, c, b), (b, a, c), (b, c, a), (c, a, b), (c, b, a)] {
            assert_relative_eq!(compute_element_area(&p, &q, &r), reference, max_relative = 1e-14);
            assert_relative_eq!(signed_area(&p, &q, &r).abs(), reference, max_relative = 1e-14);
        }
    }

    #[test]
    fn strain_displacement_sign_convention() {
        // unit right triangle, counter-clockwise
        let a = Vertex::new(0.0, 0.0);
        let b = Vertex::new(1.0, 0.0);
        let c = Vertex::new(0.0, 1.0);
        let bmat = compute_strain_displacement_matrix(&a, &b, &c, 0.5);

        let expected = SMatrix::<f64, 3, 6>::from_row_slice(&[
            -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, //
            0.0, -1.0, 0.0, 0.0, 0.0, 1.0, //
            -1.0, -1.0, 0.0, 1.0, 1.0, 0.0,
        ]);
        for i in 0..3 {
            for j in 0..6 {
                assert_relative_eq!(bmat[(i, j)], expected[(i, j)], epsilon = 1e-15);
            }
        }
    }

    #[test]
    fn uniform_stretch_gives_uniform_strain() {
        let [a, b, c] = general_triangle();
        let area = signed_area(&a, &b, &c);
        let bmat = compute_strain_displacement_matrix(&a, &b, &c, area);

        // u = 0.01 x, v = -0.003 y, plus a shear term 0.002 y in u
        let u = SVector::<f64, 6>::from_iterator([a, b, c].iter().flat_map(|v| {
            [0.01 * v.x + 0.002 * v.y, -0.003 * v.y]
        }));
        let strain = bmat * u;

        assert_relative_eq!(strain[0], 0.01, epsilon = 1e-14);
        assert_relative_eq!(strain[1], -0.003, epsilon = 1e-14);
        assert_relative_eq!(strain[2], 0.002, epsilon = 1e-14);
    }

    #[test]
    fn stiffness_is_symmetric() {
        let ke = stiffness_of(general_triangle(), &steel());
        for i in 0..6 {
            for j in 0..6 {
                assert_eq!(ke[(i, j)], ke[(j, i)]);
            }
        }
    }

    #[test]
    fn stiffness_annihilates_rigid_body_modes() {
        let vertices = general_triangle();
        let ke = stiffness_of(vertices, &steel());
        let scale = ke.amax();

        let translation_x = SVector::<f64, 6>::from_row_slice(&[1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
        let translation_y = SVector::<f64, 6>::from_row_slice(&[0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
        let rotation = SVector::<f64, 6>::from_iterator(
            vertices.iter().flat_map(|v| [-v.y, v.x]),
        );

        for mode in [translation_x, translation_y, rotation] {
            let forces = ke * mode;
            assert!(forces.amax() < 1e-10 * scale, "rigid mode produced {forces}");
        }
    }

    #[test]
    fn stiffness_has_rank_three_and_no_negative_eigenvalues() {
        let ke = stiffness_of(general_triangle(), &steel());
        let eigen = Matrix6::from(ke).symmetric_eigen();
        let scale = eigen.eigenvalues.amax();

        let zero_modes = eigen
            .eigenvalues
            .iter()
            .filter(|l| l.abs() < 1e-10 * scale)
            .count();
        let positive_modes = eigen
            .eigenvalues
            .iter()
            .filter(|l| **l > 1e-10 * scale)
            .count();

        assert_eq!(zero_modes, 3);
        assert_eq!(positive_modes, 3);

        let rank = DMatrix::from_iterator(6, 6, ke.iter().cloned()).rank(1e-10 * scale);
        assert_eq!(rank, 3);
    }

    #[test]
    fn stiffness_does_not_depend_on_orientation() {
        let [a, b, c] = general_triangle();
        let ccw = stiffness_of([a, b, c], &steel());
        let cw = stiffness_of([a, c, b], &steel());

        // swapping nodes 2 and 3 permutes dof blocks 1 and 2
        let perm = [0, 1, 4, 5, 2, 3];
        for i in 0..6 {
            for j in 0..6 {
                assert_relative_eq!(cw[(i, j)], ccw[(perm[i], perm[j])], max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn stress_of_uniaxial_stretch() {
        let material = Material::isotropic("mat", 1000.0, 0.0, 1.0);
        let [a, b, c] = general_triangle();

        for vertices in [[a, b, c], [a, c, b]] {
            let u = SVector::<f64, 6>::from_iterator(
                vertices.iter().flat_map(|v| [0.001 * v.x, 0.0]),
            );
            let stress = compute_element_stress(
                &vertices[0],
                &vertices[1],
                &vertices[2],
                &material.stiffness_matrix(),
                &u,
            );
            assert_relative_eq!(stress[0], 1.0, max_relative = 1e-12);
            assert_relative_eq!(stress[1], 0.0, epsilon = 1e-12);
            assert_relative_eq!(stress[2], 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn degenerate_element_gets_zero_stiffness() {
        let n1 = Node::new(1, 0.0, 0.0);
        let n2 = Node::new(2, 1.0, 1.0);
        let n3 = Node::new(3, 2.0, 2.0);
        let mut element = Element::new(1, [1, 2, 3], MATRIX_TAG, None);

        assert_eq!(element.compute_area(&n1, &n2, &n3), 0.0);
        element.compute_ke(&n1, &n2, &n3, Some(&steel()));

        assert_eq!(element.status, ElementStatus::Degenerate);
        assert_eq!(element.stiffness, ElementStiffness::zeros());
    }

    #[test]
    fn element_without_material_is_flagged() {
        let n1 = Node::new(1, 0.0, 0.0);
        let n2 = Node::new(2, 1.0, 0.0);
        let n3 = Node::new(3, 0.0, 1.0);
        let mut element = Element::new(1, [1, 2, 3], 7, None);

        element.compute_area(&n1, &n2, &n3);
        element.compute_ke(&n1, &n2, &n3, None);

        assert_eq!(element.status, ElementStatus::MissingMaterial);
        assert!(!element.is_active());
    }

    #[test]
    fn flat_element_without_material_is_degenerate() {
        let n1 = Node::new(1, 0.0, 0.0);
        let n2 = Node::new(2, 1.0, 0.0);
        let n3 = Node::new(3, 3.0, 0.0);
        let mut element = Element::new(1, [1, 2, 3], 7, None);

        element.compute_area(&n1, &n2, &n3);
        element.compute_ke(&n1, &n2, &n3, None);

        assert_eq!(element.status, ElementStatus::Degenerate);
        assert_eq!(element.stiffness, ElementStiffness::zeros());
    }
}
