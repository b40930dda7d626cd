//! Plate constants by linear least squares
//!
//! Each equation of condition reads `a1·p + a2·q + a3·r = b`. The normal
//! equations of the over-determined system are accumulated in one pass and
//! the symmetric 3×3 system is solved by Cramer's rule.

use crate::error::DegenerateError;

/// Relative determinant below which the normal matrix counts as singular
const SINGULAR_TOLERANCE: f64 = 1e-12;

/// One linear observation `a1·p + a2·q + a3·r = b`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquationOfCondition {
    pub a1: f64,
    pub a2: f64,
    pub a3: f64,
    pub b: f64,
}

impl EquationOfCondition {
    pub fn new(a1: f64, a2: f64, a3: f64, b: f64) -> Self {
        Self { a1, a2, a3, b }
    }
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Least-squares `(p, q, r)` for the given equations.
///
/// # Errors
/// [DegenerateError::TooFewEquations] below three equations,
/// [DegenerateError::Singular] when the normal matrix is (numerically) singular,
/// e.g. for collinear star positions.
pub fn solve_plate_constants(
    equations: &[EquationOfCondition],
) -> Result<[f64; 3], DegenerateError> {
    if equations.len() < 3 {
        return Err(DegenerateError::TooFewEquations(equations.len()));
    }

    let mut n = [[0.0f64; 3]; 3];
    let mut rhs = [0.0f64; 3];
    for eq in equations {
        let a = [eq.a1, eq.a2, eq.a3];
        for i in 0..3 {
            for j in i..3 {
                n[i][j] += a[i] * a[j];
            }
            rhs[i] += a[i] * eq.b;
        }
    }
    // symmetric
    n[1][0] = n[0][1];
    n[2][0] = n[0][2];
    n[2][1] = n[1][2];

    let det = det3(&n);
    let scale = n[0][0] * n[1][1] * n[2][2];
    if !det.is_finite() || scale == 0.0 || det.abs() <= SINGULAR_TOLERANCE * scale.abs() {
        return Err(DegenerateError::Singular(det));
    }

    let mut solution = [0.0; 3];
    for (col, out) in solution.iter_mut().enumerate() {
        let mut m = n;
        for row in 0..3 {
            m[row][col] = rhs[row];
        }
        *out = det3(&m) / det;
    }
    Ok(solution)
}

/// Six plate constants mapping `(x, y)` onto `(u, v)`:
/// `u = a·x + b·y + c`, `v = d·x + e·y + f`, returned as `[a, b, c, d, e, f]`.
pub fn fit_affine(points: &[((f64, f64), (f64, f64))]) -> Result<[f64; 6], DegenerateError> {
    let u: Vec<EquationOfCondition> = points
        .iter()
        .map(|&((x, y), (u, _))| EquationOfCondition::new(x, y, 1.0, u))
        .collect();
    let v: Vec<EquationOfCondition> = points
        .iter()
        .map(|&((x, y), (_, v))| EquationOfCondition::new(x, y, 1.0, v))
        .collect();
    let [a, b, c] = solve_plate_constants(&u)?;
    let [d, e, f] = solve_plate_constants(&v)?;
    Ok([a, b, c, d, e, f])
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_recovers_exact_constants() {
        let (p, q, r) = (0.75, -1.25, 3.5);
        let equations: Vec<EquationOfCondition> = [(1.0, 2.0), (-3.0, 0.5), (4.0, -1.0), (0.2, 0.1), (7.0, 3.0)]
            .iter()
            .map(|&(x, y)| EquationOfCondition::new(x, y, 1.0, p * x + q * y + r))
            .collect();
        let sol = solve_plate_constants(&equations).unwrap();
        assert_relative_eq!(sol[0], p, epsilon = 1e-9);
        assert_relative_eq!(sol[1], q, epsilon = 1e-9);
        assert_relative_eq!(sol[2], r, epsilon = 1e-9);
    }

    #[test]
    fn test_least_squares_averages_noise() {
        // b = 2x + 1 with symmetric +-0.1 noise
        let equations = [
            EquationOfCondition::new(0.0, 0.0, 1.0, 1.1),
            EquationOfCondition::new(0.0, 0.0, 1.0, 0.9),
            EquationOfCondition::new(1.0, 0.0, 1.0, 3.1),
            EquationOfCondition::new(1.0, 0.0, 1.0, 2.9),
            EquationOfCondition::new(0.0, 1.0, 1.0, 1.0),
        ];
        let sol = solve_plate_constants(&equations).unwrap();
        assert_relative_eq!(sol[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(sol[1], 0.0, epsilon = 1e-9);
        assert_relative_eq!(sol[2], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_too_few_equations() {
        let eq = EquationOfCondition::new(1.0, 0.0, 1.0, 1.0);
        assert_eq!(
            solve_plate_constants(&[eq, eq]),
            Err(DegenerateError::TooFewEquations(2))
        );
    }

    #[test]
    fn test_collinear_points_are_degenerate() {
        let equations: Vec<EquationOfCondition> = (0..6)
            .map(|i| {
                let x = i as f64;
                EquationOfCondition::new(x, 2.0 * x + 1.0, 1.0, x)
            })
            .collect();
        assert!(matches!(
            solve_plate_constants(&equations),
            Err(DegenerateError::Singular(_))
        ));
    }

    #[test]
    fn test_three_collinear_correspondences_are_degenerate() {
        let equations: Vec<EquationOfCondition> = [(0.0, 1.0), (1.5, 4.0), (3.0, 7.0)]
            .iter()
            .map(|&(x, y)| EquationOfCondition::new(x, y, 1.0, 0.3 * x - 0.2))
            .collect();
        assert!(matches!(
            solve_plate_constants(&equations),
            Err(DegenerateError::Singular(_))
        ));

        let points = [
            ((-100.0, -50.0), (0.01, 0.02)),
            ((0.0, 0.0), (0.0, 0.0)),
            ((100.0, 50.0), (-0.01, -0.02)),
        ];
        assert!(matches!(fit_affine(&points), Err(DegenerateError::Singular(_))));
    }

    #[test]
    fn test_fit_affine_round_trip() {
        let truth = [2.0e-4, -1.5e-5, 0.01, 1.2e-5, 2.1e-4, -0.02];
        let points: Vec<((f64, f64), (f64, f64))> = [(-500.0, -300.0), (420.0, -250.0), (10.0, 380.0), (-250.0, 200.0), (300.0, 90.0)]
            .iter()
            .map(|&(x, y)| {
                (
                    (x, y),
                    (
                        truth[0] * x + truth[1] * y + truth[2],
                        truth[3] * x + truth[4] * y + truth[5],
                    ),
                )
            })
            .collect();
        let fit = fit_affine(&points).unwrap();
        for (a, b) in fit.iter().zip(truth.iter()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-9);
        }
    }
}
