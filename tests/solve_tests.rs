//! End-to-end solve tests through the Clarabel adapter.
//!
//! Test cases are defined as data and run programmatically.

use cvxmodel::prelude::*;
use nalgebra::{Complex, DMatrix, DVector};

/// Tolerance for comparing floating point results
const TOL: f64 = 1e-4;

/// A test case definition
struct TestCase {
    name: &'static str,
    /// Builds the problem and returns (problem, expected_value)
    build: fn() -> Result<(Problem, f64)>,
}

fn vector(name: &str, n: usize) -> VariableBuilder {
    VariableBuilder::vector(name, n)
}

fn scalar(name: &str) -> VariableBuilder {
    VariableBuilder::scalar(name)
}

/// All minimize test cases
fn minimize_test_cases() -> Vec<TestCase> {
    vec![
        // ========== Linear Programs ==========
        TestCase {
            name: "sum_nonneg_constraint",
            build: || {
                // minimize sum(x) s.t. x >= 1, x in R^5
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 5))?;
                p.add_constraint(x.geq(1.0)?)?;
                p.minimize(x.sum())?;
                Ok((p, 5.0))
            },
        },
        TestCase {
            name: "sum_equality_constraint",
            build: || {
                // minimize sum(x) s.t. x == 2, x in R^3
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 3))?;
                p.add_constraint(x.equals(2.0)?)?;
                p.minimize(x.sum())?;
                Ok((p, 6.0))
            },
        },
        TestCase {
            name: "weighted_sum",
            build: || {
                // minimize 2x + 3y s.t. x >= 1, y >= 2
                let mut p = Problem::new();
                let x = p.add_variable(scalar("x"))?;
                let y = p.add_variable(scalar("y"))?;
                p.add_constraint(x.geq(1.0)?)?;
                p.add_constraint(y.geq(2.0)?)?;
                p.minimize(x.scale(2.0).plus(y.scale(3.0))?)?;
                Ok((p, 8.0))
            },
        },
        TestCase {
            name: "variable_bounds",
            build: || {
                // bounds are exported as rows, no constraint needed
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 2).lower(1.5).upper(4.0))?;
                p.minimize(x.sum())?;
                Ok((p, 3.0))
            },
        },
        // ========== Cones ==========
        TestCase {
            name: "norm2_epigraph",
            build: || {
                // minimize t s.t. ||x|| <= t, sum(x) = 5, x in R^5
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 5))?;
                let t = p.add_variable(scalar("t"))?;
                p.add_constraint(norm(&x).leq(&t)?)?;
                p.add_constraint(x.sum().equals(5.0)?)?;
                p.minimize(t)?;
                Ok((p, 5.0_f64.sqrt()))
            },
        },
        TestCase {
            name: "rotated_cone",
            build: || {
                // minimize u s.t. ||x||^2 <= u * 1, sum(x) = 2
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 2))?;
                let u = p.add_variable(scalar("u"))?;
                p.add_constraint(Constraint::rsoc(&x, &u, 1.0)?)?;
                p.add_constraint(x.sum().equals(2.0)?)?;
                p.minimize(u)?;
                Ok((p, 2.0))
            },
        },
        TestCase {
            name: "exponential_cone",
            build: || {
                // minimize x s.t. x >= exp(z), z = 1
                let mut p = Problem::new();
                let x = p.add_variable(scalar("x"))?;
                let z = p.add_variable(scalar("z"))?;
                p.add_constraint(Constraint::exp_cone(&x, 1.0, &z)?)?;
                p.add_constraint(z.equals(1.0)?)?;
                p.minimize(x)?;
                Ok((p, std::f64::consts::E))
            },
        },
        // ========== Quadratics ==========
        TestCase {
            name: "least_norm",
            build: || {
                // minimize ||x||^2 s.t. sum(x) = 2
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 2))?;
                p.add_constraint(x.sum().equals(2.0)?)?;
                p.minimize(x.sqnorm()?)?;
                Ok((p, 2.0))
            },
        },
        TestCase {
            name: "quadratic_constraint",
            build: || {
                // minimize sum(x) s.t. ||x||^2 <= 1, cast as a cone
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 2))?;
                p.add_constraint(x.sqnorm()?.leq(1.0)?)?;
                p.minimize(x.sum())?;
                Ok((p, -(2.0_f64.sqrt())))
            },
        },
        // ========== Meta constraints ==========
        TestCase {
            name: "absolute_value",
            build: || {
                // minimize t s.t. |x| <= t, x = -3
                let mut p = Problem::new();
                let x = p.add_variable(scalar("x"))?;
                let t = p.add_variable(scalar("t"))?;
                p.add_constraint(abs(&x).leq(&t)?)?;
                p.add_constraint(x.equals(-3.0)?)?;
                p.minimize(t)?;
                Ok((p, 3.0))
            },
        },
        TestCase {
            name: "three_norm",
            build: || {
                // minimize t s.t. ||x||_3 <= t, x = (1, 2)
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 2))?;
                let t = p.add_variable(scalar("t"))?;
                p.add_constraint(Constraint::pnorm(&x, 3.0, Relation::Le, &t)?)?;
                p.add_constraint(x.equals(DVector::from_vec(vec![1.0, 2.0]))?)?;
                p.minimize(t)?;
                Ok((p, 9.0_f64.cbrt()))
            },
        },
        TestCase {
            name: "one_norm",
            build: || {
                // minimize t s.t. ||x||_1 <= t, x = (1, -2)
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 2))?;
                let t = p.add_variable(scalar("t"))?;
                p.add_constraint(Constraint::pnorm(&x, 1.0, Relation::Le, &t)?)?;
                p.add_constraint(x.equals(DVector::from_vec(vec![1.0, -2.0]))?)?;
                p.minimize(t)?;
                Ok((p, 3.0))
            },
        },
    ]
}

/// All maximize test cases
fn maximize_test_cases() -> Vec<TestCase> {
    vec![
        TestCase {
            name: "budget",
            build: || {
                // maximize sum(x) s.t. 1|x <= 10, x >= 0
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 4))?;
                let ones = DMatrix::from_element(4, 1, 1.0);
                p.add_constraint(x.inner(&ones)?.leq(10.0)?)?;
                p.add_constraint(x.geq(0.0)?)?;
                p.maximize(x.sum())?;
                Ok((p, 10.0))
            },
        },
        TestCase {
            name: "norm_ball",
            build: || {
                // maximize sum(x) s.t. ||x|| <= 1
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 2))?;
                p.add_constraint(norm(&x).leq(1.0)?)?;
                p.maximize(x.sum())?;
                Ok((p, 2.0_f64.sqrt()))
            },
        },
        TestCase {
            name: "geometric_mean",
            build: || {
                // maximize t s.t. t <= geomean(x), x <= (2, 8)
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 2))?;
                let t = p.add_variable(scalar("t"))?;
                p.add_constraint(Constraint::geomean(&x, &t)?)?;
                p.add_constraint(x.leq(DVector::from_vec(vec![2.0, 8.0]))?)?;
                p.maximize(t)?;
                Ok((p, 4.0))
            },
        },
        TestCase {
            name: "log_sum_exp",
            build: || {
                // maximize sum(x) s.t. log(exp(x1) + exp(x2)) <= log 2
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 2))?;
                p.add_constraint(Constraint::log_sum_exp(&x, 2.0_f64.ln())?)?;
                p.maximize(x.sum())?;
                Ok((p, 0.0))
            },
        },
        TestCase {
            name: "concave_quadratic",
            build: || {
                // maximize 2x - x^2
                let mut p = Problem::new();
                let x = p.add_variable(scalar("x"))?;
                p.maximize(x.sqnorm()?.scale(-1.0).plus_affine(x.scale(2.0))?)?;
                Ok((p, 1.0))
            },
        },
    ]
}

/// A problem expected to end in a given status
struct StatusCase {
    name: &'static str,
    build: fn() -> Result<Problem>,
}

/// Test cases expected to be infeasible
fn infeasible_test_cases() -> Vec<StatusCase> {
    vec![
        StatusCase {
            name: "infeasible_bounds",
            build: || {
                // x >= 1 and x <= 0 is infeasible
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 3))?;
                p.add_constraint(x.geq(1.0)?)?;
                p.add_constraint(x.leq(0.0)?)?;
                p.minimize(x.sum())?;
                Ok(p)
            },
        },
        StatusCase {
            name: "infeasible_equality",
            build: || {
                // x == 1 and x == 2 is infeasible
                let mut p = Problem::new();
                let x = p.add_variable(scalar("x"))?;
                p.add_constraint(x.equals(1.0)?)?;
                p.add_constraint(x.equals(2.0)?)?;
                p.minimize(x)?;
                Ok(p)
            },
        },
    ]
}

/// Test cases expected to be unbounded
fn unbounded_test_cases() -> Vec<StatusCase> {
    vec![
        StatusCase {
            name: "unbounded_below",
            build: || {
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 3))?;
                p.add_constraint(x.leq(1.0)?)?;
                p.minimize(x.sum())?;
                Ok(p)
            },
        },
        StatusCase {
            name: "unbounded_above",
            build: || {
                let mut p = Problem::new();
                let x = p.add_variable(vector("x", 3))?;
                p.add_constraint(x.geq(1.0)?)?;
                p.maximize(x.sum())?;
                Ok(p)
            },
        },
    ]
}

// ============================================================================
// Test runner
// ============================================================================

fn run_cases(cases: Vec<TestCase>) {
    for case in cases {
        let (mut prob, expected) = match (case.build)() {
            Ok(built) => built,
            Err(e) => panic!("Problem '{}' should build: {}", case.name, e),
        };

        let result = prob.solve();
        assert!(result.is_ok(), "Problem '{}' should solve: {:?}", case.name, result.err());

        let solution = result.unwrap();
        assert_eq!(
            solution.status, SolveStatus::Optimal,
            "Problem '{}' should be optimal, got {:?}", case.name, solution.status
        );

        let value = solution.value.expect("should have value");
        let rel_err = (value - expected).abs() / (1.0 + expected.abs());
        assert!(
            rel_err < TOL,
            "Problem '{}': expected {}, got {} (rel_err={})",
            case.name, expected, value, rel_err
        );

        let (feasible, violation) = prob
            .check_current_value_feasibility(Some(1e-4), None)
            .expect("values are set");
        assert!(
            feasible,
            "Problem '{}': solution violates constraints by {:?}",
            case.name, violation
        );
    }
}

#[test]
fn test_minimize() {
    run_cases(minimize_test_cases());
}

#[test]
fn test_maximize() {
    run_cases(maximize_test_cases());
}

#[test]
fn test_infeasible() {
    for StatusCase { name, build } in infeasible_test_cases() {
        let mut prob = build().unwrap();
        let solution = prob.solve().unwrap();
        assert_eq!(
            solution.status, SolveStatus::PrimalInfeasible,
            "Problem '{}' should be infeasible, got {:?}", name, solution.status
        );
        assert!(solution.value.is_none());
        assert!(solution.primal.is_empty());
    }
}

#[test]
fn test_unbounded() {
    for StatusCase { name, build } in unbounded_test_cases() {
        let mut prob = build().unwrap();
        let solution = prob.solve().unwrap();
        assert_eq!(
            solution.status, SolveStatus::DualInfeasible,
            "Problem '{}' should be unbounded, got {:?}", name, solution.status
        );
    }
}

// ============================================================================
// Primal values and duals
// ============================================================================

#[test]
fn test_scenario_budget() {
    // Initialize tracing for diagnostics
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let mut p = Problem::new();
    let x = p.add_variable(vector("x", 4)).unwrap();
    p.add_constraint(x.inner(&DMatrix::from_element(4, 1, 1.0)).unwrap().leq(10.0).unwrap())
        .unwrap();
    p.add_constraint(x.geq(0.0).unwrap()).unwrap();
    p.maximize(x.sum()).unwrap();

    let solution = p.solve().unwrap();
    assert_eq!(solution.status.as_str(), "optimal");
    let value = p.obj_value().unwrap();
    assert!((value - 10.0).abs() < TOL, "Expected {}, got {}", 10.0, value);
    let x_val = p.get_valued_variable("x").unwrap();
    assert!((x_val.sum() - 10.0).abs() < TOL, "Expected {}, got {}", 10.0, x_val.sum());
}

#[test]
fn test_primal_values() {
    // minimize (x - 3)^2 + (y + 1)^2, unconstrained
    let mut p = Problem::new();
    let x = p.add_variable(scalar("x")).unwrap();
    let y = p.add_variable(scalar("y")).unwrap();
    let objective = x
        .sqnorm()
        .unwrap()
        .plus(&y.sqnorm().unwrap())
        .unwrap()
        .plus_affine(x.scale(-6.0).plus(y.scale(2.0)).unwrap())
        .unwrap()
        .plus_affine(10.0)
        .unwrap();
    p.minimize(objective).unwrap();

    let solution = p.solve().unwrap();
    assert_eq!(solution.status, SolveStatus::Optimal);
    let x_val = solution.value("x").unwrap();
    let y_val = solution.value("y").unwrap();
    assert!((x_val - 3.0).abs() < TOL, "Expected {}, got {}", 3.0, x_val);
    assert!((y_val + 1.0).abs() < TOL, "Expected {}, got {}", -1.0, y_val);
    let v = solution.value.unwrap();
    assert!(v.abs() < TOL, "Expected {}, got {}", 0.0, v);
}

#[test]
fn test_inequality_and_equality_duals() {
    // minimize x + y s.t. x >= 1, y == 2
    let mut p = Problem::new();
    let x = p.add_variable(scalar("x")).unwrap();
    let y = p.add_variable(scalar("y")).unwrap();
    p.add_constraint(x.geq(1.0).unwrap()).unwrap();
    p.add_constraint(y.equals(2.0).unwrap()).unwrap();
    p.minimize(x.plus(&y).unwrap()).unwrap();

    let solution = p.solve().unwrap();
    assert!(solution.has_duals());
    for k in 0..2 {
        let d = solution.constraint_dual(k).and_then(|d| d.scalar()).unwrap();
        assert!((d - 1.0).abs() < TOL, "Expected {}, got {}", 1.0, d);
    }
    let stored = p.constraints()[0].dual.as_ref().and_then(|d| d.scalar()).unwrap();
    assert!((stored - 1.0).abs() < TOL, "Expected {}, got {}", 1.0, stored);
}

#[test]
fn test_noduals_option() {
    let mut p = Problem::with_options(Options::new().with_noduals(true));
    let x = p.add_variable(scalar("x")).unwrap();
    p.add_constraint(x.geq(1.0).unwrap()).unwrap();
    p.minimize(x).unwrap();

    let solution = p.solve().unwrap();
    assert!(!solution.has_duals());
    assert!(solution.value("x").is_ok());
}

#[test]
fn test_resolve_after_change() {
    let mut p = Problem::new();
    let x = p.add_variable(scalar("x")).unwrap();
    p.add_constraint(x.geq(1.0).unwrap()).unwrap();
    p.minimize(x.clone()).unwrap();
    let first = p.solve().unwrap().value.unwrap();
    assert!((first - 1.0).abs() < TOL, "Expected {}, got {}", 1.0, first);

    p.add_constraint(x.geq(4.0).unwrap()).unwrap();
    let second = p.solve().unwrap().value.unwrap();
    assert!((second - 4.0).abs() < TOL, "Expected {}, got {}", 4.0, second);

    p.remove_constraint(1).unwrap();
    let third = p.solve().unwrap().value.unwrap();
    assert!((third - 1.0).abs() < TOL, "Expected {}, got {}", 1.0, third);
}

// ============================================================================
// Reformulated solves
// ============================================================================

fn lp() -> Problem {
    // minimize x0 + 2 x1 s.t. x0 + x1 >= 1, x >= 0
    let mut p = Problem::new();
    let x = p.add_variable(vector("x", 2)).unwrap();
    p.add_constraint(x.sum().geq(1.0).unwrap()).unwrap();
    p.add_constraint(x.geq(0.0).unwrap()).unwrap();
    let c = DMatrix::from_column_slice(2, 1, &[1.0, 2.0]);
    p.minimize(x.inner(&c).unwrap()).unwrap();
    p
}

fn socp() -> Problem {
    // minimize t s.t. ||x|| <= t, x0 + 2 x1 = 5
    let mut p = Problem::new();
    let x = p.add_variable(vector("x", 2)).unwrap();
    let t = p.add_variable(scalar("t")).unwrap();
    p.add_constraint(norm(&x).leq(&t).unwrap()).unwrap();
    let a = DMatrix::from_column_slice(2, 1, &[1.0, 2.0]);
    p.add_constraint(x.inner(&a).unwrap().equals(5.0).unwrap()).unwrap();
    p.minimize(t).unwrap();
    p
}

#[test]
fn test_dual_agrees_with_primal() {
    // Initialize tracing for diagnostics
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    for (name, build) in [("lp", lp as fn() -> Problem), ("socp", socp as fn() -> Problem)] {
        let mut direct = build();
        direct.options_mut().solve_via_dual = Some(false);
        let mut dual = build();
        dual.options_mut().solve_via_dual = Some(true);

        let s1 = direct.solve().unwrap();
        let s2 = dual.solve().unwrap();
        assert_eq!(s2.status, SolveStatus::Optimal, "Problem '{}' via dual", name);

        let (v1, v2) = (s1.value.unwrap(), s2.value.unwrap());
        assert!((v1 - v2).abs() < TOL, "Problem '{}': expected {}, got {}", name, v1, v2);

        let x1 = direct.get_valued_variable("x").unwrap();
        let x2 = dual.get_valued_variable("x").unwrap();
        for k in 0..2 {
            assert!(
                (x1[k] - x2[k]).abs() < 1e-3,
                "Problem '{}': x[{}] expected {}, got {}",
                name, k, x1[k], x2[k]
            );
        }

        let d1 = s1.constraint_dual(1).and_then(|d| d.as_real()).unwrap();
        let d2 = s2.constraint_dual(1).and_then(|d| d.as_real()).unwrap();
        assert!((d1 - d2).norm() < 1e-3, "Problem '{}': duals differ", name);
    }
}

#[test]
fn test_lp_optimum_via_dual() {
    let mut p = lp();
    p.options_mut().solve_via_dual = Some(true);
    let solution = p.solve().unwrap();
    let v = solution.value.unwrap();
    assert!((v - 1.0).abs() < TOL, "Expected {}, got {}", 1.0, v);
    let x = p.get_valued_variable("x").unwrap();
    assert!((x[0] - 1.0).abs() < TOL, "Expected {}, got {}", 1.0, x[0]);
    let d = solution.constraint_dual(0).and_then(|d| d.scalar()).unwrap();
    assert!((d - 1.0).abs() < TOL, "Expected {}, got {}", 1.0, d);
}

#[test]
fn test_integer_problem_needs_integer_solver() {
    let mut p = Problem::with_options(Options::new().with_solve_via_dual(true));
    let n = p.add_variable(scalar("n").integer()).unwrap();
    p.add_constraint(n.geq(1.5).unwrap()).unwrap();
    p.minimize(n).unwrap();
    assert!(matches!(p.solve(), Err(CvxError::NotAppropriateSolver(_))));
}

#[test]
fn test_complex_problem() {
    // minimize t s.t. ||z|| <= t, z = (1+2i, 3-i)
    let mut p = Problem::new();
    let z = p.add_variable(vector("z", 2).complex()).unwrap();
    let t = p.add_variable(scalar("t")).unwrap();
    let target = DMatrix::from_column_slice(2, 1, &[Complex::new(1.0, 2.0), Complex::new(3.0, -1.0)]);
    p.add_constraint(z.equals(AffExpr::complex_constant(&target)).unwrap()).unwrap();
    p.add_constraint(norm(&z).leq(&t).unwrap()).unwrap();
    p.minimize(t).unwrap();
    assert!(p.is_complex());

    let solution = p.solve().unwrap();
    assert_eq!(solution.status, SolveStatus::Optimal);
    let v = solution.value.unwrap();
    assert!((v - 15.0_f64.sqrt()).abs() < TOL, "Expected {}, got {}", 15.0_f64.sqrt(), v);

    let z_val = p.get_valued_complex_variable("z").unwrap();
    assert!((z_val[1] - Complex::new(3.0, -1.0)).norm() < TOL);
    assert!(matches!(
        solution.constraint_dual(0),
        Some(DualValue::Complex(m)) if m.nrows() == 2
    ));
}

#[cfg(feature = "sdp")]
#[test]
fn test_sdp_dual_and_primal_agree() {
    // minimize trace(X) s.t. X ≽ A, X symmetric 2x2
    let build = |via_dual: bool| {
        let mut p = Problem::with_options(Options::new().with_solve_via_dual(via_dual));
        let x = p
            .add_variable(VariableBuilder::matrix("X", 2, 2).symmetric())
            .unwrap();
        let a = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]);
        p.add_constraint(x.succeq(a).unwrap()).unwrap();
        p.minimize(x.trace().unwrap()).unwrap();
        p
    };
    for via_dual in [false, true] {
        let mut p = build(via_dual);
        let solution = p.solve().unwrap();
        assert_eq!(solution.status, SolveStatus::Optimal);
        let v = solution.value.unwrap();
        assert!((v - 4.0).abs() < TOL, "Expected {}, got {}", 4.0, v);
        let x = p.get_valued_variable("X").unwrap();
        assert!((x[(0, 1)] - 1.0).abs() < 1e-3, "Expected {}, got {}", 1.0, x[(0, 1)]);
        assert!(matches!(solution.constraint_dual(0), Some(DualValue::Real(m)) if m.nrows() == 2));
    }
}

#[cfg(feature = "sdp")]
#[test]
fn test_root_determinant() {
    // maximize t s.t. t <= det(X)^(1/2), X ≼ diag(1, 4)
    let mut p = Problem::new();
    let x = p
        .add_variable(VariableBuilder::matrix("X", 2, 2).symmetric())
        .unwrap();
    let t = p.add_variable(scalar("t")).unwrap();
    p.add_constraint(Constraint::detrootn(&x, &t).unwrap()).unwrap();
    let bound = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 4.0]));
    p.add_constraint(x.preceq(bound).unwrap()).unwrap();
    p.maximize(t).unwrap();

    let solution = p.solve().unwrap();
    let v = solution.value.unwrap();
    assert!((v - 2.0).abs() < TOL, "Expected {}, got {}", 2.0, v);
}
