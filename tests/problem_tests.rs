//! Problem bookkeeping and the reformulations exposed on `Problem`.

use cvxmodel::prelude::*;

/// Tolerance for comparing floating point results
const TOL: f64 = 1e-4;

fn lp() -> Problem {
    // minimize x + 2y s.t. x + y >= 2, x - y <= 1, y >= 0
    let mut p = Problem::new();
    let x = p.add_variable(VariableBuilder::scalar("x")).unwrap();
    let y = p.add_variable(VariableBuilder::scalar("y").lower(0.0)).unwrap();
    p.add_named_constraint(x.plus(&y).unwrap().geq(2.0).unwrap(), "cover")
        .unwrap();
    p.add_constraint(x.minus(&y).unwrap().leq(1.0).unwrap()).unwrap();
    p.minimize(x.plus(y.scale(2.0)).unwrap()).unwrap();
    p
}

fn solved_value(p: &mut Problem) -> f64 {
    let solution = p.solve().unwrap();
    assert_eq!(solution.status, SolveStatus::Optimal);
    solution.value.unwrap()
}

#[test]
fn test_copy_solves_identically() {
    let mut p = lp();
    let mut q = p.copy();
    assert_eq!(q.count_cons(), p.count_cons());
    assert_eq!(q.number_of_vars(), p.number_of_vars());
    assert_eq!(q.problem_type(), "LP");

    let a = solved_value(&mut p);
    let b = solved_value(&mut q);
    assert!((a - 2.5).abs() < TOL, "Expected {}, got {}", 2.5, a);
    assert!((a - b).abs() < TOL, "Expected {}, got {}", a, b);
}

#[test]
fn test_dual_problem_has_the_same_optimum() {
    let p = lp();
    let mut dual = p.as_dual().unwrap();
    assert_eq!(dual.objective().sense, Sense::Maximize);
    let v = solved_value(&mut dual);
    assert!((v - 2.5).abs() < TOL, "Expected {}, got {}", 2.5, v);
}

#[test]
fn test_socp_cast_of_a_quadratic_program() {
    // minimize ||v||^2 s.t. v0 + v1 >= 2
    let mut p = Problem::new();
    let v = p.add_variable(VariableBuilder::vector("v", 2)).unwrap();
    p.add_constraint(v.sum().geq(2.0).unwrap()).unwrap();
    p.minimize(v.sqnorm().unwrap()).unwrap();
    assert_eq!(p.problem_type(), "QP");

    let mut cast = p.as_socp().unwrap();
    assert_eq!(cast.problem_type(), "SOCP");
    assert!(!cast.has_quad_objective());
    let v = solved_value(&mut cast);
    assert!((v - 2.0).abs() < TOL, "Expected {}, got {}", 2.0, v);
    let w = solved_value(&mut p);
    assert!((w - 2.0).abs() < TOL, "Expected {}, got {}", 2.0, w);
}

#[test]
fn test_bounds_change_the_optimum() {
    let mut p = Problem::new();
    let x = p.add_variable(VariableBuilder::scalar("x").lower(1.0)).unwrap();
    p.minimize(x).unwrap();
    let v = solved_value(&mut p);
    assert!((v - 1.0).abs() < TOL, "Expected {}, got {}", 1.0, v);

    p.set_var_bounds("x", Some(Bound::Scalar(2.0)), Some(Bound::Scalar(5.0)))
        .unwrap();
    let v = solved_value(&mut p);
    assert!((v - 2.0).abs() < TOL, "Expected {}, got {}", 2.0, v);
}

#[test]
fn test_counters_follow_adds_and_removes() {
    let mut p = Problem::new();
    let x = p.add_variable(VariableBuilder::vector("x", 3)).unwrap();
    let t = p.add_variable(VariableBuilder::scalar("t")).unwrap();
    p.add_constraint(x.sum().leq(1.0).unwrap()).unwrap();
    p.add_constraint(norm(&x).leq(&t).unwrap()).unwrap();
    // abs of a vector is a Euclidean norm
    p.add_constraint(abs(&x).leq(1.0).unwrap()).unwrap();
    p.add_constraint(Constraint::geomean(&x, &t).unwrap()).unwrap();
    assert_eq!(p.counters(), &p.recount());

    p.remove_constraint(1).unwrap();
    assert_eq!(p.counters(), &p.recount());
    assert_eq!(p.counters().cone, 4);

    p.remove_all_constraints();
    assert_eq!(p.count_cons(), 0);
    assert_eq!(p.counters(), &p.recount());
    assert_eq!(p.number_of_vars(), 4);
}

#[test]
fn test_display_lists_groups_and_names() {
    let mut p = lp();
    let z = p.add_variable(VariableBuilder::vector("z", 3)).unwrap();
    let list: Vec<Constraint> = (0..3)
        .map(|i| z.element(i).unwrap().leq(1.0).unwrap())
        .collect();
    p.add_list_of_constraints(list, Some("i")).unwrap();
    let group = p.groups().get(&2).map(|g| g.string.clone()).unwrap();

    let text = p.to_string();
    assert!(text.contains("optimization problem  (LP)"), "{}", text);
    assert!(text.contains("minimize"), "{}", text);
    assert!(text.contains("(cover)"), "{}", text);
    assert!(text.contains(&group), "{}", text);
    // the group is shown once, not member by member
    assert_eq!(text.lines().filter(|l| l.contains("such that")).count(), 1);
    assert_eq!(text.lines().filter(|l| l.trim() == group).count(), 1);
}

#[test]
fn test_strict_options_reject_unknown_solver_options() {
    let mut options = Options::new().with_strict_options(true);
    options.pool_size = Some(3);
    let mut p = lp();
    p.set_options(options);
    assert!(matches!(p.solve(), Err(CvxError::UnsupportedOption(_))));

    // without strictness the option is ignored
    p.options_mut().strict_options = false;
    let v = solved_value(&mut p);
    assert!((v - 2.5).abs() < TOL, "Expected {}, got {}", 2.5, v);
}

#[test]
fn test_invalid_option_value() {
    let mut p = lp();
    p.set_options(Options::new().with_strict_options(true).with_tol(-1.0));
    assert!(matches!(p.solve(), Err(CvxError::OptionValue(_))));
}

#[test]
fn test_failed_group_is_not_added() {
    // ids of `other` run past every id the group below allocates
    let mut other = Problem::new();
    for k in 0..9 {
        other.add_variable(VariableBuilder::scalar(format!("a{}", k))).unwrap();
    }
    let foreign = other.add_variable(VariableBuilder::scalar("c")).unwrap();

    let mut p = Problem::new();
    let x = p.add_variable(VariableBuilder::vector("x", 3)).unwrap();
    let t = p.add_variable(VariableBuilder::scalar("t")).unwrap();
    p.add_constraint(x.sum().leq(3.0).unwrap()).unwrap();

    let list = vec![
        x.element(0).unwrap().leq(1.0).unwrap(),
        Constraint::geomean(&x, &t).unwrap(),
        foreign.leq(1.0).unwrap(),
    ];
    assert!(matches!(
        p.add_list_of_constraints(list, Some("i")),
        Err(CvxError::UnknownVariable(_))
    ));

    // only the constraint added before the group remains
    assert_eq!(p.count_cons(), 1);
    assert_eq!(p.numbering().len(), 1);
    assert!(p.groups().is_empty());
    assert_eq!(p.metas().count(), 0);
    assert_eq!(p.number_of_vars(), 4);
    assert_eq!(p.counters(), &p.recount());

    let mut q = Problem::new();
    let y = q.add_variable(VariableBuilder::scalar("y")).unwrap();
    let list = vec![y.leq(1.0).unwrap(), foreign.leq(1.0).unwrap()];
    assert!(q.add_list_of_constraints(list, None).is_err());
    assert_eq!(q.count_cons(), 0);
    assert!(q.numbering().is_empty());
    assert_eq!(q.counters(), &q.recount());
}
