//! Solver selection and per-solver instance state.

use std::collections::HashMap;
use std::fmt;

use super::{ClarabelSolver, RawSolution, Solver, SolverInstance, SupportLevel};
use crate::error::{CvxError, Result};
use crate::problem::Problem;

/// Tie-break order between solvers with the same support level.
pub const PREFERENCE_ORDER: [&str; 9] = [
    "cplex", "gurobi", "mosek", "mskfsn", "ecos", "cvxopt", "glpk", "scip", "clarabel",
];

fn preference(name: &str) -> usize {
    PREFERENCE_ORDER
        .iter()
        .position(|n| *n == name)
        .unwrap_or(PREFERENCE_ORDER.len())
}

/// The solver back ends known to a problem.
pub struct SolverRegistry {
    solvers: Vec<Box<dyn Solver>>,
}

impl Default for SolverRegistry {
    fn default() -> Self {
        let mut registry = SolverRegistry::new();
        registry.register(Box::new(ClarabelSolver));
        registry
    }
}

impl fmt::Debug for SolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolverRegistry")
            .field("solvers", &self.names())
            .finish()
    }
}

impl SolverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        SolverRegistry {
            solvers: Vec::new(),
        }
    }

    /// Register a solver. A solver with the same name is replaced.
    pub fn register(&mut self, solver: Box<dyn Solver>) {
        if let Some(pos) = self.solvers.iter().position(|s| s.name() == solver.name()) {
            self.solvers[pos] = solver;
        } else {
            self.solvers.push(solver);
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Solver> {
        self.solvers
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.as_ref())
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.solvers.iter().map(|s| s.name()).collect()
    }

    /// Best available solver for a problem: highest support level, then
    /// [`PREFERENCE_ORDER`], then registration order.
    pub fn suggested_solver(&self, problem: &Problem) -> Result<&dyn Solver> {
        let mut best: Option<(SupportLevel, usize, usize)> = None;
        for (pos, solver) in self.solvers.iter().enumerate() {
            if let Err(e) = solver.test_availability() {
                tracing::debug!(
                    component = "registry",
                    operation = "suggested_solver",
                    solver = solver.name(),
                    error = %e,
                    "Solver unavailable"
                );
                continue;
            }
            let level = solver.support_level(problem);
            let better = match best {
                None => true,
                Some((l, p, _)) => {
                    level > l || (level == l && preference(solver.name()) < p)
                }
            };
            if better {
                best = Some((level, preference(solver.name()), pos));
            }
        }

        let (level, _, pos) = match best {
            Some(b) if b.0 > SupportLevel::None => b,
            _ => {
                return Err(CvxError::NotAppropriateSolver(format!(
                    "no available solver supports a {}",
                    problem.problem_type()
                )))
            }
        };
        let solver = self.solvers[pos].as_ref();
        if level < SupportLevel::Secondary {
            tracing::warn!(
                component = "registry",
                operation = "suggested_solver",
                solver = solver.name(),
                level = level.as_str(),
                "Selected solver has only {} support for this problem",
                level.as_str()
            );
        }
        Ok(solver)
    }
}

/// Lifecycle of a solver instance held for a problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceState {
    Uninitialized,
    Imported,
    /// Number of incremental updates since the last import.
    Updated(usize),
    Reset,
}

struct InstanceSlot {
    state: InstanceState,
    instance: Box<dyn SolverInstance>,
}

/// Solver instances of one problem, keyed by solver name.
#[derive(Default)]
pub struct InstanceCache {
    slots: HashMap<String, InstanceSlot>,
}

impl Clone for InstanceCache {
    /// Instances belong to one problem; a clone starts empty.
    fn clone(&self) -> Self {
        InstanceCache::default()
    }
}

impl fmt::Debug for InstanceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let states: HashMap<&str, InstanceState> = self
            .slots
            .iter()
            .map(|(k, v)| (k.as_str(), v.state))
            .collect();
        f.debug_struct("InstanceCache")
            .field("states", &states)
            .finish()
    }
}

impl InstanceCache {
    /// Forget every imported problem.
    pub fn reset_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.instance.reset_problem();
            slot.state = InstanceState::Reset;
        }
    }

    pub fn state(&self, solver: &str) -> InstanceState {
        self.slots
            .get(solver)
            .map_or(InstanceState::Uninitialized, |s| s.state)
    }

    /// Import or update the problem on the solver's instance, then solve.
    pub fn run(&mut self, solver: &dyn Solver, problem: &Problem) -> Result<RawSolution> {
        let slot = self
            .slots
            .entry(solver.name().to_string())
            .or_insert_with(|| InstanceSlot {
                state: InstanceState::Uninitialized,
                instance: solver.create_instance(),
            });

        match slot.state {
            InstanceState::Uninitialized | InstanceState::Reset => {
                slot.instance.import_problem(problem)?;
                slot.state = InstanceState::Imported;
            }
            InstanceState::Imported | InstanceState::Updated(_) => {
                match slot.instance.update_problem(problem) {
                    Ok(()) => {
                        slot.state = match slot.state {
                            InstanceState::Updated(n) => InstanceState::Updated(n + 1),
                            _ => InstanceState::Updated(1),
                        };
                    }
                    Err(CvxError::ProblemUpdate(reason)) => {
                        tracing::info!(
                            component = "registry",
                            operation = "update_problem",
                            solver = solver.name(),
                            reason = %reason,
                            "Reimporting problem"
                        );
                        slot.instance.reset_problem();
                        slot.instance.import_problem(problem)?;
                        slot.state = InstanceState::Imported;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        slot.instance.solve(problem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintKind;
    use crate::expr::VariableBuilder;
    use crate::solver::{ExpressionKind, ObjectiveValue, OptionKey, SolveMeta, SolveStatus};

    struct Fixed {
        name: &'static str,
        level: SupportLevel,
        available: bool,
        accepts_updates: bool,
    }

    impl Fixed {
        fn new(name: &'static str, level: SupportLevel) -> Self {
            Fixed {
                name,
                level,
                available: true,
                accepts_updates: true,
            }
        }
    }

    struct FixedInstance {
        accepts_updates: bool,
    }

    impl SolverInstance for FixedInstance {
        fn reset_problem(&mut self) {}

        fn import_problem(&mut self, _problem: &Problem) -> Result<()> {
            Ok(())
        }

        fn update_problem(&mut self, _problem: &Problem) -> Result<()> {
            if self.accepts_updates {
                Ok(())
            } else {
                Err(CvxError::ProblemUpdate("constraint removed".to_string()))
            }
        }

        fn solve(&mut self, _problem: &Problem) -> Result<RawSolution> {
            Ok(RawSolution {
                primals: HashMap::new(),
                duals: Vec::new(),
                objective: ObjectiveValue::Value(0.0),
                meta: SolveMeta {
                    status: SolveStatus::Optimal,
                    solver: "fixed".to_string(),
                    solve_time: 0.0,
                    iterations: 0,
                },
            })
        }
    }

    impl Solver for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn test_availability(&self) -> Result<()> {
            if self.available {
                Ok(())
            } else {
                Err(CvxError::SolverError(format!("{} is not installed", self.name)))
            }
        }

        fn supports_integer(&self) -> bool {
            false
        }

        fn supported_objectives(&self) -> &[ExpressionKind] {
            &[ExpressionKind::Affine]
        }

        fn supported_constraints(&self) -> &[ConstraintKind] {
            &[ConstraintKind::Affine]
        }

        fn support_level(&self, _problem: &Problem) -> SupportLevel {
            self.level
        }

        fn recognized_options(&self) -> &[OptionKey] {
            &[]
        }

        fn create_instance(&self) -> Box<dyn SolverInstance> {
            Box::new(FixedInstance {
                accepts_updates: self.accepts_updates,
            })
        }
    }

    fn problem() -> Problem {
        let mut p = Problem::new();
        let x = p.add_variable(VariableBuilder::scalar("x")).unwrap();
        p.minimize(x).unwrap();
        p
    }

    #[test]
    fn test_higher_level_wins() {
        let mut r = SolverRegistry::new();
        r.register(Box::new(Fixed::new("mosek", SupportLevel::Secondary)));
        r.register(Box::new(Fixed::new("clarabel", SupportLevel::Native)));
        assert_eq!(r.suggested_solver(&problem()).unwrap().name(), "clarabel");
    }

    #[test]
    fn test_preference_breaks_ties() {
        let mut r = SolverRegistry::new();
        r.register(Box::new(Fixed::new("other", SupportLevel::Native)));
        r.register(Box::new(Fixed::new("clarabel", SupportLevel::Native)));
        r.register(Box::new(Fixed::new("ecos", SupportLevel::Native)));
        assert_eq!(r.suggested_solver(&problem()).unwrap().name(), "ecos");
    }

    #[test]
    fn test_unavailable_solvers_skipped() {
        let mut r = SolverRegistry::new();
        let mut gurobi = Fixed::new("gurobi", SupportLevel::Native);
        gurobi.available = false;
        r.register(Box::new(gurobi));
        r.register(Box::new(Fixed::new("glpk", SupportLevel::Limited)));
        assert_eq!(r.suggested_solver(&problem()).unwrap().name(), "glpk");
    }

    #[test]
    fn test_no_appropriate_solver() {
        let mut r = SolverRegistry::new();
        r.register(Box::new(Fixed::new("glpk", SupportLevel::None)));
        assert!(matches!(
            r.suggested_solver(&problem()),
            Err(CvxError::NotAppropriateSolver(_))
        ));
        assert!(matches!(
            SolverRegistry::new().suggested_solver(&problem()),
            Err(CvxError::NotAppropriateSolver(_))
        ));
    }

    #[test]
    fn test_register_replaces_by_name() {
        let mut r = SolverRegistry::new();
        r.register(Box::new(Fixed::new("glpk", SupportLevel::None)));
        r.register(Box::new(Fixed::new("glpk", SupportLevel::Native)));
        assert_eq!(r.names(), vec!["glpk"]);
        assert_eq!(r.get("glpk").unwrap().support_level(&problem()), SupportLevel::Native);
        assert!(r.get("cplex").is_none());
    }

    #[test]
    fn test_instance_lifecycle() {
        let p = problem();
        let solver = Fixed::new("glpk", SupportLevel::Native);
        let mut cache = InstanceCache::default();
        assert_eq!(cache.state("glpk"), InstanceState::Uninitialized);

        cache.run(&solver, &p).unwrap();
        assert_eq!(cache.state("glpk"), InstanceState::Imported);
        cache.run(&solver, &p).unwrap();
        cache.run(&solver, &p).unwrap();
        assert_eq!(cache.state("glpk"), InstanceState::Updated(2));

        cache.reset_all();
        assert_eq!(cache.state("glpk"), InstanceState::Reset);
        cache.run(&solver, &p).unwrap();
        assert_eq!(cache.state("glpk"), InstanceState::Imported);

        // instances are not shared with clones
        assert_eq!(cache.clone().state("glpk"), InstanceState::Uninitialized);
    }

    #[test]
    fn test_refused_update_reimports() {
        let p = problem();
        let mut solver = Fixed::new("scip", SupportLevel::Native);
        solver.accepts_updates = false;
        let mut cache = InstanceCache::default();
        cache.run(&solver, &p).unwrap();
        cache.run(&solver, &p).unwrap();
        assert_eq!(cache.state("scip"), InstanceState::Imported);
    }
}
