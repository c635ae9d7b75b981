//! Solver dispatch and write-back of solutions.

use std::collections::HashMap;

use nalgebra::DVector;

use super::{ObjectiveExpr, Problem, Sense};
use crate::constraints::{ConstraintKind, DualValue, LeafKind};
use crate::error::{CvxError, Result};
use crate::expr::VarId;
use crate::solver::{
    ExpressionKind, ObjectiveValue, RawSolution, Solution, SolveStatus, Solver, SolverRegistry,
    SupportLevel,
};

/// Dualize automatically when fewer semidefinite variables than this share
/// of the LMIs exist.
const DUAL_SDP_RATIO: f64 = 0.3;

const DEFAULT_FEASIBILITY_TOL: f64 = 1e-5;

/// Reformulations chosen for one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Plan {
    quadratic: bool,
    /// The solver cannot take the quadratics as they are.
    needs_cast: bool,
    via_dual: bool,
}

impl Plan {
    fn cast(&self) -> bool {
        self.quadratic && (self.needs_cast || self.via_dual)
    }
}

impl Problem {
    /// Solve with the default solvers and write the results back onto the
    /// problem.
    ///
    /// # Errors
    ///
    /// Option errors under `strict_options`, `NotAppropriateSolver` when no
    /// solver fits, and any error of the reformulations or the solver.
    pub fn solve(&mut self) -> Result<Solution> {
        self.solve_with(&SolverRegistry::default())
    }

    /// Solve using the solvers of a registry.
    pub fn solve_with(&mut self, registry: &SolverRegistry) -> Result<Solution> {
        self.options.validate()?;
        let solver = self.select_solver(registry)?;
        self.options
            .check_recognized(solver.name(), solver.recognized_options())?;

        tracing::info!(
            component = "problem",
            operation = "solve",
            solver = solver.name(),
            problem_type = %self.problem_type(),
            "Solving"
        );
        let raw = self.solve_raw(solver)?;
        Ok(self.apply_solution(raw))
    }

    fn select_solver<'r>(&self, registry: &'r SolverRegistry) -> Result<&'r dyn Solver> {
        let Some(name) = self.options.solver.as_deref() else {
            return registry.suggested_solver(self);
        };
        let solver = registry.get(name).ok_or_else(|| {
            CvxError::NotAppropriateSolver(format!("solver {} is not registered", name))
        })?;
        solver
            .test_availability()
            .map_err(|e| CvxError::NotAppropriateSolver(format!("{}: {}", name, e)))?;
        match solver.support_level(self) {
            SupportLevel::None => Err(CvxError::NotAppropriateSolver(format!(
                "{} cannot solve a {}",
                name,
                self.problem_type()
            ))),
            level => {
                if level < SupportLevel::Secondary {
                    tracing::warn!(
                        component = "problem",
                        operation = "select_solver",
                        solver = name,
                        level = level.as_str(),
                        "Requested solver has only {} support for this problem",
                        level.as_str()
                    );
                }
                Ok(solver)
            }
        }
    }

    fn plan(&self, solver: &dyn Solver) -> Plan {
        let quad_constraints = self.has_quad_constraints();
        let quad_objective = self.has_quad_objective();
        let needs_cast = (quad_constraints
            && !solver.supported_constraints().contains(&ConstraintKind::Quad))
            || (quad_objective
                && !solver
                    .supported_objectives()
                    .contains(&ExpressionKind::Quadratic))
            || (quad_constraints
                && self.has_cone_constraints()
                && !solver.allows_mixing_quad_and_soc());
        let quadratic = quad_constraints || quad_objective;

        let sdp = self.counters.sdp;
        let via_dual = match self.options.solve_via_dual {
            Some(v) => v,
            None => {
                sdp > 0
                    && (self.semidef_vars() as f64) < DUAL_SDP_RATIO * sdp as f64
                    && !(quadratic && !needs_cast)
            }
        };
        Plan {
            quadratic,
            needs_cast,
            via_dual,
        }
    }

    fn solve_raw(&mut self, solver: &dyn Solver) -> Result<RawSolution> {
        if self.is_complex() {
            return self.solve_complex(solver);
        }

        let plan = self.plan(solver);
        tracing::info!(
            component = "problem",
            operation = "solve",
            solver = solver.name(),
            socp_cast = plan.cast(),
            via_dual = plan.via_dual,
            "Dispatch decided"
        );
        if plan.via_dual {
            match self.solve_through_dual(solver, plan.cast()) {
                Ok(raw) => return Ok(raw),
                Err(e) => {
                    tracing::warn!(
                        component = "problem",
                        operation = "solve",
                        status = "fallback",
                        error = %e,
                        "Solving the dual failed, solving the primal"
                    );
                }
            }
            let primal = Plan {
                via_dual: false,
                ..plan
            };
            return self.solve_primal(solver, primal.cast());
        }
        self.solve_primal(solver, plan.cast())
    }

    fn solve_complex(&mut self, solver: &dyn Solver) -> Result<RawSolution> {
        let (mut real, maps) = self.real_cast()?;
        let mut raw = real.solve_raw(solver)?;
        raw.duals = raw
            .duals
            .into_iter()
            .zip(&maps)
            .map(|(d, m)| d.map(|d| m.map(d)))
            .collect();
        Ok(raw)
    }

    fn solve_primal(&mut self, solver: &dyn Solver, cast: bool) -> Result<RawSolution> {
        if !cast {
            return self.run(solver);
        }
        let mut socp = self.clone();
        socp.convert_quad_to_socp()?;
        let raw = socp.run(solver)?;
        Ok(self.restrict(raw))
    }

    fn solve_through_dual(&self, solver: &dyn Solver, cast: bool) -> Result<RawSolution> {
        let socp;
        let primal: &Problem = if cast {
            let mut p = self.clone();
            p.convert_quad_to_socp()?;
            socp = p;
            &socp
        } else {
            self
        };
        let (mut dual, map) = primal.dualize()?;
        if solver.support_level(&dual) == SupportLevel::None {
            return Err(CvxError::NotAppropriateSolver(format!(
                "{} cannot solve the dual {}",
                solver.name(),
                dual.problem_type()
            )));
        }
        let raw = dual.run(solver)?;

        for (id, v) in &raw.primals {
            if let (Some(v), Some(var)) = (v, dual.variables.get_mut(id)) {
                var.value = Some(v.clone());
            }
        }
        let duals = if raw.primals.is_empty() {
            Vec::new()
        } else {
            map.constraint_duals(&dual).unwrap_or_default()
        };
        let primals: HashMap<VarId, Option<DVector<f64>>> = raw
            .duals
            .get(map.link)
            .and_then(|d| d.as_ref())
            .and_then(|d| map.primal(d))
            .map(|x| {
                map.form
                    .primal_values(primal, &x)
                    .into_iter()
                    .map(|(id, v)| (id, Some(v)))
                    .collect()
            })
            .unwrap_or_default();

        // Infeasibility of one side is unboundedness of the other.
        let (status, objective) = match raw.meta.status {
            SolveStatus::PrimalInfeasible => {
                (SolveStatus::DualInfeasible, ObjectiveValue::Unbounded)
            }
            SolveStatus::DualInfeasible => {
                (SolveStatus::PrimalInfeasible, ObjectiveValue::Infeasible)
            }
            s => (s, raw.objective),
        };
        let mut meta = raw.meta;
        meta.status = status;
        tracing::debug!(
            component = "problem",
            operation = "solve_through_dual",
            status = status.as_str(),
            "Mapped dual solution back"
        );
        Ok(self.restrict(RawSolution {
            primals,
            duals,
            objective,
            meta,
        }))
    }

    /// Keep results for this problem's own variables and constraints. Cast
    /// quadratic constraints get no dual.
    fn restrict(&self, mut raw: RawSolution) -> RawSolution {
        raw.primals.retain(|id, _| self.variables.contains_key(id));
        raw.duals.truncate(self.constraints.len());
        for (dual, leaf) in raw.duals.iter_mut().zip(&self.constraints) {
            if matches!(leaf.kind, LeafKind::Quad { .. }) {
                *dual = None;
            }
        }
        raw
    }

    fn run(&mut self, solver: &dyn Solver) -> Result<RawSolution> {
        let mut instances = std::mem::take(&mut self.instances);
        let result = instances.run(solver, self);
        self.instances = instances;
        result
    }

    fn apply_solution(&mut self, raw: RawSolution) -> Solution {
        let RawSolution {
            mut primals,
            duals,
            objective,
            meta,
        } = raw;

        let values: Vec<(VarId, Option<DVector<f64>>)> = self
            .var_order
            .iter()
            .map(|id| (*id, primals.remove(id).flatten()))
            .collect();
        let valued = values.iter().filter(|(_, v)| v.is_some()).count();
        if valued == values.len() {
            for (id, v) in values {
                if let Some(var) = self.variables.get_mut(&id) {
                    var.value = v;
                }
            }
        } else if valued > 0 {
            tracing::warn!(
                component = "problem",
                operation = "apply_solution",
                missing = values.len() - valued,
                "Primal solution is incomplete and was dropped"
            );
        }

        let duals: Vec<Option<DualValue>> = (0..self.constraints.len())
            .map(|pos| duals.get(pos).cloned().flatten())
            .collect();
        let with_dual = duals.iter().filter(|d| d.is_some()).count();
        if with_dual == duals.len() {
            for (leaf, d) in self.constraints.iter_mut().zip(&duals) {
                leaf.dual = d.clone();
            }
        } else if with_dual > 0 {
            tracing::warn!(
                component = "problem",
                operation = "apply_solution",
                missing = duals.len() - with_dual,
                "Dual solution is incomplete and was dropped"
            );
        }
        let duals = if with_dual == duals.len() {
            duals
        } else {
            vec![None; duals.len()]
        };

        let primal = if meta.status.is_solved() {
            self.variables()
                .filter_map(|v| v.value_matrix().map(|m| (v.name.clone(), m)))
                .collect()
        } else {
            HashMap::new()
        };

        Solution {
            status: meta.status,
            value: objective.value(),
            primal,
            duals,
            solver: meta.solver,
            solve_time: meta.solve_time,
            iterations: meta.iterations,
        }
    }

    /// Value of the objective at the current variable values; zero for a
    /// feasibility problem.
    pub fn obj_value(&self) -> Result<f64> {
        if self.objective.sense == Sense::Find {
            return Ok(0.0);
        }
        match &self.objective.expr {
            None => Ok(0.0),
            Some(ObjectiveExpr::Affine(a)) => Ok(a.eval(self)?[(0, 0)]),
            Some(ObjectiveExpr::Quadratic(q)) => q.eval(self),
            Some(ObjectiveExpr::LogSumExp(l)) => l.eval(self),
        }
    }

    /// Whether the current values satisfy every bound, constraint and
    /// integrality requirement up to `tol` (`inttol` for integrality), both
    /// defaulting to `1e-5`. Returns the largest violation when they do not.
    ///
    /// # Errors
    ///
    /// `InvalidProblem` when a variable has no value.
    pub fn check_current_value_feasibility(
        &self,
        tol: Option<f64>,
        inttol: Option<f64>,
    ) -> Result<(bool, Option<f64>)> {
        let tol = tol.unwrap_or(DEFAULT_FEASIBILITY_TOL);
        let inttol = inttol.unwrap_or(DEFAULT_FEASIBILITY_TOL);
        let mut violation = 0.0_f64;
        let mut feasible = true;
        let mut record = |excess: f64, limit: f64| {
            if excess > limit {
                feasible = false;
                violation = violation.max(excess);
            }
        };

        for var in self.variables().filter(|v| v.origin.is_none()) {
            let value = var.value.as_ref().ok_or_else(|| {
                CvxError::InvalidProblem(format!("variable {} has no value", var.name))
            })?;
            if let Some(lower) = &var.lower {
                for (v, l) in value.iter().zip(lower.iter()) {
                    record(l - v, tol);
                }
            }
            if let Some(upper) = &var.upper {
                for (v, u) in value.iter().zip(upper.iter()) {
                    record(v - u, tol);
                }
            }
            if var.kind.is_integral() {
                for v in value.iter() {
                    record((v - v.round()).abs(), inttol);
                }
            }
        }

        for leaf in &self.constraints {
            if leaf.origin.is_some() {
                continue;
            }
            record(-leaf.kind.min_slack(self)?, tol);
        }
        for meta in self.metas.values().filter(|m| m.parent.is_none()) {
            match meta.kind.slack(self)? {
                Some(s) => record(-s, tol),
                None => {
                    for pos in self.meta_leaves(meta.id) {
                        record(-self.constraints[pos].kind.min_slack(self)?, tol);
                    }
                }
            }
        }

        tracing::debug!(
            component = "problem",
            operation = "check_current_value_feasibility",
            feasible,
            violation,
            "Checked current values"
        );
        Ok((feasible, (!feasible).then_some(violation)))
    }
}
