//! Clarabel solver integration.
//!
//! This module provides the interface to the Clarabel conic solver. The
//! instance keeps the exported canonical form so that a later solve can
//! reuse it when the cone structure of the problem is unchanged.

use clarabel::algebra::CscMatrix as ClarabelCsc;
use clarabel::solver::{
    DefaultSettings, DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT,
};

use super::stuffing::{stuff_problem, ConeDims, StuffedProblem};
use super::{
    ExpressionKind, ObjectiveValue, OptionKey, Options, RawSolution, SolveMeta, SolveStatus,
    Solver, SolverInstance,
};
use crate::canon::CanonicalForm;
use crate::constraints::ConstraintKind;
use crate::error::{CvxError, Result};
use crate::problem::Problem;

impl From<SolverStatus> for SolveStatus {
    fn from(status: SolverStatus) -> Self {
        match status {
            SolverStatus::Solved => SolveStatus::Optimal,
            SolverStatus::AlmostSolved => SolveStatus::Suboptimal,
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                SolveStatus::PrimalInfeasible
            }
            SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
                SolveStatus::DualInfeasible
            }
            SolverStatus::MaxIterations => SolveStatus::IterationLimit,
            SolverStatus::MaxTime => SolveStatus::TimeLimit,
            SolverStatus::NumericalError | SolverStatus::InsufficientProgress => {
                SolveStatus::NumericalError
            }
            _ => SolveStatus::Unknown,
        }
    }
}

#[cfg(feature = "sdp")]
const CONSTRAINTS: &[ConstraintKind] = &[
    ConstraintKind::Affine,
    ConstraintKind::Soc,
    ConstraintKind::Rsoc,
    ConstraintKind::ExpCone,
    ConstraintKind::Lse,
    ConstraintKind::Lmi,
];

#[cfg(not(feature = "sdp"))]
const CONSTRAINTS: &[ConstraintKind] = &[
    ConstraintKind::Affine,
    ConstraintKind::Soc,
    ConstraintKind::Rsoc,
    ConstraintKind::ExpCone,
    ConstraintKind::Lse,
];

const OBJECTIVES: &[ExpressionKind] = &[
    ExpressionKind::Affine,
    ExpressionKind::Quadratic,
    ExpressionKind::LogSumExp,
];

const OPTIONS: &[OptionKey] = &[
    OptionKey::Tol,
    OptionKey::FeasTol,
    OptionKey::AbsTol,
    OptionKey::RelTol,
    OptionKey::MaxIt,
    OptionKey::TimeLimit,
];

/// The Clarabel interior point solver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClarabelSolver;

impl Solver for ClarabelSolver {
    fn name(&self) -> &'static str {
        "clarabel"
    }

    fn test_availability(&self) -> Result<()> {
        Ok(())
    }

    fn supports_integer(&self) -> bool {
        false
    }

    fn supported_objectives(&self) -> &[ExpressionKind] {
        OBJECTIVES
    }

    fn supported_constraints(&self) -> &[ConstraintKind] {
        CONSTRAINTS
    }

    fn recognized_options(&self) -> &[OptionKey] {
        OPTIONS
    }

    fn create_instance(&self) -> Box<dyn SolverInstance> {
        Box::new(ClarabelInstance::default())
    }
}

/// A problem imported into Clarabel's data format.
#[derive(Debug, Default)]
pub struct ClarabelInstance {
    form: Option<CanonicalForm>,
    stuffed: Option<StuffedProblem>,
}

impl ClarabelInstance {
    fn export(problem: &Problem) -> Result<(CanonicalForm, StuffedProblem)> {
        if !problem.is_continuous() {
            return Err(CvxError::InappropriateSolver(
                "clarabel does not support integer variables".to_string(),
            ));
        }
        let form = CanonicalForm::from_problem(problem)?;
        if !cfg!(feature = "sdp") && !form.psd.is_empty() {
            return Err(CvxError::InappropriateSolver(
                "semidefinite constraints need the `sdp` feature".to_string(),
            ));
        }
        let stuffed = stuff_problem(&form);
        Ok((form, stuffed))
    }
}

impl SolverInstance for ClarabelInstance {
    fn reset_problem(&mut self) {
        self.form = None;
        self.stuffed = None;
    }

    fn import_problem(&mut self, problem: &Problem) -> Result<()> {
        let (form, stuffed) = Self::export(problem)?;
        tracing::debug!(
            component = "clarabel",
            operation = "import_problem",
            status = "success",
            columns = form.ncols(),
            rows = stuffed.b.len(),
            "Imported problem"
        );
        self.form = Some(form);
        self.stuffed = Some(stuffed);
        Ok(())
    }

    fn update_problem(&mut self, problem: &Problem) -> Result<()> {
        let (form, stuffed) = Self::export(problem)?;
        let same_cones = self
            .stuffed
            .as_ref()
            .map_or(false, |s| s.cone_dims == stuffed.cone_dims && s.q.len() == stuffed.q.len());
        if !same_cones {
            return Err(CvxError::ProblemUpdate(
                "cone structure changed".to_string(),
            ));
        }
        self.form = Some(form);
        self.stuffed = Some(stuffed);
        Ok(())
    }

    fn solve(&mut self, problem: &Problem) -> Result<RawSolution> {
        if self.form.is_none() {
            self.import_problem(problem)?;
        }
        let (form, stuffed) = match (&self.form, &self.stuffed) {
            (Some(f), Some(s)) => (f, s),
            _ => {
                return Err(CvxError::SolverError(
                    "no problem imported".to_string(),
                ))
            }
        };
        let options = problem.options();

        let p = to_clarabel_csc(&stuffed.p);
        let a = to_clarabel_csc(&stuffed.a);
        let cones = to_clarabel_cones(&stuffed.cone_dims);
        let settings = settings(options)?;

        let mut solver = DefaultSolver::new(&p, &stuffed.q, &a, &stuffed.b, &cones, settings)
            .map_err(|e| CvxError::SolverError(format!("clarabel setup failed: {}", e)))?;
        solver.solve();

        let status: SolveStatus = solver.solution.status.into();
        let meta = SolveMeta {
            status,
            solver: "clarabel".to_string(),
            solve_time: solver.solution.solve_time,
            iterations: solver.info.iterations,
        };
        tracing::debug!(
            component = "clarabel",
            operation = "solve",
            status = status.as_str(),
            iterations = meta.iterations,
            solve_time = meta.solve_time,
            "Clarabel finished"
        );

        if !status.is_solved() {
            let objective = match status {
                SolveStatus::PrimalInfeasible => ObjectiveValue::Infeasible,
                SolveStatus::DualInfeasible => ObjectiveValue::Unbounded,
                _ => ObjectiveValue::Unknown,
            };
            return Ok(RawSolution {
                primals: Default::default(),
                duals: Vec::new(),
                objective,
                meta,
            });
        }

        let x = nalgebra::DVector::from_column_slice(&solver.solution.x);
        let primals = if options.noprimals {
            Default::default()
        } else {
            form.primal_values(problem, &x)
                .into_iter()
                .map(|(id, v)| (id, Some(v)))
                .collect()
        };
        let duals = if options.noduals {
            Vec::new()
        } else {
            form.constraint_duals(&stuffed.unstuff_duals(&solver.solution.z))
        };

        Ok(RawSolution {
            primals,
            duals,
            objective: ObjectiveValue::Value(form.objective_value(&x)),
            meta,
        })
    }
}

/// Map options onto Clarabel settings.
fn settings(options: &Options) -> Result<DefaultSettings<f64>> {
    let mut builder = DefaultSettingsBuilder::default();
    builder
        .verbose(options.verbosity >= 2)
        .tol_gap_abs(options.abstol())
        .tol_gap_rel(options.reltol())
        .tol_feas(options.feastol());
    if let Some(maxit) = options.maxit {
        builder.max_iter(maxit);
    }
    if let Some(t) = options.timelimit {
        builder.time_limit(t);
    }
    builder
        .build()
        .map_err(|e| CvxError::SolverError(format!("invalid clarabel settings: {}", e)))
}

/// Convert nalgebra CSC to Clarabel CSC.
fn to_clarabel_csc(m: &nalgebra_sparse::CscMatrix<f64>) -> ClarabelCsc<f64> {
    ClarabelCsc::new(
        m.nrows(),
        m.ncols(),
        m.col_offsets().to_vec(),
        m.row_indices().to_vec(),
        m.values().to_vec(),
    )
}

/// Convert cone dimensions to Clarabel cones.
fn to_clarabel_cones(dims: &ConeDims) -> Vec<SupportedConeT<f64>> {
    let mut cones = Vec::new();

    if dims.zero > 0 {
        cones.push(SupportedConeT::ZeroConeT(dims.zero));
    }

    if dims.nonneg > 0 {
        cones.push(SupportedConeT::NonnegativeConeT(dims.nonneg));
    }

    for &soc_dim in &dims.soc {
        cones.push(SupportedConeT::SecondOrderConeT(soc_dim));
    }

    for _ in 0..dims.exp {
        cones.push(SupportedConeT::ExponentialConeT());
    }

    #[cfg(feature = "sdp")]
    for &side in &dims.psd {
        cones.push(SupportedConeT::PSDTriangleConeT(side));
    }

    cones
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(SolveStatus::from(SolverStatus::Solved), SolveStatus::Optimal);
        assert_eq!(
            SolveStatus::from(SolverStatus::AlmostPrimalInfeasible),
            SolveStatus::PrimalInfeasible
        );
        assert_eq!(SolveStatus::from(SolverStatus::MaxTime), SolveStatus::TimeLimit);
        assert_eq!(SolveStatus::from(SolverStatus::Unsolved), SolveStatus::Unknown);
    }

    #[test]
    fn test_to_clarabel_cones() {
        let dims = ConeDims {
            zero: 2,
            nonneg: 3,
            soc: vec![4],
            exp: 1,
            psd: vec![],
        };
        let cones = to_clarabel_cones(&dims);
        assert_eq!(cones.len(), 4);
    }

    #[test]
    fn test_settings_from_options() {
        let s = settings(&Options::default().with_maxit(50)).unwrap();
        assert_eq!(s.max_iter, 50);
        assert!(!s.verbose);
        assert!((s.tol_feas - 1e-8).abs() < 1e-20);
    }

    #[test]
    fn test_descriptor() {
        let s = ClarabelSolver;
        assert_eq!(s.name(), "clarabel");
        assert!(!s.supports_integer());
        assert!(s.supported_constraints().contains(&ConstraintKind::Soc));
        assert!(!s.supported_constraints().contains(&ConstraintKind::Quad));
        assert!(s.recognized_options().contains(&OptionKey::MaxIt));
    }
}
