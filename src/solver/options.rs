//! Solver options.
//!
//! Options are a typed struct with defaults. [`Options::validate`] checks
//! values and dependencies; [`Options::check_recognized`] checks that the
//! selected solver understands every option that differs from its default.
//! Violations are errors only under `strict_options`, otherwise they are
//! logged and the option is ignored.

use std::fmt;

use crate::error::{CvxError, Result};

/// Algorithm for LP relaxations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LpMethod {
    Primal,
    Dual,
    Barrier,
    Network,
    Sifting,
    Concurrent,
}

/// Names of the options, used for recognition tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OptionKey {
    StrictOptions,
    Verbosity,
    Solver,
    Tol,
    FeasTol,
    AbsTol,
    RelTol,
    MaxIt,
    NoPrimals,
    NoDuals,
    TimeLimit,
    GapLim,
    HotStart,
    SolveViaDual,
    UboundLimit,
    LboundLimit,
    PoolSize,
    PoolRelGap,
    PoolAbsGap,
    LpRootMethod,
    LpNodeMethod,
    TreeMemory,
    NbSol,
}

impl OptionKey {
    pub const ALL: [OptionKey; 23] = [
        OptionKey::StrictOptions,
        OptionKey::Verbosity,
        OptionKey::Solver,
        OptionKey::Tol,
        OptionKey::FeasTol,
        OptionKey::AbsTol,
        OptionKey::RelTol,
        OptionKey::MaxIt,
        OptionKey::NoPrimals,
        OptionKey::NoDuals,
        OptionKey::TimeLimit,
        OptionKey::GapLim,
        OptionKey::HotStart,
        OptionKey::SolveViaDual,
        OptionKey::UboundLimit,
        OptionKey::LboundLimit,
        OptionKey::PoolSize,
        OptionKey::PoolRelGap,
        OptionKey::PoolAbsGap,
        OptionKey::LpRootMethod,
        OptionKey::LpNodeMethod,
        OptionKey::TreeMemory,
        OptionKey::NbSol,
    ];

    /// Options handled by the modeling layer itself, which every solver
    /// accepts.
    pub const GENERIC: [OptionKey; 6] = [
        OptionKey::StrictOptions,
        OptionKey::Verbosity,
        OptionKey::Solver,
        OptionKey::NoPrimals,
        OptionKey::NoDuals,
        OptionKey::SolveViaDual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OptionKey::StrictOptions => "strict_options",
            OptionKey::Verbosity => "verbosity",
            OptionKey::Solver => "solver",
            OptionKey::Tol => "tol",
            OptionKey::FeasTol => "feastol",
            OptionKey::AbsTol => "abstol",
            OptionKey::RelTol => "reltol",
            OptionKey::MaxIt => "maxit",
            OptionKey::NoPrimals => "noprimals",
            OptionKey::NoDuals => "noduals",
            OptionKey::TimeLimit => "timelimit",
            OptionKey::GapLim => "gaplim",
            OptionKey::HotStart => "hotstart",
            OptionKey::SolveViaDual => "solve_via_dual",
            OptionKey::UboundLimit => "uboundlimit",
            OptionKey::LboundLimit => "lboundlimit",
            OptionKey::PoolSize => "pool_size",
            OptionKey::PoolRelGap => "pool_relgap",
            OptionKey::PoolAbsGap => "pool_absgap",
            OptionKey::LpRootMethod => "lp_root_method",
            OptionKey::LpNodeMethod => "lp_node_method",
            OptionKey::TreeMemory => "treememory",
            OptionKey::NbSol => "nbsol",
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Solve options.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Turn option warnings into errors.
    pub strict_options: bool,
    /// 0 is silent, 1 logs dispatch decisions, 2 and above also enables
    /// solver output.
    pub verbosity: i32,
    /// Solver name; `None` lets the registry choose.
    pub solver: Option<String>,
    /// Default for the three specific tolerances.
    pub tol: f64,
    pub feastol: Option<f64>,
    pub abstol: Option<f64>,
    pub reltol: Option<f64>,
    pub maxit: Option<u32>,
    pub noprimals: bool,
    pub noduals: bool,
    /// Seconds.
    pub timelimit: Option<f64>,
    pub gaplim: f64,
    pub hotstart: bool,
    /// `None` decides heuristically.
    pub solve_via_dual: Option<bool>,
    pub uboundlimit: Option<f64>,
    pub lboundlimit: Option<f64>,
    pub pool_size: Option<usize>,
    pub pool_relgap: Option<f64>,
    pub pool_absgap: Option<f64>,
    pub lp_root_method: Option<LpMethod>,
    pub lp_node_method: Option<LpMethod>,
    /// Megabytes.
    pub treememory: Option<usize>,
    pub nbsol: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            strict_options: false,
            verbosity: 1,
            solver: None,
            tol: 1e-8,
            feastol: None,
            abstol: None,
            reltol: None,
            maxit: None,
            noprimals: false,
            noduals: false,
            timelimit: None,
            gaplim: 1e-4,
            hotstart: false,
            solve_via_dual: None,
            uboundlimit: None,
            lboundlimit: None,
            pool_size: None,
            pool_relgap: None,
            pool_absgap: None,
            lp_root_method: None,
            lp_node_method: None,
            treememory: None,
            nbsol: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_solver(mut self, name: impl Into<String>) -> Self {
        self.solver = Some(name.into());
        self
    }

    pub fn with_verbosity(mut self, verbosity: i32) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_strict_options(mut self, strict: bool) -> Self {
        self.strict_options = strict;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_maxit(mut self, maxit: u32) -> Self {
        self.maxit = Some(maxit);
        self
    }

    pub fn with_timelimit(mut self, seconds: f64) -> Self {
        self.timelimit = Some(seconds);
        self
    }

    pub fn with_solve_via_dual(mut self, via_dual: bool) -> Self {
        self.solve_via_dual = Some(via_dual);
        self
    }

    pub fn with_noprimals(mut self, noprimals: bool) -> Self {
        self.noprimals = noprimals;
        self
    }

    pub fn with_noduals(mut self, noduals: bool) -> Self {
        self.noduals = noduals;
        self
    }

    pub fn feastol(&self) -> f64 {
        self.feastol.unwrap_or(self.tol)
    }

    pub fn abstol(&self) -> f64 {
        self.abstol.unwrap_or(self.tol)
    }

    pub fn reltol(&self) -> f64 {
        self.reltol.unwrap_or(self.tol)
    }

    /// Whether `key` differs from its default.
    pub fn is_set(&self, key: OptionKey) -> bool {
        let d = Options::default();
        match key {
            OptionKey::StrictOptions => self.strict_options != d.strict_options,
            OptionKey::Verbosity => self.verbosity != d.verbosity,
            OptionKey::Solver => self.solver.is_some(),
            OptionKey::Tol => self.tol != d.tol,
            OptionKey::FeasTol => self.feastol.is_some(),
            OptionKey::AbsTol => self.abstol.is_some(),
            OptionKey::RelTol => self.reltol.is_some(),
            OptionKey::MaxIt => self.maxit.is_some(),
            OptionKey::NoPrimals => self.noprimals,
            OptionKey::NoDuals => self.noduals,
            OptionKey::TimeLimit => self.timelimit.is_some(),
            OptionKey::GapLim => self.gaplim != d.gaplim,
            OptionKey::HotStart => self.hotstart,
            OptionKey::SolveViaDual => self.solve_via_dual.is_some(),
            OptionKey::UboundLimit => self.uboundlimit.is_some(),
            OptionKey::LboundLimit => self.lboundlimit.is_some(),
            OptionKey::PoolSize => self.pool_size.is_some(),
            OptionKey::PoolRelGap => self.pool_relgap.is_some(),
            OptionKey::PoolAbsGap => self.pool_absgap.is_some(),
            OptionKey::LpRootMethod => self.lp_root_method.is_some(),
            OptionKey::LpNodeMethod => self.lp_node_method.is_some(),
            OptionKey::TreeMemory => self.treememory.is_some(),
            OptionKey::NbSol => self.nbsol.is_some(),
        }
    }

    /// Check values and option dependencies.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            (OptionKey::Tol, Some(self.tol)),
            (OptionKey::FeasTol, self.feastol),
            (OptionKey::AbsTol, self.abstol),
            (OptionKey::RelTol, self.reltol),
            (OptionKey::TimeLimit, self.timelimit),
        ];
        for (key, value) in positive {
            if let Some(v) = value {
                if !(v > 0.0) {
                    self.report(CvxError::OptionValue(format!(
                        "{} must be positive, got {}",
                        key, v
                    )))?;
                }
            }
        }
        if self.maxit == Some(0) {
            self.report(CvxError::OptionValue("maxit must be at least 1".to_string()))?;
        }
        if self.gaplim < 0.0 {
            self.report(CvxError::OptionValue(format!(
                "gaplim must be non-negative, got {}",
                self.gaplim
            )))?;
        }
        if (self.pool_relgap.is_some() || self.pool_absgap.is_some()) && self.pool_size.is_none() {
            self.report(CvxError::DependentOption(
                "pool_relgap and pool_absgap require pool_size".to_string(),
            ))?;
        }
        if let (Some(lb), Some(ub)) = (self.lboundlimit, self.uboundlimit) {
            if lb > ub {
                self.report(CvxError::ConflictingOptions(format!(
                    "lboundlimit {} exceeds uboundlimit {}",
                    lb, ub
                )))?;
            }
        }
        if self.hotstart && self.solve_via_dual == Some(true) {
            self.report(CvxError::ConflictingOptions(
                "hotstart cannot be used when solving via the dual".to_string(),
            ))?;
        }
        Ok(())
    }

    /// Check that every set option is understood by a solver.
    pub fn check_recognized(&self, solver: &str, recognized: &[OptionKey]) -> Result<()> {
        for key in OptionKey::ALL {
            if self.is_set(key)
                && !OptionKey::GENERIC.contains(&key)
                && !recognized.contains(&key)
            {
                self.report(CvxError::UnsupportedOption(format!(
                    "{} is not supported by {}",
                    key, solver
                )))?;
            }
        }
        Ok(())
    }

    /// Return the error under `strict_options`, otherwise log and continue.
    fn report(&self, err: CvxError) -> Result<()> {
        if self.strict_options {
            return Err(err);
        }
        tracing::warn!(
            component = "options",
            operation = "validate",
            status = "ignored",
            error = %err,
            "Ignoring option"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let o = Options::default();
        assert_eq!(o.verbosity, 1);
        assert!(!o.strict_options);
        assert!((o.tol - 1e-8).abs() < 1e-20);
        assert!((o.feastol() - 1e-8).abs() < 1e-20);
        assert!((o.gaplim - 1e-4).abs() < 1e-20);
        assert!(o.solve_via_dual.is_none());
        assert!(OptionKey::ALL.iter().all(|k| !o.is_set(*k)));
    }

    #[test]
    fn test_strict_validation() {
        let o = Options::default().with_tol(-1.0);
        assert!(o.validate().is_ok());
        let err = o.with_strict_options(true).validate().unwrap_err();
        assert!(matches!(err, CvxError::OptionValue(_)));
        assert!(err.is_option_error());

        let mut o = Options::default().with_strict_options(true);
        o.pool_relgap = Some(0.1);
        assert!(matches!(o.validate(), Err(CvxError::DependentOption(_))));

        let o = Options::default()
            .with_strict_options(true)
            .with_maxit(0);
        assert!(matches!(o.validate(), Err(CvxError::OptionValue(_))));

        let mut o = Options::default().with_strict_options(true);
        o.hotstart = true;
        o.solve_via_dual = Some(true);
        assert!(matches!(o.validate(), Err(CvxError::ConflictingOptions(_))));
    }

    #[test]
    fn test_recognition() {
        let mut o = Options::default().with_strict_options(true).with_solver("x");
        assert!(o.check_recognized("x", &[]).is_ok());
        o.treememory = Some(100);
        assert!(matches!(
            o.check_recognized("x", &[OptionKey::Tol]),
            Err(CvxError::UnsupportedOption(_))
        ));
        assert!(o.check_recognized("x", &[OptionKey::TreeMemory]).is_ok());
    }
}
