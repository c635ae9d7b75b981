//! Error types for cvxmodel.

use thiserror::Error;

/// Error type for cvxmodel operations.
#[derive(Debug, Error)]
pub enum CvxError {
    /// A variable with this name already exists in the problem.
    #[error("Duplicate name: a variable named '{0}' already exists")]
    DuplicateName(String),

    /// No variable with this name exists in the problem.
    #[error("Unknown variable: '{0}'")]
    UnknownVariable(String),

    /// Dimension mismatch between two operands.
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    /// Bounds given for a variable kind that cannot carry them.
    #[error("Unsupported bound: {0}")]
    UnsupportedBound(String),

    /// Constraint or group index out of range.
    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    /// A quadratic form is not positive semidefinite, or a relation is nonconvex.
    #[error("Nonconvex: {0}")]
    NonConvex(String),

    /// The problem cannot be dualized.
    #[error("Dualization error: {0}")]
    Dualization(String),

    /// Quadratic constraints must be cast to SOCP first.
    #[error("Quadratic constraints must be cast as SOC constraints first: {0}")]
    QuadAsSocp(String),

    /// No registered solver can handle the problem, or the requested one cannot.
    #[error("Not appropriate solver: {0}")]
    NotAppropriateSolver(String),

    /// A solver adapter was asked to import a problem it does not support.
    #[error("Inappropriate solver: {0}")]
    InappropriateSolver(String),

    /// Inequality between complex operands.
    #[error("Complex inequality: {0}")]
    ComplexInequality(String),

    /// A value required to be real has an imaginary part.
    #[error("Complex valued: {0}")]
    ComplexValued(String),

    /// The selected solver does not recognize an option.
    #[error("Unsupported option: {0}")]
    UnsupportedOption(String),

    /// Two options contradict each other.
    #[error("Conflicting options: {0}")]
    ConflictingOptions(String),

    /// An option requires another option to be set.
    #[error("Dependent option: {0}")]
    DependentOption(String),

    /// An option has an invalid value.
    #[error("Invalid option value: {0}")]
    OptionValue(String),

    /// A solver instance could not be updated incrementally.
    #[error("Problem update error: {0}")]
    ProblemUpdate(String),

    /// Solver error.
    #[error("Solver error: {0}")]
    SolverError(String),

    /// Invalid problem specification.
    #[error("Invalid problem: {0}")]
    InvalidProblem(String),

    /// Numerical error.
    #[error("Numerical error: {0}")]
    NumericalError(String),
}

impl CvxError {
    /// Shorthand for a [`CvxError::DimensionMismatch`] from two displayable values.
    pub fn mismatch(expected: impl ToString, got: impl ToString) -> Self {
        CvxError::DimensionMismatch {
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }

    /// Whether this is one of the option validation errors.
    pub fn is_option_error(&self) -> bool {
        matches!(
            self,
            CvxError::UnsupportedOption(_)
                | CvxError::ConflictingOptions(_)
                | CvxError::DependentOption(_)
                | CvxError::OptionValue(_)
        )
    }
}

/// Result type for cvxmodel operations.
pub type Result<T> = std::result::Result<T, CvxError>;
