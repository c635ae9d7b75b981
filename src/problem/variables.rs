//! Variable management: insertion, removal, values and bounds.

use nalgebra::{Complex, DMatrix};

use super::{ComplexVar, Problem};
use crate::constraints::MetaId;
use crate::error::{CvxError, Result};
use crate::expr::{AffExpr, Bound, Shape, VarId, VarKind, Variable, VariableBuilder};

impl Problem {
    /// Add a variable and return its expression.
    ///
    /// Complex and Hermitian variables are stored as two real variables
    /// `name_RE` and `name_IM`; the returned expression is `re + i·im`.
    ///
    /// # Errors
    ///
    /// `DuplicateName` if the name is taken, `UnsupportedBound` for bounds on
    /// antisymmetric or complex variables, `DimensionMismatch` for a
    /// non-square shape where one is needed.
    pub fn add_variable(&mut self, builder: VariableBuilder) -> Result<AffExpr> {
        let name = builder.name.clone();
        if self.var_names.contains_key(&name) || self.complex_vars.contains_key(&name) {
            return Err(CvxError::DuplicateName(name));
        }
        if builder.kind.is_square() && !builder.shape.is_square() {
            return Err(CvxError::mismatch("a square shape", builder.shape));
        }

        if builder.kind.is_complex() {
            if builder.has_bounds() {
                return Err(CvxError::UnsupportedBound(format!(
                    "{} variable {} cannot have bounds",
                    builder.kind, name
                )));
            }
            let (re_kind, im_kind) = match builder.kind {
                VarKind::Hermitian => (VarKind::Symmetric, VarKind::Antisymmetric),
                _ => (VarKind::Continuous, VarKind::Continuous),
            };
            let re_name = format!("{}_RE", name);
            let im_name = format!("{}_IM", name);
            for part in [&re_name, &im_name] {
                if self.var_names.contains_key(part) {
                    return Err(CvxError::DuplicateName(part.clone()));
                }
            }
            let re = self.next_id();
            let im = self.next_id();
            let re_expr = self.insert_variable(
                re,
                VariableBuilder::new(re_name, builder.shape).kind(re_kind),
                None,
            )?;
            let im_expr = self.insert_variable(
                im,
                VariableBuilder::new(im_name, builder.shape).kind(im_kind),
                None,
            )?;
            self.complex_vars.insert(
                name.clone(),
                ComplexVar {
                    re,
                    im,
                    kind: builder.kind,
                    shape: builder.shape,
                },
            );
            let expr = re_expr
                .plus(im_expr.scale_complex(Complex::new(0.0, 1.0)))?
                .with_string(name);
            return Ok(expr);
        }

        let id = self.next_id();
        self.insert_variable(id, builder, None)
    }

    fn next_id(&mut self) -> VarId {
        let id = VarId(self.next_var_id);
        self.next_var_id += 1;
        id
    }

    /// Insert a real variable under a reserved id.
    pub(crate) fn insert_variable(
        &mut self,
        id: VarId,
        builder: VariableBuilder,
        origin: Option<MetaId>,
    ) -> Result<AffExpr> {
        let VariableBuilder {
            name,
            shape,
            kind,
            lower,
            upper,
        } = builder;
        if self.var_names.contains_key(&name) {
            return Err(CvxError::DuplicateName(name));
        }
        if kind.is_complex() {
            return Err(CvxError::InvalidProblem(format!(
                "{} variable {} must be split into real parts",
                kind, name
            )));
        }
        if kind == VarKind::Antisymmetric && (lower.is_some() || upper.is_some()) {
            return Err(CvxError::UnsupportedBound(format!(
                "antisymmetric variable {} cannot have bounds",
                name
            )));
        }
        let lower = lower
            .map(|b| Variable::bound_vector(kind, shape, &b))
            .transpose()?;
        let upper = upper
            .map(|b| Variable::bound_vector(kind, shape, &b))
            .transpose()?;
        let (lower, upper) = restrict_domain(kind, shape, lower, upper);

        let start = self.number_of_vars;
        let dof = kind.dof(shape);
        let var = Variable {
            id,
            name: name.clone(),
            shape,
            kind,
            lower,
            upper,
            start,
            end: start + dof,
            origin,
            semidef: false,
            value: None,
        };
        let expr = var.expr();
        self.number_of_vars += dof;
        self.next_var_id = self.next_var_id.max(id.0 + 1);
        self.var_names.insert(name.clone(), id);
        self.var_order.push(id);
        self.variables.insert(id, var);
        self.instances.reset_all();

        tracing::debug!(
            component = "problem",
            operation = "add_variable",
            status = "success",
            name = %name,
            kind = kind.as_str(),
            start = start,
            dof = dof,
            "Added variable"
        );
        Ok(expr)
    }

    /// Remove a variable by name. Constraints referencing it are not checked.
    pub fn remove_variable(&mut self, name: &str) -> Result<()> {
        if let Some(cv) = self.complex_vars.remove(name) {
            self.drop_variable(cv.re);
            self.drop_variable(cv.im);
        } else {
            let id = *self
                .var_names
                .get(name)
                .ok_or_else(|| CvxError::UnknownVariable(name.to_string()))?;
            self.drop_variable(id);
        }
        self.reassign_ranges();
        self.instances.reset_all();
        tracing::debug!(
            component = "problem",
            operation = "remove_variable",
            status = "success",
            name = %name,
            "Removed variable"
        );
        Ok(())
    }

    pub(crate) fn drop_variable(&mut self, id: VarId) {
        if let Some(var) = self.variables.remove(&id) {
            self.var_names.remove(&var.name);
            self.var_order.retain(|v| *v != id);
        }
    }

    /// Replay the insertion order to make column ranges contiguous again.
    pub(crate) fn reassign_ranges(&mut self) {
        let mut start = 0;
        for id in &self.var_order {
            if let Some(var) = self.variables.get_mut(id) {
                let dof = var.dof();
                var.start = start;
                var.end = start + dof;
                start += dof;
            }
        }
        self.number_of_vars = start;
    }

    /// Variable by handle.
    pub fn variable(&self, id: VarId) -> Option<&Variable> {
        self.variables.get(&id)
    }

    /// Variable by name; complex variables are reached through their parts.
    pub fn variable_by_name(&self, name: &str) -> Option<&Variable> {
        self.var_names.get(name).and_then(|id| self.variables.get(id))
    }

    /// Variables in column order.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.var_order.iter().filter_map(|id| self.variables.get(id))
    }

    /// Names of the variables in column order.
    pub fn variable_names(&self) -> Vec<&str> {
        self.variables().map(|v| v.name.as_str()).collect()
    }

    /// Expression of a variable by name, complex ones included.
    pub fn get_variable(&self, name: &str) -> Result<AffExpr> {
        if let Some(cv) = self.complex_vars.get(name) {
            let re = self.var_expr(cv.re)?;
            let im = self.var_expr(cv.im)?;
            return Ok(re
                .plus(im.scale_complex(Complex::new(0.0, 1.0)))?
                .with_string(name));
        }
        self.variable_by_name(name)
            .map(|v| v.expr())
            .ok_or_else(|| CvxError::UnknownVariable(name.to_string()))
    }

    fn var_expr(&self, id: VarId) -> Result<AffExpr> {
        self.variable(id)
            .map(|v| v.expr())
            .ok_or_else(|| CvxError::UnknownVariable(id.to_string()))
    }

    /// Value of a real variable as a full matrix.
    pub fn get_valued_variable(&self, name: &str) -> Result<DMatrix<f64>> {
        let var = self
            .variable_by_name(name)
            .ok_or_else(|| CvxError::UnknownVariable(name.to_string()))?;
        var.value_matrix().ok_or_else(|| {
            CvxError::InvalidProblem(format!("variable {} has no value", name))
        })
    }

    /// Value of a complex variable, assembled from its parts.
    pub fn get_valued_complex_variable(&self, name: &str) -> Result<DMatrix<Complex<f64>>> {
        let cv = self
            .complex_vars
            .get(name)
            .ok_or_else(|| CvxError::UnknownVariable(name.to_string()))?;
        let part = |id: VarId| -> Result<DMatrix<f64>> {
            self.variable(id)
                .and_then(|v| v.value_matrix())
                .ok_or_else(|| CvxError::InvalidProblem(format!("variable {} has no value", name)))
        };
        let (re, im) = (part(cv.re)?, part(cv.im)?);
        Ok(re.zip_map(&im, |a, b| Complex::new(a, b)))
    }

    /// Set the value of a real variable from a full matrix.
    pub fn set_var_value(&mut self, name: &str, value: &DMatrix<f64>) -> Result<()> {
        if let Some(cv) = self.complex_vars.get(name).cloned() {
            let zero = DMatrix::zeros(value.nrows(), value.ncols());
            self.set_part(cv.re, value)?;
            return self.set_part(cv.im, &zero);
        }
        let id = *self
            .var_names
            .get(name)
            .ok_or_else(|| CvxError::UnknownVariable(name.to_string()))?;
        self.set_part(id, value)
    }

    /// Set the value of a complex variable; the parts get `Re` and `Im`.
    pub fn set_complex_var_value(&mut self, name: &str, value: &DMatrix<Complex<f64>>) -> Result<()> {
        let cv = self
            .complex_vars
            .get(name)
            .cloned()
            .ok_or_else(|| CvxError::UnknownVariable(name.to_string()))?;
        self.set_part(cv.re, &value.map(|c| c.re))?;
        self.set_part(cv.im, &value.map(|c| c.im))
    }

    fn set_part(&mut self, id: VarId, value: &DMatrix<f64>) -> Result<()> {
        let var = self
            .variables
            .get_mut(&id)
            .ok_or_else(|| CvxError::UnknownVariable(id.to_string()))?;
        var.set_value_matrix(value)
    }

    /// Forget the values of all variables.
    pub fn clear_values(&mut self) {
        for var in self.variables.values_mut() {
            var.value = None;
        }
    }

    /// Replace the bounds of a variable.
    pub fn set_var_bounds(
        &mut self,
        name: &str,
        lower: Option<Bound>,
        upper: Option<Bound>,
    ) -> Result<()> {
        if self.complex_vars.contains_key(name) {
            return Err(CvxError::UnsupportedBound(format!(
                "complex variable {} cannot have bounds",
                name
            )));
        }
        let id = *self
            .var_names
            .get(name)
            .ok_or_else(|| CvxError::UnknownVariable(name.to_string()))?;
        let (kind, shape) = self
            .variable(id)
            .map(|v| (v.kind, v.shape))
            .ok_or_else(|| CvxError::UnknownVariable(name.to_string()))?;
        if kind == VarKind::Antisymmetric && (lower.is_some() || upper.is_some()) {
            return Err(CvxError::UnsupportedBound(format!(
                "antisymmetric variable {} cannot have bounds",
                name
            )));
        }
        let (lower, upper) = restrict_domain(
            kind,
            shape,
            bound_of(kind, shape, lower)?,
            bound_of(kind, shape, upper)?,
        );
        if let Some(var) = self.variables.get_mut(&id) {
            var.lower = lower;
            var.upper = upper;
        }
        self.instances.reset_all();
        Ok(())
    }

    /// Drop every variable bound. Binary variables keep their `[0, 1]` domain.
    pub fn remove_all_variable_bounds(&mut self) {
        for var in self.variables.values_mut() {
            if var.kind == VarKind::Binary {
                continue;
            }
            var.lower = None;
            var.upper = None;
        }
        self.instances.reset_all();
    }

    /// Whether no variable is integral.
    pub fn is_continuous(&self) -> bool {
        self.variables().all(|v| !v.kind.is_integral())
    }

    /// Whether every variable is integral.
    pub fn is_pure_integer(&self) -> bool {
        !self.var_order.is_empty() && self.variables().all(|v| v.kind.is_integral())
    }

    /// Shape and kind of a complex variable.
    pub fn complex_variable_info(&self, name: &str) -> Option<(VarKind, Shape)> {
        self.complex_vars.get(name).map(|cv| (cv.kind, cv.shape))
    }
}

fn bound_of(
    kind: VarKind,
    shape: Shape,
    bound: Option<Bound>,
) -> Result<Option<nalgebra::DVector<f64>>> {
    bound
        .map(|b| Variable::bound_vector(kind, shape, &b))
        .transpose()
}

/// Intersect bounds with the domain implied by the kind; binaries stay
/// within `[0, 1]`.
fn restrict_domain(
    kind: VarKind,
    shape: Shape,
    lower: Option<nalgebra::DVector<f64>>,
    upper: Option<nalgebra::DVector<f64>>,
) -> (Option<nalgebra::DVector<f64>>, Option<nalgebra::DVector<f64>>) {
    match kind {
        VarKind::Binary => {
            let dof = kind.dof(shape);
            (
                Some(tighten(lower, dof, 0.0, f64::max)),
                Some(tighten(upper, dof, 1.0, f64::min)),
            )
        }
        _ => (lower, upper),
    }
}

/// Combine an optional bound with a fixed one entrywise.
fn tighten(
    bound: Option<nalgebra::DVector<f64>>,
    len: usize,
    fixed: f64,
    pick: fn(f64, f64) -> f64,
) -> nalgebra::DVector<f64> {
    match bound {
        Some(b) => b.map(|v| pick(v, fixed)),
        None => nalgebra::DVector::from_element(len, fixed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_contiguous() {
        let mut p = Problem::new();
        p.add_variable(VariableBuilder::vector("x", 3)).unwrap();
        p.add_variable(VariableBuilder::matrix("S", 3, 3).symmetric()).unwrap();
        p.add_variable(VariableBuilder::matrix("A", 3, 3).antisymmetric()).unwrap();
        let ranges: Vec<(usize, usize)> = p.variables().map(|v| (v.start, v.end)).collect();
        assert_eq!(ranges, vec![(0, 3), (3, 9), (9, 12)]);
        assert_eq!(p.number_of_vars(), 12);

        p.remove_variable("S").unwrap();
        let ranges: Vec<(usize, usize)> = p.variables().map(|v| (v.start, v.end)).collect();
        assert_eq!(ranges, vec![(0, 3), (3, 6)]);
        assert_eq!(p.number_of_vars(), 6);
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let mut p = Problem::new();
        p.add_variable(VariableBuilder::scalar("x")).unwrap();
        assert!(matches!(
            p.add_variable(VariableBuilder::scalar("x")),
            Err(CvxError::DuplicateName(_))
        ));
        assert!(matches!(
            p.remove_variable("y"),
            Err(CvxError::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_antisymmetric_bounds_rejected() {
        let mut p = Problem::new();
        let r = p.add_variable(VariableBuilder::matrix("A", 2, 2).antisymmetric().lower(0.0));
        assert!(matches!(r, Err(CvxError::UnsupportedBound(_))));
        p.add_variable(VariableBuilder::matrix("A", 2, 2).antisymmetric()).unwrap();
        assert!(matches!(
            p.set_var_bounds("A", Some(Bound::Scalar(0.0)), None),
            Err(CvxError::UnsupportedBound(_))
        ));
    }

    #[test]
    fn test_complex_variable_parts() {
        let mut p = Problem::new();
        let z = p.add_variable(VariableBuilder::matrix("Z", 2, 2).hermitian()).unwrap();
        assert!(!z.is_real());
        assert!(p.is_complex());
        assert_eq!(p.variable_names(), vec!["Z_RE", "Z_IM"]);
        assert_eq!(p.variable_by_name("Z_RE").unwrap().kind, VarKind::Symmetric);
        assert_eq!(p.variable_by_name("Z_IM").unwrap().kind, VarKind::Antisymmetric);
        assert_eq!(p.number_of_vars(), 4);

        let v = DMatrix::from_row_slice(2, 2, &[
            Complex::new(1.0, 0.0), Complex::new(2.0, 1.0),
            Complex::new(2.0, -1.0), Complex::new(3.0, 0.0),
        ]);
        p.set_complex_var_value("Z", &v).unwrap();
        let back = p.get_valued_complex_variable("Z").unwrap();
        assert!((back[(0, 1)] - Complex::new(2.0, 1.0)).norm() < 1e-12);
        assert!((back[(1, 0)] - Complex::new(2.0, -1.0)).norm() < 1e-12);
    }

    #[test]
    fn test_binary_domain() {
        let mut p = Problem::new();
        p.add_variable(VariableBuilder::vector("b", 2).binary()).unwrap();
        let b = p.variable_by_name("b").unwrap();
        assert_eq!(b.lower.as_ref().unwrap().as_slice(), &[0.0, 0.0]);
        assert_eq!(b.upper.as_ref().unwrap().as_slice(), &[1.0, 1.0]);
        assert!(p.is_pure_integer());
        assert!(!p.is_continuous());
    }

    #[test]
    fn test_binary_bounds_stay_in_domain() {
        let mut p = Problem::new();
        p.add_variable(VariableBuilder::vector("b", 2).binary()).unwrap();
        p.set_var_bounds("b", Some(Bound::Scalar(-3.0)), Some(Bound::Scalar(7.0)))
            .unwrap();
        let b = p.variable_by_name("b").unwrap();
        assert_eq!(b.lower.as_ref().unwrap().as_slice(), &[0.0, 0.0]);
        assert_eq!(b.upper.as_ref().unwrap().as_slice(), &[1.0, 1.0]);

        p.set_var_bounds("b", None, Some(Bound::Scalar(0.0))).unwrap();
        let b = p.variable_by_name("b").unwrap();
        assert_eq!(b.lower.as_ref().unwrap().as_slice(), &[0.0, 0.0]);
        assert_eq!(b.upper.as_ref().unwrap().as_slice(), &[0.0, 0.0]);
    }
}
