//! Reformulations of meta constraints into leaf constraints.

use super::constraint::{Constraint, ConstraintExt, Relation};
use super::meta::{Expansion, MetaKind, VarIdAllocator};
use crate::error::{CvxError, Result};
use crate::expr::{AffExpr, VariableBuilder};

/// `|x| ≤ t`: real `x` gives `(x; -x) ≤ (t; t)`, complex `x` gives
/// `‖(Re x, Im x)‖ ≤ t`.
pub(crate) fn absolute_value(out: &mut Expansion, x: &AffExpr, t: &AffExpr) -> Result<()> {
    if x.is_real() {
        let lhs = AffExpr::vstack(&[x.clone(), -x])?;
        let tt = t.broadcast_to(x.shape())?;
        let rhs = AffExpr::vstack(&[tt.clone(), tt])?;
        out.push(lhs.leq(rhs)?);
    } else {
        let ne = AffExpr::vstack(&[x.real_part(), x.imag_part()])?;
        out.push(Constraint::soc(ne, t)?);
    }
    Ok(())
}

/// `t ≤ (∏ xᵢ)^(1/m)` as a binary tree of `u² ≤ a·b` cones.
///
/// Each level pairs its nodes left to right; an odd node out is paired with
/// `t`. Every pair gets a fresh scalar, except the final pair which binds
/// `t` itself.
pub(crate) fn geomean(
    out: &mut Expansion,
    alloc: &mut VarIdAllocator,
    x: &AffExpr,
    t: &AffExpr,
) -> Result<()> {
    let m = x.size();
    if m == 1 {
        out.push(t.leq(x.element(0)?)?);
        return Ok(());
    }

    let mut level: Vec<AffExpr> = (0..m).map(|k| x.element(k)).collect::<Result<_>>()?;
    let mut depth = 1;
    while level.len() > 1 {
        let pairs = (level.len() + 1) / 2;
        let mut next = Vec::with_capacity(pairs);
        for k in 0..pairs {
            let a = level[2 * k].clone();
            let b = level.get(2 * k + 1).cloned().unwrap_or_else(|| t.clone());
            let u = if pairs == 1 {
                t.clone()
            } else {
                out.add_var(alloc, VariableBuilder::scalar(format!("u[{}:{}]", depth, k)))
            };
            out.push(Constraint::rsoc(u.clone(), a, b)?);
            next.push(u);
        }
        level = next;
        depth += 1;
    }
    Ok(())
}

/// Best rational approximation `num/den` of `p > 0` with `den ≤ max_den`,
/// by continued fractions.
pub fn rational_approximation(p: f64, max_den: i64) -> (i64, i64) {
    let (mut p0, mut q0, mut p1, mut q1) = (0i64, 1i64, 1i64, 0i64);
    let mut x = p;
    loop {
        let a = x.floor();
        let ai = a as i64;
        let q2 = q0 + ai * q1;
        if q2 > max_den {
            break;
        }
        let p2 = p0 + ai * p1;
        p0 = p1;
        q0 = q1;
        p1 = p2;
        q1 = q2;
        let frac = x - a;
        if frac.abs() < 1e-12 || (p1 as f64 / q1 as f64 - p).abs() < 1e-15 {
            return (p1, q1);
        }
        x = 1.0 / frac;
    }
    // Semiconvergent candidate between the last two convergents.
    let k = (max_den - q0) / q1;
    let (bp, bq) = (p0 + k * p1, q0 + k * q1);
    let d1 = (bp as f64 / bq as f64 - p).abs();
    let d2 = (p1 as f64 / q1 as f64 - p).abs();
    if d2 <= d1 {
        (p1, q1)
    } else {
        (bp, bq)
    }
}

fn repeated(a: &AffExpr, ra: usize, b: &AffExpr, rb: usize) -> Result<AffExpr> {
    let parts: Vec<AffExpr> = std::iter::repeat(a.clone())
        .take(ra)
        .chain(std::iter::repeat(b.clone()).take(rb))
        .collect();
    AffExpr::vstack(&parts)
}

/// `‖x‖_p ≤ t` for `p ≥ 1`, or the generalized `‖x‖_p ≥ t` for `p < 1`.
pub(crate) fn pnorm(
    out: &mut Expansion,
    alloc: &mut VarIdAllocator,
    x: &AffExpr,
    p: f64,
    rel: Relation,
    t: &AffExpr,
) -> Result<()> {
    let x = x.vectorize();
    let m = x.size();

    if p.is_infinite() {
        out.push(x.leq(t)?);
        out.push((-&x).leq(t)?);
        return Ok(());
    }
    if p == 2.0 {
        out.push(Constraint::soc(x, t)?);
        return Ok(());
    }
    if p == 1.0 {
        let v = out.add_var(alloc, VariableBuilder::vector("v", m));
        out.push(x.leq(&v)?);
        out.push((-&x).leq(&v)?);
        out.push(v.sum().leq(t)?);
        return Ok(());
    }

    if p > 1.0 {
        let (num, den) = rational_approximation(p, 1000);
        let (num, den) = (num as usize, den as usize);
        let v = out.add_var(alloc, VariableBuilder::vector("v", m));
        let r = out.add_var(alloc, VariableBuilder::vector("r", m));
        out.push(x.leq(&v)?);
        out.push((-&x).leq(&v)?);
        out.push(r.sum().leq(t)?);
        for i in 0..m {
            let factors = repeated(&r.element(i)?, den, t, num - den)?;
            out.push(Constraint::Meta(MetaKind::geomean(&factors, v.element(i)?)?));
        }
        return Ok(());
    }

    tracing::warn!(
        component = "constraint",
        operation = "pnorm",
        status = "warning",
        p = p,
        "Generalized p-norm with p < 1 is concave and requires x ≥ 0"
    );
    let r = out.add_var(alloc, VariableBuilder::vector("r", m));
    if p > 0.0 {
        let (num, den) = rational_approximation(p, 1000);
        let (num, den) = (num as usize, den as usize);
        out.push(x.geq(0.0)?);
        out.push(r.sum().geq(t)?);
        for i in 0..m {
            let factors = repeated(&x.element(i)?, num, t, den - num)?;
            out.push(Constraint::Meta(MetaKind::geomean(&factors, r.element(i)?)?));
        }
    } else {
        let (num, den) = rational_approximation(-p, 1000);
        let (num, den) = (num as usize, den as usize);
        out.push(r.sum().leq(t)?);
        for i in 0..m {
            let factors = repeated(&r.element(i)?, den, &x.element(i)?, num)?;
            out.push(Constraint::Meta(MetaKind::geomean(&factors, t)?));
        }
    }
    Ok(())
}

/// `t ≤ det(X)^(1/n)` with `[[X, L], [Lᵀ, Diag(diag L)]] ≽ 0` and
/// `t ≤ geomean(diag L)` for a lower-triangular `L`.
pub(crate) fn detrootn(
    out: &mut Expansion,
    alloc: &mut VarIdAllocator,
    x: &AffExpr,
    t: &AffExpr,
) -> Result<()> {
    let n = x.shape().rows;
    if n == 0 {
        return Err(CvxError::InvalidProblem("determinant of an empty matrix".to_string()));
    }
    let l = out.add_var(alloc, VariableBuilder::vector("l", n * (n + 1) / 2));
    let lm = l.lower_triangular(n)?;
    let dl = lm.diag_vect()?;
    let block = AffExpr::block(&[
        vec![x.clone(), lm.clone()],
        vec![lm.transpose(), dl.diag()?],
    ])?;
    out.push(block.succeq(0.0)?);
    out.push(Constraint::Meta(MetaKind::geomean(&dl, t)?));
    Ok(())
}

/// `log Σ exp(xᵢ) ≤ b` with `Σ uᵢ ≤ 1` and `(uᵢ, 1, xᵢ - b)` in the
/// exponential cone.
pub(crate) fn log_sum_exp(
    out: &mut Expansion,
    alloc: &mut VarIdAllocator,
    x: &AffExpr,
    b: &AffExpr,
) -> Result<()> {
    let m = x.size();
    let u = out.add_var(alloc, VariableBuilder::vector("u", m));
    out.push(u.sum().leq(1.0)?);
    for i in 0..m {
        out.push(Constraint::exp_cone(u.element(i)?, 1.0, x.element(i)?.minus(b)?)?);
    }
    Ok(())
}

/// `Σ xᵢ log(xᵢ/yᵢ) ≤ t` with `Σ rᵢ ≤ t` and `(yᵢ, xᵢ, -rᵢ)` in the
/// exponential cone.
pub(crate) fn kullback_leibler(
    out: &mut Expansion,
    alloc: &mut VarIdAllocator,
    x: &AffExpr,
    y: Option<&AffExpr>,
    t: &AffExpr,
) -> Result<()> {
    let m = x.size();
    let r = out.add_var(alloc, VariableBuilder::vector("r", m));
    out.push(r.sum().leq(t)?);
    for i in 0..m {
        let yi = match y {
            Some(y) => y.element(i)?,
            None => AffExpr::scalar(1.0),
        };
        out.push(Constraint::exp_cone(yi, x.element(i)?, -&r.element(i)?)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::LeafKind;
    use crate::expr::{storage_factor, Shape, VarId, VarKind};

    fn var(id: usize, name: &str, shape: Shape) -> AffExpr {
        AffExpr::from_variable(VarId(id), name, shape, storage_factor(VarKind::Continuous, shape))
    }

    fn count(e: &Expansion) -> (usize, usize, usize) {
        let metas = e.aux_cons.iter().filter(|c| c.is_meta()).count();
        (e.aux_vars.len(), e.aux_cons.len() - metas, metas)
    }

    #[test]
    fn test_rational_approximation() {
        assert_eq!(rational_approximation(1.5, 1000), (3, 2));
        assert_eq!(rational_approximation(3.0, 1000), (3, 1));
        assert_eq!(rational_approximation(0.4, 1000), (2, 5));
        let (n, d) = rational_approximation(std::f64::consts::PI, 1000);
        assert_eq!((n, d), (355, 113));
    }

    #[test]
    fn test_geomean_shapes() {
        let t = var(0, "t", Shape::scalar());
        for (m, aux, cons) in [(1, 0, 1), (2, 0, 1), (4, 2, 3), (5, 5, 6)] {
            let x = var(1, "x", Shape::vector(m));
            let mut out = Expansion::new(String::new());
            let mut alloc = VarIdAllocator::new(2);
            geomean(&mut out, &mut alloc, &x, &t).unwrap();
            assert_eq!(out.aux_vars.len(), aux, "aux vars for m = {}", m);
            assert_eq!(out.aux_cons.len(), cons, "constraints for m = {}", m);
        }
    }

    #[test]
    fn test_pnorm_branches() {
        let x = var(0, "x", Shape::vector(3));
        let t = var(1, "t", Shape::scalar());

        let mut out = Expansion::new(String::new());
        pnorm(&mut out, &mut VarIdAllocator::new(2), &x, 1.0, Relation::Le, &t).unwrap();
        assert_eq!(count(&out), (1, 3, 0));

        let mut out = Expansion::new(String::new());
        pnorm(&mut out, &mut VarIdAllocator::new(2), &x, f64::INFINITY, Relation::Le, &t).unwrap();
        assert_eq!(count(&out), (0, 2, 0));

        let mut out = Expansion::new(String::new());
        pnorm(&mut out, &mut VarIdAllocator::new(2), &x, 3.0, Relation::Le, &t).unwrap();
        assert_eq!(count(&out), (2, 3, 3));

        let mut out = Expansion::new(String::new());
        pnorm(&mut out, &mut VarIdAllocator::new(2), &x, 0.5, Relation::Ge, &t).unwrap();
        assert_eq!(count(&out), (1, 2, 3));

        let mut out = Expansion::new(String::new());
        pnorm(&mut out, &mut VarIdAllocator::new(2), &x, -1.0, Relation::Ge, &t).unwrap();
        assert_eq!(count(&out), (1, 1, 3));
    }

    #[test]
    fn test_detrootn_block() {
        let shape = Shape::matrix(2, 2);
        let x = AffExpr::from_variable(VarId(0), "X", shape, storage_factor(VarKind::Symmetric, shape));
        let t = var(1, "t", Shape::scalar());
        let mut out = Expansion::new(String::new());
        detrootn(&mut out, &mut VarIdAllocator::new(2), &x, &t).unwrap();
        assert_eq!(count(&out), (1, 1, 1));
        match &out.aux_cons[0] {
            Constraint::Leaf(LeafKind::Lmi { lhs, .. }) => {
                assert_eq!(lhs.shape(), Shape::matrix(4, 4))
            }
            other => panic!("Expected LMI, got {:?}", other),
        }
    }

    #[test]
    fn test_exp_cone_expansions() {
        let x = var(0, "x", Shape::vector(3));
        let b = var(1, "b", Shape::scalar());
        let mut out = Expansion::new(String::new());
        log_sum_exp(&mut out, &mut VarIdAllocator::new(2), &x, &b).unwrap();
        assert_eq!(count(&out), (1, 4, 0));

        let mut out = Expansion::new(String::new());
        kullback_leibler(&mut out, &mut VarIdAllocator::new(2), &x, None, &b).unwrap();
        assert_eq!(count(&out), (1, 4, 0));
        assert!(matches!(
            out.aux_cons[1],
            Constraint::Leaf(LeafKind::ExpCone { .. })
        ));
    }
}
