//! Constraint management: insertion, meta constraint splicing, lookup and
//! removal.

use std::collections::BTreeSet;

use super::naming::group_string;
use super::{ConstraintGroup, ConstraintIndex, Numbering, Problem};
use crate::constraints::{
    meta::aux_prefix, Constraint, ConstraintHandle, ConstraintId, DualValue, Leaf, LeafKind,
    MetaConstraint, MetaId, MetaKind, VarIdAllocator,
};
use crate::error::{CvxError, Result};
use crate::expr::{storage_factor, VarId, VarKind};
use crate::sparse::csc_to_dense;

impl Problem {
    /// Add a constraint. Meta constraints are expanded and the handle of the
    /// meta constraint itself is returned.
    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<ConstraintHandle> {
        self.add_top(constraint, None)
    }

    /// Add a named constraint.
    pub fn add_named_constraint(
        &mut self,
        constraint: Constraint,
        name: impl Into<String>,
    ) -> Result<ConstraintHandle> {
        self.add_top(constraint, Some(name.into()))
    }

    fn add_top(&mut self, constraint: Constraint, name: Option<String>) -> Result<ConstraintHandle> {
        let (handle, numbering) = self.add_one(constraint, None, name)?;
        self.numbering.push(numbering);
        self.instances.reset_all();
        Ok(handle)
    }

    /// Add constraints as one group, shown in a condensed form.
    pub fn add_list_of_constraints(
        &mut self,
        constraints: Vec<Constraint>,
        key: Option<&str>,
    ) -> Result<Vec<ConstraintHandle>> {
        let first = self.constraints.len();
        let strings: Vec<String> = constraints.iter().map(|c| c.string()).collect();
        let mut handles = Vec::with_capacity(constraints.len());
        let mut members = Vec::with_capacity(constraints.len());
        for c in constraints {
            match self.add_one(c, None, None) {
                Ok((h, n)) => {
                    handles.push(h);
                    members.push(n);
                }
                Err(e) => {
                    self.rollback_group(first, &handles);
                    return Err(e);
                }
            }
        }
        if members.is_empty() {
            return Ok(handles);
        }
        self.numbering.push(Numbering::Group(members));
        if self.constraints.len() > first {
            self.groups.insert(
                first,
                ConstraintGroup {
                    last: self.constraints.len() - 1,
                    string: group_string(&strings),
                    key: key.map(str::to_string),
                },
            );
        }
        self.instances.reset_all();
        tracing::debug!(
            component = "problem",
            operation = "add_list_of_constraints",
            status = "success",
            count = handles.len(),
            "Added constraint group"
        );
        Ok(handles)
    }

    /// Undo a partly added group: its leaves from `first` on and the meta
    /// constraints already spliced.
    fn rollback_group(&mut self, first: usize, handles: &[ConstraintHandle]) {
        let added: Vec<usize> = (first..self.constraints.len()).collect();
        self.remove_positions(&added);
        for h in handles {
            if let ConstraintHandle::Meta(m) = h {
                self.drop_meta_tree(*m);
            }
        }
        self.after_removal();
        tracing::debug!(
            component = "problem",
            operation = "add_list_of_constraints",
            status = "rolled_back",
            removed = added.len(),
            "Discarded partly added constraint group"
        );
    }

    fn add_one(
        &mut self,
        constraint: Constraint,
        origin: Option<MetaId>,
        name: Option<String>,
    ) -> Result<(ConstraintHandle, Numbering)> {
        match constraint {
            Constraint::Leaf(kind) => {
                let pos = self.constraints.len();
                let id = self.push_leaf(kind, origin, name)?;
                Ok((ConstraintHandle::Leaf(id), Numbering::Leaf(pos)))
            }
            Constraint::Meta(kind) => self.splice_meta(kind, origin, name),
        }
    }

    fn push_leaf(
        &mut self,
        mut kind: LeafKind,
        origin: Option<MetaId>,
        name: Option<String>,
    ) -> Result<ConstraintId> {
        for v in kind.variables() {
            if !self.variables.contains_key(&v) {
                return Err(CvxError::UnknownVariable(v.to_string()));
            }
        }
        if kind.prune_imaginary() {
            self.complex = true;
        }
        self.counters.apply(&kind, 1);
        if let Some((var, factor)) = kind.semidef_candidate() {
            self.flag_semidef(var, &factor);
        }

        let id = ConstraintId(self.next_constraint_id);
        self.next_constraint_id += 1;
        tracing::debug!(
            component = "problem",
            operation = "add_constraint",
            status = "success",
            position = self.constraints.len(),
            family = ?kind.kind(),
            "Added constraint {}",
            kind
        );
        self.constraints.push(Leaf {
            id,
            kind,
            name,
            origin,
            dual: None,
        });
        Ok(id)
    }

    fn flag_semidef(&mut self, id: VarId, factor: &nalgebra_sparse::CscMatrix<f64>) {
        if let Some(var) = self.variables.get_mut(&id) {
            if var.kind == VarKind::Symmetric
                && csc_to_dense(factor) == csc_to_dense(&storage_factor(var.kind, var.shape))
            {
                var.semidef = true;
            }
        }
    }

    /// Recompute the semidefinite flags from the remaining LMIs.
    fn refresh_semidef(&mut self) {
        for var in self.variables.values_mut() {
            var.semidef = false;
        }
        let candidates: Vec<_> = self
            .constraints
            .iter()
            .filter_map(|c| c.kind.semidef_candidate())
            .collect();
        for (id, factor) in candidates {
            self.flag_semidef(id, &factor);
        }
    }

    /// Number of variables carrying a bare `X ≽ 0` constraint.
    pub fn semidef_vars(&self) -> usize {
        self.variables().filter(|v| v.semidef).count()
    }

    /// Expand a meta constraint and splice its auxiliary variables and
    /// constraints into the problem.
    fn splice_meta(
        &mut self,
        kind: MetaKind,
        parent: Option<MetaId>,
        name: Option<String>,
    ) -> Result<(ConstraintHandle, Numbering)> {
        let mut alloc = VarIdAllocator::new(self.next_var_id);
        let expansion = kind.expand(&mut alloc)?;
        self.next_var_id = alloc.peek();

        let id = MetaId(self.next_meta_id);
        self.next_meta_id += 1;
        let ordinal = self.meta_ordinal;
        self.meta_ordinal += 1;
        let prefix = aux_prefix(kind.tag(), ordinal);

        self.metas.insert(
            id,
            MetaConstraint {
                id,
                kind,
                ordinal,
                aux_vars: Vec::new(),
                aux_cons: Vec::new(),
                parent,
                string: expansion.string.clone(),
                name,
            },
        );
        self.counters.meta = self.metas.len();

        match self.splice_children(id, &prefix, expansion) {
            Ok(members) => {
                tracing::debug!(
                    component = "problem",
                    operation = "splice_meta",
                    status = "success",
                    prefix = %prefix,
                    "Expanded meta constraint"
                );
                Ok((ConstraintHandle::Meta(id), Numbering::Group(members)))
            }
            Err(e) => {
                self.remove_meta_tree(id);
                Err(e)
            }
        }
    }

    fn splice_children(
        &mut self,
        id: MetaId,
        prefix: &str,
        expansion: crate::constraints::Expansion,
    ) -> Result<Vec<Numbering>> {
        for aux in expansion.aux_vars {
            let mut builder = aux.builder;
            let full = format!("{}{}", prefix, builder.name);
            builder.name = full.clone();
            self.insert_variable(aux.id, builder, Some(id))?;
            if let Some(m) = self.metas.get_mut(&id) {
                m.aux_vars.push((full, aux.id));
            }
        }
        let mut members = Vec::with_capacity(expansion.aux_cons.len());
        for c in expansion.aux_cons {
            let (h, n) = self.add_one(c, Some(id), None)?;
            if let Some(m) = self.metas.get_mut(&id) {
                m.aux_cons.push(h);
            }
            members.push(n);
        }
        Ok(members)
    }

    /// Outermost meta constraint containing `id`.
    pub(crate) fn top_meta(&self, mut id: MetaId) -> MetaId {
        while let Some(parent) = self.metas.get(&id).and_then(|m| m.parent) {
            id = parent;
        }
        id
    }

    /// `id` and all metas nested in it.
    fn meta_tree(&self, id: MetaId) -> BTreeSet<MetaId> {
        let mut out = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(m) = stack.pop() {
            if !out.insert(m) {
                continue;
            }
            if let Some(meta) = self.metas.get(&m) {
                for h in &meta.aux_cons {
                    if let ConstraintHandle::Meta(child) = h {
                        stack.push(*child);
                    }
                }
            }
        }
        out
    }

    /// Positions of the leaves generated by a meta constraint, nested ones
    /// included.
    pub(crate) fn meta_leaves(&self, id: MetaId) -> Vec<usize> {
        let tree = self.meta_tree(id);
        self.constraints
            .iter()
            .enumerate()
            .filter(|(_, c)| c.origin.map_or(false, |o| tree.contains(&o)))
            .map(|(k, _)| k)
            .collect()
    }

    /// Leaf positions addressed by an index.
    fn resolve(&self, index: ConstraintIndex) -> Result<Vec<usize>> {
        let out_of_range = || CvxError::InvalidIndex(format!("{:?}", index));
        match index {
            ConstraintIndex::Flat(i) => {
                if i < self.constraints.len() {
                    Ok(vec![i])
                } else {
                    Err(out_of_range())
                }
            }
            ConstraintIndex::Group(g) => self
                .numbering
                .get(g)
                .map(|n| n.leaves())
                .ok_or_else(out_of_range),
            ConstraintIndex::Member(g, m) => match self.numbering.get(g) {
                Some(Numbering::Group(members)) => {
                    members.get(m).map(|n| n.leaves()).ok_or_else(out_of_range)
                }
                Some(leaf @ Numbering::Leaf(_)) if m == 0 => Ok(leaf.leaves()),
                _ => Err(out_of_range()),
            },
        }
    }

    /// Constraints at an index: one leaf, or all members of a group.
    pub fn get_constraint(&self, index: impl Into<ConstraintIndex>) -> Result<Vec<&Leaf>> {
        Ok(self
            .resolve(index.into())?
            .into_iter()
            .filter_map(|p| self.constraints.get(p))
            .collect())
    }

    /// Leaf by identity.
    pub fn constraint_by_id(&self, id: ConstraintId) -> Option<&Leaf> {
        self.constraints.iter().find(|c| c.id == id)
    }

    /// Position of a leaf by identity.
    pub fn constraint_position(&self, id: ConstraintId) -> Option<usize> {
        self.constraints.iter().position(|c| c.id == id)
    }

    /// Dual of a leaf or meta constraint from the last solve.
    pub fn dual(&self, handle: ConstraintHandle) -> Option<DualValue> {
        match handle {
            ConstraintHandle::Leaf(id) => self.constraint_by_id(id).and_then(|c| c.dual.clone()),
            ConstraintHandle::Meta(id) => self.meta_dual(id),
        }
    }

    /// Dual of a meta constraint, reconstructed from its leaves' duals.
    pub fn meta_dual(&self, id: MetaId) -> Option<DualValue> {
        let meta = self.metas.get(&id)?;
        meta.dual(&|cid| self.constraint_by_id(cid).and_then(|c| c.dual.clone()))
    }

    /// Remove the constraints at an index. A leaf generated by a meta
    /// constraint takes the whole outermost meta constraint with it.
    pub fn remove_constraint(&mut self, index: impl Into<ConstraintIndex>) -> Result<()> {
        let index = index.into();
        let positions = self.resolve(index)?;
        let mut metas = BTreeSet::new();
        for p in &positions {
            if let Some(origin) = self.constraints.get(*p).and_then(|c| c.origin) {
                metas.insert(self.top_meta(origin));
            }
        }
        let mut removed: BTreeSet<usize> = positions.into_iter().collect();
        for m in &metas {
            removed.extend(self.meta_leaves(*m));
        }
        self.remove_positions(&removed.into_iter().collect::<Vec<_>>());
        for m in metas {
            self.drop_meta_tree(m);
        }
        self.after_removal();
        tracing::debug!(
            component = "problem",
            operation = "remove_constraint",
            status = "success",
            index = ?index,
            remaining = self.constraints.len(),
            "Removed constraint"
        );
        Ok(())
    }

    /// Remove a meta constraint with its auxiliary variables and
    /// constraints. Nested metas remove their outermost meta.
    pub fn remove_meta_constraint(&mut self, id: MetaId) -> Result<()> {
        if !self.metas.contains_key(&id) {
            return Err(CvxError::InvalidIndex(format!("meta constraint {}", id.0)));
        }
        self.remove_meta_tree(self.top_meta(id));
        Ok(())
    }

    fn remove_meta_tree(&mut self, id: MetaId) {
        let leaves = self.meta_leaves(id);
        self.remove_positions(&leaves);
        self.drop_meta_tree(id);
        self.after_removal();
    }

    /// Forget a meta tree and drop its auxiliary variables.
    fn drop_meta_tree(&mut self, id: MetaId) {
        for m in self.meta_tree(id) {
            if let Some(meta) = self.metas.remove(&m) {
                for (_, var) in meta.aux_vars {
                    self.drop_variable(var);
                }
            }
        }
        // A failed splice can leave a top-level numbering entry empty.
        self.numbering.retain(|n| !n.leaves().is_empty());
    }

    fn after_removal(&mut self) {
        self.counters.meta = self.metas.len();
        self.reassign_ranges();
        self.refresh_semidef();
        self.complex = self.constraints.iter().any(|c| c.kind.is_complex())
            || matches!(&self.objective.expr, Some(super::ObjectiveExpr::Affine(a)) if !a.is_real());
        self.instances.reset_all();
    }

    /// Remove leaves at sorted positions, shifting numbering and groups.
    fn remove_positions(&mut self, removed: &[usize]) {
        if removed.is_empty() {
            return;
        }
        for p in removed {
            if let Some(c) = self.constraints.get(*p) {
                self.counters.apply(&c.kind, -1);
            }
        }

        let old_groups = std::mem::take(&mut self.groups);
        for (first, group) in old_groups {
            let kept: Vec<usize> = (first..=group.last)
                .filter(|p| removed.binary_search(p).is_err())
                .collect();
            let (Some(new_first), Some(new_last)) = (kept.first(), kept.last()) else {
                continue;
            };
            let shift = |p: usize| p - removed.partition_point(|r| *r < p);
            let strings: Vec<String> = kept
                .iter()
                .filter_map(|p| self.constraints.get(*p))
                .map(|c| c.kind.to_string())
                .collect();
            let string = if kept.len() == group.last - first + 1 {
                group.string
            } else {
                group_string(&strings)
            };
            self.groups.insert(
                shift(*new_first),
                ConstraintGroup {
                    last: shift(*new_last),
                    string,
                    key: group.key,
                },
            );
        }

        let mut k = 0;
        self.constraints.retain(|_| {
            let keep = removed.binary_search(&k).is_err();
            k += 1;
            keep
        });
        self.numbering = self
            .numbering
            .iter()
            .filter_map(|n| n.renumber(removed))
            .collect();
    }

    /// Remove every constraint and the auxiliary variables of meta constraints.
    pub fn remove_all_constraints(&mut self) {
        let all: Vec<usize> = (0..self.constraints.len()).collect();
        self.remove_positions(&all);
        let metas: Vec<MetaId> = self.metas.keys().copied().collect();
        for m in metas {
            self.drop_meta_tree(m);
        }
        self.numbering.clear();
        self.groups.clear();
        self.after_removal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintExt;
    use crate::expr::VariableBuilder;

    fn problem_with_groups() -> Problem {
        let mut p = Problem::new();
        let x = p.add_variable(VariableBuilder::vector("x", 4)).unwrap();
        let list: Vec<Constraint> = (0..4)
            .map(|i| x.element(i).unwrap().leq(1.0).unwrap())
            .collect();
        p.add_list_of_constraints(list, Some("i")).unwrap();
        p.add_list_of_constraints(vec![x.sum().geq(0.0).unwrap()], None).unwrap();
        p
    }

    #[test]
    fn test_group_member_removal() {
        let mut p = problem_with_groups();
        assert_eq!(p.count_cons(), 5);
        p.remove_constraint((0, 1)).unwrap();
        assert_eq!(p.count_cons(), 4);
        assert_eq!(p.get_constraint((0,)).unwrap().len(), 3);
        assert_eq!(p.groups().get(&0).map(|g| g.last), Some(2));
        assert_eq!(p.groups().get(&3).map(|g| g.last), Some(3));
        assert_eq!(p.numbering()[1], Numbering::Group(vec![Numbering::Leaf(3)]));
        assert_eq!(p.counters(), &p.recount());
    }

    #[test]
    fn test_invalid_index() {
        let mut p = problem_with_groups();
        assert!(matches!(p.remove_constraint(9), Err(CvxError::InvalidIndex(_))));
        assert!(matches!(p.get_constraint((0, 7)), Err(CvxError::InvalidIndex(_))));
        assert_eq!(p.count_cons(), 5);
    }

    #[test]
    fn test_semidef_flag() {
        let mut p = Problem::new();
        let x = p.add_variable(VariableBuilder::matrix("X", 2, 2).symmetric()).unwrap();
        p.add_constraint(x.succeq(0.0).unwrap()).unwrap();
        assert_eq!(p.semidef_vars(), 1);
        assert_eq!(p.counters().sdp, 1);
        assert_eq!(p.counters().sdp_vars, 3);
        p.remove_constraint(0).unwrap();
        assert_eq!(p.semidef_vars(), 0);
    }

    #[test]
    fn test_unknown_variable_in_constraint() {
        let mut p = Problem::new();
        let mut other = Problem::new();
        other.add_variable(VariableBuilder::scalar("a")).unwrap();
        let b = other.add_variable(VariableBuilder::scalar("b")).unwrap();
        p.add_variable(VariableBuilder::scalar("a")).unwrap();
        assert!(matches!(
            p.add_constraint(b.leq(1.0).unwrap()),
            Err(CvxError::UnknownVariable(_))
        ));
        assert_eq!(p.count_cons(), 0);
    }
}
