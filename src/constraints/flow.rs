//! Network flow constraints over a directed graph.

use std::collections::HashMap;
use std::fmt;

use nalgebra::DVector;

use super::constraint::{Constraint, ConstraintExt};
use super::meta::{Expansion, MetaKind, VarIdAllocator};
use crate::error::{CvxError, Result};
use crate::expr::{AffExpr, VarId, VariableBuilder};

/// A directed graph with optional edge capacities.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    nodes: Vec<String>,
    edges: Vec<(usize, usize)>,
    capacity: Vec<Option<f64>>,
    index: HashMap<String, usize>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning its index. Adding an existing node is a no-op.
    pub fn add_node(&mut self, name: impl Into<String>) -> usize {
        let name = name.into();
        if let Some(&i) = self.index.get(&name) {
            return i;
        }
        let i = self.nodes.len();
        self.index.insert(name.clone(), i);
        self.nodes.push(name);
        i
    }

    /// Add an edge `from → to`, creating missing nodes.
    pub fn add_edge(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        capacity: Option<f64>,
    ) -> usize {
        let u = self.add_node(from);
        let v = self.add_node(to);
        self.edges.push((u, v));
        self.capacity.push(capacity);
        self.edges.len() - 1
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn capacity(&self, edge: usize) -> Option<f64> {
        self.capacity.get(edge).copied().flatten()
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn edge_label(&self, edge: usize) -> String {
        let (u, v) = self.edges[edge];
        format!("[{},{}]", self.nodes[u], self.nodes[v])
    }
}

/// One or several source (or sink) nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminals {
    Single(String),
    Multiple(Vec<String>),
}

impl Terminals {
    pub fn names(&self) -> Vec<&str> {
        match self {
            Terminals::Single(s) => vec![s.as_str()],
            Terminals::Multiple(v) => v.iter().map(String::as_str).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Terminals::Single(_) => 1,
            Terminals::Multiple(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self, Terminals::Multiple(_))
    }
}

impl From<&str> for Terminals {
    fn from(s: &str) -> Self {
        Terminals::Single(s.to_string())
    }
}

impl From<Vec<&str>> for Terminals {
    fn from(v: Vec<&str>) -> Self {
        Terminals::Multiple(v.into_iter().map(str::to_string).collect())
    }
}

impl fmt::Display for Terminals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminals::Single(s) => f.write_str(s),
            Terminals::Multiple(v) => write!(f, "[{}]", v.join(", ")),
        }
    }
}

/// Flow conservation on a graph with per-edge flow expressions.
///
/// With a single source and several sinks, the source emits the sum of the
/// sink values (and symmetrically for several sources). With several of both,
/// `values[k]` is the commodity routed from `sources[k]` to `sinks[k]`.
#[derive(Debug, Clone)]
pub struct FlowSpec {
    graph: FlowGraph,
    flows: Vec<AffExpr>,
    sources: Terminals,
    sinks: Terminals,
    values: Vec<f64>,
    capacity: bool,
    name: String,
}

impl FlowSpec {
    /// Validate and build a flow specification. `flows[e]` is the flow along
    /// `graph.edges()[e]`; `capacity` enables the edge capacity bounds.
    pub fn new(
        graph: FlowGraph,
        flows: Vec<AffExpr>,
        sources: impl Into<Terminals>,
        sinks: impl Into<Terminals>,
        values: Vec<f64>,
        capacity: bool,
        name: impl Into<String>,
    ) -> Result<Self> {
        let sources = sources.into();
        let sinks = sinks.into();
        if flows.len() != graph.edges().len() {
            return Err(CvxError::mismatch(
                format!("{} edge flows", graph.edges().len()),
                flows.len(),
            ));
        }
        for f in &flows {
            if !f.is_scalar() {
                return Err(CvxError::mismatch("a scalar edge flow", f.shape()));
            }
            if !f.is_real() {
                return Err(CvxError::ComplexValued(format!("edge flow {}", f.string())));
            }
        }
        for node in sources.names().into_iter().chain(sinks.names()) {
            if graph.node_index(node).is_none() {
                return Err(CvxError::InvalidProblem(format!(
                    "node {} is not in the graph",
                    node
                )));
            }
        }
        if sources.is_empty() || sinks.is_empty() {
            return Err(CvxError::InvalidProblem(
                "a flow needs a source and a sink".to_string(),
            ));
        }

        let expected_values = match (sources.is_multiple(), sinks.is_multiple()) {
            (true, true) => {
                if sources.len() != sinks.len() {
                    return Err(CvxError::mismatch(
                        format!("{} sinks", sources.len()),
                        sinks.len(),
                    ));
                }
                sources.len()
            }
            (true, false) => sources.len(),
            (false, true) => sinks.len(),
            (false, false) => 1,
        };
        if values.len() != expected_values {
            return Err(CvxError::mismatch(
                format!("{} flow values", expected_values),
                values.len(),
            ));
        }

        Ok(FlowSpec {
            graph,
            flows,
            sources,
            sinks,
            values,
            capacity,
            name: name.into(),
        })
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn flows(&self) -> &[AffExpr] {
        &self.flows
    }

    pub fn sources(&self) -> &Terminals {
        &self.sources
    }

    pub fn sinks(&self) -> &Terminals {
        &self.sinks
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn remap(&self, map: &HashMap<VarId, VarId>) -> FlowSpec {
        FlowSpec {
            flows: self.flows.iter().map(|f| f.remap(map)).collect(),
            ..self.clone()
        }
    }

    pub(crate) fn expand(&self, out: &mut Expansion, alloc: &mut VarIdAllocator) -> Result<()> {
        if self.sources.is_multiple() && self.sinks.is_multiple() {
            self.expand_commodities(out, alloc)
        } else {
            self.expand_direct(out)
        }
    }

    fn expand_direct(&self, out: &mut Expansion) -> Result<()> {
        if !self.flows.is_empty() {
            let all = AffExpr::vstack(&self.flows)?;
            out.push(all.geq(0.0)?);
        }
        self.push_capacity(out, &self.flows)?;

        let mut balance: HashMap<&str, f64> = HashMap::new();
        let total: f64 = self.values.iter().sum();
        match (&self.sources, &self.sinks) {
            (Terminals::Single(s), Terminals::Single(t)) => {
                balance.insert(s.as_str(), self.values[0]);
                *balance.entry(t.as_str()).or_insert(0.0) -= self.values[0];
            }
            (Terminals::Single(s), Terminals::Multiple(ts)) => {
                balance.insert(s.as_str(), total);
                for (t, v) in ts.iter().zip(&self.values) {
                    *balance.entry(t.as_str()).or_insert(0.0) -= v;
                }
            }
            (Terminals::Multiple(ss), Terminals::Single(t)) => {
                for (s, v) in ss.iter().zip(&self.values) {
                    *balance.entry(s.as_str()).or_insert(0.0) += v;
                }
                *balance.entry(t.as_str()).or_insert(0.0) -= total;
            }
            (Terminals::Multiple(_), Terminals::Multiple(_)) => {
                return Err(CvxError::InvalidProblem(
                    "commodity flows expand per terminal".to_string(),
                ))
            }
        }

        let is_sink = |n: &str| self.sinks.names().contains(&n);
        for (k, node) in self.graph.nodes().iter().enumerate() {
            let outgoing: Vec<AffExpr> = self
                .graph
                .edges()
                .iter()
                .zip(&self.flows)
                .filter(|((u, _), _)| *u == k)
                .map(|(_, f)| f.clone())
                .collect();
            let incoming: Vec<AffExpr> = self
                .graph
                .edges()
                .iter()
                .zip(&self.flows)
                .filter(|((_, v), _)| *v == k)
                .map(|(_, f)| f.clone())
                .collect();
            if outgoing.is_empty() && incoming.is_empty() {
                continue;
            }
            let out_sum = sum_of(&outgoing)?;
            let in_sum = sum_of(&incoming)?;
            match balance.get(node.as_str()) {
                Some(b) if is_sink(node) => out.push(in_sum.minus(out_sum)?.equals(-b)?),
                Some(b) => out.push(out_sum.minus(in_sum)?.equals(*b)?),
                None => out.push(in_sum.equals(out_sum)?),
            }
        }
        Ok(())
    }

    fn expand_commodities(&self, out: &mut Expansion, alloc: &mut VarIdAllocator) -> Result<()> {
        let sources = self.sources.names();
        let sinks = self.sinks.names();
        let distinct_sources = distinct(&sources);
        let distinct_sinks = distinct(&sinks);
        let by_source = distinct_sources.len() <= distinct_sinks.len();

        let (keys, own, other) = if by_source {
            (distinct_sources, &sources, &sinks)
        } else {
            (distinct_sinks, &sinks, &sources)
        };

        let n_edges = self.graph.edges().len();
        let mut per_edge: Vec<Vec<AffExpr>> = vec![Vec::new(); n_edges];
        for (k, key) in keys.iter().enumerate() {
            // Aggregate the commodities sharing this terminal.
            let mut ends: Vec<&str> = Vec::new();
            let mut vals: Vec<f64> = Vec::new();
            for ((o, e), v) in own.iter().zip(other.iter()).zip(&self.values) {
                if o != key {
                    continue;
                }
                match ends.iter().position(|x| x == e) {
                    Some(i) => vals[i] += v,
                    None => {
                        ends.push(*e);
                        vals.push(*v);
                    }
                }
            }

            let flows: Vec<AffExpr> = (0..n_edges)
                .map(|e| {
                    let name = format!("f{}{}", k, self.graph.edge_label(e));
                    out.add_var(alloc, VariableBuilder::scalar(name))
                })
                .collect();
            for (e, f) in flows.iter().enumerate() {
                per_edge[e].push(f.clone());
            }

            let single = Terminals::Single(key.to_string());
            let multiple = Terminals::Multiple(ends.iter().map(|s| s.to_string()).collect());
            let (src, snk) = if by_source {
                (single, multiple)
            } else {
                (multiple, single)
            };
            let sub = FlowSpec::new(
                self.graph.clone(),
                flows,
                src,
                snk,
                vals,
                false,
                format!("{}:{}", self.name, k),
            )?;
            out.push(Constraint::Meta(MetaKind::Flow(sub)));
        }

        for (f, parts) in self.flows.iter().zip(&per_edge) {
            out.push(f.equals(sum_of(parts)?)?);
        }
        self.push_capacity(out, &self.flows)
    }

    fn push_capacity(&self, out: &mut Expansion, flows: &[AffExpr]) -> Result<()> {
        if !self.capacity {
            return Ok(());
        }
        let bounded: Vec<(AffExpr, f64)> = flows
            .iter()
            .enumerate()
            .filter_map(|(e, f)| self.graph.capacity(e).map(|c| (f.clone(), c)))
            .collect();
        if bounded.is_empty() {
            return Ok(());
        }
        let lhs = AffExpr::vstack(&bounded.iter().map(|(f, _)| f.clone()).collect::<Vec<_>>())?;
        let rhs = DVector::from_iterator(bounded.len(), bounded.iter().map(|(_, c)| *c));
        out.push(lhs.leq(rhs)?);
        Ok(())
    }
}

fn distinct<'a>(names: &[&'a str]) -> Vec<&'a str> {
    let mut seen = Vec::new();
    for n in names {
        if !seen.contains(n) {
            seen.push(*n);
        }
    }
    seen
}

fn sum_of(parts: &[AffExpr]) -> Result<AffExpr> {
    parts
        .iter()
        .try_fold(AffExpr::scalar(0.0), |acc, p| acc.plus(p))
}

impl fmt::Display for FlowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        write!(
            f,
            "flow in {} from {} to {} with value {}",
            if self.name.is_empty() { "graph" } else { &self.name },
            self.sources,
            self.sinks,
            values.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::LeafKind;
    use crate::expr::{storage_factor, Shape, VarKind};

    fn edge_flows(n: usize) -> Vec<AffExpr> {
        (0..n)
            .map(|k| {
                AffExpr::from_variable(
                    VarId(k),
                    &format!("f{}", k),
                    Shape::scalar(),
                    storage_factor(VarKind::Continuous, Shape::scalar()),
                )
            })
            .collect()
    }

    fn diamond() -> FlowGraph {
        let mut g = FlowGraph::new();
        g.add_edge("s", "a", Some(2.0));
        g.add_edge("s", "b", Some(1.0));
        g.add_edge("a", "t", None);
        g.add_edge("b", "t", None);
        g
    }

    #[test]
    fn test_graph_nodes() {
        let g = diamond();
        assert_eq!(g.nodes().len(), 4);
        assert_eq!(g.node_index("t"), Some(3));
        assert_eq!(g.capacity(0), Some(2.0));
        assert_eq!(g.capacity(2), None);
        assert_eq!(g.edge_label(1), "[s,b]");
    }

    #[test]
    fn test_single_pair_expansion() {
        let spec =
            FlowSpec::new(diamond(), edge_flows(4), "s", "t", vec![3.0], true, "G").unwrap();
        let mut out = Expansion::new(spec.to_string());
        spec.expand(&mut out, &mut VarIdAllocator::new(4)).unwrap();
        // nonnegativity, capacity, one balance per node
        assert_eq!(out.aux_cons.len(), 6);
        assert!(out.aux_vars.is_empty());
        let eqs = out
            .aux_cons
            .iter()
            .filter(|c| matches!(c, Constraint::Leaf(LeafKind::Affine { rel: crate::constraints::Relation::Eq, .. })))
            .count();
        assert_eq!(eqs, 4);
    }

    #[test]
    fn test_count_mismatch() {
        let err = FlowSpec::new(diamond(), edge_flows(3), "s", "t", vec![1.0], false, "G");
        assert!(matches!(err, Err(CvxError::DimensionMismatch { .. })));

        let err = FlowSpec::new(
            diamond(),
            edge_flows(4),
            vec!["s", "a"],
            vec!["t"],
            vec![1.0],
            false,
            "G",
        );
        assert!(matches!(err, Err(CvxError::DimensionMismatch { .. })));

        let err = FlowSpec::new(diamond(), edge_flows(4), "x", "t", vec![1.0], false, "G");
        assert!(matches!(err, Err(CvxError::InvalidProblem(_))));
    }

    #[test]
    fn test_commodity_expansion() {
        let spec = FlowSpec::new(
            diamond(),
            edge_flows(4),
            vec!["s", "s"],
            vec!["a", "t"],
            vec![1.0, 1.0],
            true,
            "G",
        )
        .unwrap();
        let mut out = Expansion::new(spec.to_string());
        let mut alloc = VarIdAllocator::new(4);
        spec.expand(&mut out, &mut alloc).unwrap();
        // one distinct source: one group of aux edge flows
        assert_eq!(out.aux_vars.len(), 4);
        assert_eq!(out.aux_vars[0].builder.name(), "f0[s,a]");
        let metas = out.aux_cons.iter().filter(|c| c.is_meta()).count();
        assert_eq!(metas, 1);
        // one meta, four linking equalities, one capacity constraint
        assert_eq!(out.aux_cons.len(), 6);
        assert_eq!(alloc.peek(), 8);
    }
}
