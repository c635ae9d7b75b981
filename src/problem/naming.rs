//! Condensed display strings for groups of constraints and collections of
//! variables.

use std::collections::BTreeMap;

use super::Problem;

const PLACEHOLDERS: [&str; 7] = ["i", "j", "k", "l", "p", "q", "r"];

/// An integer sequence written as `step·(x + inner) + outer` for `x` in
/// `0..len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    pub step: i64,
    pub inner: i64,
    pub outer: i64,
    pub len: usize,
}

impl IndexRange {
    /// Element at position `x`.
    pub fn at(&self, x: i64) -> i64 {
        self.step * (x + self.inner) + self.outer
    }

    /// Short formula over a placeholder, such as `i+5`, `5(i+1)` or `-2(i-5)`.
    pub fn template(&self, placeholder: &str) -> String {
        let mut s = if self.inner != 0 {
            format!("{}{:+}", placeholder, self.inner)
        } else {
            placeholder.to_string()
        };
        let factor = match self.step {
            1 => String::new(),
            -1 => "-".to_string(),
            k => k.to_string(),
        };
        if self.step != 1 {
            s = if self.inner != 0 {
                format!("{}({})", factor, s)
            } else {
                format!("{}{}", factor, s)
            };
        }
        if self.outer != 0 {
            s = format!("{}{:+}", s, self.outer);
        }
        s
    }
}

fn floor_div(a: i64, b: i64) -> (i64, i64) {
    let mut q = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q -= 1;
    }
    (q, a - b * q)
}

/// Arithmetic progression mirroring `sequence`, if there is one.
///
/// ```ignore
/// let r = detect_range(&[7, 12, 17, 22, 27]).unwrap();
/// assert_eq!(r.template("i"), "5(i+1)+2");
/// ```
pub fn detect_range(sequence: &[i64]) -> Option<IndexRange> {
    let (first, last) = match (sequence.first(), sequence.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return None,
    };
    let len = sequence.len();
    let step = if len > 1 {
        let span = last - first;
        let gaps = (len - 1) as i64;
        if span % gaps != 0 {
            return None;
        }
        span / gaps
    } else {
        1
    };
    if step == 0 {
        return None;
    }
    if sequence
        .iter()
        .enumerate()
        .any(|(k, v)| *v != first + step * k as i64)
    {
        return None;
    }
    let (inner, outer) = floor_div(first, step);
    Some(IndexRange {
        step,
        inner,
        outer,
        len,
    })
}

/// Split a string into the text between digit runs and the digit runs.
fn tokenize(s: &str) -> (Vec<String>, Vec<String>) {
    let mut skeleton = vec![String::new()];
    let mut slots = Vec::new();
    let mut in_digits = false;
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            if !in_digits {
                slots.push(String::new());
                in_digits = true;
            }
            if let Some(slot) = slots.last_mut() {
                slot.push(ch);
            }
        } else {
            if in_digits {
                skeleton.push(String::new());
                in_digits = false;
            }
            if let Some(part) = skeleton.last_mut() {
                part.push(ch);
            }
        }
    }
    if in_digits {
        skeleton.push(String::new());
    }
    (skeleton, slots)
}

fn domain_of(values: &[String], range: bool) -> String {
    if range {
        format!("[0…{}]", values.len() - 1)
    } else if values.len() > 4 {
        format!(
            "[{},{},…,{},{}]",
            values[0],
            values[1],
            values[values.len() - 2],
            values[values.len() - 1]
        )
    } else {
        format!("[{}]", values.join(","))
    }
}

/// A template with placeholders and the placeholders' domain, describing
/// strings that differ only in their integers.
///
/// ```ignore
/// let strings: Vec<String> = (5..31).map(|i| format!("A[{}]", i)).collect();
/// assert_eq!(
///     parameterized_string(&strings),
///     Some(("A[i+5]".to_string(), "i ∈ [0…25]".to_string()))
/// );
/// ```
///
/// Returns `None` when the strings do not share a skeleton.
pub fn parameterized_string(strings: &[String]) -> Option<(String, String)> {
    match strings.len() {
        0 => return Some((String::new(), String::new())),
        1 => return Some((strings[0].clone(), String::new())),
        _ => {}
    }

    let (skeleton, first_slots) = tokenize(&strings[0]);
    let mut columns: Vec<Vec<String>> = first_slots.into_iter().map(|v| vec![v]).collect();
    for s in &strings[1..] {
        let (sk, slots) = tokenize(s);
        if sk != skeleton {
            return None;
        }
        for (column, v) in columns.iter_mut().zip(slots) {
            column.push(v);
        }
    }

    // Constant slots fold back into the skeleton.
    let mut parts = vec![skeleton[0].clone()];
    let mut varying: Vec<Vec<String>> = Vec::new();
    for (k, column) in columns.into_iter().enumerate() {
        if column.iter().all(|v| *v == column[0]) {
            if let Some(last) = parts.last_mut() {
                last.push_str(&column[0]);
                last.push_str(&skeleton[k + 1]);
            }
        } else {
            varying.push(column);
            parts.push(skeleton[k + 1].clone());
        }
    }

    // Slots forming a range share the first placeholder; slots with equal
    // values share one of the remaining placeholders.
    let ranges: Vec<Option<IndexRange>> = varying
        .iter()
        .map(|values| {
            let ints: Option<Vec<i64>> = values.iter().map(|v| v.parse().ok()).collect();
            ints.and_then(|i| detect_range(&i))
        })
        .collect();
    let any_range = ranges.iter().any(|r| r.is_some());
    let mut next = usize::from(any_range);
    let mut seen: Vec<(Vec<String>, usize)> = Vec::new();
    let mut index = Vec::with_capacity(varying.len());
    for (values, range) in varying.iter().zip(&ranges) {
        if range.is_some() {
            index.push(0);
        } else if let Some((_, i)) = seen.iter().find(|(v, _)| v == values) {
            index.push(*i);
        } else {
            seen.push((values.clone(), next));
            index.push(next);
            next += 1;
        }
    }
    let placeholder = |i: usize| PLACEHOLDERS.get(i).copied().unwrap_or("?");

    let mut template = parts[0].clone();
    for (k, part) in parts[1..].iter().enumerate() {
        let ph = placeholder(index[k]);
        match &ranges[k] {
            Some(r) => template.push_str(&r.template(ph)),
            None => template.push_str(ph),
        }
        template.push_str(part);
    }

    let mut used = Vec::new();
    let mut domains = Vec::new();
    for (k, i) in index.iter().enumerate() {
        if used.contains(&placeholder(*i)) {
            continue;
        }
        used.push(placeholder(*i));
        domains.push(domain_of(&varying[k], ranges[k].is_some()));
    }
    let data = match used.len() {
        0 => String::new(),
        1 => format!("{} ∈ {}", used[0], domains[0]),
        _ => format!("({}) ∈ zip({})", used.join(","), domains.join(",")),
    };
    Some((template, data))
}

/// `base`, or `base` followed by the smallest counter that makes it unused.
pub(crate) fn fresh_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|k| format!("{}{}", base, k))
        .find(|n| !taken(n))
        .unwrap_or_else(|| base.to_string())
}

/// Condensed string of a group of constraints.
pub(crate) fn group_string(strings: &[String]) -> String {
    match parameterized_string(strings) {
        Some((template, data)) if data.is_empty() => template,
        Some((template, data)) => format!("{} for {}", template, data),
        None => format!(
            "[{} constraints (first: {})]",
            strings.len(),
            strings.first().map(String::as_str).unwrap_or("")
        ),
    }
}

struct Collection {
    count: usize,
    shape: Option<String>,
    kind: Option<&'static str>,
    list_like: bool,
}

/// One summary line per variable or `name[...]` collection, in insertion
/// order.
pub(crate) fn variable_summary(problem: &Problem) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut single: BTreeMap<String, String> = BTreeMap::new();
    let mut collections: BTreeMap<String, Collection> = BTreeMap::new();

    for var in problem.variables() {
        let shape = var.shape.to_string();
        let kind = var.kind.as_str();
        match split_collection(&var.name) {
            Some((base, key)) => {
                let list_like = key.parse::<usize>().is_ok();
                match collections.get_mut(base) {
                    Some(c) => {
                        c.count += 1;
                        if c.shape.as_deref() != Some(shape.as_str()) {
                            c.shape = None;
                        }
                        if c.kind != Some(kind) {
                            c.kind = None;
                        }
                        c.list_like &= list_like;
                    }
                    None => {
                        order.push(base.to_string());
                        collections.insert(
                            base.to_string(),
                            Collection {
                                count: 1,
                                shape: Some(shape),
                                kind: Some(kind),
                                list_like,
                            },
                        );
                    }
                }
            }
            None => {
                order.push(var.name.clone());
                single.insert(var.name.clone(), format!("{}: {}, {}", var.name, shape, kind));
            }
        }
    }

    order
        .into_iter()
        .filter_map(|name| {
            if let Some(line) = single.remove(&name) {
                return Some(line);
            }
            collections.get(&name).map(|c| {
                format!(
                    "{}: {} of {} variables, {}, {}",
                    name,
                    if c.list_like { "list" } else { "dict" },
                    c.count,
                    c.shape.as_deref().unwrap_or("different shapes"),
                    c.kind.unwrap_or("different kinds")
                )
            })
        })
        .collect()
}

/// `base[key]` into its parts.
fn split_collection(name: &str) -> Option<(&str, &str)> {
    let open = name.find('[')?;
    let inner = name.strip_suffix(']')?;
    if open == 0 {
        return None;
    }
    Some((&name[..open], &inner[open + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_range() {
        let r = detect_range(&[7, 12, 17, 22, 27]).unwrap();
        assert_eq!((r.step, r.inner, r.outer, r.len), (5, 1, 2, 5));
        assert_eq!(r.template("i"), "5(i+1)+2");
        assert_eq!(detect_range(&[0, 5, 10]).unwrap().template("i"), "5i");
        assert_eq!(detect_range(&[10, 11, 12]).unwrap().template("i"), "i+10");

        let down = detect_range(&[10, 8, 6]).unwrap();
        assert_eq!((0..3).map(|x| down.at(x)).collect::<Vec<_>>(), vec![10, 8, 6]);
        assert_eq!(down.template("i"), "-2(i-5)");

        assert!(detect_range(&[0, 1, 3]).is_none());
        assert!(detect_range(&[]).is_none());
    }

    #[test]
    fn test_parameterized_string() {
        let strings: Vec<String> = (5..31).map(|i| format!("A[{}]", i)).collect();
        assert_eq!(
            parameterized_string(&strings),
            Some(("A[i+5]".to_string(), "i ∈ [0…25]".to_string()))
        );

        let strings: Vec<String> = vec![
            "A[0]·B[2]·C[3]·D[5]·F[0]".into(),
            "A[1]·B[1]·C[6]·D[6]·F[0]".into(),
            "A[2]·B[0]·C[9]·D[9]·F[0]".into(),
        ];
        let (t, d) = parameterized_string(&strings).unwrap();
        assert_eq!(t, "A[i]·B[-(i-2)]·C[3(i+1)]·D[j]·F[0]");
        assert_eq!(d, "(i,j) ∈ zip([0…2],[5,6,9])");
    }

    #[test]
    fn test_group_string_fallback() {
        let strings: Vec<String> = vec!["x ≤ 1".into(), "y + z ≥ 2".into()];
        assert_eq!(group_string(&strings), "[2 constraints (first: x ≤ 1)]");
        let strings: Vec<String> = (0..3).map(|i| format!("x[{}] ≤ 1", i)).collect();
        assert_eq!(group_string(&strings), "x[i] ≤ 1 for i ∈ [0…2]");
    }

    #[test]
    fn test_fresh_name() {
        let taken = ["_obj_", "_obj_1"];
        assert_eq!(fresh_name("_obj_", |n| taken.contains(&n)), "_obj_2");
        assert_eq!(fresh_name("t", |n| taken.contains(&n)), "t");
    }

    #[test]
    fn test_split_collection() {
        assert_eq!(split_collection("x[3]"), Some(("x", "3")));
        assert_eq!(split_collection("x[a,b]"), Some(("x", "a,b")));
        assert_eq!(split_collection("x"), None);
        assert_eq!(split_collection("[1]"), None);
    }
}
