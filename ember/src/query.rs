//! A minimal query surface over a [`BuildGraph`] (§6 of `SPEC_FULL.md`):
//! `deps(target)`, `rdeps(target)`, `path(a,b)`. Grounded in the shape of
//! the teacher's `convenient-bitbake::query` module — an expression string
//! naming an operation and its targets — but evaluated over this crate's
//! `BuildGraph` nodes instead of BitBake recipes; the teacher's query AST is
//! recipe-specific, this one only needs three graph traversals.

use ember_graph::{BuildGraph, NodeId};
use std::collections::{HashSet, VecDeque};

/// A parsed query expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// All transitive dependencies of a target.
    Deps(NodeId),
    /// All transitive dependents (reverse dependencies) of a target.
    RDeps(NodeId),
    /// A dependency path from the first target to the second, if any.
    Path(NodeId, NodeId),
}

impl Query {
    /// Parse `deps(//a:x)`, `rdeps(//a:x)`, or `path(//a:x,//b:y)`.
    ///
    /// # Errors
    ///
    /// Returns a rendered error string if `expr` does not match one of the
    /// three recognized forms.
    pub fn parse(expr: &str) -> Result<Self, String> {
        let expr = expr.trim();
        let (name, rest) = expr.split_once('(').ok_or_else(|| format!("malformed query: {expr:?}"))?;
        let args = rest.strip_suffix(')').ok_or_else(|| format!("missing closing paren in: {expr:?}"))?;
        let parts: Vec<&str> = args.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();

        match name.trim() {
            "deps" => match parts.as_slice() {
                [target] => Ok(Query::Deps(NodeId::new(*target))),
                _ => Err(format!("deps() takes exactly one argument, got {}", parts.len())),
            },
            "rdeps" => match parts.as_slice() {
                [target] => Ok(Query::RDeps(NodeId::new(*target))),
                _ => Err(format!("rdeps() takes exactly one argument, got {}", parts.len())),
            },
            "path" => match parts.as_slice() {
                [from, to] => Ok(Query::Path(NodeId::new(*from), NodeId::new(*to))),
                _ => Err(format!("path() takes exactly two arguments, got {}", parts.len())),
            },
            other => Err(format!("unknown query function: {other:?}")),
        }
    }

    /// Evaluate this query against `graph`.
    ///
    /// # Errors
    ///
    /// Returns a rendered error string if any named target is not in the graph.
    pub fn evaluate(&self, graph: &BuildGraph) -> Result<Vec<NodeId>, String> {
        match self {
            Query::Deps(id) => transitive(graph, id, Direction::Dependencies),
            Query::RDeps(id) => transitive(graph, id, Direction::Dependents),
            Query::Path(from, to) => path(graph, from, to),
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Dependencies,
    Dependents,
}

fn transitive(graph: &BuildGraph, start: &NodeId, direction: Direction) -> Result<Vec<NodeId>, String> {
    require_known(graph, start)?;
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start.clone()]);
    let mut out = Vec::new();
    while let Some(id) = queue.pop_front() {
        let Some(node) = graph.node(&id) else { continue };
        let neighbors: Vec<NodeId> = match direction {
            Direction::Dependencies => node.dependencies().iter().cloned().collect(),
            Direction::Dependents => node.dependents().iter().cloned().collect(),
        };
        for neighbor in neighbors {
            if seen.insert(neighbor.clone()) {
                out.push(neighbor.clone());
                queue.push_back(neighbor);
            }
        }
    }
    Ok(out)
}

fn path(graph: &BuildGraph, from: &NodeId, to: &NodeId) -> Result<Vec<NodeId>, String> {
    require_known(graph, from)?;
    require_known(graph, to)?;

    let mut predecessor: std::collections::HashMap<NodeId, NodeId> = std::collections::HashMap::new();
    let mut queue = VecDeque::from([from.clone()]);
    let mut seen = HashSet::from([from.clone()]);

    while let Some(id) = queue.pop_front() {
        if &id == to {
            let mut chain = vec![id.clone()];
            let mut cursor = id;
            while let Some(prev) = predecessor.get(&cursor) {
                chain.push(prev.clone());
                cursor = prev.clone();
            }
            chain.reverse();
            return Ok(chain);
        }
        let Some(node) = graph.node(&id) else { continue };
        for dependency in node.dependencies() {
            if seen.insert(dependency.clone()) {
                let _ = predecessor.insert(dependency.clone(), id.clone());
                queue.push_back(dependency.clone());
            }
        }
    }
    Err(format!("no dependency path from {from} to {to}"))
}

fn require_known(graph: &BuildGraph, id: &NodeId) -> Result<(), String> {
    if graph.node(id).is_some() {
        Ok(())
    } else {
        Err(format!("unknown target: {id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_graph::{Target, TargetKind};
    use std::path::PathBuf;

    fn graph() -> BuildGraph {
        let a = Target::new("//a", TargetKind::Library, "rust", vec![PathBuf::from("a.rs")]);
        let b = Target::new("//b", TargetKind::Library, "rust", vec![PathBuf::from("b.rs")]).depends_on("//a");
        let c = Target::new("//c", TargetKind::Executable, "rust", vec![PathBuf::from("c.rs")]).depends_on("//b");
        BuildGraph::new(vec![a, b, c]).unwrap()
    }

    #[test]
    fn parses_all_three_forms() {
        assert_eq!(Query::parse("deps(//a:x)").unwrap(), Query::Deps(NodeId::new("//a:x")));
        assert_eq!(Query::parse("rdeps(//a:x)").unwrap(), Query::RDeps(NodeId::new("//a:x")));
        assert_eq!(Query::parse("path(//a:x, //b:y)").unwrap(), Query::Path(NodeId::new("//a:x"), NodeId::new("//b:y")));
    }

    #[test]
    fn rejects_wrong_arity_and_unknown_function() {
        assert!(Query::parse("deps(//a,//b)").is_err());
        assert!(Query::parse("frobnicate(//a)").is_err());
        assert!(Query::parse("deps //a").is_err());
    }

    #[test]
    fn deps_is_transitive() {
        let graph = graph();
        let mut deps = Query::Deps(NodeId::new("//c")).evaluate(&graph).unwrap();
        deps.sort();
        assert_eq!(deps, vec![NodeId::new("//a"), NodeId::new("//b")]);
    }

    #[test]
    fn rdeps_is_transitive() {
        let graph = graph();
        let mut rdeps = Query::RDeps(NodeId::new("//a")).evaluate(&graph).unwrap();
        rdeps.sort();
        assert_eq!(rdeps, vec![NodeId::new("//b"), NodeId::new("//c")]);
    }

    #[test]
    fn path_finds_the_dependency_chain() {
        let graph = graph();
        let chain = Query::Path(NodeId::new("//c"), NodeId::new("//a")).evaluate(&graph).unwrap();
        assert_eq!(chain, vec![NodeId::new("//c"), NodeId::new("//b"), NodeId::new("//a")]);
    }

    #[test]
    fn path_reports_unreachable_targets() {
        let graph = graph();
        let err = Query::Path(NodeId::new("//a"), NodeId::new("//c")).evaluate(&graph).unwrap_err();
        assert!(err.contains("no dependency path"));
    }

    #[test]
    fn unknown_target_is_reported() {
        let graph = graph();
        let err = Query::Deps(NodeId::new("//missing")).evaluate(&graph).unwrap_err();
        assert!(err.contains("unknown target"));
    }
}
