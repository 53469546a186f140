//! Dependency validation for `depends_on` (spec §4.I Priorities and dependencies:
//! "circular dependencies are detected at registration time and rejected").

use std::collections::{HashMap, HashSet};

use crate::error::{SchedulerError, SchedulerResult};

/// Validate that every `depends_on` entry names a registered job and that the combined
/// dependency graph (including `job_id`'s own edges) has no cycle.
///
/// `edges` maps a job id to the ids it depends on, for every job registered so far plus
/// the one being added.
pub fn validate_dependencies(
    job_id: &str,
    edges: &HashMap<String, Vec<String>>,
) -> SchedulerResult<()> {
    for (id, deps) in edges {
        for dep in deps {
            if !edges.contains_key(dep) {
                return Err(SchedulerError::UnknownDependency {
                    job: id.clone(),
                    depends_on: dep.clone(),
                });
            }
        }
    }

    let mut visiting = HashSet::new();
    let mut visited = HashSet::new();
    detect_cycle(job_id, edges, &mut visiting, &mut visited)
}

fn detect_cycle(
    node: &str,
    edges: &HashMap<String, Vec<String>>,
    visiting: &mut HashSet<String>,
    visited: &mut HashSet<String>,
) -> SchedulerResult<()> {
    if visited.contains(node) {
        return Ok(());
    }
    if !visiting.insert(node.to_string()) {
        return Err(SchedulerError::CircularDependency(node.to_string()));
    }

    if let Some(deps) = edges.get(node) {
        for dep in deps {
            detect_cycle(dep, edges, visiting, visited)?;
        }
    }

    visiting.remove(node);
    visited.insert(node.to_string());
    Ok(())
}

/// A job is eligible to run only while every dependency's most recent run succeeded and
/// none of them is currently running or about to run this same tick (spec §4.I). The
/// caller decides what counts as "blocked" — in-flight runs, same-tick-due runs, or both —
/// so this function only needs the resulting set.
pub fn dependencies_satisfied(
    depends_on: &[String],
    blocked: &HashSet<String>,
    last_succeeded: impl Fn(&str) -> Option<bool>,
) -> bool {
    depends_on.iter().all(|dep| {
        !blocked.contains(dep) && last_succeeded(dep).unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(id, deps)| (id.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_acyclic_graph_is_accepted() {
        let edges = edges(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        assert!(validate_dependencies("c", &edges).is_ok());
    }

    #[test]
    fn test_direct_cycle_is_rejected() {
        let edges = edges(&[("a", &["b"]), ("b", &["a"])]);
        assert!(matches!(
            validate_dependencies("a", &edges),
            Err(SchedulerError::CircularDependency(_))
        ));
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let edges = edges(&[("a", &["missing"])]);
        assert!(matches!(
            validate_dependencies("a", &edges),
            Err(SchedulerError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_dependencies_satisfied_requires_prior_success() {
        let in_flight = HashSet::new();
        assert!(dependencies_satisfied(
            &["a".to_string()],
            &in_flight,
            |id| if id == "a" { Some(true) } else { None }
        ));
        assert!(!dependencies_satisfied(
            &["a".to_string()],
            &in_flight,
            |id| if id == "a" { Some(false) } else { None }
        ));
    }

    #[test]
    fn test_dependencies_satisfied_blocks_on_in_flight() {
        let mut in_flight = HashSet::new();
        in_flight.insert("a".to_string());
        assert!(!dependencies_satisfied(
            &["a".to_string()],
            &in_flight,
            |_| Some(true)
        ));
    }
}
