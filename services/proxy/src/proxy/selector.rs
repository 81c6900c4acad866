//! Backend groups and target selection.
//!
//! A group serves one or more domains and picks one of its targets per
//! connection:
//! - `random`: uniform pick
//! - `round-robin`: shared cursor, `fetch_add` then modulo, so concurrent
//!   selections never observe the same cursor value

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use serde::Deserialize;

use crate::error::SelectError;

/// How a group picks a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionAlgorithm {
    Random,
    #[default]
    RoundRobin,
}

/// Normalize a domain for matching: trim whitespace, lowercase, drop a
/// trailing dot.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_lowercase()
}

/// Targets serving a set of domains. Immutable after startup apart from the
/// round-robin cursor.
#[derive(Debug)]
pub struct BackendGroup {
    domains: Vec<String>,
    targets: Vec<String>,
    algorithm: SelectionAlgorithm,
    cursor: AtomicUsize,
}

impl BackendGroup {
    pub fn new(domains: Vec<String>, targets: Vec<String>, algorithm: SelectionAlgorithm) -> Self {
        Self {
            domains: domains.iter().map(|d| normalize_domain(d)).collect(),
            targets,
            algorithm,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Normalized domains this group serves.
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn algorithm(&self) -> SelectionAlgorithm {
        self.algorithm
    }

    /// Pick a target for a new connection.
    pub fn select(&self) -> Result<&str, SelectError> {
        let count = self.targets.len();
        if count == 0 {
            return Err(SelectError::EmptyTargets);
        }
        let index = match self.algorithm {
            SelectionAlgorithm::Random => rand::thread_rng().gen_range(0..count),
            SelectionAlgorithm::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % count,
        };
        Ok(&self.targets[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn group(targets: &[&str], algorithm: SelectionAlgorithm) -> BackendGroup {
        BackendGroup::new(
            vec!["a.example".to_string()],
            targets.iter().map(|t| t.to_string()).collect(),
            algorithm,
        )
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("  A.Example. "), "a.example");
        assert_eq!(normalize_domain("a.example"), "a.example");
        assert_eq!(normalize_domain(""), "");
    }

    #[test]
    fn test_round_robin_rotation() {
        let group = group(&["t1", "t2", "t3"], SelectionAlgorithm::RoundRobin);
        let picks: Vec<&str> = (0..6).map(|_| group.select().unwrap()).collect();
        assert_eq!(picks, vec!["t1", "t2", "t3", "t1", "t2", "t3"]);
    }

    #[test]
    fn test_round_robin_concurrent_is_exact() {
        let group = Arc::new(group(&["t1", "t2", "t3", "t4"], SelectionAlgorithm::RoundRobin));
        let threads = 8;
        let per_thread = 1000;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let group = Arc::clone(&group);
                std::thread::spawn(move || {
                    (0..per_thread)
                        .map(|_| group.select().unwrap().to_string())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for target in handle.join().unwrap() {
                *counts.entry(target).or_default() += 1;
            }
        }
        assert_eq!(counts.len(), 4);
        for count in counts.values() {
            assert_eq!(*count, threads * per_thread / 4);
        }
    }

    #[test]
    fn test_random_is_roughly_uniform() {
        let group = group(&["t1", "t2", "t3", "t4"], SelectionAlgorithm::Random);
        let trials = 40_000;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for _ in 0..trials {
            *counts.entry(group.select().unwrap()).or_default() += 1;
        }
        assert_eq!(counts.len(), 4);
        let expected = trials / 4;
        for count in counts.values() {
            // Generous bound, roughly 8 standard deviations.
            assert!(count.abs_diff(expected) < 700, "count {count} too far from {expected}");
        }
    }

    #[test]
    fn test_empty_targets() {
        let group = group(&[], SelectionAlgorithm::RoundRobin);
        assert_eq!(group.select(), Err(SelectError::EmptyTargets));
    }

    #[test]
    fn test_algorithm_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            algorithm: SelectionAlgorithm,
        }
        let parsed: Wrapper = toml::from_str(r#"algorithm = "round-robin""#).unwrap();
        assert_eq!(parsed.algorithm, SelectionAlgorithm::RoundRobin);
        let parsed: Wrapper = toml::from_str(r#"algorithm = "random""#).unwrap();
        assert_eq!(parsed.algorithm, SelectionAlgorithm::Random);
    }
}
