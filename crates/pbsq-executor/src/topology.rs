use pbsq_core::errors::ConfigError;
pub use pbsq_core::model::WorkerSpec;
use serde::Serialize;

pub const LOCALHOST: &str = "localhost";

/// Number of nodes and worker slots per node. `None` means "not limited".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct WorkerTopology {
    pub node_count: Option<usize>,
    pub workers_per_node: Option<usize>,
}

impl WorkerTopology {
    pub fn total_slots(&self) -> Option<usize> {
        self.node_count?.checked_mul(self.workers_per_node?)
    }

    pub fn is_single_node(&self) -> bool {
        self.node_count == Some(1)
    }
}

fn unacceptable(spec: &WorkerSpec) -> ConfigError {
    ConfigError::WorkerSpec(spec.to_string())
}

/// Splits `host:count` (or a bare `count`) into host and count.
/// A count of zero or less means unbounded.
fn parse_entry(entry: &str, spec: &WorkerSpec) -> Result<(String, Option<usize>), ConfigError> {
    let (host, count) = match entry.rsplit_once(':') {
        Some((host, count)) => (host.trim(), count),
        None => (LOCALHOST, entry),
    };
    let n: i64 = count.trim().parse().map_err(|_| unacceptable(spec))?;
    let host = if host.is_empty() { LOCALHOST } else { host };
    let workers = usize::try_from(n).ok().filter(|n| *n > 0);
    Ok((host.to_string(), workers))
}

pub fn resolve(spec: &WorkerSpec) -> Result<WorkerTopology, ConfigError> {
    match spec {
        WorkerSpec::Auto => Ok(WorkerTopology::default()),
        WorkerSpec::Fixed(n) if *n >= 1 => Ok(WorkerTopology {
            node_count: Some(1),
            workers_per_node: usize::try_from(*n).ok(),
        }),
        WorkerSpec::Fixed(_) => Err(unacceptable(spec)),
        WorkerSpec::NodeList(entries) if entries.is_empty() => Ok(WorkerTopology::default()),
        WorkerSpec::NodeList(entries) => {
            let mut first = None;
            for entry in entries {
                let (_, workers) = parse_entry(entry, spec)?;
                if first.is_none() {
                    first = Some(workers);
                }
            }
            Ok(WorkerTopology {
                node_count: Some(entries.len()),
                workers_per_node: first.flatten(),
            })
        }
    }
}

/// Hosts sub-tasks are spread over, in round-robin order.
pub fn node_names(spec: &WorkerSpec) -> Vec<String> {
    match spec {
        WorkerSpec::NodeList(entries) if !entries.is_empty() => entries
            .iter()
            .map(|e| match e.rsplit_once(':') {
                Some((host, _)) if !host.trim().is_empty() => host.trim().to_string(),
                _ => LOCALHOST.to_string(),
            })
            .collect(),
        _ => vec![LOCALHOST.to_string()],
    }
}

pub fn is_local_node(node: &str) -> bool {
    matches!(node, LOCALHOST | "127.0.0.1" | "")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topo(nodes: Option<usize>, workers: Option<usize>) -> WorkerTopology {
        WorkerTopology {
            node_count: nodes,
            workers_per_node: workers,
        }
    }

    fn list(items: &[&str]) -> WorkerSpec {
        WorkerSpec::NodeList(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_fixed_counts() {
        assert_eq!(resolve(&WorkerSpec::Fixed(4)).unwrap(), topo(Some(1), Some(4)));
        assert_eq!(resolve(&WorkerSpec::Fixed(1)).unwrap(), topo(Some(1), Some(1)));
        assert!(matches!(
            resolve(&WorkerSpec::Fixed(0)),
            Err(ConfigError::WorkerSpec(_))
        ));
        assert!(resolve(&WorkerSpec::Fixed(-3)).is_err());
    }

    #[test]
    fn test_single_entries() {
        assert_eq!(resolve(&list(&["host:4"])).unwrap(), topo(Some(1), Some(4)));
        assert_eq!(resolve(&list(&["6"])).unwrap(), topo(Some(1), Some(6)));
        assert_eq!(resolve(&list(&["host:0"])).unwrap(), topo(Some(1), None));
        assert_eq!(resolve(&list(&["host:-2"])).unwrap(), topo(Some(1), None));
        assert!(resolve(&list(&["host"])).is_err());
        assert!(resolve(&list(&["host:many"])).is_err());
    }

    #[test]
    fn test_node_lists() {
        assert_eq!(
            resolve(&list(&["a:4", "b:2", "c:8"])).unwrap(),
            topo(Some(3), Some(4))
        );
        assert_eq!(resolve(&list(&[])).unwrap(), topo(None, None));
        assert_eq!(resolve(&WorkerSpec::Auto).unwrap(), topo(None, None));
        assert!(resolve(&list(&["a:4", "b:x"])).is_err());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let spec = list(&["a:3", "b:3"]);
        assert_eq!(resolve(&spec).unwrap(), resolve(&spec).unwrap());
    }

    #[test]
    fn test_total_slots() {
        assert_eq!(topo(Some(2), Some(4)).total_slots(), Some(8));
        assert_eq!(topo(Some(2), None).total_slots(), None);
        assert_eq!(topo(None, None).total_slots(), None);
        assert_eq!(topo(Some(2), Some(usize::MAX)).total_slots(), None);
    }

    #[test]
    fn test_node_names() {
        assert_eq!(node_names(&list(&["a:4", "b:4"])), vec!["a", "b"]);
        assert_eq!(node_names(&WorkerSpec::Fixed(3)), vec!["localhost"]);
        assert_eq!(node_names(&list(&["4"])), vec!["localhost"]);
    }
}
