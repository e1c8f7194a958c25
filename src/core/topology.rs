use crate::errors::{VmError, VmResult};
use crate::storage::{StorageType, REPLICATION_FACTOR};

/// Inputs to storage node selection.
#[derive(Debug, Clone)]
pub struct PlacementRequest<'a> {
    pub storage_type: Option<StorageType>,
    /// Caller supplied nodes; empty means "use the default for the storage type".
    pub explicit_nodes: &'a [String],
    pub local_node: &'a str,
    /// Remote cluster members (the local node may or may not be included).
    pub cluster_nodes: &'a [String],
    /// Set on the master, which must always be one of the storage nodes.
    pub require_local_node: bool,
}

/// Resolves which nodes hold the VM's storage.
///
/// Defaults: local storage lives on the local node, replicated storage on
/// every cluster node. Replicated storage needs exactly
/// `REPLICATION_FACTOR` nodes, every node must be a cluster member, and a
/// master can never pick a set that excludes itself.
pub fn select_nodes(request: &PlacementRequest<'_>) -> VmResult<Vec<String>> {
    let all_nodes = all_nodes(request.cluster_nodes, request.local_node);

    let candidates: Vec<String> = if !request.explicit_nodes.is_empty() {
        dedup(request.explicit_nodes.iter().cloned())
    } else if request.storage_type == Some(StorageType::Replicated) {
        all_nodes.clone()
    } else {
        vec![request.local_node.to_string()]
    };

    if request.storage_type == Some(StorageType::Replicated) && candidates.len() != REPLICATION_FACTOR {
        return Err(VmError::InvalidNodeCount {
            expected: REPLICATION_FACTOR,
            actual: candidates.len(),
        });
    }

    if let Some(unknown) = candidates.iter().find(|node| !all_nodes.contains(node)) {
        return Err(VmError::UnknownNode {
            node: unknown.clone(),
        });
    }

    if request.require_local_node && !candidates.iter().any(|node| node == request.local_node) {
        return Err(VmError::InvalidNodes {
            reason: format!(
                "one of the nodes must be the local node '{}'",
                request.local_node
            ),
        });
    }

    Ok(candidates)
}

fn all_nodes(cluster_nodes: &[String], local_node: &str) -> Vec<String> {
    dedup(
        cluster_nodes
            .iter()
            .cloned()
            .chain(std::iter::once(local_node.to_string())),
    )
}

// Order preserving.
fn dedup(nodes: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for node in nodes {
        if !seen.contains(&node) {
            seen.push(node);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn select(
        storage_type: Option<StorageType>,
        explicit: &[&str],
        cluster: &[&str],
        master: bool,
    ) -> VmResult<Vec<String>> {
        let explicit = nodes(explicit);
        let cluster = nodes(cluster);
        select_nodes(&PlacementRequest {
            storage_type,
            explicit_nodes: &explicit,
            local_node: "node-a",
            cluster_nodes: &cluster,
            require_local_node: master,
        })
    }

    #[test]
    fn local_storage_defaults_to_local_node() {
        let selected = select(None, &[], &["node-b", "node-c"], true).unwrap();
        assert_eq!(selected, vec!["node-a"]);

        let selected = select(Some(StorageType::Local), &[], &["node-b"], false).unwrap();
        assert_eq!(selected, vec!["node-a"]);
    }

    #[test]
    fn replicated_storage_defaults_to_whole_cluster() {
        let selected = select(Some(StorageType::Replicated), &[], &["node-b"], true).unwrap();
        assert_eq!(selected, vec!["node-b", "node-a"]);
    }

    #[test]
    fn replicated_storage_requires_exactly_two_nodes() {
        for explicit in [&["node-a"][..], &["node-a", "node-b", "node-c"][..]] {
            let err = select(Some(StorageType::Replicated), explicit, &["node-b", "node-c"], true).unwrap_err();
            assert!(matches!(err, VmError::InvalidNodeCount { expected: 2, .. }));
        }

        // three node cluster, no explicit list -> three candidates
        let err = select(Some(StorageType::Replicated), &[], &["node-b", "node-c"], true).unwrap_err();
        assert!(matches!(err, VmError::InvalidNodeCount { expected: 2, actual: 3 }));

        // single node cluster
        let err = select(Some(StorageType::Replicated), &[], &[], true).unwrap_err();
        assert!(matches!(err, VmError::InvalidNodeCount { actual: 1, .. }));
    }

    #[test]
    fn duplicate_explicit_nodes_do_not_count_twice() {
        let err = select(Some(StorageType::Replicated), &["node-a", "node-a"], &["node-b"], true).unwrap_err();
        assert!(matches!(err, VmError::InvalidNodeCount { actual: 1, .. }));
    }

    #[test]
    fn explicit_nodes_must_be_members() {
        let err = select(None, &["node-a", "node-x"], &["node-b"], true).unwrap_err();
        assert!(matches!(err, VmError::UnknownNode { node } if node == "node-x"));
    }

    #[test]
    fn master_must_be_a_storage_node() {
        let err = select(Some(StorageType::Replicated), &["node-b", "node-c"], &["node-b", "node-c"], true)
            .unwrap_err();
        assert!(matches!(err, VmError::InvalidNodes { .. }));

        // members may materialise VMs stored elsewhere
        let selected = select(Some(StorageType::Replicated), &["node-b", "node-c"], &["node-b", "node-c"], false)
            .unwrap();
        assert_eq!(selected, vec!["node-b", "node-c"]);
    }

    #[test]
    fn explicit_list_is_used_verbatim() {
        let selected = select(None, &["node-b", "node-a"], &["node-b"], true).unwrap();
        assert_eq!(selected, vec!["node-b", "node-a"]);
    }
}
