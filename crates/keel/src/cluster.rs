use keel_core::{ClusterEvent, Node, Pod};
use keel_scheduler::Cache;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Cluster contents read from a YAML file
///
/// Pods that carry `spec.nodeName` are already running; the rest are pending.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterFile {
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
}

impl ClusterFile {
    pub fn from_file(path: impl AsRef<Path>) -> miette::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| miette::miette!("Failed to read cluster file '{}': {}", path.display(), e))?;
        let cluster = keel_core::from_yaml(&data)?;
        Ok(cluster)
    }

    /// Feed nodes and running pods into the cache, returning the pending pods
    pub fn load_into(self, cache: &Cache) -> miette::Result<Vec<Pod>> {
        let num_nodes = self.nodes.len();
        for node in self.nodes {
            cache.apply(ClusterEvent::NodeAdded(node))?;
        }

        let mut pending = Vec::new();
        for pod in self.pods {
            let bound = pod
                .spec
                .as_ref()
                .and_then(|s| s.node_name.as_deref())
                .is_some_and(|n| !n.is_empty());
            if bound {
                cache.apply(ClusterEvent::PodAdded(pod))?;
            } else {
                debug!("Queueing pending pod {:?}", pod.metadata.name);
                pending.push(pod);
            }
        }

        info!(
            "Loaded {} nodes and {} running pods, {} pods pending",
            num_nodes,
            cache.pod_count(),
            pending.len()
        );
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_scheduler::CacheConfig;
    use std::io::Write;

    const CLUSTER: &str = r#"
nodes:
  - metadata:
      name: node1
      labels:
        kubernetes.io/hostname: node1
    status:
      allocatable:
        cpu: "4"
        memory: 8Gi
  - metadata:
      name: node2
      labels:
        kubernetes.io/hostname: node2
    status:
      allocatable:
        cpu: "2"
        memory: 4Gi
pods:
  - metadata:
      name: running
      namespace: default
    spec:
      nodeName: node2
      containers:
        - name: app
          resources:
            requests:
              cpu: "1"
              memory: 1Gi
  - metadata:
      name: web
      namespace: default
    spec:
      containers:
        - name: app
          resources:
            requests:
              cpu: 500m
              memory: 256Mi
"#;

    #[test]
    fn test_load_cluster_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CLUSTER.as_bytes()).unwrap();

        let cluster = ClusterFile::from_file(file.path()).unwrap();
        assert_eq!(cluster.nodes.len(), 2);
        assert_eq!(cluster.pods.len(), 2);

        let cache = Cache::new(CacheConfig::default()).unwrap();
        let pending = cluster.load_into(&cache).unwrap();
        assert_eq!(cache.node_count(), 2);
        assert_eq!(cache.pod_count(), 1);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].metadata.name.as_deref(), Some("web"));
    }

    #[test]
    fn test_missing_cluster_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ClusterFile::from_file(dir.path().join("absent.yaml")).is_err());
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"nodes: []\nservices: []\n").unwrap();
        assert!(ClusterFile::from_file(file.path()).is_err());
    }
}
