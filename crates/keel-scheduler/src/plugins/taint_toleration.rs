use crate::cache::NodeInfo;
use crate::framework::{Code, CycleState, FilterPlugin, Plugin, Status};
use k8s_openapi::api::core::v1::{Taint, Toleration};
use keel_core::Pod;
use tracing::debug;

pub const NAME: &str = "TaintToleration";

/// Rejects nodes with a `NoSchedule` or `NoExecute` taint the pod does not tolerate
pub struct TaintToleration;

fn tolerates(toleration: &Toleration, taint: &Taint) -> bool {
    if let Some(effect) = toleration.effect.as_deref() {
        if !effect.is_empty() && effect != taint.effect {
            return false;
        }
    }

    match toleration.operator.as_deref() {
        Some("Exists") => match toleration.key.as_deref() {
            None | Some("") => true,
            Some(key) => key == taint.key,
        },
        // Equal is the default operator
        _ => {
            toleration.key.as_deref() == Some(taint.key.as_str())
                && toleration.value.as_deref().unwrap_or("") == taint.value.as_deref().unwrap_or("")
        }
    }
}

impl Plugin for TaintToleration {
    fn name(&self) -> &str {
        NAME
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

impl FilterPlugin for TaintToleration {
    fn filter(&self, _state: &CycleState, pod: &Pod, node: &NodeInfo) -> Status {
        let Some(taints) = node.node().spec.as_ref().and_then(|s| s.taints.as_ref()) else {
            return Status::success();
        };
        let tolerations = pod
            .spec
            .as_ref()
            .and_then(|s| s.tolerations.as_deref())
            .unwrap_or_default();

        let untolerated = taints
            .iter()
            .filter(|t| t.effect == "NoSchedule" || t.effect == "NoExecute")
            .find(|t| !tolerations.iter().any(|tol| tolerates(tol, t)));

        match untolerated {
            Some(taint) => {
                debug!(
                    "Pod does not tolerate taint {}={} on node {}",
                    taint.key,
                    taint.effect,
                    node.name()
                );
                Status::new(
                    Code::UnschedulableAndUnresolvable,
                    format!(
                        "node(s) had untolerated taint {{{}: {}}}",
                        taint.key,
                        taint.value.as_deref().unwrap_or("")
                    ),
                )
            }
            None => Status::success(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_node, make_pod};
    use k8s_openapi::api::core::v1::NodeSpec;

    fn tainted_node(taints: Vec<Taint>) -> NodeInfo {
        let mut node = make_node("node1", "4", "8Gi");
        node.spec = Some(NodeSpec {
            taints: Some(taints),
            ..Default::default()
        });
        NodeInfo::new(node).unwrap()
    }

    fn taint(key: &str, value: &str, effect: &str) -> Taint {
        Taint {
            key: key.to_string(),
            value: Some(value.to_string()),
            effect: effect.to_string(),
            ..Default::default()
        }
    }

    fn pod_tolerating(tolerations: Vec<Toleration>) -> Pod {
        let mut pod = make_pod("p", "1", "1Gi");
        if let Some(spec) = pod.spec.as_mut() {
            spec.tolerations = Some(tolerations);
        }
        pod
    }

    #[test]
    fn test_untolerated_taint_rejects() {
        let node = tainted_node(vec![taint("dedicated", "gpu", "NoSchedule")]);
        let status = TaintToleration.filter(&CycleState::new(), &make_pod("p", "1", "1Gi"), &node);
        assert_eq!(status.code(), Code::UnschedulableAndUnresolvable);
        assert_eq!(status.message(), "node(s) had untolerated taint {dedicated: gpu}");
    }

    #[test]
    fn test_prefer_no_schedule_is_ignored() {
        let node = tainted_node(vec![taint("dedicated", "gpu", "PreferNoSchedule")]);
        let status = TaintToleration.filter(&CycleState::new(), &make_pod("p", "1", "1Gi"), &node);
        assert!(status.is_success());
    }

    #[test]
    fn test_tolerations() {
        let node = tainted_node(vec![taint("dedicated", "gpu", "NoSchedule")]);
        let state = CycleState::new();

        let equal = Toleration {
            key: Some("dedicated".to_string()),
            value: Some("gpu".to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Default::default()
        };
        assert!(TaintToleration.filter(&state, &pod_tolerating(vec![equal]), &node).is_success());

        let wrong_value = Toleration {
            key: Some("dedicated".to_string()),
            value: Some("cpu".to_string()),
            ..Default::default()
        };
        assert!(!TaintToleration
            .filter(&state, &pod_tolerating(vec![wrong_value]), &node)
            .is_success());

        let exists_all = Toleration {
            operator: Some("Exists".to_string()),
            ..Default::default()
        };
        assert!(TaintToleration
            .filter(&state, &pod_tolerating(vec![exists_all]), &node)
            .is_success());

        let wrong_effect = Toleration {
            key: Some("dedicated".to_string()),
            operator: Some("Exists".to_string()),
            effect: Some("NoExecute".to_string()),
            ..Default::default()
        };
        assert!(!TaintToleration
            .filter(&state, &pod_tolerating(vec![wrong_effect]), &node)
            .is_success());
    }
}
