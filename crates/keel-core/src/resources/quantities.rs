use crate::error::{KeelError, Result};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Binary suffixes accepted for memory quantities
const BINARY_SUFFIXES: [(&str, i64); 5] = [
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
];

/// Decimal suffixes accepted for memory quantities
const DECIMAL_SUFFIXES: [(&str, i64); 5] = [
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
];

/// Resource quantities requested by pods or offered by nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceQuantities {
    /// CPU in millicores (1000 = 1 core)
    pub cpu_millicores: i64,
    /// Memory in bytes
    pub memory_bytes: i64,
}

impl ResourceQuantities {
    pub fn new(cpu_millicores: i64, memory_bytes: i64) -> Self {
        Self {
            cpu_millicores,
            memory_bytes,
        }
    }

    /// Parse CPU string (e.g., "2", "1000m", "0.5")
    pub fn parse_cpu(s: &str) -> Result<i64> {
        let s = s.trim();
        let parsed = if let Some(m) = s.strip_suffix('m') {
            m.parse::<i64>().ok()
        } else {
            s.parse::<f64>()
                .ok()
                .filter(|cores| cores.is_finite())
                .map(|cores| (cores * 1000.0).round() as i64)
        };

        match parsed {
            Some(v) if v >= 0 => Ok(v),
            _ => Err(KeelError::invalid_quantity("cpu", s)),
        }
    }

    /// Parse memory string (e.g., "128Mi", "1Gi", "500M", "1024")
    pub fn parse_memory(s: &str) -> Result<i64> {
        let s = s.trim();
        let (digits, multiplier) = BINARY_SUFFIXES
            .iter()
            .chain(DECIMAL_SUFFIXES.iter())
            .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|d| (d, *mult)))
            .unwrap_or((s, 1));

        digits
            .parse::<i64>()
            .ok()
            .filter(|v| *v >= 0)
            .and_then(|v| v.checked_mul(multiplier))
            .ok_or_else(|| KeelError::invalid_quantity("memory", s))
    }

    /// Get CPU and memory from a resource map, failing on malformed values
    pub fn try_from_k8s_resource_map(resources: &BTreeMap<String, Quantity>) -> Result<Self> {
        let cpu_millicores = match resources.get("cpu") {
            Some(q) => Self::parse_cpu(&q.0)?,
            None => 0,
        };
        let memory_bytes = match resources.get("memory") {
            Some(q) => Self::parse_memory(&q.0)?,
            None => 0,
        };

        Ok(Self {
            cpu_millicores,
            memory_bytes,
        })
    }

    /// Get CPU and memory from a resource map, treating malformed values as zero
    pub fn from_k8s_resource_map(resources: &BTreeMap<String, Quantity>) -> Self {
        let cpu_millicores = resources
            .get("cpu")
            .and_then(|q| Self::parse_cpu(&q.0).ok())
            .unwrap_or(0);

        let memory_bytes = resources
            .get("memory")
            .and_then(|q| Self::parse_memory(&q.0).ok())
            .unwrap_or(0);

        Self {
            cpu_millicores,
            memory_bytes,
        }
    }

    /// Allocatable capacity of a node (zero when not reported)
    pub fn node_allocatable(node: &Node) -> Self {
        node.status
            .as_ref()
            .and_then(|s| s.allocatable.as_ref())
            .map(Self::from_k8s_resource_map)
            .unwrap_or_default()
    }

    /// Effective request of a pod.
    ///
    /// Regular containers run together and are summed; init containers run one
    /// at a time before them, so the pod needs the larger of the sum and the
    /// biggest init container, per resource. Pod overhead is added on top.
    pub fn pod_requests(pod: &Pod) -> Result<Self> {
        let spec = match &pod.spec {
            Some(spec) => spec,
            None => return Ok(Self::default()),
        };

        let mut total = Self::default();
        for container in &spec.containers {
            if let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
                total += Self::try_from_k8s_resource_map(requests)?;
            }
        }

        for container in spec.init_containers.iter().flatten() {
            if let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
                let init = Self::try_from_k8s_resource_map(requests)?;
                total.cpu_millicores = total.cpu_millicores.max(init.cpu_millicores);
                total.memory_bytes = total.memory_bytes.max(init.memory_bytes);
            }
        }

        if let Some(overhead) = &spec.overhead {
            total += Self::try_from_k8s_resource_map(overhead)?;
        }

        Ok(total)
    }

    /// Whether both CPU and memory are within the given capacity
    pub fn fits_within(&self, capacity: &Self) -> bool {
        self.cpu_millicores <= capacity.cpu_millicores && self.memory_bytes <= capacity.memory_bytes
    }
}

impl Add for ResourceQuantities {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            cpu_millicores: self.cpu_millicores.saturating_add(rhs.cpu_millicores),
            memory_bytes: self.memory_bytes.saturating_add(rhs.memory_bytes),
        }
    }
}

impl AddAssign for ResourceQuantities {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for ResourceQuantities {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            cpu_millicores: self.cpu_millicores.saturating_sub(rhs.cpu_millicores),
            memory_bytes: self.memory_bytes.saturating_sub(rhs.memory_bytes),
        }
    }
}

impl SubAssign for ResourceQuantities {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements};

    fn requests(cpu: &str, memory: &str) -> Option<ResourceRequirements> {
        let mut map = BTreeMap::new();
        map.insert("cpu".to_string(), Quantity(cpu.to_string()));
        map.insert("memory".to_string(), Quantity(memory.to_string()));
        Some(ResourceRequirements {
            requests: Some(map),
            ..Default::default()
        })
    }

    #[test]
    fn test_parse_cpu() {
        assert_eq!(ResourceQuantities::parse_cpu("1").unwrap(), 1000);
        assert_eq!(ResourceQuantities::parse_cpu("0.5").unwrap(), 500);
        assert_eq!(ResourceQuantities::parse_cpu("100m").unwrap(), 100);
        assert!(ResourceQuantities::parse_cpu("-1").is_err());
        assert!(ResourceQuantities::parse_cpu("abc").is_err());
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(ResourceQuantities::parse_memory("1024").unwrap(), 1024);
        assert_eq!(ResourceQuantities::parse_memory("1Ki").unwrap(), 1024);
        assert_eq!(
            ResourceQuantities::parse_memory("128Mi").unwrap(),
            128 * 1024 * 1024
        );
        assert_eq!(ResourceQuantities::parse_memory("2G").unwrap(), 2_000_000_000);
        assert!(ResourceQuantities::parse_memory("1Xi").is_err());
    }

    #[test]
    fn test_pod_requests_sums_containers_and_max_init() {
        let pod = Pod {
            spec: Some(PodSpec {
                containers: vec![
                    Container {
                        name: "a".to_string(),
                        resources: requests("500m", "1Gi"),
                        ..Default::default()
                    },
                    Container {
                        name: "b".to_string(),
                        resources: requests("250m", "512Mi"),
                        ..Default::default()
                    },
                ],
                init_containers: Some(vec![Container {
                    name: "init".to_string(),
                    resources: requests("2", "256Mi"),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let total = ResourceQuantities::pod_requests(&pod).unwrap();
        assert_eq!(total.cpu_millicores, 2000);
        assert_eq!(total.memory_bytes, 1536 * 1024 * 1024);
    }

    #[test]
    fn test_pod_requests_rejects_malformed_quantity() {
        let pod = Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "a".to_string(),
                    resources: requests("lots", "1Gi"),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(ResourceQuantities::pod_requests(&pod).is_err());
    }

    #[test]
    fn test_arithmetic_and_fit() {
        let a = ResourceQuantities::new(1000, 100);
        let b = ResourceQuantities::new(500, 300);
        assert_eq!(a + b, ResourceQuantities::new(1500, 400));
        assert_eq!(a - b, ResourceQuantities::new(500, -200));
        assert!(b.fits_within(&ResourceQuantities::new(500, 300)));
        assert!(!a.fits_within(&b));
    }
}
