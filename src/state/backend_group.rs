use serde::Serialize;

use crate::common::ResourceKey;

/// The backends of one rule of an HTTPRoute, in rule order. Slots for
/// invalid references are retained so indices stay stable.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BackendGroup {
    pub source: ResourceKey,
    pub rule_idx: usize,
    pub backends: Vec<BackendRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BackendRef {
    pub name: String,
    pub valid: bool,
    pub weight: i32,
}

impl BackendGroup {
    /// Traffic must be split when the rule lists more than one backend.
    pub fn needs_split(&self) -> bool {
        self.backends.len() > 1
    }

    /// The upstream target of the group: the group name when a split is
    /// needed, the backend's upstream name for a single valid weighted
    /// backend, `None` when the group cannot be addressed directly.
    pub fn name(&self) -> Option<String> {
        match self.backends.as_slice() {
            [] => None,
            [backend] => {
                if backend.weight <= 0 || !backend.valid {
                    None
                } else {
                    Some(backend.name.clone())
                }
            }
            _ => Some(self.group_name()),
        }
    }

    /// Deterministic name of the group, unique per (route, rule index).
    pub fn group_name(&self) -> String {
        format!("{}_{}_rule{}", self.source.namespace, self.source.name, self.rule_idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(backends: Vec<BackendRef>) -> BackendGroup {
        BackendGroup {
            source: ResourceKey::namespaced("hr1", "test"),
            rule_idx: 2,
            backends,
        }
    }

    #[test]
    fn group_name_is_keyed_by_route_and_rule() {
        assert_eq!(group(vec![]).group_name(), "test_hr1_rule2");
    }

    #[test]
    fn name_of_empty_group_is_none() {
        assert_eq!(group(vec![]).name(), None);
    }

    #[test]
    fn name_of_single_valid_backend_is_the_upstream() {
        let g = group(vec![BackendRef {
            name: "test_svc1_80".to_owned(),
            valid: true,
            weight: 1,
        }]);
        assert_eq!(g.name(), Some("test_svc1_80".to_owned()));
        assert!(!g.needs_split());
    }

    #[test]
    fn name_of_single_invalid_or_weightless_backend_is_none() {
        let invalid = group(vec![BackendRef {
            name: "test_svc1_80".to_owned(),
            valid: false,
            weight: 1,
        }]);
        assert_eq!(invalid.name(), None);

        let weightless = group(vec![BackendRef {
            name: "test_svc1_80".to_owned(),
            valid: true,
            weight: 0,
        }]);
        assert_eq!(weightless.name(), None);
    }

    #[test]
    fn name_of_multi_backend_group_is_the_group_name() {
        let g = group(vec![
            BackendRef {
                name: "test_svc1_80".to_owned(),
                valid: true,
                weight: 1,
            },
            BackendRef {
                name: "test_svc2_80".to_owned(),
                valid: true,
                weight: 1,
            },
        ]);
        assert_eq!(g.name(), Some("test_hr1_rule2".to_owned()));
        assert!(g.needs_split());
    }
}
