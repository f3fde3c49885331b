//! Runtime feature toggles with prerequisite checks.
//!
//! A single `set_capability_enabled` replaces per-feature enable/disable
//! methods. Each capability declares the capabilities it depends on; enabling
//! requires every prerequisite to be on, and disabling is refused while an
//! enabled capability still depends on it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use crate::error::ConductorError;
use crate::models::coordination::CoordinationPattern;

pub const PARALLEL: &str = "coordination.parallel";
pub const HIERARCHICAL: &str = "coordination.hierarchical";
pub const COMPETITIVE: &str = "coordination.competitive";
pub const SWARM: &str = "coordination.swarm";
pub const LEARNING_INSIGHTS: &str = "learning.insights";

/// Capability gating the given coordination pattern.
pub fn pattern_capability(pattern: CoordinationPattern) -> &'static str {
    match pattern {
        CoordinationPattern::Parallel => PARALLEL,
        CoordinationPattern::Hierarchical => HIERARCHICAL,
        CoordinationPattern::Competitive => COMPETITIVE,
        CoordinationPattern::CollaborativeSwarm => SWARM,
    }
}

#[derive(Debug, Clone)]
struct CapabilityEntry {
    prerequisites: Vec<String>,
    enabled: bool,
}

pub struct CapabilityRegistry {
    entries: RwLock<BTreeMap<String, CapabilityEntry>>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    /// Registry with the built-in capabilities, all enabled.
    pub fn new() -> Self {
        let registry = Self::empty();
        let builtins: [(&str, &[&str]); 5] = [
            (PARALLEL, &[]),
            (HIERARCHICAL, &[]),
            (COMPETITIVE, &[PARALLEL]),
            (SWARM, &[PARALLEL]),
            (LEARNING_INSIGHTS, &[]),
        ];
        for (id, prereqs) in builtins {
            registry.define(id, prereqs, true);
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Declare (or redeclare) a capability.
    pub fn define(&self, capability_id: &str, prerequisites: &[&str], enabled: bool) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(
            capability_id.to_string(),
            CapabilityEntry {
                prerequisites: prerequisites.iter().map(|p| p.to_string()).collect(),
                enabled,
            },
        );
    }

    pub fn is_enabled(&self, capability_id: &str) -> bool {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(capability_id).map(|e| e.enabled).unwrap_or(false)
    }

    pub fn set_capability_enabled(
        &self,
        capability_id: &str,
        enabled: bool,
    ) -> Result<(), ConductorError> {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let entry = entries
            .get(capability_id)
            .ok_or_else(|| ConductorError::not_found(format!("Capability {}", capability_id)))?;
        if entry.enabled == enabled {
            return Ok(());
        }

        if enabled {
            let missing: Vec<&str> = entry
                .prerequisites
                .iter()
                .filter(|p| !entries.get(p.as_str()).map(|e| e.enabled).unwrap_or(false))
                .map(|p| p.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(ConductorError::permanent(format!(
                    "Cannot enable {}: prerequisites not enabled: {}",
                    capability_id,
                    missing.join(", ")
                )));
            }
        } else {
            let dependents: BTreeSet<&str> = entries
                .iter()
                .filter(|(_, e)| e.enabled && e.prerequisites.iter().any(|p| p == capability_id))
                .map(|(id, _)| id.as_str())
                .collect();
            if !dependents.is_empty() {
                return Err(ConductorError::permanent(format!(
                    "Cannot disable {}: required by {}",
                    capability_id,
                    dependents.into_iter().collect::<Vec<_>>().join(", ")
                )));
            }
        }

        if let Some(entry) = entries.get_mut(capability_id) {
            entry.enabled = enabled;
        }
        tracing::info!(
            "[Capabilities] {} {}",
            capability_id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// `(capability, enabled)` pairs in id order.
    pub fn snapshot(&self) -> Vec<(String, bool)> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.iter().map(|(id, e)| (id.clone(), e.enabled)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_builtins_enabled() {
        let caps = CapabilityRegistry::new();
        for pattern in [
            CoordinationPattern::Parallel,
            CoordinationPattern::Hierarchical,
            CoordinationPattern::Competitive,
            CoordinationPattern::CollaborativeSwarm,
        ] {
            assert!(caps.is_enabled(pattern_capability(pattern)));
        }
        assert!(caps.is_enabled(LEARNING_INSIGHTS));
        assert!(!caps.is_enabled("unknown"));
    }

    #[test]
    fn test_disable_refused_while_dependents_enabled() {
        let caps = CapabilityRegistry::new();
        let err = caps.set_capability_enabled(PARALLEL, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert!(err.to_string().contains(COMPETITIVE));

        caps.set_capability_enabled(COMPETITIVE, false).unwrap();
        caps.set_capability_enabled(SWARM, false).unwrap();
        caps.set_capability_enabled(PARALLEL, false).unwrap();
        assert!(!caps.is_enabled(PARALLEL));
    }

    #[test]
    fn test_enable_requires_prerequisites() {
        let caps = CapabilityRegistry::new();
        caps.set_capability_enabled(COMPETITIVE, false).unwrap();
        caps.set_capability_enabled(SWARM, false).unwrap();
        caps.set_capability_enabled(PARALLEL, false).unwrap();

        assert!(caps.set_capability_enabled(SWARM, true).is_err());
        caps.set_capability_enabled(PARALLEL, true).unwrap();
        caps.set_capability_enabled(SWARM, true).unwrap();
        // Setting the current value is a no-op.
        caps.set_capability_enabled(SWARM, true).unwrap();
    }

    #[test]
    fn test_unknown_capability() {
        let caps = CapabilityRegistry::new();
        let err = caps.set_capability_enabled("coordination.telepathy", true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
