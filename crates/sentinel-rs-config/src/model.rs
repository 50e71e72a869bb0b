//! Configuration schema for Sentinel.

use crate::ConfigError;
use globset::Glob;
use sentinel_rs_protocol::{MemoryType, PolicyOutcome, PolicyRuleName};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Root config for the guard layer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SentinelConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub boundary: BoundaryConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl SentinelConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> SentinelConfigBuilder {
        SentinelConfigBuilder::new()
    }

    /// Validate invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.drift.validate()?;
        self.policy.validate()?;
        self.memory.validate()?;
        self.boundary.validate()?;
        Ok(())
    }
}

/// Builder for assembling a `SentinelConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct SentinelConfigBuilder {
    config: SentinelConfig,
}

impl SentinelConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: SentinelConfig::default(),
        }
    }

    /// Replace the drift thresholds.
    pub fn drift(mut self, drift: DriftConfig) -> Self {
        self.config.drift = drift;
        self
    }

    /// Replace the policy rule table.
    pub fn policy(mut self, policy: PolicyConfig) -> Self {
        self.config.policy = policy;
        self
    }

    /// Replace the memory type allowances.
    pub fn memory(mut self, memory: MemoryConfig) -> Self {
        self.config.memory = memory;
        self
    }

    /// Append a seed scope registration.
    pub fn registration(mut self, registration: RegistrationConfig) -> Self {
        self.config.boundary.registrations.push(registration);
        self
    }

    /// Replace the store settings.
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.config.store = store;
        self
    }

    /// Validate and return the built config.
    pub fn build(self) -> Result<SentinelConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Static drift thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriftConfig {
    /// `T_sim`: responses below this cosine similarity are drifting.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// `T_struct`: responses above this normalized token edit distance are drifting.
    #[serde(default = "default_structural_threshold")]
    pub structural_threshold: f64,
    /// Deadline for each embedding call; expiry makes drift unmeasurable.
    #[serde(default)]
    pub embedding_timeout_ms: Option<u64>,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            structural_threshold: default_structural_threshold(),
            embedding_timeout_ms: None,
        }
    }
}

impl DriftConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.similarity_threshold.is_finite()
            || !(-1.0..=1.0).contains(&self.similarity_threshold)
        {
            return Err(ConfigError::Invalid(format!(
                "drift.similarity_threshold must be in [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        if !self.structural_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.structural_threshold)
        {
            return Err(ConfigError::Invalid(format!(
                "drift.structural_threshold must be in [0, 1], got {}",
                self.structural_threshold
            )));
        }
        if self.embedding_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "drift.embedding_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_similarity_threshold() -> f64 {
    0.75
}

fn default_structural_threshold() -> f64 {
    0.5
}

/// Ordered policy rule table plus its version tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Version tag stamped on every decision and incident.
    #[serde(default = "default_policy_version")]
    pub version: String,
    /// Rules evaluated in order; the first match decides the outcome.
    #[serde(default = "default_policy_rules")]
    pub rules: Vec<PolicyRuleConfig>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            version: default_policy_version(),
            rules: default_policy_rules(),
        }
    }
}

impl PolicyConfig {
    /// Default table with drift outcomes replaced.
    pub fn with_drift_outcomes(detected: PolicyOutcome, unmeasurable: PolicyOutcome) -> Self {
        let mut config = Self::default();
        for rule in &mut config.rules {
            match rule.rule {
                PolicyRuleName::DriftDetected => rule.outcome = detected,
                PolicyRuleName::DriftUnmeasurable => rule.outcome = unmeasurable,
                _ => {}
            }
        }
        config
    }

    /// Check the table covers every condition once and never fails open.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::InvalidPolicy(
                "policy.version must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.rule) {
                return Err(ConfigError::InvalidPolicy(format!(
                    "rule {} appears more than once",
                    rule.rule
                )));
            }
            if rule.outcome == PolicyOutcome::Allow {
                return Err(ConfigError::InvalidPolicy(format!(
                    "rule {} may not map to allow",
                    rule.rule
                )));
            }
        }
        if let Some(missing) = PolicyRuleName::ALL
            .into_iter()
            .find(|name| !seen.contains(name))
        {
            return Err(ConfigError::InvalidPolicy(format!(
                "rule {missing} is missing from the table"
            )));
        }
        Ok(())
    }
}

/// Single row of the policy rule table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyRuleConfig {
    pub rule: PolicyRuleName,
    pub outcome: PolicyOutcome,
}

fn default_policy_version() -> String {
    "v1".to_string()
}

fn default_policy_rules() -> Vec<PolicyRuleConfig> {
    vec![
        PolicyRuleConfig {
            rule: PolicyRuleName::BoundaryRejected,
            outcome: PolicyOutcome::Block,
        },
        PolicyRuleConfig {
            rule: PolicyRuleName::MemoryConflict,
            outcome: PolicyOutcome::Block,
        },
        PolicyRuleConfig {
            rule: PolicyRuleName::DriftDetected,
            outcome: PolicyOutcome::FlagReview,
        },
        PolicyRuleConfig {
            rule: PolicyRuleName::DriftUnmeasurable,
            outcome: PolicyOutcome::FlagReview,
        },
    ]
}

/// Memory types each scope may inject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Types allowed for scopes that match no entry in `scopes`.
    #[serde(default = "default_allowed_types")]
    pub default_allowed_types: Vec<MemoryType>,
    /// Per-scope overrides; exact names win over glob patterns.
    #[serde(default)]
    pub scopes: Vec<ScopeMemoryConfig>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            default_allowed_types: default_allowed_types(),
            scopes: Vec::new(),
        }
    }
}

impl MemoryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for entry in &self.scopes {
            if entry.pattern.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "memory.scopes entries require a pattern".to_string(),
                ));
            }
            Glob::new(&entry.pattern).map_err(|err| ConfigError::InvalidPattern {
                pattern: entry.pattern.clone(),
                message: err.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Allowed memory types for scopes matching a pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeMemoryConfig {
    pub pattern: String,
    #[serde(default)]
    pub allowed_types: Vec<MemoryType>,
}

fn default_allowed_types() -> Vec<MemoryType> {
    MemoryType::ALL.to_vec()
}

/// Scope registrations loaded into the store at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BoundaryConfig {
    #[serde(default)]
    pub registrations: Vec<RegistrationConfig>,
}

impl BoundaryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (idx, registration) in self.registrations.iter().enumerate() {
            if registration.user_id.trim().is_empty() || registration.scope.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "boundary.registrations[{idx}] requires user_id and scope"
                )));
            }
        }
        Ok(())
    }
}

/// Seed registration of a user on a scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationConfig {
    pub user_id: String,
    pub scope: String,
    #[serde(default)]
    pub sessions: Vec<String>,
    #[serde(default = "default_registration_active")]
    pub active: bool,
}

fn default_registration_active() -> bool {
    true
}

/// Record store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct StoreConfig {
    #[serde(default)]
    pub provider: StoreProvider,
    /// Root directory for the file provider.
    #[serde(default)]
    pub path: Option<String>,
}

/// Available record store backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreProvider {
    #[default]
    File,
    Memory,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_is_valid() {
        let config = SentinelConfig::default();
        config.validate().expect("valid");
        assert_eq!(config.policy.rules.len(), 4);
        assert_eq!(config.policy.rules[0].rule, PolicyRuleName::BoundaryRejected);
        assert_eq!(config.drift.similarity_threshold, 0.75);
    }

    #[test]
    fn missing_rule_is_rejected() {
        let mut policy = PolicyConfig::default();
        policy
            .rules
            .retain(|rule| rule.rule != PolicyRuleName::DriftUnmeasurable);
        let err = policy.validate().unwrap_err();
        assert!(format!("{err}").contains("drift_unmeasurable"));
    }

    #[test]
    fn boundary_rule_cannot_allow() {
        let mut policy = PolicyConfig::default();
        policy.rules[0].outcome = PolicyOutcome::Allow;
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn no_rule_can_allow() {
        for name in PolicyRuleName::ALL {
            let mut policy = PolicyConfig::default();
            for rule in &mut policy.rules {
                if rule.rule == name {
                    rule.outcome = PolicyOutcome::Allow;
                }
            }
            let err = policy.validate().unwrap_err();
            assert!(format!("{err}").contains(name.as_str()));
        }
        assert!(
            PolicyConfig::with_drift_outcomes(PolicyOutcome::Allow, PolicyOutcome::Allow)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn drift_outcomes_can_be_switched_to_block() {
        let policy = PolicyConfig::with_drift_outcomes(PolicyOutcome::Block, PolicyOutcome::Block);
        policy.validate().expect("valid");
        assert_eq!(policy.rules[2].outcome, PolicyOutcome::Block);
        assert_eq!(policy.rules[3].outcome, PolicyOutcome::Block);
    }

    #[test]
    fn builder_rejects_out_of_range_threshold() {
        let result = SentinelConfig::builder()
            .drift(DriftConfig {
                similarity_threshold: 1.5,
                ..DriftConfig::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn invalid_scope_glob_is_rejected() {
        let memory = MemoryConfig {
            default_allowed_types: default_allowed_types(),
            scopes: vec![ScopeMemoryConfig {
                pattern: "billing[".to_string(),
                allowed_types: vec![MemoryType::Fact],
            }],
        };
        assert!(matches!(
            memory.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }
}
