//! Scope-level posting policy (expired batches, negative stock).

use serde::{Deserialize, Serialize};

use crate::error::MovementError;

/// What happens when a withdrawal consumes a batch past its expiry date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiredBatchPolicy {
    #[default]
    Block,
    Allow,
}

/// Policy configured per tenant. Individual calls may only relax what the
/// scope permits them to relax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopePolicy {
    pub expired_batches: ExpiredBatchPolicy,
    /// Whether a single call may ask to skip the expiry check.
    pub allow_expiry_override: bool,
    pub allow_negative_stock: bool,
}

impl ScopePolicy {
    pub fn with_expired_batches(mut self, policy: ExpiredBatchPolicy) -> Self {
        self.expired_batches = policy;
        self
    }

    pub fn with_expiry_override(mut self, allowed: bool) -> Self {
        self.allow_expiry_override = allowed;
        self
    }

    pub fn with_negative_stock(mut self, allowed: bool) -> Self {
        self.allow_negative_stock = allowed;
        self
    }

    /// Combine the scope policy with the location flag and the per-call
    /// requests into the rules one posting runs under.
    pub fn posting_rules(
        &self,
        location_allows_negative: bool,
        call_allows_negative: bool,
        call_overrides_expiry: bool,
    ) -> Result<PostingRules, MovementError> {
        if call_overrides_expiry
            && self.expired_batches == ExpiredBatchPolicy::Block
            && !self.allow_expiry_override
        {
            return Err(MovementError::invalid(
                "expiry override is not permitted in this scope",
            ));
        }
        Ok(PostingRules {
            allow_negative: self.allow_negative_stock
                || location_allows_negative
                || call_allows_negative,
            block_expired: self.expired_batches == ExpiredBatchPolicy::Block && !call_overrides_expiry,
        })
    }
}

/// Effective rules for a single balance decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRules {
    pub allow_negative: bool,
    pub block_expired: bool,
}

impl Default for PostingRules {
    fn default() -> Self {
        Self {
            allow_negative: false,
            block_expired: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scope_blocks_expired_and_refuses_override() {
        let scope = ScopePolicy::default();
        assert!(scope.posting_rules(false, false, false).unwrap().block_expired);
        assert!(matches!(
            scope.posting_rules(false, false, true),
            Err(MovementError::InvalidMovement(_))
        ));
    }

    #[test]
    fn override_is_honoured_when_scope_allows_it() {
        let scope = ScopePolicy::default().with_expiry_override(true);
        let rules = scope.posting_rules(false, false, true).unwrap();
        assert!(!rules.block_expired);
    }

    #[test]
    fn negative_stock_is_allowed_by_any_layer() {
        let scope = ScopePolicy::default();
        assert!(!scope.posting_rules(false, false, false).unwrap().allow_negative);
        assert!(scope.posting_rules(true, false, false).unwrap().allow_negative);
        assert!(scope.posting_rules(false, true, false).unwrap().allow_negative);
        assert!(
            scope
                .with_negative_stock(true)
                .posting_rules(false, false, false)
                .unwrap()
                .allow_negative
        );
    }
}
