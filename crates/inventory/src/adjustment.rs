//! Adjustment reasons and the note-requirement policy.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateId, DomainError, DomainResult, Entity, TenantId};

use crate::error::MovementError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdjustmentReasonId(pub AggregateId);

impl AdjustmentReasonId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for AdjustmentReasonId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactType {
    Loss,
    Gain,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentReason {
    id: AdjustmentReasonId,
    tenant_id: TenantId,
    code: String,
    name: String,
    description: Option<String>,
    impact: ImpactType,
    requires_note: bool,
    is_active: bool,
}

impl AdjustmentReason {
    pub fn id_typed(&self) -> AdjustmentReasonId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn impact(&self) -> ImpactType {
        self.impact
    }

    pub fn requires_note(&self) -> bool {
        self.requires_note
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }
}

impl Entity for AdjustmentReason {
    type Id = AdjustmentReasonId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReason {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub impact: ImpactType,
    pub requires_note: bool,
}

impl NewReason {
    pub fn new(code: impl Into<String>, name: impl Into<String>, impact: ImpactType) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: None,
            impact,
            requires_note: false,
        }
    }

    pub fn requiring_note(mut self) -> Self {
        self.requires_note = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Seed catalog installed by `seed_defaults`.
fn default_reasons() -> Vec<NewReason> {
    use ImpactType::*;
    vec![
        NewReason::new("THEFT", "Theft / loss", Loss).requiring_note(),
        NewReason::new("DAMAGE", "Damaged goods", Loss).requiring_note(),
        NewReason::new("EXPIRED", "Expired", Loss),
        NewReason::new("INTERNAL_USE", "Internal consumption", Loss),
        NewReason::new("FOUND", "Found in stock", Gain),
        NewReason::new("DONATION", "Donation received", Gain).requiring_note(),
        NewReason::new("CORRECTION", "Manual correction", Neutral).requiring_note(),
        NewReason::new("COUNT", "Physical count", Neutral),
    ]
}

/// Per-tenant reason catalog plus the rules an adjustment must satisfy.
#[derive(Debug, Default, Clone)]
pub struct AdjustmentPolicy {
    reasons: Vec<AdjustmentReason>,
    by_id: HashMap<AdjustmentReasonId, usize>,
    by_code: HashMap<(TenantId, String), usize>,
}

impl AdjustmentPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tenant_id: TenantId, new: NewReason) -> DomainResult<AdjustmentReason> {
        let code = new.code.trim().to_uppercase();
        if code.is_empty() {
            return Err(DomainError::validation("reason code cannot be empty"));
        }
        if new.name.trim().is_empty() {
            return Err(DomainError::validation("reason name cannot be empty"));
        }
        if self.by_code.contains_key(&(tenant_id, code.clone())) {
            return Err(DomainError::duplicate(format!("adjustment reason {code}")));
        }
        let reason = AdjustmentReason {
            id: AdjustmentReasonId::new(AggregateId::new()),
            tenant_id,
            code: code.clone(),
            name: new.name.trim().to_string(),
            description: new.description,
            impact: new.impact,
            requires_note: new.requires_note,
            is_active: true,
        };
        let idx = self.reasons.len();
        self.by_id.insert(reason.id, idx);
        self.by_code.insert((tenant_id, code), idx);
        self.reasons.push(reason.clone());
        Ok(reason)
    }

    /// Install the default reasons the tenant does not have yet. Returns the
    /// ones created (empty on a second call).
    pub fn seed_defaults(&mut self, tenant_id: TenantId) -> Vec<AdjustmentReason> {
        default_reasons()
            .into_iter()
            .filter_map(|r| self.add(tenant_id, r).ok())
            .collect()
    }

    pub fn get(&self, tenant_id: TenantId, id: AdjustmentReasonId) -> Option<&AdjustmentReason> {
        self.by_id
            .get(&id)
            .map(|&i| &self.reasons[i])
            .filter(|r| r.tenant_id == tenant_id)
    }

    pub fn by_code(&self, tenant_id: TenantId, code: &str) -> Option<&AdjustmentReason> {
        self.by_code
            .get(&(tenant_id, code.trim().to_uppercase()))
            .map(|&i| &self.reasons[i])
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<&AdjustmentReason> {
        self.reasons.iter().filter(|r| r.tenant_id == tenant_id).collect()
    }

    pub fn deactivate(&mut self, tenant_id: TenantId, id: AdjustmentReasonId) -> DomainResult<()> {
        let idx = *self
            .by_id
            .get(&id)
            .filter(|&&i| self.reasons[i].tenant_id == tenant_id)
            .ok_or_else(|| DomainError::not_found(format!("adjustment reason {id}")))?;
        self.reasons[idx].is_active = false;
        Ok(())
    }

    /// Check an adjustment's reason and note.
    pub fn validate(
        &self,
        tenant_id: TenantId,
        reason: Option<AdjustmentReasonId>,
        note: Option<&str>,
    ) -> Result<&AdjustmentReason, MovementError> {
        let id = reason.ok_or(MovementError::AdjustmentReasonRequired)?;
        let reason = self
            .get(tenant_id, id)
            .ok_or_else(|| MovementError::invalid(format!("unknown adjustment reason {id}")))?;
        if !reason.is_active {
            return Err(MovementError::invalid(format!(
                "adjustment reason {} is inactive",
                reason.code
            )));
        }
        let has_note = note.is_some_and(|n| !n.trim().is_empty());
        if reason.requires_note && !has_note {
            return Err(MovementError::AdjustmentNoteRequired {
                code: reason.code.clone(),
            });
        }
        Ok(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    #[test]
    fn seed_defaults_is_idempotent() {
        let mut policy = AdjustmentPolicy::new();
        let tenant = test_tenant_id();

        assert_eq!(policy.seed_defaults(tenant).len(), 8);
        assert!(policy.seed_defaults(tenant).is_empty());
        assert_eq!(policy.list(tenant).len(), 8);
        assert_eq!(policy.by_code(tenant, "theft").unwrap().impact(), ImpactType::Loss);
    }

    #[test]
    fn missing_reason_is_rejected() {
        let policy = AdjustmentPolicy::new();
        assert_eq!(
            policy.validate(test_tenant_id(), None, Some("note")).unwrap_err(),
            MovementError::AdjustmentReasonRequired
        );
    }

    #[test]
    fn note_required_reasons_reject_blank_notes() {
        let mut policy = AdjustmentPolicy::new();
        let tenant = test_tenant_id();
        policy.seed_defaults(tenant);
        let theft = policy.by_code(tenant, "THEFT").unwrap().id_typed();
        let count = policy.by_code(tenant, "COUNT").unwrap().id_typed();

        assert!(matches!(
            policy.validate(tenant, Some(theft), Some("   ")),
            Err(MovementError::AdjustmentNoteRequired { code }) if code == "THEFT"
        ));
        assert!(policy.validate(tenant, Some(theft), Some("shelf 3 broken into")).is_ok());
        assert!(policy.validate(tenant, Some(count), None).is_ok());
    }

    #[test]
    fn inactive_and_foreign_reasons_are_invalid() {
        let mut policy = AdjustmentPolicy::new();
        let tenant = test_tenant_id();
        let reason = policy
            .add(tenant, NewReason::new("SPILL", "Spill", ImpactType::Loss))
            .unwrap();

        assert!(matches!(
            policy.validate(test_tenant_id(), Some(reason.id_typed()), None),
            Err(MovementError::InvalidMovement(_))
        ));
        policy.deactivate(tenant, reason.id_typed()).unwrap();
        assert!(matches!(
            policy.validate(tenant, Some(reason.id_typed()), None),
            Err(MovementError::InvalidMovement(_))
        ));
    }
}
