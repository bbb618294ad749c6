use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateId, DomainError, DomainResult, Entity, TenantId};

use crate::tax_id::TaxId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierId(pub AggregateId);

impl SupplierId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SupplierId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// A supplier, unique per tenant by normalized tax id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    id: SupplierId,
    tenant_id: TenantId,
    tax_id: TaxId,
    company_name: String,
    trade_name: Option<String>,
    contact: ContactInfo,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl Supplier {
    pub fn new(
        tenant_id: TenantId,
        tax_id: TaxId,
        company_name: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let company_name = company_name.into().trim().to_string();
        if company_name.is_empty() {
            return Err(DomainError::validation("supplier name cannot be empty"));
        }
        Ok(Self {
            id: SupplierId::new(AggregateId::new()),
            tenant_id,
            tax_id,
            company_name,
            trade_name: None,
            contact: ContactInfo::default(),
            is_active: true,
            created_at,
        })
    }

    pub fn with_trade_name(mut self, trade_name: impl Into<String>) -> Self {
        let trade_name = trade_name.into().trim().to_string();
        self.trade_name = (!trade_name.is_empty()).then_some(trade_name);
        self
    }

    pub fn with_contact(mut self, contact: ContactInfo) -> Self {
        self.contact = contact;
        self
    }

    pub fn id_typed(&self) -> SupplierId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn tax_id(&self) -> &TaxId {
        &self.tax_id
    }

    pub fn company_name(&self) -> &str {
        &self.company_name
    }

    pub fn trade_name(&self) -> Option<&str> {
        self.trade_name.as_deref()
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Trade name when known, legal name otherwise.
    pub fn display_name(&self) -> &str {
        self.trade_name.as_deref().unwrap_or(&self.company_name)
    }
}

impl Entity for Supplier {
    type Id = SupplierId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_trade_name() {
        let tax_id = TaxId::parse("11222333000181").unwrap();
        let s = Supplier::new(TenantId::new(), tax_id, "Linhas Corrente Ltda", Utc::now()).unwrap();
        assert_eq!(s.display_name(), "Linhas Corrente Ltda");
        assert_eq!(s.with_trade_name("Corrente").display_name(), "Corrente");
    }
}
