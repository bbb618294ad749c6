use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_events::{Event, EventEnvelope};
use stockledger_inventory::{BalanceKey, StockMovement};

/// Facts published after a ledger commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    MovementPosted { movement: StockMovement },
    TransferPosted { out: StockMovement, inbound: StockMovement },
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::MovementPosted { .. } => "inventory.movement.posted",
            LedgerEvent::TransferPosted { .. } => "inventory.transfer.posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::MovementPosted { movement } => movement.occurred_at(),
            LedgerEvent::TransferPosted { out, .. } => out.occurred_at(),
        }
    }
}

impl LedgerEvent {
    /// Envelope keyed by the balance stream the event belongs to. Transfers
    /// are keyed by their outbound leg.
    pub fn into_envelope(self) -> EventEnvelope<LedgerEvent> {
        let lead = match &self {
            LedgerEvent::MovementPosted { movement } => movement,
            LedgerEvent::TransferPosted { out, .. } => out,
        };
        let stream = BalanceKey::new(lead.tenant_id(), lead.item(), lead.location()).to_string();
        EventEnvelope::new(
            Uuid::now_v7(),
            lead.tenant_id(),
            stream,
            self.event_type(),
            lead.sequence(),
            self,
        )
    }
}

pub type LedgerEnvelope = EventEnvelope<LedgerEvent>;
