use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Authorize,
    Capture,
    Refund,
    Transfer,
}

/// One immutable row of the monetary audit trail.
///
/// Corrections are recorded as new rows; existing rows are never rewritten.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub r#type: PaymentType,
    pub amount: Decimal,
    pub external_reference: String,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        order_id: Uuid,
        r#type: PaymentType,
        amount: Decimal,
        external_reference: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            r#type,
            amount,
            external_reference: external_reference.into(),
            created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    Holding,
    ReleasedToProvider,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Escrow {
    pub order_id: Uuid,
    pub status: EscrowStatus,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub released_to: Option<String>,
}

impl Escrow {
    pub fn holding(order_id: Uuid, amount: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            order_id,
            status: EscrowStatus::Holding,
            amount,
            created_at: now,
            released_at: None,
            released_to: None,
        }
    }

    /// Marks the escrow released. Returns `false` when it already was.
    pub fn release_to(&mut self, provider_id: &str, now: DateTime<Utc>) -> bool {
        if self.status == EscrowStatus::ReleasedToProvider {
            return false;
        }
        self.status = EscrowStatus::ReleasedToProvider;
        self.released_at = Some(now);
        self.released_to = Some(provider_id.to_string());
        true
    }
}

/// One settled order's contribution to a provider's payout.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutEntry {
    pub provider_id: String,
    pub period: String,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub platform_fee: Decimal,
    pub transfer_id: String,
    pub settled_at: DateTime<Utc>,
}

/// Everything transferred to one provider in one settlement period.
///
/// There is a single row per `(provider_id, period)`; each settlement adds
/// its amount, fee and transfer id to it.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Payout {
    pub id: Uuid,
    pub provider_id: String,
    /// Calendar month of the settlements, `YYYY-MM`.
    pub period: String,
    pub amount: Decimal,
    pub platform_fee: Decimal,
    pub order_ids: Vec<Uuid>,
    pub transfer_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payout {
    pub fn open(provider_id: &str, period: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id: provider_id.to_string(),
            period: period.to_string(),
            amount: Decimal::ZERO,
            platform_fee: Decimal::ZERO,
            order_ids: Vec::new(),
            transfer_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn includes(&self, order_id: Uuid) -> bool {
        self.order_ids.contains(&order_id)
    }

    /// Adds a settlement. Returns `false` when the order was already added.
    pub fn add(&mut self, entry: &PayoutEntry) -> bool {
        if self.includes(entry.order_id) {
            return false;
        }
        self.amount += entry.amount;
        self.platform_fee += entry.platform_fee;
        self.order_ids.push(entry.order_id);
        self.transfer_ids.push(entry.transfer_id.clone());
        self.updated_at = entry.settled_at;
        true
    }
}

pub fn settlement_period(at: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", at.year(), at.month())
}
