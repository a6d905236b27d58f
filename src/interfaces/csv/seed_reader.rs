use crate::domain::order::NewOrder;
use crate::domain::policy::PaymentPolicy;
use crate::domain::ports::PayoutDestination;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::io::Read;
use uuid::Uuid;

/// One row of an orders seed file.
///
/// Rows with a `payment_reference` are authorized by the customer right
/// after creation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderRecord {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub customer_id: String,
    pub provider_id: String,
    pub payment_policy_id: String,
    pub total_amount: Decimal,
    pub scheduled_start_time: DateTime<Utc>,
    #[serde(default)]
    pub payment_reference: Option<String>,
}

impl OrderRecord {
    pub fn new_order(&self) -> NewOrder {
        NewOrder {
            id: self.id,
            customer_id: self.customer_id.clone(),
            provider_id: self.provider_id.clone(),
            payment_policy_id: self.payment_policy_id.clone(),
            total_amount: self.total_amount,
            scheduled_start_time: self.scheduled_start_time,
        }
    }
}

/// Reads seed data (policies, payout destinations, orders) from a CSV source.
///
/// Headers name the fields; surrounding whitespace is trimmed and missing
/// trailing optional columns are accepted.
pub struct SeedReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> SeedReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    fn records<T: DeserializeOwned>(self) -> impl Iterator<Item = Result<T>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }

    pub fn policies(self) -> impl Iterator<Item = Result<PaymentPolicy>> {
        self.records()
    }

    pub fn providers(self) -> impl Iterator<Item = Result<PayoutDestination>> {
        self.records()
    }

    pub fn orders(self) -> impl Iterator<Item = Result<OrderRecord>> {
        self.records::<OrderRecord>().map(|record| {
            let record = record?;
            if record.payment_reference.as_deref() == Some("") {
                return Ok(OrderRecord {
                    payment_reference: None,
                    ..record
                });
            }
            Ok(record)
        })
    }
}
