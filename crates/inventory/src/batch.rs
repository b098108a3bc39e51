use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use pharmacy_core::{BatchId, DomainError, DomainResult, DrugId, Money};

/// A received lot of a drug with its own expiry date and quantity on hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub drug_id: DrugId,
    pub lot_number: Option<String>,
    /// Units on hand; never negative.
    pub quantity: i64,
    pub unit_cost: Money,
    /// Last day the batch may be sold.
    pub expiry_date: NaiveDate,
    pub received_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Input for a stock receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBatch {
    pub drug_id: DrugId,
    pub lot_number: Option<String>,
    pub quantity: i64,
    pub unit_cost: Money,
    pub expiry_date: NaiveDate,
    pub received_date: NaiveDate,
}

impl Batch {
    /// Build a batch from a stock receipt.
    pub fn receive(id: BatchId, input: NewBatch, now: DateTime<Utc>) -> DomainResult<Self> {
        if input.quantity <= 0 {
            return Err(DomainError::validation("received quantity must be positive"));
        }
        if input.quantity > Money::MAX_UNITS {
            return Err(DomainError::validation(format!(
                "received quantity exceeds the maximum of {} units",
                Money::MAX_UNITS
            )));
        }
        if input.unit_cost.is_negative() {
            return Err(DomainError::constraint("unit cost cannot be negative"));
        }
        if input.unit_cost > Money::MAX_UNIT {
            return Err(DomainError::validation(format!(
                "unit cost {} exceeds the maximum of {}",
                input.unit_cost,
                Money::MAX_UNIT
            )));
        }
        if input.expiry_date < input.received_date {
            return Err(DomainError::validation(format!(
                "expiry date {} is before received date {}",
                input.expiry_date, input.received_date
            )));
        }

        Ok(Self {
            id,
            drug_id: input.drug_id,
            lot_number: input
                .lot_number
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            quantity: input.quantity,
            unit_cost: input.unit_cost,
            expiry_date: input.expiry_date,
            received_date: input.received_date,
            created_at: now,
        })
    }

    /// A batch is expired once `today` is past its expiry date.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date < today
    }

    pub fn is_sellable(&self, today: NaiveDate) -> bool {
        self.quantity > 0 && !self.is_expired(today)
    }

    /// Days until expiry; negative once expired.
    pub fn days_until_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry_date - today).num_days()
    }

    /// Take `qty` units out for a sale.
    pub fn withdrawn(&self, qty: i64) -> DomainResult<Self> {
        if qty <= 0 {
            return Err(DomainError::validation("sale quantity must be positive"));
        }
        if qty > self.quantity {
            return Err(DomainError::constraint(format!(
                "only {} units available in batch {}",
                self.quantity, self.id
            )));
        }
        Ok(Self {
            quantity: self.quantity - qty,
            ..self.clone()
        })
    }

    /// Apply a signed manual adjustment.
    pub fn adjusted(&self, delta: i64) -> DomainResult<Self> {
        if delta == 0 {
            return Err(DomainError::validation("adjustment delta cannot be zero"));
        }
        let quantity = self
            .quantity
            .checked_add(delta)
            .ok_or_else(|| DomainError::constraint("adjustment overflows batch quantity"))?;
        if quantity < 0 {
            return Err(DomainError::constraint(format!(
                "cannot adjust stock below zero (current: {}, adjustment: {delta})",
                self.quantity
            )));
        }
        if quantity > Money::MAX_UNITS {
            return Err(DomainError::constraint(format!(
                "batch quantity cannot exceed {} units",
                Money::MAX_UNITS
            )));
        }
        Ok(Self {
            quantity,
            ..self.clone()
        })
    }
}
