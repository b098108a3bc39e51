use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pharmacy_core::{AdjustmentId, BatchId, DomainError, DomainResult, DrugId};

/// Why a batch quantity changed outside of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    /// Initial stock entry when the batch was received.
    Receipt,
    /// Manual correction (count mismatch, damage, ...).
    Manual,
    /// Remaining units removed, typically because the batch expired.
    WriteOff,
    /// Units put back by voiding an invoice.
    Return,
}

impl AdjustmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AdjustmentKind::Receipt => "receipt",
            AdjustmentKind::Manual => "manual",
            AdjustmentKind::WriteOff => "write_off",
            AdjustmentKind::Return => "return",
        }
    }
}

impl core::str::FromStr for AdjustmentKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receipt" => Ok(AdjustmentKind::Receipt),
            "manual" => Ok(AdjustmentKind::Manual),
            "write_off" => Ok(AdjustmentKind::WriteOff),
            "return" => Ok(AdjustmentKind::Return),
            other => Err(DomainError::validation(format!("unknown adjustment kind '{other}'"))),
        }
    }
}

/// Append-only record of a stock change on a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub id: AdjustmentId,
    pub batch_id: BatchId,
    pub drug_id: DrugId,
    pub delta: i64,
    pub kind: AdjustmentKind,
    pub reason: String,
    pub adjusted_at: DateTime<Utc>,
}

/// Request to adjust a batch manually or write it off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAdjustment {
    pub batch_id: BatchId,
    pub delta: i64,
    pub kind: AdjustmentKind,
    pub reason: String,
}

impl StockAdjustment {
    pub fn record(
        id: AdjustmentId,
        batch_id: BatchId,
        drug_id: DrugId,
        delta: i64,
        kind: AdjustmentKind,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if delta == 0 {
            return Err(DomainError::validation("adjustment delta cannot be zero"));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("reason for adjustment is required"));
        }
        Ok(Self {
            id,
            batch_id,
            drug_id,
            delta,
            kind,
            reason: reason.to_string(),
            adjusted_at: now,
        })
    }
}
