//! Expiry and low-stock alerts.
//!
//! Pure reads over the record store: the same store contents and `today`
//! always produce the same alerts in the same order.

use std::collections::HashMap;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use pharmacy_core::{BatchId, DrugId};
use pharmacy_store::{BatchFilter, DrugFilter, RecordStore};

use crate::result::{AnalyticsError, AnalyticsResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Batches expiring within this many days of today are flagged.
    pub lookahead_days: u32,
    /// Expiry within this many days is critical.
    pub critical_days: u32,
    /// Stock at or below this share of the reorder threshold is critical.
    pub critical_stock_ratio: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            lookahead_days: 30,
            critical_days: 7,
            critical_stock_ratio: 0.10,
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> AnalyticsResult<()> {
        if !(0.0..=1.0).contains(&self.critical_stock_ratio) {
            return Err(AnalyticsError::InvalidConfig(format!(
                "critical_stock_ratio must be within [0, 1], got {}",
                self.critical_stock_ratio
            )));
        }
        Ok(())
    }

    /// Critical tier for expiry alerts, capped by the lookahead window.
    pub fn effective_critical_days(&self) -> u32 {
        self.critical_days.min(self.lookahead_days)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
    Expired,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryAlert {
    pub batch_id: BatchId,
    pub drug_id: DrugId,
    pub drug_name: String,
    pub lot_number: Option<String>,
    pub expiry_date: NaiveDate,
    pub quantity: i64,
    /// Negative once the batch has expired.
    pub days_remaining: i64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub drug_id: DrugId,
    pub drug_name: String,
    /// Units in batches that are not expired.
    pub on_hand: i64,
    pub reorder_threshold: i64,
    /// `reorder_threshold - on_hand`, always positive.
    pub deficit: i64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertReport {
    pub as_of: NaiveDate,
    pub expiring: Vec<ExpiryAlert>,
    pub low_stock: Vec<LowStockAlert>,
}

impl AlertReport {
    pub fn is_empty(&self) -> bool {
        self.expiring.is_empty() && self.low_stock.is_empty()
    }

    pub fn critical_count(&self) -> usize {
        self.expiring
            .iter()
            .filter(|a| a.severity != Severity::Warning)
            .count()
            + self
                .low_stock
                .iter()
                .filter(|a| a.severity == Severity::Critical)
                .count()
    }
}

/// Scans the record store for batches about to expire and drugs below their
/// reorder threshold.
pub struct AlertEngine<'a, S: RecordStore + ?Sized> {
    store: &'a S,
    config: AlertConfig,
}

impl<'a, S: RecordStore + ?Sized> AlertEngine<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            config: AlertConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AlertConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// In-stock batches expiring on or before `today + lookahead_days`,
    /// soonest first. Already expired batches are included.
    pub fn expiring(&self, today: NaiveDate) -> AnalyticsResult<impl Iterator<Item = ExpiryAlert> + use<'a, S>> {
        self.config.validate()?;
        let horizon = today
            .checked_add_days(Days::new(u64::from(self.config.lookahead_days)))
            .unwrap_or(NaiveDate::MAX);

        let names: HashMap<DrugId, String> = self
            .store
            .list_drugs(&DrugFilter::default())?
            .into_iter()
            .map(|d| (d.id, d.name))
            .collect();
        let mut batches = self.store.list_batches(&BatchFilter {
            expiring_on_or_before: Some(horizon),
            in_stock_only: true,
            ..Default::default()
        })?;
        batches.sort_by(|a, b| {
            a.expiry_date
                .cmp(&b.expiry_date)
                .then_with(|| names.get(&a.drug_id).cmp(&names.get(&b.drug_id)))
                .then(a.id.cmp(&b.id))
        });

        let critical_days = i64::from(self.config.effective_critical_days());
        Ok(batches.into_iter().map(move |batch| {
            let days_remaining = batch.days_until_expiry(today);
            let severity = if batch.is_expired(today) {
                Severity::Expired
            } else if days_remaining <= critical_days {
                Severity::Critical
            } else {
                Severity::Warning
            };
            ExpiryAlert {
                batch_id: batch.id,
                drug_id: batch.drug_id,
                drug_name: names.get(&batch.drug_id).cloned().unwrap_or_default(),
                lot_number: batch.lot_number,
                expiry_date: batch.expiry_date,
                quantity: batch.quantity,
                days_remaining,
                severity,
            }
        }))
    }

    /// Active drugs whose non-expired stock is strictly below their reorder
    /// threshold, largest deficit first.
    pub fn low_stock(&self, today: NaiveDate) -> AnalyticsResult<impl Iterator<Item = LowStockAlert> + use<'a, S>> {
        self.config.validate()?;
        let ratio = self.config.critical_stock_ratio;

        let mut alerts: Vec<LowStockAlert> = self
            .store
            .stock_levels(today)?
            .into_iter()
            .filter(|level| level.drug.is_active() && level.usable < level.drug.reorder_threshold)
            .map(|level| {
                let threshold = level.drug.reorder_threshold;
                let severity = if (level.usable as f64) <= ratio * threshold as f64 {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                LowStockAlert {
                    drug_id: level.drug.id,
                    drug_name: level.drug.name,
                    on_hand: level.usable,
                    reorder_threshold: threshold,
                    deficit: threshold - level.usable,
                    severity,
                }
            })
            .collect();
        alerts.sort_by(|a, b| {
            b.deficit
                .cmp(&a.deficit)
                .then_with(|| a.drug_name.cmp(&b.drug_name))
                .then(a.drug_id.cmp(&b.drug_id))
        });
        Ok(alerts.into_iter())
    }

    /// Both alert lists for `today`.
    pub fn scan(&self, today: NaiveDate) -> AnalyticsResult<AlertReport> {
        let report = AlertReport {
            as_of: today,
            expiring: self.expiring(today)?.collect(),
            low_stock: self.low_stock(today)?.collect(),
        };
        tracing::debug!(
            %today,
            expiring = report.expiring.len(),
            low_stock = report.low_stock.len(),
            "alert scan finished"
        );
        Ok(report)
    }
}
