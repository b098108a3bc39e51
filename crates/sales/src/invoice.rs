use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use pharmacy_core::DomainError;

/// Invoice number grouping the lines of one sale transaction.
///
/// Generated numbers look like `INV-260117-003` (day in `YYMMDD`, then the
/// 1-based count of distinct invoices issued that day). Callers may also
/// supply their own non-empty invoice numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceNumber(String);

impl InvoiceNumber {
    /// Prefix shared by every generated invoice of `day`.
    pub fn day_prefix(day: NaiveDate) -> String {
        format!("INV-{}-", day.format("%y%m%d"))
    }

    /// The `seq`-th generated invoice of `day` (1-based).
    pub fn for_day(day: NaiveDate, seq: u32) -> Self {
        Self(format!("{}{seq:03}", Self::day_prefix(day)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for InvoiceNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DomainError::validation("invoice number cannot be empty"));
        }
        Ok(Self(s.to_string()))
    }
}
