use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pharmacy_core::{CategoryId, DomainError, DomainResult, DrugId, Money};

/// Drug status lifecycle.
///
/// Drugs are never hard-deleted: sales history keeps referring to them, so
/// retiring a drug only flips it to `Inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrugStatus {
    Active,
    Inactive,
}

impl DrugStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DrugStatus::Active => "active",
            DrugStatus::Inactive => "inactive",
        }
    }
}

impl core::str::FromStr for DrugStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(DrugStatus::Active),
            "inactive" => Ok(DrugStatus::Inactive),
            other => Err(DomainError::validation(format!("unknown drug status '{other}'"))),
        }
    }
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drug {
    pub id: DrugId,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub unit_price: Money,
    /// Aggregate on-hand quantity below which the drug is flagged low-stock.
    pub reorder_threshold: i64,
    pub supplier: Option<String>,
    pub status: DrugStatus,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a drug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDrug {
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub unit_price: Money,
    pub reorder_threshold: i64,
    pub supplier: Option<String>,
}

/// Partial update of a drug. `None` leaves a field unchanged; the nested
/// options on `category_id`/`supplier` allow clearing them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugUpdate {
    pub name: Option<String>,
    pub category_id: Option<Option<CategoryId>>,
    pub unit_price: Option<Money>,
    pub reorder_threshold: Option<i64>,
    pub supplier: Option<Option<String>>,
}

impl DrugUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category_id.is_none()
            && self.unit_price.is_none()
            && self.reorder_threshold.is_none()
            && self.supplier.is_none()
    }
}

impl Drug {
    /// Build a new active drug from validated input.
    pub fn create(id: DrugId, input: NewDrug, now: DateTime<Utc>) -> DomainResult<Self> {
        let name = validate_name(&input.name)?;
        validate_price(input.unit_price)?;
        validate_threshold(input.reorder_threshold)?;

        Ok(Self {
            id,
            name,
            category_id: input.category_id,
            unit_price: input.unit_price,
            reorder_threshold: input.reorder_threshold,
            supplier: normalize_supplier(input.supplier),
            status: DrugStatus::Active,
            created_at: now,
        })
    }

    /// Return the drug with `update` applied; `self` is left untouched.
    pub fn updated(&self, update: DrugUpdate) -> DomainResult<Self> {
        if update.is_empty() {
            return Err(DomainError::validation("update changes nothing"));
        }

        let mut next = self.clone();
        if let Some(name) = update.name {
            next.name = validate_name(&name)?;
        }
        if let Some(category_id) = update.category_id {
            next.category_id = category_id;
        }
        if let Some(price) = update.unit_price {
            validate_price(price)?;
            next.unit_price = price;
        }
        if let Some(threshold) = update.reorder_threshold {
            validate_threshold(threshold)?;
            next.reorder_threshold = threshold;
        }
        if let Some(supplier) = update.supplier {
            next.supplier = normalize_supplier(supplier);
        }
        Ok(next)
    }

    pub fn deactivated(&self) -> DomainResult<Self> {
        if self.status == DrugStatus::Inactive {
            return Err(DomainError::constraint(format!("drug '{}' is already inactive", self.name)));
        }
        Ok(Self {
            status: DrugStatus::Inactive,
            ..self.clone()
        })
    }

    pub fn reactivated(&self) -> DomainResult<Self> {
        if self.status == DrugStatus::Active {
            return Err(DomainError::constraint(format!("drug '{}' is already active", self.name)));
        }
        Ok(Self {
            status: DrugStatus::Active,
            ..self.clone()
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == DrugStatus::Active
    }

    /// Inactive drugs stay in the catalog for history but cannot be sold or restocked.
    pub fn ensure_active(&self) -> DomainResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DomainError::constraint(format!("drug '{}' is inactive", self.name)))
        }
    }

    /// Key used for case-insensitive name uniqueness.
    pub fn name_key(&self) -> String {
        name_key(&self.name)
    }
}

/// Case-insensitive uniqueness key for drug and category names.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn validate_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("drug name cannot be empty"));
    }
    Ok(name.to_string())
}

fn validate_price(price: Money) -> DomainResult<()> {
    if price.is_negative() {
        return Err(DomainError::constraint("unit price cannot be negative"));
    }
    if price > Money::MAX_UNIT {
        return Err(DomainError::validation(format!(
            "unit price {price} exceeds the maximum of {}",
            Money::MAX_UNIT
        )));
    }
    Ok(())
}

fn validate_threshold(threshold: i64) -> DomainResult<()> {
    if threshold < 0 {
        return Err(DomainError::constraint("reorder threshold cannot be negative"));
    }
    Ok(())
}

fn normalize_supplier(supplier: Option<String>) -> Option<String> {
    supplier
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_drug() -> NewDrug {
        NewDrug {
            name: "  Ibuprofen 200mg ".to_string(),
            category_id: None,
            unit_price: Money::from_cents(599),
            reorder_threshold: 20,
            supplier: Some("  ".to_string()),
        }
    }

    #[test]
    fn create_trims_name_and_drops_blank_supplier() {
        let drug = Drug::create(DrugId::new(), new_drug(), Utc::now()).unwrap();
        assert_eq!(drug.name, "Ibuprofen 200mg");
        assert_eq!(drug.supplier, None);
        assert!(drug.is_active());
    }

    #[test]
    fn create_rejects_empty_name() {
        let input = NewDrug {
            name: "   ".to_string(),
            ..new_drug()
        };
        let err = Drug::create(DrugId::new(), input, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_rejects_negative_price_and_threshold() {
        let input = NewDrug {
            unit_price: Money::from_cents(-1),
            ..new_drug()
        };
        assert!(matches!(
            Drug::create(DrugId::new(), input, Utc::now()),
            Err(DomainError::ConstraintViolation(_))
        ));

        let input = NewDrug {
            reorder_threshold: -5,
            ..new_drug()
        };
        assert!(matches!(
            Drug::create(DrugId::new(), input, Utc::now()),
            Err(DomainError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn price_above_limit_is_rejected() {
        let input = NewDrug {
            unit_price: Money::from_cents(Money::MAX_UNIT.cents() + 1),
            ..new_drug()
        };
        assert!(matches!(
            Drug::create(DrugId::new(), input, Utc::now()),
            Err(DomainError::Validation(_))
        ));

        let input = NewDrug {
            unit_price: Money::MAX_UNIT,
            ..new_drug()
        };
        assert!(Drug::create(DrugId::new(), input, Utc::now()).is_ok());
    }

    #[test]
    fn update_changes_only_given_fields() {
        let drug = Drug::create(DrugId::new(), new_drug(), Utc::now()).unwrap();
        let updated = drug
            .updated(DrugUpdate {
                unit_price: Some(Money::from_cents(649)),
                supplier: Some(Some("Supplier A".to_string())),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(updated.unit_price, Money::from_cents(649));
        assert_eq!(updated.supplier.as_deref(), Some("Supplier A"));
        assert_eq!(updated.name, drug.name);
        assert_eq!(updated.reorder_threshold, drug.reorder_threshold);
    }

    #[test]
    fn empty_update_is_rejected() {
        let drug = Drug::create(DrugId::new(), new_drug(), Utc::now()).unwrap();
        assert!(matches!(drug.updated(DrugUpdate::default()), Err(DomainError::Validation(_))));
    }

    #[test]
    fn deactivate_and_reactivate_round_trip() {
        let drug = Drug::create(DrugId::new(), new_drug(), Utc::now()).unwrap();
        let inactive = drug.deactivated().unwrap();
        assert!(!inactive.is_active());
        assert!(inactive.ensure_active().is_err());
        assert!(inactive.deactivated().is_err());

        let active = inactive.reactivated().unwrap();
        assert!(active.is_active());
        assert_eq!(active.id, drug.id);
    }

    #[test]
    fn name_key_is_case_insensitive() {
        assert_eq!(name_key(" Aspirin "), name_key("ASPIRIN"));
    }
}
