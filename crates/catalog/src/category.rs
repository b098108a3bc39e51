use serde::{Deserialize, Serialize};

use pharmacy_core::{CategoryId, DomainError, DomainResult};

/// Therapeutic grouping of drugs (e.g. "Analgesics").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
}

impl Category {
    pub fn create(id: CategoryId, name: &str) -> DomainResult<Self> {
        Ok(Self {
            id,
            name: validate_name(name)?,
        })
    }

    pub fn renamed(&self, name: &str) -> DomainResult<Self> {
        Ok(Self {
            id: self.id,
            name: validate_name(name)?,
        })
    }
}

fn validate_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("category name cannot be empty"));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_trims_name() {
        let c = Category::create(CategoryId::new(), "  Antibiotics ").unwrap();
        assert_eq!(c.name, "Antibiotics");
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(Category::create(CategoryId::new(), "").is_err());
        let c = Category::create(CategoryId::new(), "Vitamins").unwrap();
        assert!(matches!(c.renamed("   "), Err(DomainError::Validation(_))));
    }
}
