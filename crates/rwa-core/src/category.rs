//! # Asset Categories
//!
//! Each registrable asset belongs to exactly one category, and each category
//! carries a fixed set of descriptive fields. Category data is descriptive
//! only: it never influences tokenization or settlement.

use serde::{Deserialize, Serialize};

use crate::error::RwaError;

/// The category of a real-world asset, with its category-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum AssetCategory {
    /// Land or buildings.
    RealEstate {
        /// Street address of the property.
        address: String,
        /// Floor area in square metres.
        area_sq_m: u32,
        /// Property kind ("residential", "commercial", ...).
        property_type: String,
    },
    /// Motor vehicles, vessels, aircraft.
    Vehicle {
        /// Manufacturer.
        make: String,
        /// Model name.
        model: String,
        /// Model year.
        year: u16,
        /// Vehicle identification number.
        vin: String,
    },
    /// Stored physical goods (metals, grain, ...).
    Commodity {
        /// Commodity kind ("gold", "coffee", ...).
        commodity_type: String,
        /// Stored quantity in `unit`.
        quantity: u64,
        /// Unit of measure ("oz", "kg", ...).
        unit: String,
        /// Vault or warehouse holding the goods.
        storage_location: String,
    },
    /// Equity in a private company.
    Company {
        /// Registered legal name.
        legal_name: String,
        /// Registry number.
        registration_number: String,
        /// Jurisdiction of incorporation.
        jurisdiction: String,
        /// Business sector.
        sector: String,
    },
    /// Anything else, described in free text.
    Other {
        /// What the asset is.
        description: String,
    },
}

impl AssetCategory {
    /// The category's wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RealEstate { .. } => "real_estate",
            Self::Vehicle { .. } => "vehicle",
            Self::Commodity { .. } => "commodity",
            Self::Company { .. } => "company",
            Self::Other { .. } => "other",
        }
    }

    /// Check that every required field is populated.
    pub fn validate(&self) -> Result<(), RwaError> {
        let required: Vec<(&str, &str)> = match self {
            Self::RealEstate {
                address,
                property_type,
                ..
            } => vec![("address", address), ("property_type", property_type)],
            Self::Vehicle {
                make, model, vin, ..
            } => vec![("make", make), ("model", model), ("vin", vin)],
            Self::Commodity {
                commodity_type,
                unit,
                storage_location,
                ..
            } => vec![
                ("commodity_type", commodity_type),
                ("unit", unit),
                ("storage_location", storage_location),
            ],
            Self::Company {
                legal_name,
                registration_number,
                jurisdiction,
                sector,
            } => vec![
                ("legal_name", legal_name),
                ("registration_number", registration_number),
                ("jurisdiction", jurisdiction),
                ("sector", sector),
            ],
            Self::Other { description } => vec![("description", description)],
        };

        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(RwaError::Validation(format!(
                "{} asset requires a non-empty {field}",
                self.name()
            )));
        }

        match self {
            Self::RealEstate { area_sq_m: 0, .. } => Err(RwaError::Validation(
                "real_estate asset requires a positive area_sq_m".into(),
            )),
            Self::Commodity { quantity: 0, .. } => Err(RwaError::Validation(
                "commodity asset requires a positive quantity".into(),
            )),
            Self::Vehicle { year, .. } if *year < 1886 => Err(RwaError::Validation(format!(
                "vehicle year {year} predates the automobile"
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn villa() -> AssetCategory {
        AssetCategory::RealEstate {
            address: "12 Harbour Road".into(),
            area_sq_m: 240,
            property_type: "residential".into(),
        }
    }

    #[test]
    fn test_tagged_serialization() {
        let json = serde_json::to_value(villa()).unwrap();
        assert_eq!(json["category"], "real_estate");
        assert_eq!(json["area_sq_m"], 240);
    }

    #[test]
    fn test_unknown_field_set_rejected_by_variant() {
        // A vehicle payload without a VIN does not deserialize.
        let json = serde_json::json!({
            "category": "vehicle", "make": "Volvo", "model": "P1800", "year": 1967
        });
        assert!(serde_json::from_value::<AssetCategory>(json).is_err());
    }

    #[test]
    fn test_validate_requires_fields() {
        assert!(villa().validate().is_ok());
        let blank = AssetCategory::Other {
            description: "   ".into(),
        };
        assert!(blank.validate().is_err());
        let no_area = AssetCategory::RealEstate {
            address: "x".into(),
            area_sq_m: 0,
            property_type: "land".into(),
        };
        assert!(no_area.validate().is_err());
    }
}
