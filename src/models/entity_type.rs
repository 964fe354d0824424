use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Business object classes kept in sync with the remote platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Item,
    Customer,
    Vendor,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Item, EntityType::Customer, EntityType::Vendor];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Item => "item",
            EntityType::Customer => "customer",
            EntityType::Vendor => "vendor",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "item" | "items" => Ok(EntityType::Item),
            "customer" | "customers" => Ok(EntityType::Customer),
            "vendor" | "vendors" => Ok(EntityType::Vendor),
            _ => Err(format!(
                "Invalid entity type '{}'. Valid options: item, customer, vendor",
                s
            )),
        }
    }
}
