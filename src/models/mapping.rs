use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::entity_type::EntityType;
use super::transform::{FieldType, Transform};

/// Which side(s) of a mapping receive writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    RemoteToLocal,
    LocalToRemote,
    Bidirectional,
}

impl SyncDirection {
    pub fn writes_local(&self) -> bool {
        matches!(self, SyncDirection::RemoteToLocal | SyncDirection::Bidirectional)
    }

    pub fn writes_remote(&self) -> bool {
        matches!(self, SyncDirection::LocalToRemote | SyncDirection::Bidirectional)
    }
}

/// How runs for a mapping are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Manual,
    Automatic,
    Scheduled,
}

/// Policy applied to records that differ on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    RemoteWins,
    LocalWins,
    LatestWins,
    ManualReview,
}

macro_rules! snake_enum_text {
    ($ty:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().replace('-', "_").as_str() {
                    $($text => Ok($ty::$variant),)+
                    _ => Err(format!(
                        "Invalid {} '{}'. Valid options: {}",
                        $label,
                        s,
                        [$($text),+].join(", ")
                    )),
                }
            }
        }
    };
}

snake_enum_text!(SyncDirection, "sync direction", {
    RemoteToLocal => "remote_to_local",
    LocalToRemote => "local_to_remote",
    Bidirectional => "bidirectional",
});

snake_enum_text!(SyncMode, "sync mode", {
    Manual => "manual",
    Automatic => "automatic",
    Scheduled => "scheduled",
});

snake_enum_text!(ConflictResolution, "conflict resolution", {
    RemoteWins => "remote_wins",
    LocalWins => "local_wins",
    LatestWins => "latest_wins",
    ManualReview => "manual_review",
});

/// One row of a mapping's field table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub remote_field: String,
    pub local_field: String,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub is_required: bool,
    /// Marks the field used to pair remote and local records.
    #[serde(default)]
    pub is_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
}

impl FieldMapping {
    pub fn new(remote_field: impl Into<String>, local_field: impl Into<String>) -> Self {
        Self {
            remote_field: remote_field.into(),
            local_field: local_field.into(),
            field_type: FieldType::String,
            is_required: false,
            is_key: false,
            transform: None,
        }
    }

    pub fn key(remote_field: impl Into<String>, local_field: impl Into<String>) -> Self {
        Self::new(remote_field, local_field).required().as_key()
    }

    pub fn with_type(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    fn as_key(mut self) -> Self {
        self.is_key = true;
        self
    }
}

/// Durable configuration for one synchronized entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMapping {
    pub entity_type: EntityType,
    pub remote_module: String,
    pub local_table: String,
    pub enabled: bool,
    pub sync_direction: SyncDirection,
    pub sync_mode: SyncMode,
    pub sync_frequency_minutes: u32,
    pub conflict_resolution: ConflictResolution,
    pub sync_images: bool,
    pub auto_create: bool,
    pub auto_update: bool,
    pub field_mappings: Vec<FieldMapping>,
    pub total_synced: i64,
    pub total_errors: i64,
    pub last_sync: Option<DateTime<Utc>>,
    /// Incremented on every accepted configuration update.
    pub version: i64,
}

impl EntityMapping {
    pub fn new(
        entity_type: EntityType,
        remote_module: impl Into<String>,
        local_table: impl Into<String>,
        field_mappings: Vec<FieldMapping>,
    ) -> Self {
        Self {
            entity_type,
            remote_module: remote_module.into(),
            local_table: local_table.into(),
            enabled: true,
            sync_direction: SyncDirection::RemoteToLocal,
            sync_mode: SyncMode::Manual,
            sync_frequency_minutes: 60,
            conflict_resolution: ConflictResolution::RemoteWins,
            sync_images: false,
            auto_create: true,
            auto_update: true,
            field_mappings,
            total_synced: 0,
            total_errors: 0,
            last_sync: None,
            version: 1,
        }
    }

    /// The mapping shipped for each entity type before an operator edits it.
    pub fn default_for(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Item => Self::new(
                entity_type,
                "items",
                "items",
                vec![
                    FieldMapping::key("item_id", "remote_id"),
                    FieldMapping::new("name", "name").required(),
                    FieldMapping::new("sku", "sku").with_transform(Transform::Trim),
                    FieldMapping::new("rate", "price").with_type(FieldType::Decimal),
                    FieldMapping::new("description", "description"),
                    FieldMapping::new("stock_on_hand", "quantity").with_type(FieldType::Decimal),
                    FieldMapping::new("status", "status"),
                ],
            ),
            EntityType::Customer => Self::new(
                entity_type,
                "contacts",
                "customers",
                vec![
                    FieldMapping::key("contact_id", "remote_id"),
                    FieldMapping::new("contact_name", "name").required(),
                    FieldMapping::new("company_name", "company"),
                    FieldMapping::new("email", "email").with_transform(Transform::Lowercase),
                    FieldMapping::new("phone", "phone"),
                    FieldMapping::new("outstanding_receivable_amount", "balance")
                        .with_type(FieldType::Decimal),
                ],
            ),
            EntityType::Vendor => Self::new(
                entity_type,
                "vendors",
                "vendors",
                vec![
                    FieldMapping::key("contact_id", "remote_id"),
                    FieldMapping::new("contact_name", "name").required(),
                    FieldMapping::new("company_name", "company"),
                    FieldMapping::new("email", "email").with_transform(Transform::Lowercase),
                    FieldMapping::new("phone", "phone"),
                    FieldMapping::new("outstanding_payable_amount", "balance")
                        .with_type(FieldType::Decimal),
                ],
            ),
        }
    }

    /// The field mapping flagged as the identity key.
    pub fn key_field(&self) -> Option<&FieldMapping> {
        self.field_mappings.iter().find(|f| f.is_key)
    }

    /// Checks the invariants every stored mapping must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.remote_module.trim().is_empty() {
            return Err("remote_module must not be empty".to_string());
        }
        if self.local_table.trim().is_empty() {
            return Err("local_table must not be empty".to_string());
        }
        if self.sync_mode == SyncMode::Scheduled && self.sync_frequency_minutes == 0 {
            return Err(
                "sync_frequency_minutes must be greater than 0 for scheduled mappings".to_string(),
            );
        }
        if self.field_mappings.is_empty() {
            return Err("field_mappings must not be empty".to_string());
        }
        if self.key_field().is_none() {
            return Err("field_mappings must contain a mapping flagged as the identity key".to_string());
        }

        let mut local_fields = HashSet::new();
        for field in &self.field_mappings {
            if field.remote_field.trim().is_empty() || field.local_field.trim().is_empty() {
                return Err("field mapping names must not be empty".to_string());
            }
            if !local_fields.insert(field.local_field.as_str()) {
                return Err(format!(
                    "local field '{}' is mapped more than once",
                    field.local_field
                ));
            }
        }
        Ok(())
    }

    /// Returns a copy with every present field of `update` replaced.
    pub fn merged(&self, update: &MappingUpdate) -> Self {
        let mut next = self.clone();
        if let Some(v) = &update.remote_module {
            next.remote_module = v.clone();
        }
        if let Some(v) = &update.local_table {
            next.local_table = v.clone();
        }
        if let Some(v) = update.enabled {
            next.enabled = v;
        }
        if let Some(v) = update.sync_direction {
            next.sync_direction = v;
        }
        if let Some(v) = update.sync_mode {
            next.sync_mode = v;
        }
        if let Some(v) = update.sync_frequency_minutes {
            next.sync_frequency_minutes = v;
        }
        if let Some(v) = update.conflict_resolution {
            next.conflict_resolution = v;
        }
        if let Some(v) = update.sync_images {
            next.sync_images = v;
        }
        if let Some(v) = update.auto_create {
            next.auto_create = v;
        }
        if let Some(v) = update.auto_update {
            next.auto_update = v;
        }
        if let Some(v) = &update.field_mappings {
            next.field_mappings = v.clone();
        }
        next
    }
}

impl fmt::Display for EntityMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = format!("{} mapping", self.entity_type);
        writeln!(f, "{}", title)?;
        writeln!(f, "{}", "=".repeat(title.len()))?;
        writeln!(f, "Remote module:  {}", self.remote_module)?;
        writeln!(f, "Local table:    {}", self.local_table)?;
        writeln!(f, "Enabled:        {}", self.enabled)?;
        writeln!(f, "Direction:      {}", self.sync_direction)?;
        write!(f, "Mode:           {}", self.sync_mode)?;
        if self.sync_mode == SyncMode::Scheduled {
            write!(f, " (every {} min)", self.sync_frequency_minutes)?;
        }
        writeln!(f)?;
        writeln!(f, "Conflicts:      {}", self.conflict_resolution)?;
        writeln!(
            f,
            "Auto create:    {}  Auto update: {}  Images: {}",
            self.auto_create, self.auto_update, self.sync_images
        )?;
        writeln!(
            f,
            "Totals:         {} synced, {} errors",
            self.total_synced, self.total_errors
        )?;
        match self.last_sync {
            Some(ts) => writeln!(f, "Last sync:      {}", ts.to_rfc3339())?,
            None => writeln!(f, "Last sync:      never")?,
        }

        writeln!(f, "\nFields:")?;
        for field in &self.field_mappings {
            let mut flags = Vec::new();
            if field.is_key {
                flags.push("key".to_string());
            }
            if field.is_required {
                flags.push("required".to_string());
            }
            if let Some(t) = field.transform {
                flags.push(t.to_string());
            }
            writeln!(
                f,
                "  {} -> {} ({}){}",
                field.remote_field,
                field.local_field,
                field.field_type,
                if flags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", flags.join(", "))
                }
            )?;
        }
        Ok(())
    }
}

/// A partial configuration edit. Absent fields are left unchanged.
///
/// Counters, `last_sync` and `version` are owned by the engine and cannot be
/// set through an update; unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_direction: Option<SyncDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_mode: Option<SyncMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_frequency_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_resolution: Option<ConflictResolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_images: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_create: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_update: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_mappings: Option<Vec<FieldMapping>>,
}

impl MappingUpdate {
    /// Parses a JSON body, turning enum or shape errors into a readable message.
    pub fn from_json(value: serde_json::Value) -> Result<Self, String> {
        serde_json::from_value(value).map_err(|e| format!("Invalid mapping update: {}", e))
    }

    pub fn is_empty(&self) -> bool {
        *self == MappingUpdate::default()
    }
}
