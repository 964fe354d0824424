use clap::{Args, Subcommand};

use super::OutputFormat;
use erp_bridge::models::{
    ConflictResolution, EntityType, MappingUpdate, SyncDirection, SyncMode,
};
use erp_bridge::sync::MappingRegistry;

#[derive(Args)]
pub struct MappingCommand {
    #[command(subcommand)]
    pub command: MappingSubcommand,
}

#[derive(Subcommand)]
pub enum MappingSubcommand {
    /// List every entity mapping
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one mapping with its field table
    Show {
        /// Entity type (item, customer, vendor)
        entity: EntityType,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Change a mapping's settings
    Set {
        /// Entity type (item, customer, vendor)
        entity: EntityType,

        #[command(flatten)]
        settings: MappingSettings,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Args, Default)]
pub struct MappingSettings {
    /// Enable or disable the mapping
    #[arg(long)]
    enabled: Option<bool>,

    /// remote_to_local, local_to_remote or bidirectional
    #[arg(long)]
    direction: Option<SyncDirection>,

    /// manual, automatic or scheduled
    #[arg(long)]
    mode: Option<SyncMode>,

    /// Minutes between scheduled runs
    #[arg(long)]
    frequency: Option<u32>,

    /// remote_wins, local_wins, latest_wins or manual_review
    #[arg(long)]
    conflict: Option<ConflictResolution>,

    /// Download record images
    #[arg(long)]
    images: Option<bool>,

    /// Create records missing on the target side
    #[arg(long)]
    auto_create: Option<bool>,

    /// Overwrite records that differ on the target side
    #[arg(long)]
    auto_update: Option<bool>,
}

impl MappingSettings {
    fn to_update(&self) -> MappingUpdate {
        MappingUpdate {
            enabled: self.enabled,
            sync_direction: self.direction,
            sync_mode: self.mode,
            sync_frequency_minutes: self.frequency,
            conflict_resolution: self.conflict,
            sync_images: self.images,
            auto_create: self.auto_create,
            auto_update: self.auto_update,
            ..Default::default()
        }
    }
}

impl MappingCommand {
    pub async fn run(&self, registry: &MappingRegistry) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            MappingSubcommand::List { format } => {
                let mappings = registry.list().await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&mappings)?);
                    }
                    OutputFormat::Text => {
                        println!(
                            "{:<10} {:<10} {:<16} {:<10} {:<14} {}",
                            "ENTITY", "ENABLED", "DIRECTION", "MODE", "CONFLICTS", "LAST SYNC"
                        );
                        for m in &mappings {
                            println!(
                                "{:<10} {:<10} {:<16} {:<10} {:<14} {}",
                                m.entity_type.as_str(),
                                if m.enabled { "yes" } else { "no" },
                                m.sync_direction.as_str(),
                                m.sync_mode.as_str(),
                                m.conflict_resolution.as_str(),
                                m.last_sync
                                    .map(|ts| ts.to_rfc3339())
                                    .unwrap_or_else(|| "never".to_string())
                            );
                        }
                    }
                }
            }
            MappingSubcommand::Show { entity, format } => {
                let mapping = registry.get(*entity).await?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&mapping)?),
                    OutputFormat::Text => print!("{}", mapping),
                }
            }
            MappingSubcommand::Set {
                entity,
                settings,
                format,
            } => {
                let mapping = registry.update(*entity, &settings.to_update()).await?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&mapping)?),
                    OutputFormat::Text => {
                        println!("Updated {} mapping (version {})\n", entity, mapping.version);
                        print!("{}", mapping);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: MappingSubcommand,
    }

    #[test]
    fn test_set_flags_build_update() {
        let cli = TestCli::parse_from([
            "test",
            "set",
            "Items",
            "--enabled",
            "false",
            "--direction",
            "bidirectional",
            "--mode",
            "scheduled",
            "--frequency",
            "30",
            "--conflict",
            "latest-wins",
        ]);
        let MappingSubcommand::Set {
            entity, settings, ..
        } = cli.command
        else {
            panic!("expected set");
        };

        assert_eq!(entity, EntityType::Item);
        let update = settings.to_update();
        assert_eq!(update.enabled, Some(false));
        assert_eq!(update.sync_direction, Some(SyncDirection::Bidirectional));
        assert_eq!(update.sync_mode, Some(SyncMode::Scheduled));
        assert_eq!(update.sync_frequency_minutes, Some(30));
        assert_eq!(update.conflict_resolution, Some(ConflictResolution::LatestWins));
        assert_eq!(update.auto_create, None);
    }

    #[test]
    fn test_set_without_flags_is_empty() {
        let cli = TestCli::parse_from(["test", "set", "vendor"]);
        let MappingSubcommand::Set { settings, .. } = cli.command else {
            panic!("expected set");
        };
        assert!(settings.to_update().is_empty());
    }

    #[test]
    fn test_rejects_unknown_entity() {
        assert!(TestCli::try_parse_from(["test", "show", "widgets"]).is_err());
    }
}
