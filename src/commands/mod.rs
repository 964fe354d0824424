use clap::ValueEnum;

mod config_cmd;
mod mapping;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use mapping::MappingCommand;
pub use sync_cmd::SyncCommand;

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
