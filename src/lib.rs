pub mod commands;
pub mod config;
pub mod data;
pub mod discord;
pub mod handlers;
pub mod logging;
pub mod relocation;

pub const COMMAND_TARGET: &str = "reloc::command";
pub const ERROR_TARGET: &str = "reloc::error";
pub const EVENT_TARGET: &str = "reloc::handlers";
pub const RELOCATION_TARGET: &str = "reloc::relocation";
pub const CONSOLE_TARGET: &str = "reloc";

pub use config::BotConfig;
pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
