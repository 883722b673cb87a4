pub mod command_parser;
pub mod command_registry;

pub use command_parser::{parse_intent, Intent};
pub use command_registry::CHAT_HELP_COMMANDS;
