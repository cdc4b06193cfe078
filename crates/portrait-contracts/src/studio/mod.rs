mod command_parser;
mod command_registry;

pub use command_parser::{parse_command, StudioCommand, VersionRef};
pub use command_registry::help_lines;
