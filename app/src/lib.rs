pub mod config;
pub mod render;
pub mod repl;

pub use config::{load_preferences, preferences_path, save_preferences, CliPreferences};
pub use render::{render_timeline, render_update, Output};
pub use repl::ReplCommand;
