//! File locations for configuration, persistent state, and rendered output.

pub const SETTINGS_FILE: &str = "settings.toml";
pub const DATA_DIR: &str = "data";
pub const STORE_FILE: &str = "speed.series";
