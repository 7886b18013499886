/// Database configuration and connection management
pub mod database;

/// Club catalog configuration loading from config.toml
pub mod club;
