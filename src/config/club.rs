//! Club catalog configuration loading from config.toml
//!
//! The catalog file names the cashbox categories and charge concepts to seed on
//! startup, the cashbox category that receives dues income, and the years for
//! which monthly dues should exist.

use crate::entities::MovementKind;
use crate::errors::{Error, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

/// Category that receives mirrored dues income when the file does not name one.
pub const DEFAULT_DUES_CATEGORY: &str = "Membership Dues";

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Deserialize, Default)]
pub struct ClubConfig {
    /// Cashbox settings and categories to seed
    #[serde(default)]
    pub cashbox: CashboxConfig,
    /// Charge concepts to seed
    #[serde(default)]
    pub concepts: Vec<ConceptConfig>,
    /// Dues generation settings
    #[serde(default)]
    pub dues: DuesConfig,
}

/// Cashbox section of the configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CashboxConfig {
    /// Name of the income category used for mirrored payments
    #[serde(default = "default_dues_category")]
    pub dues_category: String,
    /// Description given to the dues category when it is created
    #[serde(default)]
    pub dues_category_description: Option<String>,
    /// Categories to create if missing
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
}

impl Default for CashboxConfig {
    fn default() -> Self {
        Self {
            dues_category: default_dues_category(),
            dues_category_description: None,
            categories: Vec::new(),
        }
    }
}

fn default_dues_category() -> String {
    DEFAULT_DUES_CATEGORY.to_string()
}

/// Configuration for a single cashbox category
#[derive(Debug, Deserialize, Clone)]
pub struct CategoryConfig {
    /// Category name
    pub name: String,
    /// Income or expense
    pub kind: MovementKind,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

/// Configuration for a single charge concept
#[derive(Debug, Deserialize, Clone)]
pub struct ConceptConfig {
    /// Concept name
    pub name: String,
    /// Suggested amount copied into its dues
    pub suggested_amount: Decimal,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Whether yearly generation includes this concept
    #[serde(default = "default_true")]
    pub active: bool,
}

const fn default_true() -> bool {
    true
}

/// Dues generation settings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DuesConfig {
    /// Years for which every active concept gets twelve monthly dues
    #[serde(default)]
    pub generate_years: Vec<i32>,
}

/// Loads the club configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - Required fields are missing
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ClubConfig> {
    let path_ref = path.as_ref();
    tracing::debug!("Loading club configuration from {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;

    parse_config(&contents)
}

/// Parses club configuration from TOML text.
pub fn parse_config(contents: &str) -> Result<ClubConfig> {
    toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads the configuration named by `CLUB_CONFIG`, or `./config.toml`.
///
/// A missing file is not an error: the ledger runs with an empty catalog.
pub fn load_default_config() -> Result<ClubConfig> {
    let path = std::env::var("CLUB_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    if Path::new(&path).exists() {
        load_config(&path)
    } else {
        tracing::warn!("No configuration file at {}, using defaults", path);
        Ok(ClubConfig::default())
    }
}
