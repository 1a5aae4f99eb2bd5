use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use directories::BaseDirs;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::compare::MatchOptions;
use crate::country::{self, CountryRule, DEFAULT_COUNTRY_RULE};
use crate::error::ValidationError;
use crate::format::{CardOptions, CardVersion, VersionPolicy};

const APP_NAME: &str = "abconv";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// File the settings came from, `None` for built-in defaults.
    pub config_path: Option<PathBuf>,
    pub card: CardConfig,
    pub phone: PhoneConfig,
    pub matching: MatchingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardConfig {
    /// Version for records whose own version is unknown.
    pub preferred_version: CardVersion,
    pub skip_time_from_date: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneConfig {
    /// Ordinal into the country rule table.
    pub country_rule: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchingConfig {
    pub legacy_name_rule: bool,
}

impl Default for Config {
    fn default() -> Self {
        ConfigFile::default().into_config(None)
    }
}

impl Config {
    pub fn card_options(&self, policy: VersionPolicy) -> CardOptions {
        CardOptions {
            policy,
            preferred_version: self.card.preferred_version,
            skip_time_from_date: self.card.skip_time_from_date,
        }
    }

    pub fn country_rule(&self) -> Result<CountryRule, ValidationError> {
        country::rule(self.phone.country_rule)
            .copied()
            .ok_or(ValidationError::UnknownCountryRule(self.phone.country_rule))
    }

    pub fn match_options(&self) -> Result<MatchOptions, ValidationError> {
        let mut opts = MatchOptions::new(self.country_rule()?);
        opts.legacy_name_rule = self.matching.legacy_name_rule;
        Ok(opts)
    }
}

// =============================================================================
// File representation
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    card: CardFile,
    phone: PhoneFile,
    matching: MatchingFile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct CardFile {
    preferred_version: String,
    skip_time_from_date: bool,
}

impl Default for CardFile {
    fn default() -> Self {
        Self {
            preferred_version: CardVersion::V21.as_str().to_string(),
            skip_time_from_date: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct PhoneFile {
    country_rule: usize,
}

impl Default for PhoneFile {
    fn default() -> Self {
        Self {
            country_rule: DEFAULT_COUNTRY_RULE,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct MatchingFile {
    legacy_name_rule: bool,
}

impl ConfigFile {
    fn into_config(self, config_path: Option<PathBuf>) -> Config {
        let preferred_version =
            CardVersion::parse(&self.card.preferred_version).unwrap_or_else(|| {
                warn!(
                    "unsupported card.preferred_version `{}`, using 2.1",
                    self.card.preferred_version
                );
                CardVersion::V21
            });
        Config {
            config_path,
            card: CardConfig {
                preferred_version,
                skip_time_from_date: self.card.skip_time_from_date,
            },
            phone: PhoneConfig {
                country_rule: self.phone.country_rule,
            },
            matching: MatchingConfig {
                legacy_name_rule: self.matching.legacy_name_rule,
            },
        }
    }
}

fn config_root() -> Result<PathBuf> {
    let base = BaseDirs::new().context("unable to determine base directories")?;
    Ok(base.config_dir().join(APP_NAME))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_root()?.join(CONFIG_FILE_NAME))
}

/// Load settings. An explicit path must exist; the default location is
/// optional and built-in defaults apply when it is absent.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("configuration file not found at {}", path.display());
            }
            path.to_path_buf()
        }
        None => match config_path() {
            Ok(path) if path.exists() => path,
            Ok(path) => {
                debug!(path = %path.display(), "no configuration file, using defaults");
                return Ok(Config::default());
            }
            Err(err) => {
                debug!("{err:#}, using default configuration");
                return Ok(Config::default());
            }
        },
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read configuration file at {}", path.display()))?;
    parse_config(&raw, Some(path))
}

/// Parse TOML settings; `origin` is recorded in the result and in errors.
pub fn parse_config(raw: &str, origin: Option<PathBuf>) -> Result<Config> {
    let shown = origin
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "configuration".to_string());

    let value: toml::Value =
        toml::from_str(raw).with_context(|| format!("failed to parse {shown} as TOML"))?;

    warn_unknown_keys(&value);

    let file: ConfigFile = value
        .try_into()
        .with_context(|| format!("failed to deserialize config from {shown}"))?;
    Ok(file.into_config(origin))
}

// =============================================================================
// Unknown key warnings
// =============================================================================

fn warn_unknown_keys(value: &toml::Value) {
    let Some(table) = value.as_table() else {
        return;
    };

    let known = HashSet::from(["card", "phone", "matching"]);
    for key in table.keys() {
        if !known.contains(key.as_str()) {
            warn!("unknown configuration key `{}`", key);
        }
    }

    if let Some(v) = table.get("card") {
        warn_unknown_in_section(v, "card", &["preferred_version", "skip_time_from_date"]);
    }
    if let Some(v) = table.get("phone") {
        warn_unknown_in_section(v, "phone", &["country_rule"]);
    }
    if let Some(v) = table.get("matching") {
        warn_unknown_in_section(v, "matching", &["legacy_name_rule"]);
    }
}

fn warn_unknown_in_section(value: &toml::Value, section: &str, known: &[&str]) {
    let Some(table) = value.as_table() else {
        return;
    };
    let known_set: HashSet<&str> = known.iter().copied().collect();
    for key in table.keys() {
        if !known_set.contains(key.as_str()) {
            warn!("unknown {}.* entry `{}`", section, key);
        }
    }
}
