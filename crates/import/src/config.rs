use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid parser configuration: {0}")]
    Invalid(String),
}

/// Locale and keyword tables for one parser instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParserConfig {
    pub country_code: String,
    pub trunk_digit: char,
    pub subscriber_digits: usize,
    pub mask_glyph: char,
    pub paybill_keywords: Vec<String>,
    pub switch_tags: Vec<String>,
    pub gateway_tags: Vec<String>,
    pub ussd_tags: Vec<String>,
    pub funds_transfer_tags: Vec<String>,
    pub name_blacklist: Vec<String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            country_code: "254".to_string(),
            trunk_digit: '0',
            subscriber_digits: 9,
            mask_glyph: '*',
            paybill_keywords: strings(&["PAYBILL", "PAY BILL"]),
            switch_tags: strings(&["MPS"]),
            gateway_tags: strings(&["APP"]),
            ussd_tags: strings(&["USSD"]),
            funds_transfer_tags: strings(&["EAZZY-FUNDS", "EAZZY FUNDS", "PESALINK"]),
            name_blacklist: strings(&[
                "MPS", "PAY", "BILL", "PAYBILL", "ONLINE", "FROM", "FRM", "TO", "BY", "ACC",
                "TRNSF", "TRANSFER", "FUNDS", "EAZZY", "APP", "USSD", "PESALINK", "TPG", "IMB",
                "MPESA", "KES", "REF", "DEPOSIT", "CASH", "AGENT",
            ]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl ParserConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let config: ParserConfig = toml::from_str(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.country_code.is_empty() || !self.country_code.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::Invalid(format!(
                "country_code must be digits, got '{}'",
                self.country_code
            )));
        }
        if !self.trunk_digit.is_ascii_digit() {
            return Err(ConfigError::Invalid("trunk_digit must be a digit".to_string()));
        }
        if self.mask_glyph.is_ascii_alphanumeric() {
            return Err(ConfigError::Invalid("mask_glyph cannot be alphanumeric".to_string()));
        }
        if self.subscriber_digits < 6 {
            return Err(ConfigError::Invalid("subscriber_digits is too small".to_string()));
        }
        Ok(())
    }

    pub fn is_blacklisted(&self, word: &str) -> bool {
        self.name_blacklist.iter().any(|b| b.eq_ignore_ascii_case(word))
    }
}
