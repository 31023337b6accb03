use chrono_tz::Tz;
use serde::Deserialize;
use std::{env, fs, path::Path};
use ticketbook_shared::auth::Role;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub jwt_secret: String,
    /// Prepended to refresh tokens before hashing.
    pub refresh_token_salt: String,
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: i64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_days: i64,
    #[serde(default = "default_pin_ttl")]
    pub pin_ttl_minutes: i64,
    #[serde(default = "default_pin_length")]
    pub pin_length: usize,
    #[serde(default = "default_milestone")]
    pub streak_milestone_days: u32,
    #[serde(default = "default_bonus")]
    pub streak_bonus_tickets: i32,
    /// IANA name; practice days are calendar days in this zone.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
    #[serde(default)]
    pub companies: Vec<CompanyConfig>,
    /// Bootstrap accounts, usually one admin per company.
    #[serde(default)]
    pub users: Vec<UserConfig>,
    pub dev_cors_origin: Option<String>,
    pub listen_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompanyConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub id: String,
    pub company_id: String,
    pub role: Role,
    pub email: String,
    pub password_hash: String, // bcrypt hash
    pub first_name: String,
    pub last_name: String,
}

fn default_access_ttl() -> i64 {
    3600
}
fn default_refresh_ttl() -> i64 {
    30
}
fn default_pin_ttl() -> i64 {
    10
}
fn default_pin_length() -> usize {
    6
}
fn default_milestone() -> u32 {
    7
}
fn default_bonus() -> i32 {
    10
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Timezone used for calendar-day arithmetic. Falls back to UTC if the
    /// name does not parse; `validate` rejects such configs on load.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |m: &str| Err(ConfigError::Invalid(m.to_string()));
        if self.jwt_secret.len() < 16 {
            return invalid("jwt_secret must be at least 16 characters");
        }
        if self.refresh_token_salt.is_empty() {
            return invalid("refresh_token_salt must not be empty");
        }
        if self.access_token_ttl_secs <= 0
            || self.refresh_token_ttl_days <= 0
            || self.pin_ttl_minutes <= 0
        {
            return invalid("token and pin lifetimes must be positive");
        }
        if !(4..=12).contains(&self.pin_length) {
            return invalid("pin_length must be between 4 and 12");
        }
        if self.streak_milestone_days == 0 || self.streak_bonus_tickets <= 0 {
            return invalid("streak milestone and bonus must be positive");
        }
        if self.timezone.parse::<Tz>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown timezone: {}",
                self.timezone
            )));
        }
        for u in &self.users {
            if !self.companies.iter().any(|c| c.id == u.company_id) {
                return Err(ConfigError::Invalid(format!(
                    "user {} references unknown company {}",
                    u.id, u.company_id
                )));
            }
            if !u.role.needs_password() {
                return Err(ConfigError::Invalid(format!(
                    "bootstrap user {} must be an admin or teacher",
                    u.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
jwt_secret: "0123456789abcdef0123"
refresh_token_salt: "pepper"
companies:
  - id: acme
    name: Acme Music
users:
  - id: admin-1
    company_id: acme
    role: admin
    email: admin@acme.test
    password_hash: "$2b$04$abcdefghijklmnopqrstuu"
    first_name: Ada
    last_name: Admin
"#;

    #[test]
    fn defaults_fill_in() {
        let cfg = AppConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(cfg.access_token_ttl_secs, 3600);
        assert_eq!(cfg.refresh_token_ttl_days, 30);
        assert_eq!(cfg.pin_ttl_minutes, 10);
        assert_eq!(cfg.pin_length, 6);
        assert_eq!(cfg.streak_milestone_days, 7);
        assert_eq!(cfg.streak_bonus_tickets, 10);
        assert_eq!(cfg.tz(), Tz::UTC);
    }

    #[test]
    fn rejects_unknown_timezone() {
        let text = format!("{MINIMAL}timezone: Mars/Olympus\n");
        assert!(matches!(
            AppConfig::from_yaml(&text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_user_of_unknown_company() {
        let text = MINIMAL.replace("company_id: acme", "company_id: nowhere");
        assert!(matches!(
            AppConfig::from_yaml(&text),
            Err(ConfigError::Invalid(_))
        ));
    }
}
