// config.rs
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub port: u16,
    pub db_max_connections: u32,
    pub apply_migrations: bool,
    pub seed_on_startup: bool,
    pub link_base_url: String,
    pub campaign_id: String,
    pub log_level: String,
    pub allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: None,
            port: 8000,
            db_max_connections: 10,
            apply_migrations: true,
            seed_on_startup: false,
            link_base_url: "https://cartoncaps.link".to_string(),
            campaign_id: "fall-2024".to_string(),
            log_level: "debug".to_string(),
            allowed_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

impl Config {
    pub fn init() -> Config {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Config
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        let port = lookup("PORT")
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(defaults.port);
        let db_max_connections = lookup("DB_MAX_CONNECTIONS")
            .and_then(|max| max.parse::<u32>().ok())
            .filter(|max| *max > 0)
            .unwrap_or(defaults.db_max_connections);
        let apply_migrations = lookup("APPLY_MIGRATIONS")
            .and_then(|flag| parse_flag(&flag))
            .unwrap_or(defaults.apply_migrations);
        let seed_on_startup = lookup("SEED_ON_STARTUP")
            .and_then(|flag| parse_flag(&flag))
            .unwrap_or(defaults.seed_on_startup);

        let link_base_url = lookup("LINK_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.link_base_url);
        let campaign_id = lookup("CAMPAIGN_ID").unwrap_or(defaults.campaign_id);
        let log_level = lookup("LOG_LEVEL").unwrap_or(defaults.log_level);

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.allowed_origins);

        Config {
            database_url,
            port,
            db_max_connections,
            apply_migrations,
            seed_on_startup,
            link_base_url,
            campaign_id,
            log_level,
            allowed_origins,
        }
    }

    pub fn level_filter(&self) -> LevelFilter {
        self.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::DEBUG)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = config_from(&[]);
        assert!(config.database_url.is_none());
        assert_eq!(config.port, 8000);
        assert_eq!(config.db_max_connections, 10);
        assert!(config.apply_migrations);
        assert!(!config.seed_on_startup);
        assert_eq!(config.link_base_url, "https://cartoncaps.link");
        assert_eq!(config.campaign_id, "fall-2024");
        assert_eq!(config.level_filter(), LevelFilter::DEBUG);
        assert_eq!(config.allowed_origins, vec!["http://localhost:5173".to_string()]);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/referrals"),
            ("PORT", "9090"),
            ("APPLY_MIGRATIONS", "false"),
            ("SEED_ON_STARTUP", "yes"),
            ("LINK_BASE_URL", "https://example.test/"),
            ("LOG_LEVEL", "warn"),
            ("ALLOWED_ORIGINS", "https://a.test, https://b.test,"),
        ]);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/referrals"));
        assert_eq!(config.port, 9090);
        assert!(!config.apply_migrations);
        assert!(config.seed_on_startup);
        assert_eq!(config.link_base_url, "https://example.test");
        assert_eq!(config.level_filter(), LevelFilter::WARN);
        assert_eq!(config.allowed_origins, vec!["https://a.test", "https://b.test"]);
    }

    #[test]
    fn malformed_values_fall_back() {
        let config = config_from(&[
            ("DATABASE_URL", "  "),
            ("PORT", "eighty"),
            ("DB_MAX_CONNECTIONS", "0"),
            ("APPLY_MIGRATIONS", "maybe"),
        ]);
        assert!(config.database_url.is_none());
        assert_eq!(config.port, 8000);
        assert_eq!(config.db_max_connections, 10);
        assert!(config.apply_migrations);
    }
}
