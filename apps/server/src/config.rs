//! Environment-driven runtime configuration.

use chrono_tz::Tz;
use hearth_weather::GeographicLocation;

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(name: &str) -> bool {
    env_var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub timezone: Tz,
    pub location: Option<GeographicLocation>,
    /// Monitors are registered but not started (tests/dev).
    pub suppress_monitors: bool,
    /// Accepted for the presentation layer's benefit; the core ignores it.
    pub suppress_authentication: bool,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            env_var("HEARTH_DATABASE_URL").unwrap_or_else(|| "hearth.db".to_string());

        let timezone: Tz = match env_var("HEARTH_TIMEZONE") {
            Some(name) => name
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid HEARTH_TIMEZONE '{name}': {e}"))?,
            None => chrono_tz::UTC,
        };

        let location = match (env_var("HEARTH_LATITUDE"), env_var("HEARTH_LONGITUDE")) {
            (Some(lat), Some(lng)) => Some(GeographicLocation {
                latitude: lat
                    .parse()
                    .map_err(|e| anyhow::anyhow!("Invalid HEARTH_LATITUDE '{lat}': {e}"))?,
                longitude: lng
                    .parse()
                    .map_err(|e| anyhow::anyhow!("Invalid HEARTH_LONGITUDE '{lng}': {e}"))?,
                elevation_m: None,
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            timezone,
            location,
            suppress_monitors: env_flag("HEARTH_SUPPRESS_MONITORS"),
            suppress_authentication: env_flag("HEARTH_SUPPRESS_AUTHENTICATION"),
        })
    }
}
