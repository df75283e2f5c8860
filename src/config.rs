use std::env;

use crate::fetch::DEFAULT_USER_AGENT;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub geo_timeout_secs: u64,
    pub geo_user_agent: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, env::VarError> {
        Self::from_vars(|key| env::var(key))
    }

    /// Build the config from any variable source; `from_env` passes the process environment.
    pub fn from_vars<F>(var: F) -> Result<Self, env::VarError>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let database_url = match var("DATABASE_URL").ok().filter(|s| !s.is_empty()) {
            Some(url) => url,
            None => database_url_from_parts(
                &var("DB_USER")?,
                &var("DB_PASSWORD")?,
                &var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
                &var("DB_PORT").unwrap_or_else(|_| "5432".to_string()),
                &var("DB_NAME")?,
            ),
        };

        Ok(Self {
            database_url,
            host: var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            geo_timeout_secs: var("GEO_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            geo_user_agent: var("GEO_USER_AGENT")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        })
    }
}

/// Assemble a Postgres URL, percent-encoding the password.
pub fn database_url_from_parts(
    user: &str,
    password: &str,
    host: &str,
    port: &str,
    name: &str,
) -> String {
    let password = urlencoding::encode(password);
    format!("postgresql://{user}:{password}@{host}:{port}/{name}")
}
