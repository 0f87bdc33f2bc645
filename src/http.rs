use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!("relister-api/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            connect_timeout_secs: 5,
        }
    }
}

impl HttpSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout_secs: env_u64("HTTP_TIMEOUT_SECS").unwrap_or(defaults.timeout_secs),
            connect_timeout_secs: env_u64("HTTP_CONNECT_TIMEOUT_SECS")
                .unwrap_or(defaults.connect_timeout_secs),
        }
    }
}

pub fn build_client(settings: &HttpSettings) -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(settings.timeout_secs))
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}
