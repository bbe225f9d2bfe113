use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// How often the fulfillment sweeper wakes up.
    pub sweep_interval: Duration,
    /// How long an order must stay shipped before it becomes ready for pickup.
    pub shipped_dwell: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let sweep_interval = secs_env("SWEEP_INTERVAL_SECS", 20);
        let shipped_dwell = secs_env("SHIPPED_DWELL_SECS", 20);
        Ok(Self {
            port,
            database_url,
            host,
            sweep_interval,
            shipped_dwell,
        })
    }
}

fn secs_env(name: &str, default: u64) -> Duration {
    let secs = env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}
