use serde::Deserialize;
use sqlpump_pg::{ClientOptions, PgConfig};
use std::net::SocketAddr;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub connection: PgConfig,
    #[serde(default)]
    pub client: ClientOptions,
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    pub listen_addr: String,
}

impl Config {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("read config {path}: {err}"))?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.connection.validate()?;
        if self.client.request_capacity == 0 {
            return Err(anyhow::anyhow!("client.request_capacity must be non-zero"));
        }
        if let Some(metrics) = &self.metrics {
            if metrics.listen_addr.parse::<SocketAddr>().is_err() {
                return Err(anyhow::anyhow!(format!(
                    "metrics listen_addr {} is not a socket address",
                    metrics.listen_addr
                )));
            }
        }
        Ok(())
    }
}
