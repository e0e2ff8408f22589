use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PgConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub application_name: Option<String>,
    /// Extra run-time parameters sent in the startup packet.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientOptions {
    /// Requests buffered between clients and the driver task.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_capacity: default_request_capacity(),
        }
    }
}

impl PgConfig {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: user.into(),
            password: None,
            database: None,
            application_name: None,
            options: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("connection host is empty"));
        }
        if self.port == 0 {
            return Err(anyhow::anyhow!("connection port must be non-zero"));
        }
        if self.user.is_empty() {
            return Err(anyhow::anyhow!("connection user is empty"));
        }
        for (key, value) in self.startup_params() {
            if key.contains('\0') || value.contains('\0') {
                return Err(anyhow::anyhow!(format!(
                    "startup parameter {key} contains a NUL byte"
                )));
            }
        }
        Ok(())
    }

    pub fn startup_params(&self) -> HashMap<String, String> {
        let mut params: HashMap<String, String> = self
            .options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        params.insert("user".into(), self.user.clone());
        if let Some(database) = &self.database {
            params.insert("database".into(), database.clone());
        }
        if let Some(name) = &self.application_name {
            params.insert("application_name".into(), name.clone());
        }
        params
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    5432
}

fn default_request_capacity() -> usize {
    128
}
