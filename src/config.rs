use crate::error::{Error, Result};
use log::{info, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "horrorflix.toml";

// bcrypt accepts costs 4 through 31.
const BCRYPT_COSTS: std::ops::RangeInclusive<u32> = 4..=31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Neo4j,
    Sled,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Signs the session cookie. At least 64 bytes; a random key is used
    /// when absent, which logs everyone out on restart.
    pub secret_key: Option<String>,
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: Backend,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    /// sled directory; a temporary database when absent.
    pub sled_path: Option<PathBuf>,
    /// Fill a store without an `admin` user with demo users, movies and likes.
    pub seed: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_owned(),
            secret_key: None,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Neo4j,
            neo4j_uri: "localhost:7687".to_owned(),
            neo4j_user: "neo4j".to_owned(),
            neo4j_password: "neo4j".to_owned(),
            sled_path: None,
            seed: false,
        }
    }
}

impl Config {
    /// Reads the TOML file, then applies environment overrides. A missing file
    /// is only an error when it was asked for explicitly.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        info!("loading config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, var: F) -> Result<()> {
        if let Some(bind) = var("HORRORFLIX_BIND") {
            self.server.bind = bind;
        }
        if let Some(secret_key) = var("HORRORFLIX_SECRET_KEY") {
            self.server.secret_key = Some(secret_key);
        }
        if let Some(backend) = var("HORRORFLIX_BACKEND") {
            self.database.backend = match backend.to_lowercase().as_str() {
                "neo4j" => Backend::Neo4j,
                "sled" => Backend::Sled,
                other => return Err(Error::Config(format!("unknown backend {:?}", other))),
            };
        }
        if let Some(uri) = var("NEO4J_URI") {
            self.database.neo4j_uri = uri;
        }
        if let Some(user) = var("NEO4J_USER") {
            self.database.neo4j_user = user;
        }
        if let Some(password) = var("NEO4J_PASSWORD") {
            self.database.neo4j_password = password;
        }
        if let Some(path) = var("HORRORFLIX_SLED_PATH") {
            self.database.sled_path = Some(PathBuf::from(path));
        }
        if let Some(seed) = var("HORRORFLIX_SEED") {
            self.database.seed = matches!(seed.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        match &self.server.secret_key {
            Some(key) if key.len() < 64 => Err(Error::Config(
                "secret_key must be at least 64 bytes".to_owned(),
            )),
            Some(_) => Ok(()),
            None => {
                warn!("no secret_key configured, sessions will not survive a restart");
                Ok(())
            }
        }?;
        if !BCRYPT_COSTS.contains(&self.server.bcrypt_cost) {
            return Err(Error::Config(format!(
                "bcrypt_cost must be between {} and {}",
                BCRYPT_COSTS.start(),
                BCRYPT_COSTS.end()
            )));
        }
        Ok(())
    }
}
