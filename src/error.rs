use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),

    #[error("record encoding: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("neo4j: {0}")]
    Neo4j(#[from] neo4rs::Error),

    #[error("neo4j row: {0}")]
    Row(#[from] neo4rs::DeError),

    #[error("password hashing: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),

    #[error("corrupt record: {0}")]
    Corrupt(&'static str),

    #[error("config: {0}")]
    Config(String),

    #[error("config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("templates: {0}")]
    Template(#[from] tera::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
