mod auth;
mod config;
mod database;
mod error;
mod flash;
mod handlers;
mod model;
mod neo4j;
mod seed;

use actix_identity::{config::LogoutBehaviour, IdentityMiddleware};
use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::{cookie::Key, middleware::Logger, web, App, HttpServer};
use clap::Parser;
use config::{Backend, Config, DatabaseConfig};
use database::MovieStore;
use log::{debug, error, info};
use std::path::PathBuf;
use std::sync::Arc;

const SESSION_COOKIE: &str = "horrorflix";

#[derive(Parser, Debug)]
#[command(name = "horrorflix", about = "Movie recommendations from a graph of likes")]
struct Args {
    /// TOML config file, horrorflix.toml when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fill an empty store with demo users and movies
    #[arg(long)]
    seed: bool,
}

fn log_error<E: std::fmt::Debug>(err: E, message: &'static str) -> actix_web::Error {
    debug!("{:?}", err);
    actix_web::error::ErrorInternalServerError(message)
}

fn session_middleware(key: Key) -> SessionMiddleware<CookieSessionStore> {
    SessionMiddleware::builder(CookieSessionStore::default(), key)
        .cookie_name(SESSION_COOKIE.to_owned())
        .cookie_secure(false)
        .build()
}

// Keeps the rest of the session alive so the logout flash survives.
fn identity_middleware() -> IdentityMiddleware {
    IdentityMiddleware::builder()
        .logout_behaviour(LogoutBehaviour::DeleteIdentityKeys)
        .build()
}

async fn open_store(config: &DatabaseConfig) -> error::Result<Arc<dyn MovieStore>> {
    let store: Arc<dyn MovieStore> = match config.backend {
        Backend::Neo4j => Arc::new(
            neo4j::Neo4jStore::connect(
                &config.neo4j_uri,
                &config.neo4j_user,
                &config.neo4j_password,
            )
            .await?,
        ),
        Backend::Sled => {
            let db = match &config.sled_path {
                Some(path) => sled::open(path)?,
                None => sled::Config::new().temporary(true).open()?,
            };
            Arc::new(db)
        }
    };
    Ok(store)
}

async fn run(args: Args) -> error::Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    if args.seed {
        config.database.seed = true;
    }

    let store = open_store(&config.database).await?;
    if config.database.seed {
        seed::seed_demo(store.as_ref(), config.server.bcrypt_cost).await?;
    }

    let tera = tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*"))?;
    let key = match &config.server.secret_key {
        Some(secret) => Key::from(secret.as_bytes()),
        None => Key::generate(),
    };

    let tera = web::Data::new(tera);
    let store = web::Data::from(store);
    let settings = web::Data::new(handlers::AuthSettings {
        bcrypt_cost: config.server.bcrypt_cost,
    });

    info!("listening on {}", config.server.bind);
    HttpServer::new(move || {
        App::new()
            .wrap(identity_middleware())
            .wrap(session_middleware(key.clone()))
            .wrap(Logger::default())
            .app_data(tera.clone())
            .app_data(store.clone())
            .app_data(settings.clone())
            .configure(handlers::configure)
    })
    .bind(&config.server.bind)?
    .run()
    .await?;
    Ok(())
}

#[actix_rt::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("horrorflix=info,actix_web=info"),
    )
    .init();

    if let Err(err) = run(Args::parse()).await {
        error!("{}", err);
        std::process::exit(1);
    }
}
