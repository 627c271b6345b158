//! Database connection management
//!
//! Connection pooling for the optional PostgreSQL mirror of the store.

pub mod repository;
pub mod schema;

pub use repository::ProposalRepository;

use crate::config::DatabaseConfig;
use crate::error::AppError;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tracing::info;

/// Create a pool from the configured DATABASE_URL and verify it answers
pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool, AppError> {
    let pg = config
        .url
        .parse::<tokio_postgres::Config>()
        .map_err(|e| AppError::Config(format!("Failed to parse DATABASE_URL: {}", e)))?;

    let host = match pg.get_hosts().first() {
        Some(tokio_postgres::config::Host::Tcp(h)) => h.clone(),
        Some(_) => {
            return Err(AppError::Config(
                "Unix socket connections are not supported".to_string(),
            ))
        }
        None => return Err(AppError::Config("No host in DATABASE_URL".to_string())),
    };

    let mut cfg = Config::new();
    cfg.host = Some(host);
    cfg.port = Some(pg.get_ports().first().copied().unwrap_or(5432));
    cfg.user = pg.get_user().map(str::to_string);
    cfg.password = pg
        .get_password()
        .map(|p| String::from_utf8_lossy(p).to_string());
    cfg.dbname = pg.get_dbname().map(str::to_string);
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_pool_size));

    let pool = if config.require_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);
        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| AppError::Config(format!("Failed to create TLS pool: {}", e)))?
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| AppError::Config(format!("Failed to create pool: {}", e)))?
    };

    // Test the connection
    let client = pool.get().await?;
    client.query_one("SELECT 1", &[]).await?;
    drop(client);

    info!(
        "Database connection established (host: {}, TLS: {})",
        config.host, config.require_tls
    );
    Ok(pool)
}
