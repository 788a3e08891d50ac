use clap::Parser;
use shelfmark::auth::Authenticator;
use shelfmark::config::{Cli, Config, default_config_dir, default_config_path};
use shelfmark::db::Database;
use shelfmark::handler::AppState;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("shelfmark.svc starting");

    // --config puts data (the database) next to the config file,
    // otherwise both live under ~/.shelfmark/
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(error = %e, path = ?data_dir, "failed to create data directory");
        std::process::exit(1);
    }

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    let db = Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        std::process::exit(1);
    });
    let auth = Authenticator::new(&cfg.auth);

    if let Some(admin) = &cfg.auth.bootstrap_admin {
        if let Err(e) = auth.bootstrap_admin(&db, admin).await {
            tracing::error!(error = %shelfmark::unpack_error(&e), "failed to create bootstrap admin");
            std::process::exit(1);
        }
    }

    let state = AppState::new(db, auth);
    let app = shelfmark::app(state.clone());

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("shelfmark.svc running on {}", &address);
    if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }

    if let Err(e) = state.db.sync().await {
        tracing::warn!(error = %e, "final replica sync failed");
    }
    tracing::info!("shelfmark.svc going off, graceful shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl+c");
        std::future::pending::<()>().await;
    }
    tracing::info!("ctrl+c signal received, preparing to shutdown");
}
