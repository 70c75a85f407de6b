use std::sync::Arc;

use clap::Parser;
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

use rolegraph::hierarchy::service::HierarchyService;
use rolegraph::{settings, storage, web};

#[derive(Parser, Debug)]
#[command(
    name = "rolegraph",
    version,
    about = "Role hierarchy and permission inheritance service"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database + migrations)
    let db = storage::init(&settings.database).await?;
    let store = Arc::new(storage::SqlStore::new(db));

    let service = Arc::new(
        HierarchyService::new(store).with_delete_policy(settings.hierarchy.on_delete),
    );

    // start web server
    web::serve(settings, service).await?;
    Ok(())
}
