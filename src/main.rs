use clap::Parser;
use gatehouse::rbac::catalog::Catalog;
use gatehouse::rbac::Gatehouse;
use gatehouse::{jobs, settings, storage, web};
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "gatehouse",
    version,
    about = "Role-based access control authority with an audit ledger"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Sync the permission catalog and exit without serving
    #[arg(long)]
    sync_only: bool,
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

    // init storage (database)
    let db = storage::init(&settings.database).await?;
    storage::migrate(&db).await?;

    let gatehouse = Gatehouse::new(db, settings.rbac.options());

    // permission catalog and seed grants
    let catalog = match &settings.rbac.catalog_path {
        Some(path) => Catalog::load(path)?,
        None => Catalog::builtin()?,
    };
    catalog.sync(gatehouse.coordinator()).await?;

    if cli.sync_only {
        return Ok(());
    }

    // background jobs; keep the scheduler alive for the life of the server
    let _scheduler = if settings.jobs.enabled {
        Some(jobs::init_scheduler(gatehouse.clone(), &settings.jobs.reconcile_schedule).await?)
    } else {
        None
    };

    web::serve(&settings, gatehouse).await?;
    Ok(())
}
