// src/main.rs

use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tiller::chat::persist::PersistenceCoordinator;
use tiller::chat::title::TitleGenerator;
use tiller::chat::ChatService;
use tiller::config::CONFIG;
use tiller::llm::ProviderRegistry;
use tiller::server;
use tiller::stream::{InMemoryStreamRegistry, PassthroughRegistry, StreamRegistry};
use tiller::tools::ToolSessionManager;

#[derive(Parser)]
#[command(name = "tiller")]
#[command(about = "Chat turn orchestrator with remote tools and resumable streams", long_about = None)]
struct Cli {
    /// Enable debug logging (overrides TILLER_LOG_LEVEL)
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging before anything touches the config
    if cli.debug {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        let filter = EnvFilter::try_new(&CONFIG.log_level)
            .unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting tiller");
    info!("Default model: {}", CONFIG.default_model);
    info!("Tool provider: {}", CONFIG.tool_provider_url);

    let db = if CONFIG.persistence_enabled {
        let options =
            SqliteConnectOptions::from_str(&CONFIG.database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(CONFIG.sqlite_max_connections)
            .connect_with(options)
            .await?;
        PersistenceCoordinator::init_schema(&pool).await?;
        info!("Database ready: {}", CONFIG.database_url);
        Some(pool)
    } else {
        info!("Persistence disabled, running ephemeral");
        None
    };

    let models = Arc::new(ProviderRegistry::from_config(&CONFIG));
    let (title_model, title_provider, _) = models.resolve(&CONFIG.title_model);
    let titles = TitleGenerator::new(title_provider, title_model);

    let streams: Arc<dyn StreamRegistry> = if CONFIG.resumable_streams {
        let registry = Arc::new(InMemoryStreamRegistry::new(CONFIG.stream_idle_timeout_secs));
        registry.spawn_sweeper();
        registry
    } else {
        info!("Resumable streams disabled, using pass-through delivery");
        Arc::new(PassthroughRegistry::new())
    };

    let chat = Arc::new(ChatService {
        models,
        tools: Arc::new(ToolSessionManager::from_config(&CONFIG)),
        streams,
        persistence: Arc::new(PersistenceCoordinator::new(db, titles)),
        max_steps: CONFIG.max_steps,
    });

    server::run(chat).await
}
