use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use dispatch_agents::config::DispatchConfig;
use dispatch_agents::embeddings::load_index;
use dispatch_agents::{
    FileCatalog, HttpEmbeddingProvider, JsonlCostStore, OpenAiChatProvider, YandexGptProvider,
};
use funnel::{
    CostLedger, CostQuery, DialogMemory, FunnelConfig, FunnelCoordinator, LlmProvider,
    TurnOutcome, TurnRequest,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dispatch-agents", about = "Classify municipal-service requests")]
struct Cli {
    /// Funnel TOML config (overrides DISPATCH_FUNNEL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process one message and print the decision as JSON
    Turn {
        #[arg(long)]
        conversation: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: Option<String>,
        text: String,
    },
    /// Read messages from stdin, one per line, for a single conversation
    Chat {
        #[arg(long)]
        conversation: String,
        #[arg(long)]
        user: String,
    },
    /// Print a cost summary for a date range (UTC, end inclusive)
    Costs {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        stage: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let dispatch = DispatchConfig::from_env();
    let config_path = cli.config.clone().or_else(|| dispatch.funnel_config.clone());
    let funnel_config =
        FunnelConfig::load(config_path.as_deref()).context("Failed to load funnel config")?;

    let store = JsonlCostStore::open(&dispatch.cost_log)
        .with_context(|| format!("Failed to open cost log {}", dispatch.cost_log.display()))?;
    let ledger = CostLedger::new(Arc::new(store), funnel_config.pricing.clone());

    match cli.command {
        Command::Turn {
            conversation,
            user,
            name,
            text,
        } => {
            let coordinator = build_coordinator(&dispatch, funnel_config, ledger)?;
            let mut request = TurnRequest::new(&conversation, &user, &text);
            if let Some(name) = name.as_deref() {
                request = request.with_user_name(name);
            }
            let outcome = coordinator
                .process_turn(&request)
                .await
                .context("Turn processing failed")?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Chat { conversation, user } => {
            let coordinator = build_coordinator(&dispatch, funnel_config, ledger)?;
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                let request = TurnRequest::new(&conversation, &user, &line);
                match coordinator.process_turn(&request).await {
                    Ok(outcome) => println!("{}", describe(&outcome)),
                    Err(e) if e.is_retriable() => warn!("Turn failed, try again: {e}"),
                    Err(e) => return Err(e).context("Turn processing failed"),
                }
            }
        }
        Command::Costs {
            from,
            to,
            user,
            provider,
            stage,
        } => {
            let start = Utc.from_utc_datetime(&from.and_time(Default::default()));
            let end_day = to.succ_opt().context("End date out of range")?;
            let end = Utc.from_utc_datetime(&end_day.and_time(Default::default()));
            let mut query = CostQuery::between(start, end);
            if let Some(user) = user.as_deref() {
                query = query.for_user(user);
            }
            if let Some(provider) = provider.as_deref() {
                query = query.for_provider(provider);
            }
            if let Some(stage) = stage.as_deref() {
                query = query.for_stage(stage);
            }
            let summary = ledger.summary(&query).context("Failed to read cost log")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn build_coordinator(
    dispatch: &DispatchConfig,
    config: FunnelConfig,
    ledger: CostLedger,
) -> Result<FunnelCoordinator> {
    let catalog = Arc::new(FileCatalog::new(&dispatch.catalog_path));
    let memory = Arc::new(open_memory(dispatch)?);

    let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();
    if let Some(endpoint) = dispatch.yandex.clone() {
        providers.push(Arc::new(
            YandexGptProvider::new(endpoint, dispatch.http_timeout)
                .context("Failed to build YandexGPT client")?,
        ));
    }
    if let Some(endpoint) = dispatch.openai.clone() {
        providers.push(Arc::new(
            OpenAiChatProvider::new(endpoint, dispatch.http_timeout)
                .context("Failed to build chat completions client")?,
        ));
    }
    if providers.is_empty() {
        warn!("No LLM provider configured; the arbiter stage is disabled");
    }

    let mut coordinator =
        FunnelCoordinator::new(catalog, memory, ledger, config).with_llm_providers(providers);

    if let Some(endpoint) = dispatch.embeddings.clone() {
        let index = load_index(&endpoint.index_path).context("Failed to load embedding index")?;
        let embedder = HttpEmbeddingProvider::new(endpoint, index, dispatch.http_timeout)
            .context("Failed to build embeddings client")?;
        coordinator = coordinator.with_embeddings(Arc::new(embedder));
    }

    info!(
        catalog = %dispatch.catalog_path.display(),
        llm = ?dispatch.llm_chain(),
        vector = dispatch.embeddings.is_some(),
        "Funnel ready"
    );
    Ok(coordinator)
}

#[cfg(feature = "heavy-state")]
fn open_memory(dispatch: &DispatchConfig) -> Result<DialogMemory> {
    let store = funnel::store::RocksStore::open(&dispatch.state_db)
        .with_context(|| format!("Failed to open state db {}", dispatch.state_db.display()))?;
    Ok(DialogMemory::new(Arc::new(store)))
}

#[cfg(not(feature = "heavy-state"))]
fn open_memory(dispatch: &DispatchConfig) -> Result<DialogMemory> {
    let store = dispatch_agents::JsonlConversationStore::open(&dispatch.state_log).with_context(|| {
        format!("Failed to open conversation log {}", dispatch.state_log.display())
    })?;
    Ok(DialogMemory::new(Arc::new(store)))
}

fn describe(outcome: &TurnOutcome) -> String {
    let service = outcome
        .service
        .as_ref()
        .map(|s| format!(" {} ({:.2})", s.name, outcome.confidence.unwrap_or(0.0)))
        .unwrap_or_default();
    match outcome.extracted_address.display_string() {
        Some(address) => format!("{}{} [{}]", outcome.status, service, address),
        None => format!("{}{}", outcome.status, service),
    }
}
