use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use lead_dispatch::config::{LeadDispatchConfig, StorageBackend};
use lead_dispatch::leads::{
    Agent, AgentId, AgentRoster, CachedAgentDirectory, DistributionEngine, FileLeadStore, LeadId,
    LeadStore, NewLead, TimeoutSweeper,
};
use lead_dispatch::{init_telemetry, ShutdownCoordinator};

#[derive(Parser)]
#[command(name = "lead-dispatch")]
#[command(about = "Distribute inbound leads to sales agents with a bounded claim window")]
#[command(long_about = "lead-dispatch stores each inquiry, hands it to one randomly chosen active \
                       agent, and moves it to a different agent when the claim window lapses. \
                       Run 'lead-dispatch watch' to keep the timeout sweeper ticking.")]
struct Cli {
    /// Override the state file used by the file backend
    #[arg(long, global = true, value_name = "PATH")]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Store(StoreCommand),
    /// Inspect or write configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

/// Commands that open the configured lead store
#[derive(Subcommand)]
enum StoreCommand {
    /// Create, claim, assign and inspect leads
    Lead {
        #[command(subcommand)]
        action: LeadCommand,
    },
    /// Run one timeout sweep and print the report
    Sweep,
    /// Sweep on an interval until interrupted
    Watch {
        /// Seconds between sweeps (defaults to sweeper.interval_seconds)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Manage the agent roster
    Agent {
        #[command(subcommand)]
        action: AgentCommand,
    },
}

#[derive(Subcommand)]
enum LeadCommand {
    /// Store a new inquiry and assign it to an active agent
    Create(CreateArgs),
    /// Claim a lead as the agent it is assigned to
    Claim {
        lead_id: String,
        #[arg(long, help = "Id of the claiming agent")]
        agent: String,
    },
    /// Retry assignment for a lead left unassigned
    Assign {
        #[arg(required_unless_present = "stranded")]
        lead_id: Option<String>,
        /// Retry every unassigned lead instead of one
        #[arg(long, conflicts_with = "lead_id")]
        stranded: bool,
    },
    /// Show a lead and its assignment history
    Show { lead_id: String },
}

#[derive(Args)]
struct CreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    phone: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    message: Option<String>,
    #[arg(long)]
    project: Option<String>,
    #[arg(long)]
    source: Option<String>,
}

impl From<CreateArgs> for NewLead {
    fn from(args: CreateArgs) -> Self {
        NewLead {
            name: args.name,
            phone: args.phone,
            email: args.email,
            message: args.message,
            project_id: args.project,
            source: args.source,
        }
    }
}

#[derive(Subcommand)]
enum AgentCommand {
    /// Add an agent or update an existing one (re-activates it)
    Add {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Stop offering new leads to an agent
    Deactivate { id: String },
    /// Offer new leads to an agent again
    Activate { id: String },
    /// List every agent
    List,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Write the effective configuration to a file
    Init {
        #[arg(default_value = "lead-dispatch.toml")]
        path: PathBuf,
        #[arg(long, help = "Overwrite an existing file")]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    LeadDispatchConfig::load_env_file()?;
    let mut config = LeadDispatchConfig::load()?;
    if let Some(state) = cli.state {
        config.storage.state_path = state;
    }
    init_telemetry(&config.observability)?;

    tokio::runtime::Runtime::new()?.block_on(async { run(cli.command, config).await })
}

async fn run(command: Commands, config: LeadDispatchConfig) -> Result<()> {
    let command = match command {
        Commands::Config { action } => return config_command(action, &config),
        Commands::Store(command) => command,
    };

    match config.storage.backend {
        StorageBackend::File => {
            let store = Arc::new(FileLeadStore::new(config.storage.state_path.clone()));
            dispatch(store, command, &config).await
        }
        StorageBackend::Sqlite => {
            #[cfg(feature = "database")]
            {
                let db = lead_dispatch::DatabaseManager::from_config(&config.storage).await?;
                let store = Arc::new(lead_dispatch::leads::SqliteLeadStore::new(db.pool().clone()));
                let result = dispatch(store, command, &config).await;
                db.shutdown().await;
                result
            }
            #[cfg(not(feature = "database"))]
            {
                bail!("storage.backend = \"sqlite\" requires building with the `database` feature")
            }
        }
    }
}

async fn dispatch<S>(
    store: Arc<S>,
    command: StoreCommand,
    config: &LeadDispatchConfig,
) -> Result<()>
where
    S: LeadStore + AgentRoster + 'static,
{
    let directory = CachedAgentDirectory::new(store.clone(), config.agent_cache_ttl());
    let engine = Arc::new(DistributionEngine::new(
        store.clone(),
        directory,
        config.claim_timeout(),
    ));

    match command {
        StoreCommand::Lead { action } => match action {
            LeadCommand::Create(args) => {
                let assignment = engine.create_lead_and_assign(args.into()).await?;
                print_json(&assignment)
            }
            LeadCommand::Claim { lead_id, agent } => {
                let lead_id = parse_lead_id(&lead_id)?;
                let outcome = engine.claim_lead(lead_id, &AgentId::new(agent)).await?;
                print_json(&json!({
                    "leadId": lead_id,
                    "success": outcome.is_success(),
                }))
            }
            LeadCommand::Assign { lead_id, stranded } => {
                if stranded {
                    let report = engine.assign_stranded().await?;
                    print_json(&report)
                } else {
                    let lead_id = lead_id.context("lead id is required without --stranded")?;
                    let assignment = engine.assign_lead(parse_lead_id(&lead_id)?).await?;
                    print_json(&assignment)
                }
            }
            LeadCommand::Show { lead_id } => {
                let lead_id = parse_lead_id(&lead_id)?;
                let lead = engine.get_lead(lead_id).await?;
                let history = engine.assignment_history(lead_id).await?;
                print_json(&json!({
                    "lead": lead,
                    "assignments": history,
                }))
            }
        },
        StoreCommand::Sweep => {
            let report = engine.sweep_timeouts(Utc::now()).await?;
            print_json(&report)
        }
        StoreCommand::Watch { interval } => {
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.sweep_interval());
            if interval.is_zero() {
                bail!("--interval must be greater than zero");
            }
            watch_command(engine, interval, config).await
        }
        StoreCommand::Agent { action } => agent_command(store.as_ref(), action).await,
    }
}

async fn watch_command<S>(
    engine: Arc<DistributionEngine<S, CachedAgentDirectory<Arc<S>>>>,
    interval: Duration,
    config: &LeadDispatchConfig,
) -> Result<()>
where
    S: LeadStore + AgentRoster + 'static,
{
    let sweeper = TimeoutSweeper::new(engine).with_stranded_retry(config.sweeper.retry_stranded);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        sweeper
            .run_periodic(interval, async move {
                let _ = stop_rx.await;
            })
            .await
    });

    ShutdownCoordinator::wait_for_signal().await;
    let _ = stop_tx.send(());

    let coordinator = ShutdownCoordinator::new(config.observability.metrics_enabled);
    match coordinator.finish(Duration::from_secs(30), handle).await {
        Some(Ok(totals)) => print_json(&totals),
        Some(Err(e)) => Err(e).context("sweeper task failed"),
        None => bail!("sweeper did not stop within the grace period"),
    }
}

async fn agent_command<R: AgentRoster + ?Sized>(roster: &R, action: AgentCommand) -> Result<()> {
    match action {
        AgentCommand::Add {
            id,
            name,
            phone,
            email,
        } => {
            let mut agent = Agent::new(id, name);
            agent.phone = phone;
            agent.email = email;
            roster.upsert_agent(agent.clone()).await?;
            info!(agent_id = %agent.id, "Agent saved");
            print_json(&agent)
        }
        AgentCommand::Deactivate { id } => set_active(roster, id, false).await,
        AgentCommand::Activate { id } => set_active(roster, id, true).await,
        AgentCommand::List => print_json(&roster.agents().await?),
    }
}

async fn set_active<R: AgentRoster + ?Sized>(roster: &R, id: String, active: bool) -> Result<()> {
    let agent_id = AgentId::new(id);
    if !roster.set_agent_active(&agent_id, active).await? {
        bail!("agent {} not found", agent_id);
    }
    print_json(&json!({ "agentId": agent_id, "isActive": active }))
}

fn config_command(action: ConfigCommand, config: &LeadDispatchConfig) -> Result<()> {
    match action {
        ConfigCommand::Show => {
            print!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
        ConfigCommand::Init { path, force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config.save_to_file(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

fn parse_lead_id(raw: &str) -> Result<LeadId> {
    raw.parse::<LeadId>()
        .with_context(|| format!("invalid lead id: {}", raw))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
