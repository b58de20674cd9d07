use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser, Subcommand};
use msgpilot::VERSION;
use msgpilot::automation::{AutomationEngine, ConfigStore, EngineOptions, JobPatch, NewJob};
use msgpilot::config::{Config, get_config_path, load_config, save_config};
use msgpilot::extract::{ChatExtractor, PromptTemplates};
use msgpilot::items::FileItemStore;
use msgpilot::source::{AgentClient, MessageSource};
use msgpilot::utils::ensure_dir;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "msgpilot",
    version = VERSION,
    about = "msgpilot: polls chat groups and turns new messages into todos, events and notes"
)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Onboard,
    Jobs {
        #[command(subcommand)]
        command: JobCommand,
    },
    Status {
        automation_id: Option<String>,
    },
    /// Ask the agent how many messages are pending for a group.
    Peek {
        group: String,
    },
    Run {
        /// Start only these jobs instead of every active one.
        #[arg(long = "only")]
        only: Vec<String>,
        /// Print aggregate status every N seconds (0 disables).
        #[arg(long, default_value_t = 0)]
        report_secs: u64,
    },
}

#[derive(Debug, Subcommand)]
enum JobCommand {
    List,
    Show {
        automation_id: String,
    },
    Create {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        customer: String,
        #[arg(short, long)]
        group: String,
        #[arg(short, long = "prompt", default_values_t = vec!["todo".to_string()])]
        prompts: Vec<String>,
        #[arg(long)]
        minutes: Option<u64>,
        #[arg(long, allow_negative_numbers = true)]
        min_count: Option<i64>,
        #[arg(long)]
        max_time: Option<u64>,
        #[arg(long, action = ArgAction::SetTrue)]
        peek_only: bool,
        #[arg(long, action = ArgAction::SetTrue)]
        inactive: bool,
    },
    Update {
        automation_id: String,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        customer: Option<String>,
        #[arg(short, long)]
        group: Option<String>,
        #[arg(short, long = "prompt")]
        prompts: Vec<String>,
        #[arg(long)]
        minutes: Option<u64>,
        #[arg(long, allow_negative_numbers = true)]
        min_count: Option<i64>,
        #[arg(long)]
        max_time: Option<u64>,
        #[arg(long, action = ArgAction::Set)]
        peek_only: Option<bool>,
        #[arg(long, action = ArgAction::Set)]
        active: Option<bool>,
    },
    Delete {
        automation_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Onboard => cmd_onboard()?,
        Commands::Jobs { command } => cmd_jobs(command).await?,
        Commands::Status { automation_id } => cmd_status(automation_id).await?,
        Commands::Peek { group } => cmd_peek(&group).await?,
        Commands::Run { only, report_secs } => cmd_run(only, report_secs).await?,
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "msgpilot=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_source(config: &Config) -> AgentClient {
    AgentClient::new(config.agent.host.clone(), config.agent_token()).with_timeouts(
        Duration::from_secs(config.agent.count_timeout_secs),
        Duration::from_secs(config.agent.fetch_timeout_secs),
    )
}

fn build_engine(config: &Config) -> AutomationEngine {
    let items = Arc::new(FileItemStore::new(config.items_dir()));
    let extractor = ChatExtractor::new(
        config.llm.api_key.clone(),
        config.llm.api_base.clone(),
        config.llm.model.clone(),
        PromptTemplates::with_overrides(&config.prompts),
    )
    .with_sampling(config.llm.max_tokens, config.llm.temperature)
    .with_context_source(items.clone());

    AutomationEngine::with_options(
        ConfigStore::new(config.automation_dir()),
        Arc::new(build_source(config)),
        Arc::new(extractor),
        items,
        EngineOptions {
            error_backoff: Duration::from_secs(config.automation.error_backoff_secs),
            ..Default::default()
        },
    )
}

async fn load_engine() -> Result<AutomationEngine> {
    let config = load_config(None)?;
    let engine = build_engine(&config);
    engine.reload().await;
    Ok(engine)
}

fn cmd_onboard() -> Result<()> {
    let config_path = get_config_path()?;
    let config = if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        load_config(Some(&config_path))?
    } else {
        let config = Config::default();
        save_config(&config, Some(&config_path))?;
        println!("Created config at {}", config_path.display());
        config
    };

    for dir in [config.automation_dir(), config.items_dir()] {
        ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        println!("Using {}", dir.display());
    }

    println!("msgpilot is ready.");
    println!("Next steps:");
    println!("1. Add the agent token and LLM API key to {}", config_path.display());
    println!("2. Create a job: msgpilot jobs create --owner me --customer c1 --group my-group");
    println!("3. Run it: msgpilot run");
    Ok(())
}

async fn cmd_jobs(command: JobCommand) -> Result<()> {
    let engine = load_engine().await?;
    match command {
        JobCommand::List => {
            let configs = engine.list_configs().await;
            if configs.is_empty() {
                println!("No automation jobs.");
            }
            for config in configs {
                println!(
                    "{} {} group={} prompts={} every={}m min={} max_wait={}m",
                    config.automation_id,
                    if config.active { "active" } else { "inactive" },
                    config.agent_group,
                    config.prompts.join(","),
                    config.get_msg_minutes,
                    config.min_msg_count,
                    config.process_max_time,
                );
            }
        }
        JobCommand::Show { automation_id } => match engine.get_config(&automation_id).await {
            Some(config) => print_json(&config)?,
            None => println!("Job {automation_id} not found"),
        },
        JobCommand::Create {
            owner,
            customer,
            group,
            prompts,
            minutes,
            min_count,
            max_time,
            peek_only,
            inactive,
        } => {
            let request = NewJob {
                active: Some(!inactive),
                agent_peek_only: Some(peek_only),
                get_msg_minutes: minutes,
                min_msg_count: min_count,
                process_max_time: max_time,
                ..NewJob::new(owner, customer, group, prompts)
            };
            let config = engine.create(request).await?;
            println!("Created job {}", config.automation_id);
        }
        JobCommand::Update {
            automation_id,
            owner,
            customer,
            group,
            prompts,
            minutes,
            min_count,
            max_time,
            peek_only,
            active,
        } => {
            let patch = JobPatch {
                owner,
                customer_id: customer,
                active,
                agent_group: group,
                agent_peek_only: peek_only,
                prompts: Some(prompts).filter(|p| !p.is_empty()),
                get_msg_minutes: minutes,
                min_msg_count: min_count,
                process_max_time: max_time,
            };
            if patch.is_empty() {
                return Err(anyhow!("Nothing to update"));
            }
            let config = engine.update(&automation_id, patch).await?;
            print_json(&config)?;
        }
        JobCommand::Delete { automation_id } => {
            if engine.delete(&automation_id).await {
                println!("Deleted job {automation_id}");
            } else {
                println!("Job {automation_id} not found");
            }
        }
    }
    Ok(())
}

/// Activity history lives in the process running the jobs; from a fresh process this
/// shows configuration-derived state only.
async fn cmd_status(automation_id: Option<String>) -> Result<()> {
    let engine = load_engine().await?;
    match automation_id {
        Some(id) => match engine.detailed_status(&id).await {
            Some(status) => print_json(&status)?,
            None => println!("Job {id} not found"),
        },
        None => print_json(&engine.status().await)?,
    }
    Ok(())
}

async fn cmd_peek(group: &str) -> Result<()> {
    let config = load_config(None)?;
    let source = build_source(&config);
    let count = source.peek_count(group).await?;
    println!("{group}: {count} pending messages on {}", source.host());
    Ok(())
}

async fn cmd_run(only: Vec<String>, report_secs: u64) -> Result<()> {
    let engine = load_engine().await?;
    let results = if only.is_empty() {
        engine.start_all().await
    } else {
        let mut results = std::collections::BTreeMap::new();
        for id in only {
            let started = engine.start(&id).await;
            results.insert(id, started);
        }
        results
    };
    for (id, started) in &results {
        if *started {
            info!(automation_id = %id, "job running");
        } else {
            warn!(automation_id = %id, "job not started (unknown, inactive or already running)");
        }
    }
    if !results.values().any(|started| *started) {
        return Err(anyhow!("No jobs started"));
    }

    println!("msgpilot v{VERSION} running; press Ctrl-C to stop.");
    if report_secs == 0 {
        tokio::signal::ctrl_c().await?;
    } else {
        let mut ticker = tokio::time::interval(Duration::from_secs(report_secs));
        ticker.tick().await;
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    break;
                }
                _ = ticker.tick() => print_json(&engine.status().await)?,
            }
        }
    }

    info!("shutting down");
    engine.shutdown(Duration::from_secs(15)).await;
    Ok(())
}
