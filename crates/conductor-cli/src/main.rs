//! Conductor CLI: run durable workflows and coordinate agents.
//!
//! Every command opens the same SQLite-backed runtime (conductor-core), so
//! workflow checkpoints, registered agents, gate decisions and insights
//! persist across invocations.

use clap::{Parser, Subcommand};
use conductor_cli::commands;
use conductor_cli::commands::gate::ActionFlags;

/// Conductor: durable workflows and multi-agent coordination
#[derive(Parser)]
#[command(name = "conductor", version, about = "Conductor: durable workflows and multi-agent coordination")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "CONDUCTOR_DB_PATH", default_value = "conductor.db")]
    db: String,

    /// Path to a YAML configuration file
    #[arg(long, env = "CONDUCTOR_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run and inspect durable workflows
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Manage registered agents
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Evaluate actions against the authority gate
    Gate {
        #[command(subcommand)]
        action: GateAction,
    },

    /// Run a coordination session over registered agents
    Coordinate {
        /// Task description handed to every agent
        #[arg(long)]
        task: String,
        /// PARALLEL, HIERARCHICAL, COMPETITIVE or COLLABORATIVE_SWARM
        #[arg(long, default_value = "PARALLEL")]
        pattern: String,
        /// Candidate agent IDs (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        agents: Vec<String>,
        /// Action type every participant asks the gate for
        #[arg(long, default_value = "coordinate")]
        action_type: String,
        #[command(flatten)]
        flags: ActionArgs,
        /// Approve any escalation on the spot, as this reviewer
        #[arg(long)]
        approve_as: Option<String>,
    },

    /// Query learning insights
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Run a workflow from a YAML file and wait for it to finish
    Run {
        /// Path to the workflow YAML file
        file: String,
        /// Workflow input (JSON, or a plain string)
        #[arg(long)]
        input: Option<String>,
    },
    /// Validate a workflow YAML file without executing it
    Validate {
        /// Path to the workflow YAML file
        file: String,
    },
    /// Show the state of a workflow instance
    Status {
        /// Instance ID
        id: String,
        /// Include every checkpoint
        #[arg(long)]
        checkpoints: bool,
    },
    /// Resume interrupted instances of the given workflows
    Recover {
        /// Workflow YAML files whose instances may be resumed
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Delete checkpoint history
    Purge {
        /// Delete every checkpoint of this instance
        #[arg(long)]
        id: Option<String>,
        /// Compact all instances, keeping checkpoints newer than this
        /// (defaults to engine.checkpoint_retention_hours)
        #[arg(long, conflicts_with = "id")]
        older_than_hours: Option<u64>,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Register a new agent
    Register {
        /// Agent type, e.g. "sre-bot"
        #[arg(long)]
        agent_type: String,
        /// RECOMMEND_ONLY, ACT_WITH_CONFIRMATION or FULLY_AUTONOMOUS
        #[arg(long, default_value = "RECOMMEND_ONLY")]
        autonomy: String,
        /// Explicit agent ID (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Capabilities (comma-separated)
        #[arg(long, value_delimiter = ',')]
        capabilities: Vec<String>,
    },
    /// List agents
    List {
        /// Include retired agents
        #[arg(long)]
        all: bool,
    },
    /// Get an agent by ID
    Get {
        #[arg(long)]
        id: String,
    },
    /// Retire an agent; it stays queryable for audit
    Retire {
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand)]
enum GateAction {
    /// Evaluate and record a proposed action for an agent
    Evaluate {
        /// Agent ID
        #[arg(long)]
        agent_id: String,
        /// Action type, e.g. "restart_service"
        #[arg(long)]
        action_type: String,
        #[command(flatten)]
        flags: ActionArgs,
    },
    /// Show recorded gate decisions
    Audit {
        /// Only decisions for this agent
        #[arg(long)]
        agent_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum KnowledgeAction {
    /// Rank insights by relevance to a topic
    Query {
        /// Topic text
        topic: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

#[derive(clap::Args)]
struct ActionArgs {
    /// The action changes state
    #[arg(long)]
    mutating: bool,
    /// The action cannot be undone
    #[arg(long)]
    irreversible: bool,
    /// The action is visible outside the system
    #[arg(long)]
    externally_visible: bool,
    /// Estimated cost of the action
    #[arg(long)]
    cost: Option<f64>,
}

impl From<ActionArgs> for ActionFlags {
    fn from(args: ActionArgs) -> Self {
        Self {
            mutating: args.mutating,
            irreversible: args.irreversible,
            externally_visible: args.externally_visible,
            cost: args.cost,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conductor_core=info,conductor_cli=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env / .env.local if present (for API keys, etc.)
    commands::load_dotenv();
    let state = commands::init_state(cli.config.as_deref(), &cli.db);

    let result = match cli.command {
        Commands::Workflow { action } => match action {
            WorkflowAction::Run { file, input } => {
                commands::workflow::run(&state, &file, input.as_deref()).await
            }
            WorkflowAction::Validate { file } => commands::workflow::validate(&state, &file).await,
            WorkflowAction::Status { id, checkpoints } => {
                commands::workflow::status(&state, &id, checkpoints).await
            }
            WorkflowAction::Recover { files } => commands::workflow::recover(&state, &files).await,
            WorkflowAction::Purge { id, older_than_hours } => {
                commands::workflow::purge(&state, id.as_deref(), older_than_hours).await
            }
        },

        Commands::Agent { action } => match action {
            AgentAction::Register {
                agent_type,
                autonomy,
                id,
                description,
                capabilities,
            } => {
                commands::agent::register(
                    &state,
                    &agent_type,
                    &autonomy,
                    id.as_deref(),
                    description.as_deref(),
                    capabilities,
                )
                .await
            }
            AgentAction::List { all } => commands::agent::list(&state, all).await,
            AgentAction::Get { id } => commands::agent::get(&state, &id).await,
            AgentAction::Retire { id } => commands::agent::retire(&state, &id).await,
        },

        Commands::Gate { action } => match action {
            GateAction::Evaluate {
                agent_id,
                action_type,
                flags,
            } => commands::gate::evaluate(&state, &agent_id, &action_type, &flags.into()).await,
            GateAction::Audit { agent_id } => commands::gate::audit(&state, agent_id.as_deref()).await,
        },

        Commands::Coordinate {
            task,
            pattern,
            agents,
            action_type,
            flags,
            approve_as,
        } => {
            commands::coordinate::run(
                &state,
                &task,
                &pattern,
                &agents,
                &action_type,
                &flags.into(),
                approve_as.as_deref(),
            )
            .await
        }

        Commands::Knowledge { action } => match action {
            KnowledgeAction::Query { topic, limit } => {
                commands::knowledge::query(&state, &topic, limit).await
            }
        },
    };

    state.telemetry.flush().await;
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
