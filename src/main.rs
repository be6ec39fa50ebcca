use std::path::Path;
use std::sync::Arc;

/// Reset SIGPIPE to default behavior so piping (e.g. `strata graph | dot`) exits cleanly
/// instead of panicking on broken pipe.
#[cfg(unix)]
fn reset_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use strata::config::{self, Settings, StackDefinition};
use strata::dag::DependencyGraph;
use strata::executor::StackEngine;
use strata::output::formatter;
use strata::planner;
use strata::resource::ResourceRegistry;
use strata::stack::Stack;
use strata::state::{ResourceStore, SqliteStore};

/// strata - dependency-ordered lifecycle engine for resource stacks
#[derive(Parser)]
#[command(name = "strata", version, about, long_about = None)]
struct Cli {
    /// Path to the engine settings file
    #[arg(short, long, default_value = "strata.yaml")]
    config: String,

    /// Path to the stack definition
    #[arg(short = 'f', long, default_value = "stack.yaml")]
    file: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Maximum parallelism for resource operations (overrides settings)
    #[arg(short, long)]
    parallelism: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the stack definition without touching any resource
    Validate,

    /// Show the dependency graph as DOT
    Graph,

    /// Show what apply would change
    Plan,

    /// Create the stack, or update it to match the definition
    Apply {
        /// Skip confirmation prompt
        #[arg(long)]
        auto_approve: bool,
    },

    /// Delete every resource in reverse dependency order
    Destroy {
        /// Skip confirmation prompt
        #[arg(long)]
        auto_approve: bool,

        /// Stack name (defaults to the one in the definition)
        #[arg(long)]
        stack: Option<String>,
    },

    /// Suspend every resource in reverse dependency order
    Suspend {
        #[arg(long)]
        stack: Option<String>,
    },

    /// Resume every resource in dependency order
    Resume {
        #[arg(long)]
        stack: Option<String>,
    },

    /// Inspect stored state
    State {
        #[command(subcommand)]
        command: StateCommands,
    },

    /// Show the lifecycle events of a stack
    Events {
        #[arg(long)]
        stack: Option<String>,

        /// Only events of this resource
        #[arg(short, long)]
        resource: Option<String>,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// List stacks, or the resources of one stack
    List {
        #[arg(long)]
        stack: Option<String>,
    },

    /// Show details for a single resource
    Show {
        /// Resource name
        name: String,

        #[arg(long)]
        stack: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    #[cfg(unix)]
    reset_sigpipe();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Validate => cmd_validate(&cli),
        Commands::Graph => cmd_graph(&cli),
        Commands::Plan => cmd_plan(&cli).await,
        Commands::Apply { auto_approve } => cmd_apply(&cli, auto_approve).await,
        Commands::Destroy {
            auto_approve,
            ref stack,
        } => cmd_destroy(&cli, stack.as_deref(), auto_approve).await,
        Commands::Suspend { ref stack } => cmd_suspend(&cli, stack.as_deref()).await,
        Commands::Resume { ref stack } => cmd_resume(&cli, stack.as_deref()).await,
        Commands::State { ref command } => cmd_state(&cli, command).await,
        Commands::Events {
            ref stack,
            ref resource,
        } => cmd_events(&cli, stack.as_deref(), resource.as_deref()).await,
    };

    if let Err(e) = result {
        formatter::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn settings(cli: &Cli) -> Result<Settings> {
    let mut settings = config::load_settings(Path::new(&cli.config))?;
    if let Some(parallelism) = cli.parallelism {
        settings.parallelism = parallelism;
    }
    Ok(settings)
}

fn stack_definition(cli: &Cli) -> Result<StackDefinition> {
    config::load_stack_definition(Path::new(&cli.file))
}

/// The stack a command targets: `--stack`, or the name in the definition.
fn stack_name(cli: &Cli, explicit: Option<&str>) -> Result<String> {
    match explicit {
        Some(name) => Ok(name.to_string()),
        None => Ok(stack_definition(cli)
            .context("No --stack given and no readable stack definition")?
            .name),
    }
}

async fn open_store(settings: &Settings) -> Result<Arc<dyn ResourceStore>> {
    let store = SqliteStore::open(&settings.state_path)?;
    store.initialize().await?;
    Ok(Arc::new(store))
}

async fn load_stack(
    name: &str,
    registry: Arc<ResourceRegistry>,
    store: Arc<dyn ResourceStore>,
) -> Result<Arc<Stack>> {
    Stack::load(name, registry, store)
        .await?
        .with_context(|| format!("Stack '{}' not found in state", name))
}

/// Build an engine whose operations stop cleanly on Ctrl-C.
fn engine(settings: &Settings) -> StackEngine {
    let engine = StackEngine::new(settings).with_progress(true);
    let token = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "Interrupt received, stopping after in-flight operations...".yellow());
            token.cancel();
        }
    });
    engine
}

fn confirm(question: &str) -> Result<bool> {
    println!("\n{} Only '{}' will be accepted.", question, "yes".bold());
    print!("  Enter a value: ");
    use std::io::Write;
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim() == "yes")
}

// ─── Commands ────────────────────────────────────────────────────────────────

fn cmd_validate(cli: &Cli) -> Result<()> {
    let definition = stack_definition(cli)?;
    let registry = ResourceRegistry::with_builtins();
    let plan = planner::plan_create(&definition, &registry)?;
    formatter::print_success(&format!(
        "Stack '{}' is valid ({} resource(s)).",
        definition.name,
        plan.changes.len()
    ));
    Ok(())
}

fn cmd_graph(cli: &Cli) -> Result<()> {
    let definition = stack_definition(cli)?;
    let graph = DependencyGraph::build(&definition.resources)?;
    println!("{}", graph.to_dot(&definition.name));
    Ok(())
}

async fn cmd_plan(cli: &Cli) -> Result<()> {
    let settings = settings(cli)?;
    let definition = stack_definition(cli)?;
    let registry = Arc::new(ResourceRegistry::with_builtins());
    let store = open_store(&settings).await?;

    let plan = match Stack::load(&definition.name, Arc::clone(&registry), store).await? {
        Some(existing) => planner::plan_update(&existing, &definition).await?,
        None => planner::plan_create(&definition, &registry)?,
    };
    formatter::print_plan(&plan);
    Ok(())
}

async fn cmd_apply(cli: &Cli, auto_approve: bool) -> Result<()> {
    let settings = settings(cli)?;
    let definition = stack_definition(cli)?;
    let registry = Arc::new(ResourceRegistry::with_builtins());
    let store = open_store(&settings).await?;

    let existing = Stack::load(&definition.name, Arc::clone(&registry), Arc::clone(&store)).await?;
    let plan = match &existing {
        Some(stack) => planner::plan_update(stack, &definition).await?,
        None => planner::plan_create(&definition, &registry)?,
    };
    formatter::print_plan(&plan);

    if !plan.has_changes() {
        return Ok(());
    }
    if !auto_approve && !confirm("Do you want to perform these actions?")? {
        println!("\n{}", "Apply cancelled.".yellow());
        return Ok(());
    }

    let engine = engine(&settings);
    println!();
    match existing {
        Some(stack) => {
            let summary = engine.update(&stack, &definition).await?;
            println!();
            formatter::print_success(&summary.to_string());
        }
        None => {
            let stack = Stack::new(definition, registry, store).await?;
            let summary = engine.create(&stack).await?;
            println!();
            formatter::print_success(&summary.to_string());
        }
    }
    Ok(())
}

async fn cmd_destroy(cli: &Cli, stack: Option<&str>, auto_approve: bool) -> Result<()> {
    let settings = settings(cli)?;
    let name = stack_name(cli, stack)?;
    let store = open_store(&settings).await?;
    let stack = load_stack(&name, Arc::new(ResourceRegistry::with_builtins()), store).await?;

    if !auto_approve {
        let question = format!(
            "Do you really want to destroy all {} resource(s) of stack '{}'?",
            stack.resource_names().await.len(),
            name
        );
        if !confirm(&question)? {
            println!("\n{}", "Destroy cancelled.".yellow());
            return Ok(());
        }
    }

    let summary = engine(&settings).delete(&stack).await?;
    println!();
    formatter::print_success(&summary.to_string());
    Ok(())
}

async fn cmd_suspend(cli: &Cli, stack: Option<&str>) -> Result<()> {
    let settings = settings(cli)?;
    let name = stack_name(cli, stack)?;
    let store = open_store(&settings).await?;
    let stack = load_stack(&name, Arc::new(ResourceRegistry::with_builtins()), store).await?;

    let summary = engine(&settings).suspend(&stack).await?;
    println!();
    formatter::print_success(&summary.to_string());
    Ok(())
}

async fn cmd_resume(cli: &Cli, stack: Option<&str>) -> Result<()> {
    let settings = settings(cli)?;
    let name = stack_name(cli, stack)?;
    let store = open_store(&settings).await?;
    let stack = load_stack(&name, Arc::new(ResourceRegistry::with_builtins()), store).await?;

    let summary = engine(&settings).resume(&stack).await?;
    println!();
    formatter::print_success(&summary.to_string());
    Ok(())
}

async fn cmd_state(cli: &Cli, command: &StateCommands) -> Result<()> {
    let settings = settings(cli)?;
    let store = open_store(&settings).await?;

    match command {
        StateCommands::List { stack: None } => {
            formatter::print_stack_list(&store.list_stacks().await?);
        }
        StateCommands::List { stack: Some(name) } => {
            let record = store
                .get_stack(name)
                .await?
                .with_context(|| format!("Stack '{}' not found in state", name))?;
            formatter::print_resource_list(&store.list_resources(&record.id).await?);
        }
        StateCommands::Show { name, stack } => {
            let stack_name = stack_name(cli, stack.as_deref())?;
            let record = store
                .get_stack(&stack_name)
                .await?
                .with_context(|| format!("Stack '{}' not found in state", stack_name))?;
            match store.get_resource(&record.id, name).await? {
                Some(resource) => formatter::print_resource_detail(&resource),
                None => bail!("Resource '{}' not found in stack '{}'", name, stack_name),
            }
        }
    }
    Ok(())
}

async fn cmd_events(cli: &Cli, stack: Option<&str>, resource: Option<&str>) -> Result<()> {
    let settings = settings(cli)?;
    let name = stack_name(cli, stack)?;
    let store = open_store(&settings).await?;
    let record = store
        .get_stack(&name)
        .await?
        .with_context(|| format!("Stack '{}' not found in state", name))?;

    formatter::print_events(&store.list_events(&record.id, resource).await?);
    Ok(())
}
