//! Barricade CLI

use clap::{Parser, Subcommand};

use barricade::net::NetfilterEngine;
use barricade::orchestrator::Orchestrator;
use barricade::runtime::DockerCli;
use barricade::state::FileState;
use barricade::{ContainerView, SessionConfig};

use rand::rngs::StdRng;
use rand::SeedableRng;

type SessionOrchestrator = Orchestrator<DockerCli, NetfilterEngine, FileState>;

#[derive(Parser)]
#[command(name = "barricade")]
#[command(about = "Container network-fault orchestrator", long_about = None)]
struct Cli {
    /// Path to the session configuration file
    #[arg(short, long, default_value = "barricade.json", global = true)]
    config: String,

    /// Session id (default: the current directory name)
    #[arg(short, long, global = true)]
    session: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and start the whole session
    Up {
        /// Replace leftover containers holding our names
        #[arg(short, long)]
        force: bool,
        /// Print progress while containers come up
        #[arg(short, long)]
        verbose: bool,
    },
    /// Stop and remove every container of the session
    Destroy,
    /// Show the status of every container
    Status,
    /// Start stopped containers
    Start {
        /// Container names
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Stop running containers
    Stop {
        /// Container names
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Restart running containers
    Restart {
        /// Container names
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Send a signal to running containers
    Kill {
        /// Container names
        #[arg(required = true)]
        names: Vec<String>,
        /// Signal to send (default: SIGKILL)
        #[arg(long)]
        signal: Option<String>,
    },
    /// Introduce packet loss on containers
    Flaky {
        /// Container names
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Introduce latency on containers
    Slow {
        /// Container names
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Introduce packet duplication on containers
    Duplicate {
        /// Container names
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Restore normal traffic on containers
    Fast {
        /// Container names
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Partition the network between containers
    Partition {
        /// Partitions as comma-separated groups, e.g. "db1,db2 db3"
        #[arg(required = true)]
        partitions: Vec<String>,
    },
    /// Partition the network into random groups
    RandomPartition {
        /// RNG seed for a reproducible partition
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Restore full connectivity between containers
    Join,
    /// Print the logs of one container
    Logs {
        /// Container name
        name: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> barricade::Result<()> {
    let session_id = cli.session.unwrap_or_else(default_session_id);
    let config = SessionConfig::from_json_file(&cli.config)?;
    let orchestrator = Orchestrator::new(
        session_id.clone(),
        config.clone(),
        DockerCli::default(),
        NetfilterEngine::new(config.network_options()),
        FileState::in_current_dir(session_id)?,
    );

    match cli.command {
        Commands::Up { force, verbose } => cmd_up(&orchestrator, force, verbose),
        Commands::Destroy => cmd_destroy(&orchestrator),
        Commands::Status => cmd_status(&orchestrator),
        Commands::Start { names } => orchestrator.start(&names),
        Commands::Stop { names } => orchestrator.stop(&names),
        Commands::Restart { names } => orchestrator.restart(&names),
        Commands::Kill { names, signal } => orchestrator.kill(&names, signal.as_deref()),
        Commands::Flaky { names } => orchestrator.flaky(&names),
        Commands::Slow { names } => orchestrator.slow(&names),
        Commands::Duplicate { names } => orchestrator.duplicate(&names),
        Commands::Fast { names } => orchestrator.fast(&names),
        Commands::Partition { partitions } => {
            let groups: Vec<Vec<String>> = partitions
                .iter()
                .map(|group| {
                    group
                        .split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(String::from)
                        .collect()
                })
                .collect();
            orchestrator.partition(&groups)
        }
        Commands::RandomPartition { seed } => cmd_random_partition(&orchestrator, seed),
        Commands::Join => orchestrator.join(),
        Commands::Logs { name } => {
            print!("{}", orchestrator.logs(&name)?);
            Ok(())
        }
    }
}

/// Session ids default to the working directory name, the same way
/// compose-style tools namespace their projects.
fn default_session_id() -> String {
    std::env::current_dir()
        .ok()
        .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("barricade-{}", &id[..8])
        })
}

fn cmd_up(orchestrator: &SessionOrchestrator, force: bool, verbose: bool) -> barricade::Result<()> {
    let containers = orchestrator.create(verbose, force)?;
    print_status(&containers);
    Ok(())
}

fn cmd_destroy(orchestrator: &SessionOrchestrator) -> barricade::Result<()> {
    orchestrator.destroy()?;
    println!("session '{}' destroyed", orchestrator.session_id());
    Ok(())
}

fn cmd_status(orchestrator: &SessionOrchestrator) -> barricade::Result<()> {
    print_status(&orchestrator.status()?);
    Ok(())
}

fn cmd_random_partition(
    orchestrator: &SessionOrchestrator,
    seed: Option<u64>,
) -> barricade::Result<()> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let plan = orchestrator.random_partition(&mut rng)?;
    if plan.is_empty() {
        println!("no partitions - full connectivity");
    } else {
        for (index, group) in plan.iter().enumerate() {
            println!("partition {}: {}", index + 1, group.join(", "));
        }
    }
    Ok(())
}

fn print_status(containers: &[ContainerView]) {
    println!(
        "{:<16} {:<14} {:<10} {:<16} {:<10} {:<10}",
        "NAME", "CONTAINER ID", "STATUS", "IP", "NETWORK", "PARTITION"
    );
    for container in containers {
        let short_id: String = container.container_id.chars().take(12).collect();
        let partition = container
            .partition
            .map(|p| p.to_string())
            .unwrap_or_default();
        println!(
            "{:<16} {:<14} {:<10} {:<16} {:<10} {:<10}",
            container.name,
            short_id,
            container.status.to_string(),
            container.ip_address.as_deref().unwrap_or(""),
            container.network_state.to_string(),
            partition
        );
    }
}
