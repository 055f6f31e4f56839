use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use goalify::{init, Aggregation, Api, Config, Database, Tracker};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "goalify")]
#[command(author, version, about = "Goal tracking API with milestone and task progress rollup")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API
    Serve {
        /// Address to bind (default from config: 127.0.0.1)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (default from config: 8000)
        #[arg(short, long)]
        port: Option<u16>,

        /// Goal aggregation: task_weighted or milestone_weighted
        #[arg(long)]
        aggregation: Option<Aggregation>,
    },

    /// Create .goalify/ with a default config and database
    Init,

    /// Re-derive every milestone and goal percentage
    Recalc {
        /// Goal aggregation: task_weighted or milestone_weighted
        #[arg(long)]
        aggregation: Option<Aggregation>,
    },

    /// Print shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_database(config: &Config) -> Result<Database, String> {
    let path = config.database_path();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Could not create {}: {}", parent.display(), e))?;
        }
    }
    Database::open_at(&path).map_err(|e| format!("Could not open {}: {}", path.display(), e))
}

fn run(cli: Cli, config: Config) -> Result<(), String> {
    match cli.command {
        Command::Serve {
            host,
            port,
            aggregation,
        } => {
            let db = open_database(&config)?;
            let aggregation = aggregation.unwrap_or(config.progress.aggregation);
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            eprintln!("\n{}", "Goalify".green().bold());
            eprintln!("   Database:    {}", db.path().display());
            eprintln!("   Aggregation: {}", aggregation);
            eprintln!("   API:         http://{}:{}/api", host, port);
            eprintln!("   Press Ctrl+C to stop\n");

            let api = Api::new(Tracker::new(db, aggregation), config.api.clone());
            goalify::serve::start_server(api, &host, port).map_err(|e| format!("Server error: {}", e))
        }

        Command::Init => {
            let cwd = std::env::current_dir()
                .map_err(|e| format!("Could not get current directory: {}", e))?;
            init::init_project(&cwd)
        }

        Command::Recalc { aggregation } => {
            let db = open_database(&config)?;
            let aggregation = aggregation.unwrap_or(config.progress.aggregation);
            let tracker = Tracker::new(db, aggregation);
            let report = tracker.recalculate_all().map_err(|e| e.to_string())?;
            let summary = tracker.database().summary().map_err(|e| e.to_string())?;

            println!("{} with {}", "Recalculated progress".green().bold(), aggregation.to_string().cyan());
            println!(
                "   Milestones: {} checked, {} updated",
                report.milestones_checked, report.milestones_updated
            );
            println!(
                "   Goals:      {} checked, {} updated",
                report.goals_checked, report.goals_updated
            );
            println!(
                "   Totals:     {} goals, {} milestones, {} tasks",
                summary.total_goals, summary.total_milestones, summary.total_tasks
            );
            Ok(())
        }

        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "goalify", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::load();
    init_logging(&config);

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
