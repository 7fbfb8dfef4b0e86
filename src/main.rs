//! Mirror Director CLI application
//!
//! Command-line interface for resolving repository files to mirrors, running
//! health sweeps and maintaining the resolution cache.

use std::process;

use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use mirror_director::cli::{
    handle_cache, handle_inventory, handle_monitor, handle_resolve, handle_scan, load_config, Cli,
    Commands,
};
use mirror_director::config::LoggingConfig;
use mirror_director::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        if !e.is_recoverable() {
            error!("Fatal {} error: {}", e.category(), e);
        }
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();
    let config = load_config(&cli.global).await?;

    init_logging(&cli, &config.logging);

    info!("Mirror Director v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Resolve(args) => handle_resolve(args, &config).await,
        Commands::Scan(args) => handle_scan(args, &config).await,
        Commands::Monitor(args) => {
            info!("Executing monitor command");
            handle_monitor(args, &config).await
        }
        Commands::Inventory(args) => handle_inventory(args, &config).await,
        Commands::Cache(args) => handle_cache(args, &config).await,
    }
}

/// Initialize logging from CLI verbosity, falling back to the configured level
fn init_logging(cli: &Cli, logging: &LoggingConfig) {
    let explicit = cli.global.quiet || cli.global.verbose || cli.global.very_verbose;
    let level = if explicit {
        cli.log_level().to_string().to_lowercase()
    } else {
        logging.level.clone()
    };

    let mut filter = EnvFilter::from_default_env();
    match format!("mirror_director={}", level).parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring invalid log level '{}': {}", level, e),
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(logging.colored_output)
        .with_level(cli.global.very_verbose)
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
