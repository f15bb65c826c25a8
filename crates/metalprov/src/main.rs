//! metalprov CLI
//!
//! Provisions bare-metal hosts through driver scripts and configures them with Ansible

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use metalprov_core::{CoreError, OrchestrationContext, RetryDecision, RunMode};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod store;

use config::Config;

#[derive(Parser)]
#[command(name = "metalprov")]
#[command(about = "Bare-metal host provisioning", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Never prompt; apply the failure policy
    #[arg(long)]
    batch: bool,

    /// Log progress
    #[arg(long)]
    verbose: bool,

    /// Log everything, including generated files and command output
    #[arg(long)]
    debug: bool,

    /// Seconds between SSH reachability attempts
    #[arg(long, value_name = "SECS")]
    ping_timeout: Option<u64>,

    /// SSH reachability attempts before asking what to do
    #[arg(long, value_name = "N")]
    ping_retries: Option<u32>,

    #[command(flatten)]
    fail: FailArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Failure policy, also the interactive default
#[derive(Args)]
#[group(multiple = false)]
struct FailArgs {
    /// Tear down what was provisioned
    #[arg(long)]
    fail_cleanup: bool,

    /// Retry up to N times
    #[arg(long, value_name = "N")]
    fail_retry: Option<u32>,

    /// Skip the failing step
    #[arg(long)]
    fail_skip: bool,

    /// Abort
    #[arg(long)]
    fail_quit: bool,
}

impl FailArgs {
    /// Chosen policy and, for retries, the new ceiling
    fn policy(&self) -> Option<(RetryDecision, Option<u32>)> {
        if self.fail_cleanup {
            Some((RetryDecision::Cleanup, None))
        } else if let Some(n) = self.fail_retry {
            Some((RetryDecision::Retry, Some(n)))
        } else if self.fail_skip {
            Some((RetryDecision::Skip, None))
        } else if self.fail_quit {
            Some((RetryDecision::Quit, None))
        } else {
            None
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Provision and configure every device in a device file
    Create {
        /// YAML device file
        file: PathBuf,
        /// Do not wait for SSH before configuring
        #[arg(long)]
        no_ping: bool,
    },
    /// Re-run the configuration of a host
    Configure {
        id: u32,
        #[arg(long)]
        no_ping: bool,
    },
    /// Release a host and remove its record
    Delete { id: u32 },
    /// Reboot a host, or power-cycle it with --hard
    Reset {
        id: u32,
        #[arg(long)]
        hard: bool,
    },
    /// Print the driver's monitoring report
    Monitor { id: u32 },
    /// List hosts
    List,
}

impl Cli {
    fn context(&self, config: &Config) -> OrchestrationContext {
        let mut ctx = config.context();

        if self.batch {
            ctx = ctx.with_mode(RunMode::Batch);
        }
        if let Some(secs) = self.ping_timeout {
            ctx.ping_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = self.ping_retries {
            ctx.ping_retries = retries;
        }
        if let Some((policy, ceiling)) = self.fail.policy() {
            let max_retries = ceiling.unwrap_or(ctx.max_retries);
            ctx = ctx.with_fail_policy(policy, max_retries);
        }

        ctx
    }
}

fn init_tracing(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "error"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_default(cli.config.as_deref())?;
    let ctx = cli.context(&config);
    let app = commands::App::open(ctx, &config.paths.state_file).await?;

    match cli.command {
        Commands::Create { file, no_ping } => app.create(&file, !no_ping).await?,
        Commands::Configure { id, no_ping } => app.configure(id, !no_ping).await?,
        Commands::Delete { id } => app.delete(id).await?,
        Commands::Reset { id, hard } => app.reset(id, hard).await?,
        Commands::Monitor { id } => app.monitor(id).await?,
        Commands::List => app.list().await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(&cli);

    let result = tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => Err(CoreError::Interrupted.into()),
    };

    match result {
        Err(report) => match report.downcast_ref::<CoreError>() {
            Some(e) => {
                eprintln!("ERROR: {e}");
                std::process::exit(e.exit_code());
            }
            None => Err(report),
        },
        Ok(()) => Ok(()),
    }
}
