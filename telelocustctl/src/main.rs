use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use telelocust_core::{RunSnapshot, RunState, RunToken};
use telelocustctl::{
    DEFAULT_SERVER_URL, StartRequest, TelelocustClient, parse_token,
};

#[derive(Parser, Debug)]
#[command(name = "telelocustctl")]
#[command(about = "Start Telelocust load tests and collect their results", version)]
struct Cli {
    /// Base URL of the Telelocust server
    #[arg(long, global = true, env = "TELELOCUST_SERVER", default_value = DEFAULT_SERVER_URL)]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a run and print its token
    Start(StartArgs),
    /// Print the current state of a run as JSON
    Status { token: String },
    /// Poll a run until it is finished or failed
    Wait {
        token: String,
        #[command(flatten)]
        poll: PollArgs,
    },
    /// Save a run's artifact archive
    Download {
        token: String,
        #[command(flatten)]
        output: OutputArgs,
        /// Download even if the run is still in progress
        #[arg(long)]
        partial: bool,
    },
    /// Start a run, wait for it and download its archive
    Run {
        #[command(flatten)]
        start: StartArgs,
        #[command(flatten)]
        poll: PollArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args, Debug)]
struct StartArgs {
    /// Locust script to upload
    #[arg(short = 'f', long, default_value = "locustfile.py")]
    locustfile: PathBuf,
    /// Target host the load is sent to
    #[arg(long)]
    host: Option<String>,
    /// Number of simulated users
    #[arg(short, long)]
    users: Option<u32>,
    /// Users started per second
    #[arg(short = 'r', long)]
    spawn_rate: Option<f64>,
    /// Test duration, e.g. 10s or 1m30s
    #[arg(short = 't', long)]
    run_time: Option<String>,
}

impl From<StartArgs> for StartRequest {
    fn from(args: StartArgs) -> Self {
        StartRequest {
            locustfile: args.locustfile,
            host: args.host,
            users: args.users,
            spawn_rate: args.spawn_rate,
            run_time: args.run_time,
        }
    }
}

#[derive(Args, Debug)]
struct PollArgs {
    /// Delay between status polls
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    interval: Duration,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Archive path (defaults to downloads/data_<token>.zip)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl OutputArgs {
    fn path_for(&self, token: &RunToken) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            PathBuf::from("downloads").join(format!("data_{token}.zip"))
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let client = TelelocustClient::new(&cli.server)?;

    match cli.command {
        Command::Start(args) => {
            let token = client.start(&args.into()).await?;
            println!("{token}");
        }
        Command::Status { token } => {
            let snapshot = client.status(&parse_token(&token)?).await?;
            print_snapshot(&snapshot)?;
        }
        Command::Wait { token, poll } => {
            let snapshot = client.wait(&parse_token(&token)?, poll.interval).await?;
            print_snapshot(&snapshot)?;
            ensure_finished(&snapshot)?;
        }
        Command::Download {
            token,
            output,
            partial,
        } => {
            let token = parse_token(&token)?;
            let path = output.path_for(&token);
            let bytes = client.download(&token, &path, partial).await?;
            info!(path = %path.display(), bytes, "archive saved");
        }
        Command::Run {
            start,
            poll,
            output,
        } => {
            let token = client.start(&start.into()).await?;
            println!("{token}");

            let snapshot = client.wait(&token, poll.interval).await?;
            print_snapshot(&snapshot)?;

            let path = output.path_for(&token);
            let bytes = client.download(&token, &path, false).await?;
            info!(path = %path.display(), bytes, "archive saved");
            ensure_finished(&snapshot)?;
        }
    }

    Ok(())
}

fn print_snapshot(snapshot: &RunSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)
        .context("failed to render run status")?;
    println!("{json}");
    Ok(())
}

fn ensure_finished(snapshot: &RunSnapshot) -> Result<()> {
    if snapshot.state == RunState::Failed {
        bail!(
            "run {} failed: {}",
            snapshot.token,
            snapshot.diagnostic.as_deref().unwrap_or("no diagnostic")
        );
    }
    Ok(())
}
