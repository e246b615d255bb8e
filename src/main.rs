use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use webtrails::config::Config;
use webtrails::gemini::{GeminiClient, GeminiConfig};
use webtrails::{dashboard, runner, tasks, viewer};

#[derive(Parser)]
#[command(
    name = "webtrails",
    about = "Run LLM-driven browser tasks and review their saved trajectories"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an ad-hoc natural-language task
    Run { task: String },
    /// Run the canned price-comparison task
    Demo,
    /// Audit a site's responsive design across common viewports
    SiteCheck { url: String },
    /// Send one test message to check the model is reachable
    Probe,
    /// List saved runs
    Runs,
    /// Serve the results dashboard
    Dashboard {
        #[arg(long, default_value = "127.0.0.1:7878")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env()?;

    match cli.command {
        Command::Run { task } => run_and_report(&cfg, &task).await?,
        Command::Demo => run_and_report(&cfg, tasks::PRICE_COMPARISON).await?,
        Command::SiteCheck { url } => {
            run_and_report(&cfg, &tasks::responsive_audit(&url)).await?
        }
        Command::Probe => {
            let client = GeminiClient::new(GeminiConfig::from(&cfg))?;
            let reply = client
                .generate("Hi, this is a test message to check API availability.")
                .await?;
            println!("API response: {reply}");
        }
        Command::Runs => {
            let runs = viewer::list_runs(&cfg.results_dir).await?;
            if runs.is_empty() {
                println!("No results found. Run a task first!");
            }
            for run in runs {
                println!("{}", run.id);
            }
        }
        Command::Dashboard { addr } => dashboard::serve(cfg, addr.parse()?).await?,
    }
    Ok(())
}

async fn run_and_report(cfg: &Config, task: &str) -> Result<()> {
    let outcome = runner::run_task(cfg, task).await?;
    println!(
        "Run finished with status {:?} after {} steps; saved to {}",
        outcome.history.status,
        outcome.history.steps.len(),
        outcome.run_dir.display()
    );
    if let Some(result) = &outcome.history.result {
        println!("{result}");
    }
    Ok(())
}
