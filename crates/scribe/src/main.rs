//! scribe - Offline-resilient client for credit-metered content generation

mod output;
mod probe;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use probe::HttpProbe;
use scribe_core::remote::http::HttpPlatformClient;
use scribe_core::remote::{BalanceClient, CheckoutClient, GenerationClient};
use scribe_core::{
    ConnectivityMonitor, CreditLedger, GenerationInput, GenerationOrchestrator, IdentityRef,
    LedgerError, PipelineError, PipelineEvent, PurchaseFlowBridge, ReachabilitySource,
    RequestQueue, ScribeConfig, SubmitOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Interval between reachability probes while the process is alive
const PROBE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "scribe",
    version,
    about = "Offline-resilient client for credit-metered content generation",
    long_about = "Generates content through the platform's metered generation API.\n\
                  \n\
                  Every generation spends one prepaid credit. Submissions are gated in\n\
                  order: sign-in, then credit balance, then connectivity. When offline,\n\
                  the newest request is parked and sent automatically once the network\n\
                  returns; when credits run out, a checkout flow tops the balance up.\n\
                  \n\
                  Examples:\n\
                    scribe login tok_123                 # Store the identity token\n\
                    scribe generate \"a post about rust\"  # Generate (1 credit)\n\
                    scribe generate \"weekly update\" -t blog --param tone=casual\n\
                    scribe balance                       # Remaining credits\n\
                    scribe buy                           # Open the checkout page\n\
                    scribe status --json                 # Pipeline state, for scripts\n\
                  \n\
                  Environment Variables:\n\
                    SCRIBE_CONFIG                        # Override config file path\n\
                    SCRIBE_API_URL                       # Override platform API URL\n\
                    SCRIBE_IDENTITY                      # Override identity token"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (default: <config_dir>/scribe/config.toml)
    #[arg(long, env = "SCRIBE_CONFIG")]
    config: Option<PathBuf>,

    /// Platform API base URL
    #[arg(long, env = "SCRIBE_API_URL")]
    api_url: Option<String>,

    /// Identity token (overrides the stored one)
    #[arg(long, env = "SCRIBE_IDENTITY")]
    identity: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate content from a prompt (spends one credit)
    Generate {
        /// What to generate
        prompt: String,

        /// Template / content category
        #[arg(long, short = 't')]
        template: Option<String>,

        /// Auxiliary parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// When offline, exit instead of parking the request
        #[arg(long)]
        no_wait: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the remaining credit balance
    Balance {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Buy the credit bundle (opens the provider's checkout page)
    Buy {
        /// Print the checkout URL instead of opening a browser
        #[arg(long)]
        no_open: bool,
    },
    /// Show pipeline status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Store the identity token used for platform calls
    Login {
        /// Identity token issued by the platform
        identity: String,
    },
    /// Forget the stored identity token
    Logout,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => ScribeConfig::default_path()?,
    };
    let mut config = ScribeConfig::load(&config_path);
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }
    if let Some(identity) = cli.identity {
        config.identity = Some(identity);
    }

    // Login/logout only touch the config file, no pipeline needed
    match &cli.command {
        Command::Login { identity } => {
            config.identity = Some(identity.clone());
            config.save(&config_path)?;
            println!("Signed in.");
            return Ok(());
        }
        Command::Logout => {
            config.identity = None;
            config.save(&config_path)?;
            println!("Signed out.");
            return Ok(());
        }
        _ => {}
    }

    let (orchestrator, monitor) = build_pipeline(&config).await?;

    let result = match cli.command {
        Command::Generate {
            prompt,
            template,
            params,
            no_wait,
            json,
        } => run_generate(&orchestrator, prompt, template, params, no_wait, json).await,
        Command::Balance { json } => run_balance(&orchestrator, json).await,
        Command::Buy { no_open } => run_buy(&orchestrator, no_open).await,
        Command::Status { json } => run_status(&orchestrator, &monitor, json).await,
        Command::Login { .. } | Command::Logout => unreachable!("handled above"),
    };

    orchestrator.shutdown().await;
    monitor.stop().await;
    result
}

async fn build_pipeline(
    config: &ScribeConfig,
) -> Result<(Arc<GenerationOrchestrator>, Arc<ConnectivityMonitor>)> {
    let client = Arc::new(
        HttpPlatformClient::new(&config.api_base_url, config.request_timeout())
            .context("Failed to build platform client")?,
    );

    let probe = HttpProbe::detect(&config.api_base_url, config.request_timeout(), PROBE_INTERVAL)
        .await
        .context("Failed to build reachability probe")?;
    let monitor = Arc::new(ConnectivityMonitor::new(probe.initial_state()));

    let ledger = CreditLedger::new(Arc::clone(&client) as Arc<dyn BalanceClient>);
    let checkout = PurchaseFlowBridge::new(
        Arc::clone(&client) as Arc<dyn CheckoutClient>,
        config.bundle.clone(),
    );

    let orchestrator = Arc::new(GenerationOrchestrator::new(
        config.identity.clone().map(IdentityRef::new),
        Arc::clone(&client) as Arc<dyn GenerationClient>,
        ledger,
        RequestQueue::new(),
        checkout,
        Arc::clone(&monitor),
    ));
    Arc::clone(&orchestrator).start();
    Arc::clone(&monitor).start(probe.with_suspect_events(orchestrator.events().subscribe()));

    Ok((orchestrator, monitor))
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .expect("static template"),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Best-effort balance sync before gating. Unreachable balance service is
/// non-fatal: gating proceeds on the last-known (or never-loaded) value.
async fn sync_ledger(orchestrator: &GenerationOrchestrator) {
    match orchestrator
        .ledger()
        .load(orchestrator.identity().as_ref())
        .await
    {
        Ok(_) | Err(LedgerError::NotAuthenticated) => {}
        Err(LedgerError::RemoteUnavailable { message }) => {
            eprintln!("warning: balance service unreachable ({message}); using last-known balance");
        }
    }
}

async fn run_generate(
    orchestrator: &Arc<GenerationOrchestrator>,
    prompt: String,
    template: Option<String>,
    params: Vec<(String, String)>,
    no_wait: bool,
    json: bool,
) -> Result<()> {
    sync_ledger(orchestrator).await;

    let mut input = GenerationInput::new(prompt);
    if let Some(template) = template {
        input = input.with_template(template);
    }
    for (key, value) in params {
        input = input.with_param(key, serde_json::Value::String(value));
    }

    let mut events = orchestrator.events().subscribe();
    let bar = (!json).then(|| spinner("Generating..."));

    match orchestrator.submit(input).await {
        Ok(SubmitOutcome::Completed(receipt)) => {
            if let Some(ref bar) = bar {
                bar.finish_and_clear();
            }
            println!("{}", output::format_receipt(&receipt, json));
            Ok(())
        }
        Ok(SubmitOutcome::Queued { displaced }) => {
            if let Some(previous) = displaced {
                eprintln!(
                    "Replaced request parked at {} with this one.",
                    previous.enqueued_at.to_rfc3339()
                );
            }
            if no_wait {
                if let Some(ref bar) = bar {
                    bar.finish_and_clear();
                }
                bail!("offline - request not sent (--no-wait)");
            }
            if let Some(ref bar) = bar {
                bar.set_message("Offline - waiting for the network to come back...");
            }
            wait_for_replay(orchestrator, &mut events, bar, json).await
        }
        Err(error) => {
            if let Some(ref bar) = bar {
                bar.finish_and_clear();
            }
            fail_attempt(orchestrator, error)
        }
    }
}

/// Block until the parked request is replayed and finished.
async fn wait_for_replay(
    orchestrator: &Arc<GenerationOrchestrator>,
    events: &mut tokio::sync::broadcast::Receiver<PipelineEvent>,
    bar: Option<ProgressBar>,
    json: bool,
) -> Result<()> {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                bail!("pipeline event stream closed while waiting")
            }
        };

        match event {
            PipelineEvent::ReplayStarted => {
                if let Some(ref bar) = bar {
                    bar.set_message("Back online - sending...");
                }
            }
            PipelineEvent::AttemptFinished(Ok(_)) => {
                if let Some(ref bar) = bar {
                    bar.finish_and_clear();
                }
                // The receipt (with any remaining-credit figure) is retained
                // by the orchestrator
                match orchestrator.last_result() {
                    Some(Ok(receipt)) => {
                        println!("{}", output::format_receipt(&receipt, json));
                        return Ok(());
                    }
                    _ => bail!("attempt finished but no result was retained"),
                }
            }
            PipelineEvent::AttemptFinished(Err(error)) => {
                if let Some(ref bar) = bar {
                    bar.finish_and_clear();
                }
                return fail_attempt(orchestrator, error);
            }
            _ => {}
        }
    }
}

fn fail_attempt(orchestrator: &Arc<GenerationOrchestrator>, error: PipelineError) -> Result<()> {
    match &error {
        PipelineError::CreditExhausted => {
            eprintln!("{}", output::format_offer(orchestrator.checkout().bundle()));
        }
        PipelineError::NotAuthenticated => {
            eprintln!("Run `scribe login <token>` first.");
        }
        _ => {}
    }
    Err(error.into())
}

async fn run_balance(orchestrator: &Arc<GenerationOrchestrator>, json: bool) -> Result<()> {
    match orchestrator
        .ledger()
        .load(orchestrator.identity().as_ref())
        .await
    {
        Ok(_) => {}
        Err(LedgerError::NotAuthenticated) => {
            bail!("not signed in - run `scribe login <token>` first")
        }
        Err(LedgerError::RemoteUnavailable { message }) => {
            eprintln!("warning: balance service unreachable ({message}); showing last-known value");
        }
    }

    println!(
        "{}",
        output::format_balance(
            orchestrator.ledger().balance(),
            orchestrator.ledger().last_synced_at(),
            json
        )
    );
    Ok(())
}

async fn run_buy(orchestrator: &Arc<GenerationOrchestrator>, no_open: bool) -> Result<()> {
    let bundle = orchestrator.checkout().bundle().clone();
    eprintln!(
        "Creating checkout session for {} ({} credits)...",
        bundle.line_item_label, bundle.quantity
    );

    let session = orchestrator
        .checkout()
        .create_session(orchestrator.identity().as_ref())
        .await?;

    if no_open || open::that(&session.redirect_url).is_err() {
        println!("{}", session.redirect_url);
    } else {
        println!("Opened checkout in your browser: {}", session.redirect_url);
    }
    Ok(())
}

async fn run_status(
    orchestrator: &Arc<GenerationOrchestrator>,
    monitor: &Arc<ConnectivityMonitor>,
    json: bool,
) -> Result<()> {
    sync_ledger(orchestrator).await;

    println!(
        "{}",
        output::format_status(
            orchestrator.identity().is_some(),
            orchestrator.ledger().balance(),
            orchestrator.ledger().last_synced_at(),
            monitor.current_state(),
            orchestrator.state(),
            orchestrator.queue().is_occupied(),
            orchestrator.can_submit(),
            json,
        )
    );
    Ok(())
}
