use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::FutureExt;
use poolconsole_core::{
    AdminClient, BatchOperation, CompletionClient, Config, QueueStatusPoller, SequentialBatchRunner,
    SingleItemTester,
    http_client::HttpClient,
    model::{ApiKey, BatchProgress, CompletionRequest, CompletionResult, ModelId},
    probe::QueueSource,
    telemetry::{OperationTrace, TelemetrySink, set_telemetry_sink},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Operator console for an account and key pool",
    long_about = None
)]
struct Cli {
    /// Config file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Service base URL, used when no config file is given
    #[arg(long, global = true, default_value = "http://127.0.0.1:5001")]
    base_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a chat completion (prints deltas live, Ctrl-C cancels)
    Chat {
        #[arg(long, default_value = "deepseek-chat")]
        model: ModelId,
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[arg(long, help = "Explicit API key; defaults to the first pool key")]
        key: Option<String>,
        #[arg(long, help = "Run through the admin test endpoint for this account")]
        account: Option<String>,
    },
    /// Test one account
    Test {
        account: String,
        #[arg(long)]
        model: Option<ModelId>,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Validate one account
    Validate { account: String },
    /// Test every account in the pool, one at a time
    TestAll,
    /// Validate every account in the pool, one at a time
    ValidateAll,
    /// Show queue status
    Queue {
        #[arg(long, help = "Keep polling until Ctrl-C")]
        watch: bool,
    },
    /// List pool keys (redacted) and accounts
    Pool,
}

/// Forwards operation records to the log at debug level.
struct LogSink;

impl TelemetrySink for LogSink {
    fn record(&self, trace: OperationTrace) {
        tracing::debug!(target: "poolconsole::trace", ?trace, "operation finished");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
    set_telemetry_sink(Arc::new(LogSink));

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => {
            Config::from_path(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => Config::new(cli.base_url.clone()),
    };
    let http = HttpClient::new(&cfg.http)?;

    match cli.command {
        Commands::Chat {
            model,
            message,
            key,
            account,
        } => {
            let mut client = CompletionClient::new(http.clone(), cfg.base());
            let mut req = match account {
                Some(id) => {
                    client = client.with_probe(Arc::new(AdminClient::from_config(&cfg, http)?));
                    CompletionRequest::for_account(model, message, id)
                }
                None => {
                    client = client.with_pool_keys(pool_keys(&cfg, &http).await);
                    CompletionRequest::direct(model, message)
                }
            };
            if let Some(k) = key {
                req = req.with_api_key(ApiKey::new(k));
            }
            let result = chat(&client, req).await?;
            let code = exit_code(&result);
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Test {
            account,
            model,
            message,
        } => {
            let tester = SingleItemTester::new(Arc::new(AdminClient::from_config(&cfg, http)?));
            let v = tester.test(&account, model, message.as_deref()).await;
            let elapsed = v.elapsed_ms.map(|ms| format!(" ({ms} ms)")).unwrap_or_default();
            println!("{} {}{}", mark(v.success), v.message, elapsed);
        }
        Commands::Validate { account } => {
            let tester = SingleItemTester::new(Arc::new(AdminClient::from_config(&cfg, http)?));
            let v = tester.validate(&account).await;
            println!("{} {}", mark(v.valid), v.message);
        }
        Commands::TestAll => run_batch(&cfg, http, BatchOperation::test_all()).await?,
        Commands::ValidateAll => run_batch(&cfg, http, BatchOperation::Validate).await?,
        Commands::Queue { watch } => {
            let admin = Arc::new(AdminClient::from_config(&cfg, http)?);
            if watch {
                watch_queue(admin, &cfg).await;
            } else {
                let q = admin.queue_status().await?;
                println!("{}/{} available, {} in use", q.available, q.total, q.in_use);
            }
        }
        Commands::Pool => {
            let pool = AdminClient::from_config(&cfg, http)?.fetch_pool().await?;
            println!("keys ({}):", pool.keys.len());
            for key in pool.api_keys() {
                println!("  {}", key.preview());
            }
            println!("accounts ({}):", pool.accounts.len());
            for a in &pool.accounts {
                let token = if a.has_token { "token" } else { "no token" };
                println!("  {} [{}]", a.identifier().unwrap_or("<no identity>"), token);
            }
        }
    }

    Ok(())
}

/// 0 on success or a user cancel, 1 on failure.
fn exit_code(result: &CompletionResult) -> i32 {
    if result.success || result.aborted() {
        0
    } else {
        1
    }
}

fn mark(ok: bool) -> &'static str {
    if ok { "ok  " } else { "FAIL" }
}

/// Local keys from config, else the pool from the admin API when a token is available.
async fn pool_keys(cfg: &Config, http: &HttpClient) -> Vec<ApiKey> {
    let local = cfg.api_keys();
    if !local.is_empty() {
        return local;
    }
    let Ok(admin) = AdminClient::from_config(cfg, http.clone()) else {
        return local;
    };
    match admin.fetch_pool().await {
        Ok(pool) => pool.api_keys(),
        Err(e) => {
            tracing::warn!(error = %e, "could not fetch pool keys");
            local
        }
    }
}

async fn chat(
    client: &CompletionClient,
    req: CompletionRequest,
) -> anyhow::Result<CompletionResult> {
    let handle = client.start(req)?;
    let mut rx = handle.subscribe();
    let mut printed = (0, 0);
    let mut ctrl_c = tokio::signal::ctrl_c().boxed();
    let mut cancelled = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !cancelled => {
                cancelled = true;
                handle.cancel();
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = rx.borrow_and_update().clone();
                print_new(&snap, &mut printed);
                if snap.finished() {
                    break;
                }
            }
        }
    }

    let result = handle.wait().await;
    print_new(&result, &mut printed);
    if printed.1 > 0 {
        println!();
    }
    let elapsed = result.elapsed_ms.map(|ms| format!(", {ms} ms")).unwrap_or_default();
    match (result.aborted(), &result.error_message) {
        (true, _) => eprintln!("[aborted{elapsed}]"),
        (false, Some(msg)) => eprintln!("[error: {msg}{elapsed}]"),
        (false, None) => eprintln!("[done{elapsed}]"),
    }
    Ok(result)
}

/// Print the reasoning (stderr) and content (stdout) added since the last call.
fn print_new(snap: &CompletionResult, printed: &mut (usize, usize)) {
    if let Some(fresh) = snap.reasoning_content.get(printed.0..)
        && !fresh.is_empty()
    {
        eprint!("{fresh}");
        printed.0 = snap.reasoning_content.len();
    }
    if let Some(fresh) = snap.content.get(printed.1..)
        && !fresh.is_empty()
    {
        print!("{fresh}");
        io::stdout().flush().ok();
        printed.1 = snap.content.len();
    }
}

async fn run_batch(cfg: &Config, http: HttpClient, op: BatchOperation) -> anyhow::Result<()> {
    let admin = Arc::new(AdminClient::from_config(cfg, http)?);
    let accounts = admin.fetch_pool().await?.accounts;
    let runner = SequentialBatchRunner::new(SingleItemTester::new(admin));
    let mut rx = runner.subscribe();
    let mut shown = 0;

    let run = runner.run(&accounts, &op);
    tokio::pin!(run);
    let summary = loop {
        tokio::select! {
            res = &mut run => break res?,
            Ok(()) = rx.changed() => print_entries(&rx.borrow_and_update(), &mut shown),
        }
    };
    print_entries(&rx.borrow(), &mut shown);

    match op {
        BatchOperation::Validate => println!("Completed: {summary} valid"),
        BatchOperation::Test { .. } => println!("{summary} available"),
    }
    Ok(())
}

fn print_entries(progress: &BatchProgress, shown: &mut usize) {
    for (i, entry) in progress.results.iter().enumerate().skip(*shown) {
        println!(
            "[{}/{}] {} {}: {}",
            i + 1,
            progress.total,
            mark(entry.success),
            entry.account_id,
            entry.message
        );
    }
    *shown = progress.results.len();
}

async fn watch_queue(admin: Arc<AdminClient>, cfg: &Config) {
    let source: Arc<dyn QueueSource> = admin;
    let poller = QueueStatusPoller::start(source, cfg.poller.interval());
    let mut rx = poller.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(q) = *rx.borrow_and_update() {
                    println!("{}/{} available, {} in use", q.available, q.total, q.in_use);
                }
            }
        }
    }
    poller.stop().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolconsole_core::model::Phase;

    #[test]
    fn cancelled_chat_exits_cleanly() {
        let aborted = CompletionResult {
            content: "partial".into(),
            phase: Phase::Aborted,
            ..Default::default()
        };
        assert_eq!(exit_code(&aborted), 0);

        let errored = CompletionResult {
            phase: Phase::Errored,
            error_message: Some("Request failed".into()),
            ..Default::default()
        };
        assert_eq!(exit_code(&errored), 1);

        let finished = CompletionResult {
            success: true,
            phase: Phase::Finished,
            ..Default::default()
        };
        assert_eq!(exit_code(&finished), 0);
    }
}
