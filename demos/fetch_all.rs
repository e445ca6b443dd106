use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use mailmeta::{FetchConfig, FetchConfigBuilder, Runner, Telemetry};
use tokio::task::JoinHandle;
use tokio::time::sleep;

const DEFAULT_API_URL: &str = "https://gmail.googleapis.com";
const DEFAULT_USER_ID: &str = "me";
const DEFAULT_WORKERS: usize = 8;
const DEFAULT_MAX_RESULTS: usize = 100;
const DEFAULT_COOLDOWN_SECS: u64 = 10;
const DEFAULT_LOG_DIRECTIVE: &str = "warn";

#[tokio::main]
async fn main() -> Result<()> {
    init_example_tracing();

    let args = ExampleArgs::from_env()?;
    let bar = build_progress_bar();
    bar.println(format!(
        "Fetching up to {} messages for {} with {} workers",
        args.max_results, args.user_id, args.workers
    ));

    let config = args.to_fetch_config()?;
    let runner = Runner::new(config)?;
    let progress = spawn_progress_updater(runner.telemetry(), bar.clone());
    let started = Instant::now();

    let result = runner.run_until_ctrl_c().await;
    progress.abort();

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            bar.finish_with_message("run aborted");
            return Err(err);
        }
    };

    let message = if report.summary.cancelled {
        "stopped early"
    } else {
        "done"
    };
    bar.set_position(report.records.len() as u64);
    bar.finish_with_message(message);

    let seconds = started.elapsed().as_secs_f64();
    let rate = if seconds > 0.0 {
        report.records.len() as f64 / seconds
    } else {
        0.0
    };
    bar.println(format!(
        "Fetched {} records in {:.2}s [{:.2} msg/s]; {} failures, {} retries, {} abandoned",
        report.records.len(),
        seconds,
        rate,
        report.summary.failures,
        report.summary.handoffs,
        report.summary.abandoned(),
    ));
    if let Some(path) = &args.output_path {
        bar.println(format!("Records appended to {path}"));
    }

    Ok(())
}

fn init_example_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    mailmeta::init_tracing();
}

fn build_progress_bar() -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(1), ProgressDrawTarget::stdout_with_hz(12));
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} messages ({per_sec:.2} msg/s) {msg}",
    )
    .expect("valid progress bar template")
    .progress_chars("=>-");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn spawn_progress_updater(telemetry: Arc<Telemetry>, bar: ProgressBar) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let snapshot = telemetry.snapshot();
            bar.set_length(snapshot.listed_refs.max(1));
            bar.set_position(snapshot.fetched_records);
            if snapshot.retry_handoffs > 0 {
                bar.set_message(format!("{} retries", snapshot.retry_handoffs));
            }
            sleep(Duration::from_millis(200)).await;
        }
    })
}

struct ExampleArgs {
    api_url: String,
    access_token: String,
    user_id: String,
    workers: usize,
    max_results: usize,
    cooldown_secs: u64,
    query: String,
    output_path: Option<String>,
}

impl ExampleArgs {
    fn from_env() -> Result<Self> {
        let api_url = read_env_or_default("MAILMETA_API_URL", DEFAULT_API_URL);
        let access_token = env::var("MAILMETA_ACCESS_TOKEN")
            .context("MAILMETA_ACCESS_TOKEN must hold an OAuth access token")?;
        let user_id = read_env_or_default("MAILMETA_USER_ID", DEFAULT_USER_ID);
        let workers = parse_env_with_default::<usize>("MAILMETA_WORKERS", DEFAULT_WORKERS)?;
        let max_results =
            parse_env_with_default::<usize>("MAILMETA_MAX_RESULTS", DEFAULT_MAX_RESULTS)?;
        let cooldown_secs =
            parse_env_with_default::<u64>("MAILMETA_COOLDOWN_SECS", DEFAULT_COOLDOWN_SECS)?;
        let query = read_env_or_default("MAILMETA_QUERY", "");
        let output_path = env::var("MAILMETA_OUTPUT")
            .ok()
            .filter(|value| !value.trim().is_empty());

        ensure!(workers > 0, "MAILMETA_WORKERS must be greater than 0");
        ensure!(max_results > 0, "MAILMETA_MAX_RESULTS must be greater than 0");
        ensure!(cooldown_secs > 0, "MAILMETA_COOLDOWN_SECS must be greater than 0");

        Ok(Self {
            api_url,
            access_token,
            user_id,
            workers,
            max_results,
            cooldown_secs,
            query,
            output_path,
        })
    }

    fn to_fetch_config(&self) -> Result<FetchConfig> {
        let mut builder = FetchConfigBuilder::default()
            .api_base_url(self.api_url.clone())
            .access_token(self.access_token.clone())
            .user_id(self.user_id.clone())
            .worker_count(self.workers)
            .max_results(self.max_results)
            .failure_cooldown(Duration::from_secs(self.cooldown_secs))
            .query(self.query.clone());
        if let Some(path) = &self.output_path {
            builder = builder.output_path(path);
        }
        builder.build()
    }
}

fn read_env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}
