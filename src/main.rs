use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nuggetizer_rs::io::{self, NuggetRecord};
use nuggetizer_rs::llm::openai::{LlmClient, LlmClientConfig};
use nuggetizer_rs::metrics::{evaluate_named, judgments_from_records, summarize_mean, JudgmentTable, Metric, MetricConfig};
use nuggetizer_rs::server::{self, Engine};
use nuggetizer_rs::{AssignItem, AssignMode, CancelSignal, NuggetMode, Nuggetizer, NuggetizerConfig, Request};

/// Nugget-based evaluation of generated answers.
#[derive(Parser)]
#[command(name = "nuggetizer", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
    #[arg(long, global = true, default_value = "mistralai/Mistral-7B-Instruct-v0.3")]
    model: String,
    /// OpenAI-compatible endpoint, e.g. a vLLM server.
    #[arg(long, global = true, env = "NUGGETIZER_API_BASE")]
    api_base: Option<String>,
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// JSON pipeline configuration; flags below override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    window_size: Option<usize>,
    #[arg(long, global = true)]
    max_nuggets: Option<usize>,
    /// Queries evaluated concurrently.
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    /// Deadline for a single backend call.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    /// Backend request rate limit.
    #[arg(long, global = true)]
    qps: Option<u32>,
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct Report {
    /// Measure to compute, e.g. `VitalScore(strict=true)`. Repeatable.
    #[arg(long = "measure", default_values_t = ["AllScore".to_string(), "VitalScore".to_string(), "WeightedScore".to_string()])]
    measures: Vec<String>,
    /// Append the mean of each measure under query id `all`.
    #[arg(long)]
    mean: bool,
    /// JSON lines instead of TSV.
    #[arg(long)]
    json: bool,
    /// Leave nuggets with a `failed` label out of the scores.
    #[arg(long)]
    skip_degraded: bool,
    /// Metrics file; stdout when absent.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create and score nuggets for each request (JSONL) into a nugget TSV.
    Create {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        mode: Option<NuggetMode>,
    },
    /// Judge answers (JSONL) against a scored nugget TSV.
    Assign {
        #[arg(long)]
        nuggets: PathBuf,
        #[arg(long)]
        answers: PathBuf,
        /// Requests file used to recover query text missing from the answers.
        #[arg(long)]
        requests: Option<PathBuf>,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        assign_mode: Option<AssignMode>,
    },
    /// Compute metrics from an assigned nugget TSV.
    Score {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "3")]
        assign_mode: AssignMode,
        #[command(flatten)]
        report: Report,
    },
    /// Create, assign and score in one pass.
    Run {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        answers: PathBuf,
        /// Also write the assigned nuggets here.
        #[arg(long)]
        nuggets_output: Option<PathBuf>,
        #[arg(long)]
        assign_mode: Option<AssignMode>,
        #[command(flatten)]
        report: Report,
    },
    /// Serve `POST /nuggets/reward_batch`.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,
    },
}

impl Cli {
    fn pipeline_config(&self) -> Result<NuggetizerConfig> {
        let mut cfg = match &self.config {
            Some(path) => NuggetizerConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => NuggetizerConfig::default(),
        };
        cfg.window_size = self.window_size.or(cfg.window_size);
        cfg.max_nuggets = self.max_nuggets.or(cfg.max_nuggets);
        if let Some(c) = self.concurrency {
            cfg.concurrency = c;
        }
        if let Some(t) = self.timeout_ms {
            cfg.retry.call_timeout_ms = t;
        }
        Ok(cfg)
    }

    fn nuggetizer(&self, cfg: NuggetizerConfig) -> Result<Nuggetizer> {
        let llm = LlmClient::new(LlmClientConfig {
            model: self.model.clone(),
            base_url: self.api_base.clone(),
            api_key: self.api_key.clone(),
            requests_per_second: self.qps,
            timeout_ms: cfg.retry.call_timeout_ms,
            ..LlmClientConfig::default()
        })?;
        info!(model = llm.model(), "backend configured");
        Ok(Nuggetizer::new(Arc::new(llm), cfg)?)
    }
}

fn cancel_on_ctrl_c() -> CancelSignal {
    let (tx, cancel) = CancelSignal::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current windows");
            let _ = tx.send(true);
        }
    });
    cancel
}

async fn create_nuggets(n: &Nuggetizer, requests: &[Request], cancel: &CancelSignal) -> Vec<NuggetRecord> {
    let mut records = Vec::new();
    for (req, res) in requests.iter().zip(n.create_batch(requests, cancel).await) {
        match res {
            Ok(q) => records.extend(q.nuggets.iter().map(|s| NuggetRecord::from_scored(&q.qid, s))),
            Err(e) => error!(qid = %req.query.id, error = %e, "nugget creation failed"),
        }
    }
    records
}

fn assign_items(
    records: &[NuggetRecord],
    answers: &[io::Answer],
    query_text: &HashMap<String, String>,
) -> Result<Vec<AssignItem>> {
    let scored = io::scored_from_records(records)?;
    let mut items = Vec::with_capacity(answers.len());
    let mut seen: HashMap<&str, Option<&str>> = HashMap::new();
    for a in answers {
        if let Some(first) = seen.insert(&a.qid, a.answer_id.as_deref()) {
            bail!(
                "query {} has more than one answer ({} and {}); split them into separate answer files",
                a.qid,
                first.unwrap_or("unnamed"),
                a.answer_id.as_deref().unwrap_or("unnamed"),
            );
        }
        let Some(nuggets) = scored.get(&a.qid) else {
            warn!(qid = %a.qid, "no nuggets for answer, skipping");
            continue;
        };
        let query = a.query.clone().or_else(|| query_text.get(&a.qid).cloned()).unwrap_or_default();
        items.push(AssignItem { qid: a.qid.clone(), query, answer: a.text.clone(), nuggets: nuggets.clone() });
    }
    Ok(items)
}

async fn assign_nuggets(n: &Nuggetizer, items: &[AssignItem], cancel: &CancelSignal) -> Vec<NuggetRecord> {
    let mode = n.config().assign_mode;
    let mut records = Vec::new();
    for (item, res) in items.iter().zip(n.assign_batch(items, cancel).await) {
        match res {
            Ok(q) => records.extend(q.nuggets.iter().map(|a| NuggetRecord::from_assigned(&q.qid, a, mode))),
            Err(e) => error!(qid = %item.qid, error = %e, "nugget assignment failed"),
        }
    }
    records
}

fn report(table: &JudgmentTable, mode: AssignMode, report: &Report) -> Result<()> {
    let names: Vec<&str> = report.measures.iter().map(String::as_str).collect();
    let mut metrics: Vec<Metric> = evaluate_named(table, &names, MetricConfig::for_mode(mode))?;
    metrics.sort_by(|a, b| (&a.query_id, &a.measure).cmp(&(&b.query_id, &b.measure)));
    if report.mean {
        let mean = summarize_mean(&metrics);
        metrics.extend(mean);
    }
    let out: Box<dyn Write> = match &report.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(std::io::stdout().lock()),
    };
    io::write_metrics(out, &metrics, report.json)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "nuggetizer=debug,nuggetizer_rs=debug" } else { "nuggetizer=info,nuggetizer_rs=info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.cmd {
        Cmd::Create { input, output, mode } => {
            let mut cfg = cli.pipeline_config()?;
            if let Some(m) = mode {
                cfg.creator_mode = *m;
            }
            let n = cli.nuggetizer(cfg)?;
            let requests = io::read_requests(input)?;
            let records = create_nuggets(&n, &requests, &cancel_on_ctrl_c()).await;
            io::save_nuggets(output, &records)?;
            info!(queries = requests.len(), nuggets = records.len(), output = %output.display(), "nuggets written");
        }
        Cmd::Assign { nuggets, answers, requests, output, assign_mode } => {
            let mut cfg = cli.pipeline_config()?;
            if let Some(m) = assign_mode {
                cfg.assign_mode = *m;
            }
            let n = cli.nuggetizer(cfg)?;
            let query_text: HashMap<String, String> = match requests {
                Some(p) => io::read_requests(p)?.into_iter().map(|r| (r.query.id, r.query.text)).collect(),
                None => HashMap::new(),
            };
            let items = assign_items(&io::load_nuggets(nuggets)?, &io::read_answers(answers)?, &query_text)?;
            let records = assign_nuggets(&n, &items, &cancel_on_ctrl_c()).await;
            io::save_nuggets(output, &records)?;
            info!(answers = items.len(), nuggets = records.len(), output = %output.display(), "assignments written");
        }
        Cmd::Score { input, assign_mode, report: r } => {
            let records = io::load_nuggets(input)?;
            let table = judgments_from_records(&records, r.skip_degraded)?;
            report(&table, *assign_mode, r)?;
        }
        Cmd::Run { input, answers, nuggets_output, assign_mode, report: r } => {
            let mut cfg = cli.pipeline_config()?;
            if let Some(m) = assign_mode {
                cfg.assign_mode = *m;
            }
            let n = cli.nuggetizer(cfg)?;
            let cancel = cancel_on_ctrl_c();
            let requests = io::read_requests(input)?;
            let query_text = requests.iter().map(|r| (r.query.id.clone(), r.query.text.clone())).collect();
            let created = create_nuggets(&n, &requests, &cancel).await;
            let items = assign_items(&created, &io::read_answers(answers)?, &query_text)?;
            let assigned = assign_nuggets(&n, &items, &cancel).await;
            if let Some(path) = nuggets_output {
                io::save_nuggets(path, &assigned)?;
            }
            report(&judgments_from_records(&assigned, r.skip_degraded)?, n.config().assign_mode, r)?;
        }
        Cmd::Serve { addr } => {
            let n = cli.nuggetizer(cli.pipeline_config()?)?;
            server::run_server(Engine { nuggetizer: Arc::new(n) }, addr).await?;
        }
    }
    Ok(())
}
