//! QueryChain CLI entry point.
//!
//! This binary is the composition root. It loads configuration, installs the
//! tracing subscriber, builds the HTTP sender, the optional batching coalescer
//! and the default stage provider, then runs one operation (or several copies
//! of it) and prints each result as JSON on stdout.

mod config;
mod observability;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use batching::BatchCoalescer;
use clap::{Parser, Subcommand, ValueEnum};
use http_transport::HttpTransportSender;
use interceptors::{DefaultInterceptorProvider, PendingResult, QueryClient, TokioCallbackContext};
use pipeline::{
    CachePolicy, Headers, InterceptorChain, JsonCodec, Operation, OperationKind, OperationName,
    OutboundRequest,
};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{CliConfig, LogFormat};

#[derive(Parser, Debug)]
#[command(
    name = "querychain",
    version,
    about = "Run query operations through an interceptor chain"
)]
struct Args {
    /// JSON configuration file.
    #[arg(long, global = true, env = "QUERYCHAIN_CONFIG")]
    config: Option<PathBuf>,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute an operation and print the result.
    Run(RunArgs),
    /// Print the effective configuration.
    PrintConfig,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Endpoint URL; overrides the configuration file.
    #[arg(long, env = "QUERYCHAIN_ENDPOINT")]
    endpoint: Option<String>,

    /// Operation document, or `@path` to read it from a file.
    #[arg(long)]
    query: String,

    #[arg(long, default_value = "Query")]
    operation_name: String,

    /// Variables as a JSON object.
    #[arg(long)]
    variables: Option<String>,

    /// Treat the operation as a mutation; mutations bypass the cache.
    #[arg(long)]
    mutation: bool,

    /// Route the operation through the batching coalescer.
    #[arg(long)]
    batch: bool,

    /// Submit the operation this many times at once.
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    #[arg(long, value_enum, default_value = "network-only")]
    cache_policy: CachePolicyArg,

    /// Extra request header as `name=value`. Repeatable.
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CachePolicyArg {
    NetworkOnly,
    CacheFirst,
    CacheOnly,
    NetworkFirst,
}

impl From<CachePolicyArg> for CachePolicy {
    fn from(arg: CachePolicyArg) -> Self {
        match arg {
            CachePolicyArg::NetworkOnly => Self::NetworkOnly,
            CachePolicyArg::CacheFirst => Self::CacheFirst,
            CachePolicyArg::CacheOnly => Self::CacheOnly,
            CachePolicyArg::NetworkFirst => Self::NetworkFirst,
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name must not be empty".into());
    }
    Ok((name.to_ascii_lowercase(), value.trim().to_owned()))
}

fn read_document(query: &str) -> anyhow::Result<String> {
    match query.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading operation document {path}")),
        None => Ok(query.to_owned()),
    }
}

fn build_operation(args: &RunArgs) -> anyhow::Result<Operation> {
    let name = OperationName::new(args.operation_name.clone())
        .context("operation name must not be empty")?;
    let kind = if args.mutation {
        OperationKind::Mutation
    } else {
        OperationKind::Query
    };
    let mut operation = Operation::new(name, kind, read_document(&args.query)?);
    if let Some(raw) = &args.variables {
        let variables = match serde_json::from_str(raw).context("parsing --variables")? {
            Value::Object(map) => map,
            other => bail!("--variables must be a JSON object, got {other}"),
        };
        operation = operation.with_variables(variables);
    }
    Ok(operation.with_batching(args.batch))
}

async fn wait_all(pending: Vec<PendingResult>) -> Vec<Result<Value, pipeline::PipelineError>> {
    let mut results = Vec::with_capacity(pending.len());
    for p in pending {
        results.push(p.wait().await);
    }
    results
}

async fn run(config: CliConfig, args: RunArgs) -> anyhow::Result<()> {
    let operation = Arc::new(build_operation(&args)?);
    let sender = Arc::new(
        HttpTransportSender::new(&config.transport).context("building HTTP transport")?,
    );
    let codec = Arc::new(JsonCodec);

    let headers: Headers = args.headers.into_iter().collect();
    let mut provider = DefaultInterceptorProvider::new(sender.clone(), codec.clone())
        .with_headers(headers)
        .with_retry(config.retry);
    let coalescer = if args.batch {
        let coalescer = BatchCoalescer::new(config.batch.clone(), sender, codec);
        coalescer.start().context("starting batch coalescer")?;
        provider = provider.with_batching(coalescer.clone());
        Some(coalescer)
    } else {
        None
    };
    let context = TokioCallbackContext::current().context("no Tokio runtime")?;
    let client = QueryClient::new(Arc::new(provider)).with_context(Arc::new(context));

    info!(
        operation = %operation.name(),
        endpoint = %config.transport.endpoint,
        repeat = args.repeat,
        batch = args.batch,
        "submitting operation"
    );
    let policy = CachePolicy::from(args.cache_policy);
    let pending: Vec<PendingResult> = (0..args.repeat)
        .map(|_| client.submit(OutboundRequest::new(operation.clone()).with_cache_policy(policy)))
        .collect();
    let chains: Vec<InterceptorChain> = pending.iter().map(|p| p.chain().clone()).collect();

    let results = tokio::select! {
        results = wait_all(pending) => results,
        _ = tokio::signal::ctrl_c() => {
            warn!(operations = chains.len(), "interrupted; cancelling");
            chains.iter().for_each(InterceptorChain::cancel);
            if let Some(coalescer) = &coalescer {
                coalescer.stop();
            }
            return Err(anyhow!("interrupted"));
        }
    };
    if let Some(coalescer) = &coalescer {
        coalescer.stop();
    }

    let total = results.len();
    let mut failed = 0;
    for result in results {
        match result {
            Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            Err(err) => {
                failed += 1;
                error!(error = %err, "operation failed");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {total} operations failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    if let Some(format) = args.log_format {
        config.log.format = format;
    }
    observability::init(&config.log);

    match args.cmd {
        Command::Run(run_args) => {
            if let Some(endpoint) = &run_args.endpoint {
                config.transport.endpoint = endpoint.clone();
            }
            run(config, run_args).await
        }
        Command::PrintConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
