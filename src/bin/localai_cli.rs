//! localai-cli — 本地文本生成服务命令行工具：补全、流式输出、模型列表与健康检查
//!
//! Usage:
//!   localai-cli [--config <file>] complete <prompt>    One-shot completion
//!   localai-cli [--config <file>] stream <prompt>      Stream fragments to stdout
//!   localai-cli [--config <file>] models               List models reported by the server
//!   localai-cli [--config <file>] health               Check that the server answers

use anyhow::{anyhow, bail, Context, Result};
use futures::StreamExt;
use localai_client::{CompletionOptions, LocalAiClient, LocalAiConfig, ProgressEvent};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    command: Option<String>,
    positional: Vec<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    progress: bool,
}

fn parse_args(raw: &[String]) -> Result<Args> {
    let mut args = Args::default();
    let mut iter = raw.iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| anyhow!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--config" | "-c" => args.config = Some(PathBuf::from(value(arg.as_str())?)),
            "--model" | "-m" => args.model = Some(value(arg.as_str())?),
            "--max-tokens" => {
                let v = value(arg.as_str())?;
                args.max_tokens = Some(v.parse().with_context(|| format!("invalid --max-tokens '{v}'"))?);
            }
            "--temperature" => {
                let v = value(arg.as_str())?;
                args.temperature = Some(v.parse().with_context(|| format!("invalid --temperature '{v}'"))?);
            }
            "--progress" => args.progress = true,
            "--help" | "-h" => args.command = Some("help".into()),
            "--version" | "-V" => args.command = Some("version".into()),
            flag if flag.starts_with("--") => bail!("Unknown option: {flag}"),
            _ if args.command.is_none() => args.command = Some(arg.clone()),
            _ => args.positional.push(arg.clone()),
        }
    }
    Ok(args)
}

fn print_usage() {
    println!(
        r#"localai-cli — 本地文本生成服务命令行工具

USAGE:
    localai-cli [--config <file>] <COMMAND> [OPTIONS]

COMMANDS:
    complete <prompt>       Generate a completion and print it
    stream <prompt>         Stream the completion as it is generated
    models                  List models reported by the server
    health                  Check that the server answers
    version                 Show version information
    help                    Show this help message

OPTIONS:
    -c, --config <file>     YAML or JSON configuration file
    -m, --model <name>      Model to request
    --max-tokens <n>        Maximum tokens to generate
    --temperature <t>       Sampling temperature
    --progress              Print progress events to stderr

ENVIRONMENT:
    LOCALAI_CONFIG          Configuration file used when --config is absent
    LOCALAI_BASE_URL, LOCALAI_API_KEY, LOCALAI_TIMEOUT_MS,
    LOCALAI_MAX_RETRIES, LOCALAI_RETRY_DELAY_MS
                            Override configuration values
    RUST_LOG                Log filter (default: warn)"#
    );
}

fn load_config(args: &Args) -> Result<LocalAiConfig> {
    let path = args
        .config
        .clone()
        .or_else(|| std::env::var_os("LOCALAI_CONFIG").map(PathBuf::from))
        .ok_or_else(|| anyhow!("no configuration file: pass --config <file> or set LOCALAI_CONFIG"))?;
    let config = LocalAiConfig::from_file(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    Ok(config.apply_env_overrides()?)
}

fn completion_options(args: &Args) -> Option<CompletionOptions> {
    if args.model.is_none() && args.max_tokens.is_none() && args.temperature.is_none() {
        return None;
    }
    let mut options = CompletionOptions::new();
    if let Some(m) = &args.model {
        options = options.model(m.clone());
    }
    if let Some(n) = args.max_tokens {
        options = options.max_tokens(n);
    }
    if let Some(t) = args.temperature {
        options = options.temperature(t);
    }
    Some(options)
}

fn prompt(args: &Args) -> Result<String> {
    if args.positional.is_empty() {
        bail!("missing <prompt>");
    }
    Ok(args.positional.join(" "))
}

fn print_progress(event: &ProgressEvent) {
    match (event.attempt, event.max_attempts) {
        (Some(a), Some(m)) => eprintln!(
            "[{:>6}ms] {} {} (attempt {}/{})",
            event.elapsed.as_millis(),
            event.state,
            event.message,
            a,
            m
        ),
        _ => eprintln!(
            "[{:>6}ms] {} {}",
            event.elapsed.as_millis(),
            event.state,
            event.message
        ),
    }
}

async fn run(args: Args) -> Result<()> {
    let command = args.command.clone().unwrap_or_else(|| "help".into());
    match command.as_str() {
        "help" => {
            print_usage();
            return Ok(());
        }
        "version" => {
            println!("localai-cli {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        "complete" | "stream" | "models" | "health" => {}
        other => {
            print_usage();
            bail!("Unknown command: {other}");
        }
    }

    let client = LocalAiClient::new(load_config(&args)?)?;
    if args.progress {
        client.subscribe(Arc::new(print_progress));
    }

    match command.as_str() {
        "complete" => {
            let text = client.complete(prompt(&args)?, completion_options(&args)).await?;
            println!("{text}");
        }
        "stream" => {
            let mut stream = client.stream(prompt(&args)?, completion_options(&args));
            let mut stdout = std::io::stdout();
            while let Some(fragment) = stream.next().await {
                write!(stdout, "{}", fragment?)?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
        "models" => {
            let models = client.list_models().await?;
            if models.is_empty() {
                println!("(no models reported)");
            }
            for m in models {
                println!(
                    "{}\tcontext={}\tstreaming={}",
                    m.id, m.capabilities.max_context_length, m.capabilities.supports_streaming
                );
            }
        }
        "health" => {
            let healthy = client.health_check().await;
            match client.version() {
                Some(v) if healthy => println!("{}: healthy (version {v})", client.provider_name()),
                _ if healthy => println!("{}: healthy", client.provider_name()),
                _ => {
                    println!("{}: unreachable", client.provider_name());
                    client.dispose();
                    std::process::exit(1);
                }
            }
        }
        _ => unreachable!("command validated above"),
    }

    client.dispose();
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let result = match parse_args(&raw) {
        Ok(args) => run(args).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
