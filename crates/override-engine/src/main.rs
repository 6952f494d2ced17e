//! Override engine CLI
//!
//! Usage:
//!   override-engine validate <rules>
//!   override-engine resolve <rules> --url <url> [--method <method>]
//!   override-engine fetch <rules> <url> [--method <method>] [--data <body>] [--header K:V]
//!   override-engine example-rules [--format json|yaml]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use override_engine::transport::{FetchRequest, ReqwestFetch};
use override_engine::{InstallOutcome, InterceptedRequest, PageContext, RuleFile, RuleSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Rule-driven HTTP response overrides
#[derive(Parser, Debug)]
#[command(name = "override-engine")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info", env = "OVERRIDE_ENGINE_LOG", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse and validate a rule file
    Validate {
        /// Rule file (.json, .yaml or .yml)
        rules: PathBuf,
    },
    /// Show which rule a call would resolve to
    Resolve {
        rules: PathBuf,
        #[arg(short, long)]
        url: String,
        #[arg(short, long)]
        method: Option<String>,
    },
    /// Perform a fetch through an intercepted page
    Fetch {
        rules: PathBuf,
        url: String,
        #[arg(short, long)]
        method: Option<String>,
        /// Request body
        #[arg(short, long)]
        data: Option<String>,
        /// Request header as `Name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// Print a sample rule file
    ExampleRules {
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }

    match args.command {
        Command::Validate { rules } => validate(&rules),
        Command::Resolve { rules, url, method } => resolve(&rules, &url, method.as_deref()),
        Command::Fetch {
            rules,
            url,
            method,
            data,
            headers,
        } => fetch(&rules, url, method, data, &headers).await,
        Command::ExampleRules { format } => {
            let example = RuleFile::example();
            let text = match format {
                OutputFormat::Json => example.to_json()?,
                OutputFormat::Yaml => example.to_yaml()?,
            };
            println!("{text}");
            Ok(())
        }
    }
}

fn load(path: &Path) -> Result<RuleFile> {
    RuleFile::load(path).with_context(|| format!("Failed to load rules from {}", path.display()))
}

fn validate(path: &Path) -> Result<()> {
    let file = load(path)?;
    let (set, diagnostics) = RuleSet::compile(file.rules, file.enabled);
    for diagnostic in &diagnostics {
        println!(
            "rule {} ({}): {}",
            diagnostic.rule_id, diagnostic.rule_name, diagnostic.message
        );
    }
    println!(
        "{} rule(s), {} with matcher errors, overrides {}",
        set.len(),
        diagnostics.len(),
        if set.is_enabled() { "enabled" } else { "disabled" }
    );
    if !diagnostics.is_empty() {
        bail!("{} rule(s) have invalid matchers", diagnostics.len());
    }
    Ok(())
}

fn resolve(path: &Path, url: &str, method: Option<&str>) -> Result<()> {
    let file = load(path)?;
    let (set, _) = RuleSet::compile(file.rules, file.enabled);
    let request = InterceptedRequest::new(url, method);
    match set.resolve(&request) {
        Some(compiled) => println!(
            "{} {} -> {} ({}): {}",
            request.method,
            request.url,
            compiled.rule.id,
            compiled.rule.name,
            compiled.rule.action.kind()
        ),
        None => println!("{} {} -> no match", request.method, request.url),
    }
    Ok(())
}

async fn fetch(
    path: &Path,
    url: String,
    method: Option<String>,
    data: Option<String>,
    headers: &[String],
) -> Result<()> {
    let file = load(path)?;
    let page = PageContext::builder(Arc::new(ReqwestFetch::new()))
        .settings(file.settings.clone())
        .build();
    page.registry().refresh(file.rules, file.enabled);
    if page.install() == InstallOutcome::Skipped {
        info!("No active rules; requests go straight to the network");
    }

    let mut request = FetchRequest::new(url);
    if let Some(method) = method {
        request = request.method(method);
    }
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Header must be `Name: value`, got {header:?}"))?;
        request = request.header(name.trim(), value.trim());
    }
    if let Some(data) = data {
        request = request.body(data);
    }

    let response = page.fetch(request).await.context("Fetch failed")?;
    println!("{} {}", response.status, response.status_text);
    for (name, value) in &response.headers {
        println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    println!();
    println!("{}", response.text());
    Ok(())
}
