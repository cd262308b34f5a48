use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result};
use optimizer_core::optimizer::PromptOptimizer;
use providers::ollama::{OllamaClient, OllamaConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
prompt-optimizer <command> [options]

Commands:
  models                      list configured models
  templates                   list built-in template ids
  optimize [-t ID] <prompt>   optimize a prompt (streams model output)
  analyze <prompt>            structured quality analysis of a prompt

Options:
  -m, --model NAME            select the active model before running
  -t, --template ID           apply a static template instead of the model
";

#[tokio::main]
async fn main() -> ExitCode {
    let _guard = init_logging();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let mut model: Option<String> = None;
    let mut template: Option<String> = None;
    let mut rest: Vec<String> = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-m" | "--model" => {
                model = Some(args.next().context("-m requires a model name")?);
            }
            "-t" | "--template" => {
                template = Some(args.next().context("-t requires a template id")?);
            }
            "-h" | "--help" => {
                print!("{USAGE}");
                return Ok(());
            }
            _ => rest.push(arg),
        }
    }
    let Some(command) = rest.first().cloned() else {
        print!("{USAGE}");
        anyhow::bail!("missing command");
    };
    let prompt = rest[1..].join(" ");
    info!(
        target: "cli",
        "command={command} template={:?} prompt_len={}",
        template,
        prompt.len()
    );

    let client = OllamaClient::new(OllamaConfig::load_or_default())?;
    let mut optimizer = PromptOptimizer::new(client);
    if let Some(name) = &model {
        optimizer.set_model(name)?;
    }

    match command.as_str() {
        "models" => {
            for name in optimizer.list_models() {
                println!("{name}");
            }
        }
        "templates" => {
            for id in optimizer.templates() {
                println!("{id}");
            }
        }
        "optimize" => {
            anyhow::ensure!(!prompt.is_empty(), "optimize requires a prompt");
            let mut stream_out = |fragment: &str| {
                print!("{fragment}");
                let _ = std::io::stdout().flush();
            };
            let optimized = optimizer
                .optimize(&prompt, template.as_deref(), &mut stream_out)
                .await?;
            if template.is_some() {
                // Template application is pure; nothing was streamed.
                println!("{optimized}");
            } else {
                println!();
            }
        }
        "analyze" => {
            anyhow::ensure!(!prompt.is_empty(), "analyze requires a prompt");
            let analysis = optimizer.analyze(&prompt, &mut |_: &str| {}).await?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        other => {
            print!("{USAGE}");
            anyhow::bail!("unknown command: {other}");
        }
    }
    Ok(())
}

fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let base = directories::BaseDirs::new()?;
    let dir = base.data_dir().join("prompt-optimizer").join("logs");
    std::fs::create_dir_all(&dir).ok()?;
    let appender = tracing_appender::rolling::daily(dir, "cli.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}
