use std::path::PathBuf;

use clap::Parser;
use llama_cli::{chat, count, demo_model, generate, template, SamplingArgs, SessionArgs};
use llama_runtime::{EngineConfig, NativeEngine, TracingTelemetry};
use tracing_subscriber::EnvFilter;

/// llama-textgen: text generation over GGUF models
#[derive(Parser)]
#[command(name = "llama-cli")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Continue a raw text prompt.
    Generate {
        #[command(flatten)]
        session: SessionArgs,

        /// Input prompt text.
        #[arg(short, long)]
        prompt: String,

        #[command(flatten)]
        sampling: SamplingArgs,
    },
    /// Reply to a single user message through the model's chat template.
    Chat {
        #[command(flatten)]
        session: SessionArgs,

        /// User message.
        #[arg(long)]
        message: String,

        /// Optional system prompt.
        #[arg(long)]
        system: Option<String>,

        #[command(flatten)]
        sampling: SamplingArgs,
    },
    /// Count the tokens of a prompt in a fresh session.
    Count {
        #[command(flatten)]
        session: SessionArgs,

        #[arg(short, long)]
        prompt: String,
    },
    /// Print the chat-templated prompt for a message.
    Template {
        #[command(flatten)]
        session: SessionArgs,

        #[arg(long)]
        message: String,

        #[arg(long)]
        system: Option<String>,
    },
    /// Write the tiny deterministic demo model.
    DemoModel {
        /// Output path.
        #[arg(short, long, default_value = "tiny.gguf")]
        output: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let engine = NativeEngine::new(EngineConfig::default().with_telemetry(TracingTelemetry));

    let result = match cli.command {
        Command::Generate {
            session,
            prompt,
            sampling,
        } => generate(&engine, &session, &prompt, &sampling),
        Command::Chat {
            session,
            message,
            system,
            sampling,
        } => chat(&engine, &session, system.as_deref(), &message, &sampling),
        Command::Count { session, prompt } => {
            count(&engine, &session, &prompt).map(|n| n.to_string())
        }
        Command::Template {
            session,
            message,
            system,
        } => template(&engine, &session, system.as_deref(), &message),
        Command::DemoModel { output } => {
            demo_model(&output).map(|()| format!("wrote {}", output.display()))
        }
    };

    match result {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
