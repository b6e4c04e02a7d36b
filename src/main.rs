//! airelay - streaming relay between browser clients and an LLM provider
//!
//! Runs the gateway, validates its configuration, and offers `chat` and
//! `quiz` commands that talk to a running gateway.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use airelay::client::{AiSession, GatewayClient, SessionPhase};
use airelay::config::Config;
use airelay::gateway::{run_server, ChatRequest, Feature, QuizReply};

#[derive(Parser)]
#[command(name = "airelay")]
#[command(about = "Streaming relay between browser clients and an LLM provider")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Path to configuration file (environment only when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration and show the resolved feature settings
    Check {
        /// Path to configuration file (environment only when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Stream a reply from a running gateway
    Chat {
        /// Gateway base URL
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        gateway: String,

        /// Streaming feature to call (chat or plan)
        #[arg(short, long, default_value = "chat")]
        feature: Feature,

        /// System prompt replacing the feature default
        #[arg(short, long)]
        system: Option<String>,

        /// Message to send
        message: String,
    },

    /// Generate a quiz through a running gateway
    Quiz {
        /// Gateway base URL
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        gateway: String,

        /// System prompt replacing the quiz default
        #[arg(short, long)]
        system: Option<String>,

        /// Topic prompt
        message: String,
    },
}

fn build_request(message: String, system: Option<String>) -> ChatRequest {
    let request = ChatRequest::user(message);
    match system {
        Some(prompt) => request.with_system_prompt(prompt),
        None => request,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "airelay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            tracing::info!(config = ?config, "Loading configuration");
            let (mut config, key_source) = Config::load(config.as_deref())?;
            tracing::info!(key_source = %key_source, base_url = %config.upstream.base_url, "Configuration loaded");

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            run_server(config).await
        }

        Commands::Check { config } => {
            let (config, key_source) = Config::load(config.as_deref())?;
            println!("listen:      {}", config.server.listen);
            println!("upstream:    {}", config.completions_url());
            println!("credential:  {}", key_source);
            for feature in Feature::ALL {
                let settings = config.settings(feature);
                println!(
                    "{:<5} model={} stream={} max_tokens={} temperature={}",
                    feature.as_str(),
                    settings.model,
                    settings.stream,
                    settings.max_tokens,
                    settings.temperature
                );
            }
            Ok(())
        }

        Commands::Chat {
            gateway,
            feature,
            system,
            message,
        } => {
            if !feature.streams() {
                anyhow::bail!("'{}' is not a streaming feature, use the quiz command", feature);
            }

            let mut session = AiSession::new(GatewayClient::new(gateway));
            let abort = session.abort_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    abort.cancel();
                }
            });

            let request = build_request(message, system);
            let mut stdout = std::io::stdout();
            let outcome = session
                .stream_response_with(feature, &request, |text| {
                    let _ = write!(stdout, "{}", text);
                    let _ = stdout.flush();
                })
                .await?;
            println!();

            if session.phase() == SessionPhase::ErroredDone {
                tracing::warn!(outcome = ?outcome, "Reply may be truncated");
            }
            Ok(())
        }

        Commands::Quiz {
            gateway,
            system,
            message,
        } => {
            let client = GatewayClient::new(gateway);
            let reply = client.call_quiz(&build_request(message, system)).await?;
            match &reply {
                QuizReply::Quiz(value) => {
                    if reply.payload().is_none() {
                        tracing::warn!("Quiz does not match the expected five-question schema");
                    }
                    println!("{}", serde_json::to_string_pretty(value)?);
                }
                QuizReply::Content(text) => println!("{}", text),
            }
            Ok(())
        }
    }
}
