mod app;
mod config;

use crate::config::FolioConfig;
use clap::{Parser, Subcommand};
use folio_agent::service::MAX_SESSION_ID_LEN;
use folio_agent::{AskRequest, StreamEvent};
use folio_gateway::GatewayServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "folio", about = "Folio: a portfolio assistant answering from your profile documents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "folio.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Ask a single question and stream the answer to stdout
    Ask {
        question: String,
        /// Continue an existing conversation
        #[arg(long)]
        session_id: Option<String>,
    },
    /// Load profile documents into the vector index
    Ingest {
        /// A single file to ingest
        file: Option<PathBuf>,
        /// Directory searched recursively (repeatable)
        #[arg(short, long = "dir")]
        dirs: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = FolioConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let components = app::build(&config).await?;

            let app = GatewayServer::build(
                components.service,
                components.ingestor,
                config.limits.clone(),
            );
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("Folio gateway listening on {addr}");
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await?;
        }
        Commands::Ask {
            question,
            session_id,
        } => {
            if let Some(id) = &session_id {
                if id.len() > MAX_SESSION_ID_LEN {
                    anyhow::bail!("--session-id must be at most {MAX_SESSION_ID_LEN} bytes");
                }
            }
            let components = app::build(&config).await?;
            let mut request = AskRequest::new(question);
            request.session_id = session_id;

            let mut answer = components.service.ask_stream(request).await;
            let mut stdout = tokio::io::stdout();
            let mut failed = false;
            while let Some(event) = answer.events.recv().await {
                match event {
                    StreamEvent::TextDelta { text } => {
                        stdout.write_all(text.as_bytes()).await?;
                        stdout.flush().await?;
                    }
                    StreamEvent::Error { message } => {
                        failed = true;
                        eprintln!("{message}");
                    }
                    StreamEvent::Done => {}
                }
            }
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
            answer.completion.await?;

            eprintln!(
                "session: {}{}",
                answer.session_id,
                if answer.cached { " (cached)" } else { "" }
            );
            if failed {
                anyhow::bail!("no answer could be generated");
            }
        }
        Commands::Ingest { file, dirs } => {
            let components = app::build(&config).await?;
            let Some(ingestor) = components.ingestor else {
                anyhow::bail!("MILVUS_URI is not set; ingestion needs a vector index");
            };
            let report = ingestor.ingest(file.as_deref(), &dirs).await?;
            println!("Successfully processed {} files.", report.files.len());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
