use std::path::PathBuf;
use std::sync::Arc;

use aeon::attachment::Attachment;
use aeon::chat;
use aeon::dispatcher::Dispatcher;
use aeon::llm_interaction::{ModelConfig, ModelDispatcher};
use aeon::session::ChatSession;
use aeon::web_server::{self, ActionRequest, ServerConfig};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the AeonAI web UI.
    Serve {
        #[arg(long, env = "AEON_PORT", default_value_t = 9900, help = "Port for the web server.")]
        port: u16,
        #[arg(long, default_value = "templates", help = "Directory holding index.html.")]
        templates: PathBuf,
        #[arg(long, default_value = "static", help = "Directory served under /static.")]
        static_dir: PathBuf,
    },
    /// Chat with AeonAI in the terminal.
    Chat,
    /// Send a single prompt and print the JSON reply.
    Ask {
        #[arg(help = "The prompt to send.")]
        prompt: String,
        #[arg(long, help = "File to attach (image, PDF, .txt or .md).")]
        attach: Option<PathBuf>,
    },
}

fn build_dispatcher() -> Result<Arc<dyn Dispatcher>> {
    let dispatcher = ModelDispatcher::new(ModelConfig::from_env()).context("Failed to build model client")?;
    Ok(Arc::new(dispatcher))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (API keys)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g. RUST_LOG=info,aeon=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("AeonAI starting with command: {:?}", cli.command);

    match cli.command {
        Commands::Serve {
            port,
            templates,
            static_dir,
        } => {
            let dispatcher = build_dispatcher()?;
            let config = ServerConfig {
                port,
                templates_dir: templates,
                static_dir,
            };
            let mut web_server_handle = tokio::spawn(async move {
                if let Err(e) = web_server::start_web_server(config, dispatcher).await {
                    error!("Web server failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, initiating shutdown...");
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed unexpectedly."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !web_server_handle.is_finished() {
                info!("Aborting web server task...");
                web_server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Chat => {
            let mut session = ChatSession::new(build_dispatcher()?);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut stdout = std::io::stdout();
            chat::run_chat(&mut session, stdin, &mut stdout)
                .await
                .context("Chat session failed")?;
        }
        Commands::Ask { prompt, attach } => {
            let attachment = match attach {
                Some(path) => {
                    let att = Attachment::from_path(&path)
                        .with_context(|| format!("Failed to attach {}", path.display()))?;
                    Some(att.to_data_uri())
                }
                None => None,
            };
            let dispatcher = build_dispatcher()?;
            let response = web_server::respond(dispatcher.as_ref(), ActionRequest { prompt, attachment }).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
