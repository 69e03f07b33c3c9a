use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, ValueEnum};
use log::{error, info};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use calendly_mcp::calendly::CalendlyClient;
use calendly_mcp::config::{self, Credentials};
use calendly_mcp::mcp::McpServer;
use calendly_mcp::tools::CalendlyTools;
use calendly_mcp::transport;

/// How the MCP host talks to this server
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// JSON-RPC lines over stdin/stdout
    Stdio,
    /// HTTP with server-sent events
    Sse,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Mode::Stdio => "stdio",
            Mode::Sse => "sse",
        }
    }
}

/// MCP server for Calendly event types and booking links
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// Transport to serve
    #[clap(value_enum, default_value = "stdio")]
    mode: Mode,

    /// Path to config file
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    /// Listen address for sse mode, overrides the config file
    #[clap(long)]
    bind: Option<String>,
}

/// Log to stderr; stdout belongs to the stdio transport.
fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();

    let args = Args::parse();
    info!(
        "calendly_mcp v{} starting in {} mode",
        env!("CARGO_PKG_VERSION"),
        args.mode.as_str()
    );

    if let Err(e) = run(args).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = config::resolve_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let credentials = Credentials::from_env(&config.calendly.token_env);
    info!(
        "{} present: {}",
        config.calendly.token_env,
        credentials.is_present()
    );

    let client = CalendlyClient::new(&config.calendly).context("Failed to create Calendly client")?;
    let tools = CalendlyTools::new(client, credentials).context("Failed to register tools")?;
    let server = Arc::new(McpServer::new(tools));

    match args.mode {
        Mode::Stdio => transport::serve_stdio(server).await,
        Mode::Sse => transport::serve_sse(server, &config.server.bind).await,
    }
}
