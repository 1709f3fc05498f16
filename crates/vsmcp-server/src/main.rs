use clap::Parser;
use tracing_subscriber::EnvFilter;

use vsmcp_server::ServerConfig;

/// MCP server worker for the vsmcp IDE bridge.
#[derive(Parser, Debug)]
#[command(name = "vsmcp-server", version)]
struct Args {
    /// Pipe name for connecting back to the host IDE process.
    #[arg(long)]
    pipe: String,

    /// Address the MCP endpoint binds to.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port for the MCP endpoint.
    #[arg(long, default_value_t = 5050)]
    port: u16,

    /// Server name displayed to MCP clients.
    #[arg(long, default_value = "vsmcp")]
    name: String,

    /// Minimum log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr: the host relays both output streams into its sink.
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let mut config = ServerConfig::new(args.pipe);
    config.bind_address = args.host;
    config.port = args.port;
    config.display_name = args.name;

    vsmcp_server::run(config).await
}
