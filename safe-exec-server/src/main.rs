use clap::Parser;
use safe_exec::{BackendKind, ServiceConfig};
use safe_exec_server::{create_app, run_server};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// TOML configuration file
    #[arg(short, long, env = "SAFE_EXEC_CONFIG")]
    config: Option<PathBuf>,

    /// Isolation backend: namespace, rlimit, self-limiting or auto
    #[arg(short, long)]
    backend: Option<BackendKind>,

    /// Maximum number of concurrent executions
    #[arg(short, long)]
    max_concurrent: Option<usize>,

    /// Wall-clock limit per execution in seconds
    #[arg(long)]
    wall_clock: Option<u64>,
}

impl Args {
    /// Configuration file (or defaults) with command-line overrides applied
    fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_file(path)?,
            None => ServiceConfig::default(),
        };

        if let Some(backend) = self.backend {
            config = config.with_backend(backend);
        }
        if let Some(max) = self.max_concurrent {
            config = config.with_max_concurrent(max);
        }
        if let Some(secs) = self.wall_clock {
            let limits = config.limits.clone().with_wall_clock(secs);
            config = config.with_limits(limits);
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.service_config()?;

    let app = create_app(&config)?;
    run_server(app, SocketAddr::new(args.host, args.port)).await?;

    Ok(())
}
