//! Standalone INDI server

use anyhow::{Context, bail};
use clap::Parser;
use indi::server::{IndiServer, ServerConfig};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(author, version, about = "INDI server routing drivers and clients", long_about = None)]
struct Cli {
    /// TCP port to listen on
    #[arg(short, long, env = "INDI_PORT", default_value_t = indi::DEFAULT_PORT)]
    port: u16,

    /// Driver executable to start; may be repeated
    #[arg(long = "native", value_name = "PATH")]
    native: Vec<PathBuf>,

    /// Remote INDI server whose devices are served too; may be repeated
    #[arg(long = "remote", value_name = "HOST:PORT")]
    remote: Vec<String>,
}

fn parse_remote(address: &str) -> anyhow::Result<(String, u16)> {
    let Some((host, port)) = address.rsplit_once(':') else {
        bail!("Remote server must be given as HOST:PORT, got {}", address);
    };
    if host.is_empty() {
        bail!("Missing host in {}", address);
    }
    let port = port
        .parse()
        .with_context(|| format!("Invalid port in {}", address))?;
    Ok((host.to_string(), port))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let server = IndiServer::new(ServerConfig::default().with_port(cli.port));

    for path in &cli.native {
        server
            .load_native_driver(path.clone(), &[])
            .await
            .with_context(|| format!("Failed to start driver {}", path.display()))?;
    }
    for remote in &cli.remote {
        let (host, port) = parse_remote(remote)?;
        server
            .load_network_device(&host, port)
            .await
            .with_context(|| format!("Failed to connect to {}", remote))?;
    }

    let serving = server.clone();
    let mut accept_loop = tokio::spawn(async move { serving.serve().await });

    tokio::select! {
        result = &mut accept_loop => {
            result.context("Listener task failed")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Cannot wait for Ctrl-C")?;
            log::info!("Shutting down");
            server.stop().await;
            let _ = accept_loop.await;
        }
    }

    for identifier in server.device_identifiers().await {
        if let Err(e) = server.unload(&identifier).await {
            log::warn!("Failed to unload {}: {}", identifier, e);
        }
    }
    Ok(())
}
