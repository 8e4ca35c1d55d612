//! Serve subcommand - HTTP surface for the pipeline.

use crate::cli::PipelineArgs;
use crate::config::PipelineConfig;
use crate::server::{AppState, create_router};
use eyre::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// CLI arguments for the HTTP server.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 5000)]
    pub port: u16,

    /// Maximum upload size in megabytes
    #[arg(long, default_value_t = 16)]
    pub max_upload_mb: usize,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Resolved configuration for the HTTP server.
#[derive(Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub max_upload_mb: usize,
    pub pipeline: PipelineConfig,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        let addr = format!("{}:{}", args.host, args.port)
            .parse()
            .wrap_err_with(|| format!("invalid bind address: {}:{}", args.host, args.port))?;

        if args.max_upload_mb == 0 {
            eyre::bail!("--max-upload-mb must be at least 1");
        }

        Ok(Self {
            addr,
            max_upload_mb: args.max_upload_mb,
            pipeline: args.pipeline.try_into()?,
        })
    }
}

pub fn execute(config: Config) -> Result<()> {
    // Built outside the runtime: the caption client owns a blocking runtime
    // that must not be created or dropped inside an async context.
    let pipeline = Arc::new(config.pipeline.build()?);

    let state = AppState::new(Arc::clone(&pipeline), config.max_upload_mb);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("failed to start async runtime")?;

    runtime.block_on(serve(config.addr, state))
}

async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let router = create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: Args,
    }

    #[test]
    fn rejects_invalid_host() {
        let wrapper = Wrapper::parse_from(["serve", "--host", "not a host"]);
        assert!(Config::try_from(wrapper.args).is_err());
    }

    #[test]
    fn rejects_zero_upload_limit() {
        let wrapper = Wrapper::parse_from(["serve", "--max-upload-mb", "0"]);
        assert!(Config::try_from(wrapper.args).is_err());
    }

    #[test]
    fn resolves_bind_address() {
        let wrapper = Wrapper::parse_from(["serve", "--host", "127.0.0.1", "-p", "8080"]);
        let config = Config::try_from(wrapper.args).unwrap();

        assert_eq!(config.addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.max_upload_mb, 16);
    }
}
