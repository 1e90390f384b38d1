use clip_core::{custom_uri, MediaServer, MediaServerConfig};

use std::{
	net::{Ipv4Addr, SocketAddr},
	path::{Path, PathBuf},
};

use anyhow::Context;
use axum::{http::StatusCode, routing::get, Router};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "clip_core=info,clip_server=info";

/// Loopback media server for Clip Editor: range-aware video and on-demand WebP thumbnails.
#[derive(Debug, Parser)]
#[command(name = "clip-server", version, about)]
struct Args {
	/// Port to listen on, always bound to 127.0.0.1
	#[arg(long, env = "PORT", default_value_t = 8080)]
	port: u16,

	/// JSON config file for the media workers
	#[arg(long, env = "CLIP_CONFIG")]
	config: Option<PathBuf>,

	/// Also write daily rotated logs to this directory
	#[arg(long, env = "CLIP_LOG_DIR")]
	log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	// Dropping the guard flushes the file writer, so it lives until the end of main
	let _guard = init_logger(args.log_dir.as_deref())?;

	let config = match &args.config {
		Some(path) => MediaServerConfig::load(path).await?,
		None => MediaServerConfig::default(),
	};

	let media_server = MediaServer::new(&config);

	let app = Router::new()
		.route("/", get(|| async { "Clip Editor media server" }))
		.merge(custom_uri::router(media_server.dispatcher()))
		.fallback(|| async { (StatusCode::NOT_FOUND, "404 Not Found") });

	let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, args.port));

	let server = axum::Server::try_bind(&addr)
		.with_context(|| format!("failed to bind to {addr}"))?
		.serve(app.into_make_service())
		.with_graceful_shutdown(shutdown_signal());

	info!("Listening on http://{addr}");

	let res = server.await.context("HTTP server failed");

	media_server.shutdown().await;

	res
}

fn init_logger(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
	let (file_layer, guard) = if let Some(log_dir) = log_dir {
		std::fs::create_dir_all(log_dir)
			.with_context(|| format!("failed to create log directory '{}'", log_dir.display()))?;

		let (non_blocking, guard) =
			tracing_appender::non_blocking(rolling::daily(log_dir, "clip-server.log"));

		(
			Some(fmt::layer().with_writer(non_blocking).with_ansi(false)),
			Some(guard),
		)
	} else {
		(None, None)
	};

	tracing_subscriber::registry()
		.with(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
		)
		.with(fmt::layer())
		.with(file_layer)
		.try_init()
		.context("failed to install the tracing subscriber")?;

	Ok(guard)
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		error!(?e, "Failed to listen for the shutdown signal;");
		// Without a signal the server just keeps running
		std::future::pending::<()>().await;
	}

	info!("Shutdown signal received, stopping server...");
}
