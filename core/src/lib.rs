#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	clippy::expect_used,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::as_conversions,
	clippy::dbg_macro
)]
#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use async_channel as chan;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub mod config;
pub mod custom_uri;
pub mod dispatcher;
pub mod error;
pub mod mime;
pub mod protocol;
pub mod range;
pub mod transcode;
pub mod worker;

pub use config::{ConfigError, MediaServerConfig};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use protocol::{MediaRequest, Payload, ResponsePlan};
pub use worker::WorkerPool;

/// The media back-end: a pool of workers fed through a correlating dispatcher.
///
/// Requests go in through [`MediaServer::submit`] (or a cloned [`Dispatcher`]) and come
/// back as [`ResponsePlan`]s; the HTTP side lives in [`custom_uri`].
#[derive(Debug)]
pub struct MediaServer {
	dispatcher: Dispatcher,
	pool: WorkerPool,
	listener: JoinHandle<()>,
}

impl MediaServer {
	/// Spawn the worker pool and the reply listener. Must be called inside a Tokio runtime.
	#[must_use]
	pub fn new(config: &MediaServerConfig) -> Self {
		let worker_count = config.worker_count();

		let (jobs_tx, jobs_rx) = chan::bounded(config.queue_capacity.max(1));
		let (replies_tx, replies_rx) = chan::unbounded();

		let pool = WorkerPool::spawn(worker_count, jobs_tx.clone(), &jobs_rx, &replies_tx);

		// Only the workers may hold reply senders, so the channel closes when they are gone
		drop(replies_tx);

		let (dispatcher, listener) = Dispatcher::new(jobs_tx, replies_rx, config.request_timeout());

		info!(
			workers = pool.len(),
			queue_capacity = config.queue_capacity,
			timeout = ?config.request_timeout(),
			"Media server started;"
		);

		Self {
			dispatcher,
			pool,
			listener,
		}
	}

	/// A handle for submitting requests, cheap to clone into request handlers.
	#[must_use]
	pub fn dispatcher(&self) -> Dispatcher {
		self.dispatcher.clone()
	}

	pub async fn submit(&self, request: MediaRequest) -> Result<ResponsePlan> {
		self.dispatcher.submit(request).await
	}

	/// Stop accepting jobs, let the workers finish what they hold and reject anything
	/// still waiting.
	pub async fn shutdown(self) {
		let Self {
			dispatcher,
			pool,
			listener,
		} = self;

		info!(in_flight = dispatcher.in_flight(), "Shutting down media server;");

		pool.shutdown().await;

		if let Err(e) = listener.await {
			error!(?e, "Media reply listener failed to shut down cleanly;");
		}

		info!("Media server shutdown");
	}
}
