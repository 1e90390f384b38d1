//! Pool of media workers draining a shared job queue.
//!
//! Each worker handles one job at a time: file checks go through `tokio::fs` and
//! image transcoding through the blocking thread pool, so the async runtime is
//! never stalled by media work.

use crate::protocol::{WorkerReply, WorkerRequest};

use std::future::Future;

use async_channel as chan;
use tokio::{spawn, task::JoinHandle};
use tracing::{error, info, instrument, trace, warn, Instrument};

mod process;

pub use process::process;

pub type WorkerId = usize;

/// Number of workers to run when the configuration doesn't say: one per core.
#[must_use]
pub fn default_worker_count() -> usize {
	std::thread::available_parallelism().map_or_else(
		|e| {
			error!(?e, "Failed to get available parallelism for media workers;");
			1
		},
		std::num::NonZeroUsize::get,
	)
}

#[derive(Debug)]
pub struct WorkerPool {
	jobs_tx: chan::Sender<WorkerRequest>,
	handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
	/// Start `count` workers (at least one) pulling from `jobs_rx` and answering on `replies_tx`.
	///
	/// `jobs_tx` is kept to close the queue on shutdown.
	#[must_use]
	pub fn spawn(
		count: usize,
		jobs_tx: chan::Sender<WorkerRequest>,
		jobs_rx: &chan::Receiver<WorkerRequest>,
		replies_tx: &chan::Sender<WorkerReply>,
	) -> Self {
		Self::spawn_with(count, jobs_tx, jobs_rx, replies_tx, process)
	}

	/// Same as [`WorkerPool::spawn`], with `handler` answering each job instead of [`process`].
	pub(crate) fn spawn_with<F, Fut>(
		count: usize,
		jobs_tx: chan::Sender<WorkerRequest>,
		jobs_rx: &chan::Receiver<WorkerRequest>,
		replies_tx: &chan::Sender<WorkerReply>,
		handler: F,
	) -> Self
	where
		F: Fn(WorkerRequest) -> Fut + Clone + Send + Sync + 'static,
		Fut: Future<Output = WorkerReply> + Send + 'static,
	{
		let handles = (0..count.max(1))
			.map(|id| spawn_worker(id, jobs_rx.clone(), replies_tx.clone(), handler.clone()))
			.collect();

		Self { jobs_tx, handles }
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.handles.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.handles.is_empty()
	}

	/// Close the job queue and wait for the workers to drain it.
	///
	/// Jobs already queued are still answered, new submissions fail right away.
	pub async fn shutdown(self) {
		let Self { jobs_tx, handles } = self;

		jobs_tx.close();

		for handle in handles {
			if let Err(e) = handle.await {
				error!(?e, "Media worker failed to shut down cleanly;");
			}
		}
	}
}

#[instrument(name = "media_worker", skip(jobs_rx, replies_tx, handler))]
fn spawn_worker<F, Fut>(
	id: WorkerId,
	jobs_rx: chan::Receiver<WorkerRequest>,
	replies_tx: chan::Sender<WorkerReply>,
	handler: F,
) -> JoinHandle<()>
where
	F: Fn(WorkerRequest) -> Fut + Clone + Send + Sync + 'static,
	Fut: Future<Output = WorkerReply> + Send + 'static,
{
	spawn(
		async move {
			trace!("Media worker starting...");
			while let Err(e) = spawn(
				run(jobs_rx.clone(), replies_tx.clone(), handler.clone()).in_current_span(),
			)
			.await
			{
				if e.is_panic() {
					error!(?e, "Media worker critically failed and will restart;");
				} else {
					trace!("Media worker was cancelled and will exit...");
					break;
				}
			}

			info!("Media worker gracefully shutdown");
		}
		.in_current_span(),
	)
}

async fn run<F, Fut>(
	jobs_rx: chan::Receiver<WorkerRequest>,
	replies_tx: chan::Sender<WorkerReply>,
	handler: F,
) where
	F: Fn(WorkerRequest) -> Fut,
	Fut: Future<Output = WorkerReply>,
{
	while let Ok(request) = jobs_rx.recv().await {
		let reply = handler(request).await;

		if replies_tx.send(reply).await.is_err() {
			warn!("Reply channel closed, media worker is stopping");
			break;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::{
		dispatcher::Dispatcher,
		error::Error,
		protocol::{MediaRequest, Payload, ResponsePlan},
	};

	use std::{collections::HashSet, path::Path, time::Duration};

	use futures::future::{ready, Ready};
	use tempfile::tempdir;
	use tracing_test::traced_test;
	use uuid::Uuid;

	fn explode_on_boom(WorkerRequest { id, job }: WorkerRequest) -> Ready<WorkerReply> {
		if job.file_path() == Path::new("/clips/boom.mp4") {
			panic!("media job blew up");
		}

		ready(WorkerReply::new(
			id,
			Ok(ResponsePlan::new(200, Payload::Inline { bytes: vec![] })),
		))
	}

	#[tokio::test]
	async fn pool_answers_every_job_and_shuts_down() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("clip.mov");
		std::fs::write(&path, vec![7_u8; 2048]).unwrap();

		let (jobs_tx, jobs_rx) = chan::bounded(4);
		let (replies_tx, replies_rx) = chan::unbounded();

		let pool = WorkerPool::spawn(3, jobs_tx.clone(), &jobs_rx, &replies_tx);
		assert_eq!(pool.len(), 3);
		drop(replies_tx);

		let ids = (0..16).map(|_| Uuid::new_v4()).collect::<HashSet<_>>();
		for &id in &ids {
			jobs_tx
				.send(WorkerRequest {
					id,
					job: MediaRequest::video(&path, Some("bytes=0-1".to_string())),
				})
				.await
				.unwrap();
		}

		let mut answered = HashSet::new();
		for _ in 0..ids.len() {
			let reply = replies_rx.recv().await.unwrap();
			assert_eq!(reply.clone().into_result().unwrap().status, 206);
			answered.insert(reply.id);
		}
		assert_eq!(answered, ids);

		pool.shutdown().await;

		// Every worker dropped its reply sender
		assert!(replies_rx.recv().await.is_err());
	}

	#[tokio::test]
	#[traced_test]
	async fn panicking_worker_is_restarted() {
		let (jobs_tx, jobs_rx) = chan::bounded(4);
		let (replies_tx, replies_rx) = chan::unbounded();

		let pool = WorkerPool::spawn_with(1, jobs_tx.clone(), &jobs_rx, &replies_tx, explode_on_boom);
		drop(replies_tx);

		let (dispatcher, listener) =
			Dispatcher::new(jobs_tx, replies_rx, Duration::from_millis(200));

		// The job that took the worker down never gets a reply, its caller times out
		assert_eq!(
			dispatcher
				.submit(MediaRequest::video("/clips/boom.mp4", None))
				.await,
			Err(Error::Timeout(Duration::from_millis(200)))
		);

		// The single worker came back and picks up the next job
		let plan = dispatcher
			.submit(MediaRequest::video("/clips/fine.mp4", None))
			.await
			.unwrap();
		assert_eq!(plan.status, 200);
		assert!(logs_contain("Media worker critically failed and will restart"));

		pool.shutdown().await;
		listener.await.unwrap();
	}

	#[test]
	fn at_least_one_worker() {
		assert!(default_worker_count() >= 1);
	}
}
