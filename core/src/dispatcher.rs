use crate::{
	error::{Error, Result},
	protocol::{MediaRequest, RequestId, ResponsePlan, WorkerReply, WorkerRequest},
};

use std::{
	collections::HashMap,
	sync::{Arc, Mutex, PoisonError},
	time::Duration,
};

use async_channel as chan;
use tokio::{spawn, sync::oneshot, task::JoinHandle, time::timeout};
use tracing::{error, trace, warn, Instrument};
use uuid::Uuid;

type PendingMap = HashMap<RequestId, oneshot::Sender<Result<ResponsePlan>>>;

/// Correlates submitted media requests with the replies coming back from the workers.
///
/// Cheap to clone, every clone shares the same pending map and queues.
#[derive(Debug, Clone)]
pub struct Dispatcher {
	jobs_tx: chan::Sender<WorkerRequest>,
	pending: Arc<Mutex<PendingMap>>,
	request_timeout: Duration,
}

impl Dispatcher {
	/// Create a dispatcher posting to `jobs_tx` and spawn the task that listens on
	/// `replies_rx`.
	///
	/// When `replies_rx` closes, every request still waiting is rejected with
	/// [`Error::WorkerChannel`] and the returned task finishes.
	pub fn new(
		jobs_tx: chan::Sender<WorkerRequest>,
		replies_rx: chan::Receiver<WorkerReply>,
		request_timeout: Duration,
	) -> (Self, JoinHandle<()>) {
		let pending = Arc::new(Mutex::new(PendingMap::new()));

		let handle = spawn({
			let pending = Arc::clone(&pending);

			async move {
				while let Ok(reply) = replies_rx.recv().await {
					resolve(&pending, reply);
				}

				let abandoned = lock(&pending).drain().collect::<Vec<_>>();
				if !abandoned.is_empty() {
					error!(
						count = abandoned.len(),
						"Media worker replies closed with requests in flight;"
					);
				}

				for (id, tx) in abandoned {
					// The submitter may have given up already, nothing to do about it
					let _ = tx.send(Err(Error::WorkerChannel(format!(
						"worker replies closed before answering request <id='{id}'>"
					))));
				}
			}
			.in_current_span()
		});

		(
			Self {
				jobs_tx,
				pending,
				request_timeout,
			},
			handle,
		)
	}

	/// Hand `request` to a worker and wait for its correlated reply.
	///
	/// The whole round trip, including waiting for room in a full queue, is bounded
	/// by the request timeout. Completion order across different requests is
	/// unrelated to submission order. Dropping the returned future abandons the
	/// request: its pending entry goes away with it, a late reply is discarded.
	pub async fn submit(&self, request: MediaRequest) -> Result<ResponsePlan> {
		let id = Uuid::new_v4();
		let (tx, rx) = oneshot::channel();

		lock(&self.pending).insert(id, tx);
		let _guard = PendingGuard {
			pending: &self.pending,
			id,
		};

		trace!(%id, kind = request.kind(), "Submitting media request");

		timeout(self.request_timeout, self.round_trip(id, request, rx))
			.await
			.unwrap_or_else(|_| {
				warn!(%id, timeout = ?self.request_timeout, "Media request timed out;");
				Err(Error::Timeout(self.request_timeout))
			})
	}

	async fn round_trip(
		&self,
		id: RequestId,
		job: MediaRequest,
		rx: oneshot::Receiver<Result<ResponsePlan>>,
	) -> Result<ResponsePlan> {
		self.jobs_tx
			.send(WorkerRequest { id, job })
			.await
			.map_err(|_| Error::WorkerChannel("media worker queue is closed".to_string()))?;

		rx.await.unwrap_or_else(|_| {
			Err(Error::WorkerChannel(format!(
				"reply for request <id='{id}'> was dropped"
			)))
		})
	}

	/// Number of requests still waiting on a reply.
	#[must_use]
	pub fn in_flight(&self) -> usize {
		lock(&self.pending).len()
	}
}

/// Removes a pending entry when its `submit` future ends, however it ends.
struct PendingGuard<'a> {
	pending: &'a Mutex<PendingMap>,
	id: RequestId,
}

impl Drop for PendingGuard<'_> {
	fn drop(&mut self) {
		// Already gone if the reply was delivered
		lock(self.pending).remove(&self.id);
	}
}

fn resolve(pending: &Mutex<PendingMap>, reply: WorkerReply) {
	let id = reply.id;

	// Release the lock before touching the waiting task
	let maybe_tx = lock(pending).remove(&id);

	if let Some(tx) = maybe_tx {
		if tx.send(reply.into_result()).is_err() {
			trace!(%id, "Submitter went away before its reply arrived");
		}
	} else {
		warn!(%id, "Dropping reply with no pending request (duplicate, stale or abandoned);");
	}
}

fn lock(pending: &Mutex<PendingMap>) -> std::sync::MutexGuard<'_, PendingMap> {
	// No code path panics while holding this lock, but a poisoned map is still usable
	pending.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::protocol::Payload;

	use futures::future::join_all;
	use tracing_test::traced_test;

	fn plan_for(job: &MediaRequest) -> ResponsePlan {
		ResponsePlan {
			status: 200,
			headers: [(
				"X-Path".to_string(),
				job.file_path().display().to_string(),
			)]
			.into_iter()
			.collect(),
			payload: Payload::Inline { bytes: vec![] },
		}
	}

	#[tokio::test]
	async fn reordered_replies_reach_their_own_callers() {
		let (jobs_tx, jobs_rx) = chan::unbounded();
		let (replies_tx, replies_rx) = chan::unbounded();
		let (dispatcher, _listener) =
			Dispatcher::new(jobs_tx, replies_rx, Duration::from_secs(30));

		const N: usize = 32;

		// Fake worker: collect every job first, then answer them backwards
		let worker = spawn(async move {
			let mut jobs = Vec::with_capacity(N);
			for _ in 0..N {
				jobs.push(jobs_rx.recv().await.unwrap());
			}
			for WorkerRequest { id, job } in jobs.into_iter().rev() {
				replies_tx
					.send(WorkerReply::new(id, Ok(plan_for(&job))))
					.await
					.unwrap();
			}
		});

		let results = join_all((0..N).map(|i| {
			let dispatcher = dispatcher.clone();
			async move {
				let path = format!("/clips/{i}.mp4");
				let plan = dispatcher
					.submit(MediaRequest::video(path.as_str(), None))
					.await
					.unwrap();
				(path, plan)
			}
		}))
		.await;

		for (path, plan) in results {
			assert_eq!(plan.header("X-Path"), Some(path.as_str()));
		}

		worker.await.unwrap();
		assert_eq!(dispatcher.in_flight(), 0);
	}

	#[tokio::test]
	async fn errors_come_back_through_the_same_path() {
		let (jobs_tx, jobs_rx) = chan::unbounded();
		let (replies_tx, replies_rx) = chan::unbounded();
		let (dispatcher, _listener) =
			Dispatcher::new(jobs_tx, replies_rx, Duration::from_secs(30));

		spawn(async move {
			let WorkerRequest { id, job } = jobs_rx.recv().await.unwrap();
			replies_tx
				.send(WorkerReply::new(id, Err(Error::NotFound(job.file_path().clone()))))
				.await
				.unwrap();
		});

		assert_eq!(
			dispatcher
				.submit(MediaRequest::video("/clips/missing.mp4", None))
				.await,
			Err(Error::NotFound("/clips/missing.mp4".into()))
		);
	}

	#[tokio::test]
	#[traced_test]
	async fn unknown_ids_are_dropped_without_cross_talk() {
		let (jobs_tx, jobs_rx) = chan::unbounded();
		let (replies_tx, replies_rx) = chan::unbounded();
		let (dispatcher, _listener) =
			Dispatcher::new(jobs_tx, replies_rx, Duration::from_secs(30));

		spawn(async move {
			let WorkerRequest { id, job } = jobs_rx.recv().await.unwrap();
			// A stale reply first, then a duplicate after the real one
			replies_tx
				.send(WorkerReply::new(
					Uuid::new_v4(),
					Err(Error::WorkerChannel("stale".to_string())),
				))
				.await
				.unwrap();
			replies_tx
				.send(WorkerReply::new(id, Ok(plan_for(&job))))
				.await
				.unwrap();
			replies_tx
				.send(WorkerReply::new(id, Ok(plan_for(&job))))
				.await
				.unwrap();
		});

		let plan = dispatcher
			.submit(MediaRequest::video("/clips/a.mp4", None))
			.await
			.unwrap();
		assert_eq!(plan.header("X-Path"), Some("/clips/a.mp4"));

		// Give the listener a moment to chew through the duplicate
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(logs_contain("Dropping reply with no pending request"));
	}

	#[tokio::test]
	async fn closed_worker_rejects_everything_pending() {
		let (jobs_tx, jobs_rx) = chan::unbounded();
		let (replies_tx, replies_rx) = chan::unbounded::<WorkerReply>();
		let (dispatcher, listener) =
			Dispatcher::new(jobs_tx, replies_rx, Duration::from_secs(30));

		// The "worker" takes two jobs and dies without answering
		spawn(async move {
			let _first = jobs_rx.recv().await.unwrap();
			let _second = jobs_rx.recv().await.unwrap();
			drop(replies_tx);
		});

		let (a, b) = tokio::join!(
			dispatcher.submit(MediaRequest::video("/clips/a.mp4", None)),
			dispatcher.submit(MediaRequest::image("/clips/b.png", 64, 0, 80)),
		);

		assert!(matches!(a, Err(Error::WorkerChannel(_))));
		assert!(matches!(b, Err(Error::WorkerChannel(_))));
		listener.await.unwrap();
		assert_eq!(dispatcher.in_flight(), 0);
	}

	#[tokio::test]
	async fn closed_queue_fails_fast() {
		let (jobs_tx, jobs_rx) = chan::unbounded();
		let (_replies_tx, replies_rx) = chan::unbounded();
		let (dispatcher, _listener) =
			Dispatcher::new(jobs_tx, replies_rx, Duration::from_secs(30));

		jobs_rx.close();

		assert!(matches!(
			dispatcher
				.submit(MediaRequest::video("/clips/a.mp4", None))
				.await,
			Err(Error::WorkerChannel(_))
		));
		assert_eq!(dispatcher.in_flight(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn hung_worker_times_out() {
		let (jobs_tx, _jobs_rx) = chan::unbounded();
		let (_replies_tx, replies_rx) = chan::unbounded();
		let (dispatcher, _listener) =
			Dispatcher::new(jobs_tx, replies_rx, Duration::from_secs(5));

		assert_eq!(
			dispatcher
				.submit(MediaRequest::video("/clips/a.mp4", None))
				.await,
			Err(Error::Timeout(Duration::from_secs(5)))
		);
		assert_eq!(dispatcher.in_flight(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn full_queue_counts_against_the_timeout() {
		let (jobs_tx, jobs_rx) = chan::bounded(1);
		let (_replies_tx, replies_rx) = chan::unbounded();
		let (dispatcher, _listener) =
			Dispatcher::new(jobs_tx.clone(), replies_rx, Duration::from_secs(5));

		// Nobody drains the queue, so it stays full
		jobs_tx
			.send(WorkerRequest {
				id: Uuid::new_v4(),
				job: MediaRequest::video("/clips/first.mp4", None),
			})
			.await
			.unwrap();

		let res = timeout(
			Duration::from_secs(60),
			dispatcher.submit(MediaRequest::video("/clips/second.mp4", None)),
		)
		.await;

		assert_eq!(res, Ok(Err(Error::Timeout(Duration::from_secs(5)))));
		assert_eq!(dispatcher.in_flight(), 0);
		assert_eq!(jobs_rx.len(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn dropped_submit_leaves_nothing_pending() {
		let (jobs_tx, jobs_rx) = chan::bounded(1);
		let (replies_tx, replies_rx) = chan::unbounded();
		let (dispatcher, _listener) =
			Dispatcher::new(jobs_tx.clone(), replies_rx, Duration::from_secs(300));

		jobs_tx
			.send(WorkerRequest {
				id: Uuid::new_v4(),
				job: MediaRequest::video("/clips/first.mp4", None),
			})
			.await
			.unwrap();

		// Caller gives up while still waiting for room in the queue
		assert!(timeout(
			Duration::from_secs(1),
			dispatcher.submit(MediaRequest::video("/clips/stuck.mp4", None)),
		)
		.await
		.is_err());
		assert_eq!(dispatcher.in_flight(), 0);

		// Caller gives up after the job was queued, the late reply is discarded
		let _ = jobs_rx.recv().await.unwrap();
		let queued = {
			let dispatcher = dispatcher.clone();
			spawn(async move {
				dispatcher
					.submit(MediaRequest::video("/clips/queued.mp4", None))
					.await
			})
		};
		let WorkerRequest { id, job } = jobs_rx.recv().await.unwrap();
		assert_eq!(dispatcher.in_flight(), 1);

		queued.abort();
		assert!(queued.await.unwrap_err().is_cancelled());
		assert_eq!(dispatcher.in_flight(), 0);

		replies_tx
			.send(WorkerReply::new(id, Ok(plan_for(&job))))
			.await
			.unwrap();
		tokio::time::sleep(Duration::from_millis(10)).await;
		assert_eq!(dispatcher.in_flight(), 0);
	}
}
