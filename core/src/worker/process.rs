use crate::{
	error::{Error, Result},
	mime,
	protocol::{ImageRequest, MediaRequest, ResponsePlan, VideoRequest, WorkerReply, WorkerRequest},
	range::plan_video_response,
	transcode::{plan_image_response, transcode_off_thread},
};

use std::{fs::Metadata, path::Path};

use tokio::fs::{self, File};
use tracing::{debug, trace};

/// Answer a single job. Never fails: errors are folded into the reply.
pub async fn process(WorkerRequest { id, job }: WorkerRequest) -> WorkerReply {
	trace!(%id, kind = job.kind(), path = %job.file_path().display(), "Processing media request");

	let res = match job {
		MediaRequest::Video(request) => process_video(request).await,
		MediaRequest::Image(request) => process_image(request).await,
	};

	if let Err(e) = &res {
		debug!(%id, ?e, "Media request failed;");
	}

	WorkerReply::new(id, res)
}

async fn process_video(
	VideoRequest {
		file_path,
		range,
		file_size,
	}: VideoRequest,
) -> Result<ResponsePlan> {
	let metadata = check_file(&file_path).await?;

	if let Some(hint) = file_size.filter(|&hint| hint != metadata.len()) {
		trace!(hint, actual = metadata.len(), "Stale file size hint, using the real one");
	}

	Ok(plan_video_response(
		range.as_deref(),
		metadata.len(),
		mime::resolve_path(&file_path),
	))
}

async fn process_image(request: ImageRequest) -> Result<ResponsePlan> {
	check_file(&request.file_path).await?;

	transcode_off_thread(request).await.map(plan_image_response)
}

/// Make sure `path` is a regular file we can open before answering anything about it.
async fn check_file(path: &Path) -> Result<Metadata> {
	let metadata = fs::metadata(path)
		.await
		.map_err(|e| Error::from_io(path, &e))?;

	if !metadata.is_file() {
		return Err(Error::NotAFile(path.to_path_buf()));
	}

	// Existence isn't enough, the front-end will have to read it afterwards
	File::open(path).await.map_err(|e| Error::from_io(path, &e))?;

	Ok(metadata)
}
