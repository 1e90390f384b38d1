//! HTTP front-end for the media workers.
//!
//! The desktop shell points its custom scheme at these routes:
//!  - `/video/<path>` honours the `Range` header and streams the planned byte window;
//!  - `/image/<path>?width=&height=&quality=` answers with a WebP thumbnail.

use crate::{
	dispatcher::Dispatcher,
	error::Error,
	protocol::{MediaRequest, Payload, ResponsePlan, DEFAULT_IMAGE_QUALITY},
};

use std::{
	fmt::Debug,
	io::SeekFrom,
	panic::Location,
	path::{Path, PathBuf},
};

use axum::{
	body::{self, BoxBody, Full},
	extract::{self, rejection::QueryRejection, Query, State},
	http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode},
	middleware::{self, Next},
	routing::get,
	Router,
};
use serde::Deserialize;
use tokio::{fs::File, io::AsyncSeekExt};
use tracing::{debug, trace};

use self::{response::InfallibleResponse, window_body::WindowBody};

mod response;
mod window_body;

// default capacity 64KiB
const DEFAULT_CAPACITY: usize = 65536;

const SERVER_NAME: &str = "clip-editor";

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
struct ImageQuery {
	width: u32,
	height: u32,
	quality: u32,
}

impl Default for ImageQuery {
	fn default() -> Self {
		Self {
			width: 0,
			height: 0,
			quality: u32::from(DEFAULT_IMAGE_QUALITY),
		}
	}
}

pub fn router(dispatcher: Dispatcher) -> Router<()> {
	Router::new()
		.route(
			"/video/*path",
			get(
				|State(dispatcher): State<Dispatcher>,
				 extract::Path(path): extract::Path<String>,
				 headers: HeaderMap| async move {
					let file_path = local_path(&path);

					// A range we can't even read as text gets the same treatment as a malformed one
					let range = headers
						.get(header::RANGE)
						.and_then(|value| value.to_str().ok())
						.map(ToString::to_string);

					trace!(path = %file_path.display(), ?range, "Video request");

					match dispatcher
						.submit(MediaRequest::video(file_path.clone(), range))
						.await
					{
						Ok(plan) => serve_plan(&file_path, plan).await,
						Err(e) => media_error(&e),
					}
				},
			),
		)
		.route(
			"/image/*path",
			get(
				|State(dispatcher): State<Dispatcher>,
				 extract::Path(path): extract::Path<String>,
				 query: Result<Query<ImageQuery>, QueryRejection>| async move {
					let Query(ImageQuery {
						width,
						height,
						quality,
					}) = query.map_err(bad_request)?;

					let file_path = local_path(&path);
					let quality = u8::try_from(quality.clamp(1, 100)).unwrap_or(DEFAULT_IMAGE_QUALITY);

					trace!(path = %file_path.display(), width, height, quality, "Image request");

					Ok::<_, Response<BoxBody>>(
						match dispatcher
							.submit(MediaRequest::image(file_path.clone(), width, height, quality))
							.await
						{
							Ok(plan) => serve_plan(&file_path, plan).await,
							Err(e) => media_error(&e),
						},
					)
				},
			),
		)
		.route("/health", get(|| async { "OK" }))
		.layer(middleware::from_fn(cors_middleware))
		.with_state(dispatcher)
}

/// Turn the path captured after the route prefix back into a local file path.
///
/// Unix style paths lose their leading `/` to the route, Windows drive paths
/// (`C:/...`) are already absolute.
#[must_use]
pub fn local_path(captured: &str) -> PathBuf {
	let trimmed = captured.trim_start_matches('/');

	let mut chars = trimmed.chars();
	let is_drive_path = matches!(
		(chars.next(), chars.next()),
		(Some(letter), Some(':')) if letter.is_ascii_alphabetic()
	);

	if is_drive_path {
		PathBuf::from(trimmed)
	} else {
		PathBuf::from(format!("/{trimmed}"))
	}
}

/// Write a worker's plan back as a HTTP response.
///
/// Windows are read from `file_path` here, the worker never ships file contents.
async fn serve_plan(file_path: &Path, plan: ResponsePlan) -> Response<BoxBody> {
	let ResponsePlan {
		status,
		headers,
		payload,
	} = plan;

	let mut resp = InfallibleResponse::builder()
		.status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));

	for (name, value) in &headers {
		resp = resp.header(name, value);
	}

	match payload {
		Payload::Inline { bytes } => resp.body(body::boxed(Full::from(bytes))),
		Payload::Window { start, end } => {
			let mut file = match File::open(file_path).await {
				Ok(file) => file,
				Err(e) => return media_error(&Error::from_io(file_path, &e)),
			};

			// The plan was sized against an earlier metadata read
			match file.metadata().await {
				Ok(metadata) if metadata.len() > end => {}
				Ok(metadata) => {
					return media_error(&Error::FileIO {
						path: file_path.to_path_buf(),
						reason: format!(
							"file shrank to {} bytes since its range was planned",
							metadata.len()
						),
					})
				}
				Err(e) => return media_error(&Error::from_io(file_path, &e)),
			}

			if let Err(e) = file.seek(SeekFrom::Start(start)).await {
				return media_error(&Error::from_io(file_path, &e));
			}

			resp.body(body::boxed(WindowBody::new(
				file,
				DEFAULT_CAPACITY,
				end - start + 1,
			)))
		}
	}
}

#[track_caller]
fn media_error(err: &Error) -> Response<BoxBody> {
	let status = err.status_code();
	debug!("{status} at {}: {err:?}", Location::caller());

	InfallibleResponse::builder()
		.status(status)
		.header("Content-Type", "text/plain")
		.body(body::boxed(Full::from(err.to_string())))
}

#[track_caller]
fn bad_request(err: impl Debug) -> Response<BoxBody> {
	debug!("400: Bad Request at {}: {err:?}", Location::caller());

	InfallibleResponse::builder()
		.status(StatusCode::BAD_REQUEST)
		.body(body::boxed(Full::from("")))
}

async fn cors_middleware<B>(req: Request<B>, next: Next<B>) -> Response<BoxBody> {
	if req.method() == Method::OPTIONS {
		return InfallibleResponse::builder()
			.header("Access-Control-Allow-Origin", "*")
			.header("Access-Control-Allow-Methods", "GET, HEAD, OPTIONS")
			.header("Access-Control-Allow-Headers", "*")
			.header("Access-Control-Max-Age", "86400")
			.status(StatusCode::OK)
			.body(body::boxed(Full::from("")));
	}

	let mut response = next.run(req).await;

	response
		.headers_mut()
		.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));

	// https://developer.mozilla.org/en-US/docs/Web/HTTP/Headers/Connection
	response
		.headers_mut()
		.insert("Connection", HeaderValue::from_static("Keep-Alive"));

	response
		.headers_mut()
		.insert("Server", HeaderValue::from_static(SERVER_NAME));

	response
}
