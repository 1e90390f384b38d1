//! Types exchanged between the dispatcher and the media workers.
//!
//! Outbound jobs look like `{"id": "...", "type": "video" | "image", "data": {...}}`
//! and replies like `{"id": "...", "success": true, "data": {...}}` or
//! `{"id": "...", "success": false, "error": {...}}`. The `id` is an opaque
//! correlation token for both sides.

use crate::error::Error;

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RequestId = Uuid;

/// Default re-encode quality for thumbnails when the caller doesn't ask for one.
pub const DEFAULT_IMAGE_QUALITY: u8 = 80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum MediaRequest {
	Video(VideoRequest),
	Image(ImageRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRequest {
	pub file_path: PathBuf,
	/// Raw value of the `Range` header, if the caller sent one.
	pub range: Option<String>,
	/// Size hint from callers that already stat'ed the file. The worker always
	/// stats the file itself and its answer wins.
	pub file_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequest {
	pub file_path: PathBuf,
	/// Target width, `0` means unset.
	pub width: u32,
	/// Target height, `0` means unset.
	pub height: u32,
	/// Encoder quality in `1..=100`.
	pub quality: u8,
}

impl MediaRequest {
	pub fn video(file_path: impl Into<PathBuf>, range: Option<String>) -> Self {
		Self::Video(VideoRequest {
			file_path: file_path.into(),
			range,
			file_size: None,
		})
	}

	/// Build an image request, clamping `quality` into `1..=100`.
	pub fn image(file_path: impl Into<PathBuf>, width: u32, height: u32, quality: u8) -> Self {
		Self::Image(ImageRequest {
			file_path: file_path.into(),
			width,
			height,
			quality: quality.clamp(1, 100),
		})
	}

	#[must_use]
	pub const fn file_path(&self) -> &PathBuf {
		match self {
			Self::Video(VideoRequest { file_path, .. })
			| Self::Image(ImageRequest { file_path, .. }) => file_path,
		}
	}

	#[must_use]
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Video(_) => "video",
			Self::Image(_) => "image",
		}
	}
}

/// Where the body of a [`ResponsePlan`] comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Payload {
	/// Inclusive byte window of the requested file, read by whoever writes the response.
	Window { start: u64, end: u64 },
	/// Bytes already produced by the worker.
	Inline { bytes: Vec<u8> },
}

/// An HTTP-shaped answer computed by a worker, without the file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePlan {
	pub status: u16,
	pub headers: BTreeMap<String, String>,
	pub payload: Payload,
}

impl ResponsePlan {
	pub(crate) fn new(status: u16, payload: Payload) -> Self {
		Self {
			status,
			headers: BTreeMap::new(),
			payload,
		}
	}

	pub(crate) fn with_header(mut self, name: &str, value: impl ToString) -> Self {
		self.headers.insert(name.to_string(), value.to_string());
		self
	}

	/// Case-insensitive header lookup.
	#[must_use]
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
	pub id: RequestId,
	#[serde(flatten)]
	pub job: MediaRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReply {
	pub id: RequestId,
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<ResponsePlan>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<Error>,
}

impl WorkerReply {
	pub fn new(id: RequestId, res: Result<ResponsePlan, Error>) -> Self {
		match res {
			Ok(plan) => Self {
				id,
				success: true,
				data: Some(plan),
				error: None,
			},
			Err(e) => Self {
				id,
				success: false,
				data: None,
				error: Some(e),
			},
		}
	}

	/// Turn the reply back into the result the submitter is waiting on.
	pub fn into_result(self) -> Result<ResponsePlan, Error> {
		match (self.success, self.data, self.error) {
			(true, Some(plan), _) => Ok(plan),
			(false, _, Some(e)) => Err(e),
			_ => Err(Error::WorkerChannel(format!(
				"malformed reply for request <id='{}'>",
				self.id
			))),
		}
	}
}
