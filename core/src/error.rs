use std::{
	io,
	path::{Path, PathBuf},
	time::Duration,
};

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while serving a media request.
///
/// Errors travel back through the same correlation channel as successful plans,
/// so they are plain data (paths and messages) and can be serialized.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Error {
	#[error("file not found: <path='{}'>", .0.display())]
	NotFound(PathBuf),
	#[error("access denied: <path='{}'>", .0.display())]
	AccessDenied(PathBuf),
	#[error("not a regular file: <path='{}'>", .0.display())]
	NotAFile(PathBuf),
	#[error("file I/O error: {reason}; path: '{}'", path.display())]
	FileIO { path: PathBuf, reason: String },
	#[error("failed to transcode image: {reason}; path: '{}'", path.display())]
	Transcode { path: PathBuf, reason: String },
	#[error("media worker channel failure: {0}")]
	WorkerChannel(String),
	#[error("media worker did not reply within {0:?}")]
	Timeout(Duration),
}

impl Error {
	/// Classify an I/O error raised while touching `path`.
	pub fn from_io(path: impl AsRef<Path>, e: &io::Error) -> Self {
		let path = path.as_ref().to_path_buf();
		match e.kind() {
			io::ErrorKind::NotFound => Self::NotFound(path),
			io::ErrorKind::PermissionDenied => Self::AccessDenied(path),
			_ => Self::FileIO {
				path,
				reason: e.to_string(),
			},
		}
	}

	pub fn transcode(path: impl AsRef<Path>, reason: impl ToString) -> Self {
		Self::Transcode {
			path: path.as_ref().to_path_buf(),
			reason: reason.to_string(),
		}
	}

	/// The status code the resource front-end answers with for this error.
	#[must_use]
	pub const fn status_code(&self) -> StatusCode {
		match self {
			Self::NotFound(_)
			| Self::AccessDenied(_)
			| Self::NotAFile(_)
			| Self::FileIO { .. }
			| Self::Transcode { .. } => StatusCode::INTERNAL_SERVER_ERROR,
			Self::WorkerChannel(_) => StatusCode::SERVICE_UNAVAILABLE,
			Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
		}
	}
}
