//! Media server configuration

use crate::worker::default_worker_count;

use std::{
	io,
	path::{Path, PathBuf},
	time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

/// How long a submitter waits on a worker before giving up, unless configured otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60 * 5);

/// Capacity of the queue between the dispatcher and the workers.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaServerConfig {
	/// Number of media workers, `None` means one per available CPU core
	pub worker_count: Option<usize>,

	/// Jobs waiting for a free worker before submitters start to wait for room
	pub queue_capacity: usize,

	/// Seconds a single request may take before it is failed with a timeout
	pub request_timeout_secs: u64,
}

impl Default for MediaServerConfig {
	fn default() -> Self {
		Self {
			worker_count: None,
			queue_capacity: DEFAULT_QUEUE_CAPACITY,
			request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
		}
	}
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file: {source}; path: '{}'", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("failed to parse config file: {source}; path: '{}'", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},
}

impl MediaServerConfig {
	/// Load the JSON config at `path`, falling back to the defaults when it doesn't exist.
	pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		match fs::read(path).await {
			Ok(data) => {
				let config =
					serde_json::from_slice::<Self>(&data).map_err(|source| ConfigError::Parse {
						path: path.to_path_buf(),
						source,
					})?;
				info!(path = %path.display(), ?config, "Loaded media server config");
				Ok(config.sanitized())
			}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				warn!(path = %path.display(), "Config file not found, using defaults");
				Ok(Self::default())
			}
			Err(source) => Err(ConfigError::Read {
				path: path.to_path_buf(),
				source,
			}),
		}
	}

	fn sanitized(mut self) -> Self {
		if self.worker_count == Some(0) {
			warn!("A worker count of 0 was configured, using one per core instead");
			self.worker_count = None;
		}
		if self.queue_capacity == 0 {
			warn!("A queue capacity of 0 was configured, using the default instead");
			self.queue_capacity = DEFAULT_QUEUE_CAPACITY;
		}
		if self.request_timeout_secs == 0 {
			warn!("A request timeout of 0 was configured, using the default instead");
			self.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT.as_secs();
		}
		self
	}

	#[must_use]
	pub fn worker_count(&self) -> usize {
		self.worker_count.unwrap_or_else(default_worker_count)
	}

	#[must_use]
	pub const fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use tempfile::tempdir;

	#[tokio::test]
	async fn missing_file_gives_defaults() {
		let dir = tempdir().unwrap();
		let config = MediaServerConfig::load(dir.path().join("media.json"))
			.await
			.unwrap();

		assert_eq!(config, MediaServerConfig::default());
		assert_eq!(config.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
		assert!(config.worker_count() >= 1);
	}

	#[tokio::test]
	async fn partial_file_keeps_other_defaults() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("media.json");
		std::fs::write(&path, r#"{ "worker_count": 2, "request_timeout_secs": 0 }"#).unwrap();

		let config = MediaServerConfig::load(&path).await.unwrap();

		assert_eq!(config.worker_count(), 2);
		assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
		assert_eq!(config.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
	}

	#[tokio::test]
	async fn garbage_is_a_parse_error() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("media.json");
		std::fs::write(&path, "worker_count = 2").unwrap();

		assert!(matches!(
			MediaServerConfig::load(&path).await,
			Err(ConfigError::Parse { .. })
		));
	}
}
