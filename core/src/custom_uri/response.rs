use axum::{
	body::BoxBody,
	http::{header::HeaderName, HeaderMap, HeaderValue, Response, StatusCode},
};
use tracing::error;

/// Response builder that never fails: headers that aren't valid HTTP are logged and
/// left out instead of poisoning the whole response.
#[derive(Debug)]
pub(crate) struct InfallibleResponse {
	status: StatusCode,
	headers: HeaderMap,
}

impl InfallibleResponse {
	pub(crate) fn builder() -> Self {
		Self {
			status: StatusCode::OK,
			headers: HeaderMap::new(),
		}
	}

	pub(crate) fn status(mut self, status: StatusCode) -> Self {
		self.status = status;
		self
	}

	pub(crate) fn header(mut self, name: &str, value: &str) -> Self {
		match (
			HeaderName::try_from(name),
			HeaderValue::try_from(value),
		) {
			(Ok(name), Ok(value)) => {
				self.headers.insert(name, value);
			}
			(name, value) => {
				error!(?name, ?value, "Skipping invalid response header;");
			}
		}
		self
	}

	pub(crate) fn body(self, body: BoxBody) -> Response<BoxBody> {
		let Self { status, headers } = self;

		let mut response = Response::new(body);
		*response.status_mut() = status;
		*response.headers_mut() = headers;
		response
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use axum::body::{self, Full};

	#[test]
	fn invalid_headers_are_skipped() {
		let response = InfallibleResponse::builder()
			.status(StatusCode::PARTIAL_CONTENT)
			.header("Content-Range", "bytes 0-9/10")
			.header("Bad Header", "value")
			.header("X-Broken", "line\nbreak")
			.body(body::boxed(Full::from("")));

		assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
		assert_eq!(response.headers().len(), 1);
		assert_eq!(response.headers()["content-range"], "bytes 0-9/10");
	}
}
