//! Byte-range planning for video responses.
//!
//! <https://developer.mozilla.org/en-US/docs/Web/HTTP/Range_requests>

use crate::protocol::{Payload, ResponsePlan};

use std::cmp::min;

/// Served when the client didn't ask for a specific window, so the first paint of a
/// large file doesn't wait for the whole thing. 1MiB.
pub const INITIAL_CHUNK_SIZE: u64 = 1_048_576;

/// Decide status, headers and byte window for a video request.
///
/// Pure function, no I/O: the caller reads the returned window from disk.
///
/// A range header we can't make sense of (missing or non-numeric start, suffix
/// ranges like `bytes=-500`, multiple ranges) is answered exactly like a request
/// without one. This leniency is deliberate: some players send odd range headers
/// and still expect the first chunk back.
#[must_use]
pub fn plan_video_response(
	range: Option<&str>,
	file_size: u64,
	content_type: &str,
) -> ResponsePlan {
	// No byte index exists in an empty file, so nothing is satisfiable
	if file_size == 0 {
		return not_satisfiable(file_size);
	}

	match range.and_then(|header| parse_range(header, file_size)) {
		None => initial_chunk(file_size, content_type),
		Some((start, end)) if start >= file_size || end >= file_size || start > end => {
			not_satisfiable(file_size)
		}
		Some((start, end)) => video_plan(206, start, end, content_type).with_header(
			"Content-Range",
			format!("bytes {start}-{end}/{file_size}"),
		),
	}
}

/// Parse `bytes=<start>-<end>?`, `end` defaulting to the last byte of the file.
///
/// Returns `None` for anything malformed, the caller falls back to the initial chunk.
fn parse_range(header: &str, file_size: u64) -> Option<(u64, u64)> {
	let (unit, ranges) = header.trim().split_once('=')?;
	if !unit.trim().eq_ignore_ascii_case("bytes") {
		return None;
	}

	let (start, end) = ranges.trim().split_once('-')?;
	let start = start.trim().parse::<u64>().ok()?;
	let end = match end.trim() {
		"" => file_size - 1,
		end => end.parse::<u64>().ok()?,
	};

	Some((start, end))
}

fn initial_chunk(file_size: u64, content_type: &str) -> ResponsePlan {
	video_plan(200, 0, min(INITIAL_CHUNK_SIZE, file_size) - 1, content_type)
}

fn video_plan(status: u16, start: u64, end: u64, content_type: &str) -> ResponsePlan {
	ResponsePlan::new(status, Payload::Window { start, end })
		.with_header("Content-Type", content_type)
		.with_header("Content-Length", end - start + 1)
		.with_header("Accept-Ranges", "bytes")
		// The playback position decides which window comes next under the same URL
		.with_header("Cache-Control", "no-cache")
}

fn not_satisfiable(file_size: u64) -> ResponsePlan {
	let bytes = b"Requested range not satisfiable".to_vec();
	let content_length = bytes.len();

	ResponsePlan::new(416, Payload::Inline { bytes })
		.with_header("Content-Type", "text/plain")
		.with_header("Content-Length", content_length)
		.with_header("Content-Range", format!("bytes */{file_size}"))
		.with_header("Accept-Ranges", "bytes")
		.with_header("Cache-Control", "no-cache")
}
