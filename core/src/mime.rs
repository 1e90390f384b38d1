//! Extension to content type mapping shared by the video and image responses.

use std::{ffi::OsStr, path::Path};

/// Content type served when nothing better is known about a file.
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Resolve the content type for a file extension (without the leading dot).
///
/// Matching is case-insensitive and total: unknown extensions map to
/// [`FALLBACK_MIME_TYPE`].
#[must_use]
pub fn resolve(extension: &str) -> &'static str {
	match extension.to_ascii_lowercase().as_str() {
		// AAC audio
		"aac" => "audio/aac",
		// MP3 audio
		"mp3" => "audio/mpeg",
		// MP4 audio
		"m4a" => "audio/mp4",
		// OGG audio
		"oga" => "audio/ogg",
		// Opus audio
		"opus" => "audio/opus",
		// Waveform Audio Format
		"wav" => "audio/wav",
		// WEBM audio
		"weba" => "audio/webm",
		// AVI: Audio Video Interleave
		"avi" => "video/x-msvideo",
		// MP4 video
		"mp4" | "m4v" => "video/mp4",
		// Matroska
		"mkv" => "video/x-matroska",
		// MPEG transport stream
		"ts" => "video/mp2t",
		// MPEG Video
		"mpeg" | "mpg" => "video/mpeg",
		// OGG video
		"ogv" => "video/ogg",
		// WEBM video
		"webm" => "video/webm",
		// 3GPP audio/video container
		"3gp" => "video/3gpp",
		// 3GPP2 audio/video container
		"3g2" => "video/3gpp2",
		// Quicktime movies
		"mov" => "video/quicktime",
		// Windows OS/2 Bitmap Graphics
		"bmp" => "image/bmp",
		// Graphics Interchange Format (GIF)
		"gif" => "image/gif",
		// Icon format
		"ico" => "image/vnd.microsoft.icon",
		// JPEG images
		"jpeg" | "jpg" => "image/jpeg",
		// Portable Network Graphics
		"png" => "image/png",
		// Scalable Vector Graphics (SVG)
		"svg" => "image/svg+xml",
		// Tagged Image File Format (TIFF)
		"tif" | "tiff" => "image/tiff",
		// WEBP image
		"webp" => "image/webp",
		// AVIF images
		"avif" => "image/avif",
		_ => FALLBACK_MIME_TYPE,
	}
}

/// [`resolve`] applied to the extension of `path`.
#[must_use]
pub fn resolve_path(path: impl AsRef<Path>) -> &'static str {
	path.as_ref()
		.extension()
		.and_then(OsStr::to_str)
		.map_or(FALLBACK_MIME_TYPE, resolve)
}
