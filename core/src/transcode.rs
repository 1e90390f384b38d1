//! On-demand thumbnail transcoding.
//!
//! Every source image is re-encoded to lossy WebP, optionally resized first.

use crate::{
	error::{Error, Result},
	protocol::{ImageRequest, Payload, ResponsePlan},
};

use std::{
	ops::Deref,
	panic::{self, AssertUnwindSafe},
	path::{Path, PathBuf},
};

use clip_images::{complete_dimensions, format_image, image_dimensions};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use tokio::{sync::oneshot, task::spawn_blocking};
use tracing::{error, instrument, trace};
use webp::Encoder;

pub const WEBP_MIME_TYPE: &str = "image/webp";

/// Thumbnails don't change once generated, unlike video windows.
pub const THUMBNAIL_CACHE_CONTROL: &str = "max-age=3600";

/// Largest side libwebp accepts, in pixels.
pub const WEBP_MAX_DIMENSION: u32 = 16383;

/// Decode, resize and re-encode the image at `file_path` as WebP.
///
/// - `width == 0 && height == 0`: original size, only re-encoded at `quality`;
/// - only one of them set: the intrinsic size is read first (header only) and the
///   other side is derived from the source aspect ratio, then the image is decoded
///   and resized. These are two separate reads of the file;
/// - both set: resized to exactly that box.
pub fn transcode_image(
	file_path: impl AsRef<Path>,
	width: u32,
	height: u32,
	quality: u8,
) -> Result<Vec<u8>> {
	let file_path = file_path.as_ref();

	let target = match (width, height) {
		(0, 0) => None,
		(0, _) | (_, 0) => {
			let intrinsic =
				image_dimensions(file_path).map_err(|e| Error::transcode(file_path, e))?;
			trace!(?intrinsic, "Read intrinsic dimensions");
			Some(
				complete_dimensions(width, height, intrinsic)
					.map_err(|e| Error::transcode(file_path, e))?,
			)
		}
		requested => Some(requested),
	};

	// Checked before decoding so a huge target never gets allocated
	if let Some(target) = target {
		check_webp_dimensions(file_path, target)?;
	}

	let mut img = format_image(file_path).map_err(|e| Error::transcode(file_path, e))?;

	match target {
		Some((w, h)) if img.dimensions() != (w, h) => {
			img = img.resize_exact(w, h, FilterType::Triangle);
		}
		Some(_) => {}
		None => check_webp_dimensions(file_path, img.dimensions())?,
	}

	// The WebP encoder only takes 8 bit RGB(A) buffers
	if !matches!(img, DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_)) {
		img = DynamicImage::ImageRgba8(img.to_rgba8());
	}

	let encoder =
		Encoder::from_image(&img).map_err(|reason| Error::transcode(file_path, reason))?;

	// `WebPMemory` is !Send, so we copy it out right away
	encoder
		.encode_simple(false, f32::from(quality.clamp(1, 100)))
		.map(|memory| memory.deref().to_owned())
		.map_err(|e| Error::transcode(file_path, format!("webp encoder failed: {e:?}")))
}

fn check_webp_dimensions(file_path: &Path, (width, height): (u32, u32)) -> Result<()> {
	if width > WEBP_MAX_DIMENSION || height > WEBP_MAX_DIMENSION {
		return Err(Error::transcode(
			file_path,
			format!("{width}x{height} is over the {WEBP_MAX_DIMENSION}px webp limit"),
		));
	}

	Ok(())
}

/// Run [`transcode_image`] on the blocking thread pool.
#[instrument(skip_all, fields(path = %request.file_path.display()))]
pub async fn transcode_off_thread(request: ImageRequest) -> Result<Vec<u8>> {
	let ImageRequest {
		file_path,
		width,
		height,
		quality,
	} = request;

	off_thread(file_path.clone(), move || {
		transcode_image(&file_path, width, height, quality)
	})
	.await
}

/// Run `job` on the blocking thread pool, turning a panic inside a decoder into a
/// regular transcode error.
async fn off_thread<F>(file_path: PathBuf, job: F) -> Result<Vec<u8>>
where
	F: FnOnce() -> Result<Vec<u8>> + Send + 'static,
{
	let (tx, rx) = oneshot::channel();

	// Using channel instead of waiting the JoinHandle as for some reason
	// the JoinHandle can take some extra time to complete
	let handle = spawn_blocking({
		let file_path = file_path.clone();

		move || {
			// Handling error on receiver side
			let _ = tx.send(panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|_| {
				error!(path = %file_path.display(), "Image transcoder panicked;");
				Err(Error::transcode(
					&file_path,
					"internal panic on third party crate",
				))
			}));
		}
	});

	if let Ok(res) = rx.await {
		res
	} else {
		error!("Transcode task died before answering");
		Err(Error::transcode(
			&file_path,
			handle
				.await
				.err()
				.map_or_else(|| "transcode task vanished".to_string(), |e| e.to_string()),
		))
	}
}

/// Wrap freshly transcoded bytes into a response plan.
#[must_use]
pub fn plan_image_response(bytes: Vec<u8>) -> ResponsePlan {
	let content_length = bytes.len();

	ResponsePlan::new(200, Payload::Inline { bytes })
		.with_header("Content-Type", WEBP_MIME_TYPE)
		.with_header("Content-Length", content_length)
		.with_header("Cache-Control", THUMBNAIL_CACHE_CONTROL)
}
