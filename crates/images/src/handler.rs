use crate::{
	consts,
	error::{Error, Result},
	generic::GenericHandler,
	ImageHandler,
};
use image::DynamicImage;
use std::{ffi::OsStr, path::Path};

/// Decode the image at `path` into memory, picking the handler from its extension.
pub fn format_image(path: impl AsRef<Path>) -> Result<DynamicImage> {
	let path = path.as_ref();
	match_to_handler(&extension_of(path)?)?.handle_image(path)
}

/// Read the intrinsic `(width, height)` of the image at `path` without decoding its pixels.
pub fn image_dimensions(path: impl AsRef<Path>) -> Result<(u32, u32)> {
	let path = path.as_ref();
	match_to_handler(&extension_of(path)?)?.dimensions(path)
}

fn extension_of(path: &Path) -> Result<String> {
	path.extension()
		.and_then(OsStr::to_str)
		.map_or_else(|| Err(Error::NoExtension), |e| Ok(e.to_ascii_lowercase()))
}

fn match_to_handler(ext: &str) -> Result<Box<dyn ImageHandler>> {
	if consts::GENERIC_EXTENSIONS.contains(&ext) {
		Ok(Box::new(GenericHandler {}))
	} else {
		Err(Error::Unsupported)
	}
}
