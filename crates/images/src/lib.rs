#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	clippy::expect_used,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::as_conversions,
	clippy::dbg_macro
)]
#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod consts;
mod error;
mod generic;
mod handler;

pub use error::{Error, Result};
pub use handler::{format_image, image_dimensions};
pub use image::DynamicImage;
use std::{fs, io::Read, path::Path};

pub trait ImageHandler {
	fn maximum_size(&self) -> u64
	where
		Self: Sized; // thanks vtables

	fn get_data(&self, path: &Path) -> Result<Vec<u8>>
	where
		Self: Sized,
	{
		let mut file = fs::File::open(path)?;
		if file.metadata()?.len() > self.maximum_size() {
			Err(Error::TooLarge)
		} else {
			let mut data = vec![];
			file.read_to_end(&mut data)?;
			Ok(data)
		}
	}

	fn handle_image(&self, path: &Path) -> Result<DynamicImage>;

	fn dimensions(&self, path: &Path) -> Result<(u32, u32)>;
}

/// Fill in whichever of `width`/`height` is unset (zero) from the `intrinsic` size,
/// keeping the source aspect ratio.
///
/// - both unset: the intrinsic size is returned untouched;
/// - both set: the requested box is returned as is, no aspect correction happens;
/// - one set: `missing = round(given * intrinsic_other / intrinsic_given)`, never below 1px.
#[allow(
	clippy::cast_possible_truncation,
	clippy::cast_sign_loss,
	clippy::as_conversions
)]
pub fn complete_dimensions(
	width: u32,
	height: u32,
	(intrinsic_width, intrinsic_height): (u32, u32),
) -> Result<(u32, u32)> {
	let scale = |given: u32, intrinsic_given: u32, intrinsic_other: u32| {
		if intrinsic_width == 0 || intrinsic_height == 0 {
			return Err(Error::InvalidDimensions {
				width: intrinsic_width,
				height: intrinsic_height,
			});
		}

		let scaled = (f64::from(given) * (f64::from(intrinsic_other) / f64::from(intrinsic_given)))
			.round() as u32;
		Ok(scaled.max(1))
	};

	match (width, height) {
		(0, 0) => Ok((intrinsic_width, intrinsic_height)),
		(width, 0) => scale(width, intrinsic_width, intrinsic_height).map(|height| (width, height)),
		(0, height) => scale(height, intrinsic_height, intrinsic_width).map(|width| (width, height)),
		requested => Ok(requested),
	}
}
