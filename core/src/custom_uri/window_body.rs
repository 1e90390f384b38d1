use std::{
	io,
	pin::Pin,
	task::{ready, Context, Poll},
};

use axum::http::HeaderMap;
use bytes::Bytes;
use futures::Stream;
use http_body::{Body, SizeHint};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncReadExt, Take};
use tokio_util::io::ReaderStream;

pin_project! {
	/// Body streaming at most `len` bytes out of an [`AsyncRead`], already positioned
	/// at the start of the window.
	#[derive(Debug)]
	pub struct WindowBody<T> {
		#[pin]
		reader: ReaderStream<Take<T>>,
		remaining: u64,
	}
}

impl<T> WindowBody<T>
where
	T: AsyncRead,
{
	pub(crate) fn new(read: T, capacity: usize, len: u64) -> Self {
		Self {
			reader: ReaderStream::with_capacity(read.take(len), capacity),
			remaining: len,
		}
	}
}

impl<T> Body for WindowBody<T>
where
	T: AsyncRead,
{
	type Data = Bytes;
	type Error = io::Error;

	fn poll_data(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
	) -> Poll<Option<Result<Self::Data, Self::Error>>> {
		let this = self.project();

		let res = ready!(this.reader.poll_next(cx));
		if let Some(Ok(chunk)) = &res {
			*this.remaining = this
				.remaining
				.saturating_sub(u64::try_from(chunk.len()).unwrap_or(u64::MAX));
		}

		Poll::Ready(res)
	}

	fn poll_trailers(
		self: Pin<&mut Self>,
		_cx: &mut Context<'_>,
	) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
		Poll::Ready(Ok(None))
	}

	fn is_end_stream(&self) -> bool {
		self.remaining == 0
	}

	fn size_hint(&self) -> SizeHint {
		SizeHint::with_exact(self.remaining)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::io::Cursor;

	#[tokio::test]
	async fn stops_at_the_window_end() {
		let data = (0..=255_u8).cycle().take(10_000).collect::<Vec<_>>();
		let mut cursor = Cursor::new(data.clone());
		cursor.set_position(100);

		let body = WindowBody::new(cursor, 64, 1000);
		assert_eq!(body.size_hint().exact(), Some(1000));

		let bytes = hyper::body::to_bytes(body).await.unwrap();
		assert_eq!(&bytes[..], &data[100..1100]);
	}
}
