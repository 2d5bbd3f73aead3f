use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use std::io;
use tokio_util::io::{ReaderStream, StreamReader};

/// Chunk size used for both relaying and downloading (8 KiB).
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Re-slices an arbitrary byte stream into chunks of at most `chunk_size`
/// bytes, so the consumer never holds more than one bounded buffer at a time.
pub fn bounded_chunks<S, E>(stream: S, chunk_size: usize) -> impl Stream<Item = io::Result<Bytes>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    let reader = StreamReader::new(stream.map_err(io::Error::other));
    ReaderStream::with_capacity(reader, chunk_size)
}
