//! Newline-delimited JSON decoding over a byte stream.

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

use crate::TransportError;

/// Longest accepted line, in bytes. A longer line fails the stream.
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Decode `body` into one `T` per non-blank line.
///
/// Items are produced as soon as their line is complete, so memory use does
/// not grow with the size of the body.
pub fn decode<S, T>(url: String, body: S) -> BoxStream<'static, Result<T, TransportError>>
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    decode_bounded(url, body, MAX_LINE_LENGTH)
}

fn decode_bounded<S, T>(
    url: String,
    body: S,
    max_line_length: usize,
) -> BoxStream<'static, Result<T, TransportError>>
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let codec = LinesCodec::new_with_max_length(max_line_length);
    FramedRead::new(StreamReader::new(body), codec)
        .enumerate()
        .filter_map(move |(index, line)| {
            let url = url.clone();
            async move {
                match line {
                    Ok(line) if line.trim().is_empty() => None,
                    Ok(line) => Some(serde_json::from_str::<T>(&line).map_err(|source| {
                        TransportError::MalformedLine {
                            url,
                            line: index + 1,
                            source,
                        }
                    })),
                    Err(LinesCodecError::Io(source)) => {
                        Some(Err(TransportError::Body { url, source }))
                    }
                    Err(e) => Some(Err(TransportError::interrupted(url, e.to_string()))),
                }
            }
        })
        .boxed()
}
