//! Control channel wire codec
//!
//! Control messages use HTTP-style headers followed by a JSON body:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

/// Upper bound for a single control message body
const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

const LENGTH_HEADER: &str = "Content-Length:";

/// A peer hanging up mid-message is a closed channel, not an IO failure
fn closed_on_eof(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::ControlClosed,
        _ => Error::Io(e),
    }
}

/// Body length announced by one header line, if it is the length header
fn content_length(line: &str) -> Result<Option<usize>, Error> {
    let Some(value) = line.trim().strip_prefix(LENGTH_HEADER) else {
        return Ok(None);
    };
    let len: usize = value
        .trim()
        .parse()
        .map_err(|_| Error::ControlProtocol(format!("Invalid Content-Length: {}", value.trim())))?;
    if len > MAX_BODY_LEN {
        return Err(Error::ControlProtocol(format!("Content-Length too large: {} bytes", len)));
    }
    Ok(Some(len))
}

/// Consume the header block and return the announced body length
///
/// `Ok(None)` means the stream ended before the first header byte.
async fn read_headers<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<usize>, Error> {
    let mut len = None;
    let mut line = String::new();

    for index in 0usize.. {
        line.clear();
        if reader.read_line(&mut line).await.map_err(closed_on_eof)? == 0 {
            return match index {
                0 => Ok(None),
                _ => Err(Error::ControlClosed),
            };
        }
        if line.trim_end_matches(['\r', '\n']).is_empty() {
            break;
        }
        // Headers other than the length are ignored
        if let Some(value) = content_length(&line)? {
            len = Some(value);
        }
    }

    len.map(Some)
        .ok_or_else(|| Error::ControlProtocol("Missing Content-Length header".to_string()))
}

/// Read one control message from the stream
///
/// Returns `Ok(None)` on a clean end of stream before any header byte, so a
/// server can tell an idle disconnect from a truncated message.
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>, Error> {
    let Some(len) = read_headers(reader).await? else {
        return Ok(None);
    };

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(closed_on_eof)?;

    String::from_utf8(body)
        .map(Some)
        .map_err(|e| Error::ControlProtocol(format!("Invalid UTF-8: {}", e)))
}

/// Write one control message to the stream
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<(), Error> {
    let frame = format!("{} {}\r\n\r\n{}", LENGTH_HEADER, json.len(), json);
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
