//! Line echo handler.
//!
//! Protocol: newline-delimited units
//! - Read: `<bytes>\n`
//! - Write: the same `<bytes>\n`
//!
//! The handler never fails: whatever ends the loop, the caller gets the
//! record accumulated so far.

use crate::record::ConnectionRecord;
use bytes::{Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Initial read buffer size
const BUFFER_SIZE: usize = 4 * 1024;

/// Longest unit accepted before the connection is dropped
pub const MAX_UNIT_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Serve one connection until the peer closes it or an I/O error occurs.
pub async fn serve<S>(stream: &mut S, host_name: String) -> ConnectionRecord
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    serve_with_limit(stream, host_name, MAX_UNIT_SIZE).await
}

async fn serve_with_limit<S>(
    stream: &mut S,
    host_name: String,
    max_unit: usize,
) -> ConnectionRecord
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut record = ConnectionRecord::new(host_name);
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        let unit = match read_unit(stream, &mut buffer, max_unit).await {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                trace!(peer = %record.host_name, "Connection closed by client");
                break;
            }
            Err(e) => {
                warn!(peer = %record.host_name, error = %e, "Read failed");
                break;
            }
        };

        record.record_unit(unit.len());

        if let Err(e) = stream.write_all(&unit).await {
            debug!(peer = %record.host_name, error = %e, "Write failed");
            break;
        }
    }

    record.close();
    record
}

/// Read the next `\n`-terminated unit.
///
/// Returns `Ok(None)` on end of stream; bytes after the last terminator are
/// dropped.
async fn read_unit<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    max_unit: usize,
) -> io::Result<Option<Bytes>>
where
    S: AsyncRead + Unpin,
{
    let mut scanned = 0;

    loop {
        if let Some(pos) = buffer[scanned..].iter().position(|&b| b == b'\n') {
            let end = scanned + pos + 1;
            return Ok(Some(buffer.split_to(end).freeze()));
        }
        scanned = buffer.len();

        if buffer.len() > max_unit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {max_unit} bytes"),
            ));
        }

        let n = stream.read_buf(buffer).await?;
        if n == 0 {
            if !buffer.is_empty() {
                trace!(len = buffer.len(), "Discarding unterminated trailing data");
            }
            return Ok(None);
        }
    }
}
