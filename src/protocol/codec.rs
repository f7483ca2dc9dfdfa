//! Protocol codec
//!
//! Encoding and decoding functions for the RESP wire protocol.
//!
//! ## Wire Format
//!
//! ### Request Format
//! ```text
//! *<argc>\r\n
//! $<len>\r\n<name>\r\n
//! $<len>\r\n<arg 1>\r\n
//! ...
//! ```
//! Arguments are length-prefixed, so any byte (including `\r\n`) may appear
//! inside an argument.
//!
//! ### Reply Format
//! ```text
//! +<status>\r\n             status
//! -<message>\r\n            error
//! :<i64>\r\n                integer
//! $<len>\r\n<bytes>\r\n     bulk ($-1 = null)
//! *<count>\r\n<replies>     multi-bulk (*-1 = null)
//! ```

use std::io::{BufRead, Cursor, Read, Write};

use bytes::Bytes;

use super::{Command, Reply};
use crate::error::{KvError, Result};

/// Line terminator
pub const CRLF: &[u8] = b"\r\n";

/// Largest bulk payload accepted (512 MB, the server-side limit)
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Initial buffer for a bulk body
const BULK_PREALLOC: usize = 64 * 1024;

/// Largest multi-bulk element count accepted
pub const MAX_MULTI_BULK_LEN: i64 = 64 * 1024 * 1024;

/// Deepest multi-bulk nesting accepted
const MAX_DEPTH: usize = 32;

// =============================================================================
// Request Encoding/Decoding
// =============================================================================

/// Encode a request (name + arguments) into `out`
pub fn encode_request<A: AsRef<[u8]>>(name: &str, args: &[A], out: &mut Vec<u8>) {
    out.push(b'*');
    push_int(out, (args.len() + 1) as i64);
    out.extend_from_slice(CRLF);
    push_bulk(out, name.as_bytes());
    for arg in args {
        push_bulk(out, arg.as_ref());
    }
}

/// Encode a command to bytes
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    encode_command_into(command, &mut out);
    out
}

/// Append an encoded command to `out`
pub fn encode_command_into(command: &Command, out: &mut Vec<u8>) {
    encode_request(command.name(), command.args(), out);
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    writer.write_all(&encode_command(command))?;
    writer.flush()?;
    Ok(())
}

/// Read one request (an array of bulk strings) from a stream
///
/// Returns the raw arguments, name first.
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<Vec<Bytes>> {
    let mut line = Vec::with_capacity(32);
    read_line(reader, &mut line)?;

    if line.first() != Some(&b'*') {
        return Err(KvError::Protocol(format!(
            "Expected request array, got {:?}",
            String::from_utf8_lossy(&line)
        )));
    }
    let count = parse_length(&line[1..], MAX_MULTI_BULK_LEN)?;
    if count < 1 {
        return Err(KvError::Protocol("Empty request array".to_string()));
    }

    let mut args = Vec::with_capacity((count as usize).min(1024));
    for _ in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return Err(KvError::Protocol("Expected bulk argument".to_string()));
        }
        let len = parse_length(&line[1..], MAX_BULK_LEN)?;
        if len < 0 {
            return Err(KvError::Protocol("Null bulk in request".to_string()));
        }
        args.push(read_bulk_body(reader, len as usize)?);
    }
    Ok(args)
}

/// Decode a request from bytes
pub fn decode_request(bytes: &[u8]) -> Result<Vec<Bytes>> {
    read_request(&mut Cursor::new(bytes))
}

// =============================================================================
// Reply Encoding/Decoding
// =============================================================================

/// Encode a reply into `out`
pub fn encode_reply(reply: &Reply, out: &mut Vec<u8>) {
    match reply {
        Reply::Status(text) => {
            out.push(b'+');
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(CRLF);
        }
        Reply::Error(text) => {
            out.push(b'-');
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(CRLF);
        }
        Reply::Integer(value) => {
            out.push(b':');
            push_int(out, *value);
            out.extend_from_slice(CRLF);
        }
        Reply::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
        Reply::Bulk(Some(data)) => push_bulk(out, data),
        Reply::MultiBulk(None) => out.extend_from_slice(b"*-1\r\n"),
        Reply::MultiBulk(Some(items)) => {
            out.push(b'*');
            push_int(out, items.len() as i64);
            out.extend_from_slice(CRLF);
            for item in items {
                encode_reply(item, out);
            }
        }
    }
}

/// Write a reply to a stream
pub fn write_reply<W: Write>(writer: &mut W, reply: &Reply) -> Result<()> {
    let mut out = Vec::with_capacity(64);
    encode_reply(reply, &mut out);
    writer.write_all(&out)?;
    writer.flush()?;
    Ok(())
}

/// Read one reply from a stream
///
/// Any error leaves the stream at an unknown position; the caller must not
/// reuse it.
pub fn read_reply<R: BufRead>(reader: &mut R) -> Result<Reply> {
    let mut line = Vec::with_capacity(64);
    read_reply_at(reader, &mut line, 0)
}

/// Decode one reply from bytes
pub fn decode_reply(bytes: &[u8]) -> Result<Reply> {
    read_reply(&mut Cursor::new(bytes))
}

fn read_reply_at<R: BufRead>(reader: &mut R, line: &mut Vec<u8>, depth: usize) -> Result<Reply> {
    if depth > MAX_DEPTH {
        return Err(KvError::Protocol("Multi-bulk nesting too deep".to_string()));
    }

    read_line(reader, line)?;
    let Some((&marker, rest)) = line.split_first() else {
        return Err(KvError::Protocol("Empty reply line".to_string()));
    };

    match marker {
        b'+' => Ok(Reply::Status(String::from_utf8_lossy(rest).trim().to_string())),
        b'-' => Ok(Reply::Error(String::from_utf8_lossy(rest).trim().to_string())),
        b':' => Ok(Reply::Integer(parse_i64(rest)?)),
        b'$' => {
            let len = parse_length(rest, MAX_BULK_LEN)?;
            if len < 0 {
                return Ok(Reply::Bulk(None));
            }
            Ok(Reply::Bulk(Some(read_bulk_body(reader, len as usize)?)))
        }
        b'*' => {
            let count = parse_length(rest, MAX_MULTI_BULK_LEN)?;
            if count < 0 {
                return Ok(Reply::MultiBulk(None));
            }
            let mut items = Vec::with_capacity((count as usize).min(1024));
            for _ in 0..count {
                items.push(read_reply_at(reader, line, depth + 1)?);
            }
            Ok(Reply::MultiBulk(Some(items)))
        }
        other => Err(KvError::Protocol(format!(
            "Unknown reply type: 0x{:02x}",
            other
        ))),
    }
}

// =============================================================================
// Framing helpers
// =============================================================================

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(KvError::Protocol("Connection closed by peer".to_string()));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' || buf[buf.len() - 1] != b'\n' {
        return Err(KvError::Protocol("Line not terminated by CRLF".to_string()));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn read_bulk_body<R: BufRead>(reader: &mut R, len: usize) -> Result<Bytes> {
    // Grow with the data actually received, not the declared length
    let expected = len + CRLF.len();
    let mut data = Vec::with_capacity(expected.min(BULK_PREALLOC));
    reader.by_ref().take(expected as u64).read_to_end(&mut data)?;
    if data.len() < expected {
        return Err(KvError::Protocol(format!(
            "Truncated bulk: expected {} bytes",
            len
        )));
    }
    if &data[len..] != CRLF {
        return Err(KvError::Protocol(format!(
            "Bulk of {} bytes not terminated by CRLF",
            len
        )));
    }
    data.truncate(len);
    Ok(Bytes::from(data))
}

fn parse_i64(data: &[u8]) -> Result<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| {
            KvError::Protocol(format!(
                "Invalid integer: {:?}",
                String::from_utf8_lossy(data)
            ))
        })
}

/// Parse a declared length; `-1` is the only negative value allowed.
fn parse_length(data: &[u8], max: i64) -> Result<i64> {
    let len = parse_i64(data)?;
    if len < -1 || len > max {
        return Err(KvError::Protocol(format!("Invalid length: {}", len)));
    }
    Ok(len)
}

fn push_bulk(out: &mut Vec<u8>, data: &[u8]) {
    out.push(b'$');
    push_int(out, data.len() as i64);
    out.extend_from_slice(CRLF);
    out.extend_from_slice(data);
    out.extend_from_slice(CRLF);
}

fn push_int(out: &mut Vec<u8>, value: i64) {
    // itoa into a stack buffer; i64::MIN needs 20 bytes
    let mut buf = [0u8; 20];
    let mut pos = buf.len();
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (magnitude % 10) as u8;
        magnitude /= 10;
        if magnitude == 0 {
            break;
        }
    }
    if negative {
        pos -= 1;
        buf[pos] = b'-';
    }
    out.extend_from_slice(&buf[pos..]);
}
