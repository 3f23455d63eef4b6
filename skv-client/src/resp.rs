//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse store replies for the pooled
//! connections, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Bounded Allocation**: Length headers are validated and capped before
//!    any buffer is reserved.
//! 5. **Nil Preservation**: Null bulk strings and null arrays stay distinct, since
//!    a null EXEC reply is how an aborted optimistic transaction is reported.

use std::io::{BufRead, Read, Write};

use crate::error::{ClientError, ClientResult};

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK, +QUEUED or +PONG style replies.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for the null bulk string.
    Bulk(Option<Vec<u8>>),
    /// *... arrays.
    Array(Vec<RespValue>),
    /// *-1, the null array.
    Nil,
}

impl RespValue {
    /// Returns true for the null bulk string and the null array.
    pub fn is_nil(&self) -> bool {
        matches!(self, RespValue::Nil | RespValue::Bulk(None))
    }

    /// Returns the message of an error reply.
    pub fn error_message(&self) -> Option<String> {
        match self {
            RespValue::Error(message) => Some(String::from_utf8_lossy(message).into_owned()),
            _ => None,
        }
    }

    /// Turns an error reply into `ClientError::Server`, passing other values through.
    pub fn into_result(self) -> ClientResult<RespValue> {
        match self {
            RespValue::Error(message) => Err(ClientError::Server {
                message: String::from_utf8_lossy(&message).into_owned(),
            }),
            other => Ok(other),
        }
    }
}

/// Largest bulk string accepted from the store, its own default `proto-max-bulk-len`.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// Upper bound on memory reserved up front for a bulk body.
const BULK_PREALLOC: usize = 64 * 1024;
/// Upper bound on array slots reserved before the items arrive.
const ARRAY_PREALLOC: usize = 1024;

/// Encodes a RESP2 array command into the provided buffer.
///
/// The buffer is appended to, so several commands can be batched before a
/// single write.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    // Writing into a Vec cannot fail.
    let _ = write!(out, "*{}\r\n", args.len());
    for arg in args {
        let _ = write!(out, "${}\r\n", arg.len());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one RESP value from the buffered reader.
///
/// Declared lengths are checked before anything is allocated, so a corrupt
/// or hostile header yields `ClientError::Protocol` instead of a huge
/// allocation.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<RespValue> {
    read_line(reader, line_buf)?;
    let Some((&marker, payload)) = line_buf.split_first() else {
        return Err(ClientError::Protocol("empty reply line".to_string()));
    };

    match marker {
        b'+' => Ok(RespValue::Simple(payload.to_vec())),
        b'-' => Ok(RespValue::Error(payload.to_vec())),
        b':' => parse_integer(payload).map(RespValue::Integer),
        b'$' => match declared_len(payload, "bulk")? {
            None => Ok(RespValue::Bulk(None)),
            Some(len) if len > MAX_BULK_LEN => Err(ClientError::Protocol(format!(
                "bulk length {len} exceeds limit of {MAX_BULK_LEN} bytes"
            ))),
            Some(len) => read_bulk(reader, len).map(|data| RespValue::Bulk(Some(data))),
        },
        b'*' => match declared_len(payload, "array")? {
            None => Ok(RespValue::Nil),
            Some(len) => read_array(reader, len, line_buf),
        },
        other => Err(ClientError::Protocol(format!(
            "unknown reply type byte 0x{other:02x}"
        ))),
    }
}

/// Length header of a bulk string or array; `None` for the `-1` null marker.
fn declared_len(payload: &[u8], kind: &str) -> ClientResult<Option<usize>> {
    match parse_integer(payload)? {
        -1 => Ok(None),
        len => usize::try_from(len)
            .map(Some)
            .map_err(|_| ClientError::Protocol(format!("invalid {kind} length {len}"))),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: usize) -> ClientResult<Vec<u8>> {
    // Grows with the bytes that actually arrive, not with the header.
    let mut data = Vec::with_capacity(len.min(BULK_PREALLOC));
    let body = u64::try_from(len)
        .map_err(|_| ClientError::Protocol(format!("bulk length {len} out of range")))?;
    reader.by_ref().take(body).read_to_end(&mut data)?;
    if data.len() != len {
        return Err(ClientError::Protocol(format!(
            "bulk string truncated after {} of {len} bytes",
            data.len()
        )));
    }

    let mut terminator = [0u8; 2];
    reader.read_exact(&mut terminator)?;
    if &terminator != b"\r\n" {
        return Err(ClientError::Protocol("bulk string missing CRLF".to_string()));
    }
    Ok(data)
}

fn read_array<R: BufRead>(
    reader: &mut R,
    len: usize,
    line_buf: &mut Vec<u8>,
) -> ClientResult<RespValue> {
    let mut items = Vec::with_capacity(len.min(ARRAY_PREALLOC));
    for _ in 0..len {
        items.push(read_response(reader, line_buf)?);
    }
    Ok(RespValue::Array(items))
}

/// Reads one CRLF-terminated line into `buf`, without the terminator.
fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(ClientError::Protocol("connection closed by peer".to_string()));
    }
    let Some(line_len) = buf.strip_suffix(b"\r\n").map(<[u8]>::len) else {
        return Err(ClientError::Protocol("reply line missing CRLF".to_string()));
    };
    buf.truncate(line_len);
    Ok(())
}

fn parse_integer(data: &[u8]) -> ClientResult<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| {
            ClientError::Protocol(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(data)
            ))
        })
}
