//! Framing primitives shared by both directions of the codec.

use anyhow::{anyhow, ensure, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Writes `code`, the length word and `payload`.
pub(crate) fn put_frame(buf: &mut BytesMut, code: u8, payload: &[u8]) {
    buf.put_u8(code);
    buf.put_i32((payload.len() + 4) as i32);
    buf.extend_from_slice(payload);
}

pub(crate) fn put_cstring(buf: &mut BytesMut, value: &str) {
    buf.extend_from_slice(value.as_bytes());
    buf.put_u8(0);
}

pub(crate) fn get_cstring(body: &mut Bytes) -> Result<String> {
    let end = body
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| anyhow!("unterminated string"))?;
    let value = String::from_utf8_lossy(&body[..end]).into_owned();
    body.advance(end + 1);
    Ok(value)
}

pub(crate) fn get_i32(body: &mut Bytes) -> Result<i32> {
    ensure!(body.remaining() >= 4, "truncated message");
    Ok(body.get_i32())
}

pub(crate) fn get_i16(body: &mut Bytes) -> Result<i16> {
    ensure!(body.remaining() >= 2, "truncated message");
    Ok(body.get_i16())
}
