use crate::messages::{FrontendMessage, PROTOCOL_VERSION};
use crate::wire::put_frame;
use anyhow::{bail, ensure, Result};
use bytes::{BufMut, BytesMut};

/// Appends the wire form of a client message to `buf`.
///
/// Strings are sent NUL-terminated, so any string holding a NUL byte is
/// refused and nothing is written.
pub fn encode_frontend(msg: &FrontendMessage, buf: &mut BytesMut) -> Result<()> {
    match msg {
        FrontendMessage::Startup { params } => {
            let mut payload = BytesMut::new();
            payload.put_i32(PROTOCOL_VERSION);
            for (key, value) in params {
                put_text(&mut payload, key)?;
                put_text(&mut payload, value)?;
            }
            payload.put_u8(0);
            buf.put_i32((payload.len() + 4) as i32);
            buf.extend_from_slice(&payload);
        }
        FrontendMessage::Query { sql } => put_text_frame(buf, b'Q', sql)?,
        FrontendMessage::Password { password } => put_text_frame(buf, b'p', password)?,
        FrontendMessage::CopyFail { message } => put_text_frame(buf, b'f', message)?,
        FrontendMessage::Terminate => put_frame(buf, b'X', &[]),
        FrontendMessage::Unsupported { code } => {
            bail!("cannot encode unsupported message '{}'", *code as char)
        }
    }
    Ok(())
}

/// Fails if `text` cannot travel as a protocol string.
pub fn check_text(text: &str) -> Result<()> {
    ensure!(!text.contains('\0'), "string contains a NUL byte");
    Ok(())
}

fn put_text_frame(buf: &mut BytesMut, code: u8, text: &str) -> Result<()> {
    let mut payload = BytesMut::with_capacity(text.len() + 1);
    put_text(&mut payload, text)?;
    put_frame(buf, code, &payload);
    Ok(())
}

fn put_text(buf: &mut BytesMut, text: &str) -> Result<()> {
    check_text(text)?;
    crate::wire::put_cstring(buf, text);
    Ok(())
}
