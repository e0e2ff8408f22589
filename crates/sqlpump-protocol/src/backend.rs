use crate::messages::{BackendMessage, ErrorFields, RowDescriptionField, TransactionState};
use crate::wire::{get_cstring, get_i16, get_i32};
use anyhow::{anyhow, bail, ensure, Result};
use bytes::{Buf, Bytes, BytesMut};

/// Largest frame a client will buffer before treating the stream as corrupt.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// Decodes the next complete server message from the front of `buf`.
///
/// Returns `Ok(None)` while the frame is still incomplete; the bytes stay in
/// `buf` until the rest arrives.
pub fn decode_backend(buf: &mut BytesMut) -> Result<Option<BackendMessage>> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let code = buf[0];
    let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    if len < 4 || len as usize > MAX_FRAME_LEN {
        bail!("invalid length {len} for message '{}'", code as char);
    }
    let total = 1 + len as usize;
    if buf.len() < total {
        buf.reserve(total - buf.len());
        return Ok(None);
    }
    let mut frame = buf.split_to(total);
    frame.advance(5);
    parse_backend(code, frame.freeze()).map(Some)
}

fn parse_backend(code: u8, mut body: Bytes) -> Result<BackendMessage> {
    let msg = match code {
        b'R' => match get_i32(&mut body)? {
            0 => BackendMessage::AuthenticationOk,
            3 => BackendMessage::AuthenticationCleartextPassword,
            5 => {
                ensure!(body.remaining() >= 4, "truncated md5 salt");
                let mut salt = [0u8; 4];
                body.copy_to_slice(&mut salt);
                BackendMessage::AuthenticationMd5Password { salt }
            }
            10 => {
                let mut mechanisms = Vec::new();
                loop {
                    let mechanism = get_cstring(&mut body)?;
                    if mechanism.is_empty() {
                        break;
                    }
                    mechanisms.push(mechanism);
                }
                BackendMessage::AuthenticationSasl { mechanisms }
            }
            other => BackendMessage::AuthenticationOther { code: other },
        },
        b'S' => BackendMessage::ParameterStatus {
            key: get_cstring(&mut body)?,
            value: get_cstring(&mut body)?,
        },
        b'K' => BackendMessage::BackendKeyData {
            pid: get_i32(&mut body)?,
            secret: get_i32(&mut body)?,
        },
        b'Z' => {
            ensure!(body.has_remaining(), "truncated ReadyForQuery");
            let byte = body.get_u8();
            let state = TransactionState::from_wire_byte(byte)
                .ok_or_else(|| anyhow!("unknown transaction state '{}'", byte as char))?;
            BackendMessage::ReadyForQuery { state }
        }
        b'T' => {
            let count = get_i16(&mut body)?;
            let mut fields = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count {
                let name = get_cstring(&mut body)?;
                let _table_oid = get_i32(&mut body)?;
                let _column = get_i16(&mut body)?;
                let type_oid = get_i32(&mut body)?;
                let _type_len = get_i16(&mut body)?;
                let _type_mod = get_i32(&mut body)?;
                let _format = get_i16(&mut body)?;
                fields.push(RowDescriptionField { name, type_oid });
            }
            BackendMessage::RowDescription { fields }
        }
        b'D' => {
            let count = get_i16(&mut body)?;
            let mut values = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count {
                let len = get_i32(&mut body)?;
                if len < 0 {
                    values.push(None);
                    continue;
                }
                let len = len as usize;
                ensure!(body.remaining() >= len, "truncated DataRow value");
                values.push(Some(body.split_to(len).to_vec()));
            }
            BackendMessage::DataRow { values }
        }
        b'C' => BackendMessage::CommandComplete {
            tag: get_cstring(&mut body)?,
        },
        b'I' => BackendMessage::EmptyQueryResponse,
        b'E' => BackendMessage::ErrorResponse {
            fields: get_error_fields(&mut body)?,
        },
        b'N' => BackendMessage::NoticeResponse {
            fields: get_error_fields(&mut body)?,
        },
        b'A' => BackendMessage::NotificationResponse {
            pid: get_i32(&mut body)?,
            channel: get_cstring(&mut body)?,
            payload: get_cstring(&mut body)?,
        },
        // Column formats of the copy responses are not needed in text mode.
        b'G' => BackendMessage::CopyInResponse,
        b'H' => BackendMessage::CopyOutResponse,
        b'W' => BackendMessage::CopyBothResponse,
        b'd' => BackendMessage::CopyData {
            data: body.to_vec(),
        },
        b'c' => BackendMessage::CopyDone,
        other => BackendMessage::Unsupported { code: other },
    };
    Ok(msg)
}

fn get_error_fields(body: &mut Bytes) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    loop {
        ensure!(body.has_remaining(), "unterminated error fields");
        let tag = body.get_u8();
        if tag == 0 {
            break;
        }
        fields.set(tag, get_cstring(body)?);
    }
    Ok(fields)
}
