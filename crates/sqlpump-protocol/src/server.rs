//! The server's side of the conversation: reading what a client sends and
//! writing what a server answers. Clients never need it; it backs the fake
//! servers used in tests and is built with the `server` feature.

use crate::backend::MAX_FRAME_LEN;
use crate::messages::{BackendMessage, ErrorFields, FrontendMessage, PROTOCOL_VERSION};
use crate::wire::{get_cstring, get_i32, put_cstring, put_frame};
use anyhow::{ensure, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads the untagged StartupMessage that opens every session.
pub async fn read_startup<S: AsyncRead + Unpin>(stream: &mut S) -> Result<FrontendMessage> {
    let len = stream.read_i32().await?;
    ensure!(
        len >= 8 && len as usize <= MAX_FRAME_LEN,
        "invalid startup length {len}"
    );
    let mut body = read_body(stream, len as usize - 4).await?;
    let version = get_i32(&mut body)?;
    ensure!(
        version == PROTOCOL_VERSION,
        "unsupported protocol version {version}"
    );
    let mut params = HashMap::new();
    loop {
        let key = get_cstring(&mut body)?;
        if key.is_empty() {
            break;
        }
        let value = get_cstring(&mut body)?;
        params.insert(key, value);
    }
    Ok(FrontendMessage::Startup { params })
}

/// Reads one tagged client message. A stream closed between messages reads
/// as `Terminate`.
pub async fn read_message<S: AsyncRead + Unpin>(stream: &mut S) -> Result<FrontendMessage> {
    let code = match stream.read_u8().await {
        Ok(code) => code,
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(FrontendMessage::Terminate),
        Err(err) => return Err(err.into()),
    };
    let len = stream.read_i32().await?;
    ensure!(
        len >= 4 && len as usize <= MAX_FRAME_LEN,
        "invalid length {len} for message '{}'",
        code as char
    );
    let mut body = read_body(stream, len as usize - 4).await?;
    let msg = match code {
        b'Q' => FrontendMessage::Query {
            sql: get_cstring(&mut body)?,
        },
        b'p' => FrontendMessage::Password {
            password: get_cstring(&mut body)?,
        },
        b'f' => FrontendMessage::CopyFail {
            message: get_cstring(&mut body)?,
        },
        b'X' => FrontendMessage::Terminate,
        other => FrontendMessage::Unsupported { code: other },
    };
    Ok(msg)
}

async fn read_body<S: AsyncRead + Unpin>(stream: &mut S, len: usize) -> Result<Bytes> {
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Bytes::from(body))
}

/// Appends the wire form of a server message to `buf`.
pub fn encode_backend(msg: &BackendMessage, buf: &mut BytesMut) {
    let mut payload = BytesMut::new();
    let code = match msg {
        BackendMessage::AuthenticationOk => {
            payload.put_i32(0);
            b'R'
        }
        BackendMessage::AuthenticationCleartextPassword => {
            payload.put_i32(3);
            b'R'
        }
        BackendMessage::AuthenticationMd5Password { salt } => {
            payload.put_i32(5);
            payload.extend_from_slice(salt);
            b'R'
        }
        BackendMessage::AuthenticationSasl { mechanisms } => {
            payload.put_i32(10);
            for mechanism in mechanisms {
                put_cstring(&mut payload, mechanism);
            }
            payload.put_u8(0);
            b'R'
        }
        BackendMessage::AuthenticationOther { code } => {
            payload.put_i32(*code);
            b'R'
        }
        BackendMessage::ParameterStatus { key, value } => {
            put_cstring(&mut payload, key);
            put_cstring(&mut payload, value);
            b'S'
        }
        BackendMessage::BackendKeyData { pid, secret } => {
            payload.put_i32(*pid);
            payload.put_i32(*secret);
            b'K'
        }
        BackendMessage::ReadyForQuery { state } => {
            payload.put_u8(state.wire_byte());
            b'Z'
        }
        BackendMessage::RowDescription { fields } => {
            payload.put_i16(fields.len() as i16);
            for field in fields {
                put_cstring(&mut payload, &field.name);
                payload.put_i32(0); // table oid
                payload.put_i16(0); // attribute number
                payload.put_i32(field.type_oid);
                payload.put_i16(-1); // type length
                payload.put_i32(-1); // type modifier
                payload.put_i16(0); // text format
            }
            b'T'
        }
        BackendMessage::DataRow { values } => {
            payload.put_i16(values.len() as i16);
            for value in values {
                match value {
                    Some(bytes) => {
                        payload.put_i32(bytes.len() as i32);
                        payload.extend_from_slice(bytes);
                    }
                    None => payload.put_i32(-1),
                }
            }
            b'D'
        }
        BackendMessage::CommandComplete { tag } => {
            put_cstring(&mut payload, tag);
            b'C'
        }
        BackendMessage::EmptyQueryResponse => b'I',
        BackendMessage::ErrorResponse { fields } => {
            put_error_fields(&mut payload, fields);
            b'E'
        }
        BackendMessage::NoticeResponse { fields } => {
            put_error_fields(&mut payload, fields);
            b'N'
        }
        BackendMessage::NotificationResponse {
            pid,
            channel,
            payload: text,
        } => {
            payload.put_i32(*pid);
            put_cstring(&mut payload, channel);
            put_cstring(&mut payload, text);
            b'A'
        }
        BackendMessage::CopyInResponse => copy_response(&mut payload, b'G'),
        BackendMessage::CopyOutResponse => copy_response(&mut payload, b'H'),
        BackendMessage::CopyBothResponse => copy_response(&mut payload, b'W'),
        BackendMessage::CopyData { data } => {
            payload.extend_from_slice(data);
            b'd'
        }
        BackendMessage::CopyDone => b'c',
        BackendMessage::Unsupported { code } => *code,
    };
    put_frame(buf, code, &payload);
}

pub async fn write_message<S: AsyncWrite + Unpin>(stream: &mut S, msg: BackendMessage) -> Result<()> {
    let mut buf = BytesMut::new();
    encode_backend(&msg, &mut buf);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Text format, no columns.
fn copy_response(payload: &mut BytesMut, code: u8) -> u8 {
    payload.put_i8(0);
    payload.put_i16(0);
    code
}

fn put_error_fields(payload: &mut BytesMut, fields: &ErrorFields) {
    for (tag, value) in fields.pairs() {
        payload.put_u8(tag);
        put_cstring(payload, value);
    }
    payload.put_u8(0);
}
