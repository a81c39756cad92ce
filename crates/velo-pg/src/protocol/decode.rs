//! Incremental backend frame decoder.
//!
//! `decode_message` consumes at most one complete frame from the read
//! buffer. An incomplete frame leaves the buffer untouched and returns
//! `None`; the caller resumes after the next read. Malformed input is a
//! permanent protocol error and the connection must be torn down.

use bytes::{Buf, Bytes, BytesMut};

use velo_error::{ConnectionError, Error, Result};

use super::constants::*;
use super::message::{AuthRequest, BackendMessage, ErrorFields, FieldDescription};

fn protocol(msg: impl Into<String>) -> Error {
    ConnectionError::Protocol(msg.into()).into()
}

/// Try to decode one frame. `Ok(None)` means more bytes are needed.
pub fn decode_message(buf: &mut BytesMut) -> Result<Option<BackendMessage>> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let tag = buf[0];
    let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    if len < 4 {
        return Err(protocol(format!("frame length {len} below minimum")));
    }
    let total = len as usize + 1;
    if buf.len() < total {
        return Ok(None);
    }

    let mut frame = buf.split_to(total).freeze();
    frame.advance(5);
    parse_frame(tag, frame).map(Some)
}

fn parse_frame(tag: u8, mut body: Bytes) -> Result<BackendMessage> {
    match tag {
        MSG_AUTHENTICATION => parse_authentication(body),
        MSG_PARAMETER_STATUS => {
            let name = get_cstr(&mut body)?;
            let value = get_cstr(&mut body)?;
            Ok(BackendMessage::ParameterStatus { name, value })
        }
        MSG_BACKEND_KEY_DATA => Ok(BackendMessage::BackendKeyData {
            process_id: get_i32(&mut body)?,
            secret_key: get_i32(&mut body)?,
        }),
        MSG_READY_FOR_QUERY => Ok(BackendMessage::ReadyForQuery {
            status: get_u8(&mut body)?,
        }),
        MSG_ROW_DESCRIPTION => parse_row_description(body),
        MSG_DATA_ROW => parse_data_row(body),
        MSG_COMMAND_COMPLETE => Ok(BackendMessage::CommandComplete {
            tag: get_cstr(&mut body)?,
        }),
        MSG_ERROR_RESPONSE => Ok(BackendMessage::ErrorResponse(parse_error_fields(body)?)),
        MSG_NOTICE_RESPONSE => Ok(BackendMessage::NoticeResponse(parse_error_fields(body)?)),
        MSG_PARSE_COMPLETE => Ok(BackendMessage::ParseComplete),
        MSG_BIND_COMPLETE => Ok(BackendMessage::BindComplete),
        MSG_CLOSE_COMPLETE => Ok(BackendMessage::CloseComplete),
        MSG_NO_DATA => Ok(BackendMessage::NoData),
        MSG_EMPTY_QUERY => Ok(BackendMessage::EmptyQueryResponse),
        MSG_PORTAL_SUSPENDED => Ok(BackendMessage::PortalSuspended),
        MSG_PARAMETER_DESCRIPTION => {
            let n = get_i16(&mut body)?;
            let mut oids = Vec::with_capacity(n.max(0) as usize);
            for _ in 0..n {
                oids.push(get_u32(&mut body)?);
            }
            Ok(BackendMessage::ParameterDescription(oids))
        }
        other => Err(protocol(format!("unexpected message tag 0x{other:02x}"))),
    }
}

fn parse_authentication(mut body: Bytes) -> Result<BackendMessage> {
    let code = get_i32(&mut body)?;
    let req = match code {
        AUTH_OK => AuthRequest::Ok,
        AUTH_CLEARTEXT_PASSWORD => AuthRequest::CleartextPassword,
        AUTH_MD5_PASSWORD => AuthRequest::Md5Password,
        AUTH_SASL => {
            let mut mechanisms = Vec::new();
            loop {
                if body.first() == Some(&0) {
                    break;
                }
                let mech = get_cstr(&mut body)?;
                if mech.is_empty() {
                    break;
                }
                mechanisms.push(mech);
            }
            AuthRequest::Sasl { mechanisms }
        }
        AUTH_SASL_CONTINUE => AuthRequest::SaslContinue { data: body },
        AUTH_SASL_FINAL => AuthRequest::SaslFinal { data: body },
        other => AuthRequest::Other(other),
    };
    Ok(BackendMessage::Authentication(req))
}

fn parse_row_description(mut body: Bytes) -> Result<BackendMessage> {
    let n = get_i16(&mut body)?;
    if n < 0 {
        return Err(protocol("negative column count"));
    }
    let mut fields = Vec::with_capacity(n as usize);
    for _ in 0..n {
        fields.push(FieldDescription {
            name:          get_cstr(&mut body)?,
            table_oid:     get_u32(&mut body)?,
            column_attr:   get_i16(&mut body)?,
            type_oid:      get_u32(&mut body)?,
            type_size:     get_i16(&mut body)?,
            type_modifier: get_i32(&mut body)?,
            format:        get_i16(&mut body)?,
        });
    }
    Ok(BackendMessage::RowDescription(fields))
}

fn parse_data_row(mut body: Bytes) -> Result<BackendMessage> {
    let n = get_i16(&mut body)?;
    if n < 0 {
        return Err(protocol("negative column count"));
    }
    let mut columns = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let len = get_i32(&mut body)?;
        if len < 0 {
            columns.push(None);
        } else {
            let len = len as usize;
            if body.remaining() < len {
                return Err(protocol("column value runs past frame end"));
            }
            columns.push(Some(body.split_to(len)));
        }
    }
    Ok(BackendMessage::DataRow(columns))
}

fn parse_error_fields(mut body: Bytes) -> Result<ErrorFields> {
    let mut fields = ErrorFields {
        severity: String::new(),
        code:     String::new(),
        message:  String::new(),
        detail:   None,
    };
    loop {
        let field = get_u8(&mut body)?;
        if field == 0 {
            break;
        }
        let value = get_cstr(&mut body)?;
        match field {
            FIELD_SEVERITY => fields.severity = value,
            FIELD_CODE => fields.code = value,
            FIELD_MESSAGE => fields.message = value,
            FIELD_DETAIL => fields.detail = Some(value),
            _ => {}
        }
    }
    Ok(fields)
}

// Checked primitive readers. Frames are length-delimited, so running out of
// bytes mid-frame means the backend (or our framing) is broken.

fn get_u8(b: &mut Bytes) -> Result<u8> {
    if b.remaining() < 1 {
        return Err(protocol("truncated frame"));
    }
    Ok(b.get_u8())
}

fn get_i16(b: &mut Bytes) -> Result<i16> {
    if b.remaining() < 2 {
        return Err(protocol("truncated frame"));
    }
    Ok(b.get_i16())
}

fn get_i32(b: &mut Bytes) -> Result<i32> {
    if b.remaining() < 4 {
        return Err(protocol("truncated frame"));
    }
    Ok(b.get_i32())
}

fn get_u32(b: &mut Bytes) -> Result<u32> {
    if b.remaining() < 4 {
        return Err(protocol("truncated frame"));
    }
    Ok(b.get_u32())
}

fn get_cstr(b: &mut Bytes) -> Result<String> {
    let Some(end) = b.iter().position(|&c| c == 0) else {
        return Err(protocol("unterminated string in frame"));
    };
    let raw = b.split_to(end);
    b.advance(1);
    String::from_utf8(raw.to_vec()).map_err(|_| protocol("invalid utf-8 in frame"))
}
