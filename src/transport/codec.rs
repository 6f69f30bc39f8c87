//! MeshCore companion-radio framing and command set.
//!
//! Wire format (serial and TCP bridge alike):
//! - host → radio: `<` + u16 LE length + payload
//! - radio → host: `>` + u16 LE length + payload
//!
//! The first payload byte is a command code (outbound) or a response/push
//! code (inbound). Codes at or above [`PUSH_CODE_MIN`] are unsolicited
//! notifications and never answer a command.

use super::channels::{ChannelSecret, ChannelSlot, CHANNEL_SECRET_LEN};
use super::TransportError;

/// Largest payload either side will put in one frame.
pub const MAX_FRAME_LEN: usize = 300;

pub const OUTBOUND_MARKER: u8 = b'<';
pub const INBOUND_MARKER: u8 = b'>';

const HEADER_LEN: usize = 3;

// Command codes
pub const CMD_APP_START: u8 = 0x01;
pub const CMD_SEND_CHANNEL_TXT_MSG: u8 = 0x03;
pub const CMD_DEVICE_QUERY: u8 = 0x16;
pub const CMD_GET_CHANNEL: u8 = 0x1F;

// Response codes
pub const RESP_OK: u8 = 0x00;
pub const RESP_ERR: u8 = 0x01;
pub const RESP_SELF_INFO: u8 = 0x05;
pub const RESP_SENT: u8 = 0x06;
pub const RESP_DEVICE_INFO: u8 = 0x0D;
pub const RESP_CHANNEL_INFO: u8 = 0x12;

/// First code of the unsolicited push range.
pub const PUSH_CODE_MIN: u8 = 0x80;

const APP_PROTOCOL_VERSION: u8 = 0x03;
const CHANNEL_NAME_LEN: usize = 32;
/// Offset of the node name inside a SELF_INFO payload.
const SELF_INFO_NAME_OFFSET: usize = 58;

/// Wrap a payload in an outbound frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(TransportError::Protocol(format!(
            "frame payload of {} bytes exceeds {MAX_FRAME_LEN}",
            payload.len()
        )));
    }
    let len = u16::try_from(payload.len())
        .map_err(|_| TransportError::Protocol("frame length overflow".to_string()))?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(OUTBOUND_MARKER);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Incremental decoder for frames arriving on a byte stream.
///
/// Bytes before a frame marker are discarded, so the decoder resynchronises
/// after line noise or a partial frame left over from a previous session.
#[derive(Debug)]
pub struct FrameDecoder {
    marker: u8,
    buf: Vec<u8>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(INBOUND_MARKER)
    }
}

impl FrameDecoder {
    pub fn new(marker: u8) -> Self {
        Self {
            marker,
            buf: Vec::with_capacity(MAX_FRAME_LEN + HEADER_LEN),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete payload, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let start = self.buf.iter().position(|&b| b == self.marker)?;
            if start > 0 {
                tracing::trace!(skipped = start, "Discarding bytes before frame marker");
                self.buf.drain(..start);
            }
            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let len = usize::from(u16::from_le_bytes([self.buf[1], self.buf[2]]));
            if len > MAX_FRAME_LEN {
                // Not a real header; drop the marker and rescan.
                self.buf.drain(..1);
                continue;
            }
            if self.buf.len() < HEADER_LEN + len {
                return None;
            }
            let payload = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
            self.buf.drain(..HEADER_LEN + len);
            return Some(payload);
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Host → radio commands used by the broadcaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    AppStart { app_name: &'a str },
    GetChannel { index: u8 },
    SendChannelText { index: u8, timestamp: u32, text: &'a str },
    /// Answered only with DEVICE_INFO; used to find the end of stale replies
    DeviceQuery,
}

impl Command<'_> {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::AppStart { app_name } => {
                let mut out = Vec::with_capacity(8 + app_name.len());
                out.push(CMD_APP_START);
                out.push(APP_PROTOCOL_VERSION);
                out.extend_from_slice(&[0u8; 6]);
                out.extend_from_slice(app_name.as_bytes());
                out
            }
            Self::GetChannel { index } => vec![CMD_GET_CHANNEL, *index],
            Self::DeviceQuery => vec![CMD_DEVICE_QUERY, APP_PROTOCOL_VERSION],
            Self::SendChannelText {
                index,
                timestamp,
                text,
            } => {
                let mut out = Vec::with_capacity(7 + text.len());
                out.push(CMD_SEND_CHANNEL_TXT_MSG);
                out.push(0x00); // plain text
                out.push(*index);
                out.extend_from_slice(&timestamp.to_le_bytes());
                out.extend_from_slice(text.as_bytes());
                out
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AppStart { .. } => "app-start",
            Self::GetChannel { .. } => "get-channel",
            Self::SendChannelText { .. } => "send-channel-text",
            Self::DeviceQuery => "device-query",
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Radio → host frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Err { code: Option<u8> },
    SelfInfo { name: String },
    Sent,
    ChannelInfo(ChannelSlot),
    DeviceInfo,
    /// Unsolicited notification (advert, incoming message, ...)
    Push(u8),
    /// Known frame shape but a code we have no use for
    Other(u8),
}

impl Response {
    pub fn parse(payload: &[u8]) -> Result<Self, TransportError> {
        let (&code, body) = payload
            .split_first()
            .ok_or_else(|| TransportError::Protocol("empty response frame".to_string()))?;

        if code >= PUSH_CODE_MIN {
            return Ok(Self::Push(code));
        }

        match code {
            RESP_OK => Ok(Self::Ok),
            RESP_ERR => Ok(Self::Err {
                code: body.first().copied(),
            }),
            RESP_SENT => Ok(Self::Sent),
            RESP_DEVICE_INFO => Ok(Self::DeviceInfo),
            RESP_SELF_INFO => {
                let name = payload
                    .get(SELF_INFO_NAME_OFFSET..)
                    .map(c_string)
                    .unwrap_or_default();
                Ok(Self::SelfInfo { name })
            }
            RESP_CHANNEL_INFO => parse_channel_info(body).map(Self::ChannelInfo),
            other => Ok(Self::Other(other)),
        }
    }

    pub fn is_push(&self) -> bool {
        matches!(self, Self::Push(_))
    }
}

fn parse_channel_info(body: &[u8]) -> Result<ChannelSlot, TransportError> {
    let expected = 1 + CHANNEL_NAME_LEN + CHANNEL_SECRET_LEN;
    if body.len() < expected {
        return Err(TransportError::Protocol(format!(
            "CHANNEL_INFO payload is {} bytes, need {expected}",
            body.len()
        )));
    }
    let index = body[0];
    let name = c_string(&body[1..=CHANNEL_NAME_LEN]);
    let mut secret = [0u8; CHANNEL_SECRET_LEN];
    secret.copy_from_slice(&body[1 + CHANNEL_NAME_LEN..expected]);
    Ok(ChannelSlot {
        index,
        name,
        secret: ChannelSecret::from_bytes(secret),
    })
}

/// NUL-terminated, NUL-padded UTF-8 field.
fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// Build a CHANNEL_INFO response payload. Used by the simulated radio.
pub fn channel_info_payload(slot: &ChannelSlot) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + CHANNEL_NAME_LEN + CHANNEL_SECRET_LEN);
    out.push(RESP_CHANNEL_INFO);
    out.push(slot.index);
    let mut name = [0u8; CHANNEL_NAME_LEN];
    let bytes = slot.name.as_bytes();
    let n = bytes.len().min(CHANNEL_NAME_LEN - 1);
    name[..n].copy_from_slice(&bytes[..n]);
    out.extend_from_slice(&name);
    out.extend_from_slice(slot.secret.as_bytes());
    out
}
