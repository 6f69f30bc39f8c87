//! Physical links to the companion radio.
//!
//! A [`Link`] moves whole frames. Serial and TCP are byte streams and share
//! [`StreamLink`]; they differ only in how the stream is opened:
//! - serial: the tty in raw 8N1 at the configured baud rate
//! - tcp: the radio's companion bridge, with TCP keepalive
//!
//! Bluetooth LE is message-oriented and lives in [`super::ble`].
//! [`SimulatedRadio`] answers commands in memory for tests.

use super::ble::{self, BleTarget};
use super::channels::{ChannelSecret, ChannelSlot, CHANNEL_SECRET_LEN};
use super::codec::{
    self, channel_info_payload, FrameDecoder, RESP_DEVICE_INFO, RESP_ERR, RESP_OK, RESP_SELF_INFO,
};
use super::TransportError;
use crate::config::{TransportConfig, TransportKind};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info};

/// TCP keepalive idle time before the first keepalive packet.
const KEEPALIVE_TIME: Duration = Duration::from_secs(30);
/// Interval between keepalive packets.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

const READ_CHUNK: usize = 512;

/// Frame-level duplex link to a radio.
#[async_trait]
pub trait Link: Send {
    /// Send one command payload.
    async fn send_frame(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next inbound payload. Callers bound this with a timeout.
    async fn recv_frame(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Release the underlying device or socket.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Human-readable name for logging (e.g. "serial:/dev/ttyACM0").
    fn link_name(&self) -> String;
}

/// Opens links. The session calls this once per connect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Link>, TransportError>;

    fn describe(&self) -> String;
}

// ============================================================================
// Byte-stream link
// ============================================================================

/// Framed link over any async byte stream.
#[derive(Debug)]
pub struct StreamLink<S> {
    stream: S,
    decoder: FrameDecoder,
    label: String,
    closed: bool,
}

impl<S> StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, label: impl Into<String>) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::default(),
            label: label.into(),
            closed: false,
        }
    }
}

#[async_trait]
impl<S> Link for StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }
        let frame = codec::encode_frame(payload)?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return Ok(frame);
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{} closed by peer", self.label),
                )));
            }
            self.decoder.push(&chunk[..n]);
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            let _ = self.stream.shutdown().await;
            debug!(link = %self.label, "Link closed");
        }
        Ok(())
    }

    fn link_name(&self) -> String {
        self.label.clone()
    }
}

pub type SerialLink = StreamLink<SerialStream>;
pub type TcpLink = StreamLink<TcpStream>;

/// Open the radio's tty in raw 8N1 mode, no flow control.
pub fn open_serial(path: &Path, baud_rate: u32) -> Result<SerialLink, TransportError> {
    let port = tokio_serial::new(path.to_string_lossy(), baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|e| TransportError::ConnectionError {
            attempts: 1,
            reason: format!("{}: {e}", path.display()),
        })?;
    info!(path = %path.display(), baud_rate, "Serial link opened");
    Ok(StreamLink::new(port, format!("serial:{}", path.display())))
}

/// Connect to the companion TCP bridge.
pub async fn connect_tcp(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpLink, TransportError> {
    let addr = format!("{host}:{port}");
    info!(address = %addr, "Connecting to radio bridge");

    let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| TransportError::Timeout {
            operation: "connect",
            after: timeout,
        })?
        .map_err(|e| TransportError::ConnectionError {
            attempts: 1,
            reason: format!("{addr}: {e}"),
        })?;

    // Keepalive lets a powered-off radio show up as an I/O error instead of a hang
    let sock_ref = socket2::SockRef::from(&stream);
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(KEEPALIVE_TIME)
        .with_interval(KEEPALIVE_INTERVAL);
    let _ = sock_ref.set_tcp_keepalive(&keepalive);
    let _ = stream.set_nodelay(true);

    Ok(StreamLink::new(stream, format!("tcp:{addr}")))
}

/// Opens the transport named in configuration.
#[derive(Debug, Clone)]
pub enum LinkConnector {
    Serial {
        path: PathBuf,
        baud_rate: u32,
    },
    Ble {
        target: BleTarget,
        pin: Option<String>,
        scan_timeout: Duration,
    },
    Tcp {
        host: String,
        port: u16,
        timeout: Duration,
    },
}

impl LinkConnector {
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        Ok(match config.kind {
            TransportKind::Serial => Self::Serial {
                path: config.serial_path.clone(),
                baud_rate: config.baud_rate,
            },
            TransportKind::Ble => Self::Ble {
                target: BleTarget::parse(&config.ble_address, &config.ble_name)?,
                pin: config.ble_pin.clone(),
                scan_timeout: timeout,
            },
            TransportKind::Tcp => Self::Tcp {
                host: config.host.clone(),
                port: config.port,
                timeout,
            },
        })
    }
}

#[async_trait]
impl Connector for LinkConnector {
    async fn open(&self) -> Result<Box<dyn Link>, TransportError> {
        match self {
            Self::Serial { path, baud_rate } => Ok(Box::new(open_serial(path, *baud_rate)?)),
            Self::Ble {
                target,
                pin,
                scan_timeout,
            } => Ok(Box::new(
                ble::connect_ble(target, pin.as_deref(), *scan_timeout).await?,
            )),
            Self::Tcp {
                host,
                port,
                timeout,
            } => Ok(Box::new(connect_tcp(host, *port, *timeout).await?)),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Serial { path, baud_rate } => format!("serial:{}@{baud_rate}", path.display()),
            Self::Ble { target, .. } => target.describe(),
            Self::Tcp { host, port, .. } => format!("tcp:{host}:{port}"),
        }
    }
}

// ============================================================================
// Simulated radio
// ============================================================================

/// Slot count of the simulated radio; higher indices answer ERR.
const SIMULATED_SLOTS: usize = 8;

/// Observable state of a [`SimulatedRadio`].
#[derive(Debug, Default)]
pub struct RadioState {
    pub slots: Vec<ChannelSlot>,
    /// `(slot index, text)` for every accepted channel message
    pub delivered: Vec<(u8, String)>,
    /// Next N sends get no reply at all (caller times out)
    pub drop_sends: usize,
    /// Next N sends are answered with ERR
    pub reject_sends: usize,
    /// Next N sends are delivered, but the OK only goes out ahead of the
    /// answer to the following command
    pub late_sends: usize,
    /// Ignore device queries, like firmware without the command
    pub mute_device_query: bool,
    /// Remaining connect attempts that fail before one succeeds
    pub refuse_connects: usize,
    pub opens: usize,
    pub closes: usize,
    pub open_links: usize,
}

/// In-memory companion radio.
///
/// Clones share state, so a test keeps one handle for assertions and hands
/// another to the session as its connector.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRadio {
    state: Arc<Mutex<RadioState>>,
}

impl SimulatedRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Radio holding the given `(name, secret)` channels in slots 0, 1, ...
    pub fn with_channels(channels: &[(&str, ChannelSecret)]) -> Self {
        let radio = Self::new();
        {
            let mut state = radio.lock();
            for (i, (name, secret)) in channels.iter().enumerate() {
                state.slots.push(ChannelSlot {
                    index: u8::try_from(i).unwrap_or(u8::MAX),
                    name: (*name).to_string(),
                    secret: *secret,
                });
            }
        }
        radio
    }

    /// Lock the shared state. A poisoned lock is taken over as-is.
    pub fn lock(&self) -> std::sync::MutexGuard<'_, RadioState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn delivered(&self) -> Vec<(u8, String)> {
        self.lock().delivered.clone()
    }
}

#[async_trait]
impl Connector for SimulatedRadio {
    async fn open(&self) -> Result<Box<dyn Link>, TransportError> {
        let mut state = self.lock();
        state.opens += 1;
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(TransportError::ConnectionError {
                attempts: 1,
                reason: "simulated radio refused connection".to_string(),
            });
        }
        state.open_links += 1;
        Ok(Box::new(SimulatedLink {
            radio: self.clone(),
            outbox: VecDeque::new(),
            deferred: None,
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        "simulated".to_string()
    }
}

struct SimulatedLink {
    radio: SimulatedRadio,
    outbox: VecDeque<Vec<u8>>,
    deferred: Option<Vec<u8>>,
    closed: bool,
}

impl SimulatedLink {
    fn answer(&mut self, payload: &[u8]) {
        let Some((&code, body)) = payload.split_first() else {
            self.outbox.push_back(vec![RESP_ERR]);
            return;
        };
        if let Some(late) = self.deferred.take() {
            self.outbox.push_back(late);
        }
        let mut state = self.radio.lock();
        match code {
            codec::CMD_APP_START => {
                let mut info = vec![RESP_SELF_INFO];
                info.resize(58, 0);
                info.extend_from_slice(b"SIM-RADIO");
                // A stray push before the answer, as real radios do
                self.outbox.push_back(vec![0x83]);
                self.outbox.push_back(info);
            }
            codec::CMD_GET_CHANNEL => {
                let index = body.first().copied().unwrap_or(u8::MAX);
                let slot = state.slots.iter().find(|s| s.index == index).cloned();
                match slot {
                    Some(slot) => self.outbox.push_back(channel_info_payload(&slot)),
                    None if usize::from(index) < SIMULATED_SLOTS => {
                        // Unused but valid slot
                        let empty = ChannelSlot {
                            index,
                            name: String::new(),
                            secret: ChannelSecret::from_bytes([0u8; CHANNEL_SECRET_LEN]),
                        };
                        self.outbox.push_back(channel_info_payload(&empty));
                    }
                    None => self.outbox.push_back(vec![RESP_ERR, 0x02]),
                }
            }
            codec::CMD_SEND_CHANNEL_TXT_MSG => {
                if state.drop_sends > 0 {
                    state.drop_sends -= 1;
                    return;
                }
                if state.reject_sends > 0 {
                    state.reject_sends -= 1;
                    self.outbox.push_back(vec![RESP_ERR, 0x03]);
                    return;
                }
                let index = body.get(1).copied().unwrap_or(u8::MAX);
                let text = String::from_utf8_lossy(body.get(6..).unwrap_or_default()).into_owned();
                state.delivered.push((index, text));
                if state.late_sends > 0 {
                    state.late_sends -= 1;
                    self.deferred = Some(vec![RESP_OK]);
                } else {
                    self.outbox.push_back(vec![RESP_OK]);
                }
            }
            codec::CMD_DEVICE_QUERY => {
                if !state.mute_device_query {
                    // firmware version, then zeroed build info
                    let mut info = vec![RESP_DEVICE_INFO, 0x08];
                    info.resize(80, 0);
                    self.outbox.push_back(info);
                }
            }
            _ => self.outbox.push_back(vec![RESP_ERR, 0x01]),
        }
    }
}

#[async_trait]
impl Link for SimulatedLink {
    async fn send_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }
        // Same size limit as the wire
        codec::encode_frame(payload)?;
        self.answer(payload);
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }
        match self.outbox.pop_front() {
            Some(frame) => Ok(frame),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            let mut state = self.radio.lock();
            state.closes += 1;
            state.open_links = state.open_links.saturating_sub(1);
        }
        Ok(())
    }

    fn link_name(&self) -> String {
        "simulated".to_string()
    }
}

impl Drop for SimulatedLink {
    fn drop(&mut self) {
        if !self.closed {
            let mut state = self.radio.lock();
            state.open_links = state.open_links.saturating_sub(1);
        }
    }
}
