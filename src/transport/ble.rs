//! Bluetooth LE link over the Nordic UART service.
//!
//! MeshCore companion firmware exposes its command channel as NUS. The host
//! writes one command payload per write to the RX characteristic and gets
//! one response payload per TX notification. BLE carries no `<`/`>` frame
//! header; the ATT packet is the frame.
//!
//! btleplug has no pairing API. A radio with a PIN must be bonded once
//! through the system agent (`bluetoothctl pair <addr>` on BlueZ); the
//! configured PIN is what the operator enters there, and an authentication
//! failure on connect names it in the error.

use super::codec::MAX_FRAME_LEN;
use super::link::Link;
use super::TransportError;
use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const NUS_SERVICE: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e_24dc_ca9e);
/// Host → radio (write)
pub const NUS_RX: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e_24dc_ca9e);
/// Radio → host (notify)
pub const NUS_TX: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// Advertised name prefix of MeshCore companion firmware.
pub const DEVICE_NAME_PREFIX: &str = "MeshCore";

const SCAN_POLL: Duration = Duration::from_millis(500);

type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Which radio to pick out of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleTarget {
    /// Exact MAC; when unset the first device whose name starts with
    /// `name_prefix` is used
    pub address: Option<BDAddr>,
    pub name_prefix: String,
}

impl BleTarget {
    pub fn parse(address: &str, name_prefix: &str) -> Result<Self, TransportError> {
        let address = match address.trim() {
            "" => None,
            raw => Some(raw.parse::<BDAddr>().map_err(|e| {
                TransportError::Protocol(format!("invalid BLE address '{raw}': {e}"))
            })?),
        };
        let name_prefix = match name_prefix.trim() {
            "" => DEVICE_NAME_PREFIX.to_string(),
            p => p.to_string(),
        };
        Ok(Self {
            address,
            name_prefix,
        })
    }

    pub fn matches(&self, address: BDAddr, local_name: Option<&str>) -> bool {
        match self.address {
            Some(want) => want == address,
            None => local_name.is_some_and(|n| n.starts_with(&self.name_prefix)),
        }
    }

    pub fn describe(&self) -> String {
        match self.address {
            Some(addr) => format!("ble:{addr}"),
            None => format!("ble:{}*", self.name_prefix),
        }
    }
}

fn connect_error(target: &BleTarget, reason: impl std::fmt::Display) -> TransportError {
    TransportError::ConnectionError {
        attempts: 1,
        reason: format!("{}: {reason}", target.describe()),
    }
}

fn link_error(e: &btleplug::Error) -> TransportError {
    TransportError::Io(std::io::Error::other(e.to_string()))
}

/// Scan for the target, connect and subscribe to TX notifications.
pub async fn connect_ble(
    target: &BleTarget,
    pin: Option<&str>,
    scan_timeout: Duration,
) -> Result<BleLink, TransportError> {
    let manager = Manager::new().await.map_err(|e| connect_error(target, e))?;
    let adapter = manager
        .adapters()
        .await
        .map_err(|e| connect_error(target, e))?
        .into_iter()
        .next()
        .ok_or_else(|| connect_error(target, "no Bluetooth adapter"))?;

    info!(target_radio = %target.describe(), "Scanning for radio");
    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| connect_error(target, e))?;
    let found = find_peripheral(&adapter, target, scan_timeout).await;
    if let Err(e) = adapter.stop_scan().await {
        debug!(error = %e, "Stopping scan failed");
    }
    let (peripheral, address) = found?;

    peripheral.connect().await.map_err(|e| {
        let hint = match (&e, pin) {
            (btleplug::Error::PermissionDenied, Some(_)) => {
                format!("{e} (bond the radio with its PIN through the system pairing agent)")
            }
            _ => e.to_string(),
        };
        connect_error(target, hint)
    })?;
    peripheral
        .discover_services()
        .await
        .map_err(|e| connect_error(target, e))?;

    let characteristics = peripheral.characteristics();
    let find = |uuid: Uuid| characteristics.iter().find(|c| c.uuid == uuid).cloned();
    let (Some(rx), Some(tx)) = (find(NUS_RX), find(NUS_TX)) else {
        let _ = peripheral.disconnect().await;
        return Err(connect_error(target, "radio has no Nordic UART service"));
    };
    peripheral
        .subscribe(&tx)
        .await
        .map_err(|e| connect_error(target, e))?;
    let notifications = peripheral
        .notifications()
        .await
        .map_err(|e| connect_error(target, e))?;

    info!(address = %address, "BLE link opened");
    Ok(BleLink {
        peripheral,
        rx,
        notifications,
        label: format!("ble:{address}"),
        closed: false,
    })
}

async fn find_peripheral(
    adapter: &Adapter,
    target: &BleTarget,
    scan_timeout: Duration,
) -> Result<(Peripheral, BDAddr), TransportError> {
    let deadline = tokio::time::Instant::now() + scan_timeout;
    loop {
        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| connect_error(target, e))?;
        for peripheral in peripherals {
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            if target.matches(props.address, props.local_name.as_deref()) {
                debug!(address = %props.address, name = ?props.local_name, "Radio found");
                return Ok((peripheral, props.address));
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(TransportError::Timeout {
                operation: "ble-scan",
                after: scan_timeout,
            });
        }
        tokio::time::sleep(SCAN_POLL).await;
    }
}

/// Connected NUS link. One write is one command, one notification one reply.
pub struct BleLink {
    peripheral: Peripheral,
    rx: Characteristic,
    notifications: Notifications,
    label: String,
    closed: bool,
}

#[async_trait]
impl Link for BleLink {
    async fn send_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }
        if payload.len() > MAX_FRAME_LEN {
            return Err(TransportError::Protocol(format!(
                "frame payload of {} bytes exceeds {MAX_FRAME_LEN}",
                payload.len()
            )));
        }
        self.peripheral
            .write(&self.rx, payload, WriteType::WithResponse)
            .await
            .map_err(|e| link_error(&e))
    }

    async fn recv_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::NotConnected);
        }
        loop {
            match self.notifications.next().await {
                Some(n) if n.uuid == NUS_TX => return Ok(n.value),
                Some(_) => {}
                None => {
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("{} notifications ended", self.label),
                    )))
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.peripheral.disconnect().await {
                warn!(link = %self.label, error = %e, "BLE disconnect failed");
            }
            debug!(link = %self.label, "Link closed");
        }
        Ok(())
    }

    fn link_name(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> BDAddr {
        s.parse().unwrap()
    }

    #[test]
    fn nordic_uart_uuids() {
        assert_eq!(NUS_SERVICE.to_string(), "6e400001-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(NUS_RX.to_string(), "6e400002-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(NUS_TX.to_string(), "6e400003-b5a3-f393-e0a9-e50e24dcca9e");
    }

    #[test]
    fn address_target_matches_only_that_radio() {
        let target = BleTarget::parse("C0:FF:EE:12:34:56", "").unwrap();
        assert!(target.matches(addr("C0:FF:EE:12:34:56"), None));
        assert!(!target.matches(addr("C0:FF:EE:12:34:57"), Some("MeshCore-abc")));
        assert_eq!(target.describe(), "ble:C0:FF:EE:12:34:56");
    }

    #[test]
    fn scan_target_matches_name_prefix() {
        let target = BleTarget::parse("", "").unwrap();
        assert_eq!(target.name_prefix, DEVICE_NAME_PREFIX);
        let any = addr("00:11:22:33:44:55");
        assert!(target.matches(any, Some("MeshCore-W6SAL")));
        assert!(!target.matches(any, Some("Pixel 8")));
        assert!(!target.matches(any, None));
    }

    #[test]
    fn bad_address_is_rejected() {
        assert!(BleTarget::parse("not-a-mac", "").is_err());
    }
}
