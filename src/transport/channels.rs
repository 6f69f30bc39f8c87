//! Channel directory: logical channel keys to live radio slots
//!
//! Slot indices on the radio move whenever channels are added or removed,
//! so a configured channel is found by its 16-byte secret first and by its
//! display name only as a degraded fallback.

use crate::config::ChannelConfig;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

pub const CHANNEL_SECRET_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("unknown channel key '{key}' (configured: {known})")]
    UnknownKey { key: String, known: String },

    #[error("channel '{key}' ({name}) not found on the connected radio")]
    ChannelNotFound { key: String, name: String },

    #[error("channel '{key}': {reason}")]
    BadSecret { key: String, reason: String },

    #[error("channel key '{0}' is configured more than once")]
    DuplicateKey(String),
}

/// Lowercase with spaces and hyphens removed: `"Mesh-Hams"` → `"meshhams"`.
pub fn normalize_key(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

// ============================================================================
// Secrets and slots
// ============================================================================

/// 128-bit channel key as stored on the radio.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelSecret([u8; CHANNEL_SECRET_LEN]);

impl ChannelSecret {
    pub fn from_bytes(bytes: [u8; CHANNEL_SECRET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        let raw = hex::decode(s.trim()).map_err(|e| format!("secret is not valid hex: {e}"))?;
        let bytes: [u8; CHANNEL_SECRET_LEN] = raw.try_into().map_err(|v: Vec<u8>| {
            format!("secret must be {CHANNEL_SECRET_LEN} bytes, got {}", v.len())
        })?;
        Ok(Self(bytes))
    }

    /// Secret of a public hashtag channel: first 16 bytes of SHA-256 over
    /// the lowercase name including its leading `#`.
    pub fn from_hashtag(tag: &str) -> Self {
        let tag = tag.trim().to_lowercase();
        let tag = if tag.starts_with('#') { tag } else { format!("#{tag}") };
        let digest = Sha256::digest(tag.as_bytes());
        let mut bytes = [0u8; CHANNEL_SECRET_LEN];
        bytes.copy_from_slice(&digest[..CHANNEL_SECRET_LEN]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHANNEL_SECRET_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ChannelSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChannelSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Enough to tell secrets apart in logs without printing them.
        write!(f, "ChannelSecret({}…)", &self.to_hex()[..8])
    }
}

/// One channel slot as reported by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSlot {
    pub index: u8,
    pub name: String,
    pub secret: ChannelSecret,
}

impl ChannelSlot {
    /// Unused slots come back with an empty name and an all-zero secret.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.secret.is_zero()
    }
}

/// How a configured channel was matched to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Secret,
    /// Name-only match; the radio may hold a different channel under that name
    Name,
}

/// Resolved send target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddress {
    pub key: String,
    pub index: u8,
    /// Name as the radio reports it
    pub live_name: String,
    pub matched_by: MatchKind,
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (slot {}, {})", self.key, self.index, self.live_name)
    }
}

// ============================================================================
// Directory
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDefinition {
    /// Normalized lookup key
    pub key: String,
    pub display_name: String,
    pub secret: Option<ChannelSecret>,
}

/// Configured channels, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct ChannelDirectory {
    definitions: Vec<ChannelDefinition>,
}

impl ChannelDirectory {
    pub fn new(configs: &[ChannelConfig]) -> Result<Self, ChannelError> {
        let mut seen = HashSet::new();
        let mut definitions = Vec::with_capacity(configs.len());
        for cfg in configs {
            let key = normalize_key(&cfg.key);
            if !seen.insert(key.clone()) {
                return Err(ChannelError::DuplicateKey(key));
            }
            let secret = cfg.secret().map_err(|reason| ChannelError::BadSecret {
                key: key.clone(),
                reason,
            })?;
            definitions.push(ChannelDefinition {
                key,
                display_name: cfg.name.clone(),
                secret,
            });
        }
        Ok(Self { definitions })
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|d| d.key.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.definition(key).is_some()
    }

    pub fn definition(&self, key: &str) -> Option<&ChannelDefinition> {
        let key = normalize_key(key);
        self.definitions.iter().find(|d| d.key == key)
    }

    /// Configured key whose secret matches a live slot, if any.
    pub fn key_for_slot(&self, slot: &ChannelSlot) -> Option<&str> {
        self.definitions
            .iter()
            .find(|d| d.secret.as_ref() == Some(&slot.secret))
            .map(|d| d.key.as_str())
    }

    /// Find the live slot for `key`.
    ///
    /// Secret match wins; otherwise a normalized display-name match is
    /// accepted and logged as degraded.
    pub fn resolve(&self, key: &str, live: &[ChannelSlot]) -> Result<ChannelAddress, ChannelError> {
        let def = self.definition(key).ok_or_else(|| ChannelError::UnknownKey {
            key: key.to_string(),
            known: self.keys().collect::<Vec<_>>().join(", "),
        })?;

        if let Some(secret) = &def.secret {
            if let Some(slot) = live.iter().find(|s| &s.secret == secret) {
                debug!(channel = %def.key, slot = slot.index, "Channel matched by secret");
                return Ok(ChannelAddress {
                    key: def.key.clone(),
                    index: slot.index,
                    live_name: slot.name.clone(),
                    matched_by: MatchKind::Secret,
                });
            }
        }

        let want = normalize_key(&def.display_name);
        if !want.is_empty() {
            if let Some(slot) = live.iter().find(|s| normalize_key(&s.name) == want) {
                warn!(
                    channel = %def.key,
                    slot = slot.index,
                    live_name = %slot.name,
                    "Channel matched by name only, secret differs or is not configured"
                );
                return Ok(ChannelAddress {
                    key: def.key.clone(),
                    index: slot.index,
                    live_name: slot.name.clone(),
                    matched_by: MatchKind::Name,
                });
            }
        }

        Err(ChannelError::ChannelNotFound {
            key: def.key.clone(),
            name: def.display_name.clone(),
        })
    }
}
