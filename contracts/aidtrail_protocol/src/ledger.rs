//! # Audit ledger
//!
//! Hash-chained, append-only log of every state transition.
//!
//! ## Hash rule
//!
//! ```text
//! hash = hex(SHA-256( prev_hash ‖ canonical(payload) ‖ timestamp ))
//! ```
//!
//! - `prev_hash` is the previous entry's lowercase hex hash, or
//!   [`GENESIS_HASH`] (64 zeros) for sequence 0.
//! - `canonical(payload)` is compact JSON with object keys sorted bytewise at
//!   every depth. Floating-point numbers are refused.
//! - `timestamp` is UTC RFC3339 with microsecond precision and a `Z` suffix.
//!
//! Sealing copies the entry header (`reference_id`, `action`, `entity_name`,
//! `role`) into the payload under `"entry"`, so the digest covers it too.
//! Verification checks the stored header against that copy.
//!
//! The payload's canonical form does not depend on serde_json's map
//! implementation, so enabling `preserve_order` elsewhere in a build cannot
//! change a hash.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::errors::{LedgerError, Result};
use crate::events::LedgerAction;
use crate::types::Role;

/// `prev_hash` of the genesis entry: a zeroed SHA-256 digest in hex.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One immutable record of a single state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub reference_id: String,
    pub action: LedgerAction,
    /// Name of the acting party.
    pub entity_name: String,
    pub role: Role,
    #[serde(with = "rfc3339_micros")]
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub prev_hash: String,
    pub hash: String,
}

impl LedgerEntry {
    /// Recompute this entry's hash from its stored fields.
    pub fn recompute_hash(&self) -> Result<String> {
        let canonical = canonical_json(&self.payload)?;
        Ok(compute_hash(
            &self.prev_hash,
            &canonical,
            &format_timestamp(&self.timestamp),
        ))
    }

    /// Whether the header fields agree with the hashed copy in the payload.
    pub fn header_matches(&self) -> bool {
        self.payload.get(HEADER_FIELD)
            == Some(&header(
                &self.reference_id,
                self.action,
                &self.entity_name,
                self.role,
            ))
    }
}

const HEADER_FIELD: &str = "entry";

fn header(reference_id: &str, action: LedgerAction, entity_name: &str, role: Role) -> Value {
    json!({
        "reference_id": reference_id,
        "action": action,
        "entity_name": entity_name,
        "role": role,
    })
}

/// An entry before it is placed on the chain.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub reference_id: String,
    pub action: LedgerAction,
    pub entity_name: String,
    pub role: Role,
    pub payload: Value,
}

// ─────────────────────────────────────────────────────────
// Chain head
// ─────────────────────────────────────────────────────────

/// Position at which the next entry will be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHead {
    pub next_sequence: u64,
    pub prev_hash: String,
}

impl ChainHead {
    pub fn genesis() -> Self {
        Self {
            next_sequence: 0,
            prev_hash: GENESIS_HASH.to_string(),
        }
    }

    pub fn after(last: Option<&LedgerEntry>) -> Self {
        match last {
            Some(entry) => Self {
                next_sequence: entry.sequence + 1,
                prev_hash: entry.hash.clone(),
            },
            None => Self::genesis(),
        }
    }

    /// Seal `pending` at this position and advance past it.
    pub fn seal(
        &mut self,
        mut pending: PendingEntry,
        timestamp: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        if let Value::Object(map) = &mut pending.payload {
            map.insert(
                HEADER_FIELD.to_string(),
                header(
                    &pending.reference_id,
                    pending.action,
                    &pending.entity_name,
                    pending.role,
                ),
            );
        }
        let canonical = canonical_json(&pending.payload)?;
        let hash = compute_hash(&self.prev_hash, &canonical, &format_timestamp(&timestamp));
        let entry = LedgerEntry {
            sequence: self.next_sequence,
            reference_id: pending.reference_id,
            action: pending.action,
            entity_name: pending.entity_name,
            role: pending.role,
            timestamp,
            payload: pending.payload,
            prev_hash: self.prev_hash.clone(),
            hash,
        };
        self.advance(&entry);
        Ok(entry)
    }

    /// Check that `entry` sits exactly at this position, then advance past it.
    pub fn accept(&mut self, entry: &LedgerEntry) -> Result<()> {
        if entry.sequence != self.next_sequence {
            return Err(LedgerError::Storage(format!(
                "non-contiguous append: expected sequence {}, got {}",
                self.next_sequence, entry.sequence
            )));
        }
        if entry.prev_hash != self.prev_hash {
            return Err(LedgerError::Storage(format!(
                "entry {} does not link to the chain head",
                entry.sequence
            )));
        }
        self.advance(entry);
        Ok(())
    }

    fn advance(&mut self, entry: &LedgerEntry) {
        self.next_sequence = entry.sequence + 1;
        self.prev_hash = entry.hash.clone();
    }
}

// ─────────────────────────────────────────────────────────
// Hashing
// ─────────────────────────────────────────────────────────

pub fn compute_hash(prev_hash: &str, canonical_payload: &str, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical_payload.as_bytes());
    hasher.update(timestamp.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Canonical JSON for an object payload.
pub fn canonical_json(payload: &Value) -> Result<String> {
    if !payload.is_object() {
        return Err(LedgerError::Validation(
            "ledger payload must be a JSON object".to_string(),
        ));
    }
    let mut out = String::new();
    write_canonical(payload, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if n.is_f64() {
                return Err(LedgerError::Validation(format!(
                    "floating-point value {n} cannot be canonicalised"
                )));
            }
            out.push_str(&n.to_string());
        }
        Value::String(s) => write_string(s, out)?,
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out)?;
                out.push(':');
                write_canonical(&map[key], out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut String) -> Result<()> {
    let escaped = serde_json::to_string(s)
        .map_err(|e| LedgerError::Validation(format!("unencodable string: {e}")))?;
    out.push_str(&escaped);
    Ok(())
}

/// Serde adapter keeping ledger timestamps in the exact form that is hashed.
pub mod rfc3339_micros {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
