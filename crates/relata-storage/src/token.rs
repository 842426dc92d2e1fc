//! Snapshot and continuation token encodings.
//!
//! Tokens travel as URL-safe base64 of a compact binary form and are
//! opaque to clients. Each back end owns its snapshot shape: the
//! relational store captures a monotone transaction id plus the ids that
//! were in flight at capture time; the in-memory store captures a
//! monotonized wall-clock nanosecond instant.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use relata_domain::error::{Error, Result};

/// Snapshot of the relational back end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSnapshot {
    /// Highest committed transaction id at capture time.
    pub txid: u64,
    /// Transaction ids that were open at capture time; their writes are
    /// invisible even though their ids precede `txid`.
    pub in_flight: Vec<u64>,
}

impl TransactionSnapshot {
    pub fn new(txid: u64) -> Self {
        Self {
            txid,
            in_flight: Vec::new(),
        }
    }

    pub fn with_in_flight(mut self, in_flight: Vec<u64>) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(8 + 8 * self.in_flight.len());
        bytes.extend_from_slice(&self.txid.to_be_bytes());
        for txid in &self.in_flight {
            bytes.extend_from_slice(&txid.to_be_bytes());
        }
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| Error::TypeConversion)?;
        if bytes.len() < 8 || bytes.len() % 8 != 0 {
            return Err(Error::TypeConversion);
        }
        let mut words = bytes
            .chunks_exact(8)
            .map(|chunk| u64::from_be_bytes(chunk.try_into().expect("eight bytes")));
        let txid = words.next().expect("at least one word");
        Ok(Self {
            txid,
            in_flight: words.collect(),
        })
    }

    /// Whether a row written by `created_tx` and expired by `expired_tx`
    /// (zero meaning live) is visible under this snapshot.
    pub fn visible(&self, created_tx: u64, expired_tx: u64) -> bool {
        if created_tx > self.txid || self.in_flight.contains(&created_tx) {
            return false;
        }
        expired_tx == 0 || expired_tx > self.txid
    }

    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.txid > other.txid
    }
}

/// Snapshot of the in-memory back end: a commit-clock instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampSnapshot {
    pub nanos: u64,
}

impl TimestampSnapshot {
    pub fn new(nanos: u64) -> Self {
        Self { nanos }
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.nanos.to_be_bytes())
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| Error::TypeConversion)?;
        let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| Error::TypeConversion)?;
        Ok(Self {
            nanos: u64::from_be_bytes(bytes),
        })
    }

    /// Whether a row committed at `created_at` and expired at
    /// `expired_at` (zero meaning live) is visible under this snapshot.
    pub fn visible(&self, created_at: u64, expired_at: u64) -> bool {
        created_at <= self.nanos && (expired_at == 0 || expired_at > self.nanos)
    }
}

/// Encodes the row id a page stopped before.
pub fn encode_continuous_token(row_id: u64) -> String {
    URL_SAFE_NO_PAD.encode(row_id.to_string())
}

/// Decodes a continuation token back to its row id.
pub fn decode_continuous_token(encoded: &str) -> Result<u64> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| Error::InvalidContinuousToken)?;
    let text = String::from_utf8(bytes).map_err(|_| Error::InvalidContinuousToken)?;
    text.parse().map_err(|_| Error::InvalidContinuousToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_snapshot_round_trips_with_in_flight_set() {
        let snapshot = TransactionSnapshot::new(42).with_in_flight(vec![17, 40]);
        let decoded = TransactionSnapshot::decode(&snapshot.encode()).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn transaction_snapshot_hides_in_flight_and_later_writes() {
        let snapshot = TransactionSnapshot::new(42).with_in_flight(vec![40]);
        assert!(snapshot.visible(10, 0));
        assert!(!snapshot.visible(40, 0), "in-flight writer is invisible");
        assert!(!snapshot.visible(43, 0), "later writer is invisible");
        assert!(!snapshot.visible(10, 30), "row expired before the snapshot");
        assert!(snapshot.visible(10, 50), "row expired after the snapshot");
    }

    #[test]
    fn snapshots_preserve_ordering() {
        let older = TimestampSnapshot::new(100);
        let newer = TimestampSnapshot::new(200);
        assert!(newer > older);
        assert!(TransactionSnapshot::new(7).is_newer_than(&TransactionSnapshot::new(3)));
    }

    #[test]
    fn garbage_snapshot_tokens_are_rejected() {
        assert!(TimestampSnapshot::decode("not-base64!").is_err());
        assert!(TransactionSnapshot::decode("c2hvcnQ").is_err());
    }

    #[test]
    fn continuous_token_round_trips_and_rejects_garbage() {
        let token = encode_continuous_token(12345);
        assert_eq!(decode_continuous_token(&token).unwrap(), 12345);
        assert_eq!(
            decode_continuous_token("!!!").unwrap_err().code().as_str(),
            "INVALID_CONTINUOUS_TOKEN"
        );
    }
}
