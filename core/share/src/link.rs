//! Capability link records and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use cipherdrop_common::{ContentId, Error, LinkId, Result};
use cipherdrop_crypto::Nonce;
use cipherdrop_storage::{from_record, to_record, Record};

/// Persisted state of a share link.
///
/// Deliberately has no key field: the key travels only in the URL fragment.
/// Timestamps are stored as unix milliseconds so range predicates compare
/// numerically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLink {
    pub id: LinkId,
    pub file_cid: ContentId,
    pub nonce: Nonce,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    pub max_access_count: u32,
    pub access_count: u32,
}

impl ShareLink {
    /// Whether the deadline has passed at `now`.
    ///
    /// Compared at millisecond precision, the precision of the stored record.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() > self.expires_at.timestamp_millis()
    }

    /// Whether no redemptions are left.
    pub fn is_exhausted(&self) -> bool {
        self.access_count >= self.max_access_count
    }

    /// Redemptions left.
    pub fn remaining(&self) -> u32 {
        self.max_access_count.saturating_sub(self.access_count)
    }

    /// Lifecycle state at `now`.
    pub fn state(&self, now: DateTime<Utc>) -> LinkState {
        if self.is_expired(now) {
            LinkState::Expired
        } else if self.is_exhausted() {
            LinkState::Exhausted
        } else if self.access_count > 0 {
            LinkState::Redeemed
        } else {
            LinkState::Active
        }
    }

    pub fn to_record(&self) -> Result<Record> {
        to_record(self)
    }

    pub fn from_record(record: Record) -> Result<Self> {
        from_record(record)
    }
}

/// Marker left in place of a link that expired or ran out of redemptions.
///
/// Carries no file reference and no nonce, only enough to tell a later
/// visitor why the link stopped working. Dropped by the expiry sweep once
/// its deadline passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentLink {
    pub id: LinkId,
    pub state: LinkState,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub spent_at: DateTime<Utc>,
}

impl SpentLink {
    pub fn new(link: &ShareLink, state: LinkState, spent_at: DateTime<Utc>) -> Self {
        Self {
            id: link.id,
            state,
            expires_at: link.expires_at,
            spent_at,
        }
    }

    /// Error reported to anyone presenting this link again.
    pub fn error(&self) -> Error {
        match self.state {
            LinkState::Expired => Error::LinkExpired,
            _ => Error::LinkExhausted,
        }
    }

    pub fn to_record(&self) -> Result<Record> {
        to_record(self)
    }

    pub fn from_record(record: Record) -> Result<Self> {
        from_record(record)
    }
}

/// Lifecycle of a share link.
///
/// `Active` and `Redeemed` links accept redemptions. `Expired` and
/// `Exhausted` links have their record replaced by a [`SpentLink`] as soon
/// as they are observed. Revoked links are `Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Issued, never redeemed.
    Active,
    /// Redeemed at least once, redemptions left.
    Redeemed,
    /// Deadline passed.
    Expired,
    /// Every redemption used.
    Exhausted,
    /// Revoked, or no record exists.
    Deleted,
}

impl LinkState {
    /// Whether a redemption would currently succeed.
    pub fn is_redeemable(&self) -> bool {
        matches!(self, LinkState::Active | LinkState::Redeemed)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Active => "active",
            LinkState::Redeemed => "redeemed",
            LinkState::Expired => "expired",
            LinkState::Exhausted => "exhausted",
            LinkState::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn link(access_count: u32, max_access_count: u32) -> ShareLink {
        let created_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        ShareLink {
            id: LinkId::new(),
            file_cid: ContentId::new("Qm123").unwrap(),
            nonce: Nonce::from_bytes([1; 12]),
            created_at,
            expires_at: created_at + Duration::seconds(30),
            max_access_count,
            access_count,
        }
    }

    #[test]
    fn test_states() {
        let l = link(0, 2);
        let t0 = l.created_at;

        assert_eq!(l.state(t0), LinkState::Active);
        assert_eq!(link(1, 2).state(t0), LinkState::Redeemed);
        assert_eq!(link(2, 2).state(t0), LinkState::Exhausted);
        assert_eq!(l.state(t0 + Duration::seconds(31)), LinkState::Expired);
    }

    #[test]
    fn test_deadline_is_inclusive() {
        let l = link(0, 1);
        assert!(!l.is_expired(l.expires_at));
        assert!(l.is_expired(l.expires_at + Duration::milliseconds(1)));
    }

    #[test]
    fn test_record_has_no_key_and_numeric_times() {
        let l = link(0, 1);
        let record = l.to_record().unwrap();

        assert!(record["expires_at"].is_i64());
        assert_eq!(record["access_count"], 0);
        assert_eq!(record["id"], l.id.to_string());
        assert!(!record.keys().any(|k| k.contains("key")));

        assert_eq!(ShareLink::from_record(record).unwrap(), l);
    }

    #[test]
    fn test_spent_link_keeps_no_file_reference() {
        let l = link(1, 1);
        let spent = SpentLink::new(&l, LinkState::Exhausted, l.created_at);
        let record = spent.to_record().unwrap();

        assert_eq!(record["state"], "exhausted");
        assert!(record.get("file_cid").is_none());
        assert!(record.get("nonce").is_none());
        assert!(matches!(spent.error(), Error::LinkExhausted));

        let expired = SpentLink::new(&l, LinkState::Expired, l.created_at);
        assert!(matches!(expired.error(), Error::LinkExpired));
        assert_eq!(SpentLink::from_record(record).unwrap(), spent);
    }

    #[test]
    fn test_remaining() {
        assert_eq!(link(1, 3).remaining(), 2);
        assert_eq!(link(3, 3).remaining(), 0);
    }
}
