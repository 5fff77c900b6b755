//! Issuing and redeeming capability links.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::link::{LinkState, ShareLink, SpentLink};
use crate::share_url::ShareUrl;
use cipherdrop_common::{ContentId, Error, LinkId, Result};
use cipherdrop_crypto::{decrypt, EncryptedEnvelope, KeyMaterial, Nonce};
use cipherdrop_storage::{ContentStore, MetadataStore, Predicate, Record, Table};
use cipherdrop_vault::{FileRecord, LinkRevoker};

/// A link that was just created, with the URL to hand out.
///
/// The URL is the only place the key is kept.
#[derive(Debug, Clone)]
pub struct IssuedLink {
    pub link: ShareLink,
    pub url: ShareUrl,
}

/// Outcome of a successful redemption.
#[derive(Debug, Clone)]
pub struct Redemption {
    /// Link state after the increment.
    pub link: ShareLink,
    /// This redemption used the last access; the link must be deleted once
    /// the content was handed out.
    pub exhausted: bool,
}

/// Decrypted content delivered through a share link.
#[derive(Debug, Clone)]
pub struct OpenedFile {
    pub file_name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
    /// Redemptions left on the link.
    pub remaining: u32,
}

/// Current state of a link, read without consuming a redemption.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub state: LinkState,
    pub link: Option<ShareLink>,
}

/// Issues, validates and consumes share links.
///
/// Link records live in the `share_links` table. Redemption is a
/// compare-and-swap on `access_count` through `MetadataStore::update`, so two
/// concurrent redemptions can never both take the last access.
pub struct ShareLinkService {
    records: Arc<dyn MetadataStore>,
    content: Arc<dyn ContentStore>,
    clock: Arc<dyn Clock>,
    base_url: Url,
}

impl ShareLinkService {
    /// Create a service issuing links under `base_url`.
    pub fn new(records: Arc<dyn MetadataStore>, content: Arc<dyn ContentStore>, base_url: Url) -> Self {
        Self {
            records,
            content,
            clock: Arc::new(SystemClock),
            base_url,
        }
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Base URL links are issued under.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Issue a link for an uploaded file.
    ///
    /// # Preconditions
    /// - `max_access_count >= 1`
    /// - `ttl` is positive
    ///
    /// # Postconditions
    /// - A record with `access_count = 0` and `expires_at = now + ttl` exists
    /// - The key appears only in the returned URL, never in the record
    ///
    /// # Errors
    /// - `InvalidInput` on a zero count or ttl
    /// - `Unavailable` if the record store fails
    pub async fn create_link(
        &self,
        file_cid: &ContentId,
        nonce: Nonce,
        key: &KeyMaterial,
        ttl: Duration,
        max_access_count: u32,
    ) -> Result<IssuedLink> {
        if max_access_count == 0 {
            return Err(Error::InvalidInput(
                "A share link must allow at least one access".to_string(),
            ));
        }
        let ttl = ChronoDuration::from_std(ttl)
            .ok()
            .filter(|d| *d > ChronoDuration::zero())
            .ok_or_else(|| Error::InvalidInput("Link lifetime must be positive".to_string()))?;

        let now = self.clock.now();
        let link = ShareLink {
            id: LinkId::new(),
            file_cid: file_cid.clone(),
            nonce,
            created_at: now,
            expires_at: now + ttl,
            max_access_count,
            access_count: 0,
        };

        let url = ShareUrl::new(&self.base_url, link.id, key.clone())?;
        self.records.insert(Table::ShareLinks, link.to_record()?).await?;

        info!(
            link_id = %link.id,
            cid = %file_cid,
            max_access_count,
            expires_at = %link.expires_at,
            "Share link created"
        );
        Ok(IssuedLink { link, url })
    }

    /// Consume one redemption of a link.
    ///
    /// The deadline and count check plus the increment are applied as one
    /// conditional update. A link found expired or exhausted is replaced by
    /// a spent marker on the spot, and the marker keeps reporting why.
    ///
    /// # Errors
    /// - `NotFound` if the link was never issued or was revoked
    /// - `LinkExpired` if the deadline passed
    /// - `LinkExhausted` if every redemption was used
    /// - `Unavailable` if the record store fails; nothing was consumed
    pub async fn redeem(&self, id: &LinkId) -> Result<Redemption> {
        loop {
            let Some(link) = self.find(id).await? else {
                return Err(match self.find_spent(id).await? {
                    Some(spent) => spent.error(),
                    None => not_found(id),
                });
            };
            let now = self.clock.now();

            if link.is_expired(now) {
                self.discard(&link, LinkState::Expired).await?;
                return Err(Error::LinkExpired);
            }
            if link.is_exhausted() {
                self.discard(&link, LinkState::Exhausted).await?;
                return Err(Error::LinkExhausted);
            }

            let next = link.access_count + 1;
            let guard = Predicate::all()
                .eq("id", id.to_string())
                .eq("access_count", link.access_count)
                .ge("expires_at", now.timestamp_millis());

            let updated = self
                .records
                .update(Table::ShareLinks, &guard, counter_patch(next))
                .await?;

            if updated == 1 {
                let exhausted = next >= link.max_access_count;
                debug!(link_id = %id, access_count = next, exhausted, "Share link redeemed");
                return Ok(Redemption {
                    link: ShareLink {
                        access_count: next,
                        ..link
                    },
                    exhausted,
                });
            }

            // Another redemption won the swap; re-read and decide again.
            debug!(link_id = %id, "Lost redemption race");
        }
    }

    /// Redeem a link and deliver the decrypted file.
    ///
    /// When the redemption used the last access, the link is marked spent
    /// after the fetch attempt whether or not it succeeded. Later attempts
    /// get `LinkExhausted`.
    ///
    /// # Errors
    /// - Everything `redeem` returns
    /// - `NotFound` if the file or its blob is gone
    /// - `AuthenticationFailure` if the URL key does not decrypt the blob
    pub async fn open(&self, url: &ShareUrl) -> Result<OpenedFile> {
        let redemption = self.redeem(url.id()).await?;
        let fetched = self.fetch(&redemption.link, url.key()).await;

        if redemption.exhausted {
            if let Err(e) = self.discard(&redemption.link, LinkState::Exhausted).await {
                warn!(link_id = %url.id(), error = %e, "Failed to retire exhausted link");
            }
        }

        let (file, content) = fetched?;
        Ok(OpenedFile {
            file_name: file.file_name,
            mime_type: file.mime_type,
            content,
            remaining: redemption.link.remaining(),
        })
    }

    async fn fetch(&self, link: &ShareLink, key: &KeyMaterial) -> Result<(FileRecord, Vec<u8>)> {
        let rows = self
            .records
            .select(Table::Files, &Predicate::all().eq("cid", link.file_cid.as_str()))
            .await?;
        let file = match rows.into_iter().next() {
            Some(row) => FileRecord::from_record(row)?,
            None => {
                return Err(Error::NotFound(format!("File not found: {}", link.file_cid)))
            }
        };

        let ciphertext = self.content.get(&link.file_cid).await?;
        let content = decrypt(key, &EncryptedEnvelope::new(link.nonce, ciphertext))?;
        Ok((file, content))
    }

    /// Delete a link on the owner's request.
    ///
    /// # Errors
    /// - `NotFound` if the link does not exist
    pub async fn revoke(&self, id: &LinkId) -> Result<()> {
        let deleted = self
            .records
            .delete(Table::ShareLinks, &Predicate::all().eq("id", id.to_string()))
            .await?;
        if deleted == 0 {
            return Err(not_found(id));
        }
        info!(link_id = %id, "Share link revoked");
        Ok(())
    }

    /// Delete every link bound to a file.
    pub async fn revoke_for_file(&self, cid: &ContentId) -> Result<u64> {
        let deleted = self
            .records
            .delete(Table::ShareLinks, &Predicate::all().eq("file_cid", cid.as_str()))
            .await?;
        if deleted > 0 {
            info!(cid = %cid, deleted, "Share links revoked for file");
        }
        Ok(deleted)
    }

    /// Delete every link whose deadline has passed, returning how many.
    ///
    /// Spent markers past their deadline are dropped too; presenting such a
    /// link afterwards reports `NotFound`.
    pub async fn purge_expired(&self) -> Result<u64> {
        let past_deadline = Predicate::all().lt("expires_at", self.clock.now().timestamp_millis());
        let deleted = self.records.delete(Table::ShareLinks, &past_deadline).await?;
        let markers = self.records.delete(Table::SpentLinks, &past_deadline).await?;
        info!(deleted, markers, "Purged expired share links");
        Ok(deleted)
    }

    /// Inspect a link without consuming a redemption.
    ///
    /// A spent link reports the state it ended in, without a record.
    pub async fn status(&self, id: &LinkId) -> Result<LinkStatus> {
        if let Some(link) = self.find(id).await? {
            return Ok(LinkStatus {
                state: link.state(self.clock.now()),
                link: Some(link),
            });
        }
        let state = match self.find_spent(id).await? {
            Some(spent) => spent.state,
            None => LinkState::Deleted,
        };
        Ok(LinkStatus { state, link: None })
    }

    /// Links issued for a file, oldest first.
    pub async fn links_for_file(&self, cid: &ContentId) -> Result<Vec<ShareLink>> {
        let mut links = self
            .records
            .select(Table::ShareLinks, &Predicate::all().eq("file_cid", cid.as_str()))
            .await?
            .into_iter()
            .map(ShareLink::from_record)
            .collect::<Result<Vec<_>>>()?;
        links.sort_by_key(|l| l.created_at);
        Ok(links)
    }

    async fn find(&self, id: &LinkId) -> Result<Option<ShareLink>> {
        let rows = self
            .records
            .select(Table::ShareLinks, &Predicate::all().eq("id", id.to_string()))
            .await?;
        rows.into_iter().next().map(ShareLink::from_record).transpose()
    }

    async fn find_spent(&self, id: &LinkId) -> Result<Option<SpentLink>> {
        let rows = self
            .records
            .select(Table::SpentLinks, &Predicate::all().eq("id", id.to_string()))
            .await?;
        rows.into_iter().next().map(SpentLink::from_record).transpose()
    }

    /// Replace a link record with a spent marker.
    ///
    /// The marker is written before the link is deleted, so a concurrent
    /// reader sees one or the other. A marker already written by a
    /// concurrent discard is kept.
    async fn discard(&self, link: &ShareLink, reason: LinkState) -> Result<()> {
        let marker = SpentLink::new(link, reason, self.clock.now());
        match self.records.insert(Table::SpentLinks, marker.to_record()?).await {
            Ok(()) | Err(Error::Conflict(_)) => {}
            Err(e) => return Err(e),
        }
        self.records
            .delete(Table::ShareLinks, &Predicate::all().eq("id", link.id.to_string()))
            .await?;
        info!(link_id = %link.id, reason = %reason, "Share link retired");
        Ok(())
    }

    /// Current time of the service clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn not_found(id: &LinkId) -> Error {
    Error::NotFound(format!("Share link not found: {}", id))
}

fn counter_patch(access_count: u32) -> Record {
    let mut patch = Record::new();
    patch.insert("access_count".to_string(), json!(access_count));
    patch
}

#[async_trait]
impl LinkRevoker for ShareLinkService {
    async fn revoke_for_file(&self, cid: &ContentId) -> Result<u64> {
        ShareLinkService::revoke_for_file(self, cid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use cipherdrop_crypto::encrypt;
    use cipherdrop_storage::{MemoryContentStore, MemoryMetadataStore};

    struct Fixture {
        records: Arc<MemoryMetadataStore>,
        clock: Arc<ManualClock>,
        service: ShareLinkService,
    }

    fn fixture() -> Fixture {
        let records = Arc::new(MemoryMetadataStore::new());
        let content = Arc::new(MemoryContentStore::new());
        let clock = Arc::new(ManualClock::default());
        let service = ShareLinkService::new(
            records.clone(),
            content,
            Url::parse("https://cipherdrop.example").unwrap(),
        )
        .with_clock(clock.clone());
        Fixture {
            records,
            clock,
            service,
        }
    }

    fn cid() -> ContentId {
        ContentId::new("Qm123").unwrap()
    }

    async fn issue(f: &Fixture, ttl_secs: u64, max: u32) -> IssuedLink {
        let key = KeyMaterial::generate();
        let nonce = *encrypt(&key, b"x").unwrap().nonce();
        f.service
            .create_link(&cid(), nonce, &key, Duration::from_secs(ttl_secs), max)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_link() {
        let f = fixture();
        let issued = issue(&f, 30, 3).await;

        assert_eq!(issued.link.access_count, 0);
        assert_eq!(
            issued.link.expires_at - issued.link.created_at,
            ChronoDuration::seconds(30)
        );
        assert_eq!(issued.url.id(), &issued.link.id);

        let rows = f.records.select(Table::ShareLinks, &Predicate::all()).await.unwrap();
        let stored = serde_json::to_string(&rows).unwrap();
        assert!(!stored.contains(&issued.url.key().to_hex()));
    }

    #[tokio::test]
    async fn test_invalid_parameters() {
        let f = fixture();
        let key = KeyMaterial::generate();
        let nonce = Nonce::from_bytes([0; 12]);

        assert!(matches!(
            f.service.create_link(&cid(), nonce, &key, Duration::from_secs(30), 0).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            f.service.create_link(&cid(), nonce, &key, Duration::ZERO, 1).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_redeem_counts_up_to_max() {
        let f = fixture();
        let id = issue(&f, 30, 2).await.link.id;

        let first = f.service.redeem(&id).await.unwrap();
        assert_eq!(first.link.access_count, 1);
        assert!(!first.exhausted);

        let second = f.service.redeem(&id).await.unwrap();
        assert_eq!(second.link.access_count, 2);
        assert!(second.exhausted);

        assert!(matches!(f.service.redeem(&id).await, Err(Error::LinkExhausted)));
        // The record is gone but the marker still answers.
        assert!(f.service.find(&id).await.unwrap().is_none());
        assert!(matches!(f.service.redeem(&id).await, Err(Error::LinkExhausted)));
    }

    #[tokio::test]
    async fn test_expired_link_keeps_reporting_expired() {
        let f = fixture();
        let id = issue(&f, 1, 5).await.link.id;

        f.clock.advance(ChronoDuration::seconds(2));

        assert!(matches!(f.service.redeem(&id).await, Err(Error::LinkExpired)));
        let status = f.service.status(&id).await.unwrap();
        assert_eq!(status.state, LinkState::Expired);
        assert!(status.link.is_none());
        assert!(matches!(f.service.redeem(&id).await, Err(Error::LinkExpired)));
    }

    #[tokio::test]
    async fn test_unavailable_consumes_nothing() {
        let f = fixture();
        let id = issue(&f, 30, 1).await.link.id;

        f.records.set_unavailable(true);
        assert!(matches!(f.service.redeem(&id).await, Err(Error::Unavailable(_))));
        f.records.set_unavailable(false);

        let status = f.service.status(&id).await.unwrap();
        assert_eq!(status.state, LinkState::Active);
        assert!(f.service.redeem(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let f = fixture();
        let id = issue(&f, 30, 2).await.link.id;

        assert_eq!(f.service.status(&id).await.unwrap().state, LinkState::Active);
        f.service.redeem(&id).await.unwrap();
        assert_eq!(f.service.status(&id).await.unwrap().state, LinkState::Redeemed);
        f.service.redeem(&id).await.unwrap();
        assert_eq!(f.service.status(&id).await.unwrap().state, LinkState::Exhausted);
    }

    #[tokio::test]
    async fn test_revoke() {
        let f = fixture();
        let id = issue(&f, 30, 1).await.link.id;

        f.service.revoke(&id).await.unwrap();
        assert!(matches!(f.service.revoke(&id).await, Err(Error::NotFound(_))));
        assert!(matches!(f.service.redeem(&id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_revoke_for_file() {
        let f = fixture();
        issue(&f, 30, 1).await;
        issue(&f, 30, 1).await;

        assert_eq!(f.service.links_for_file(&cid()).await.unwrap().len(), 2);
        assert_eq!(f.service.revoke_for_file(&cid()).await.unwrap(), 2);
        assert!(f.service.links_for_file(&cid()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let f = fixture();
        issue(&f, 1, 1).await;
        issue(&f, 60, 1).await;

        f.clock.advance(ChronoDuration::seconds(5));
        assert_eq!(f.service.purge_expired().await.unwrap(), 1);
        assert_eq!(f.service.links_for_file(&cid()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_drops_spent_markers_past_deadline() {
        let f = fixture();
        let id = issue(&f, 10, 1).await.link.id;
        f.service.redeem(&id).await.unwrap();
        assert!(matches!(f.service.redeem(&id).await, Err(Error::LinkExhausted)));

        // Before the deadline the marker survives a sweep.
        assert_eq!(f.service.purge_expired().await.unwrap(), 0);
        assert!(matches!(f.service.redeem(&id).await, Err(Error::LinkExhausted)));

        f.clock.advance(ChronoDuration::seconds(11));
        f.service.purge_expired().await.unwrap();
        let markers = f.records.select(Table::SpentLinks, &Predicate::all()).await.unwrap();
        assert!(markers.is_empty());
        assert!(matches!(f.service.redeem(&id).await, Err(Error::NotFound(_))));
    }
}
