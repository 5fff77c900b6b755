//! Capability links for CipherDrop.
//!
//! A share link grants a bounded number of decryptions of one file before a
//! deadline. The link record (id, file, nonce, counters, deadline) lives in
//! the record store; the key lives only in the URL fragment handed to the
//! recipient.
//!
//! ```text
//! Active ──redeem──▶ Redeemed ──redeem──▶ Exhausted ─┐
//!    │                  │                            ├──▶ spent marker ──sweep──▶ Deleted
//!    └──── deadline ────┴───────▶ Expired ───────────┘
//! ```
//!
//! A spent marker keeps answering `LinkExhausted` or `LinkExpired` after the
//! link record itself is gone.

pub mod clock;
pub mod link;
pub mod service;
pub mod share_url;

pub use clock::{Clock, ManualClock, SystemClock};
pub use link::{LinkState, ShareLink, SpentLink};
pub use service::{IssuedLink, LinkStatus, OpenedFile, Redemption, ShareLinkService};
pub use share_url::ShareUrl;
