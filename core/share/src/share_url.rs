//! Share link wire format: `https://<host>/view/<link-id>#key=<hex-key>`.
//!
//! The link id sits in the path and reaches the server. The key sits only in
//! the fragment, which browsers never send, so the server never sees it.

use std::fmt;
use std::str::FromStr;
use url::Url;

use cipherdrop_common::{Error, LinkId, Result};
use cipherdrop_crypto::KeyMaterial;

const VIEW_SEGMENT: &str = "view";
const KEY_PARAM: &str = "key";

/// A parsed or freshly built share URL.
#[derive(Clone)]
pub struct ShareUrl {
    url: Url,
    id: LinkId,
    key: KeyMaterial,
}

impl ShareUrl {
    /// Build the share URL for a link under `base`.
    ///
    /// Any path on `base` is kept as a prefix; its query and fragment are
    /// dropped.
    ///
    /// # Errors
    /// - `InvalidInput` if `base` is not an absolute http(s) URL
    pub fn new(base: &Url, id: LinkId, key: KeyMaterial) -> Result<Self> {
        check_scheme(base)?;

        let mut url = base.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|_| Error::InvalidInput(format!("Cannot use '{}' as a base URL", base)))?
            .pop_if_empty()
            .push(VIEW_SEGMENT)
            .push(&id.to_string());
        url.set_fragment(Some(&format!("{}={}", KEY_PARAM, key.to_hex())));

        Ok(Self { url, id, key })
    }

    /// Parse a share URL.
    ///
    /// The fragment may carry other parameters next to `key`.
    ///
    /// # Errors
    /// - `InvalidInput` if the URL is malformed, lacks a `/view/<id>` path,
    ///   or carries no key
    /// - `InvalidKeyLength` if the key does not decode to 32 bytes
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim())
            .map_err(|e| Error::InvalidInput(format!("Invalid share URL: {}", e)))?;
        check_scheme(&url)?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let id = match segments.as_slice() {
            [.., view, id] if *view == VIEW_SEGMENT => LinkId::from_str(id)?,
            _ => {
                return Err(Error::InvalidInput(
                    "Share URL must end in /view/<link-id>".to_string(),
                ))
            }
        };

        let fragment = url
            .fragment()
            .ok_or_else(|| Error::InvalidInput("Share URL carries no key".to_string()))?;
        let key_hex = url::form_urlencoded::parse(fragment.as_bytes())
            .find(|(name, _)| name == KEY_PARAM)
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| Error::InvalidInput("Share URL carries no key".to_string()))?;
        let key = KeyMaterial::from_hex(&key_hex)?;

        let base = base_of(&url, segments.len() - 2);
        Self::new(&base, id, key)
    }

    /// Link id from the path.
    pub fn id(&self) -> &LinkId {
        &self.id
    }

    /// Key from the fragment.
    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    /// Full URL including the fragment.
    pub fn as_url(&self) -> &Url {
        &self.url
    }

    /// Consume into the key.
    pub fn into_key(self) -> KeyMaterial {
        self.key
    }
}

fn check_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(()),
        _ => Err(Error::InvalidInput(format!(
            "Share URLs must be absolute http(s) URLs, got '{}'",
            url.origin().ascii_serialization()
        ))),
    }
}

/// The URL with only its first `keep` non-empty path segments.
fn base_of(url: &Url, keep: usize) -> Url {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);

    let prefix: Vec<String> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).take(keep).map(str::to_string).collect())
        .unwrap_or_default();
    let mut path = String::from("/");
    for seg in prefix {
        path.push_str(&seg);
        path.push('/');
    }
    base.set_path(&path);
    base
}

impl fmt::Display for ShareUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl fmt::Debug for ShareUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut shown = self.url.clone();
        shown.set_fragment(None);
        f.debug_struct("ShareUrl")
            .field("url", &shown.as_str())
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}

impl FromStr for ShareUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
