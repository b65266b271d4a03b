//! URL helpers: run-scoped prefix shortening and image detection.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, PoisonError};

use regex::Regex;

static IMAGE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(jpg|jpeg|png|gif|svg|webp)(\?.*)?$").expect("valid image pattern"));

static SCHEME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https?://").expect("valid scheme pattern"));

/// Whether the URL points at an image resource by its file extension.
pub fn is_image_url(url: &str) -> bool {
    IMAGE_URL.is_match(url)
}

/// The URL without its `http://` or `https://` prefix.
pub fn strip_scheme(url: &str) -> &str {
    match SCHEME.find(url) {
        Some(m) => &url[m.end()..],
        None => url,
    }
}

#[derive(Debug, Default)]
struct PrefixTable {
    by_id: Vec<String>,
    by_prefix: HashMap<String, usize>,
}

/// Bijective map between URL prefixes and small integer ids.
///
/// `serialize` turns `https://host.example/a/b` into `_1_/a/b`; `deserialize`
/// reverses it. Ids are handed out in order starting at 1 and live as long as
/// the shortener. Nothing is persisted.
#[derive(Debug, Default)]
pub struct UrlShortener {
    table: Mutex<PrefixTable>,
}

impl UrlShortener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorten `url` to `_<id>_<path>`, allocating an id for a new prefix.
    pub fn serialize(&self, url: &str) -> String {
        let (prefix, path) = split_prefix(url);
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let id = match table.by_prefix.get(prefix) {
            Some(&id) => id,
            None => {
                table.by_id.push(prefix.to_string());
                let id = table.by_id.len();
                table.by_prefix.insert(prefix.to_string(), id);
                id
            }
        };
        format!("_{id}_{path}")
    }

    /// Expand a shorthand produced by [`serialize`](Self::serialize).
    ///
    /// Anything that is not shorthand, or names an unknown id, is returned as is.
    pub fn deserialize(&self, value: &str) -> String {
        let Some((id, path)) = parse_shorthand(value) else {
            return value.to_string();
        };
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        match id.checked_sub(1).and_then(|idx| table.by_id.get(idx)) {
            Some(prefix) => format!("{prefix}{path}"),
            None => value.to_string(),
        }
    }

    /// Number of distinct prefixes seen.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split at the first `/`, `?` or `#` after the authority.
fn split_prefix(url: &str) -> (&str, &str) {
    let authority_start = url.find("://").map(|i| i + 3).unwrap_or(0);
    let split = url[authority_start..]
        .find(['/', '?', '#'])
        .map(|i| authority_start + i)
        .unwrap_or(url.len());
    url.split_at(split)
}

fn parse_shorthand(value: &str) -> Option<(usize, &str)> {
    let rest = value.strip_prefix('_')?;
    let end = rest.find('_')?;
    let digits = &rest[..end];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id = digits.parse().ok()?;
    Some((id, &rest[end + 1..]))
}
