//! Content-addressed cache key generation.

use sha2::{Digest, Sha256};

/// Cache key for a request URL: hex SHA-256 of the full, non-shortened URL.
///
/// Used as the disk cache file name, so the output is always 64 lowercase
/// hex characters and safe on every filesystem.
pub fn url_cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stability() {
        let hash1 = url_cache_key("https://upload.example.org/a/ab/Foo.png");
        let hash2 = url_cache_key("https://upload.example.org/a/ab/Foo.png");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_hash_distinguishes_query() {
        let plain = url_cache_key("https://example.org/w/api.php");
        let with_query = url_cache_key("https://example.org/w/api.php?action=query");
        assert_ne!(plain, with_query);
    }

    #[test]
    fn test_hash_format() {
        let hash = url_cache_key("https://example.org/");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
