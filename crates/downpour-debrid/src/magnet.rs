//! Magnet-link helpers for duplicate detection.

use once_cell::sync::Lazy;
use regex::Regex;

static HEX_HASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)btih:([0-9a-f]{40})").expect("hex hash pattern"));
static BASE32_HASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)btih:([a-z0-9]{32})").expect("base32 hash pattern"));
static ANY_HASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)btih:([^&]+)").expect("fallback hash pattern"));

/// Extract the info-hash from a magnet link.
///
/// Upstream stores hashes as lowercase hex, so 40-character hex hashes are
/// lowercased. 32-character Base32 hashes are uppercased and left for the
/// service to normalise. Anything else after `btih:` is returned verbatim.
#[must_use]
pub fn extract_magnet_hash(magnet: &str) -> Option<String> {
    if let Some(captures) = HEX_HASH.captures(magnet) {
        return Some(captures[1].to_lowercase());
    }

    if let Some(captures) = BASE32_HASH.captures(magnet) {
        return Some(captures[1].to_uppercase());
    }

    let captures = ANY_HASH.captures(magnet)?;
    let hash = &captures[1];
    if hash.len() == 40 && hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
        Some(hash.to_lowercase())
    } else if hash.len() == 32 && hash.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        Some(hash.to_uppercase())
    } else {
        Some(hash.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_hashes_are_lowercased() {
        let magnet = "magnet:?xt=urn:btih:0123456789ABCDEF0123456789ABCDEF01234567&dn=show";
        assert_eq!(
            extract_magnet_hash(magnet).as_deref(),
            Some("0123456789abcdef0123456789abcdef01234567")
        );
    }

    #[test]
    fn base32_hashes_are_uppercased() {
        let magnet = "magnet:?xt=urn:btih:mfrggzdfmztwq2lknnwg23tpobyxe43u&dn=show";
        assert_eq!(
            extract_magnet_hash(magnet).as_deref(),
            Some("MFRGGZDFMZTWQ2LKNNWG23TPOBYXE43U")
        );
    }

    #[test]
    fn unrecognised_forms_pass_through() {
        let magnet = "magnet:?xt=urn:btih:short-hash&dn=show";
        assert_eq!(extract_magnet_hash(magnet).as_deref(), Some("short-hash"));
    }

    #[test]
    fn missing_hash_yields_none() {
        assert_eq!(extract_magnet_hash("magnet:?dn=show"), None);
    }
}
