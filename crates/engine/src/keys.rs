//! Cache keys and storage names derived from a request.

use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode_lower(&hasher.finalize())
}

fn hex_encode_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Standard names arrive as `ticket` or `ticket.json`; both mean the same.
pub fn standard_name(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed.strip_suffix(".json").unwrap_or(trimmed)
}

/// Reduce a name to characters that are safe as a single path component.
pub fn safe_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let out = out.trim_start_matches('.').to_string();
    if out.is_empty() {
        "_".to_string()
    } else {
        out
    }
}

/// Cache key of the learned mapping for one (prefix, standard, shape) triple.
pub fn mapping_cache_key(prefix: &str, standard: &str, token: &str) -> String {
    let material = format!("{prefix}\u{0}{standard}\u{0}{token}");
    format!("mapping-{}", sha256_hex(material.as_bytes()))
}

/// Storage name of the learned mapping, readable enough to edit by hand.
pub fn mapping_storage_name(prefix: &str, standard: &str, token: &str) -> String {
    let hash = sha256_hex(token.as_bytes());
    safe_name(&format!("{prefix}{standard}-{}", &hash[..32]))
}

/// Where the standard is parked for manual correction when no mapping could
/// be generated. Never read back as a mapping.
pub fn placeholder_storage_name(storage_name: &str) -> String {
    format!("{storage_name}.placeholder")
}

/// Cache key of a model response for an exact prompt.
pub fn query_cache_key(prefix: &str, system: &str, user: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(system.as_bytes());
    hasher.update(user.as_bytes());
    format!("translationquery-{}", hex_encode_lower(&hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn standard_name_drops_json_suffix() {
        assert_eq!(standard_name("ticket.json"), "ticket");
        assert_eq!(standard_name(" ticket "), "ticket");
        assert_eq!(standard_name("ticket"), "ticket");
    }

    #[test]
    fn safe_name_blocks_traversal() {
        assert_eq!(safe_name("../etc/passwd"), "_etc_passwd");
        assert_eq!(safe_name("list tickets"), "list_tickets");
        assert_eq!(safe_name(""), "_");
    }

    #[test]
    fn mapping_keys_separate_prefix_standard_and_token() {
        let base = mapping_cache_key("", "ticket", "idtitle");
        assert_eq!(base, mapping_cache_key("", "ticket", "idtitle"));
        assert_ne!(base, mapping_cache_key("org1", "ticket", "idtitle"));
        assert_ne!(base, mapping_cache_key("", "alert", "idtitle"));
        assert_ne!(base, mapping_cache_key("", "ticket", "id"));
        assert_ne!(
            mapping_cache_key("a", "bc", "t"),
            mapping_cache_key("ab", "c", "t")
        );
    }

    #[test]
    fn storage_names_are_prefixed_and_safe() {
        let name = mapping_storage_name("org1-", "ticket", "idtitle");
        assert!(name.starts_with("org1-ticket-"));
        assert_eq!(name.len(), "org1-ticket-".len() + 32);
    }

    #[test]
    fn query_keys_are_namespaced() {
        let key = query_cache_key("", "system", "user");
        assert!(key.starts_with("translationquery-"));
        assert_ne!(key, query_cache_key("org", "system", "user"));
    }
}
