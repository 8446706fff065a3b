//! Key comparison and entry sizing.

use super::sorted::{NodeKind, SLOT_SIZE};
use tern_common::{Result, TernError};

/// Maximum key size in bytes.
pub const MAX_KEY_SIZE: usize = 256;

/// Key comparison using a u64 prefix for 8+ byte keys.
/// Falls back to slice comparison for shorter keys or when the prefix
/// matches. Big-endian prefix reads preserve lexicographic order.
#[inline(always)]
pub fn key_cmp(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    if a.len() >= 8 && b.len() >= 8 {
        let a_prefix = u64::from_be_bytes([a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7]]);
        let b_prefix = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        if a_prefix != b_prefix {
            return a_prefix.cmp(&b_prefix);
        }
        if a.len() == 8 && b.len() == 8 {
            return std::cmp::Ordering::Equal;
        }
    }
    a.cmp(b)
}

/// Returns the on-page footprint of an entry with the given key: the key
/// bytes, the fixed-width payload of the node kind, and the slot directory
/// entry. Callers check `available_space() >= entry_size(..)` before
/// inserting so that page overflow is detected up front.
#[inline]
pub fn entry_size(key: &[u8], kind: NodeKind) -> usize {
    key.len() + kind.payload_size() + SLOT_SIZE
}

/// Rejects keys larger than `MAX_KEY_SIZE` before any page is touched.
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_SIZE {
        return Err(TernError::KeyTooLarge {
            size: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_key_cmp_short_keys() {
        assert_eq!(key_cmp(b"a", b"b"), Ordering::Less);
        assert_eq!(key_cmp(b"b", b"a"), Ordering::Greater);
        assert_eq!(key_cmp(b"abc", b"abc"), Ordering::Equal);
        assert_eq!(key_cmp(b"ab", b"abc"), Ordering::Less);
        assert_eq!(key_cmp(b"", b"a"), Ordering::Less);
    }

    #[test]
    fn test_key_cmp_long_keys() {
        assert_eq!(key_cmp(b"aaaaaaaab", b"aaaaaaaac"), Ordering::Less);
        assert_eq!(key_cmp(b"aaaaaaaa", b"aaaaaaaa"), Ordering::Equal);
        assert_eq!(key_cmp(b"aaaaaaaa", b"aaaaaaaab"), Ordering::Less);
        assert_eq!(key_cmp(b"zaaaaaaa", b"aaaaaaaab"), Ordering::Greater);
    }

    #[test]
    fn test_key_cmp_agrees_with_slice_cmp() {
        let keys: &[&[u8]] = &[
            b"",
            b"a",
            b"apple",
            b"applesauce",
            b"banana",
            b"aaaaaaaaaaaaaaaa",
            b"aaaaaaaaaaaaaaab",
            &[0xFF; 12],
        ];
        for a in keys {
            for b in keys {
                assert_eq!(key_cmp(a, b), a.cmp(b), "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_entry_size() {
        assert_eq!(entry_size(b"apple", NodeKind::Leaf), 5 + 6 + SLOT_SIZE);
        assert_eq!(entry_size(b"apple", NodeKind::Index), 5 + 4 + SLOT_SIZE);
        assert_eq!(entry_size(b"", NodeKind::Leaf), 6 + SLOT_SIZE);
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key(b"ok").is_ok());
        assert!(validate_key(&[0u8; MAX_KEY_SIZE]).is_ok());
        assert!(matches!(
            validate_key(&[0u8; MAX_KEY_SIZE + 1]),
            Err(TernError::KeyTooLarge { .. })
        ));
    }
}
