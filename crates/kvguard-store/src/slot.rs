// Key slot hashing
// Maps keys onto the 16384 slots used by sharded deployments

use crc16::{State, XMODEM};

/// Number of hash slots in a sharded deployment
pub const SLOT_COUNT: u16 = 16384;

/// Return the portion of the key used for slot hashing
///
/// When the key contains a `{...}` section with at least one character between
/// the braces, only that section is hashed, so keys sharing a tag land on the
/// same shard.
pub fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{')
        && let Some(len) = key[open + 1..].iter().position(|&b| b == b'}')
        && len > 0
    {
        return &key[open + 1..open + 1 + len];
    }
    key
}

/// Compute the slot owning a key
pub fn key_slot(key: &str) -> u16 {
    State::<XMODEM>::calculate(hash_tag(key.as_bytes())) % SLOT_COUNT
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_crc16_reference_value() {
        assert_eq!(State::<XMODEM>::calculate(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_known_slots() {
        assert_eq!(key_slot("foo"), 12182);
        assert_eq!(key_slot("{user1000}.following"), key_slot("{user1000}.followers"));
    }

    #[test]
    fn test_hash_tag_rules() {
        assert_eq!(hash_tag(b"{redlock}_orders"), b"redlock");
        assert_eq!(hash_tag(b"plain"), b"plain");
        // Empty tag falls back to the whole key
        assert_eq!(hash_tag(b"{}orders"), b"{}orders");
        // Only the first tag counts
        assert_eq!(hash_tag(b"{a}{b}"), b"a");
        // Unterminated tag
        assert_eq!(hash_tag(b"{orders"), b"{orders");
    }

    proptest! {
        #[test]
        fn prop_lock_keys_share_slot(a in "[a-z0-9:_-]{0,32}", b in "[a-z0-9:_-]{0,32}") {
            let left = kvguard_common::lock_key(&a);
            let right = kvguard_common::lock_key(&b);
            prop_assert_eq!(key_slot(&left), key_slot(&right));
        }

        #[test]
        fn prop_slot_in_range(key in ".{0,64}") {
            prop_assert!(key_slot(&key) < SLOT_COUNT);
        }
    }
}
