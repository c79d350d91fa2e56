//! Member and tag key normalization
//!
//! Registry keys are prefixed with `t_` so tags live in their own namespace
//! within the registry's flat field space. Members sent to the registry are
//! normalized to their ECM form when they parse as a MAC address.

use std::str::FromStr;

use macaddr::MacAddr6;
use tracing::warn;

/// Prefix applied to tag ids in the registry and the legacy store.
pub const TAG_PREFIX: &str = "t_";

const MAC_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Offset between a set-top MAC and the cable modem MAC derived from it.
const ECM_OFFSET: u64 = 2;

/// Parse a MAC address in plain (`AABBCCDDEEFF`), colon, dash or dotted
/// (`AABB.CCDD.EEFF`) form.
pub fn parse_mac(value: &str) -> Option<MacAddr6> {
    if value.len() == 12 && value.bytes().all(|b| b.is_ascii_hexdigit()) {
        let raw = u64::from_str_radix(value, 16).ok()?;
        return Some(mac_from_u64(raw));
    }
    MacAddr6::from_str(value).ok()
}

fn mac_to_u64(mac: MacAddr6) -> u64 {
    mac.as_bytes()
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

fn mac_from_u64(value: u64) -> MacAddr6 {
    let b = (value & MAC_MASK).to_be_bytes();
    MacAddr6::new(b[2], b[3], b[4], b[5], b[6], b[7])
}

/// Normalized form used for every registry call.
///
/// Trims, converts MAC addresses to the ECM address (value minus two, as 12
/// uppercase hex digits) and uppercases everything else.
pub fn to_normalized_ecm(member: &str) -> String {
    let trimmed = member.trim();
    match parse_mac(trimmed) {
        Some(mac) => {
            let ecm = mac_to_u64(mac).wrapping_sub(ECM_OFFSET) & MAC_MASK;
            format!("{ecm:012X}")
        }
        None => trimmed.to_uppercase(),
    }
}

/// Add the registry prefix, leaving already-prefixed ids untouched.
pub fn set_tag_prefix(tag_id: &str) -> String {
    if tag_id.starts_with(TAG_PREFIX) {
        warn!(tag_id = tag_id, "Tag already has prefix");
        return tag_id.to_string();
    }
    format!("{TAG_PREFIX}{tag_id}")
}

pub fn remove_tag_prefix(tag_id: &str) -> &str {
    tag_id.strip_prefix(TAG_PREFIX).unwrap_or(tag_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecm_from_all_mac_forms() {
        for form in [
            "AABBCCDDEEFF",
            "aabbccddeeff",
            "AA:BB:CC:DD:EE:FF",
            "aa-bb-cc-dd-ee-ff",
            "AABB.CCDD.EEFF",
            "  AA:BB:CC:DD:EE:FF  ",
        ] {
            assert_eq!(to_normalized_ecm(form), "AABBCCDDEEFD", "form {form}");
        }
    }

    #[test]
    fn test_ecm_borrows_across_octets() {
        assert_eq!(to_normalized_ecm("00:00:00:00:01:00"), "0000000000FE");
    }

    #[test]
    fn test_non_mac_is_uppercased() {
        assert_eq!(to_normalized_ecm(" device-42 "), "DEVICE-42");
        assert_eq!(to_normalized_ecm("AABBCCDDEEF"), "AABBCCDDEEF");
    }

    #[test]
    fn test_prefix_is_idempotent() {
        assert_eq!(set_tag_prefix("promo"), "t_promo");
        assert_eq!(set_tag_prefix("t_promo"), "t_promo");
        assert_eq!(remove_tag_prefix("t_promo"), "promo");
        assert_eq!(remove_tag_prefix("promo"), "promo");
    }
}
