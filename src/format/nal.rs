//! H.264 NAL unit inspection.

/// NAL unit type of an IDR (instantaneous decoder refresh) slice.
pub const IDR_NAL_TYPE: u8 = 5;

/// Mask selecting `nal_unit_type` from the NAL header byte.
const NAL_TYPE_MASK: u8 = 0x1f;

/// Byte index of the NAL header when the unit carries a 4-byte start code.
const LONG_START_CODE_HEADER: usize = 4;

/// Byte index of the NAL header when the unit carries a 3-byte start code.
const SHORT_START_CODE_HEADER: usize = 3;

/// Returns the `nal_unit_type` of an Annex-B access unit.
///
/// Upstream units carry a 4-byte start code (`00 00 00 01`), so the header
/// sits at index 4. A 3-byte start code (`00 00 01`) moves it to index 3.
/// Payloads with neither prefix are read at index 4, matching the behavior
/// existing streams were produced against. Returns `None` when the payload is
/// too short to contain a header.
pub fn nal_unit_type(payload: &[u8]) -> Option<u8> {
    let offset = match payload {
        [0, 0, 0, 1, ..] => LONG_START_CODE_HEADER,
        [0, 0, 1, ..] => SHORT_START_CODE_HEADER,
        _ => LONG_START_CODE_HEADER,
    };
    payload.get(offset).map(|header| header & NAL_TYPE_MASK)
}

/// Returns `true` if the access unit is an IDR keyframe.
///
/// # Example
///
/// ```
/// use media_fanout::format::is_idr_access_unit;
///
/// assert!(is_idr_access_unit(&[0, 0, 0, 1, 0x65, 0x88]));
/// assert!(!is_idr_access_unit(&[0, 0, 0, 1, 0x41, 0x9a]));
/// assert!(!is_idr_access_unit(&[0, 0, 0]));
/// ```
pub fn is_idr_access_unit(payload: &[u8]) -> bool {
    nal_unit_type(payload) == Some(IDR_NAL_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idr_with_long_start_code() {
        assert!(is_idr_access_unit(&[0x00, 0x00, 0x00, 0x01, 0x65, 0xb8]));
    }

    #[test]
    fn test_non_idr_slice() {
        // nal_ref_idc=2, type=1 (non-IDR slice)
        assert!(!is_idr_access_unit(&[0x00, 0x00, 0x00, 0x01, 0x41, 0x9a]));
    }

    #[test]
    fn test_only_low_five_bits_matter() {
        // nal_ref_idc bits differ, type still 5
        assert!(is_idr_access_unit(&[0, 0, 0, 1, 0x25]));
        assert!(is_idr_access_unit(&[0, 0, 0, 1, 0x05]));
    }

    #[test]
    fn test_short_start_code() {
        assert_eq!(nal_unit_type(&[0x00, 0x00, 0x01, 0x65, 0x41]), Some(5));
        assert!(is_idr_access_unit(&[0x00, 0x00, 0x01, 0x65]));
    }

    #[test]
    fn test_no_start_code_reads_index_four() {
        assert_eq!(nal_unit_type(&[9, 9, 9, 9, 0x65]), Some(5));
    }

    #[test]
    fn test_truncated_payloads() {
        assert_eq!(nal_unit_type(&[]), None);
        assert_eq!(nal_unit_type(&[0, 0, 0, 1]), None);
        assert_eq!(nal_unit_type(&[0, 0, 1]), None);
        assert!(!is_idr_access_unit(&[0, 0, 0, 1]));
    }

    #[test]
    fn test_sps_is_not_keyframe() {
        assert_eq!(nal_unit_type(&[0, 0, 0, 1, 0x67, 0x42]), Some(7));
        assert!(!is_idr_access_unit(&[0, 0, 0, 1, 0x67, 0x42]));
    }
}
