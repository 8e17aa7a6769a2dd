//! Canonical byte encoding for index keys.
//!
//! Composite indexes concatenate field encodings with a separator that
//! cannot occur in an encoded field (record IDs and status tags are plain
//! identifiers, never raw NUL bytes). Prefix indexes reuse the same encoder
//! but accept a short key and rely on [`prefix_upper_bound`] -- an
//! increment-last-non-0xff-byte trick -- to turn a prefix into a half-open
//! byte range.

use std::ops::Bound;

/// Separator byte joining fields of a composite index key. Chosen as NUL
/// since every field we index on (record IDs, status tags) is a plain
/// identifier string that cannot itself contain one.
const SEPARATOR: u8 = 0x00;

/// Encodes a single field as index-key bytes.
pub fn encode_key(field: &str) -> Vec<u8> {
    field.as_bytes().to_vec()
}

/// Encodes a composite key by joining each field's bytes with [`SEPARATOR`].
pub fn encode_composite(fields: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.extend_from_slice(field.as_bytes());
    }
    out
}

/// Computes the exclusive upper bound for a byte-prefix scan: the smallest
/// key that is *not* prefixed by `prefix`. Returns `Bound::Unbounded` if the
/// prefix is all `0xff` bytes (or empty of any incrementable byte), since no
/// finite successor exists.
pub fn prefix_upper_bound(prefix: &[u8]) -> Bound<Vec<u8>> {
    match prefix.iter().rposition(|b| *b != 0xff) {
        Some(i) => {
            let mut upper: Vec<u8> = prefix[..i].to_vec();
            upper.push(prefix[i] + 1);
            Bound::Excluded(upper)
        }
        None => Bound::Unbounded,
    }
}

/// The half-open `[prefix, prefix's upper bound)` range used by every
/// `*_prefix` secondary index lookup.
pub fn prefix_range(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    (Bound::Included(prefix.to_vec()), prefix_upper_bound(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_round_trips_distinct_fields() {
        let a = encode_composite(&["job-1", "pending"]);
        let b = encode_composite(&["job-1x", "pending"]);
        assert_ne!(a, b);
    }

    #[test]
    fn prefix_upper_bound_increments_last_non_ff_byte() {
        assert_eq!(
            prefix_upper_bound(b"ab"),
            Bound::Excluded(b"ac".to_vec()),
        );
        assert_eq!(
            prefix_upper_bound(b"a\xff"),
            Bound::Excluded(b"b".to_vec()),
        );
        assert_eq!(prefix_upper_bound(b"\xff\xff"), Bound::Unbounded);
    }

    #[test]
    fn prefix_range_is_half_open() {
        let (lo, hi) = prefix_range(b"job-1");
        assert_eq!(lo, Bound::Included(b"job-1".to_vec()));
        assert_eq!(hi, Bound::Excluded(b"job-2".to_vec()));
    }
}
