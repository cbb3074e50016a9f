//! Fractional list positions.
//!
//! List children are ordered by an opaque position string; inserting between
//! two siblings means minting a string that sorts lexicographically between
//! their positions. Digits are drawn from the printable ASCII range
//! `'!'..='~'` (94 symbols), interpreted as a base-94 fraction. A minted
//! position never ends with the minimum digit, so every position has room
//! below it.

const MIN_DIGIT: u8 = b'!';
const MAX_DIGIT: u8 = b'~';

/// First position in an empty list.
pub fn first() -> String {
    between_bytes(&[], &[])
}

/// A position sorting after `lo` (append).
pub fn after(lo: &str) -> String {
    between_bytes(lo.as_bytes(), &[])
}

/// A position sorting before `hi` (prepend).
pub fn before(hi: &str) -> String {
    between_bytes(&[], hi.as_bytes())
}

/// A position strictly between `lo` and `hi`.
///
/// Callers must order the bounds; equal (or inverted) bounds have no room in
/// between and yield a position sorting after `lo`, which keeps inserts total
/// at the cost of a duplicate the caller resolves.
pub fn between(lo: &str, hi: &str) -> String {
    between_bytes(lo.as_bytes(), hi.as_bytes())
}

fn between_bytes(lo: &[u8], hi: &[u8]) -> String {
    let mut out: Vec<u8> = Vec::new();
    // While the upper bound is binding, digits are constrained by `hi`; once a
    // digit strictly below the corresponding `hi` digit is emitted, every
    // extension already sorts below `hi` and the bound opens to +infinity.
    let mut bounded = !hi.is_empty();
    let mut index = 0usize;
    loop {
        // Out-of-alphabet bytes (possible in positions minted elsewhere) are
        // clamped so the output always stays printable ASCII.
        let low = lo
            .get(index)
            .copied()
            .unwrap_or(MIN_DIGIT)
            .clamp(MIN_DIGIT, MAX_DIGIT);
        let high = match hi.get(index) {
            Some(&d) if bounded => d.clamp(MIN_DIGIT, MAX_DIGIT),
            // An exhausted upper bound means `hi <= lo`; fall back to
            // appending after `lo`.
            _ => {
                bounded = false;
                MAX_DIGIT + 1
            }
        };

        if high > low + 1 {
            out.push(low + (high - low) / 2);
            return String::from_utf8(out).unwrap();
        }

        // No gap at this digit: emit the low digit and descend one level.
        out.push(low);
        if high == low + 1 {
            bounded = false;
        }
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_is_a_single_digit() {
        assert_eq!(first().len(), 1);
    }

    #[test]
    fn after_sorts_after() {
        let a = first();
        let b = after(&a);
        let c = after(&b);
        assert!(a < b && b < c);
    }

    #[test]
    fn before_sorts_before() {
        let a = first();
        let b = before(&a);
        let c = before(&b);
        assert!(c < b && b < a);
    }

    #[test]
    fn between_adjacent_digits_descends() {
        let mid = between("O", "P");
        assert!(mid.as_str() > "O" && mid.as_str() < "P");
        assert!(mid.len() > 1);
    }

    #[test]
    fn between_equal_bounds_appends() {
        let p = between("P", "P");
        assert!(p.as_str() > "P");
    }

    #[test]
    fn minted_positions_never_end_with_min_digit() {
        let mut lo = first();
        for _ in 0..40 {
            let hi = after(&lo);
            let next = between(&lo, &hi);
            assert_ne!(next.as_bytes().last(), Some(&MIN_DIGIT));
            lo = next;
        }
    }

    proptest! {
        #[test]
        fn between_orders_lexicographically(steps in prop::collection::vec(any::<bool>(), 1..60)) {
            // Random walk: repeatedly split either the lower or upper half.
            let mut lo = first();
            let mut hi = after(&lo);
            for go_low in steps {
                let mid = between(&lo, &hi);
                prop_assert!(mid > lo, "{mid:?} !> {lo:?}");
                prop_assert!(mid < hi, "{mid:?} !< {hi:?}");
                if go_low { hi = mid } else { lo = mid }
            }
        }
    }
}
