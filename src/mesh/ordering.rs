#![forbid(unsafe_code)]

// Id ordering - decides which side of a pair sends the offer

use std::cmp::Ordering;

/// Total order over participant ids.
///
/// Numeric ids compare by value and sort before everything else; ties
/// between spellings (`"7"` vs `"07"`) and non-numeric pairs use byte order.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// True if `local` must create the connection and send the offer to `remote`.
pub fn initiates(local: &str, remote: &str) -> bool {
    compare_ids(local, remote) == Ordering::Less
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ids_compare_by_value() {
        assert!(initiates("10", "77"));
        assert!(!initiates("77", "10"));
        assert!(initiates("5", "10"));
        assert!(!initiates("10", "5"));
    }

    #[test]
    fn test_exactly_one_side_initiates() {
        let ids = ["5", "10", "77", "07", "7", "alice", "bob", "Bob", "neo_the_one", ""];
        for a in ids {
            for b in ids {
                if a == b {
                    assert!(!initiates(a, b));
                    continue;
                }
                assert!(initiates(a, b) ^ initiates(b, a), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_numeric_ids_sort_before_names() {
        assert!(initiates("9", "10"));
        assert!(initiates("10", "1a"));
        assert!(initiates("9", "1a"));
        assert!(initiates("999", "a"));
    }

    #[test]
    fn test_textual_ids_use_byte_order() {
        assert!(initiates("alice", "bob"));
        assert!(initiates("Bob", "alice"));
        assert!(initiates("10", "alice"));
        assert!(initiates("07", "7"));
    }

    #[test]
    fn test_ordering_is_transitive() {
        let mut ids = vec!["77", "alice", "5", "10", "007", "7", "bob"];
        ids.sort_by(|a, b| compare_ids(a, b));
        assert_eq!(ids, vec!["5", "007", "7", "10", "77", "alice", "bob"]);
    }
}
