//! Sequence sets and UID sets for message ranges.
//!
//! UID sets sent to the server are always in minimal ascending-range form
//! (`3:7,9,11:13`), never descending or comma-dense.

use super::{SeqNum, Uid};

/// Sequence set for specifying message ranges by sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceSet {
    /// Single sequence number.
    Single(SeqNum),
    /// Range of sequence numbers (inclusive).
    Range(SeqNum, SeqNum),
    /// Range from start to end of mailbox.
    RangeFrom(SeqNum),
    /// All messages (`*`).
    All,
    /// Multiple sequence specifications.
    Set(Vec<Self>),
}

impl SequenceSet {
    /// Creates a sequence set from a single number.
    #[must_use]
    pub fn single(n: u32) -> Option<Self> {
        SeqNum::new(n).map(Self::Single)
    }

    /// Creates a range sequence set.
    #[must_use]
    pub fn range(start: u32, end: u32) -> Option<Self> {
        Some(Self::Range(SeqNum::new(start)?, SeqNum::new(end)?))
    }

    /// Converts a UID set into the set expression used by UID commands.
    ///
    /// The result preserves the minimal ascending-range form.
    #[must_use]
    pub fn from_uid_set(set: &UidSet) -> Self {
        let mut items: Vec<Self> = Vec::with_capacity(set.ranges.len());
        for &(lo, hi) in &set.ranges {
            let item = if lo == hi {
                Self::single(lo)
            } else {
                Self::range(lo, hi)
            };
            if let Some(item) = item {
                items.push(item);
            }
        }
        if items.len() == 1 {
            items.remove(0)
        } else {
            Self::Set(items)
        }
    }
}

impl std::fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(n) => write!(f, "{n}"),
            Self::Range(start, end) => write!(f, "{start}:{end}"),
            Self::RangeFrom(start) => write!(f, "{start}:*"),
            Self::All => write!(f, "*"),
            Self::Set(items) => {
                let s: Vec<_> = items.iter().map(ToString::to_string).collect();
                write!(f, "{}", s.join(","))
            }
        }
    }
}

/// A set of UIDs held as sorted, coalesced inclusive ranges.
///
/// Construction always normalizes: duplicates collapse, adjacent and
/// overlapping ranges merge, and output order is strictly ascending, which
/// is the minimal wire form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UidSet {
    ranges: Vec<(u32, u32)>,
}

impl UidSet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Builds a set from arbitrary UIDs, compressing into minimal
    /// ascending ranges. Zero values (absent UIDs) are dropped.
    #[must_use]
    pub fn from_uids(mut uids: Vec<u32>) -> Self {
        uids.retain(|&u| u != 0);
        uids.sort_unstable();
        uids.dedup();

        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for uid in uids {
            match ranges.last_mut() {
                Some((_, end)) if *end + 1 == uid => *end = uid,
                _ => ranges.push((uid, uid)),
            }
        }
        Self { ranges }
    }

    /// Builds a single inclusive range.
    #[must_use]
    pub fn range(start: Uid, end: Uid) -> Self {
        let (lo, hi) = if start <= end {
            (start.get(), end.get())
        } else {
            (end.get(), start.get())
        };
        Self {
            ranges: vec![(lo, hi)],
        }
    }

    /// Builds a set holding one UID.
    #[must_use]
    pub fn single(uid: Uid) -> Self {
        Self {
            ranges: vec![(uid.get(), uid.get())],
        }
    }

    /// Parses a wire-form set like `91:93,95`. Returns `None` on syntax
    /// errors or zero UIDs.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let mut uids = Vec::new();
        for part in s.split(',') {
            if let Some((lo, hi)) = part.split_once(':') {
                let lo: u32 = lo.parse().ok()?;
                let hi: u32 = hi.parse().ok()?;
                if lo == 0 || hi == 0 {
                    return None;
                }
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                // Guard absurd ranges before materializing them.
                if u64::from(hi) - u64::from(lo) > 1_000_000 {
                    return None;
                }
                uids.extend(lo..=hi);
            } else {
                let uid: u32 = part.parse().ok()?;
                if uid == 0 {
                    return None;
                }
                uids.push(uid);
            }
        }
        Some(Self::from_uids(uids))
    }

    /// Number of UIDs in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges
            .iter()
            .map(|&(lo, hi)| (hi - lo) as usize + 1)
            .sum()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns true if the UID is in the set.
    #[must_use]
    pub fn contains(&self, uid: u32) -> bool {
        self.ranges.iter().any(|&(lo, hi)| lo <= uid && uid <= hi)
    }

    /// Iterates over every UID in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ranges.iter().flat_map(|&(lo, hi)| lo..=hi)
    }

    /// Highest UID in the set, if any.
    #[must_use]
    pub fn highest(&self) -> Option<u32> {
        self.ranges.last().map(|&(_, hi)| hi)
    }
}

impl std::fmt::Display for UidSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for &(lo, hi) in &self.ranges {
            if !first {
                write!(f, ",")?;
            }
            if lo == hi {
                write!(f, "{lo}")?;
            } else {
                write!(f, "{lo}:{hi}")?;
            }
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sequence_display() {
        assert_eq!(SequenceSet::range(1, 10).unwrap().to_string(), "1:10");
        assert_eq!(SequenceSet::All.to_string(), "*");
        let set = SequenceSet::Set(vec![
            SequenceSet::single(1).unwrap(),
            SequenceSet::range(5, 10).unwrap(),
        ]);
        assert_eq!(set.to_string(), "1,5:10");
    }

    #[test]
    fn compresses_to_minimal_ranges() {
        let set = UidSet::from_uids(vec![3, 4, 5, 6, 7, 9, 11, 12, 13]);
        assert_eq!(set.to_string(), "3:7,9,11:13");
    }

    #[test]
    fn descending_and_duplicate_input_normalizes() {
        let set = UidSet::from_uids(vec![9, 7, 3, 4, 4, 5, 6, 7]);
        assert_eq!(set.to_string(), "3:7,9");
    }

    #[test]
    fn zero_uids_dropped() {
        let set = UidSet::from_uids(vec![0, 1, 2]);
        assert_eq!(set.to_string(), "1:2");
    }

    #[test]
    fn ascending_invariant_holds() {
        let set = UidSet::from_uids(vec![100, 1, 50, 51, 2]);
        let mut prev_hi = 0u32;
        for &(lo, hi) in &set.ranges {
            assert!(lo > prev_hi, "range {lo}:{hi} not strictly after {prev_hi}");
            assert!(lo <= hi);
            prev_hi = hi;
        }
    }

    #[test]
    fn parse_roundtrip() {
        let set = UidSet::parse("91:93,95").unwrap();
        assert_eq!(set.len(), 4);
        assert_eq!(set.to_string(), "91:93,95");
        assert!(set.contains(92));
        assert!(!set.contains(94));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(UidSet::parse("1:x").is_none());
        assert!(UidSet::parse("0").is_none());
        assert!(UidSet::parse("").is_none());
    }

    #[test]
    fn iter_ascending() {
        let set = UidSet::parse("4,7,9").unwrap();
        let uids: Vec<u32> = set.iter().collect();
        assert_eq!(uids, vec![4, 7, 9]);
        assert_eq!(set.highest(), Some(9));
    }
}
