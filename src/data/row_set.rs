//! The rows a read covers.

use crate::proto::data::{self, row_range};
use std::ops::Bound;

/// A contiguous range of row keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRange {
    start: Bound<Vec<u8>>,
    end: Bound<Vec<u8>>,
}

/// The smallest key greater than every key starting with `prefix`, or `None` if there is none.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

impl RowRange {
    /// `[begin, end)`. An empty `end` is unbounded.
    #[must_use]
    pub fn new(begin: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        let end = end.into();
        Self {
            start: Bound::Included(begin.into()),
            end: if end.is_empty() {
                Bound::Unbounded
            } else {
                Bound::Excluded(end)
            },
        }
    }

    /// `[begin, end]`.
    #[must_use]
    pub fn closed(begin: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            start: Bound::Included(begin.into()),
            end: Bound::Included(end.into()),
        }
    }

    /// `(begin, end)`.
    #[must_use]
    pub fn open(begin: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            start: Bound::Excluded(begin.into()),
            end: Bound::Excluded(end.into()),
        }
    }

    /// Every key starting with `prefix`.
    #[must_use]
    pub fn prefix(prefix: impl Into<Vec<u8>>) -> Self {
        let prefix = prefix.into();
        let end = prefix_successor(&prefix).map_or(Bound::Unbounded, Bound::Excluded);
        Self {
            start: Bound::Included(prefix),
            end,
        }
    }

    /// `[begin, ∞)`.
    #[must_use]
    pub fn infinite(begin: impl Into<Vec<u8>>) -> Self {
        Self {
            start: Bound::Included(begin.into()),
            end: Bound::Unbounded,
        }
    }

    /// Every key.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// The lower bound.
    #[must_use]
    pub const fn start(&self) -> &Bound<Vec<u8>> {
        &self.start
    }

    /// The upper bound.
    #[must_use]
    pub const fn end(&self) -> &Bound<Vec<u8>> {
        &self.end
    }

    /// Whether `key` falls inside the range.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        let after_start = match &self.start {
            Bound::Included(start) => key >= start.as_slice(),
            Bound::Excluded(start) => key > start.as_slice(),
            Bound::Unbounded => true,
        };
        let before_end = match &self.end {
            Bound::Included(end) => key <= end.as_slice(),
            Bound::Excluded(end) => key < end.as_slice(),
            Bound::Unbounded => true,
        };
        after_start && before_end
    }

    /// Whether the range can contain any key.
    #[must_use]
    pub fn valid(&self) -> bool {
        match (&self.start, &self.end) {
            (_, Bound::Unbounded) => true,
            (Bound::Unbounded, Bound::Included(_)) => true,
            (Bound::Unbounded, Bound::Excluded(end)) => !end.is_empty(),
            (Bound::Included(start), Bound::Included(end)) => start <= end,
            (Bound::Included(start) | Bound::Excluded(start), Bound::Excluded(end))
            | (Bound::Excluded(start), Bound::Included(end)) => start < end,
        }
    }

    /// Narrow the range to the keys not yet read, given the last key read.
    fn retain_after(&mut self, last_key: &[u8], reversed: bool) {
        if reversed {
            if !matches!(&self.end, Bound::Included(end) | Bound::Excluded(end) if end.as_slice() < last_key)
            {
                self.end = Bound::Excluded(last_key.to_vec());
            }
        } else if !matches!(&self.start, Bound::Included(start) | Bound::Excluded(start) if start.as_slice() > last_key)
        {
            self.start = Bound::Excluded(last_key.to_vec());
        }
    }

    pub(crate) fn to_proto(&self) -> data::RowRange {
        data::RowRange {
            start_key: match &self.start {
                Bound::Included(key) => Some(row_range::StartKey::StartKeyClosed(key.clone())),
                Bound::Excluded(key) => Some(row_range::StartKey::StartKeyOpen(key.clone())),
                Bound::Unbounded => None,
            },
            end_key: match &self.end {
                Bound::Included(key) => Some(row_range::EndKey::EndKeyClosed(key.clone())),
                Bound::Excluded(key) => Some(row_range::EndKey::EndKeyOpen(key.clone())),
                Bound::Unbounded => None,
            },
        }
    }
}

/// The rows covered by a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSet {
    /// Individual keys.
    RowList(Vec<Vec<u8>>),
    /// One range.
    RowRange(RowRange),
    /// Several ranges.
    RowRangeList(Vec<RowRange>),
    /// Every row.
    All,
}

impl From<RowRange> for RowSet {
    fn from(range: RowRange) -> Self {
        Self::RowRange(range)
    }
}

impl RowSet {
    /// Every row of the table.
    #[must_use]
    pub const fn all() -> Self {
        Self::All
    }

    /// A set of individual keys.
    #[must_use]
    pub fn keys<K: Into<Vec<u8>>>(keys: impl IntoIterator<Item = K>) -> Self {
        Self::RowList(keys.into_iter().map(Into::into).collect())
    }

    /// Whether the set can contain any row.
    #[must_use]
    pub fn valid(&self) -> bool {
        match self {
            Self::RowList(keys) => !keys.is_empty(),
            Self::RowRange(range) => range.valid(),
            Self::RowRangeList(ranges) => ranges.iter().any(RowRange::valid),
            Self::All => true,
        }
    }

    /// The rows still to be read after `last_key`, for a read that stopped early.
    #[must_use]
    pub fn retain_rows_after(&self, last_key: &[u8], reversed: bool) -> Self {
        match self {
            Self::RowList(keys) => Self::RowList(
                keys.iter()
                    .filter(|key| {
                        if reversed {
                            key.as_slice() < last_key
                        } else {
                            key.as_slice() > last_key
                        }
                    })
                    .cloned()
                    .collect(),
            ),
            Self::RowRange(range) => {
                let mut range = range.clone();
                range.retain_after(last_key, reversed);
                Self::RowRange(range)
            }
            Self::RowRangeList(ranges) => Self::RowRangeList(
                ranges
                    .iter()
                    .cloned()
                    .map(|mut range| {
                        range.retain_after(last_key, reversed);
                        range
                    })
                    .filter(RowRange::valid)
                    .collect(),
            ),
            Self::All => RowRange::all().into_set_after(last_key, reversed),
        }
    }

    pub(crate) fn to_proto(&self) -> data::RowSet {
        match self {
            Self::RowList(keys) => data::RowSet {
                row_keys: keys.clone(),
                row_ranges: Vec::new(),
            },
            Self::RowRange(range) => data::RowSet {
                row_keys: Vec::new(),
                row_ranges: vec![range.to_proto()],
            },
            Self::RowRangeList(ranges) => data::RowSet {
                row_keys: Vec::new(),
                row_ranges: ranges.iter().map(RowRange::to_proto).collect(),
            },
            Self::All => data::RowSet {
                row_keys: Vec::new(),
                row_ranges: vec![RowRange::all().to_proto()],
            },
        }
    }
}

impl RowRange {
    fn into_set_after(mut self, last_key: &[u8], reversed: bool) -> RowSet {
        self.retain_after(last_key, reversed);
        RowSet::RowRange(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_prefix_range() {
        let range = RowRange::prefix("ab");
        assert!(range.contains(b"ab"));
        assert!(range.contains(b"ab\xff\xff"));
        assert!(!range.contains(b"ac"));
        assert_eq!(RowRange::prefix(b"a\xff".to_vec()).end(), &Bound::Excluded(b"b".to_vec()));
        assert_eq!(RowRange::prefix(b"\xff".to_vec()).end(), &Bound::Unbounded);
    }

    #[test]
    fn test_retain_row_list() {
        let set = RowSet::keys(["a", "b", "c"]);
        assert_eq!(set.retain_rows_after(b"b", false), RowSet::keys(["c"]));
        assert_eq!(set.retain_rows_after(b"b", true), RowSet::keys(["a"]));
        assert!(!set.retain_rows_after(b"c", false).valid());
    }

    #[test]
    fn test_retain_range() {
        let set = RowSet::from(RowRange::new("a", "d"));
        let rest = set.retain_rows_after(b"b", false);
        assert_eq!(rest, RowSet::from(RowRange::open("b", "d")));

        let rest = set.retain_rows_after(b"b", true);
        let RowSet::RowRange(range) = rest else {
            panic!("expected a range");
        };
        assert_eq!(range.start(), &Bound::Included(b"a".to_vec()));
        assert_eq!(range.end(), &Bound::Excluded(b"b".to_vec()));

        let done = RowSet::from(RowRange::closed("a", "c")).retain_rows_after(b"c", false);
        assert!(!done.valid());
    }

    #[test]
    fn test_retain_range_list_drops_exhausted_ranges() {
        let set = RowSet::RowRangeList(vec![RowRange::new("a", "c"), RowRange::new("x", "z")]);
        let RowSet::RowRangeList(ranges) = set.retain_rows_after(b"y", false) else {
            panic!("expected a range list");
        };
        assert_eq!(ranges, [RowRange::open("y", "z")]);
    }

    #[test]
    fn test_all_after() {
        let rest = RowSet::all().retain_rows_after(b"m", false);
        assert_eq!(
            rest,
            RowSet::RowRange(RowRange {
                start: Bound::Excluded(b"m".to_vec()),
                end: Bound::Unbounded
            })
        );
        assert!(rest.valid());
    }
}
