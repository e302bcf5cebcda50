//! Row filters.
//!
//! A [`Filter`] selects and transforms the cells returned by a read, or decides which branch of a
//! conditional mutation runs. Filters compose: [`Filter::Chain`] feeds the output of each filter
//! into the next, [`Filter::Interleave`] merges the output of filters that each see the full
//! input, and [`Filter::Condition`] picks one of two filters depending on whether a predicate
//! emits anything for the row.

use crate::proto::data::{column_range, row_filter, value_range, ColumnRange, RowFilter, ValueRange};
use std::fmt;

/// A filter over the cells of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Apply each filter to the output of the previous one.
    Chain(Vec<Filter>),
    /// Apply every filter to the input and merge the results.
    Interleave(Vec<Filter>),
    /// Apply `on_true` if `predicate` emits any cell for the row, `on_false` otherwise. A missing
    /// branch emits nothing.
    Condition {
        /// Decides which branch runs.
        predicate: Box<Filter>,
        /// Applied when the predicate matched.
        on_true: Option<Box<Filter>>,
        /// Applied when it did not.
        on_false: Option<Box<Filter>>,
    },
    /// Rows whose key matches the regular expression.
    RowKeyRegex(Vec<u8>),
    /// Each row with the given probability.
    RowSample(f64),
    /// Cells whose family matches the regular expression.
    FamilyRegex(String),
    /// Cells whose qualifier matches the regular expression.
    ColumnRegex(Vec<u8>),
    /// Cells of `family` with a qualifier in `[start, end)`. An empty bound is unbounded.
    ColumnRange {
        /// The family holding the columns.
        family: String,
        /// The first qualifier included.
        start: Vec<u8>,
        /// The first qualifier excluded.
        end: Vec<u8>,
    },
    /// Cells whose value matches the regular expression.
    ValueRegex(Vec<u8>),
    /// Cells with a value in `[start, end)`. An empty bound is unbounded.
    ValueRange {
        /// The smallest value included.
        start: Vec<u8>,
        /// The first value excluded.
        end: Vec<u8>,
    },
    /// Cells with a timestamp in `[start, end)`, in microseconds. An `end` of zero is unbounded.
    TimestampRange {
        /// The oldest timestamp included.
        start: i64,
        /// The first timestamp excluded.
        end: i64,
    },
    /// Skip the first cells of each row.
    CellsPerRowOffset(i32),
    /// Keep only the first cells of each row.
    CellsPerRowLimit(i32),
    /// Keep only the newest cells of each column.
    LatestN(i32),
    /// Replace every value with the empty string.
    StripValue,
    /// Attach a label to every cell.
    Label(String),
    /// Every cell.
    PassAll,
    /// No cell.
    BlockAll,
}

/// Apply each filter in order to the output of the previous one.
#[must_use]
pub fn chain_filters(filters: impl IntoIterator<Item = Filter>) -> Filter {
    Filter::Chain(filters.into_iter().collect())
}

/// Apply every filter to the row and merge the results.
#[must_use]
pub fn interleave_filters(filters: impl IntoIterator<Item = Filter>) -> Filter {
    Filter::Interleave(filters.into_iter().collect())
}

/// Pick a filter depending on whether `predicate` matches the row.
#[must_use]
pub fn condition_filter(
    predicate: Filter,
    on_true: Option<Filter>,
    on_false: Option<Filter>,
) -> Filter {
    Filter::Condition {
        predicate: Box::new(predicate),
        on_true: on_true.map(Box::new),
        on_false: on_false.map(Box::new),
    }
}

/// Match row keys against a regular expression.
#[must_use]
pub fn row_key_filter(pattern: impl Into<Vec<u8>>) -> Filter {
    Filter::RowKeyRegex(pattern.into())
}

/// Keep each row with probability `p`, which must be in `(0, 1)`.
#[must_use]
pub const fn row_sample_filter(p: f64) -> Filter {
    Filter::RowSample(p)
}

/// Match family names against a regular expression.
#[must_use]
pub fn family_filter(pattern: impl Into<String>) -> Filter {
    Filter::FamilyRegex(pattern.into())
}

/// Match column qualifiers against a regular expression.
#[must_use]
pub fn column_filter(pattern: impl Into<Vec<u8>>) -> Filter {
    Filter::ColumnRegex(pattern.into())
}

/// Match the columns of `family` in `[start, end)`.
#[must_use]
pub fn column_range_filter(
    family: impl Into<String>,
    start: impl Into<Vec<u8>>,
    end: impl Into<Vec<u8>>,
) -> Filter {
    Filter::ColumnRange {
        family: family.into(),
        start: start.into(),
        end: end.into(),
    }
}

/// Match cell values against a regular expression.
#[must_use]
pub fn value_filter(pattern: impl Into<Vec<u8>>) -> Filter {
    Filter::ValueRegex(pattern.into())
}

/// Match cell values in `[start, end)`.
#[must_use]
pub fn value_range_filter(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Filter {
    Filter::ValueRange {
        start: start.into(),
        end: end.into(),
    }
}

/// Match cell timestamps in `[start, end)` microseconds.
#[must_use]
pub const fn timestamp_range_filter(start: i64, end: i64) -> Filter {
    Filter::TimestampRange { start, end }
}

/// Skip the first `n` cells of each row.
#[must_use]
pub const fn cells_per_row_offset_filter(n: i32) -> Filter {
    Filter::CellsPerRowOffset(n)
}

/// Keep the first `n` cells of each row.
#[must_use]
pub const fn cells_per_row_limit_filter(n: i32) -> Filter {
    Filter::CellsPerRowLimit(n)
}

/// Keep the newest `n` cells of each column.
#[must_use]
pub const fn latest_n_filter(n: i32) -> Filter {
    Filter::LatestN(n)
}

/// Empty every value.
#[must_use]
pub const fn strip_value_filter() -> Filter {
    Filter::StripValue
}

/// Label every cell.
#[must_use]
pub fn label_filter(label: impl Into<String>) -> Filter {
    Filter::Label(label.into())
}

/// Every cell.
#[must_use]
pub const fn pass_all_filter() -> Filter {
    Filter::PassAll
}

/// No cell.
#[must_use]
pub const fn block_all_filter() -> Filter {
    Filter::BlockAll
}

impl Filter {
    /// The wire form of the filter.
    #[must_use]
    pub fn to_proto(&self) -> RowFilter {
        use row_filter::Filter as F;

        let filter = match self {
            Self::Chain(filters) => F::Chain(row_filter::Chain {
                filters: filters.iter().map(Self::to_proto).collect(),
            }),
            Self::Interleave(filters) => F::Interleave(row_filter::Interleave {
                filters: filters.iter().map(Self::to_proto).collect(),
            }),
            Self::Condition {
                predicate,
                on_true,
                on_false,
            } => F::Condition(
                row_filter::Condition {
                    predicate_filter: Some(predicate.to_proto().into()),
                    true_filter: on_true.as_ref().map(|f| f.to_proto().into()),
                    false_filter: on_false.as_ref().map(|f| f.to_proto().into()),
                }
                .into(),
            ),
            Self::RowKeyRegex(pattern) => F::RowKeyRegexFilter(pattern.clone()),
            Self::RowSample(p) => F::RowSampleFilter(*p),
            Self::FamilyRegex(pattern) => F::FamilyNameRegexFilter(pattern.clone()),
            Self::ColumnRegex(pattern) => F::ColumnQualifierRegexFilter(pattern.clone()),
            Self::ColumnRange { family, start, end } => F::ColumnRangeFilter(ColumnRange {
                family_name: family.clone(),
                start_qualifier: (!start.is_empty())
                    .then(|| column_range::StartQualifier::StartQualifierClosed(start.clone())),
                end_qualifier: (!end.is_empty())
                    .then(|| column_range::EndQualifier::EndQualifierOpen(end.clone())),
            }),
            Self::ValueRegex(pattern) => F::ValueRegexFilter(pattern.clone()),
            Self::ValueRange { start, end } => F::ValueRangeFilter(ValueRange {
                start_value: (!start.is_empty())
                    .then(|| value_range::StartValue::StartValueClosed(start.clone())),
                end_value: (!end.is_empty())
                    .then(|| value_range::EndValue::EndValueOpen(end.clone())),
            }),
            Self::TimestampRange { start, end } => {
                F::TimestampRangeFilter(crate::proto::data::TimestampRange {
                    start_timestamp_micros: *start,
                    end_timestamp_micros: *end,
                })
            }
            Self::CellsPerRowOffset(n) => F::CellsPerRowOffsetFilter(*n),
            Self::CellsPerRowLimit(n) => F::CellsPerRowLimitFilter(*n),
            Self::LatestN(n) => F::CellsPerColumnLimitFilter(*n),
            Self::StripValue => F::StripValueTransformer(true),
            Self::Label(label) => F::ApplyLabelTransformer(label.clone()),
            Self::PassAll => F::PassAllFilter(true),
            Self::BlockAll => F::BlockAllFilter(true),
        };
        RowFilter {
            filter: Some(filter),
        }
    }
}

/// Renders bytes as a quoted string, escaping anything that is not printable.
struct Quoted<'a>(&'a [u8]);

impl fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.0))
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, filters: &[Filter], separator: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{filter}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chain(filters) => write_list(f, filters, " -> "),
            Self::Interleave(filters) => write_list(f, filters, " | "),
            Self::Condition {
                predicate,
                on_true,
                on_false,
            } => {
                write!(f, "({predicate} ? ")?;
                match on_true {
                    Some(filter) => write!(f, "{filter}")?,
                    None => f.write_str("block_all()")?,
                }
                f.write_str(" : ")?;
                match on_false {
                    Some(filter) => write!(f, "{filter})"),
                    None => f.write_str("block_all())"),
                }
            }
            Self::RowKeyRegex(pattern) => write!(f, "row({})", Quoted(pattern)),
            Self::RowSample(p) => write!(f, "sample({p})"),
            Self::FamilyRegex(pattern) => write!(f, "family({pattern:?})"),
            Self::ColumnRegex(pattern) => write!(f, "col({})", Quoted(pattern)),
            Self::ColumnRange { family, start, end } => write!(
                f,
                "col_range({family:?}, {}, {})",
                Quoted(start),
                Quoted(end)
            ),
            Self::ValueRegex(pattern) => write!(f, "val({})", Quoted(pattern)),
            Self::ValueRange { start, end } => {
                write!(f, "val_range({}, {})", Quoted(start), Quoted(end))
            }
            Self::TimestampRange { start, end } => write!(f, "ts_range({start}, {end})"),
            Self::CellsPerRowOffset(n) => write!(f, "offset({n})"),
            Self::CellsPerRowLimit(n) => write!(f, "limit({n})"),
            Self::LatestN(n) => write!(f, "latest({n})"),
            Self::StripValue => f.write_str("strip_value()"),
            Self::Label(label) => write!(f, "label({label:?})"),
            Self::PassAll => f.write_str("pass_all()"),
            Self::BlockAll => f.write_str("block_all()"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display() {
        let filter = interleave_filters([column_filter("a"), value_filter("b")]);
        assert_eq!(filter.to_string(), r#"(col("a") | val("b"))"#);

        let filter = chain_filters([latest_n_filter(1), strip_value_filter()]);
        assert_eq!(filter.to_string(), "(latest(1) -> strip_value())");

        let filter = condition_filter(family_filter("f"), Some(pass_all_filter()), None);
        assert_eq!(filter.to_string(), r#"(family("f") ? pass_all() : block_all())"#);
    }

    #[test]
    fn test_condition_to_proto() {
        let proto = condition_filter(
            row_key_filter("r.*"),
            Some(label_filter("yes")),
            Some(label_filter("no")),
        )
        .to_proto();
        let Some(row_filter::Filter::Condition(condition)) = proto.filter else {
            panic!("expected a condition");
        };
        assert_eq!(
            condition.predicate_filter.as_ref().and_then(|p| p.filter.clone()),
            Some(row_filter::Filter::RowKeyRegexFilter(b"r.*".to_vec()))
        );
        assert_eq!(
            condition.false_filter.as_ref().and_then(|p| p.filter.clone()),
            Some(row_filter::Filter::ApplyLabelTransformer("no".to_owned()))
        );
    }

    #[test]
    fn test_ranges_leave_empty_bounds_open() {
        let proto = column_range_filter("f", "", "z").to_proto();
        let Some(row_filter::Filter::ColumnRangeFilter(range)) = proto.filter else {
            panic!("expected a column range");
        };
        assert_eq!(range.start_qualifier, None);
        assert_eq!(
            range.end_qualifier,
            Some(column_range::EndQualifier::EndQualifierOpen(b"z".to_vec()))
        );
    }
}
