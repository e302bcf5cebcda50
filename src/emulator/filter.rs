//! Evaluation of row filters against stored rows.

use super::RowData;
use crate::proto::data::{
    column_range, row_filter, value_range, ColumnRange, RowFilter, TimestampRange, ValueRange,
};
use rand::Rng as _;
use regex::bytes::Regex;
use std::cmp::Reverse;
use std::ops::Bound;
use tonic::Status;

/// One cell of a row as a filter sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct FlatCell {
    pub(super) family: String,
    pub(super) qualifier: Vec<u8>,
    pub(super) timestamp: i64,
    pub(super) value: Vec<u8>,
    pub(super) labels: Vec<String>,
}

/// Every cell of a row, ordered by family, then qualifier, then newest first.
pub(super) fn flatten(row: &RowData) -> Vec<FlatCell> {
    row.iter()
        .flat_map(|(family, columns)| {
            columns.iter().flat_map(move |(qualifier, cells)| {
                cells.iter().map(move |cell| FlatCell {
                    family: family.clone(),
                    qualifier: qualifier.clone(),
                    timestamp: cell.timestamp,
                    value: cell.value.clone(),
                    labels: Vec::new(),
                })
            })
        })
        .collect()
}

/// A regex matching the whole input.
fn full_match(pattern: &[u8]) -> Result<Regex, Status> {
    let pattern = std::str::from_utf8(pattern)
        .map_err(|_| Status::invalid_argument("filter regex is not valid UTF-8"))?;
    Regex::new(&format!("^(?s:{pattern})$"))
        .map_err(|err| Status::invalid_argument(format!("invalid filter regex: {err}")))
}

fn in_range(value: &[u8], start: Bound<&[u8]>, end: Bound<&[u8]>) -> bool {
    let after_start = match start {
        Bound::Included(start) => value >= start,
        Bound::Excluded(start) => value > start,
        Bound::Unbounded => true,
    };
    let before_end = match end {
        Bound::Included(end) => value <= end,
        Bound::Excluded(end) => value < end,
        Bound::Unbounded => true,
    };
    after_start && before_end
}

fn column_bounds(range: &ColumnRange) -> (Bound<&[u8]>, Bound<&[u8]>) {
    let start = match &range.start_qualifier {
        Some(column_range::StartQualifier::StartQualifierClosed(key)) => Bound::Included(&key[..]),
        Some(column_range::StartQualifier::StartQualifierOpen(key)) => Bound::Excluded(&key[..]),
        None => Bound::Unbounded,
    };
    let end = match &range.end_qualifier {
        Some(column_range::EndQualifier::EndQualifierClosed(key)) => Bound::Included(&key[..]),
        Some(column_range::EndQualifier::EndQualifierOpen(key)) => Bound::Excluded(&key[..]),
        None => Bound::Unbounded,
    };
    (start, end)
}

fn value_bounds(range: &ValueRange) -> (Bound<&[u8]>, Bound<&[u8]>) {
    let start = match &range.start_value {
        Some(value_range::StartValue::StartValueClosed(value)) => Bound::Included(&value[..]),
        Some(value_range::StartValue::StartValueOpen(value)) => Bound::Excluded(&value[..]),
        None => Bound::Unbounded,
    };
    let end = match &range.end_value {
        Some(value_range::EndValue::EndValueClosed(value)) => Bound::Included(&value[..]),
        Some(value_range::EndValue::EndValueOpen(value)) => Bound::Excluded(&value[..]),
        None => Bound::Unbounded,
    };
    (start, end)
}

/// Whether `timestamp` lies in `range`. An end of zero is unbounded.
const fn in_time_range(timestamp: i64, range: &TimestampRange) -> bool {
    timestamp >= range.start_timestamp_micros
        && (range.end_timestamp_micros == 0 || timestamp < range.end_timestamp_micros)
}

fn count(n: i32, what: &str) -> Result<usize, Status> {
    usize::try_from(n).map_err(|_| Status::invalid_argument(format!("{what} must not be negative")))
}

/// Apply `filter` to the cells of the row at `key`.
pub(super) fn apply(
    filter: &RowFilter,
    key: &[u8],
    cells: Vec<FlatCell>,
) -> Result<Vec<FlatCell>, Status> {
    use row_filter::Filter;

    let Some(filter) = &filter.filter else {
        return Ok(cells);
    };
    let cells = match filter {
        Filter::Chain(chain) => {
            let mut cells = cells;
            for filter in &chain.filters {
                if cells.is_empty() {
                    break;
                }
                cells = apply(filter, key, cells)?;
            }
            cells
        }
        Filter::Interleave(interleave) => {
            let mut merged = Vec::new();
            for filter in &interleave.filters {
                merged.extend(apply(filter, key, cells.clone())?);
            }
            merged.sort_by(|a, b| {
                (&a.family, &a.qualifier, Reverse(a.timestamp))
                    .cmp(&(&b.family, &b.qualifier, Reverse(b.timestamp)))
            });
            merged
        }
        Filter::Condition(condition) => {
            let predicate = condition
                .predicate_filter
                .as_ref()
                .map(|predicate| apply(predicate, key, cells.clone()))
                .transpose()?
                .unwrap_or_else(|| cells.clone());
            let branch = if predicate.is_empty() {
                condition.false_filter.as_ref()
            } else {
                condition.true_filter.as_ref()
            };
            match branch {
                Some(branch) => apply(branch, key, cells)?,
                None => Vec::new(),
            }
        }
        Filter::Sink(_) => return Err(Status::invalid_argument("sink filters are not supported")),
        Filter::PassAllFilter(_) => cells,
        Filter::BlockAllFilter(_) => Vec::new(),
        Filter::RowKeyRegexFilter(pattern) => {
            if full_match(pattern)?.is_match(key) {
                cells
            } else {
                Vec::new()
            }
        }
        Filter::RowSampleFilter(probability) => {
            if rand::thread_rng().gen_range(0.0..1.0) < *probability {
                cells
            } else {
                Vec::new()
            }
        }
        Filter::FamilyNameRegexFilter(pattern) => {
            let regex = full_match(pattern.as_bytes())?;
            cells
                .into_iter()
                .filter(|cell| regex.is_match(cell.family.as_bytes()))
                .collect()
        }
        Filter::ColumnQualifierRegexFilter(pattern) => {
            let regex = full_match(pattern)?;
            cells
                .into_iter()
                .filter(|cell| regex.is_match(&cell.qualifier))
                .collect()
        }
        Filter::ColumnRangeFilter(range) => {
            let (start, end) = column_bounds(range);
            cells
                .into_iter()
                .filter(|cell| cell.family == range.family_name && in_range(&cell.qualifier, start, end))
                .collect()
        }
        Filter::TimestampRangeFilter(range) => cells
            .into_iter()
            .filter(|cell| in_time_range(cell.timestamp, range))
            .collect(),
        Filter::ValueRegexFilter(pattern) => {
            let regex = full_match(pattern)?;
            cells
                .into_iter()
                .filter(|cell| regex.is_match(&cell.value))
                .collect()
        }
        Filter::ValueRangeFilter(range) => {
            let (start, end) = value_bounds(range);
            cells
                .into_iter()
                .filter(|cell| in_range(&cell.value, start, end))
                .collect()
        }
        Filter::CellsPerRowOffsetFilter(offset) => {
            cells.into_iter().skip(count(*offset, "offset")?).collect()
        }
        Filter::CellsPerRowLimitFilter(limit) => {
            cells.into_iter().take(count(*limit, "limit")?).collect()
        }
        Filter::CellsPerColumnLimitFilter(limit) => {
            let limit = count(*limit, "limit")?;
            let mut kept = Vec::with_capacity(cells.len());
            let mut seen = 0;
            for cell in cells {
                let same_column = kept.last().is_some_and(|last: &FlatCell| {
                    last.family == cell.family && last.qualifier == cell.qualifier
                });
                seen = if same_column { seen + 1 } else { 1 };
                if seen <= limit {
                    kept.push(cell);
                }
            }
            kept
        }
        Filter::StripValueTransformer(_) => cells
            .into_iter()
            .map(|cell| FlatCell {
                value: Vec::new(),
                ..cell
            })
            .collect(),
        Filter::ApplyLabelTransformer(label) => cells
            .into_iter()
            .map(|mut cell| {
                cell.labels.push(label.clone());
                cell
            })
            .collect(),
    };
    Ok(cells)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::proto::data::row_filter::{Chain, Condition, Filter, Interleave};

    fn cell(family: &str, qualifier: &str, timestamp: i64, value: &str) -> FlatCell {
        FlatCell {
            family: family.to_owned(),
            qualifier: qualifier.as_bytes().to_vec(),
            timestamp,
            value: value.as_bytes().to_vec(),
            labels: Vec::new(),
        }
    }

    fn row() -> Vec<FlatCell> {
        vec![
            cell("cf", "a", 3000, "a3"),
            cell("cf", "a", 2000, "a2"),
            cell("cf", "a", 1000, "a1"),
            cell("cf", "b", 1000, "b1"),
            cell("other", "a", 1000, "o1"),
        ]
    }

    fn filter(filter: Filter) -> RowFilter {
        RowFilter {
            filter: Some(filter),
        }
    }

    fn values(cells: &[FlatCell]) -> Vec<&str> {
        cells
            .iter()
            .map(|cell| std::str::from_utf8(&cell.value).unwrap_or("?"))
            .collect()
    }

    #[test]
    fn test_chain_of_family_and_column_limit() -> Result<(), Box<dyn std::error::Error>> {
        let chain = filter(Filter::Chain(Chain {
            filters: vec![
                filter(Filter::FamilyNameRegexFilter("cf".to_owned())),
                filter(Filter::CellsPerColumnLimitFilter(1)),
            ],
        }));
        assert_eq!(values(&apply(&chain, b"row", row())?), ["a3", "b1"]);
        Ok(())
    }

    #[test]
    fn test_interleave_keeps_duplicates_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let interleave = filter(Filter::Interleave(Interleave {
            filters: vec![
                filter(Filter::ColumnQualifierRegexFilter(b"b".to_vec())),
                filter(Filter::CellsPerRowLimitFilter(2)),
                filter(Filter::ValueRegexFilter(b"a2".to_vec())),
            ],
        }));
        assert_eq!(values(&apply(&interleave, b"row", row())?), ["a3", "a2", "a2", "b1"]);
        Ok(())
    }

    #[test]
    fn test_condition() -> Result<(), Box<dyn std::error::Error>> {
        let condition = |predicate: Filter| {
            filter(Filter::Condition(
                Condition {
                    predicate_filter: Some(filter(predicate).into()),
                    true_filter: Some(filter(Filter::StripValueTransformer(true)).into()),
                    false_filter: Some(filter(Filter::ApplyLabelTransformer("miss".to_owned())).into()),
                }
                .into(),
            ))
        };
        let matched = apply(&condition(Filter::RowKeyRegexFilter(b"r.*".to_vec())), b"row", row())?;
        assert!(matched.iter().all(|cell| cell.value.is_empty()));
        let missed = apply(&condition(Filter::RowKeyRegexFilter(b"x".to_vec())), b"row", row())?;
        assert!(missed.iter().all(|cell| cell.labels == ["miss"]));
        Ok(())
    }

    #[test]
    fn test_ranges() -> Result<(), Box<dyn std::error::Error>> {
        let columns = filter(Filter::ColumnRangeFilter(ColumnRange {
            family_name: "cf".to_owned(),
            start_qualifier: Some(column_range::StartQualifier::StartQualifierOpen(b"a".to_vec())),
            end_qualifier: None,
        }));
        assert_eq!(values(&apply(&columns, b"row", row())?), ["b1"]);

        let times = filter(Filter::TimestampRangeFilter(TimestampRange {
            start_timestamp_micros: 2000,
            end_timestamp_micros: 3000,
        }));
        assert_eq!(values(&apply(&times, b"row", row())?), ["a2"]);

        let values_in = filter(Filter::ValueRangeFilter(ValueRange {
            start_value: Some(value_range::StartValue::StartValueClosed(b"a2".to_vec())),
            end_value: Some(value_range::EndValue::EndValueClosed(b"b1".to_vec())),
        }));
        assert_eq!(values(&apply(&values_in, b"row", row())?), ["a3", "a2", "b1"]);
        Ok(())
    }

    #[test]
    fn test_offsets_and_errors() -> Result<(), Box<dyn std::error::Error>> {
        let offset = filter(Filter::CellsPerRowOffsetFilter(3));
        assert_eq!(values(&apply(&offset, b"row", row())?), ["b1", "o1"]);
        assert!(apply(&filter(Filter::Sink(true)), b"row", row()).is_err());
        assert!(apply(&filter(Filter::CellsPerRowLimitFilter(-1)), b"row", row()).is_err());
        assert!(apply(&filter(Filter::ValueRegexFilter(b"(".to_vec())), b"row", row()).is_err());
        assert!(apply(&filter(Filter::BlockAllFilter(true)), b"row", row())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_row_sample_bounds() -> Result<(), Box<dyn std::error::Error>> {
        for _ in 0..100 {
            assert_eq!(apply(&filter(Filter::RowSampleFilter(1.0)), b"row", row())?.len(), 5);
            assert!(apply(&filter(Filter::RowSampleFilter(0.0)), b"row", row())?.is_empty());
        }
        Ok(())
    }
}
