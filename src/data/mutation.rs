//! Row mutations.

use super::filter::Filter;
use crate::conv::now_micros;
use crate::proto::data::{self, mutation, value, TimestampRange};
use std::time::{SystemTime, UNIX_EPOCH};

/// A cell timestamp, in microseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

/// Asks the server to stamp the cell with its own clock.
///
/// Mutations using it are not idempotent and are never retried.
pub const SERVER_TIME: Timestamp = Timestamp(-1);

impl Timestamp {
    /// A timestamp from microseconds since the epoch.
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Microseconds since the epoch.
    #[must_use]
    pub const fn micros(self) -> i64 {
        self.0
    }

    /// The current time, at millisecond granularity.
    #[must_use]
    pub fn now() -> Self {
        Self(now_micros()).truncate_to_millis()
    }

    /// Drop the sub-millisecond part, which tables with millisecond granularity reject.
    #[must_use]
    pub const fn truncate_to_millis(self) -> Self {
        Self(self.0 - self.0 % 1_000)
    }

    /// The timestamp as a point in time. `None` for [`SERVER_TIME`] and other negative values.
    #[must_use]
    pub fn time(self) -> Option<SystemTime> {
        let micros = u64::try_from(self.0).ok()?;
        UNIX_EPOCH.checked_add(std::time::Duration::from_micros(micros))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        let micros = time
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self(micros)
    }
}

/// A branch of a conditional mutation.
#[derive(Debug, Clone, PartialEq)]
struct Conditional {
    filter: Filter,
    on_true: Option<Mutation>,
    on_false: Option<Mutation>,
}

/// A set of changes to apply atomically to a single row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mutation {
    ops: Vec<data::Mutation>,
    condition: Option<Box<Conditional>>,
}

impl Mutation {
    /// An empty mutation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A mutation that applies `on_true` if `filter` matches the row and `on_false` otherwise.
    #[must_use]
    pub fn conditional(filter: Filter, on_true: Option<Self>, on_false: Option<Self>) -> Self {
        Self {
            ops: Vec::new(),
            condition: Some(Box::new(Conditional {
                filter,
                on_true,
                on_false,
            })),
        }
    }

    fn push(&mut self, op: mutation::Mutation) {
        self.ops.push(data::Mutation { mutation: Some(op) });
    }

    /// Write a cell.
    pub fn set(
        &mut self,
        family: impl Into<String>,
        column: impl Into<Vec<u8>>,
        ts: Timestamp,
        value: impl Into<Vec<u8>>,
    ) {
        self.push(mutation::Mutation::SetCell(mutation::SetCell {
            family_name: family.into(),
            column_qualifier: column.into(),
            timestamp_micros: ts.micros(),
            value: value.into(),
        }));
    }

    /// Delete every cell of a column.
    pub fn delete_cell_in_column(&mut self, family: impl Into<String>, column: impl Into<Vec<u8>>) {
        self.push(mutation::Mutation::DeleteFromColumn(mutation::DeleteFromColumn {
            family_name: family.into(),
            column_qualifier: column.into(),
            time_range: None,
        }));
    }

    /// Delete the cells of a column with a timestamp in `[start, end)`. An `end` of zero is
    /// unbounded.
    pub fn delete_timestamp_range(
        &mut self,
        family: impl Into<String>,
        column: impl Into<Vec<u8>>,
        start: Timestamp,
        end: Timestamp,
    ) {
        self.push(mutation::Mutation::DeleteFromColumn(mutation::DeleteFromColumn {
            family_name: family.into(),
            column_qualifier: column.into(),
            time_range: Some(TimestampRange {
                start_timestamp_micros: start.micros(),
                end_timestamp_micros: end.micros(),
            }),
        }));
    }

    /// Delete every cell of a family.
    pub fn delete_cells_in_family(&mut self, family: impl Into<String>) {
        self.push(mutation::Mutation::DeleteFromFamily(mutation::DeleteFromFamily {
            family_name: family.into(),
        }));
    }

    /// Delete the whole row.
    pub fn delete_row(&mut self) {
        self.push(mutation::Mutation::DeleteFromRow(mutation::DeleteFromRow {}));
    }

    /// Add `value` to an aggregate cell of an int64 sum, min or max family.
    pub fn add_int_to_cell(
        &mut self,
        family: impl Into<String>,
        column: impl Into<Vec<u8>>,
        ts: Timestamp,
        value: i64,
    ) {
        self.push(mutation::Mutation::AddToCell(mutation::AddToCell {
            family_name: family.into(),
            column_qualifier: Some(data::Value {
                kind: Some(value::Kind::RawValue(column.into())),
            }),
            timestamp: Some(data::Value {
                kind: Some(value::Kind::RawTimestampMicros(ts.micros())),
            }),
            input: Some(data::Value {
                kind: Some(value::Kind::IntValue(value)),
            }),
        }));
    }

    /// Whether this is a conditional mutation.
    #[must_use]
    pub const fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    /// Whether sending the mutation twice has the same effect as sending it once.
    #[must_use]
    pub fn is_idempotent(&self) -> bool {
        let own = self.ops.iter().all(|op| match &op.mutation {
            Some(mutation::Mutation::SetCell(set)) => set.timestamp_micros != SERVER_TIME.0,
            Some(mutation::Mutation::AddToCell(_)) => false,
            _ => true,
        });
        own && self.condition.as_ref().map_or(true, |condition| {
            [&condition.on_true, &condition.on_false]
                .into_iter()
                .flatten()
                .all(Self::is_idempotent)
        })
    }

    pub(crate) fn ops(&self) -> &[data::Mutation] {
        &self.ops
    }

    /// The predicate and the operations of each branch, for a conditional mutation.
    pub(crate) fn branches(&self) -> Option<(&Filter, &[data::Mutation], &[data::Mutation])> {
        let condition = self.condition.as_deref()?;
        Some((
            &condition.filter,
            condition.on_true.as_ref().map_or(&[][..], Self::ops),
            condition.on_false.as_ref().map_or(&[][..], Self::ops),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::filter::pass_all_filter;

    #[test]
    fn test_server_time_is_not_idempotent() {
        let mut m = Mutation::new();
        m.set("f", "c", Timestamp::from_micros(1_000), "v");
        m.delete_row();
        assert!(m.is_idempotent());

        m.set("f", "c", SERVER_TIME, "v");
        assert!(!m.is_idempotent());

        let mut add = Mutation::new();
        add.add_int_to_cell("sum", "c", Timestamp::from_micros(0), 1);
        let cond = Mutation::conditional(pass_all_filter(), Some(add), None);
        assert!(cond.is_conditional());
        assert!(!cond.is_idempotent());
    }

    #[test]
    fn test_branches() {
        let mut on_true = Mutation::new();
        on_true.delete_cells_in_family("f");
        let cond = Mutation::conditional(pass_all_filter(), Some(on_true), None);
        let Some((filter, t, f)) = cond.branches() else {
            panic!("expected branches");
        };
        assert_eq!(filter, &Filter::PassAll);
        assert_eq!(t.len(), 1);
        assert!(f.is_empty());
        assert!(Mutation::new().branches().is_none());
    }

    #[test]
    fn test_timestamp_truncation() {
        let ts = Timestamp::from_micros(1_234_567);
        assert_eq!(ts.truncate_to_millis().micros(), 1_234_000);
        assert_eq!(SERVER_TIME.time(), None);
        assert_eq!(Timestamp::now().micros() % 1_000, 0);
    }
}
