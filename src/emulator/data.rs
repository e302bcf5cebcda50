//! Row reads and writes.

use super::filter::{self, FlatCell};
use super::{not_found, row_size, Cell, Emulator, RowData, Rows, State};
use crate::conv::now_micros;
use crate::data::MAX_MUTATIONS_PER_CALL;
use crate::proto::admin::{authorized_view, Table};
use crate::proto::data::bigtable_server::Bigtable;
use crate::proto::data::read_rows_response::{cell_chunk::RowStatus, CellChunk};
use crate::proto::data::{
    mutate_rows_response, mutation, read_modify_write_rule, row_range, value,
    CheckAndMutateRowRequest, CheckAndMutateRowResponse, Column, Family, MutateRowRequest,
    MutateRowResponse, MutateRowsRequest, MutateRowsResponse, Mutation, ReadModifyWriteRowRequest,
    ReadModifyWriteRowResponse, ReadModifyWriteRule, ReadRowsRequest, ReadRowsResponse, Row,
    RowFilter, RowRange, RowSet, SampleRowKeysRequest, SampleRowKeysResponse,
};
use crate::tracing_shim::debug;
use crate::types::{Aggregator, ValueType};
use crate::RpcResponse;
use futures::Stream;
use std::pin::Pin;
use tonic::{Request, Response, Status};

/// A boxed stream of responses.
type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

/// What a data request addresses.
#[derive(Debug)]
struct Target {
    /// The table holding the rows.
    table: String,
    /// The visible part of the table, for an authorized view.
    subset: Option<authorized_view::SubsetView>,
    /// Materialized views have no rows and reject writes.
    materialized: bool,
}

impl Target {
    fn resolve(
        state: &State,
        table_name: &str,
        authorized_view_name: &str,
        materialized_view_name: &str,
    ) -> Result<Self, Status> {
        if !authorized_view_name.is_empty() {
            let view = state
                .authorized_views
                .get(authorized_view_name)
                .ok_or_else(|| not_found("authorized view", authorized_view_name))?;
            let Some((table, _)) = authorized_view_name.split_once("/authorizedViews/") else {
                return Err(Status::invalid_argument("malformed authorized view name"));
            };
            let Some(authorized_view::AuthorizedView::SubsetView(subset)) = &view.authorized_view else {
                return Err(Status::failed_precondition("authorized view has no subset"));
            };
            let _table = state.table(table)?;
            return Ok(Self {
                table: table.to_owned(),
                subset: Some(subset.clone()),
                materialized: false,
            });
        }
        if !materialized_view_name.is_empty() {
            if !state.materialized_views.contains_key(materialized_view_name) {
                return Err(not_found("materialized view", materialized_view_name));
            }
            return Ok(Self {
                table: materialized_view_name.to_owned(),
                subset: None,
                materialized: true,
            });
        }
        if table_name.is_empty() {
            return Err(Status::invalid_argument("no table was named"));
        }
        let _table = state.table(table_name)?;
        Ok(Self {
            table: table_name.to_owned(),
            subset: None,
            materialized: false,
        })
    }

    fn ensure_writable(&self) -> Result<(), Status> {
        if self.materialized {
            return Err(Status::invalid_argument("materialized views are read-only"));
        }
        Ok(())
    }

    fn row_visible(&self, key: &[u8]) -> bool {
        self.subset.as_ref().map_or(true, |subset| {
            subset
                .row_prefixes
                .iter()
                .any(|prefix| key.starts_with(prefix))
        })
    }

    fn family_visible(&self, family: &str) -> bool {
        self.subset
            .as_ref()
            .map_or(true, |subset| subset.family_subsets.contains_key(family))
    }

    fn cell_visible(&self, family: &str, qualifier: &[u8]) -> bool {
        let Some(subset) = &self.subset else {
            return true;
        };
        subset.family_subsets.get(family).is_some_and(|columns| {
            columns.qualifiers.iter().any(|q| q == qualifier)
                || columns
                    .qualifier_prefixes
                    .iter()
                    .any(|prefix| qualifier.starts_with(prefix))
        })
    }

    /// The cells of `row` this target can see.
    fn visible_cells(&self, row: &RowData) -> Vec<FlatCell> {
        filter::flatten(row)
            .into_iter()
            .filter(|cell| self.cell_visible(&cell.family, &cell.qualifier))
            .collect()
    }

    fn check_write(&self, key: &[u8]) -> Result<(), Status> {
        self.ensure_writable()?;
        if self.row_visible(key) {
            Ok(())
        } else {
            Err(Status::permission_denied("row is outside the authorized view"))
        }
    }
}

/// Whether `key` falls in `range`. An empty closed start or empty open end is unbounded.
fn in_row_range(key: &[u8], range: &RowRange) -> bool {
    let after_start = match &range.start_key {
        Some(row_range::StartKey::StartKeyClosed(start)) => key >= start.as_slice(),
        Some(row_range::StartKey::StartKeyOpen(start)) => key > start.as_slice(),
        None => true,
    };
    let before_end = match &range.end_key {
        Some(row_range::EndKey::EndKeyOpen(end)) => end.is_empty() || key < end.as_slice(),
        Some(row_range::EndKey::EndKeyClosed(end)) => key <= end.as_slice(),
        None => true,
    };
    after_start && before_end
}

fn in_row_set(key: &[u8], rows: Option<&RowSet>) -> bool {
    match rows {
        None => true,
        Some(set) if set.row_keys.is_empty() && set.row_ranges.is_empty() => true,
        Some(set) => {
            set.row_keys.iter().any(|k| k == key)
                || set.row_ranges.iter().any(|range| in_row_range(key, range))
        }
    }
}

/// The chunks of one row, with `commit_row` on the last.
fn chunks(key: &[u8], cells: Vec<FlatCell>) -> Vec<CellChunk> {
    let total = cells.len();
    let mut chunks = Vec::with_capacity(total);
    let mut previous: Option<(String, Vec<u8>)> = None;
    for (i, cell) in cells.into_iter().enumerate() {
        let (family_changed, column_changed) = match &previous {
            Some((family, qualifier)) => (
                *family != cell.family,
                *family != cell.family || *qualifier != cell.qualifier,
            ),
            None => (true, true),
        };
        chunks.push(CellChunk {
            row_key: if i == 0 { key.to_vec() } else { Vec::new() },
            family_name: family_changed.then(|| cell.family.clone()),
            qualifier: column_changed.then(|| cell.qualifier.clone()),
            timestamp_micros: cell.timestamp,
            labels: cell.labels,
            value: cell.value,
            value_size: 0,
            row_status: (i + 1 == total).then_some(RowStatus::CommitRow(true)),
        });
        previous = Some((cell.family, cell.qualifier));
    }
    chunks
}

/// The server time in microseconds, truncated to milliseconds.
fn server_time() -> i64 {
    now_micros() / 1000 * 1000
}

fn encode_i64(value: i64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

fn decode_i64(value: &[u8]) -> Result<i64, Status> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| Status::invalid_argument("value is not an 8-byte big-endian integer"))?;
    Ok(i64::from_be_bytes(bytes))
}

/// Put `cell` into `cells`, replacing any cell with the same timestamp and keeping newest first.
fn put_cell(cells: &mut Vec<Cell>, cell: Cell) {
    match cells.binary_search_by(|existing| cell.timestamp.cmp(&existing.timestamp)) {
        Ok(i) => cells[i] = cell,
        Err(i) => cells.insert(i, cell),
    }
}

/// Apply `mutations` to one row of `meta`'s table. Nothing changes if any mutation fails.
fn mutate(
    meta: &Table,
    target: &Target,
    key: &[u8],
    row: &mut RowData,
    mutations: &[Mutation],
) -> Result<(), Status> {
    use mutation::Mutation as M;

    if mutations.is_empty() {
        return Err(Status::invalid_argument("no mutations were given"));
    }
    target.check_write(key)?;
    let family = |name: &str| -> Result<Option<ValueType>, Status> {
        let family = meta
            .column_families
            .get(name)
            .ok_or_else(|| not_found("column family", name))?;
        Ok(family.value_type.as_ref().and_then(ValueType::from_proto))
    };
    let visible = |name: &str, qualifier: &[u8]| -> Result<(), Status> {
        if target.cell_visible(name, qualifier) {
            Ok(())
        } else {
            Err(Status::permission_denied("column is outside the authorized view"))
        }
    };

    let mut updated = row.clone();
    for mutation in mutations {
        match &mutation.mutation {
            Some(M::SetCell(set)) => {
                let _type = family(&set.family_name)?;
                visible(&set.family_name, &set.column_qualifier)?;
                let timestamp = match set.timestamp_micros {
                    -1 => server_time(),
                    ts if ts < 0 || ts % 1000 != 0 => {
                        return Err(Status::invalid_argument(format!(
                            "timestamp {ts} is not a non-negative multiple of 1000"
                        )))
                    }
                    ts => ts,
                };
                put_cell(
                    updated
                        .entry(set.family_name.clone())
                        .or_default()
                        .entry(set.column_qualifier.clone())
                        .or_default(),
                    Cell {
                        timestamp,
                        value: set.value.clone(),
                    },
                );
            }
            Some(M::AddToCell(add)) => {
                let Some(ValueType::Aggregate { aggregator, .. }) = family(&add.family_name)? else {
                    return Err(Status::invalid_argument(format!(
                        "family {} is not an aggregate family",
                        add.family_name
                    )));
                };
                let raw = |value: Option<&crate::proto::data::Value>| value.and_then(|v| v.kind.clone());
                let Some(value::Kind::RawValue(qualifier)) = raw(add.column_qualifier.as_ref()) else {
                    return Err(Status::invalid_argument("add_to_cell needs a raw qualifier"));
                };
                let Some(value::Kind::RawTimestampMicros(timestamp)) = raw(add.timestamp.as_ref()) else {
                    return Err(Status::invalid_argument("add_to_cell needs a raw timestamp"));
                };
                let Some(value::Kind::IntValue(input)) = raw(add.input.as_ref()) else {
                    return Err(Status::invalid_argument("add_to_cell needs an integer input"));
                };
                visible(&add.family_name, &qualifier)?;
                let timestamp = if timestamp == -1 { server_time() } else { timestamp };
                let cells = updated
                    .entry(add.family_name.clone())
                    .or_default()
                    .entry(qualifier)
                    .or_default();
                let existing = cells
                    .iter()
                    .find(|cell| cell.timestamp == timestamp)
                    .map(|cell| decode_i64(&cell.value))
                    .transpose()?;
                let combined = match (aggregator, existing) {
                    (_, None) => input,
                    (Aggregator::Sum, Some(current)) => current.wrapping_add(input),
                    (Aggregator::Min, Some(current)) => current.min(input),
                    (Aggregator::Max, Some(current)) => current.max(input),
                    (Aggregator::HllppUniqueCount, Some(_)) => {
                        return Err(Status::unimplemented("unique-count aggregation is not emulated"))
                    }
                };
                put_cell(
                    cells,
                    Cell {
                        timestamp,
                        value: encode_i64(combined),
                    },
                );
            }
            Some(M::DeleteFromColumn(delete)) => {
                let _type = family(&delete.family_name)?;
                visible(&delete.family_name, &delete.column_qualifier)?;
                let (start, end) = delete.time_range.as_ref().map_or((0, 0), |range| {
                    (range.start_timestamp_micros, range.end_timestamp_micros)
                });
                if let Some(cells) = updated
                    .get_mut(&delete.family_name)
                    .and_then(|columns| columns.get_mut(&delete.column_qualifier))
                {
                    cells.retain(|cell| cell.timestamp < start || (end != 0 && cell.timestamp >= end));
                }
            }
            Some(M::DeleteFromFamily(delete)) => {
                let _type = family(&delete.family_name)?;
                if !target.family_visible(&delete.family_name) {
                    return Err(Status::permission_denied("family is outside the authorized view"));
                }
                if let Some(columns) = updated.get_mut(&delete.family_name) {
                    columns.retain(|qualifier, _| !target.cell_visible(&delete.family_name, qualifier));
                }
            }
            Some(M::DeleteFromRow(_)) => {
                for (family, columns) in &mut updated {
                    columns.retain(|qualifier, _| !target.cell_visible(family, qualifier));
                }
            }
            None => return Err(Status::invalid_argument("mutation has no change")),
        }
        for columns in updated.values_mut() {
            columns.retain(|_, cells| !cells.is_empty());
        }
        updated.retain(|_, columns| !columns.is_empty());
    }
    *row = updated;
    Ok(())
}

/// Apply mutations to the row at `key`, dropping the row if it ends up empty.
fn mutate_row_at(
    state: &mut State,
    target: &Target,
    key: &[u8],
    mutations: &[Mutation],
) -> Result<(), Status> {
    let table = state.table_mut(&target.table)?;
    let mut row = table.rows.get(key).cloned().unwrap_or_default();
    mutate(&table.meta, target, key, &mut row, mutations)?;
    if row.is_empty() {
        let _row = table.rows.remove(key);
    } else {
        let _previous = table.rows.insert(key.to_vec(), row);
    }
    Ok(())
}

/// Apply read-modify-write rules to `row`, returning the columns they changed.
fn read_modify_write(
    meta: &Table,
    target: &Target,
    row: &mut RowData,
    rules: &[ReadModifyWriteRule],
) -> Result<RowData, Status> {
    if rules.is_empty() {
        return Err(Status::invalid_argument("no rules were given"));
    }
    let now = server_time();
    let mut updated = row.clone();
    let mut changed = RowData::new();
    for rule in rules {
        if !meta.column_families.contains_key(&rule.family_name) {
            return Err(not_found("column family", &rule.family_name));
        }
        if !target.cell_visible(&rule.family_name, &rule.column_qualifier) {
            return Err(Status::permission_denied("column is outside the authorized view"));
        }
        let cells = updated
            .entry(rule.family_name.clone())
            .or_default()
            .entry(rule.column_qualifier.clone())
            .or_default();
        let latest = cells.first().cloned();
        let value = match &rule.rule {
            Some(read_modify_write_rule::Rule::AppendValue(suffix)) => {
                let mut value = latest.as_ref().map(|cell| cell.value.clone()).unwrap_or_default();
                value.extend_from_slice(suffix);
                value
            }
            Some(read_modify_write_rule::Rule::IncrementAmount(amount)) => {
                let current = match &latest {
                    Some(cell) => decode_i64(&cell.value)?,
                    None => 0,
                };
                encode_i64(current.wrapping_add(*amount))
            }
            None => return Err(Status::invalid_argument("rule has no change")),
        };
        let timestamp = latest.map_or(now, |cell| cell.timestamp.max(now));
        let cell = Cell { timestamp, value };
        put_cell(cells, cell.clone());
        let _previous = changed
            .entry(rule.family_name.clone())
            .or_default()
            .insert(rule.column_qualifier.clone(), vec![cell]);
    }
    *row = updated;
    Ok(changed)
}

fn row_to_proto(key: Vec<u8>, row: RowData) -> Row {
    Row {
        key,
        families: row
            .into_iter()
            .map(|(name, columns)| Family {
                name,
                columns: columns
                    .into_iter()
                    .map(|(qualifier, cells)| Column {
                        qualifier,
                        cells: cells
                            .into_iter()
                            .map(|cell| crate::proto::data::Cell {
                                timestamp_micros: cell.timestamp,
                                value: cell.value,
                                labels: Vec::new(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Row keys with the cumulative size of the rows up to and including them.
fn sample_keys(rows: &Rows, target: &Target) -> Vec<SampleRowKeysResponse> {
    let mut offset = 0;
    let mut samples = Vec::with_capacity(rows.len() + 1);
    for (key, row) in rows.iter().filter(|(key, _)| target.row_visible(key)) {
        offset += row_size(key, row);
        samples.push(SampleRowKeysResponse {
            row_key: key.clone(),
            offset_bytes: offset,
        });
    }
    samples.push(SampleRowKeysResponse {
        row_key: Vec::new(),
        offset_bytes: offset,
    });
    samples
}

/// The responses of a read, one per row that has cells left after filtering.
fn read(state: &State, target: &Target, request: &ReadRowsRequest) -> Result<Vec<ReadRowsResponse>, Status> {
    let limit = usize::try_from(request.rows_limit)
        .map_err(|_| Status::invalid_argument("rows_limit must not be negative"))?;
    if target.materialized {
        return Ok(Vec::new());
    }
    let table = state.table(&target.table)?;
    let pass_all = RowFilter::default();
    let filter = request.filter.as_ref().unwrap_or(&pass_all);
    let rows: Box<dyn Iterator<Item = (&Vec<u8>, &RowData)> + '_> = if request.reversed {
        Box::new(table.rows.iter().rev())
    } else {
        Box::new(table.rows.iter())
    };
    let mut responses = Vec::new();
    for (key, row) in rows {
        if limit != 0 && responses.len() >= limit {
            break;
        }
        if !target.row_visible(key) || !in_row_set(key, request.rows.as_ref()) {
            continue;
        }
        let cells = filter::apply(filter, key, target.visible_cells(row))?;
        if cells.is_empty() {
            continue;
        }
        responses.push(ReadRowsResponse {
            chunks: chunks(key, cells),
            last_scanned_row_key: Vec::new(),
        });
    }
    Ok(responses)
}

fn into_stream<T: Send + 'static>(items: Vec<T>) -> ResponseStream<T> {
    Box::pin(tokio_stream::iter(items.into_iter().map(Ok)))
}

#[tonic::async_trait]
impl Bigtable for Emulator {
    type ReadRowsStream = ResponseStream<ReadRowsResponse>;
    type SampleRowKeysStream = ResponseStream<SampleRowKeysResponse>;
    type MutateRowsStream = ResponseStream<MutateRowsResponse>;

    async fn read_rows(&self, request: Request<ReadRowsRequest>) -> RpcResponse<Self::ReadRowsStream> {
        let request = request.into_inner();
        let state = self.state()?;
        let target = Target::resolve(
            &state,
            &request.table_name,
            &request.authorized_view_name,
            &request.materialized_view_name,
        )?;
        let responses = read(&state, &target, &request)?;
        debug!(table = %target.table, rows = responses.len(), "read rows");
        Ok(Response::new(into_stream(responses)))
    }

    async fn sample_row_keys(
        &self,
        request: Request<SampleRowKeysRequest>,
    ) -> RpcResponse<Self::SampleRowKeysStream> {
        let request = request.into_inner();
        let state = self.state()?;
        let target = Target::resolve(
            &state,
            &request.table_name,
            &request.authorized_view_name,
            &request.materialized_view_name,
        )?;
        let samples = if target.materialized {
            vec![SampleRowKeysResponse::default()]
        } else {
            sample_keys(&state.table(&target.table)?.rows, &target)
        };
        Ok(Response::new(into_stream(samples)))
    }

    async fn mutate_row(&self, request: Request<MutateRowRequest>) -> RpcResponse<MutateRowResponse> {
        let MutateRowRequest {
            table_name,
            authorized_view_name,
            row_key,
            mutations,
            ..
        } = request.into_inner();
        let mut state = self.state()?;
        let target = Target::resolve(&state, &table_name, &authorized_view_name, "")?;
        mutate_row_at(&mut state, &target, &row_key, &mutations)?;
        debug!(table = %target.table, mutations = mutations.len(), "mutated row");
        Ok(Response::new(MutateRowResponse {}))
    }

    async fn mutate_rows(&self, request: Request<MutateRowsRequest>) -> RpcResponse<Self::MutateRowsStream> {
        let MutateRowsRequest {
            table_name,
            authorized_view_name,
            entries,
            ..
        } = request.into_inner();
        if entries.is_empty() {
            return Err(Status::invalid_argument("no entries were given"));
        }
        let total: usize = entries.iter().map(|entry| entry.mutations.len()).sum();
        if total > MAX_MUTATIONS_PER_CALL {
            return Err(Status::invalid_argument(format!(
                "{total} mutations exceed the limit of {MAX_MUTATIONS_PER_CALL}"
            )));
        }
        let mut state = self.state()?;
        let target = Target::resolve(&state, &table_name, &authorized_view_name, "")?;
        let results = entries
            .iter()
            .zip(0_i64..)
            .map(|(entry, index)| {
                let status = match mutate_row_at(&mut state, &target, &entry.row_key, &entry.mutations) {
                    Ok(()) => crate::proto::rpc::Status::default(),
                    Err(status) => crate::proto::rpc::Status {
                        code: status.code() as i32,
                        message: status.message().to_owned(),
                        details: Vec::new(),
                    },
                };
                mutate_rows_response::Entry {
                    index,
                    status: Some(status),
                }
            })
            .collect();
        debug!(table = %target.table, entries = entries.len(), "mutated rows");
        Ok(Response::new(into_stream(vec![MutateRowsResponse { entries: results }])))
    }

    async fn check_and_mutate_row(
        &self,
        request: Request<CheckAndMutateRowRequest>,
    ) -> RpcResponse<CheckAndMutateRowResponse> {
        let CheckAndMutateRowRequest {
            table_name,
            authorized_view_name,
            row_key,
            predicate_filter,
            true_mutations,
            false_mutations,
            ..
        } = request.into_inner();
        let mut state = self.state()?;
        let target = Target::resolve(&state, &table_name, &authorized_view_name, "")?;
        target.check_write(&row_key)?;
        let cells = state
            .table(&target.table)?
            .rows
            .get(&row_key)
            .map(|row| target.visible_cells(row))
            .unwrap_or_default();
        let matched = match &predicate_filter {
            Some(predicate) => !filter::apply(predicate, &row_key, cells)?.is_empty(),
            None => !cells.is_empty(),
        };
        let mutations = if matched { &true_mutations } else { &false_mutations };
        if !mutations.is_empty() {
            mutate_row_at(&mut state, &target, &row_key, mutations)?;
        }
        Ok(Response::new(CheckAndMutateRowResponse {
            predicate_matched: matched,
        }))
    }

    async fn read_modify_write_row(
        &self,
        request: Request<ReadModifyWriteRowRequest>,
    ) -> RpcResponse<ReadModifyWriteRowResponse> {
        let ReadModifyWriteRowRequest {
            table_name,
            authorized_view_name,
            row_key,
            rules,
            ..
        } = request.into_inner();
        let mut state = self.state()?;
        let target = Target::resolve(&state, &table_name, &authorized_view_name, "")?;
        target.check_write(&row_key)?;
        let table = state.table_mut(&target.table)?;
        let mut row = table.rows.get(&row_key).cloned().unwrap_or_default();
        let changed = read_modify_write(&table.meta, &target, &mut row, &rules)?;
        let _previous = table.rows.insert(row_key.clone(), row);
        Ok(Response::new(ReadModifyWriteRowResponse {
            row: Some(row_to_proto(row_key, changed)),
        }))
    }
}
