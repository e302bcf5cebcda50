//! Reading and writing rows.
//!
//! [`Client`] holds the connection to the data endpoint and hands out [`Table`] handles. A handle
//! targets a table, an authorized view of a table, or a materialized view. Materialized views
//! are read-only.

mod filter;
mod mutation;
mod reader;
mod rmw;
mod row;
mod row_set;

pub use self::filter::{
    block_all_filter, cells_per_row_limit_filter, cells_per_row_offset_filter, chain_filters,
    column_filter, column_range_filter, condition_filter, family_filter, interleave_filters,
    label_filter, latest_n_filter, pass_all_filter, row_key_filter, row_sample_filter,
    strip_value_filter, timestamp_range_filter, value_filter, value_range_filter, Filter,
};
pub use self::mutation::{Mutation, Timestamp, SERVER_TIME};
pub use self::rmw::ReadModifyWrite;
pub use self::row::{ReadItem, Row};
pub use self::row_set::{RowRange, RowSet};

use self::reader::ChunkReader;
use crate::config::ClientConfig;
use crate::internal_macros::idempotent;
use crate::proto::data::bigtable_client::BigtableClient;
use crate::proto::data::{
    mutate_rows_request, CheckAndMutateRowRequest, MutateRowRequest, MutateRowsRequest,
    ReadModifyWriteRowRequest, ReadRowsRequest, SampleRowKeysRequest,
};
use crate::retry::{self, is_retryable};
use crate::tracing_shim::{debug, info_span, trace, Instrument as _};
use crate::{resource, Error, Result};
use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::TryStreamExt as _;
use tonic::transport::Channel;
use tonic::{Code, Status};

/// The most mutations a single `MutateRows` call may carry, summed over its entries.
pub(crate) const MAX_MUTATIONS_PER_CALL: usize = 100_000;

/// A connection to the data endpoint of one instance.
#[derive(Debug, Clone)]
pub struct Client {
    client: BigtableClient<Channel>,
    config: ClientConfig,
    prefix: String,
}

impl Client {
    /// Connect to the data endpoint named in `config`.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let channel = config.connect(&config.data_endpoint).await?;
        Ok(Self::with_channel(channel, config))
    }

    /// Use an existing channel.
    #[must_use]
    pub fn with_channel(channel: Channel, config: ClientConfig) -> Self {
        let prefix = config.instance_name();
        Self {
            client: BigtableClient::new(channel),
            config,
            prefix,
        }
    }

    /// The configuration this client was created with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn open(&self, target: Target) -> Table {
        Table {
            client: self.client.clone(),
            config: self.config.clone(),
            prefix: self.prefix.clone(),
            target,
        }
    }

    /// A handle on a table.
    #[must_use]
    pub fn open_table(&self, table: &str) -> Table {
        self.open(Target::Table(resource::table_path(&self.prefix, table)))
    }

    /// A handle on an authorized view of a table.
    #[must_use]
    pub fn open_authorized_view(&self, table: &str, view: &str) -> Table {
        self.open(Target::AuthorizedView(resource::authorized_view_path(
            &self.prefix,
            table,
            view,
        )))
    }

    /// A read-only handle on a materialized view.
    #[must_use]
    pub fn open_materialized_view(&self, view: &str) -> Table {
        self.open(Target::MaterializedView(resource::materialized_view_path(
            &self.prefix,
            view,
        )))
    }
}

/// What a [`Table`] handle reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Table(String),
    AuthorizedView(String),
    MaterializedView(String),
}

/// The resource name fields shared by every data request.
#[derive(Debug, Default)]
struct Names {
    table_name: String,
    authorized_view_name: String,
    materialized_view_name: String,
    app_profile_id: String,
}

/// Options for [`Table::read_rows`] and [`Table::read_row`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOptions {
    /// Only cells passing this filter are returned.
    pub filter: Option<Filter>,
    /// The most rows to return. `None` is unlimited.
    pub limit: Option<u64>,
    /// Return rows in descending key order.
    pub reversed: bool,
}

impl ReadOptions {
    /// Options that read everything in ascending order.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Stop after `limit` rows.
    #[must_use]
    pub const fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Read in descending key order.
    #[must_use]
    pub const fn reversed(mut self) -> Self {
        self.reversed = true;
        self
    }
}

/// A handle on a table, authorized view or materialized view.
#[derive(Debug, Clone)]
pub struct Table {
    client: BigtableClient<Channel>,
    config: ClientConfig,
    prefix: String,
    target: Target,
}

fn status_from_proto(status: crate::proto::rpc::Status) -> Option<Status> {
    match Code::from(status.code) {
        Code::Ok => None,
        code => Some(Status::new(code, status.message)),
    }
}

impl Table {
    fn request<T>(&self, message: T) -> tonic::Request<T> {
        resource::request(message, &self.prefix)
    }

    /// The full resource name of the target.
    #[must_use]
    pub fn name(&self) -> &str {
        match &self.target {
            Target::Table(name) | Target::AuthorizedView(name) | Target::MaterializedView(name) => {
                name
            }
        }
    }

    fn names(&self) -> Names {
        let mut names = Names {
            app_profile_id: self.config.app_profile.clone(),
            ..Names::default()
        };
        match &self.target {
            Target::Table(name) => names.table_name.clone_from(name),
            Target::AuthorizedView(name) => names.authorized_view_name.clone_from(name),
            Target::MaterializedView(name) => names.materialized_view_name.clone_from(name),
        }
        names
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.target {
            Target::MaterializedView(_) => {
                Err(Error::invalid("materialized views do not accept mutations"))
            }
            _ => Ok(()),
        }
    }

    /// Apply a mutation to one row.
    ///
    /// Returns whether the predicate matched for a conditional mutation and `None` otherwise. The
    /// call is retried only when the mutation is idempotent.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(table = %self.name())))]
    pub async fn apply(&self, row: impl Into<Vec<u8>>, mutation: &Mutation) -> Result<Option<bool>> {
        self.ensure_writable()?;
        let row_key = row.into();
        let names = self.names();
        let idempotent = mutation.is_idempotent();

        if let Some((predicate, on_true, on_false)) = mutation.branches() {
            let request = CheckAndMutateRowRequest {
                table_name: names.table_name,
                authorized_view_name: names.authorized_view_name,
                app_profile_id: names.app_profile_id,
                row_key,
                predicate_filter: Some(predicate.to_proto()),
                true_mutations: on_true.to_vec(),
                false_mutations: on_false.to_vec(),
            };
            let response = if idempotent {
                idempotent!(self.check_and_mutate_row(request.clone())).await?
            } else {
                self.client
                    .clone()
                    .check_and_mutate_row(self.request(request))
                    .await?
                    .into_inner()
            };
            return Ok(Some(response.predicate_matched));
        }

        if mutation.ops().is_empty() {
            return Err(Error::invalid("mutation has no operations"));
        }
        let request = MutateRowRequest {
            table_name: names.table_name,
            authorized_view_name: names.authorized_view_name,
            app_profile_id: names.app_profile_id,
            row_key,
            mutations: mutation.ops().to_vec(),
        };
        if idempotent {
            let _response = idempotent!(self.mutate_row(request.clone())).await?;
        } else {
            let _response = self.client.clone().mutate_row(self.request(request)).await?;
        }
        Ok(None)
    }

    /// Apply many mutations, each to its own row.
    ///
    /// The result has one slot per entry: `None` when the entry was applied, or the status it
    /// finally failed with. Entries failing with a retryable status are retried on their own.
    /// `Err` is returned only when the input is invalid or a whole call fails permanently.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(table = %self.name(), entries = keys.len())))]
    pub async fn apply_bulk<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
        mutations: &[Mutation],
    ) -> Result<Vec<Option<Status>>> {
        self.ensure_writable()?;
        if keys.len() != mutations.len() {
            return Err(Error::invalid(format!(
                "got {} keys but {} mutations",
                keys.len(),
                mutations.len()
            )));
        }
        if mutations.iter().any(Mutation::is_conditional) {
            return Err(Error::invalid("conditional mutations cannot be applied in bulk"));
        }

        let mut results = vec![None; keys.len()];
        for group in group_entries(mutations) {
            self.apply_group(group, keys, mutations, &mut results).await?;
        }
        Ok(results)
    }

    async fn apply_group<K: AsRef<[u8]>>(
        &self,
        mut pending: Vec<usize>,
        keys: &[K],
        mutations: &[Mutation],
        results: &mut [Option<Status>],
    ) -> Result<()> {
        let mut backoff = self.config.retry.backoff();
        let mut attempt = 1;
        loop {
            if let Err(status) = self.mutate_rows(&pending, keys, mutations, results).await {
                if !is_retryable(&status) {
                    return Err(status.into());
                }
            }
            pending.retain(|&index| results[index].as_ref().is_some_and(is_retryable));
            if pending.is_empty() || attempt >= self.config.retry.max_attempts {
                return Ok(());
            }
            let pause = backoff.next_pause();
            debug!(attempt, retrying = pending.len(), "retrying failed bulk entries");
            tokio::time::sleep(pause).await;
            attempt += 1;
        }
    }

    /// Send one `MutateRows` call for the `pending` entries, recording each entry's outcome.
    ///
    /// Entries the server never reported on take the status of the failed call.
    async fn mutate_rows<K: AsRef<[u8]>>(
        &self,
        pending: &[usize],
        keys: &[K],
        mutations: &[Mutation],
        results: &mut [Option<Status>],
    ) -> Result<(), Status> {
        let names = self.names();
        let request = MutateRowsRequest {
            table_name: names.table_name,
            authorized_view_name: names.authorized_view_name,
            app_profile_id: names.app_profile_id,
            entries: pending
                .iter()
                .map(|&index| mutate_rows_request::Entry {
                    row_key: keys[index].as_ref().to_vec(),
                    mutations: mutations[index].ops().to_vec(),
                })
                .collect(),
        };

        let mut reported = vec![false; pending.len()];
        let outcome = async {
            let mut stream = self
                .client
                .clone()
                .mutate_rows(self.request(request))
                .await?
                .into_inner();
            while let Some(response) = stream.message().await? {
                for entry in response.entries {
                    let Some(position) = usize::try_from(entry.index)
                        .ok()
                        .filter(|&position| position < pending.len())
                    else {
                        trace!(index = entry.index, "ignoring status for unknown entry");
                        continue;
                    };
                    reported[position] = true;
                    results[pending[position]] = entry.status.and_then(status_from_proto);
                }
            }
            Ok::<_, Status>(())
        }
        .await;

        let missing = match &outcome {
            Ok(()) => Status::internal("no status was reported for the entry"),
            Err(status) => status.clone(),
        };
        for (position, _) in reported.iter().enumerate().filter(|(_, seen)| !**seen) {
            results[pending[position]] = Some(missing.clone());
        }
        outcome
    }

    /// Read a single row. `None` if it does not exist or the filter removed every cell.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(table = %self.name())))]
    pub async fn read_row(&self, row: impl Into<Vec<u8>>, options: ReadOptions) -> Result<Option<Row>> {
        let options = ReadOptions {
            limit: None,
            ..options
        };
        self.read_rows(RowSet::RowList(vec![row.into()]), options)
            .try_next()
            .await
    }

    /// Stream the rows of a row set.
    ///
    /// Transient failures are retried by resuming after the last row delivered.
    pub fn read_rows(&self, rows: RowSet, options: ReadOptions) -> BoxStream<'static, Result<Row>> {
        let table = self.clone();
        Box::pin(try_stream! {
            let mut rows = rows;
            let filter = options.filter.as_ref().map(Filter::to_proto);
            let limit = options.limit.map(|limit| i64::try_from(limit).unwrap_or(i64::MAX));
            let mut delivered = 0_i64;
            let mut backoff = table.config.retry.backoff();
            let mut attempt = 1;

            loop {
                if !rows.valid() {
                    break;
                }
                let rows_limit = match limit {
                    Some(limit) if delivered >= limit => break,
                    Some(limit) => limit - delivered,
                    None => 0,
                };
                let names = table.names();
                let request = ReadRowsRequest {
                    table_name: names.table_name,
                    authorized_view_name: names.authorized_view_name,
                    materialized_view_name: names.materialized_view_name,
                    app_profile_id: names.app_profile_id,
                    rows: Some(rows.to_proto()),
                    filter: filter.clone(),
                    rows_limit,
                    reversed: options.reversed,
                };

                let mut reader = ChunkReader::new(options.reversed);
                let failure = match table.client.clone().read_rows(table.request(request)).await {
                    Err(status) => Some(status),
                    Ok(response) => {
                        let mut stream = response.into_inner();
                        loop {
                            match stream.message().await {
                                Ok(Some(response)) => {
                                    for chunk in response.chunks {
                                        if let Some(row) = reader.process(chunk)? {
                                            delivered += 1;
                                            yield row;
                                        }
                                    }
                                }
                                Ok(None) => {
                                    reader.close()?;
                                    break None;
                                }
                                Err(status) => break Some(status),
                            }
                        }
                    }
                };

                let pause = backoff.next_pause();
                match failure {
                    None => break,
                    Some(status) if attempt < table.config.retry.max_attempts && is_retryable(&status) => {
                        debug!(attempt, delivered, code = ?status.code(), ?pause, "resuming read");
                    }
                    Some(status) => Err(Error::from(status))?,
                }
                if let Some(last) = reader.last_key() {
                    rows = rows.retain_rows_after(last, options.reversed);
                }
                tokio::time::sleep(pause).await;
                attempt += 1;
            }
        }
        .instrument(info_span!("read_rows", table = %self.name())))
    }

    /// Atomically append to or increment cells of one row, returning the new cells.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(table = %self.name())))]
    pub async fn apply_read_modify_write(
        &self,
        row: impl Into<Vec<u8>>,
        rules: &ReadModifyWrite,
    ) -> Result<Row> {
        self.ensure_writable()?;
        if rules.rules().is_empty() {
            return Err(Error::invalid("read-modify-write has no rules"));
        }
        let names = self.names();
        let request = ReadModifyWriteRowRequest {
            table_name: names.table_name,
            authorized_view_name: names.authorized_view_name,
            app_profile_id: names.app_profile_id,
            row_key: row.into(),
            rules: rules.rules().to_vec(),
        };
        let response = self
            .client
            .clone()
            .read_modify_write_row(self.request(request))
            .await?
            .into_inner();
        let row = response
            .row
            .ok_or_else(|| Error::malformed("read-modify-write returned no row"))?;
        Ok(Row::from_proto(row))
    }

    /// Keys that divide the table into roughly equal parts, ending with the empty key.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), fields(table = %self.name())))]
    pub async fn sample_row_keys(&self) -> Result<Vec<Vec<u8>>> {
        let keys = retry::invoke(&self.config.retry, || {
            let mut client = self.client.clone();
            let names = self.names();
            let request = self.request(SampleRowKeysRequest {
                table_name: names.table_name,
                authorized_view_name: names.authorized_view_name,
                materialized_view_name: names.materialized_view_name,
                app_profile_id: names.app_profile_id,
            });
            async move {
                let mut stream = client.sample_row_keys(request).await?.into_inner();
                let mut keys = Vec::new();
                while let Some(response) = stream.message().await? {
                    keys.push(response.row_key);
                }
                Ok(keys)
            }
        })
        .await?;
        Ok(keys)
    }
}

/// Split entries into groups that each fit in one `MutateRows` call.
///
/// An entry that alone exceeds the limit is sent in a group of its own.
fn group_entries(mutations: &[Mutation]) -> Vec<Vec<usize>> {
    let mut groups = Vec::new();
    let mut group = Vec::new();
    let mut count = 0;
    for (index, mutation) in mutations.iter().enumerate() {
        let ops = mutation.ops().len();
        if !group.is_empty() && count + ops > MAX_MUTATIONS_PER_CALL {
            groups.push(std::mem::take(&mut group));
            count = 0;
        }
        group.push(index);
        count += ops;
    }
    if !group.is_empty() {
        groups.push(group);
    }
    groups
}

#[cfg(test)]
mod test {
    use super::*;

    fn mutation_with(ops: usize) -> Mutation {
        let mut mutation = Mutation::new();
        for i in 0..ops {
            mutation.set("f", format!("c{i}"), Timestamp::from_micros(1_000), "v");
        }
        mutation
    }

    #[test]
    fn test_group_entries() {
        let mutations = vec![
            mutation_with(60_000),
            mutation_with(30_000),
            mutation_with(20_000),
            mutation_with(1),
        ];
        assert_eq!(group_entries(&mutations), [vec![0, 1], vec![2, 3]]);
        assert!(group_entries(&[]).is_empty());
    }

    #[test]
    fn test_status_from_proto() {
        let ok = crate::proto::rpc::Status::default();
        assert!(status_from_proto(ok).is_none());
        let failed = status_from_proto(crate::proto::rpc::Status {
            code: Code::Unavailable as i32,
            message: "try again".to_owned(),
            details: Vec::new(),
        });
        assert_eq!(failed.map(|status| status.code()), Some(Code::Unavailable));
    }

    #[tokio::test]
    async fn test_request_names() {
        let channel = Channel::from_static("http://localhost:1").connect_lazy();
        let client = Client::with_channel(channel, ClientConfig::new("p", "i").with_app_profile("ap"));

        let names = client.open_table("t").names();
        assert_eq!(names.table_name, "projects/p/instances/i/tables/t");
        assert!(names.authorized_view_name.is_empty());
        assert_eq!(names.app_profile_id, "ap");

        let names = client.open_authorized_view("t", "v").names();
        assert!(names.table_name.is_empty());
        assert_eq!(names.authorized_view_name, "projects/p/instances/i/tables/t/authorizedViews/v");

        let view = client.open_materialized_view("mv");
        assert_eq!(view.names().materialized_view_name, "projects/p/instances/i/materializedViews/mv");
        assert!(view.ensure_writable().is_err());
    }
}
