//! Retry behavior of the data client against a server that fails on purpose.

mod helpers;

use anyhow::Result;
use bigtable::data::{Mutation, ReadOptions, RowSet, Timestamp};
use bigtable::emulator::Emulator;
use bigtable::proto::data::bigtable_server::{Bigtable, BigtableServer};
use bigtable::proto::data::row_range::StartKey;
use bigtable::proto::data::{
    CheckAndMutateRowRequest, CheckAndMutateRowResponse, MutateRowRequest, MutateRowResponse,
    MutateRowsRequest, MutateRowsResponse, ReadModifyWriteRowRequest, ReadModifyWriteRowResponse,
    ReadRowsRequest, SampleRowKeysRequest,
};
use bigtable::proto::rpc;
use bigtable::retry::RetrySettings;
use bigtable::transitive;
use bigtable::Client;
use futures::{stream, StreamExt as _, TryStreamExt as _};
use helpers::config;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tonic::transport::Server;
use tonic::{Code, Request, Response, Status};

type RpcResponse<T> = Result<Response<T>, Status>;

/// The failure a [`Faulty`] server injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// The first `MutateRows` call reports its second entry as unavailable.
    SecondEntryUnavailable,
    /// The first `MutateRows` call fails as a whole with a transient status.
    MutateUnavailable,
    /// Every `MutateRows` call is refused.
    MutateDenied,
    /// The first `ReadRows` stream breaks after its first row.
    ReadInterrupted,
    /// Every `ReadRows` call is refused.
    ReadDenied,
}

/// Forwards to an emulator, failing in the way named by `fault`.
#[derive(Debug, Clone)]
struct Faulty {
    inner: Emulator,
    fault: Fault,
    calls: Arc<AtomicUsize>,
    batches: Arc<Mutex<Vec<Vec<Vec<u8>>>>>,
    reads: Arc<Mutex<Vec<ReadRowsRequest>>>,
}

impl Faulty {
    fn new(inner: Emulator, fault: Fault) -> Self {
        Self {
            inner,
            fault,
            calls: Arc::default(),
            batches: Arc::default(),
            reads: Arc::default(),
        }
    }

    /// The row keys carried by each `MutateRows` call, in order.
    fn batches(&self) -> Vec<Vec<String>> {
        self.batches
            .lock()
            .expect("lock")
            .iter()
            .map(|keys| {
                keys.iter()
                    .map(|key| String::from_utf8_lossy(key).into_owned())
                    .collect()
            })
            .collect()
    }

    fn reads(&self) -> Vec<ReadRowsRequest> {
        self.reads.lock().expect("lock").clone()
    }
}

#[tonic::async_trait]
impl Bigtable for Faulty {
    type ReadRowsStream = <Emulator as Bigtable>::ReadRowsStream;
    type SampleRowKeysStream = <Emulator as Bigtable>::SampleRowKeysStream;
    type MutateRowsStream = <Emulator as Bigtable>::MutateRowsStream;

    async fn read_rows(&self, request: Request<ReadRowsRequest>) -> RpcResponse<Self::ReadRowsStream> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.reads.lock().expect("lock").push(request.get_ref().clone());
        if self.fault == Fault::ReadDenied {
            return Err(Status::permission_denied("reads are not allowed"));
        }
        let responses = Bigtable::read_rows(&self.inner, request).await?.into_inner();
        if self.fault == Fault::ReadInterrupted && call == 0 {
            let broken = responses
                .take(1)
                .chain(stream::once(async { Err(Status::unavailable("connection reset")) }));
            return Ok(Response::new(Box::pin(broken)));
        }
        Ok(Response::new(responses))
    }

    async fn sample_row_keys(
        &self,
        request: Request<SampleRowKeysRequest>,
    ) -> RpcResponse<Self::SampleRowKeysStream> {
        Bigtable::sample_row_keys(&self.inner, request).await
    }

    async fn mutate_row(&self, request: Request<MutateRowRequest>) -> RpcResponse<MutateRowResponse> {
        Bigtable::mutate_row(&self.inner, request).await
    }

    async fn mutate_rows(&self, request: Request<MutateRowsRequest>) -> RpcResponse<Self::MutateRowsStream> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let keys = request
            .get_ref()
            .entries
            .iter()
            .map(|entry| entry.row_key.clone())
            .collect();
        self.batches.lock().expect("lock").push(keys);
        match self.fault {
            Fault::MutateDenied => return Err(Status::permission_denied("writes are not allowed")),
            Fault::MutateUnavailable if call == 0 => return Err(Status::unavailable("try again")),
            _ => {}
        }

        let mut responses: Vec<MutateRowsResponse> = Bigtable::mutate_rows(&self.inner, request)
            .await?
            .into_inner()
            .try_collect()
            .await?;
        if self.fault == Fault::SecondEntryUnavailable && call == 0 {
            for entry in responses.iter_mut().flat_map(|response| &mut response.entries) {
                if entry.index == 1 {
                    entry.status = Some(rpc::Status {
                        code: Code::Unavailable as i32,
                        message: "tablet moved".to_owned(),
                        details: Vec::new(),
                    });
                }
            }
        }
        Ok(Response::new(Box::pin(stream::iter(responses.into_iter().map(Ok::<_, Status>)))))
    }

    async fn check_and_mutate_row(
        &self,
        request: Request<CheckAndMutateRowRequest>,
    ) -> RpcResponse<CheckAndMutateRowResponse> {
        Bigtable::check_and_mutate_row(&self.inner, request).await
    }

    async fn read_modify_write_row(
        &self,
        request: Request<ReadModifyWriteRowRequest>,
    ) -> RpcResponse<ReadModifyWriteRowResponse> {
        Bigtable::read_modify_write_row(&self.inner, request).await
    }
}

/// A table `t` with family `f` holding `rows`, and a data client whose calls pass through a
/// [`Faulty`] server.
async fn faulty_fixture(fault: Fault, rows: &[&str]) -> Result<(Faulty, Client)> {
    let admin = transitive::admin_client(config()).await?;
    admin.create_table("t").await?;
    admin.create_column_family("t", "f").await?;

    let direct = Client::with_channel(transitive::channel(admin.emulator()).await?, config());
    let table = direct.open_table("t");
    for key in rows {
        let mut mutation = Mutation::new();
        mutation.set("f", "c", Timestamp::from_micros(1_000), *key);
        let _matched = table.apply(*key, &mutation).await?;
    }

    let faulty = Faulty::new(admin.emulator().clone(), fault);
    let router = Server::builder().add_service(BigtableServer::new(faulty.clone()));
    let retry = RetrySettings {
        initial: Duration::from_millis(1),
        max: Duration::from_millis(5),
        ..RetrySettings::default()
    };
    let client = Client::with_channel(
        transitive::router_channel(router).await?,
        config().with_retry(retry),
    );
    Ok((faulty, client))
}

fn writes(keys: &[&str]) -> Vec<Mutation> {
    keys.iter()
        .map(|key| {
            let mut mutation = Mutation::new();
            mutation.set("f", "c", Timestamp::from_micros(2_000), *key);
            mutation
        })
        .collect()
}

#[tokio::test]
async fn test_bulk_retries_only_failed_entries() -> Result<()> {
    let (faulty, client) = faulty_fixture(Fault::SecondEntryUnavailable, &[]).await?;
    let table = client.open_table("t");
    let keys = ["a", "b", "c"];

    let results = table.apply_bulk(&keys, &writes(&keys)).await?;
    assert!(results.iter().all(Option::is_none), "{results:?}");
    assert_eq!(faulty.batches(), [vec!["a", "b", "c"], vec!["b"]]);

    let rows: Vec<_> = table
        .read_rows(RowSet::all(), ReadOptions::new())
        .try_collect()
        .await?;
    assert_eq!(rows.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_bulk_retries_failed_call() -> Result<()> {
    let (faulty, client) = faulty_fixture(Fault::MutateUnavailable, &[]).await?;
    let keys = ["a", "b"];

    let results = client.open_table("t").apply_bulk(&keys, &writes(&keys)).await?;
    assert!(results.iter().all(Option::is_none), "{results:?}");
    assert_eq!(faulty.batches(), [vec!["a", "b"], vec!["a", "b"]]);
    Ok(())
}

#[tokio::test]
async fn test_bulk_permanent_call_failure_is_an_error() -> Result<()> {
    let (faulty, client) = faulty_fixture(Fault::MutateDenied, &[]).await?;
    let keys = ["a", "b"];

    let err = client
        .open_table("t")
        .apply_bulk(&keys, &writes(&keys))
        .await
        .expect_err("writes are refused");
    assert_eq!(err.code(), Code::PermissionDenied);
    assert_eq!(faulty.batches().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_read_resumes_after_last_row() -> Result<()> {
    let (faulty, client) = faulty_fixture(Fault::ReadInterrupted, &["a", "b", "c", "d"]).await?;

    let rows: Vec<_> = client
        .open_table("t")
        .read_rows(RowSet::all(), ReadOptions::new().with_limit(3))
        .try_collect()
        .await?;
    let keys: Vec<_> = rows
        .iter()
        .map(|row| String::from_utf8_lossy(row.key()).into_owned())
        .collect();
    assert_eq!(keys, ["a", "b", "c"]);

    let reads = faulty.reads();
    assert_eq!(reads.len(), 2);
    assert_eq!(reads[0].rows_limit, 3);
    let resumed = &reads[1];
    assert_eq!(resumed.rows_limit, 2);
    let ranges = &resumed.rows.as_ref().expect("row set is sent").row_ranges;
    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].start_key, Some(StartKey::StartKeyOpen(b"a".to_vec())));
    assert_eq!(ranges[0].end_key, None);
    Ok(())
}

#[tokio::test]
async fn test_read_permanent_failure_is_an_error() -> Result<()> {
    let (faulty, client) = faulty_fixture(Fault::ReadDenied, &["a"]).await?;

    let err = client
        .open_table("t")
        .read_rows(RowSet::all(), ReadOptions::new())
        .try_collect::<Vec<_>>()
        .await
        .expect_err("reads are refused");
    assert_eq!(err.code(), Code::PermissionDenied);
    assert_eq!(faulty.reads().len(), 1);
    Ok(())
}
