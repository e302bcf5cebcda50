//! Waiting on long-running operations.

use crate::proto::longrunning::operations_client::OperationsClient;
use crate::proto::longrunning::{operation, GetOperationRequest, Operation};
use crate::retry::{self, RetrySettings};
use crate::tracing_shim::trace;
use crate::{resource, Error, Result};
use std::time::Duration;
use tonic::transport::Channel;
use tonic::{Code, Status};

/// Polls operations on the service that started them until they finish.
#[derive(Debug, Clone)]
pub(crate) struct OperationPoller {
    client: OperationsClient<Channel>,
    prefix: String,
    interval: Duration,
    retry: RetrySettings,
}

impl OperationPoller {
    pub(crate) fn new(
        channel: Channel,
        prefix: String,
        interval: Duration,
        retry: RetrySettings,
    ) -> Self {
        Self {
            client: OperationsClient::new(channel),
            prefix,
            interval,
            retry,
        }
    }

    /// Wait for `operation` to finish, then decode its response.
    pub(crate) async fn wait<T>(&self, mut operation: Operation) -> Result<T>
    where
        T: prost::Message + Default,
    {
        while !operation.done {
            trace!(name = %operation.name, "operation still running");
            tokio::time::sleep(self.interval).await;
            let name = operation.name.clone();
            operation = retry::invoke(&self.retry, || {
                let mut client = self.client.clone();
                let request = resource::request(GetOperationRequest { name: name.clone() }, &self.prefix);
                async move { client.get_operation(request).await.map(tonic::Response::into_inner) }
            })
            .await?;
        }
        finish(operation)
    }
}

/// Extract the outcome of a finished operation.
pub(crate) fn finish<T>(operation: Operation) -> Result<T>
where
    T: prost::Message + Default,
{
    match operation.result {
        Some(operation::Result::Error(status)) => Err(Error::Operation(Status::new(
            Code::from(status.code),
            status.message,
        ))),
        Some(operation::Result::Response(any)) => Ok(T::decode(any.value.as_slice())?),
        None => Ok(T::default()),
    }
}

/// Pack a finished operation around a response, as the emulator reports them.
pub(crate) fn completed<T>(name: String, type_url: &str, response: &T) -> Operation
where
    T: prost::Message,
{
    Operation {
        name,
        metadata: None,
        done: true,
        result: Some(operation::Result::Response(prost_types::Any {
            type_url: type_url.to_owned(),
            value: response.encode_to_vec(),
        })),
    }
}
