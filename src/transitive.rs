//! In-process connections to an [`Emulator`].
//!
//! The emulator is served over one end of an in-memory pipe and the returned channel is bound to
//! the other end, so no socket is opened. Each call to [`channel`] spawns its own server task; all
//! of them share the emulator's state.

use crate::emulator::Emulator;
use crate::{AdminClient, Client, ClientConfig, InstanceAdminClient, Result};
use hyper_util::rt::TokioIo;
use std::ops::{Deref, DerefMut};
use tonic::transport::server::Router;
use tonic::transport::{Channel, Endpoint};

const DUPLEX_SIZE: usize = 64 * 1024;

/// Open a channel to `emulator`. The server task ends when the channel is dropped.
pub async fn channel(emulator: &Emulator) -> Result<Channel> {
    router_channel(emulator.clone().into_router()).await
}

/// Open a channel to any set of services, such as one wrapping an [`Emulator`].
pub async fn router_channel(router: Router) -> Result<Channel> {
    let (client, server) = tokio::io::duplex(DUPLEX_SIZE);

    let _join_handle = tokio::spawn(async move {
        router
            .serve_with_incoming(tokio_stream::once(Ok::<_, std::io::Error>(server)))
            .await
    });

    let mut client = Some(client);
    let channel = Endpoint::try_from("http://[::]:50051")?
        .connect_with_connector(tower::service_fn(move |_| {
            let client = client.take();
            async move {
                if let Some(client) = client {
                    Ok(TokioIo::new(client))
                } else {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "Client already taken",
                    ))
                }
            }
        }))
        .await?;
    Ok(channel)
}

/// A client connected to an emulator of its own.
#[derive(Debug)]
pub struct Transitive<T> {
    client: T,
    emulator: Emulator,
}

impl<T> Transitive<T> {
    /// The emulator behind the client. Connect more clients to it with [`channel`].
    pub const fn emulator(&self) -> &Emulator {
        &self.emulator
    }
}

impl<T> Deref for Transitive<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl<T> DerefMut for Transitive<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.client
    }
}

macro_rules! declare_clients {
    ($($(#[$attr:meta])* fn $fn_name:ident<$client:ident>;)*) => {$(
        $(#[$attr])*
        pub async fn $fn_name(config: ClientConfig) -> Result<Transitive<$client>> {
            let emulator = Emulator::new();
            let channel = channel(&emulator).await?;
            Ok(Transitive {
                client: $client::with_channel(channel, config),
                emulator,
            })
        }
    )*};
}

declare_clients! {
    /// A table administration client backed by a fresh emulator.
    fn admin_client<AdminClient>;
    /// An instance administration client backed by a fresh emulator.
    fn instance_admin_client<InstanceAdminClient>;
    /// A data client backed by a fresh emulator.
    fn data_client<Client>;
}
