//! A typed client for a Bigtable-compatible wide-column database, with an in-memory emulator.
//!
//! - [`AdminClient`] manages tables, column families, backups, snapshots, authorized views and
//!   schema bundles.
//! - [`InstanceAdminClient`] manages instances, clusters, app profiles and SQL views.
//! - [`Client`] reads and writes rows through a [`Table`].
//! - [`emulator::Emulator`] serves all of the above from memory, either on a socket or in-process
//!   through [`transitive`].
//!
//! ```no_run
//! # async fn run() -> bigtable::Result<()> {
//! use bigtable::data::{Mutation, ReadOptions};
//!
//! let config = bigtable::ClientConfig::from_env("my-project", "my-instance");
//! let client = bigtable::Client::connect(config).await?;
//! let table = client.open_table("users");
//! let mut mutation = Mutation::new();
//! mutation.set("profile", "name", bigtable::data::SERVER_TIME, "Ada");
//! table.apply("user#1", &mutation).await?;
//! let row = table.read_row("user#1", ReadOptions::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod config;
pub(crate) mod conv;
pub mod data;
pub mod emulator;
mod error;
pub mod gc;
pub mod iam;
pub mod instance;
mod internal_macros;
mod operation;
mod pager;
pub mod proto;
pub mod resource;
pub mod retry;
mod tracing_shim;
pub mod transitive;
pub mod types;

/// The result of a server-side RPC handler.
pub type RpcResponse<T> = Result<tonic::Response<T>, tonic::Status>;

pub use self::admin::{AdminClient, DeletionProtection};
pub use self::config::ClientConfig;
pub use self::data::{Client, Table};
pub use self::error::{Error, Result};
pub use self::instance::InstanceAdminClient;
