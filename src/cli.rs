//! Command-line interface for the Bigtable client and emulator.

use std::net::SocketAddr;

use clap::{Parser, Subcommand};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(version, propagate_version = true)]
pub(crate) struct Args {
    /// The project that owns the instance.
    #[arg(long, env = "BIGTABLE_PROJECT", default_value = "project")]
    pub(crate) project: String,
    /// The instance to operate on.
    #[arg(long, env = "BIGTABLE_INSTANCE", default_value = "instance")]
    pub(crate) instance: String,
    /// Connect to this endpoint instead of the production service. `BIGTABLE_EMULATOR_HOST` is
    /// honored when this is not given.
    #[arg(long)]
    pub(crate) endpoint: Option<String>,
    /// The operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// What operation to perform.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Run the in-memory emulator.
    ///
    /// The emulator keeps everything in memory and listens on the given address until it is
    /// stopped.
    #[clap(alias = "run")]
    Serve {
        /// The address to listen on.
        #[clap(default_value = "[::1]:8086")]
        addr: SocketAddr,
    },
    /// List tables.
    Ls,
    /// Create a table.
    #[clap(name = "createtable")]
    CreateTable {
        /// The table id.
        table: String,
        /// Column families to create along with the table.
        #[clap(long = "family")]
        families: Vec<String>,
    },
    /// Delete a table.
    #[clap(name = "deletetable")]
    DeleteTable {
        /// The table id.
        table: String,
    },
    /// Create a column family.
    #[clap(name = "createfamily")]
    CreateFamily {
        /// The table id.
        table: String,
        /// The family name.
        family: String,
    },
    /// Delete a column family and every cell in it.
    #[clap(name = "deletefamily")]
    DeleteFamily {
        /// The table id.
        table: String,
        /// The family name.
        family: String,
    },
    /// Set the garbage-collection policy of a column family.
    ///
    /// The policy is `never`, `maxage=<duration>`, `maxversions=<n>`, or several of the latter
    /// joined by `and` or `or`.
    #[clap(name = "setgcpolicy")]
    SetGcPolicy {
        /// The table id.
        table: String,
        /// The family name.
        family: String,
        /// The policy.
        policy: String,
    },
    /// Show the column families of a table.
    #[clap(name = "tableinfo", alias = "ls-families")]
    TableInfo {
        /// The table id.
        table: String,
    },
    /// Write cells to a row.
    Set {
        /// The table id.
        table: String,
        /// The row key.
        row: String,
        /// Cells as `family:qualifier=value`.
        #[clap(required = true)]
        cells: Vec<String>,
    },
    /// Print one row.
    Lookup {
        /// The table id.
        table: String,
        /// The row key.
        row: String,
    },
    /// Print rows in key order.
    Read {
        /// The table id.
        table: String,
        /// Only read rows starting with this prefix.
        #[clap(long)]
        prefix: Option<String>,
        /// Stop after this many rows.
        #[clap(long)]
        limit: Option<u64>,
    },
    /// Delete a row.
    #[clap(name = "deleterow")]
    DeleteRow {
        /// The table id.
        table: String,
        /// The row key.
        row: String,
    },
    /// Count the rows of a table.
    Count {
        /// The table id.
        table: String,
    },
    /// List instances of the project.
    Instances,
    /// List clusters of an instance.
    Clusters {
        /// The instance id. Defaults to `--instance`.
        instance: Option<String>,
    },
}
