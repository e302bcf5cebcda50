//! A command-line tool for Bigtable-compatible servers, and a way to run the in-memory emulator.
//!
//! For usage, run `cargo run --features binary -- --help`.

mod cli;

use crate::cli::{Args, Command};
use bigtable::admin::{Family, TableConf};
use bigtable::data::{Mutation, ReadOptions, Row, RowRange, RowSet, SERVER_TIME};
use bigtable::emulator::Emulator;
use bigtable::gc::GcPolicy;
use bigtable::{AdminClient, Client, ClientConfig, InstanceAdminClient};
use clap::Parser as _;
use futures::StreamExt as _;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// A custom error message.
#[derive(Debug)]
struct ErrStr(String);

impl std::error::Error for ErrStr {}

impl std::fmt::Display for ErrStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Args {
        project,
        instance,
        endpoint,
        command,
    } = Args::parse();

    let config = match endpoint {
        Some(endpoint) => ClientConfig::new(project, instance).with_endpoint(endpoint),
        None => ClientConfig::from_env(project, instance),
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config, command))
}

async fn run(config: ClientConfig, command: Command) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Command::Serve { addr } => Emulator::new().serve(addr).await?,
        Command::Ls => {
            let admin = AdminClient::connect(config).await?;
            for table in admin.tables().await? {
                #[allow(clippy::print_stdout)]
                {
                    println!("{table}");
                }
            }
        }
        Command::CreateTable { table, families } => {
            let admin = AdminClient::connect(config).await?;
            let mut conf = TableConf::new(table);
            conf.column_families = families
                .into_iter()
                .map(|family| (family, Family::default()))
                .collect();
            admin.create_table_from_conf(conf).await?;
        }
        Command::DeleteTable { table } => {
            AdminClient::connect(config).await?.delete_table(&table).await?;
        }
        Command::CreateFamily { table, family } => {
            let admin = AdminClient::connect(config).await?;
            admin.create_column_family(&table, &family).await?;
        }
        Command::DeleteFamily { table, family } => {
            let admin = AdminClient::connect(config).await?;
            admin.delete_column_family(&table, &family).await?;
        }
        Command::SetGcPolicy {
            table,
            family,
            policy,
        } => {
            let policy: GcPolicy = policy.parse()?;
            let admin = AdminClient::connect(config).await?;
            admin.set_gc_policy(&table, &family, policy).await?;
        }
        Command::TableInfo { table } => {
            let info = AdminClient::connect(config).await?.table_info(&table).await?;
            #[allow(clippy::print_stdout)]
            for family in info.family_infos {
                println!("{}\t{}", family.name, family.gc_policy);
            }
        }
        Command::Set { table, row, cells } => {
            let mut mutation = Mutation::new();
            for cell in &cells {
                let (family, qualifier, value) = parse_cell(cell)?;
                mutation.set(family, qualifier, SERVER_TIME, value);
            }
            let client = Client::connect(config).await?;
            let _matched = client.open_table(&table).apply(row, &mutation).await?;
        }
        Command::Lookup { table, row } => {
            let client = Client::connect(config).await?;
            match client.open_table(&table).read_row(row, ReadOptions::new()).await? {
                Some(row) => print_row(&row),
                None => return Ok(ExitCode::FAILURE),
            }
        }
        Command::Read {
            table,
            prefix,
            limit,
        } => {
            let rows = match prefix {
                Some(prefix) => RowSet::from(RowRange::prefix(prefix)),
                None => RowSet::from(RowRange::all()),
            };
            let mut options = ReadOptions::new();
            if let Some(limit) = limit {
                options = options.with_limit(limit);
            }
            let client = Client::connect(config).await?;
            let mut rows = client.open_table(&table).read_rows(rows, options);
            while let Some(row) = rows.next().await {
                print_row(&row?);
            }
        }
        Command::DeleteRow { table, row } => {
            let mut mutation = Mutation::new();
            mutation.delete_row();
            let client = Client::connect(config).await?;
            let _matched = client.open_table(&table).apply(row, &mutation).await?;
        }
        Command::Count { table } => {
            let client = Client::connect(config).await?;
            let options = ReadOptions::new().with_filter(bigtable::data::strip_value_filter());
            let mut rows = client.open_table(&table).read_rows(RowRange::all().into(), options);
            let mut count = 0_u64;
            while let Some(row) = rows.next().await {
                let _row = row?;
                count += 1;
            }
            #[allow(clippy::print_stdout)]
            {
                println!("{count}");
            }
        }
        Command::Instances => {
            let admin = InstanceAdminClient::connect(config).await?;
            let listing = admin.instances().await?;
            #[allow(clippy::print_stdout)]
            for instance in &listing.items {
                println!("{}\t{}", instance.name, instance.display_name);
            }
            warn_unavailable(&listing.unavailable_locations);
        }
        Command::Clusters { instance } => {
            let instance = instance.unwrap_or_else(|| config.instance.clone());
            let admin = InstanceAdminClient::connect(config).await?;
            let listing = admin.clusters(&instance).await?;
            #[allow(clippy::print_stdout)]
            for cluster in &listing.items {
                println!(
                    "{}\t{}\t{}\t{:?}",
                    cluster.name, cluster.zone, cluster.serve_nodes, cluster.state
                );
            }
            warn_unavailable(&listing.unavailable_locations);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Split `family:qualifier=value`.
fn parse_cell(cell: &str) -> Result<(&str, &str, &str), ErrStr> {
    let (column, value) = cell
        .split_once('=')
        .ok_or_else(|| ErrStr(format!("expected family:qualifier=value, got {cell:?}")))?;
    let (family, qualifier) = column
        .split_once(':')
        .ok_or_else(|| ErrStr(format!("expected family:qualifier, got {column:?}")))?;
    Ok((family, qualifier, value))
}

/// Print a row key followed by one indented line per cell.
#[allow(clippy::print_stdout)]
fn print_row(row: &Row) {
    println!("{}", String::from_utf8_lossy(row.key()));
    for cell in row.cells() {
        println!(
            "  {} @ {}\n    {:?}",
            cell.column,
            cell.timestamp.micros(),
            String::from_utf8_lossy(&cell.value)
        );
    }
}

#[allow(clippy::print_stderr)]
fn warn_unavailable(locations: &[String]) {
    if !locations.is_empty() {
        eprintln!("unavailable locations: {}", locations.join(", "));
    }
}
