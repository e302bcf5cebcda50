#![allow(dead_code)]

use anyhow::Result;
use bigtable::data::Row;
use bigtable::transitive::{self, Transitive};
use bigtable::{AdminClient, Client, ClientConfig};

pub(crate) const PROJECT: &str = "project";
pub(crate) const INSTANCE: &str = "instance";

pub(crate) fn config() -> ClientConfig {
    ClientConfig::new(PROJECT, INSTANCE)
}

/// An admin client and a data client sharing one emulator, with `table` created holding
/// `families`.
pub(crate) async fn table_fixture(
    table: &str,
    families: &[&str],
) -> Result<(Transitive<AdminClient>, Client)> {
    let admin = transitive::admin_client(config()).await?;
    admin.create_table(table).await?;
    for family in families {
        admin.create_column_family(table, family).await?;
    }
    let client = Client::with_channel(transitive::channel(admin.emulator()).await?, config());
    Ok((admin, client))
}

/// The values of a row's cells in read order, as strings.
pub(crate) fn values(row: &Row) -> Vec<String> {
    row.cells()
        .map(|cell| String::from_utf8_lossy(&cell.value).into_owned())
        .collect()
}
