mod helpers;

use anyhow::Result;
use bigtable::admin::{AuthorizedViewConf, Family, SubsetViewConf};
use bigtable::data::{
    chain_filters, column_filter, family_filter, latest_n_filter, value_filter, Mutation,
    ReadModifyWrite, ReadOptions, RowRange, RowSet, Timestamp, SERVER_TIME,
};
use bigtable::types::{Aggregator, ValueType};
use bigtable::DeletionProtection;
use futures::TryStreamExt as _;
use helpers::{table_fixture, values};
use tonic::Code;

fn set(family: &str, column: &str, value: &str) -> Mutation {
    let mut mutation = Mutation::new();
    mutation.set(family, column, SERVER_TIME, value);
    mutation
}

#[tokio::test]
async fn test_apply_and_read_row() -> Result<()> {
    let (_admin, client) = table_fixture("users", &["profile"]).await?;
    let table = client.open_table("users");

    let mut mutation = Mutation::new();
    mutation.set("profile", "name", SERVER_TIME, "Ada");
    mutation.set("profile", "lang", SERVER_TIME, "en");
    assert_eq!(table.apply("user#1", &mutation).await?, None);

    let row = table
        .read_row("user#1", ReadOptions::new())
        .await?
        .expect("row was written");
    assert_eq!(row.key(), b"user#1");
    assert_eq!(values(&row), ["en", "Ada"]);
    assert_eq!(
        row.latest("profile", "name").map(|cell| cell.value.as_slice()),
        Some(&b"Ada"[..])
    );

    assert!(table.read_row("user#2", ReadOptions::new()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_unknown_family_is_rejected() -> Result<()> {
    let (_admin, client) = table_fixture("t", &["f"]).await?;
    let err = client
        .open_table("t")
        .apply("r", &set("missing", "c", "v"))
        .await
        .expect_err("family does not exist");
    assert_eq!(err.code(), Code::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_read_rows_ranges_and_limits() -> Result<()> {
    let (_admin, client) = table_fixture("t", &["f"]).await?;
    let table = client.open_table("t");
    for key in ["a1", "a2", "a3", "b1", "c1"] {
        let _matched = table.apply(key, &set("f", "c", key)).await?;
    }

    let keys = |rows: Vec<bigtable::data::Row>| {
        rows.iter()
            .map(|row| String::from_utf8_lossy(row.key()).into_owned())
            .collect::<Vec<_>>()
    };

    let prefixed: Vec<_> = table
        .read_rows(RowRange::prefix("a").into(), ReadOptions::new())
        .try_collect()
        .await?;
    assert_eq!(keys(prefixed), ["a1", "a2", "a3"]);

    let limited: Vec<_> = table
        .read_rows(RowSet::all(), ReadOptions::new().with_limit(2))
        .try_collect()
        .await?;
    assert_eq!(keys(limited), ["a1", "a2"]);

    let reversed: Vec<_> = table
        .read_rows(RowSet::all(), ReadOptions::new().reversed().with_limit(3))
        .try_collect()
        .await?;
    assert_eq!(keys(reversed), ["c1", "b1", "a3"]);

    let picked: Vec<_> = table
        .read_rows(RowSet::keys(["b1", "a2", "zz"]), ReadOptions::new())
        .try_collect()
        .await?;
    assert_eq!(keys(picked), ["a2", "b1"]);

    let half_open: Vec<_> = table
        .read_rows(RowRange::new("a2", "b1").into(), ReadOptions::new())
        .try_collect()
        .await?;
    assert_eq!(keys(half_open), ["a2", "a3"]);
    Ok(())
}

#[tokio::test]
async fn test_filters() -> Result<()> {
    let (_admin, client) = table_fixture("t", &["f", "g"]).await?;
    let table = client.open_table("t");

    let mut mutation = Mutation::new();
    mutation.set("f", "c", Timestamp::from_micros(1_000), "old");
    mutation.set("f", "c", Timestamp::from_micros(2_000), "new");
    mutation.set("f", "d", Timestamp::from_micros(1_000), "other");
    mutation.set("g", "c", Timestamp::from_micros(1_000), "elsewhere");
    let _matched = table.apply("r", &mutation).await?;

    let read = |filter| {
        let table = table.clone();
        async move {
            table
                .read_row("r", ReadOptions::new().with_filter(filter))
                .await
        }
    };

    let latest = read(latest_n_filter(1)).await?.expect("row exists");
    assert_eq!(values(&latest), ["new", "other", "elsewhere"]);

    let family = read(family_filter("g")).await?.expect("row exists");
    assert_eq!(values(&family), ["elsewhere"]);

    let chained = read(chain_filters([family_filter("f"), column_filter("c")]))
        .await?
        .expect("row exists");
    assert_eq!(values(&chained), ["new", "old"]);

    assert!(read(value_filter("absent")).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_binary_qualifiers_round_trip() -> Result<()> {
    let (_admin, client) = table_fixture("t", &["f"]).await?;
    let table = client.open_table("t");

    let mut mutation = Mutation::new();
    mutation.set("f", vec![0xff_u8], SERVER_TIME, "high");
    mutation.set("f", vec![0xfe_u8], SERVER_TIME, "low");
    let _matched = table.apply("r", &mutation).await?;

    let row = table
        .read_row("r", ReadOptions::new())
        .await?
        .expect("row was written");
    let qualifiers: Vec<_> = row.cells().map(|cell| cell.qualifier.clone()).collect();
    assert_eq!(qualifiers, [vec![0xfe_u8], vec![0xff_u8]]);
    assert_eq!(
        row.latest("f", [0xff_u8]).map(|cell| cell.value.as_slice()),
        Some(&b"high"[..])
    );
    assert_eq!(
        row.latest("f", [0xfe_u8]).map(|cell| cell.value.as_slice()),
        Some(&b"low"[..])
    );
    Ok(())
}

#[tokio::test]
async fn test_conditional_mutation() -> Result<()> {
    let (_admin, client) = table_fixture("t", &["f"]).await?;
    let table = client.open_table("t");
    let _matched = table.apply("r", &set("f", "state", "open")).await?;

    let mutation = Mutation::conditional(
        chain_filters([latest_n_filter(1), value_filter("open")]),
        Some(set("f", "state", "closed")),
        Some(set("f", "state", "reopened")),
    );
    assert_eq!(table.apply("r", &mutation).await?, Some(true));
    let row = table
        .read_row("r", ReadOptions::new().with_filter(latest_n_filter(1)))
        .await?
        .expect("row exists");
    assert_eq!(values(&row), ["closed"]);

    assert_eq!(table.apply("r", &mutation).await?, Some(false));
    let row = table
        .read_row("r", ReadOptions::new().with_filter(latest_n_filter(1)))
        .await?
        .expect("row exists");
    assert_eq!(values(&row), ["reopened"]);
    Ok(())
}

#[tokio::test]
async fn test_apply_bulk_reports_each_entry() -> Result<()> {
    let (_admin, client) = table_fixture("t", &["f"]).await?;
    let table = client.open_table("t");

    let keys = ["a", "b", "c"];
    let mutations = [set("f", "c", "1"), set("missing", "c", "2"), set("f", "c", "3")];
    let results = table.apply_bulk(&keys, &mutations).await?;
    assert!(results[0].is_none());
    assert_eq!(
        results[1].as_ref().map(tonic::Status::code),
        Some(Code::NotFound)
    );
    assert!(results[2].is_none());

    let rows: Vec<_> = table
        .read_rows(RowSet::all(), ReadOptions::new())
        .try_collect()
        .await?;
    assert_eq!(rows.len(), 2);

    let err = table
        .apply_bulk(&keys[..1], &mutations)
        .await
        .expect_err("lengths differ");
    assert_eq!(err.code(), Code::InvalidArgument);
    Ok(())
}

#[tokio::test]
async fn test_delete_row() -> Result<()> {
    let (_admin, client) = table_fixture("t", &["f"]).await?;
    let table = client.open_table("t");
    let _matched = table.apply("r", &set("f", "c", "v")).await?;

    let mut mutation = Mutation::new();
    mutation.delete_row();
    let _matched = table.apply("r", &mutation).await?;
    assert!(table.read_row("r", ReadOptions::new()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_read_modify_write() -> Result<()> {
    let (_admin, client) = table_fixture("t", &["f"]).await?;
    let table = client.open_table("t");

    let mut rules = ReadModifyWrite::new();
    rules.increment("f", "counter", 2);
    rules.append_value("f", "log", "a");
    let _row = table.apply_read_modify_write("r", &rules).await?;
    let row = table.apply_read_modify_write("r", &rules).await?;

    let counter = row.latest("f", "counter").expect("counter was written");
    assert_eq!(counter.value, 4_i64.to_be_bytes());
    let log = row.latest("f", "log").expect("log was written");
    assert_eq!(log.value, b"aa");
    Ok(())
}

#[tokio::test]
async fn test_aggregate_family() -> Result<()> {
    let (admin, client) = table_fixture("t", &[]).await?;
    admin
        .create_column_family_with_config(
            "t",
            "sum",
            Family {
                value_type: Some(ValueType::int64_aggregate(Aggregator::Sum)),
                ..Family::default()
            },
        )
        .await?;
    let table = client.open_table("t");

    for delta in [5, 7] {
        let mut mutation = Mutation::new();
        mutation.add_int_to_cell("sum", "total", Timestamp::from_micros(1_000), delta);
        let _matched = table.apply("r", &mutation).await?;
    }
    let row = table
        .read_row("r", ReadOptions::new())
        .await?
        .expect("row exists");
    let total = row.latest("sum", "total").expect("cell was written");
    assert_eq!(total.value, 12_i64.to_be_bytes());
    Ok(())
}

#[tokio::test]
async fn test_sample_row_keys_end_with_empty_key() -> Result<()> {
    let (_admin, client) = table_fixture("t", &["f"]).await?;
    let table = client.open_table("t");
    for key in ["a", "b", "c"] {
        let _matched = table.apply(key, &set("f", "c", "value")).await?;
    }
    let keys = table.sample_row_keys().await?;
    assert_eq!(keys.last().map(Vec::as_slice), Some(&b""[..]));
    Ok(())
}

#[tokio::test]
async fn test_authorized_view_limits_reads_and_writes() -> Result<()> {
    let (admin, client) = table_fixture("t", &["f"]).await?;
    let table = client.open_table("t");
    let _matched = table.apply("public#1", &set("f", "name", "visible")).await?;
    let _matched = table.apply("public#1", &set("f", "secret", "hidden")).await?;
    let _matched = table.apply("private#1", &set("f", "name", "hidden")).await?;

    let mut subset = SubsetViewConf::default();
    subset.add_row_prefix("public#");
    subset.add_family_subset_qualifier("f", "name");
    admin
        .create_authorized_view(&AuthorizedViewConf {
            table_id: "t".to_owned(),
            authorized_view_id: "public".to_owned(),
            subset_view: Some(subset),
            deletion_protection: DeletionProtection::Unprotected,
        })
        .await?;

    let view = client.open_authorized_view("t", "public");
    let rows: Vec<_> = view
        .read_rows(RowSet::all(), ReadOptions::new())
        .try_collect()
        .await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(values(&rows[0]), ["visible"]);

    let _matched = view.apply("public#2", &set("f", "name", "ok")).await?;
    let err = view
        .apply("private#2", &set("f", "name", "no"))
        .await
        .expect_err("row is outside the view");
    assert_eq!(err.code(), Code::PermissionDenied);
    Ok(())
}
