#![allow(
    missing_docs,
    clippy::missing_docs_in_private_items,
    unused_results,
    clippy::unwrap_used
)]

use crate::mutations::seeded_client;
use bigtable::data::{
    chain_filters, column_filter, family_filter, interleave_filters, latest_n_filter,
    value_range_filter, Filter, Mutation, ReadOptions, RowSet, Timestamp,
};
use criterion::{black_box, criterion_group, Criterion};
use futures::TryStreamExt as _;

const ROWS: usize = 200;

fn read_with_filter(c: &mut Criterion, name: &str, filter: Option<Filter>) {
    let runtime = super::create_runtime();
    let (_admin, client) = runtime.block_on(async {
        let (admin, client) = seeded_client(&["f", "g"]).await;
        let table = client.open_table("t");
        let keys: Vec<String> = (0..ROWS).map(|i| format!("row{i:05}")).collect();
        let mutations: Vec<Mutation> = (0..ROWS)
            .map(|i| {
                let mut mutation = Mutation::new();
                for version in 1..=3 {
                    let ts = Timestamp::from_micros(version * 1_000);
                    mutation.set("f", format!("c{}", i % 7), ts, format!("value{i}"));
                    mutation.set("g", "c", ts, format!("other{version}"));
                }
                mutation
            })
            .collect();
        table.apply_bulk(&keys, &mutations).await.unwrap();
        (admin, client)
    });
    let table = client.open_table("t");
    let options = filter.map_or_else(ReadOptions::new, |filter| ReadOptions::new().with_filter(filter));

    c.bench_function(name, |b| {
        b.to_async(&runtime).iter(|| {
            let table = table.clone();
            let options = options.clone();
            async move {
                let rows: Vec<_> = table
                    .read_rows(RowSet::all(), options)
                    .try_collect()
                    .await
                    .unwrap();
                black_box(rows);
            }
        });
    });
}

fn read_unfiltered(c: &mut Criterion) {
    read_with_filter(c, "read_rows_unfiltered", None);
}

fn read_latest(c: &mut Criterion) {
    read_with_filter(c, "read_rows_latest_only", Some(latest_n_filter(1)));
}

fn read_chain(c: &mut Criterion) {
    read_with_filter(
        c,
        "read_rows_chain",
        Some(chain_filters([
            family_filter("f"),
            column_filter("c[0-3]"),
            latest_n_filter(1),
        ])),
    );
}

fn read_interleave(c: &mut Criterion) {
    read_with_filter(
        c,
        "read_rows_interleave",
        Some(interleave_filters([
            family_filter("g"),
            value_range_filter("value1", "value5"),
        ])),
    );
}

criterion_group!(filters, read_unfiltered, read_latest, read_chain, read_interleave);
