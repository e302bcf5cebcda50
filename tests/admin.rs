mod helpers;

use anyhow::Result;
use bigtable::admin::{
    AuthorizedViewConf, Family, SchemaBundleConf, SubsetViewConf, TableConf,
    UpdateAuthorizedViewConf,
};
use bigtable::data::{Mutation, ReadOptions, RowSet, SERVER_TIME};
use bigtable::gc::GcPolicy;
use bigtable::transitive::admin_client;
use bigtable::DeletionProtection;
use futures::TryStreamExt as _;
use helpers::{config, table_fixture};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};
use tonic::Code;

#[tokio::test]
async fn test_table_lifecycle() -> Result<()> {
    let admin = admin_client(config()).await?;
    assert!(admin.tables().await?.is_empty());

    admin.create_table("b").await?;
    admin.create_table("a").await?;
    assert_eq!(admin.tables().await?, ["a", "b"]);

    let err = admin.create_table("a").await.expect_err("table exists");
    assert_eq!(err.code(), Code::AlreadyExists);

    admin.delete_table("a").await?;
    assert_eq!(admin.tables().await?, ["b"]);
    let err = admin.table_info("a").await.expect_err("table was deleted");
    assert_eq!(err.code(), Code::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_create_table_from_conf() -> Result<()> {
    let admin = admin_client(config()).await?;
    let mut conf = TableConf::new("t");
    conf.column_families = BTreeMap::from([
        ("f".to_owned(), Family::default()),
        (
            "g".to_owned(),
            Family {
                gc_policy: Some(GcPolicy::MaxVersions(2)),
                ..Family::default()
            },
        ),
    ]);
    conf.deletion_protection = DeletionProtection::Protected;
    admin.create_table_from_conf(conf).await?;

    let info = admin.table_info("t").await?;
    assert_eq!(info.families, ["f", "g"]);
    assert_eq!(info.family_infos[1].full_gc_policy, GcPolicy::MaxVersions(2));
    assert_eq!(info.deletion_protection, DeletionProtection::Protected);

    let err = admin.delete_table("t").await.expect_err("table is protected");
    assert_eq!(err.code(), Code::FailedPrecondition);

    admin
        .update_table_with_deletion_protection("t", DeletionProtection::Unprotected)
        .await?;
    admin.delete_table("t").await?;
    Ok(())
}

#[tokio::test]
async fn test_column_families() -> Result<()> {
    let (admin, client) = table_fixture("t", &["f", "g"]).await?;

    let policy: GcPolicy = "maxage=1h or maxversions=3".parse()?;
    admin.set_gc_policy("t", "f", policy.clone()).await?;
    let info = admin.table_info("t").await?;
    assert_eq!(info.family_infos[0].full_gc_policy, policy);
    assert_eq!(info.family_infos[0].gc_policy, policy.to_string());

    let mut mutation = Mutation::new();
    mutation.set("g", "c", SERVER_TIME, "v");
    let _matched = client.open_table("t").apply("r", &mutation).await?;

    admin.delete_column_family("t", "g").await?;
    assert_eq!(admin.table_info("t").await?.families, ["f"]);
    assert!(client
        .open_table("t")
        .read_row("r", ReadOptions::new())
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
async fn test_drop_row_range() -> Result<()> {
    let (admin, client) = table_fixture("t", &["f"]).await?;
    let table = client.open_table("t");
    for key in ["a1", "a2", "b1"] {
        let mut mutation = Mutation::new();
        mutation.set("f", "c", SERVER_TIME, key);
        let _matched = table.apply(key, &mutation).await?;
    }

    admin.drop_row_range("t", b"a").await?;
    let rows: Vec<_> = table
        .read_rows(RowSet::all(), ReadOptions::new())
        .try_collect()
        .await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key(), b"b1");

    admin.drop_all_rows("t").await?;
    let rows: Vec<_> = table
        .read_rows(RowSet::all(), ReadOptions::new())
        .try_collect()
        .await?;
    assert!(rows.is_empty());

    admin.wait_for_replication("t").await?;
    Ok(())
}

#[tokio::test]
async fn test_backup_and_restore() -> Result<()> {
    let (admin, client) = table_fixture("t", &["f"]).await?;
    let mut mutation = Mutation::new();
    mutation.set("f", "c", SERVER_TIME, "kept");
    let _matched = client.open_table("t").apply("r", &mutation).await?;

    let expire_time = SystemTime::now() + Duration::from_secs(24 * 60 * 60);
    admin.create_backup("t", "c1", "b1", expire_time).await?;

    let info = admin.backup_info("c1", "b1").await?;
    assert_eq!(info.name, "b1");
    assert_eq!(info.source_table, "t");
    let listed: Vec<_> = admin.backups("c1").try_collect().await?;
    assert_eq!(listed.len(), 1);

    let err = admin
        .create_backup("t", "c1", "b2", SystemTime::now() - Duration::from_secs(60))
        .await
        .expect_err("expire time is in the past");
    assert_eq!(err.code(), Code::InvalidArgument);

    admin.restore_table("restored", "c1", "b1").await?;
    let row = client
        .open_table("restored")
        .read_row("r", ReadOptions::new())
        .await?
        .expect("row was restored");
    assert_eq!(row.cells().count(), 1);

    admin.delete_backup("c1", "b1").await?;
    let err = admin.backup_info("c1", "b1").await.expect_err("backup was deleted");
    assert_eq!(err.code(), Code::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_snapshots() -> Result<()> {
    let (admin, _client) = table_fixture("t", &["f"]).await?;
    admin
        .snapshot_table("t", "c1", "s1", Duration::from_secs(3600))
        .await?;

    let info = admin.snapshot_info("c1", "s1").await?;
    assert_eq!(info.name, "s1");
    assert_eq!(info.source_table, "t");

    admin.create_table_from_snapshot("copy", "c1", "s1").await?;
    assert_eq!(admin.table_info("copy").await?.families, ["f"]);

    let listed: Vec<_> = admin.snapshots("-").try_collect().await?;
    assert_eq!(listed.len(), 1);
    admin.delete_snapshot("c1", "s1").await?;
    let listed: Vec<_> = admin.snapshots("c1").try_collect().await?;
    assert!(listed.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_authorized_view_management() -> Result<()> {
    let (admin, _client) = table_fixture("t", &["f"]).await?;
    let mut subset = SubsetViewConf::default();
    subset.add_row_prefix("a");
    subset.add_family_subset_qualifier_prefix("f", "x");
    let conf = AuthorizedViewConf {
        table_id: "t".to_owned(),
        authorized_view_id: "v".to_owned(),
        subset_view: Some(subset.clone()),
        deletion_protection: DeletionProtection::Protected,
    };
    admin.create_authorized_view(&conf).await?;
    assert_eq!(admin.authorized_views("t").await?, ["v"]);

    let info = admin.authorized_view_info("t", "v").await?;
    assert_eq!(info.subset_view, Some(subset));
    assert_eq!(info.deletion_protection, DeletionProtection::Protected);

    let err = admin
        .delete_authorized_view("t", "v")
        .await
        .expect_err("view is protected");
    assert_eq!(err.code(), Code::FailedPrecondition);

    admin
        .update_authorized_view(&UpdateAuthorizedViewConf {
            conf: AuthorizedViewConf {
                subset_view: None,
                deletion_protection: DeletionProtection::Unprotected,
                ..conf
            },
            ignore_warnings: false,
        })
        .await?;
    admin.delete_authorized_view("t", "v").await?;
    assert!(admin.authorized_views("t").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_schema_bundles() -> Result<()> {
    let (admin, _client) = table_fixture("t", &["f"]).await?;
    admin
        .create_schema_bundle(&SchemaBundleConf {
            table_id: "t".to_owned(),
            schema_bundle_id: "sb".to_owned(),
            proto_descriptors: Some(vec![1, 2, 3]),
            etag: String::new(),
        })
        .await?;

    let bundle = admin.get_schema_bundle("t", "sb").await?;
    assert_eq!(bundle.schema_bundle, [1, 2, 3]);
    assert!(!bundle.etag.is_empty());
    assert_eq!(admin.schema_bundles("t").await?, ["sb"]);

    admin.delete_schema_bundle("t", "sb").await?;
    assert!(admin.schema_bundles("t").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_table_iam() -> Result<()> {
    let (admin, _client) = table_fixture("t", &["f"]).await?;
    let iam = admin.table_iam("t");

    let mut policy = iam.policy().await?;
    assert!(policy.roles().is_empty());
    policy.add("user:ada@example.com", "roles/bigtable.reader");
    let stored = iam.set_policy(&policy).await?;
    assert!(stored.has_role("user:ada@example.com", "roles/bigtable.reader"));

    let err = iam.set_policy(&policy).await.expect_err("etag is stale");
    assert_eq!(err.code(), Code::Aborted);

    let granted = iam
        .test_permissions(&["bigtable.tables.readRows"])
        .await?;
    assert_eq!(granted, ["bigtable.tables.readRows"]);
    Ok(())
}
