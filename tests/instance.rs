mod helpers;

use anyhow::Result;
use bigtable::instance::{
    ClusterConfig, ClusterState, InstanceConf, InstanceState, InstanceType,
    InstanceWithClustersConfig, LogicalViewInfo, ProfileAttrsToUpdate, ProfileConf, RoutingPolicy,
};
use bigtable::transitive::instance_admin_client;
use bigtable::DeletionProtection;
use futures::TryStreamExt as _;
use helpers::config;
use tonic::Code;

fn instance_conf(instance_id: &str) -> InstanceConf {
    InstanceConf {
        instance_id: instance_id.to_owned(),
        display_name: format!("{instance_id} display"),
        cluster_id: format!("{instance_id}-c1"),
        zone: "us-central1-b".to_owned(),
        num_nodes: 3,
        instance_type: InstanceType::Production,
        ..InstanceConf::default()
    }
}

fn cluster_conf(instance_id: &str, cluster_id: &str, num_nodes: i32) -> ClusterConfig {
    ClusterConfig {
        instance_id: instance_id.to_owned(),
        cluster_id: cluster_id.to_owned(),
        zone: "us-east1-c".to_owned(),
        num_nodes,
        ..ClusterConfig::default()
    }
}

#[tokio::test]
async fn test_instance_lifecycle() -> Result<()> {
    let admin = instance_admin_client(config()).await?;
    admin.create_instance(&instance_conf("one")).await?;
    admin.create_instance(&instance_conf("two")).await?;

    let instances = admin.instances().await?.complete()?;
    let names: Vec<_> = instances.iter().map(|info| info.name.as_str()).collect();
    assert_eq!(names, ["one", "two"]);

    let info = admin.instance_info("one").await?;
    assert_eq!(info.display_name, "one display");
    assert_eq!(info.state, InstanceState::Ready);
    assert_eq!(info.instance_type, InstanceType::Production);

    let err = admin
        .create_instance(&instance_conf("one"))
        .await
        .expect_err("instance exists");
    assert_eq!(err.code(), Code::AlreadyExists);

    admin.delete_instance("one").await?;
    let err = admin.instance_info("one").await.expect_err("instance was deleted");
    assert_eq!(err.code(), Code::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_clusters() -> Result<()> {
    let admin = instance_admin_client(config()).await?;
    admin.create_instance(&instance_conf("i")).await?;
    admin.create_cluster(&cluster_conf("i", "i-c2", 1)).await?;

    let clusters = admin.clusters("i").await?.complete()?;
    let names: Vec<_> = clusters.iter().map(|info| info.name.as_str()).collect();
    assert_eq!(names, ["i-c1", "i-c2"]);
    assert!(clusters.iter().all(|info| info.state == ClusterState::Ready));

    admin.update_cluster("i", "i-c2", 5).await?;
    assert_eq!(admin.get_cluster("i", "i-c2").await?.serve_nodes, 5);

    admin.delete_cluster("i", "i-c2").await?;
    let err = admin
        .delete_cluster("i", "i-c1")
        .await
        .expect_err("an instance keeps at least one cluster");
    assert_eq!(err.code(), Code::FailedPrecondition);

    let all = admin.clusters("-").await?.complete()?;
    assert_eq!(all.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_sync_clusters() -> Result<()> {
    let admin = instance_admin_client(config()).await?;
    admin.create_instance(&instance_conf("i")).await?;

    let results = admin
        .update_instance_and_sync_clusters(&InstanceWithClustersConfig {
            instance_id: "i".to_owned(),
            display_name: "renamed".to_owned(),
            clusters: vec![cluster_conf("i", "i-c2", 2), cluster_conf("i", "i-c3", 2)],
            ..InstanceWithClustersConfig::default()
        })
        .await?;
    assert!(results.instance_updated);
    assert_eq!(results.created, ["i-c2", "i-c3"]);
    assert_eq!(results.deleted, ["i-c1"]);

    assert_eq!(admin.instance_info("i").await?.display_name, "renamed");
    let clusters = admin.clusters("i").await?.complete()?;
    assert_eq!(clusters.len(), 2);

    let err = admin
        .update_instance_and_sync_clusters(&InstanceWithClustersConfig {
            instance_id: "i".to_owned(),
            ..InstanceWithClustersConfig::default()
        })
        .await
        .expect_err("no clusters given");
    assert_eq!(err.code(), Code::InvalidArgument);
    Ok(())
}

#[tokio::test]
async fn test_app_profiles() -> Result<()> {
    let admin = instance_admin_client(config()).await?;
    admin.create_instance(&instance_conf("i")).await?;

    let created = admin
        .create_app_profile(&ProfileConf {
            profile_id: "batch".to_owned(),
            instance_id: "i".to_owned(),
            description: "batch jobs".to_owned(),
            routing_policy: Some(RoutingPolicy::SingleCluster {
                cluster_id: "i-c1".to_owned(),
                allow_transactional_writes: true,
            }),
            ..ProfileConf::default()
        })
        .await?;
    assert_eq!(created.description, "batch jobs");
    assert!(!created.etag.is_empty());

    let err = admin
        .create_app_profile(&ProfileConf {
            profile_id: "broken".to_owned(),
            instance_id: "i".to_owned(),
            routing_policy: Some(RoutingPolicy::SingleCluster {
                cluster_id: "missing".to_owned(),
                allow_transactional_writes: false,
            }),
            ..ProfileConf::default()
        })
        .await
        .expect_err("cluster does not exist");
    assert_eq!(err.code(), Code::FailedPrecondition);

    admin
        .update_app_profile(
            "i",
            "batch",
            &ProfileAttrsToUpdate {
                description: Some("nightly".to_owned()),
                ..ProfileAttrsToUpdate::default()
            },
        )
        .await?;
    assert_eq!(
        admin.get_app_profile("i", "batch").await?.description,
        "nightly"
    );

    let listed: Vec<_> = admin.list_app_profiles("i").try_collect().await?;
    assert_eq!(listed.len(), 1);
    admin.delete_app_profile("i", "batch").await?;
    let listed: Vec<_> = admin.list_app_profiles("i").try_collect().await?;
    assert!(listed.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_logical_views() -> Result<()> {
    let admin = instance_admin_client(config()).await?;
    admin.create_instance(&instance_conf("i")).await?;

    let view = LogicalViewInfo {
        logical_view_id: "recent".to_owned(),
        query: "SELECT * FROM t".to_owned(),
        deletion_protection: DeletionProtection::Protected,
    };
    admin.create_logical_view("i", &view).await?;
    let stored = admin.logical_view_info("i", "recent").await?;
    assert_eq!(stored.query, view.query);

    let err = admin
        .delete_logical_view("i", "recent")
        .await
        .expect_err("view is protected");
    assert_eq!(err.code(), Code::FailedPrecondition);

    admin
        .update_logical_view(
            "i",
            &LogicalViewInfo {
                query: String::new(),
                deletion_protection: DeletionProtection::Unprotected,
                ..view
            },
        )
        .await?;
    admin.delete_logical_view("i", "recent").await?;
    assert!(admin.logical_views("i").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_instance_iam() -> Result<()> {
    let admin = instance_admin_client(config()).await?;
    admin.create_instance(&instance_conf("i")).await?;

    let iam = admin.instance_iam("i");
    let mut policy = iam.policy().await?;
    policy.add("group:ops@example.com", "roles/bigtable.admin");
    let stored = iam.set_policy(&policy).await?;
    assert_eq!(stored.members("roles/bigtable.admin"), ["group:ops@example.com"]);

    let err = admin
        .instance_iam("missing")
        .policy()
        .await
        .expect_err("instance does not exist");
    assert_eq!(err.code(), Code::NotFound);
    Ok(())
}
