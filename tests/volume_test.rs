//! Volume listing, mount modes and safe destroy.

mod common;

use bay::config::MountMode;
use bay::orchestrator::{VolumeManager, PREFIX_LABEL};
use bay::runtime::ContainerRuntime;
use bay::Error;
use common::{FakeRegistry, FakeRuntime, Fixture};
use std::collections::BTreeSet;

const SHARED: &str = r#"
containers:
  web:
    image: nginx:1.25
    volumes:
      data:
        path: /data
        modes: [cached]
  worker:
    image: python:3.12
    links:
      required: [web]
    volumes:
      data:
        path: /work/data
        modes: [ro, cached]
volumes:
  data:
    modes: [cached]
"#;

#[tokio::test]
async fn test_mount_modes_share_caching_but_not_read_only() {
    let fixture = Fixture::new(SHARED, &[]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));
    let volumes = VolumeManager::new(&ctx, &spec, &graph);

    let web = volumes.mount_specs("web").unwrap();
    assert_eq!(web.len(), 1);
    assert_eq!(web[0].volume, "bay.data");
    assert_eq!(web[0].path, "/data");
    // `cached` declared three times collapses to one entry.
    assert_eq!(web[0].modes.len(), 1);
    assert!(web[0].modes.contains(MountMode::Cached));
    assert!(!web[0].modes.contains(MountMode::ReadOnly));

    let worker = volumes.mount_specs("worker").unwrap();
    assert!(worker[0].modes.contains(MountMode::ReadOnly));
    assert!(worker[0].modes.contains(MountMode::Cached));

    let rows = volumes.mounts();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].modes, web[0].modes);
    assert_eq!(rows[1].modes, worker[0].modes);

    // The per-volume set still reports the union.
    let listed = volumes.list().await.unwrap();
    assert_eq!(listed[0].modes.len(), 2);
}

#[tokio::test]
async fn test_mounts_skip_containers_in_active_profile() {
    let yaml = format!(
        "{}profiles:\n  dev:\n    containers:\n      web:\n        default_boot: true\n",
        SHARED
    );
    let fixture = Fixture::new(&yaml, &[]);
    let runtime = FakeRuntime::new();
    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));

    let (spec, graph) = fixture.resolve(Some("dev"));
    let rows = VolumeManager::new(&ctx, &spec, &graph).mounts();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].container, "worker");

    let (spec, graph) = fixture.resolve(None);
    assert_eq!(VolumeManager::new(&ctx, &spec, &graph).mounts().len(), 2);
}

#[tokio::test]
async fn test_list_reports_live_users() {
    let fixture = Fixture::new(SHARED, &[]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    runtime.add_volume("bay.data", &[(PREFIX_LABEL, "bay")]);
    runtime.add_container("bay.web", true, &["bay.data"], &[]);
    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));

    let rows = VolumeManager::new(&ctx, &spec, &graph).list().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "data");
    assert!(rows[0].exists);
    assert_eq!(rows[0].provider, None);
    assert_eq!(rows[0].users, vec!["bay.web".to_string()]);
}

#[tokio::test]
async fn test_destroy_refuses_with_foreign_user() {
    let fixture = Fixture::new(SHARED, &[]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    runtime.add_volume("bay.data", &[]);
    runtime.add_container("bay.web", true, &["bay.data"], &[]);
    runtime.add_container("backup-job", false, &["bay.data"], &[]);
    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));
    let volumes = VolumeManager::new(&ctx, &spec, &graph);

    let err = volumes
        .destroy("data", &volumes.default_scope("data"))
        .await
        .unwrap_err();
    match err {
        Error::VolumeInUse { volume, blockers } => {
            assert_eq!(volume, "data");
            assert_eq!(blockers, vec!["backup-job".to_string()]);
        }
        other => panic!("expected VolumeInUse, got {other}"),
    }

    // Nothing was touched.
    assert!(runtime.calls().is_empty(), "{:?}", runtime.calls());
    assert!(runtime.container("bay.web").unwrap().running);
    assert!(runtime.volume("bay.data").is_some());
}

#[tokio::test]
async fn test_destroy_refuses_user_outside_scope() {
    let fixture = Fixture::new(SHARED, &[]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    runtime.add_volume("bay.data", &[]);
    runtime.add_container("bay.web", true, &["bay.data"], &[]);
    runtime.add_container("bay.worker", true, &["bay.data"], &[]);
    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));

    let scope: BTreeSet<String> = ["web".to_string()].into();
    let err = VolumeManager::new(&ctx, &spec, &graph)
        .destroy("data", &scope)
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::VolumeInUse { ref blockers, .. } if blockers == &vec!["bay.worker".to_string()])
    );
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_destroy_removes_dependents_first() {
    let fixture = Fixture::new(SHARED, &[]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    runtime.add_volume("bay.data", &[]);
    runtime.add_container("bay.web", true, &["bay.data"], &[]);
    runtime.add_container("bay.worker", false, &["bay.data"], &[]);
    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));
    let volumes = VolumeManager::new(&ctx, &spec, &graph);

    volumes
        .destroy("data", &volumes.default_scope("data"))
        .await
        .unwrap();

    assert_eq!(
        runtime.calls(),
        vec![
            "remove bay.worker",
            "stop bay.web",
            "remove bay.web",
            "remove_volume bay.data",
        ]
    );
    assert!(runtime.volume("bay.data").is_none());
}

#[tokio::test]
async fn test_ensure_creates_plain_volume_once() {
    let fixture = Fixture::new(SHARED, &[]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));
    let builder = bay::orchestrator::BuildOrchestrator::new(&ctx, &spec, &graph);
    let volumes = VolumeManager::new(&ctx, &spec, &graph);

    volumes.ensure("data", &builder).await.unwrap();
    volumes.ensure("data", &builder).await.unwrap();

    assert_eq!(runtime.calls_of("create_volume"), vec!["create_volume bay.data"]);
    let info = runtime.inspect_volume("bay.data").await.unwrap().unwrap();
    assert_eq!(info.labels.get(PREFIX_LABEL).map(String::as_str), Some("bay"));
}
