//! Build pass against the in-memory runtime.

mod common;

use async_trait::async_trait;
use bay::build::{BuildReason, FailureHook};
use bay::orchestrator::{BuildOptions, BuildOrchestrator, BUILD_ID_LABEL};
use bay::Error;
use common::{FakeRegistry, FakeRuntime, Fixture};
use parking_lot::Mutex;
use std::sync::Arc;

const CHAIN: &str = r#"
containers:
  db:
    build: db
  web:
    build: web
    links:
      required: [db]
  other:
    build: other
"#;

fn targets(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_missing_images_build_in_dependency_order() {
    let fixture = Fixture::new(CHAIN, &["db", "web", "other"]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));

    let report = BuildOrchestrator::new(&ctx, &spec, &graph)
        .build(&targets(&["web"]), BuildOptions::default())
        .await
        .unwrap();

    assert_eq!(runtime.calls_of("build "), vec!["build db", "build web"]);
    assert_eq!(
        report.built,
        vec![
            ("db".to_string(), BuildReason::Missing),
            ("web".to_string(), BuildReason::Missing)
        ]
    );
    assert!(runtime.image("bay/web:latest").is_some());
}

#[tokio::test]
async fn test_changed_context_rebuilds_dependents_only() {
    let fixture = Fixture::new(CHAIN, &["db", "web", "other"]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    for name in ["db", "web", "other"] {
        fixture.seed_built_image(&runtime, name);
    }
    fixture.write("db/schema.sql", "CREATE TABLE users (id int);\n");

    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));
    let builder = BuildOrchestrator::new(&ctx, &spec, &graph);
    let plan = builder
        .plan(&targets(&["web", "other"]), BuildOptions::default())
        .await
        .unwrap();

    assert_eq!(plan.reason("db"), Some(BuildReason::Changed));
    assert_eq!(plan.reason("web"), Some(BuildReason::AncestorOfChanged));
    assert_eq!(plan.reason("other"), None);

    let report = builder.execute(&plan, BuildOptions::default()).await.unwrap();
    assert_eq!(runtime.calls_of("build "), vec!["build db", "build web"]);
    assert_eq!(report.up_to_date, vec!["other".to_string()]);
}

#[tokio::test]
async fn test_dependent_stays_stale_after_failed_rebuild() {
    let fixture = Fixture::new(CHAIN, &["db", "web", "other"]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    for name in ["db", "web", "other"] {
        fixture.seed_built_image(&runtime, name);
    }
    fixture.write("db/schema.sql", "CREATE TABLE users (id int);\n");
    runtime.fail_build("web");

    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));
    let builder = BuildOrchestrator::new(&ctx, &spec, &graph);
    let err = builder
        .build(&targets(&["web"]), BuildOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Build { ref container, .. } if container == "web"), "{err}");

    // db is current now, but web was never rebuilt against it.
    let plan = builder
        .plan(&targets(&["web"]), BuildOptions::default())
        .await
        .unwrap();
    assert_eq!(plan.reason("db"), None);
    assert_eq!(plan.reason("web"), Some(BuildReason::AncestorOfChanged));

    // Non-recursive plans see it too.
    let one = BuildOptions {
        recursive: false,
        ..BuildOptions::default()
    };
    let plan = builder.plan(&targets(&["web"]), one).await.unwrap();
    assert_eq!(plan.to_build(), vec!["web".to_string()]);
}

#[tokio::test]
async fn test_unchanged_images_are_not_rebuilt() {
    let fixture = Fixture::new(CHAIN, &["db", "web", "other"]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    for name in ["db", "web", "other"] {
        fixture.seed_built_image(&runtime, name);
    }
    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));

    let report = BuildOrchestrator::new(&ctx, &spec, &graph)
        .build(&targets(&["web", "other"]), BuildOptions::default())
        .await
        .unwrap();

    assert!(report.built.is_empty());
    assert!(runtime.calls_of("build ").is_empty());
}

#[tokio::test]
async fn test_force_without_recursion_builds_only_target() {
    let fixture = Fixture::new(CHAIN, &["db", "web", "other"]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    for name in ["db", "web", "other"] {
        fixture.seed_built_image(&runtime, name);
    }
    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));

    let options = BuildOptions {
        force: true,
        recursive: false,
        ..BuildOptions::default()
    };
    let report = BuildOrchestrator::new(&ctx, &spec, &graph)
        .build(&targets(&["web"]), options)
        .await
        .unwrap();

    assert_eq!(report.built, vec![("web".to_string(), BuildReason::Forced)]);
    assert_eq!(runtime.calls_of("build "), vec!["build web"]);
}

#[derive(Default)]
struct RecordingHook {
    seen: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl FailureHook for RecordingHook {
    async fn on_failure(&self, container: &str, log_tail: &[String]) {
        self.seen.lock().push((container.to_string(), log_tail.to_vec()));
    }
}

#[tokio::test]
async fn test_failure_skips_dependents_and_reports_tail() {
    let fixture = Fixture::new(CHAIN, &["db", "web", "other"]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    runtime.script_build(
        "db",
        &[
            "{\"stream\":\"Step 1/2 : FROM postgres\\n\"}\n{\"stream\":\"Step 2/2 : CO",
            "PY schema.sql /docker-entrypoint-initdb.d/\\n\"}\n",
            "{\"error\":\"COPY failed: file not found\"}\n",
        ],
    );
    runtime.fail_build("db");

    let hook = Arc::new(RecordingHook::default());
    let ctx = fixture
        .context(runtime.clone(), FakeRegistry::new(runtime.clone()))
        .with_hook(hook.clone());

    let err = BuildOrchestrator::new(&ctx, &spec, &graph)
        .build(&targets(&["web", "other"]), BuildOptions::default())
        .await
        .unwrap_err();

    match err {
        Error::Build {
            container,
            reason,
            log_tail,
        } => {
            assert_eq!(container, "db");
            assert!(reason.starts_with("COPY failed: file not found"));
            assert_eq!(
                log_tail,
                vec![
                    "Step 1/2 : FROM postgres",
                    "Step 2/2 : COPY schema.sql /docker-entrypoint-initdb.d/",
                    "COPY failed: file not found",
                ]
            );
        }
        other => panic!("expected a build error, got {other}"),
    }

    // The unrelated branch still builds; the dependent never starts.
    let builds = runtime.calls_of("build ");
    assert!(builds.contains(&"build other".to_string()));
    assert!(!builds.contains(&"build web".to_string()));

    let seen = hook.seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "db");
    assert_eq!(seen[0].1.last().map(String::as_str), Some("COPY failed: file not found"));

    let log = std::fs::read_to_string(fixture.dir.path().join("build.log")).unwrap();
    assert!(log.contains("build db ==="));
    assert!(log.contains("COPY failed: file not found"));
}

#[tokio::test]
async fn test_registry_pull_short_circuits_missing_image() {
    let fixture = Fixture::new(
        r#"
containers:
  api:
    build: api
settings:
  bay:
    registry: registry.local
"#,
        &["api"],
    );
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    let registry = FakeRegistry::new(runtime.clone());
    registry.offer("registry.local/bay/api:latest");
    let ctx = fixture.context(runtime.clone(), registry);

    let report = BuildOrchestrator::new(&ctx, &spec, &graph)
        .build(&targets(&["api"]), BuildOptions::default())
        .await
        .unwrap();

    assert!(report.built.is_empty());
    assert_eq!(report.pulled, vec!["api".to_string()]);
    assert!(runtime.calls_of("build ").is_empty());
    assert!(runtime.image("bay/api:latest").is_some());
}

#[tokio::test]
async fn test_unavailable_image_without_context_fails() {
    let fixture = Fixture::new(
        r#"
containers:
  cache:
    image: redis:7
"#,
        &[],
    );
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));

    let err = BuildOrchestrator::new(&ctx, &spec, &graph)
        .build(&targets(&["cache"]), BuildOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Build { ref container, .. } if container == "cache"));
}

#[tokio::test]
async fn test_push_requires_registry() {
    let fixture = Fixture::new(CHAIN, &["db", "web", "other"]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));

    let err = BuildOrchestrator::new(&ctx, &spec, &graph)
        .push(&targets(&["db"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Registry(_)));
}

const PROVIDER: &str = r#"
containers:
  assets:
    build: assets
    provides_volume: static
  web:
    build: web
    volumes:
      static: /srv/static
"#;

#[tokio::test]
async fn test_provider_build_extracts_into_volume() {
    let fixture = Fixture::new(PROVIDER, &["assets", "web"]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));
    let builder = BuildOrchestrator::new(&ctx, &spec, &graph);

    builder
        .build(&targets(&["assets"]), BuildOptions::default())
        .await
        .unwrap();

    let image_id = runtime.image("bay/assets:latest").unwrap().id;
    let volume = runtime.volume("bay.static").unwrap();
    assert_eq!(volume.labels.get(BUILD_ID_LABEL), Some(&image_id));

    let calls = runtime.calls();
    let created = runtime.position("create_volume bay.static").unwrap();
    let ran = runtime.position("run bay.assets.extract").unwrap();
    let removed = runtime.position("remove bay.assets.extract").unwrap();
    assert!(created < ran && ran < removed, "unexpected order: {calls:?}");
    assert!(runtime.container("bay.assets.extract").is_none());

    // A second pass with nothing changed leaves the volume alone.
    runtime.clear_calls();
    builder
        .build(&targets(&["assets"]), BuildOptions::default())
        .await
        .unwrap();
    assert!(runtime.calls().is_empty(), "{:?}", runtime.calls());
}

#[tokio::test]
async fn test_reextraction_replaces_stale_users() {
    let fixture = Fixture::new(PROVIDER, &["assets", "web"]);
    let (spec, graph) = fixture.resolve(None);
    let runtime = FakeRuntime::new();
    fixture.seed_built_image(&runtime, "assets");
    runtime.add_volume("bay.static", &[(BUILD_ID_LABEL, "sha256:old")]);
    runtime.add_container("bay.web", true, &["bay.static"], &[]);
    let ctx = fixture.context(runtime.clone(), FakeRegistry::new(runtime.clone()));

    let options = BuildOptions {
        force: true,
        ..BuildOptions::default()
    };
    BuildOrchestrator::new(&ctx, &spec, &graph)
        .build(&targets(&["assets"]), options)
        .await
        .unwrap();

    let stop = runtime.position("stop bay.web").unwrap();
    let remove = runtime.position("remove bay.web").unwrap();
    let drop_volume = runtime.position("remove_volume bay.static").unwrap();
    assert!(stop < remove && remove < drop_volume);
    assert!(runtime.container("bay.web").is_none());
    assert_ne!(
        runtime.volume("bay.static").unwrap().labels.get(BUILD_ID_LABEL),
        Some(&"sha256:old".to_string())
    );
}
