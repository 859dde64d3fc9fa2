use bay::config::MountMode;
use bay::{Error, Parser, WarningKind};

const FULL: &str = r#"
containers:
  db:
    image: postgres
    tag: "16"
    system: true
    mem_limit: 512m
    readiness:
      command: pg_isready -U postgres
      timeout: 45s
  base:
    build: images/base
  web:
    build: web
    dockerfile: Dockerfile.dev
    from: base
    links:
      required: ["db:database"]
      optional: [search]
    volumes:
      node_modules: /srv/app/node_modules
      assets:
        path: /srv/assets
        modes: [cached, ro]
    build_args:
      NODE_ENV: development
    ports: ["8000:8000"]
  assets:
    build: assets
  search:
    image: opensearch
volumes:
  assets:
    provider: assets
settings:
  bay:
    prefix: shop
    parallelism: 2
    registry: registry.example.com
"#;

#[test]
fn test_parse_full_formation() {
    let config = Parser::new().parse_config(FULL).expect("Failed to parse");
    config.validate().expect("Config validation failed");

    assert_eq!(config.containers.len(), 5);
    assert_eq!(config.prefix(), "shop");
    assert_eq!(config.runtime_name("web"), "shop.web");
    assert_eq!(config.volume_runtime_name("assets"), "shop.assets");
    assert_eq!(config.image_name("db").unwrap(), "postgres:16");
    assert_eq!(config.image_name("web").unwrap(), "shop/web:latest");

    let web = &config.containers["web"];
    assert_eq!(web.links.required[0].target, "db");
    assert_eq!(web.links.required[0].hostname(), "database");
    assert_eq!(web.links.optional[0].hostname(), "search");
    assert_eq!(web.from.as_deref(), Some("base"));

    assert_eq!(config.provider_of("assets"), Some("assets"));
    assert!(config.is_provider("assets"));
    assert_eq!(config.system_containers(), vec!["db".to_string()]);

    let modes = config.volume_modes("assets");
    assert!(modes.contains(MountMode::Cached));
    assert!(modes.contains(MountMode::ReadOnly));
}

#[test]
fn test_load_sets_root_and_finds_contexts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bay.yaml"), FULL).unwrap();

    let config = Parser::new().load_config(dir.path().join("bay.yaml")).unwrap();
    assert_eq!(config.root, dir.path());
    let web = config.container("web").unwrap();
    assert_eq!(
        web.dockerfile_path(&config.root).unwrap(),
        dir.path().join("web").join("Dockerfile.dev")
    );
}

#[test]
fn test_find_config_in_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bay.yaml"), "containers: {}\n").unwrap();
    let found = Parser::find_config_in_dir(dir.path()).unwrap();
    assert_eq!(found, dir.path().join("bay.yaml"));
}

#[test]
fn test_undeclared_volume_is_a_warning() {
    let config = Parser::new()
        .parse_config("containers:\n  web:\n    build: web\n    volumes:\n      cache: /cache\n")
        .unwrap();
    let checked = config.validate().unwrap();
    assert_eq!(checked.warnings.len(), 1);
    assert_eq!(checked.warnings[0].kind, WarningKind::Validation);
    assert!(matches!(checked.into_strict(true), Err(Error::Strict(_))));
}

#[test]
fn test_provider_must_be_buildable() {
    let config = Parser::new()
        .parse_config("containers:\n  assets:\n    image: nginx\n    provides_volume: static\n")
        .unwrap();
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_provider_cannot_mount_its_volume() {
    let config = Parser::new()
        .parse_config(
            "containers:\n  assets:\n    build: assets\n    provides_volume: static\n    volumes:\n      static: /srv\n",
        )
        .unwrap();
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_invalid_settings_rejected() {
    let config = Parser::new()
        .parse_config("settings:\n  bay:\n    parallelism: 0\n")
        .unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_malformed_yaml_is_parse_error() {
    let err = Parser::new()
        .parse_config("containers:\n  web: [build\n")
        .unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
}
