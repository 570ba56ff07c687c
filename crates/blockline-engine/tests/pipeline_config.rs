//! Parsing and validation of pipeline fixtures.

use std::path::PathBuf;

use blockline_engine::config::{parse_pipeline, parse_pipeline_str, validate_document};
use blockline_engine::{check_pipeline, Stage};
use blockline_types::conn::StorageProvider;
use blockline_types::{Compression, ConnConfig, ConnectorError, ExtConfig, FileFormat, LoaderConfig, PrivateField, TransferMode};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("tests/fixtures/pipelines")
        .join(name)
}

#[test]
fn test_parse_and_validate_table_fixture() {
    std::env::set_var("BL_TEST_S3_REGION", "eu-north-1");
    std::env::set_var("BL_TEST_PG_HOST", "warehouse.internal");

    let doc = parse_pipeline(&fixture("s3_to_postgres.yaml")).expect("fixture parses");
    assert_eq!(doc.pipeline.as_deref(), Some("orders_daily"));

    let config = &doc.config;
    assert_eq!(config.transfer_mode, TransferMode::Table);
    assert_eq!(config.ext_name_value(), "orders-landing");
    assert_eq!(config.include_private_fields, vec![PrivateField::Path]);
    assert_eq!(config.resources.queue_capacity, 8);

    let ExtConfig::ObjectStorage(ext) = &config.ext_config else {
        panic!("expected object storage extractor");
    };
    assert_eq!(ext.file_type, FileFormat::Json);
    assert_eq!(ext.compress_type, Some(Compression::Zstd));
    let ConnConfig::ObjectStorage(conn) = &ext.conn_config else {
        panic!("expected inlined object storage connection");
    };
    assert_eq!(conn.provider, StorageProvider::S3);
    assert_eq!(conn.region.as_deref(), Some("eu-north-1"));

    let LoaderConfig::RelationalTable(loader) = &config.loader_config else {
        panic!("expected relational loader");
    };
    assert_eq!(loader.schema, "staging");
    let ConnConfig::Relational(pg) = &loader.conn_config else {
        panic!("expected inlined relational connection");
    };
    assert_eq!(pg.host, "warehouse.internal");
    assert_eq!(pg.idle_slots(), 2);

    assert!(validate_document(&doc).unwrap().is_empty());
    let plan = check_pipeline(config, "orders_daily").unwrap();
    assert_eq!(plan.stages, vec![Stage::Extract, Stage::Transform, Stage::Load]);
    assert_eq!(plan.extractor, "objectStorage");
    assert_eq!(plan.loader, "relationalTable");

    std::env::remove_var("BL_TEST_S3_REGION");
    std::env::remove_var("BL_TEST_PG_HOST");
}

#[test]
fn test_copy_fixture_warns_about_table_fields() {
    let doc = parse_pipeline(&fixture("local_copy.yaml")).unwrap();
    let warnings = validate_document(&doc).unwrap();
    assert_eq!(warnings, vec!["tagNameValue is ignored in copyFile transfer mode".to_string()]);

    let plan = check_pipeline(&doc.config, "mirror").unwrap();
    assert_eq!(plan.transfer_mode, TransferMode::CopyFile);
    assert_eq!(plan.stages, vec![Stage::Extract, Stage::Load]);
    assert_eq!(plan.loader, "datasetRepo");
}

#[test]
fn test_invalid_fixture_is_unsupported_type() {
    let err = parse_pipeline(&fixture("invalid_pipeline.yaml")).unwrap_err();
    let conn_err = err
        .downcast_ref::<ConnectorError>()
        .expect("resolution error is kept in the chain");
    assert_eq!(conn_err.to_string(), "unsupported extractor type 'ftp'");
}

#[test]
fn test_missing_env_var_fails_before_yaml() {
    let yaml = std::fs::read_to_string(fixture("s3_to_postgres.yaml")).unwrap();
    let yaml = yaml.replace("${BL_TEST_S3_REGION}", "${BL_TEST_NEVER_SET_REGION}");
    let yaml = yaml.replace("${BL_TEST_PG_HOST}", "localhost");
    let err = parse_pipeline_str(&yaml).unwrap_err().to_string();
    assert_eq!(err, "Missing environment variable(s): BL_TEST_NEVER_SET_REGION");
}

#[test]
fn test_relational_pool_bounds_checked_at_parse_time() {
    let yaml = r#"
version: "1.0"
extConfig:
  type: postgresTable
  config:
    connConfig: {type: postgres, config: {host: db, user: u, database: d, maxConn: 1, minConn: 3}}
    table: orders
    incrementalField: id
loaderConfig:
  type: objectStorage
  config:
    connConfig: {type: objectStorage, config: {}}
    bucketName: out
transferMode: table
"#;
    let err = parse_pipeline_str(yaml).unwrap_err();
    let msg = err.downcast_ref::<ConnectorError>().unwrap().to_string();
    assert!(msg.contains("maxConn (1) must be >= minConn (3)"), "{msg}");
}
