//! End-to-end pipeline tests against a mock HTTP source

#![allow(clippy::unwrap_used, clippy::expect_used)]

use flate2::write::GzEncoder;
use flate2::Compression;
use roster_ingest::error::{IngestError, ParseError};
use roster_ingest::store::Store;
use roster_ingest::{IngestPipeline, PipelineConfig, PipelineState, RecordKind, Stage};
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INDIVIDUALS_CSV: &str = "\
Index,Customer Id,First Name,Last Name,Company,City,Country,Phone 1,Phone 2,Email,Subscription Date,Website
1,DD37Cf93aecA6Dc,Sheryl,Baxter,Rasmussen Group,East Leonard,Chile,229.077.5154,397.884.0519x718,zunigavanessa@smith.info,2020-08-24,http://www.stephenson.com/
2,1Ef7b82A4CAAD10,Preston,Lozano,Vega-Gentry,East Jimmychester,Djibouti,5153435776,686-620-1820x944,vmata@colon.com,2021-04-23,http://www.hobbs.com/
3,6F94879bDAfE5a6,Roy,Berry,Murillo-Perry,Isabelborough,Antigua and Barbuda,+1-539-402-0259,(496)978-3969x58947,beckycarr@hogan.com,2020-03-25,http://www.lawrence.com/
";

const ORGANIZATIONS_CSV: &str = "\
Index,Organization Id,Name,Website,Country,Description,Founded,Industry,Number of employees
1,FAB0d41d5b5d22c,Ferrell LLC,https://price.net/,Papua New Guinea,Horizontal empowering knowledgebase,1990,Plastics,3498
2,6A7EdDEA9FaDC52,\"Mckinney, Riley and Day\",http://www.hall-buchanan.info/,Finland,User-centric system-worthy leverage,2015,Glass / Ceramics / Concrete,4952
";

fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, content.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

async fn serve(body: Vec<u8>, status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/roster.tar.gz"))
        .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
        .mount(&server)
        .await;
    server
}

fn config(server: &MockServer, dir: &Path) -> PipelineConfig {
    PipelineConfig::new(format!("{}/roster.tar.gz", server.uri()))
        .with_insecure_http(true)
        .with_staging_dir(dir.join("staging"))
        .with_database_path(dir.join("roster.db"))
}

async fn open(config: &PipelineConfig) -> Store {
    Store::open(&config.store).await.unwrap()
}

#[tokio::test]
async fn test_full_run_loads_both_tables() {
    let server = serve(
        tar_gz(&[
            ("individuals.csv", INDIVIDUALS_CSV),
            ("organizations.csv", ORGANIZATIONS_CSV),
        ]),
        200,
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let config = config(&server, dir.path());

    let mut pipeline = IngestPipeline::new(config.clone());
    let report = pipeline.run().await.unwrap();

    assert_eq!(pipeline.state(), PipelineState::Done);
    assert_eq!(report.extracted_entries, 2);
    assert_eq!(report.rows_for(RecordKind::Individual), Some(3));
    assert_eq!(report.rows_for(RecordKind::Organization), Some(2));
    assert!(config.archive_path().is_file());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["loads"][1]["table"], "organizations");
    assert_eq!(json["archive"]["sha256"], report.archive.sha256.as_str());

    let store = open(&config).await;
    assert_eq!(store.count_rows(RecordKind::Individual).await.unwrap(), 3);
    assert_eq!(store.count_rows(RecordKind::Organization).await.unwrap(), 2);

    #[allow(clippy::type_complexity)]
    let row: (String, String, String, String, String, String, String, String, String, String, String, String) =
        sqlx::query_as(
            "SELECT record_index, customer_id, first_name, last_name, company, city, country, \
             phone_1, phone_2, email, subscription_date, website \
             FROM individuals WHERE customer_id = '1Ef7b82A4CAAD10'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(
        row,
        (
            "2".to_string(),
            "1Ef7b82A4CAAD10".to_string(),
            "Preston".to_string(),
            "Lozano".to_string(),
            "Vega-Gentry".to_string(),
            "East Jimmychester".to_string(),
            "Djibouti".to_string(),
            "5153435776".to_string(),
            "686-620-1820x944".to_string(),
            "vmata@colon.com".to_string(),
            "2021-04-23".to_string(),
            "http://www.hobbs.com/".to_string(),
        )
    );

    let (name, employees): (String, i64) = sqlx::query_as(
        "SELECT name, number_of_employees FROM organizations WHERE organization_id = '6A7EdDEA9FaDC52'",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(name, "Mckinney, Riley and Day");
    assert_eq!(employees, 4952);
    store.close().await;
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let server = serve(
        tar_gz(&[
            ("individuals.csv", INDIVIDUALS_CSV),
            ("organizations.csv", ORGANIZATIONS_CSV),
        ]),
        200,
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let config = config(&server, dir.path());

    let mut pipeline = IngestPipeline::new(config.clone());
    let first = pipeline.run().await.unwrap();
    let second = pipeline.run().await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.archive.sha256, second.archive.sha256);

    let store = open(&config).await;
    assert_eq!(store.count_rows(RecordKind::Individual).await.unwrap(), 3);
    assert_eq!(store.count_rows(RecordKind::Organization).await.unwrap(), 2);
    store.close().await;
}

#[tokio::test]
async fn test_missing_organizations_file_fails_at_its_load() {
    let server = serve(tar_gz(&[("individuals.csv", INDIVIDUALS_CSV)]), 200).await;
    let dir = tempfile::tempdir().unwrap();
    let config = config(&server, dir.path());

    let mut pipeline = IngestPipeline::new(config.clone());
    let err = pipeline.run().await.unwrap_err();

    let expected = config.extract_dir().join("organizations.csv");
    assert_eq!(err.stage, Stage::Load(RecordKind::Organization));
    assert!(matches!(
        &err.source,
        IngestError::Parse(ParseError::MissingSource { path }) if *path == expected
    ));
    assert!(err.to_string().contains(&expected.display().to_string()));
    assert_eq!(
        pipeline.state(),
        PipelineState::Failed(Stage::Load(RecordKind::Organization))
    );

    // the earlier load is untouched by the later failure
    let store = open(&config).await;
    assert_eq!(store.count_rows(RecordKind::Individual).await.unwrap(), 3);
    assert_eq!(store.count_rows(RecordKind::Organization).await.unwrap(), 0);
    store.close().await;
}

#[tokio::test]
async fn test_http_error_leaves_no_staged_archive() {
    let server = serve(b"gone".to_vec(), 500).await;
    let dir = tempfile::tempdir().unwrap();
    let config = config(&server, dir.path());

    let mut pipeline = IngestPipeline::new(config.clone());
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.stage, Stage::Fetch);
    assert!(matches!(err.source, IngestError::Fetch(_)));
    assert!(!config.archive_path().exists());
    assert!(std::fs::read_dir(&config.staging_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .all(|e| e.path().is_dir()));
}

#[tokio::test]
async fn test_corrupt_archive_fails_at_extract() {
    let server = serve(b"definitely not a tarball".to_vec(), 200).await;
    let dir = tempfile::tempdir().unwrap();
    let config = config(&server, dir.path());

    let mut pipeline = IngestPipeline::new(config.clone());
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.stage, Stage::Extract);
    assert!(matches!(err.source, IngestError::Extract(_)));
    // staging artifacts are kept for inspection
    assert!(config.archive_path().is_file());
}

#[tokio::test]
async fn test_header_only_files_produce_empty_tables() {
    let individuals_header = INDIVIDUALS_CSV.lines().next().unwrap();
    let organizations_header = ORGANIZATIONS_CSV.lines().next().unwrap();
    let server = serve(
        tar_gz(&[
            ("individuals.csv", individuals_header),
            ("organizations.csv", organizations_header),
        ]),
        200,
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let config = config(&server, dir.path());

    let report = IngestPipeline::new(config.clone()).run().await.unwrap();
    assert_eq!(report.rows_for(RecordKind::Individual), Some(0));
    assert_eq!(report.rows_for(RecordKind::Organization), Some(0));

    let store = open(&config).await;
    for kind in RecordKind::ALL {
        assert!(store.table_exists(kind).await.unwrap());
        assert_eq!(store.count_rows(kind).await.unwrap(), 0);
    }
    store.close().await;
}
