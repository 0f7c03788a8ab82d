mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bench_core::setup::{
    DbfsFs, MountedFs, SetupError, SetupPaths, add_init_script, add_remote_file, setup_files,
};
use common::{Reply, TestServer};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn dbfs_handler(
    listed: Arc<AtomicBool>,
) -> impl Fn(&common::RecordedRequest) -> Reply + Send + Sync + 'static {
    move |request| match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/api/2.0/dbfs/mkdirs") | ("POST", "/api/2.0/dbfs/put") => Reply::ok(json!({})),
        ("POST", "/api/2.0/dbfs/create") => Reply::ok(json!({"handle": 7})),
        ("POST", "/api/2.0/dbfs/add-block") | ("POST", "/api/2.0/dbfs/close") => {
            Reply::ok(json!({}))
        }
        ("GET", "/api/2.0/dbfs/list") if listed.load(Ordering::SeqCst) => Reply::ok(json!({
            "files": [{"path": "/listed/file", "is_dir": false, "file_size": 12}]
        })),
        ("GET", "/api/2.0/dbfs/list") => Reply::not_found(),
        ("GET", "/downloads/package.whl") => Reply::raw(200, "wheel-bytes"),
        _ => Reply::raw(404, "{}"),
    }
}

#[tokio::test]
async fn should_stream_remote_file_into_dbfs() {
    // Given a workspace that accepts uploads and lists the result
    let server = TestServer::spawn(dbfs_handler(Arc::new(AtomicBool::new(true)))).await;
    let client = server.client();
    let fs = DbfsFs::new(client.clone());
    let url = format!("{}/downloads/package.whl", server.url());

    // When the package is downloaded into DBFS
    let written = add_remote_file(
        &fs,
        client.http(),
        &client.config().retry,
        &url,
        "dbfs:/bench/scripts/package.whl",
    )
    .await
    .unwrap();

    // Then the parent is created, the bytes go through one block and the handle is closed
    assert!(written);
    let mkdirs = server.requests_to("POST", "/api/2.0/dbfs/mkdirs");
    assert_eq!(mkdirs[0].json()["path"], "/bench/scripts");
    let create = server.requests_to("POST", "/api/2.0/dbfs/create");
    assert_eq!(create[0].json()["path"], "/bench/scripts/package.whl");
    assert_eq!(create[0].json()["overwrite"], true);
    let blocks = server.requests_to("POST", "/api/2.0/dbfs/add-block");
    assert_eq!(blocks.len(), 1);
    assert_eq!(
        STANDARD.decode(blocks[0].json()["data"].as_str().unwrap()).unwrap(),
        b"wheel-bytes"
    );
    assert_eq!(server.requests_to("POST", "/api/2.0/dbfs/close")[0].json()["handle"], 7);
}

#[tokio::test]
async fn should_report_init_script_missing_when_listing_is_empty() {
    // Given a workspace where nothing ever shows up in listings
    let server = TestServer::spawn(dbfs_handler(Arc::new(AtomicBool::new(false)))).await;
    let fs = DbfsFs::new(server.client());

    // When the init script is written
    let written = add_init_script(&fs, "dbfs:/bench/install.sh", "dbfs:/bench/kit.jar")
        .await
        .unwrap();

    // Then the put went out but verification fails
    assert!(!written);
    let put = server.requests_to("POST", "/api/2.0/dbfs/put");
    assert_eq!(put[0].json()["overwrite"], true);
    let script = STANDARD
        .decode(put[0].json()["contents"].as_str().unwrap())
        .unwrap();
    assert!(String::from_utf8(script).unwrap().contains("cp /dbfs/bench/kit.jar /databricks/jars/"));
}

#[tokio::test]
async fn should_name_the_artifact_that_failed_to_land() {
    let server = TestServer::spawn(dbfs_handler(Arc::new(AtomicBool::new(false)))).await;
    let client = server.client();
    let fs = DbfsFs::new(client.clone());
    let paths = SetupPaths {
        jar_path: "dbfs:/bench/jars/kit.jar".to_string(),
        init_script_path: "dbfs:/bench/install.sh".to_string(),
        package_path: "dbfs:/bench/package.whl".to_string(),
        include_kit_jar: false,
    };

    let result = setup_files(&fs, client.http(), &client.config().retry, &paths).await;

    match result {
        Err(SetupError::NotWritten { path, .. }) => assert_eq!(path, "dbfs:/bench/install.sh"),
        other => panic!("expected NotWritten, got {other:?}"),
    }
}

#[tokio::test]
async fn should_write_download_through_mount_even_on_error_status() {
    // Given a download that answers 404 with a body
    let server = TestServer::spawn(|_| Reply::raw(404, "missing")).await;
    let client = server.client();
    let dir = tempfile::tempdir().unwrap();
    let fs = MountedFs::new(dir.path());
    let url = format!("{}/downloads/gone.whl", server.url());

    // When it is written to the mounted filesystem
    let written = add_remote_file(
        &fs,
        client.http(),
        &client.config().retry,
        &url,
        "dbfs:/bench/gone.whl",
    )
    .await
    .unwrap();

    // Then the body lands as is and the upload counts as present
    assert!(written);
    assert_eq!(
        std::fs::read_to_string(fs.native_path("dbfs:/bench/gone.whl")).unwrap(),
        "missing"
    );
}

#[tokio::test]
async fn should_close_dbfs_handle_when_block_upload_fails() {
    // Given a download larger than one block and a workspace rejecting blocks
    let server = TestServer::spawn(|request| {
        match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/api/2.0/dbfs/mkdirs") | ("POST", "/api/2.0/dbfs/close") => {
                Reply::ok(json!({}))
            }
            ("POST", "/api/2.0/dbfs/create") => Reply::ok(json!({"handle": 9})),
            ("POST", "/api/2.0/dbfs/add-block") => Reply::raw(
                400,
                json!({"error_code": "MAX_BLOCK_SIZE_EXCEEDED", "message": "too big"}).to_string(),
            ),
            ("GET", "/downloads/big.jar") => Reply::raw(200, "x".repeat(1024 * 1024 + 16)),
            _ => Reply::raw(404, "{}"),
        }
    })
    .await;
    let client = server.client();
    let fs = DbfsFs::new(client.clone());
    let url = format!("{}/downloads/big.jar", server.url());

    // When
    let result = add_remote_file(
        &fs,
        client.http(),
        &client.config().retry,
        &url,
        "dbfs:/bench/jars/big.jar",
    )
    .await;

    // Then the error surfaces and the open handle is still released
    assert!(matches!(result, Err(SetupError::Workspace { .. })));
    let close = server.requests_to("POST", "/api/2.0/dbfs/close");
    assert_eq!(close.len(), 1);
    assert_eq!(close[0].json()["handle"], 9);
}
