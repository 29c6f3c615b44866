// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end scan: local git fixture + mocked platform API + in-memory
//! population + canned parser backends.

use git2::{Oid, Repository, Signature};
use serde_json::{Value, json};
use skm_crawler::{CloneConfig, CommitCrawler};
use skm_github::{GithubClient, ThrottleConfig};
use skm_knowledge::KnowledgeConfig;
use skm_parser::{BackendList, CodeParser, ParserBackend, RelevanceOracle, python_parser};
use skm_population::{BlobPopulation, MemoryStore, ObjectStore, Population};
use skm_scanner::{ProgressSink, ScanProgress, Scanner};
use skm_wire::WireError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path as url_path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const APP_SOURCE: &str = "import os\nimport django\n";

fn fixture_repo() -> (TempDir, Oid) {
    let dir = TempDir::new().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    std::fs::write(dir.path().join("app.py"), APP_SOURCE).unwrap();
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"], git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let author = Signature::now("Tester", "tester@example.com").unwrap();
    let oid = repo
        .commit(Some("HEAD"), &author, &author, "initial", &tree, &[])
        .unwrap();
    (dir, oid)
}

struct CannedBackend;

impl ParserBackend for CannedBackend {
    fn name(&self) -> &str {
        "py3"
    }

    fn send(&mut self, request: &Value) -> Result<Value, WireError> {
        use base64::Engine as _;
        let code = request.get("code").and_then(Value::as_str).unwrap_or("");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(code)
            .unwrap_or_default();
        if String::from_utf8_lossy(&decoded) == APP_SOURCE {
            Ok(json!({"use_count": {"os.path": 2, "django.db": 1}}))
        } else {
            Ok(json!({"error": "unknown source"}))
        }
    }
}

struct YesOracle;

impl RelevanceOracle for YesOracle {
    fn impact(&mut self, _module: &str) -> Result<i64, WireError> {
        Ok(1)
    }
}

struct Recording(Arc<Mutex<Vec<(u64, u64)>>>);

impl ProgressSink for Recording {
    fn report(&mut self, steps: &BTreeMap<String, u64>, finished: &BTreeMap<String, u64>) {
        self.0
            .lock()
            .unwrap()
            .push((steps.values().sum(), finished.values().sum()));
    }
}

async fn mock_api(fixture: &std::path::Path, sha: Oid) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(url_path("/users/tester/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "name": "fixture",
            "full_name": "tester/fixture",
            "size": 1,
            "fork": false,
            "clone_url": fixture.display().to_string(),
        }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(url_path("/repos/tester/fixture/languages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Python": 1234})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(url_path("/repos/tester/fixture/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"sha": sha.to_string(), "commit": {"author": {"date": "2024-05-01T12:00:00Z"}}},
        ])))
        .mount(&server)
        .await;
    server
}

fn build_scanner(
    api_uri: String,
    tiers: &TempDir,
    store: Arc<MemoryStore>,
    progress_log: Arc<Mutex<Vec<(u64, u64)>>>,
) -> Scanner {
    let api = GithubClient::with_base_url(
        api_uri,
        "",
        ThrottleConfig {
            min_delay: Duration::from_millis(1),
            ..ThrottleConfig::default()
        },
    );
    let crawler = CommitCrawler::new(
        api,
        CloneConfig {
            tmpfs_dir: tiers.path().join("tmpfs"),
            fs_dir: tiers.path().join("fs"),
            tmpfs_cutoff_bytes: 1024 * 1024,
        },
    );
    let mut parser = CodeParser::new();
    parser.register(Box::new(python_parser(
        BackendList::new(vec![Box::new(CannedBackend)]),
        Box::new(YesOracle),
    )));
    let population = BlobPopulation::new(store, KnowledgeConfig::default());
    Scanner::new(
        crawler,
        parser,
        Box::new(population),
        ScanProgress::new(Box::new(Recording(progress_log))),
    )
}

#[tokio::test]
async fn scan_all_publishes_knowledge_and_markers() {
    let (fixture, sha) = fixture_repo();
    let server = mock_api(fixture.path(), sha).await;
    let tiers = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let progress_log = Arc::new(Mutex::new(Vec::new()));

    let mut scanner = build_scanner(
        server.uri(),
        &tiers,
        Arc::clone(&store),
        Arc::clone(&progress_log),
    );
    let outcome = scanner.scan_all("tester", false).await.unwrap();

    assert!(outcome.published);
    assert_eq!(outcome.commits, 1);
    // python.os.path and python.django.db
    assert_eq!(outcome.names, 2);
    assert_eq!(scanner.progress_totals(), (1, 1));
    assert_eq!(scanner.parser_health().attempted, 1);

    let user = store.get("users/tester").await.unwrap().unwrap();
    let record: Value = serde_json::from_slice(&user).unwrap();
    assert_eq!(record["version"], "1");
    assert!(record["knowledge"]["python.os"].as_f64().unwrap() > 0.0);
    assert!(record["knowledge"]["python.django"].as_f64().unwrap() > 0.0);
    assert!(record["knowledge"]["python.__overall__"].as_f64().unwrap() > 0.0);

    let markers = store.list("leaderboard/python/os/").await.unwrap();
    assert_eq!(markers.len(), 1);
    assert!(markers[0].starts_with("leaderboard/python/os/tester:"));

    // Clone directory was removed on scope exit.
    assert!(!tiers.path().join("tmpfs/fixture").exists());
}

#[tokio::test]
async fn second_scan_is_skipped_unless_forced() {
    let (fixture, sha) = fixture_repo();
    let server = mock_api(fixture.path(), sha).await;
    let tiers = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let progress_log = Arc::new(Mutex::new(Vec::new()));

    let mut scanner = build_scanner(
        server.uri(),
        &tiers,
        Arc::clone(&store),
        Arc::clone(&progress_log),
    );
    assert!(scanner.scan_all("tester", false).await.unwrap().published);

    // Fresh scanner, same store: the stored version is current.
    let mut scanner = build_scanner(
        server.uri(),
        &tiers,
        Arc::clone(&store),
        Arc::clone(&progress_log),
    );
    let outcome = scanner.scan_all("tester", false).await.unwrap();
    assert!(!outcome.published);

    let mut scanner = build_scanner(
        server.uri(),
        &tiers,
        Arc::clone(&store),
        Arc::clone(&progress_log),
    );
    let outcome = scanner.scan_all("tester", true).await.unwrap();
    assert!(outcome.published);
}

#[tokio::test]
async fn unsupported_repositories_are_skipped_entirely() {
    let (fixture, sha) = fixture_repo();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(url_path("/users/tester/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "name": "fixture",
            "full_name": "tester/fixture",
            "size": 1,
            "fork": false,
            "clone_url": fixture.path().display().to_string(),
        }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(url_path("/repos/tester/fixture/languages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Haskell": 999})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(url_path("/repos/tester/fixture/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"sha": sha.to_string(), "commit": {"author": {"date": "2024-05-01T12:00:00Z"}}},
        ])))
        .mount(&server)
        .await;

    let tiers = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let progress_log = Arc::new(Mutex::new(Vec::new()));
    let mut scanner = build_scanner(
        server.uri(),
        &tiers,
        Arc::clone(&store),
        Arc::clone(&progress_log),
    );
    let outcome = scanner.scan_all("tester", false).await.unwrap();

    // Nothing analyzed, but the (empty) knowledge is still published.
    assert!(outcome.published);
    assert_eq!(outcome.commits, 0);
    assert_eq!(scanner.progress_totals(), (0, 0));
    assert!(!tiers.path().join("tmpfs/fixture").exists());
}
