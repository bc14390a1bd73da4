//! Discovery and collection end-to-end

use chrono::NaiveDate;
use listing_harvester::config::{parse_config, Config};
use listing_harvester::pipeline::{Harvester, OutputLayout, RunMode};
use listing_harvester::source::Partition;
use listing_harvester::store::{FieldValue, IdentifierStore, ItemKey, Record, ResultTable};
use listing_harvester::Fetcher;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 3, 9).unwrap()
}

/// Creates a test configuration with one html and one json source
fn create_test_config(base_url: &str, root: &Path) -> Config {
    parse_config(&format!(
        r##"
[requests]
sleep-time-ms = 0
timeout-secs = 5

[output]
root = "{root}"
snapshot-interval = 5

[[source]]
name = "lavoz"
kind = "html"
pages = 2
ids-filename = "lavoz"
result-filename = "lavoz_houses"
listing-url = "{base}/search?seller={{publisher}}&page={{page}}"
item-selector = "a.listing"

[[source.dimension]]
name = "publisher"
values = ["owner"]

[source.fields]
telephone = "#tel"

[[source]]
name = "olx"
kind = "json"
pages = 1
ids-filename = "olx"
result-filename = "olx_houses"
listing-url = "{base}/list/{{province}}/{{page}}"
listing-key-path = ["ids"]
detail-url = "{base}/items/{{key}}"

[[source.dimension]]
name = "province"
values = ["cordoba"]

[[source.json-field]]
name = "title"
path = ["title"]

[[source.json-field]]
name = "amount"
path = ["price", "amount"]
"##,
        root = root.display(),
        base = base_url,
    ))
    .unwrap()
}

fn harvester(config: &Config) -> Harvester {
    let fetcher = Fetcher::from_config(&config.requests).unwrap();
    Harvester::new(
        Arc::new(fetcher),
        OutputLayout::new(&config.output.root, run_date()),
        config.output.clone(),
    )
}

fn listing_page(hrefs: &[&str]) -> String {
    let anchors: String = hrefs
        .iter()
        .map(|h| format!(r#"<a class="listing" href="{}">x</a>"#, h))
        .collect();
    format!("<html><body>{}</body></html>", anchors)
}

async fn mount_item(server: &MockServer, id: u32, status: u16, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/items/{}", id)))
        .respond_with(ResponseTemplate::new(status).set_body_string(format!(
            r#"{{"title":"House {id}","price":{{"amount":{amount}}}}}"#,
            id = id,
            amount = id * 1000
        )))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn olx_partition() -> Partition {
    Partition::new(vec![("province".to_string(), "cordoba".to_string())])
}

#[tokio::test]
async fn test_discovery_unions_pages() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("seller", "owner"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["/a", "/b"])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("seller", "owner"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["/b", "/c"])))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&base_url, dir.path());
    let source = config.source("lavoz").unwrap();
    let harvester = harvester(&config);

    let report = harvester.run(source, RunMode::Discover).await.unwrap();

    let owner = Partition::new(vec![("publisher".to_string(), "owner".to_string())]);
    let paths = harvester.layout().partition_paths(source, &owner);
    let store = IdentifierStore::load(&paths.ids).unwrap();

    let keys: Vec<String> = store.keys().map(|k| k.to_string()).collect();
    assert_eq!(
        keys,
        vec![
            format!("{}/a", base_url),
            format!("{}/b", base_url),
            format!("{}/c", base_url),
        ]
    );
    assert_eq!(store.processed_count(), 0);
    assert_eq!(report.keys_added(), 3);
    assert!(report.partitions[0].collection.is_none());
    assert!(!paths.discovery_temp.exists());
}

#[tokio::test]
async fn test_full_run_collects_and_keeps_failures_pending() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/list/cordoba/1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"ids":[1,2,3,4,5,6]}"#),
        )
        .mount(&mock_server)
        .await;
    for id in 1..=6 {
        let status = if id == 3 { 500 } else { 200 };
        mount_item(&mock_server, id, status, 1).await;
    }

    let config = create_test_config(&mock_server.uri(), dir.path());
    let source = config.source("olx").unwrap();
    let harvester = harvester(&config);

    let report = harvester.run(source, RunMode::Full).await.unwrap();

    let collection = report.partitions[0].collection.unwrap();
    assert_eq!(collection.collected, 5);
    assert_eq!(collection.snapshots, 1);
    assert_eq!(collection.remaining, 1);

    let paths = harvester.layout().partition_paths(source, &olx_partition());
    let store = IdentifierStore::load(&paths.ids).unwrap();
    assert_eq!(store.unprocessed(), vec![ItemKey::from(3u64)]);

    assert!(paths.results.ends_with("results/2020-03-09/olx_houses_cordoba.csv"));
    let content = std::fs::read_to_string(&paths.results).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("title,amount"));
    assert_eq!(lines.next(), Some("House 1,1000"));
    assert_eq!(content.lines().count(), 6);
}

#[tokio::test]
async fn test_collect_resumes_from_crash_snapshots() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let config = create_test_config(&mock_server.uri(), dir.path());
    let source = config.source("olx").unwrap();
    let harvester = harvester(&config);
    let paths = harvester.layout().partition_paths(source, &olx_partition());

    // Leftovers of a run that died after checkpointing items 1 and 2
    let mut canonical: IdentifierStore = (1u64..=4).map(ItemKey::from).collect();
    canonical.snapshot(&paths.ids).unwrap();

    canonical.mark_processed(&ItemKey::from(1u64));
    canonical.mark_processed(&ItemKey::from(2u64));
    canonical.snapshot(&paths.temp_ids).unwrap();

    let mut partial = ResultTable::new();
    for id in 1..=2 {
        let mut record = Record::new();
        record.insert("title".to_string(), FieldValue::from(format!("House {}", id)));
        record.insert("amount".to_string(), FieldValue::Integer(id * 1000));
        partial.push(record);
    }
    partial.write_csv(&paths.temp_results).unwrap();

    mount_item(&mock_server, 1, 200, 0).await;
    mount_item(&mock_server, 2, 200, 0).await;
    mount_item(&mock_server, 3, 200, 1).await;
    mount_item(&mock_server, 4, 200, 1).await;

    let report = harvester.run(source, RunMode::Collect).await.unwrap();
    let collection = report.partitions[0].collection.unwrap();

    assert!(collection.resumed);
    assert_eq!(collection.attempted, 2);
    assert_eq!(collection.remaining, 0);

    let results = ResultTable::load(&paths.results).unwrap();
    let titles: Vec<String> = results
        .rows()
        .iter()
        .filter_map(|r| r.get("title").map(|v| v.to_cell()))
        .collect();
    assert_eq!(titles, vec!["House 1", "House 2", "House 3", "House 4"]);
    assert!(!paths.temp_ids.exists());
    assert!(!paths.temp_results.exists());
}

#[tokio::test]
async fn test_fresh_discovery_replaces_identifiers() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/list/cordoba/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ids":[10]}"#))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), dir.path());
    let source = config.source("olx").unwrap();
    let paths = harvester(&config)
        .layout()
        .partition_paths(source, &olx_partition());

    let old: IdentifierStore = vec![ItemKey::from(1u64)].into_iter().collect();
    old.snapshot(&paths.ids).unwrap();

    // Incremental discovery keeps the old identifier
    harvester(&config).run(source, RunMode::Discover).await.unwrap();
    assert_eq!(IdentifierStore::load(&paths.ids).unwrap().len(), 2);

    // A fresh one starts over
    harvester(&config)
        .fresh(true)
        .run(source, RunMode::Discover)
        .await
        .unwrap();
    let store = IdentifierStore::load(&paths.ids).unwrap();
    assert_eq!(store.keys().cloned().collect::<Vec<_>>(), vec![ItemKey::from(10u64)]);
}
