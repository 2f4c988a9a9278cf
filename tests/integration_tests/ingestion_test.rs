//! Ingestion integration tests
//!
//! A crawl task scrapes a mock job board, deduplicates through a real
//! gateway instance and lands new postings on the intake transport.

use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use jobscout::config::{GatewayConfig, SourceConfig};
use jobscout::crawler::selector::SelectorExtractor;
use jobscout::crawler::SourceCrawl;
use jobscout::gateway::{GatewayServer, MemorySeenKeys};
use jobscout::models::Posting;
use jobscout::notifications::MemoryPublisher;
use jobscout::pipeline::Pipeline;
use jobscout::scheduler::CrawlTask;
use jobscout::storage::{DedupStore, HttpDedupStore, MemoryPostingStore, PostingStore};
use jobscout::transport::{MemoryTransport, Transport};

use super::fixtures::{
    fast_pipeline_config, source_toml, EventLog, ScriptedEvaluator, DETAIL_HTML, LISTING_HTML,
};

async fn job_board() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING_HTML))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/details/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DETAIL_HTML))
        .mount(&server)
        .await;
    server
}

async fn gateway(keys: Arc<MemorySeenKeys>, transport: Arc<MemoryTransport>) -> String {
    let server = GatewayServer::new(GatewayConfig::default(), keys, transport);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        server
            .serve(listener, std::future::pending::<()>())
            .await
            .unwrap();
    });
    format!("http://{addr}/")
}

fn crawl_task(board: &MockServer, store: Arc<dyn DedupStore>) -> SourceCrawl {
    let config: SourceConfig = toml::from_str(&source_toml(&format!("{}/jobs", board.uri()))).unwrap();
    let extractor = SelectorExtractor::from_config(&config).unwrap();
    SourceCrawl::from_config(&config, Arc::new(extractor), store)
}

#[tokio::test]
async fn test_crawl_submits_new_postings_once() {
    let board = job_board().await;
    let keys = Arc::new(MemorySeenKeys::new());
    let transport = Arc::new(MemoryTransport::new("jobs"));
    let base = gateway(keys.clone(), transport.clone()).await;
    let store: Arc<dyn DedupStore> =
        Arc::new(HttpDedupStore::new(&base, Duration::from_secs(5)).unwrap());
    let task = crawl_task(&board, store);

    let first = task.run().await.unwrap();
    assert_eq!(first.discovered, 3);
    assert_eq!(first.blocked, 1);
    assert_eq!(first.submitted, 2);
    assert_eq!(first.failed, 0);
    assert_eq!(transport.pending(), 2);
    assert_eq!(keys.get("200003_apple").as_deref(), Some("checked"));

    let received = transport.receive().await.unwrap().unwrap();
    let posting = Posting::from_slice(&received.payload).unwrap();
    assert_eq!(posting.id, "200001_apple");
    assert_eq!(posting.company, "Apple");
    assert_eq!(posting.location.as_deref(), Some("Cupertino"));
    assert!(posting.link.ends_with("/details/200001"));
    assert_eq!(
        posting.description,
        "Build services used by millions.\n\n2 years experience\nremote friendly"
    );

    let second = task.run().await.unwrap();
    assert_eq!(second.skipped_seen, 3);
    assert_eq!(second.submitted, 0);
    assert_eq!(transport.pending(), 1);
}

#[tokio::test]
async fn test_crawled_posting_flows_to_sinks() {
    let board = job_board().await;
    let transport = Arc::new(MemoryTransport::new("jobs"));
    let base = gateway(Arc::new(MemorySeenKeys::new()), transport.clone()).await;
    let store: Arc<dyn DedupStore> =
        Arc::new(HttpDedupStore::new(&base, Duration::from_secs(5)).unwrap());
    crawl_task(&board, store).run().await.unwrap();

    let sink = Arc::new(MemoryPublisher::new());
    let postings = Arc::new(MemoryPostingStore::new());
    let coordinator = Pipeline::new(
        fast_pipeline_config(10),
        transport.clone(),
        Arc::new(ScriptedEvaluator::new("Software", EventLog::default())),
        sink.clone(),
        postings.clone(),
    )
    .start();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while postings.len() < 1 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let stats = coordinator.shutdown().await;

    assert_eq!(stats.received, 2);
    assert_eq!(stats.qualified, 1);
    assert_eq!(stats.unqualified, 1);
    assert_eq!(sink.published().len(), 1);
    assert!(postings.get("200001_apple").await.unwrap().is_some());
}
