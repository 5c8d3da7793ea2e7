//! Admission control across many concurrent callers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use reqwest::header::HeaderMap;
use tenantvault_core::config::ConfigBuilder;
use tenantvault_core::domain::TrafficClass;
use tenantvault_graph::transport::Transport;
use tenantvault_graph::{GraphError, GraphRequest, GraphResponse, RequestPipeline, TransportError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, Request, Respond, ResponseTemplate};

use crate::common::setup_pipeline;

/// Transport that tracks how many sends overlap.
#[derive(Default)]
struct CountingTransport {
    current: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

#[async_trait::async_trait]
impl Transport for CountingTransport {
    async fn send(&self, _request: &mut GraphRequest) -> Result<GraphResponse, TransportError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(50)).await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(GraphResponse::new(200, HeaderMap::new(), Vec::new()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_never_exceeds_capacity() {
    let config = ConfigBuilder::new()
        .standard_concurrency(4)
        .standard_rate(1000.0, 1000)
        .build();
    let transport = Arc::new(CountingTransport::default());
    let pipeline = RequestPipeline::with_transport(&config, transport.clone());
    let cancel = CancellationToken::new();

    let calls = (0..40).map(|i| {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        async move {
            pipeline
                .execute(&cancel, GraphRequest::get(format!("https://example.test/items/{i}")))
                .await
        }
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(transport.total.load(Ordering::SeqCst), 40);
    assert_eq!(transport.peak.load(Ordering::SeqCst), 4);
    assert_eq!(
        pipeline
            .concurrency()
            .for_class(TrafficClass::Standard)
            .in_flight(),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_classes_have_independent_capacity() {
    let config = ConfigBuilder::new()
        .standard_concurrency(1)
        .bulk_concurrency(3)
        .build();
    let transport = Arc::new(CountingTransport::default());
    let pipeline = RequestPipeline::with_transport(&config, transport.clone());
    let cancel = CancellationToken::new();

    let calls = (0..6).map(|i| {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        async move {
            pipeline
                .execute(
                    &cancel,
                    GraphRequest::get(format!("https://example.test/drive/{i}/content"))
                        .traffic_class(TrafficClass::Bulk),
                )
                .await
        }
    });
    join_all(calls).await;

    assert_eq!(transport.peak.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_spreads_requests_over_time() {
    let config = ConfigBuilder::new()
        .standard_concurrency(16)
        .standard_rate(10.0, 10)
        .build();
    let transport = Arc::new(CountingTransport::default());
    let pipeline = RequestPipeline::with_transport(&config, transport.clone());
    let cancel = CancellationToken::new();

    let start = Instant::now();
    let calls = (0..30).map(|i| {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        async move {
            pipeline
                .execute(&cancel, GraphRequest::get(format!("https://example.test/x/{i}")))
                .await
        }
    });
    join_all(calls).await;

    // 10 from the initial burst, 20 more at 10 per second
    assert!(start.elapsed() >= Duration::from_millis(1990));
    assert_eq!(transport.total.load(Ordering::SeqCst), 30);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_releases_every_waiter() {
    let config = ConfigBuilder::new().standard_concurrency(1).build();
    let transport = Arc::new(CountingTransport::default());
    let pipeline = RequestPipeline::with_transport(&config, transport.clone());
    let cancel = CancellationToken::new();

    let waiters: Vec<_> = (0..5)
        .map(|i| {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                pipeline
                    .execute(&cancel, GraphRequest::get(format!("https://example.test/{i}")))
                    .await
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    let mut cancelled = 0;
    for waiter in waiters {
        if matches!(waiter.await.unwrap(), Err(GraphError::Cancelled)) {
            cancelled += 1;
        }
    }
    assert!(cancelled >= 4);
    assert_eq!(
        pipeline
            .concurrency()
            .for_class(TrafficClass::Standard)
            .in_flight(),
        0
    );
}

/// Slow responder that notes when each request reached the server.
struct SlowResponder {
    delay: Duration,
    arrivals: Arc<Mutex<Vec<std::time::Instant>>>,
}

impl Respond for SlowResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.arrivals.lock().unwrap().push(std::time::Instant::now());
        ResponseTemplate::new(200).set_delay(self.delay)
    }
}

/// Most requests the server was serving at once, given each is busy for
/// `busy` after it arrives.
fn peak_overlap(arrivals: &[std::time::Instant], busy: Duration) -> usize {
    arrivals
        .iter()
        .map(|t| {
            arrivals
                .iter()
                .filter(|other| **other <= *t && *t < **other + busy)
                .count()
        })
        .max()
        .unwrap_or(0)
}

#[tokio::test]
async fn test_server_never_sees_more_than_capacity() {
    let config = ConfigBuilder::new()
        .standard_concurrency(2)
        .max_retries(0)
        .build();
    let (server, pipeline, sink) = setup_pipeline(&config).await;

    let delay = Duration::from_millis(200);
    let arrivals = Arc::new(Mutex::new(Vec::new()));
    Mock::given(method("GET"))
        .and(path_regex(r"^/users/u1/messages/\d+$"))
        .respond_with(SlowResponder {
            delay,
            arrivals: Arc::clone(&arrivals),
        })
        .expect(8)
        .mount(&server)
        .await;

    let calls = (0..8).map(|i| {
        let pipeline = pipeline.clone();
        let url = format!("{}/users/u1/messages/{i}", server.uri());
        async move {
            pipeline
                .execute(&CancellationToken::new(), GraphRequest::get(url))
                .await
        }
    });
    let results = join_all(calls).await;
    assert!(results.iter().all(Result::is_ok));

    let arrivals = arrivals.lock().unwrap().clone();
    assert_eq!(arrivals.len(), 8);
    // Slots free only after the delayed response is back
    let peak = peak_overlap(&arrivals, delay - Duration::from_millis(20));
    assert_eq!(peak, 2, "server saw {peak} concurrent requests");
    assert_eq!(sink.records().len(), 8);
}
