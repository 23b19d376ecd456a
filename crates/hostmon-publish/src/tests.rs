use crate::discovery::{self, DiscoveryMethod, DiscoverySettings};
use crate::publisher::{NetworkPublisher, PublishConfig, QueuedMetric};
use crate::transport::{MetricTransport, TransportError};
use hostmon_common::types::MemorySnapshot;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Transport that records every call and replies from a script.
struct ScriptedTransport {
    calls: Mutex<Vec<(Instant, String)>>,
    statuses: Mutex<Vec<u16>>,
    fallback: u16,
}

impl ScriptedTransport {
    fn always(status: u16) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            fallback: status,
        }
    }

    fn sequence(statuses: Vec<u16>, fallback: u16) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            statuses: Mutex::new(statuses),
            fallback,
        }
    }
}

impl MetricTransport for ScriptedTransport {
    fn post_metrics(
        &self,
        _endpoint: &str,
        _token: &str,
        body: String,
    ) -> Result<u16, TransportError> {
        self.calls.lock().unwrap().push((Instant::now(), body));
        let mut statuses = self.statuses.lock().unwrap();
        Ok(if statuses.is_empty() {
            self.fallback
        } else {
            statuses.remove(0)
        })
    }
}

fn publisher_with(
    transport: Arc<ScriptedTransport>,
    max_queue: usize,
    retry_base_delay_ms: u64,
) -> NetworkPublisher {
    struct Shared(Arc<ScriptedTransport>);
    impl MetricTransport for Shared {
        fn post_metrics(&self, e: &str, t: &str, b: String) -> Result<u16, TransportError> {
            self.0.post_metrics(e, t, b)
        }
    }

    let config = PublishConfig {
        hostname: "web-01".to_string(),
        platform: "Linux".to_string(),
        auth_token: "secret".to_string(),
        max_queue_size: max_queue,
        retry_max_attempts: 3,
        retry_base_delay_ms,
        push_interval_ms: 5000,
        ..PublishConfig::default()
    };
    let publisher = NetworkPublisher::new(config, Box::new(Shared(transport)));
    publisher.set_endpoint(Some("http://aggregator:9000".to_string()));
    publisher
}

#[test]
fn queue_overflow_refuses_and_counts() {
    let transport = Arc::new(ScriptedTransport::always(200));
    let publisher = publisher_with(transport, 3, 1);

    let mut accepted = 0;
    for i in 0..5 {
        if publisher.enqueue(QueuedMetric::new(100 + i, "cpu.total_usage", 50.0)) {
            accepted += 1;
        }
    }

    let stats = publisher.stats();
    assert_eq!(accepted, 3);
    assert_eq!(stats.metrics_queued, 3);
    assert_eq!(stats.queue_overflows, 2);
    assert_eq!(publisher.queue_len(), 3);
}

#[test]
fn retry_exhaustion_drops_batch_and_counts_every_attempt() {
    let transport = Arc::new(ScriptedTransport::always(500));
    let publisher = publisher_with(Arc::clone(&transport), 100, 100);

    for i in 0..10 {
        assert!(publisher.enqueue(QueuedMetric::new(100 + i, "cpu.total_usage", 50.0)));
    }
    let started = Instant::now();
    publisher.publish_pending();
    let elapsed = started.elapsed();

    let stats = publisher.stats();
    assert_eq!(stats.publish_attempts, 3);
    assert_eq!(stats.publish_failures, 3);
    assert_eq!(stats.publish_successes, 0);
    assert_eq!(stats.metrics_sent, 0);
    assert_eq!(stats.metrics_failed, 10);
    assert_eq!(publisher.queue_len(), 0);
    assert_eq!(transport.calls.lock().unwrap().len(), 3);

    // Backoff after each failed attempt: ~100 + ~200 + ~400 ms.
    assert!(elapsed >= Duration::from_millis(700), "elapsed {elapsed:?}");

    let calls = transport.calls.lock().unwrap();
    let gap1 = calls[1].0.duration_since(calls[0].0);
    let gap2 = calls[2].0.duration_since(calls[1].0);
    assert!(gap1 >= Duration::from_millis(100) && gap1 < Duration::from_millis(300));
    assert!(gap2 >= Duration::from_millis(200) && gap2 < Duration::from_millis(500));
}

#[test]
fn retry_success_before_exhaustion_delivers_the_batch() {
    let transport = Arc::new(ScriptedTransport::sequence(vec![500, 200], 200));
    let publisher = publisher_with(Arc::clone(&transport), 100, 1);

    for i in 0..5 {
        publisher.enqueue(QueuedMetric::new(100 + i, "cpu.total_usage", 50.0));
    }
    publisher.publish_pending();

    let stats = publisher.stats();
    assert_eq!(stats.publish_attempts, 2);
    assert_eq!(stats.publish_failures, 1);
    assert_eq!(stats.publish_successes, 1);
    assert_eq!(stats.metrics_sent, 5);
    assert_eq!(stats.metrics_failed, 0);
}

#[test]
fn batches_preserve_fifo_order_and_the_batch_limit() {
    let transport = Arc::new(ScriptedTransport::always(200));
    let publisher = publisher_with(Arc::clone(&transport), 500, 1);

    for i in 0..150 {
        publisher.enqueue(QueuedMetric::new(1000 + i, "seq.metric", i as f64));
    }
    publisher.publish_pending();
    assert_eq!(publisher.queue_len(), 50);

    let calls = transport.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let body: serde_json::Value = serde_json::from_str(&calls[0].1).unwrap();
    let metrics = body["metrics"].as_array().unwrap();
    assert_eq!(metrics.len(), 100);
    for (i, metric) in metrics.iter().enumerate() {
        assert_eq!(metric["value"].as_f64().unwrap(), i as f64);
    }
}

#[test]
fn envelope_carries_identity_and_tags() {
    let transport = Arc::new(ScriptedTransport::always(200));
    let mut config = PublishConfig {
        hostname: "web-01".to_string(),
        platform: "Linux".to_string(),
        auth_token: "secret".to_string(),
        ..PublishConfig::default()
    };
    config
        .host_tags
        .insert("env".to_string(), "prod".to_string());

    struct Shared(Arc<ScriptedTransport>);
    impl MetricTransport for Shared {
        fn post_metrics(&self, e: &str, t: &str, b: String) -> Result<u16, TransportError> {
            self.0.post_metrics(e, t, b)
        }
    }
    let publisher = NetworkPublisher::new(config, Box::new(Shared(Arc::clone(&transport))));
    publisher.set_endpoint(Some("http://aggregator:9000".to_string()));

    let mut tagged = QueuedMetric::new(42, "cpu.core_usage", 12.5);
    tagged.tags = r#"{"core":"0"}"#.to_string();
    publisher.enqueue(tagged);
    publisher.enqueue(QueuedMetric::new(42, "cpu.total_usage", 20.0));
    publisher.publish_pending();

    let calls = transport.calls.lock().unwrap();
    let body: serde_json::Value = serde_json::from_str(&calls[0].1).unwrap();
    assert_eq!(body["hostname"], "web-01");
    assert_eq!(body["platform"], "Linux");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["tags"]["env"], "prod");
    assert_eq!(body["metrics"][0]["metric_type"], "cpu.core_usage");
    assert_eq!(body["metrics"][0]["tags"], r#"{"core":"0"}"#);
    // Untagged metrics omit the field entirely.
    assert!(body["metrics"][1].get("tags").is_none());
}

#[test]
fn missing_endpoint_fails_fast_without_retries() {
    let transport = Arc::new(ScriptedTransport::always(200));
    let publisher = publisher_with(Arc::clone(&transport), 100, 1000);
    publisher.set_endpoint(None);

    publisher.enqueue(QueuedMetric::new(1, "cpu.total_usage", 1.0));
    let started = Instant::now();
    publisher.publish_pending();
    assert!(started.elapsed() < Duration::from_millis(100));

    let stats = publisher.stats();
    assert_eq!(stats.publish_attempts, 1);
    assert_eq!(stats.publish_failures, 1);
    assert_eq!(stats.metrics_failed, 1);
    assert!(transport.calls.lock().unwrap().is_empty());
}

#[test]
fn snapshot_adapters_report_partial_failure() {
    let transport = Arc::new(ScriptedTransport::always(200));
    // Room for only 3 of the 5 memory metrics.
    let publisher = publisher_with(transport, 3, 1);

    let ok = publisher.queue_memory(&MemorySnapshot {
        total_bytes: 100,
        used_bytes: 50,
        free_bytes: 25,
        available_bytes: 50,
        usage_percent: 50.0,
        ..MemorySnapshot::default()
    });
    assert!(!ok);
    assert_eq!(publisher.queue_len(), 3);
    assert_eq!(publisher.stats().queue_overflows, 2);
}

#[test]
fn stop_leaves_the_queue_intact() {
    let transport = Arc::new(ScriptedTransport::always(500));
    let publisher = Arc::new(publisher_with(transport, 100, 1));

    for i in 0..5 {
        publisher.enqueue(QueuedMetric::new(i, "cpu.total_usage", 1.0));
    }
    Arc::clone(&publisher).start();
    Arc::clone(&publisher).start(); // idempotent
    assert!(publisher.is_running());
    publisher.stop();
    publisher.stop(); // idempotent
    assert!(!publisher.is_running());
    // Whatever was not yet drained survives for the next start.
    assert!(publisher.queue_len() <= 5);
}

#[test]
fn stats_invariants_hold_across_mixed_outcomes() {
    let transport = Arc::new(ScriptedTransport::sequence(vec![500, 200, 500, 500, 500], 200));
    let publisher = publisher_with(transport, 500, 1);

    for round in 0..3 {
        for i in 0..10 {
            publisher.enqueue(QueuedMetric::new(round * 100 + i, "m.x", 1.0));
        }
        publisher.publish_pending();
    }

    let stats = publisher.stats();
    assert!(stats.publish_successes + stats.publish_failures <= stats.publish_attempts);
    assert!(stats.metrics_sent <= stats.publish_successes * crate::BATCH_LIMIT as u64);
    assert_eq!(stats.metrics_sent + stats.metrics_failed, stats.metrics_queued);
}

#[test]
fn static_discovery_parses_urls() {
    let settings = DiscoverySettings {
        aggregator_url: "http://192.168.1.100:9000".to_string(),
        ..DiscoverySettings::default()
    };
    let endpoints =
        discovery::discover(DiscoveryMethod::None, &settings, Duration::from_secs(1)).unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].address, "192.168.1.100");
    assert_eq!(endpoints[0].port, 9000);
    assert_eq!(endpoints[0].url(), "http://192.168.1.100:9000");

    let https = DiscoverySettings {
        aggregator_url: "https://agg.example.com".to_string(),
        ..DiscoverySettings::default()
    };
    let endpoints =
        discovery::discover(DiscoveryMethod::Static, &https, Duration::from_secs(1)).unwrap();
    assert_eq!(endpoints[0].port, 443);
    assert_eq!(endpoints[0].protocol, "https");
}

#[test]
fn empty_static_url_discovers_nothing() {
    let endpoints = discovery::discover(
        DiscoveryMethod::None,
        &DiscoverySettings::default(),
        Duration::from_secs(1),
    )
    .unwrap();
    assert!(endpoints.is_empty());

    let first = discovery::discover_first(
        DiscoveryMethod::Mdns,
        &DiscoverySettings::default(),
        Duration::from_secs(1),
    )
    .unwrap();
    assert!(first.is_none());
}

#[test]
fn discovery_method_parses_config_strings() {
    assert_eq!("none".parse::<DiscoveryMethod>().unwrap(), DiscoveryMethod::None);
    assert_eq!("mdns".parse::<DiscoveryMethod>().unwrap(), DiscoveryMethod::Mdns);
    assert_eq!("consul".parse::<DiscoveryMethod>().unwrap(), DiscoveryMethod::Consul);
    assert_eq!("static".parse::<DiscoveryMethod>().unwrap(), DiscoveryMethod::Static);
    assert!("zeroconf".parse::<DiscoveryMethod>().is_err());
}
