//! Parity tests for the cooperative flow variant over the async mock backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flowbridge::adapters::{AsyncMockPublisher, AsyncMockSource, AsyncSource};
use flowbridge::aio::{AsyncFlow, FanFlow, FunnelFlow, FunnelSource, OneToOneFlow};
use flowbridge::config::{BackPressureConfig, ThreadPoolConfig, TopicMapping};
use flowbridge::message::Message;
use flowbridge::processor::AsyncPassThroughProcessor;
use flowbridge::routing::{DestinationResolver, TopicMap};

fn pool(max_workers: usize, queue_size: usize) -> ThreadPoolConfig {
    ThreadPoolConfig {
        max_workers,
        queue_size,
    }
}

fn topic_map(pairs: &[(&str, &str)]) -> TopicMap {
    let mappings: Vec<TopicMapping> = pairs
        .iter()
        .map(|(s, d)| TopicMapping {
            source_topic: s.to_string(),
            destination_topic: d.to_string(),
        })
        .collect();
    TopicMap::from_mappings(&mappings)
}

async fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn async_one_to_one_happy_path() {
    let source = Arc::new(AsyncMockSource::scripted(vec![
        Message::new("A", b"1".to_vec()),
        Message::new("A", b"2".to_vec()),
        Message::new("A", b"3".to_vec()),
    ]));
    let publisher = Arc::new(AsyncMockPublisher::new());

    let flow = Arc::new(OneToOneFlow::new(
        source.clone(),
        publisher.clone(),
        topic_map(&[("A", "A'")]),
        pool(1, 100),
        BackPressureConfig::default(),
        Arc::new(AsyncPassThroughProcessor),
    ));

    let handle = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.run().await })
    };
    assert!(wait_until(Duration::from_secs(5), || publisher.publish_count() == 3).await);

    source.close().await.unwrap();
    flow.shutdown().await;
    handle.await.unwrap().unwrap();

    let published = publisher.published();
    let payloads: Vec<&[u8]> = published.iter().map(|(m, _)| m.payload.as_slice()).collect();
    assert_eq!(payloads, vec![b"1".as_slice(), b"2".as_slice(), b"3".as_slice()]);
    assert!(published.iter().all(|(_, topic)| topic == "A'"));

    let snapshot = flow.metrics().snapshot();
    assert_eq!(snapshot.source_metrics["A"].message_count, 3);
    assert_eq!(snapshot.destination_metrics["A'"].message_count, 3);

    let stats = flow.stats();
    assert_eq!(stats.domain_depth, 0);
    assert_eq!(stats.publish_depth, 0);
}

#[tokio::test]
async fn async_fan_routes_by_header() {
    let source = Arc::new(AsyncMockSource::scripted(vec![
        Message::new("in", b"a".to_vec()).with_header("dest", "X"),
        Message::new("in", b"b".to_vec()).with_header("dest", "Y"),
        Message::new("in", b"c".to_vec()),
    ]));
    let publisher = Arc::new(AsyncMockPublisher::new());

    let flow = Arc::new(FanFlow::new(
        source.clone(),
        "in",
        publisher.clone(),
        DestinationResolver::from_config("header", "dest").unwrap(),
        pool(1, 100),
        BackPressureConfig::default(),
        Arc::new(AsyncPassThroughProcessor),
    ));

    let handle = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.run().await })
    };
    assert!(wait_until(Duration::from_secs(5), || publisher.publish_count() == 3).await);

    source.close().await.unwrap();
    flow.shutdown().await;
    handle.await.unwrap().unwrap();

    let topics: Vec<String> = publisher.published().into_iter().map(|(_, t)| t).collect();
    assert_eq!(topics, vec!["X", "Y", "default"]);
}

#[tokio::test]
async fn async_funnel_merges_sources() {
    let first = Arc::new(AsyncMockSource::scripted(vec![
        Message::new("S1", b"a".to_vec()),
        Message::new("S1", b"b".to_vec()),
    ]));
    let second = Arc::new(AsyncMockSource::scripted(vec![
        Message::new("S2", b"c".to_vec()),
        Message::new("S2", b"d".to_vec()),
    ]));
    let publisher = Arc::new(AsyncMockPublisher::new());

    let flow = Arc::new(FunnelFlow::new(
        vec![
            FunnelSource { source: first.clone(), topics: vec![] },
            FunnelSource { source: second.clone(), topics: vec![] },
        ],
        publisher.clone(),
        "OUT",
        pool(2, 100),
        BackPressureConfig::default(),
        Arc::new(AsyncPassThroughProcessor),
    ));

    let handle = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.run().await })
    };
    assert!(wait_until(Duration::from_secs(5), || publisher.publish_count() == 4).await);

    first.close().await.unwrap();
    second.close().await.unwrap();
    flow.shutdown().await;
    handle.await.unwrap().unwrap();

    let published = publisher.published();
    assert_eq!(published.len(), 4);
    assert!(published.iter().all(|(_, topic)| topic == "OUT"));
    assert_eq!(flow.metrics().snapshot().destination_metrics["OUT"].message_count, 4);
}

#[tokio::test]
async fn async_shutdown_is_idempotent() {
    let source = Arc::new(AsyncMockSource::scripted(vec![Message::new("A", b"1".to_vec())]));
    let publisher = Arc::new(AsyncMockPublisher::new());

    let flow = Arc::new(OneToOneFlow::new(
        source.clone(),
        publisher.clone(),
        topic_map(&[("A", "B")]),
        pool(2, 10),
        BackPressureConfig::default(),
        Arc::new(AsyncPassThroughProcessor),
    ));

    let handle = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.run().await })
    };
    assert!(wait_until(Duration::from_secs(5), || publisher.publish_count() == 1).await);
    source.close().await.unwrap();

    flow.shutdown().await;
    flow.shutdown().await;
    flow.shutdown().await;

    handle.await.unwrap().unwrap();
    assert_eq!(publisher.publish_count(), 1);

    let stats = flow.stats();
    assert_eq!(stats.domain_depth, 0);
    assert_eq!(stats.publish_depth, 0);
}

#[tokio::test]
async fn async_back_pressure_bounds_publish_queue() {
    let total = 50;
    let capacity = 10;
    let inputs: Vec<Message> = (0..total)
        .map(|i| Message::new("IN", format!("{i}").into_bytes()))
        .collect();
    let source = Arc::new(AsyncMockSource::scripted(inputs));
    let publisher = Arc::new(AsyncMockPublisher::with_delay(Duration::from_millis(5)));

    let flow = Arc::new(OneToOneFlow::new(
        source.clone(),
        publisher.clone(),
        topic_map(&[("IN", "OUT")]),
        pool(1, capacity),
        BackPressureConfig {
            enabled: true,
            queue_high_watermark: 0.8,
            queue_low_watermark: 0.5,
        },
        Arc::new(AsyncPassThroughProcessor),
    ));

    let handle = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.run().await })
    };

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut max_publish = 0;
    while publisher.publish_count() < total && Instant::now() < deadline {
        max_publish = max_publish.max(flow.stats().publish_depth);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(publisher.publish_count(), total);

    source.close().await.unwrap();
    flow.shutdown().await;
    handle.await.unwrap().unwrap();

    assert!(max_publish <= capacity);
    let stats = flow.stats();
    assert_eq!(stats.domain_depth, 0);
    assert_eq!(stats.publish_depth, 0);
}
