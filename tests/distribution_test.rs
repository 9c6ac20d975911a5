//! End-to-end tests of the distribution engine.
//!
//! Each test wires the full engine over in-memory backends: event log,
//! cache, subscription store, hash ring, registry, handler, distributor.
//! Subscriber callbacks land on a local sink server.

mod support;

use std::sync::Arc;
use std::time::Duration;

use alder_core::ClusterTime;
use alder_core::ConfirmMode;
use alder_core::Cursor;
use alder_core::CursorType;
use alder_core::DistInst;
use alder_core::EventAction;
use alder_core::EventCache;
use alder_core::EventData;
use alder_core::EventInst;
use alder_core::EventKind;
use alder_core::EventType;
use alder_core::MemoryCache;
use alder_core::constants::CALLBACK_FAILURE_FIELD;
use alder_core::constants::CALLBACK_TOTAL_FIELD;
use alder_core::keys;
use alder_core::unix_now;
use alder_distribution::Distributor;
use alder_distribution::EventHandler;
use alder_distribution::EventSender;
use alder_distribution::HashRing;
use alder_distribution::MemoryEventLog;
use alder_distribution::MemorySubscriptionStore;
use alder_distribution::SubscriptionEvent;
use alder_distribution::SubscriptionRegistry;
use axum::http::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use support::start_callback_sink;
use support::subscription_for;
use support::wait_until;

struct Engine {
    cache: Arc<MemoryCache>,
    log: Arc<MemoryEventLog>,
    store: Arc<MemorySubscriptionStore>,
    registry: Arc<SubscriptionRegistry>,
    cancel: CancellationToken,
}

impl Engine {
    /// Wire the engine with a single-instance ring owning everything.
    async fn start() -> Self {
        let cache = MemoryCache::new();
        let log = MemoryEventLog::new();
        let store = MemorySubscriptionStore::new();
        let registry = SubscriptionRegistry::new();
        let ring = Arc::new(HashRing::new("node-0", vec!["node-0".to_string()]));
        let handler = EventHandler::new(cache.clone(), registry.clone(), ring.clone(), reqwest::Client::new());
        let distributor =
            Distributor::new(cache.clone(), log.clone(), store.clone(), registry.clone(), handler, ring);

        let cancel = CancellationToken::new();
        distributor.start(cancel.clone()).await.expect("start distributor");

        Engine {
            cache,
            log,
            store,
            registry,
            cancel,
        }
    }

    async fn counters(&self, subid: i64) -> (i64, i64) {
        let counts = self.cache.hget_all(&keys::callback_count(subid)).await.unwrap();
        (
            counts.get(CALLBACK_TOTAL_FIELD).copied().unwrap_or(0),
            counts.get(CALLBACK_FAILURE_FIELD).copied().unwrap_or(0),
        )
    }

    /// Block until the registry has indexed `subid` under `token`, so a
    /// following log append cannot race the subscription registration.
    async fn wait_subscribed(&self, token: &str, subid: i64) {
        let registry = self.registry.clone();
        let token_owned = token.to_string();
        assert!(
            wait_until(Duration::from_secs(2), move || {
                registry.find_subscribers(&token_owned).contains(&subid)
            })
            .await,
            "subscription never registered for {token}"
        );
    }

    /// Poll until the subscription's counters match `want`.
    async fn wait_counters(&self, subid: i64, want: (i64, i64)) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            if self.counters(subid).await == want {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn host_dist(dstb_id: i64, action_time: u64) -> DistInst {
    DistInst {
        event: EventInst {
            cursor: "c1".to_string(),
            event_type: EventType::InstanceData,
            obj_type: "host".to_string(),
            action: EventAction::Create,
            action_time,
            data: vec![EventData::default()],
        },
        subscription_id: 7,
        dstb_id,
    }
}

#[tokio::test]
async fn cold_start_delivers_to_the_owned_subscriber() {
    let (sink_addr, sink) = start_callback_sink(StatusCode::OK, "").await;

    let engine = Engine::start().await;
    engine.store.upsert(subscription_for(7, "hostcreate", sink_addr, "200"));
    engine.wait_subscribed("hostcreate", 7).await;
    engine.log.append(CursorType::Host, EventKind::Create, json!({"bk_host_id": 1}));

    assert!(
        wait_until(Duration::from_secs(5), || sink.hits() >= 1).await,
        "callback never arrived"
    );

    let dist: DistInst = serde_json::from_str(&sink.body_at(0)).unwrap();
    assert_eq!(dist.subscription_id, 7);
    assert_eq!(dist.dstb_id, 1);
    assert_eq!(dist.event.event_type, EventType::InstanceData);
    assert_eq!(dist.event.obj_type, "host");
    assert_eq!(dist.event.action, EventAction::Create);
    assert_eq!(dist.event.data.len(), 1);
    assert!(dist.event.data[0].cur_data.is_some());

    assert!(engine.wait_counters(7, (1, 0)).await);

    // The confirmed delivery persisted the subscriber's replay floor.
    let delivered: DistInst = serde_json::from_str(&sink.body_at(0)).unwrap();
    let cursor_key = keys::subscriber_cursor("o", "hostcreate", 7);
    let persisted = engine.cache.get(&cursor_key).await.unwrap();
    assert_eq!(persisted, Some(delivered.event.cursor));
}

#[tokio::test]
async fn confirmation_mismatch_counts_a_failure_and_does_not_retry() {
    let (sink_addr, sink) = start_callback_sink(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;

    let engine = Engine::start().await;
    engine.store.upsert(subscription_for(7, "hostcreate", sink_addr, "200"));
    engine.wait_subscribed("hostcreate", 7).await;
    engine.log.append(CursorType::Host, EventKind::Create, json!({"bk_host_id": 1}));

    assert!(wait_until(Duration::from_secs(5), || sink.hits() >= 1).await);
    assert!(engine.wait_counters(7, (1, 1)).await);

    // Drop-on-failure: no second attempt and no cursor advance for subid 7.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sink.hits(), 1);
    let persisted = engine.cache.get(&keys::subscriber_cursor("o", "hostcreate", 7)).await.unwrap();
    assert!(persisted.is_none());
}

#[tokio::test]
async fn dist_ids_are_strictly_increasing_per_subscription() {
    let (sink_addr, sink) = start_callback_sink(StatusCode::OK, "").await;

    let engine = Engine::start().await;
    engine.store.upsert(subscription_for(7, "hostcreate", sink_addr, "200"));
    engine.wait_subscribed("hostcreate", 7).await;
    for i in 0..3 {
        engine.log.append(CursorType::Host, EventKind::Create, json!({"bk_host_id": i}));
    }

    assert!(wait_until(Duration::from_secs(5), || sink.hits() >= 3).await);

    let ids: Vec<i64> = (0..3)
        .map(|i| serde_json::from_str::<DistInst>(&sink.body_at(i)).unwrap().dstb_id)
        .collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "dist ids not increasing: {ids:?}");
}

#[tokio::test]
async fn events_for_unsubscribed_types_are_ignored() {
    let (sink_addr, sink) = start_callback_sink(StatusCode::OK, "").await;

    let engine = Engine::start().await;
    engine.store.upsert(subscription_for(7, "hostdelete", sink_addr, "200"));
    engine.log.append(CursorType::Host, EventKind::Create, json!({"bk_host_id": 1}));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(sink.hits(), 0);
    assert_eq!(engine.counters(7).await, (0, 0));
}

#[tokio::test]
async fn truncated_floor_resumes_from_the_log_head() {
    let (sink_addr, sink) = start_callback_sink(StatusCode::OK, "").await;

    let cache = MemoryCache::new();
    let log = MemoryEventLog::new();
    let store = MemorySubscriptionStore::new();
    let registry = SubscriptionRegistry::new();
    let ring = Arc::new(HashRing::new("node-0", vec!["node-0".to_string()]));
    let handler = EventHandler::new(cache.clone(), registry.clone(), ring.clone(), reqwest::Client::new());
    let distributor = Distributor::new(cache.clone(), log.clone(), store.clone(), registry, handler, ring);

    store.upsert(subscription_for(7, "hostcreate", sink_addr, "200"));

    // Four nodes, then the retention window drops the first two. The
    // subscriber's persisted cursor points at the truncated node 1.
    for i in 1..=4u64 {
        log.append_at(
            CursorType::Host,
            EventKind::Create,
            json!({"seq": i}),
            ClusterTime::from_sec(100 * i),
        );
    }
    log.truncate_before(CursorType::Host, 3);

    let stale = Cursor {
        resource: CursorType::Host,
        cluster_time: ClusterTime::from_sec(100),
        id: 1,
    };
    cache.set(&keys::subscriber_cursor("o", "hostcreate", 7), stale.encode()).await.unwrap();

    let cancel = CancellationToken::new();
    distributor.start(cancel.clone()).await.expect("start distributor");

    // The loop hits the truncated window, backs off, resumes from the head,
    // and delivers the two retained events in order.
    assert!(
        wait_until(Duration::from_secs(5), || sink.hits() >= 2).await,
        "retained events not delivered"
    );

    let first: DistInst = serde_json::from_str(&sink.body_at(0)).unwrap();
    let second: DistInst = serde_json::from_str(&sink.body_at(1)).unwrap();
    assert_eq!(first.event.data[0].cur_data.as_ref().unwrap()["seq"], 3);
    assert_eq!(second.event.data[0].cur_data.as_ref().unwrap()["seq"], 4);

    cancel.cancel();
}

#[tokio::test]
async fn drifted_ownership_preserves_the_queue() {
    let (sink_addr, sink) = start_callback_sink(StatusCode::OK, "").await;

    // This instance owns nothing: the ring's only member is another
    // instance.
    let cache = MemoryCache::new();
    let registry = SubscriptionRegistry::new();
    let ring = Arc::new(HashRing::new("me", vec!["somebody-else".to_string()]));
    registry.apply(SubscriptionEvent::Added(subscription_for(7, "hostcreate", sink_addr, "200")));

    let sender = Arc::new(EventSender::new(7, cache.clone(), registry, ring, reqwest::Client::new()));
    sender.enqueue(&host_dist(1, unix_now())).await.unwrap();

    let cancel = CancellationToken::new();
    let task = {
        let sender = sender.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { sender.run(cancel).await })
    };

    // The sender observes it is not the owner and must not drain.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sink.hits(), 0);
    assert_eq!(cache.llen(&keys::subscriber_queue(7)).await.unwrap(), 1);

    cancel.cancel();
    let _ = task.await;
}

#[tokio::test]
async fn fused_events_are_dropped_without_counters() {
    let (sink_addr, sink) = start_callback_sink(StatusCode::OK, "").await;

    let cache = MemoryCache::new();
    let registry = SubscriptionRegistry::new();
    let ring = Arc::new(HashRing::new("me", vec!["me".to_string()]));
    registry.apply(SubscriptionEvent::Added(subscription_for(7, "hostcreate", sink_addr, "200")));

    let sender = Arc::new(EventSender::new(7, cache.clone(), registry, ring, reqwest::Client::new()));

    // Six minutes old: outside the fusing window.
    sender.enqueue(&host_dist(1, unix_now() - 6 * 60)).await.unwrap();

    let cancel = CancellationToken::new();
    let task = {
        let sender = sender.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { sender.run(cancel).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if cache.llen(&keys::subscriber_queue(7)).await.unwrap() == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "fused event never drained");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.hits(), 0);
    assert!(cache.hget_all(&keys::callback_count(7)).await.unwrap().is_empty());

    cancel.cancel();
    let _ = task.await;
}

#[tokio::test]
async fn regex_confirmation_end_to_end() {
    let (sink_addr, sink) = start_callback_sink(StatusCode::OK, "OK\n").await;

    let engine = Engine::start().await;
    let mut sub = subscription_for(7, "hostcreate", sink_addr, "unused");
    sub.confirm_mode = ConfirmMode::Regular;
    sub.confirm_pattern = "^OK".to_string();
    engine.store.upsert(sub);
    engine.wait_subscribed("hostcreate", 7).await;

    engine.log.append(CursorType::Host, EventKind::Create, json!({"bk_host_id": 1}));

    assert!(wait_until(Duration::from_secs(5), || sink.hits() >= 1).await);
    assert!(engine.wait_counters(7, (1, 0)).await);
}

#[tokio::test]
async fn registry_tracks_live_subscription_updates() {
    let (sink_addr, _sink) = start_callback_sink(StatusCode::OK, "").await;

    let engine = Engine::start().await;
    engine.store.upsert(subscription_for(7, "hostcreate,hostupdate", sink_addr, "200"));

    let registry = engine.registry.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            registry.find_subscribers("hostcreate") == vec![7]
        })
        .await
    );

    // "hostcreate,hostupdate" -> "hostupdate,hostdelete": exactly the
    // symmetric difference moves.
    engine.store.upsert(subscription_for(7, "hostupdate,hostdelete", sink_addr, "200"));

    let registry = engine.registry.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            registry.find_subscribers("hostcreate").is_empty()
                && registry.find_subscribers("hostupdate") == vec![7]
                && registry.find_subscribers("hostdelete") == vec![7]
        })
        .await
    );

    engine.store.remove(7);
    let registry = engine.registry.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            registry.find_subscription(7).is_none()
        })
        .await
    );
}
