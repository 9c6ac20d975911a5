//! Event handler: the fan-out stage between the watch loops and the
//! per-subscriber senders.
//!
//! Ingestion (`handle`) maps hydrated watch events onto the closed resource
//! routing table and enqueues them on the main queue. The pump loop
//! atomically moves each event from the main queue to the duplicate queue
//! (where the external identifier pipeline picks host events up), decodes
//! it, and fans it out: one dist inst per owned subscriber, stamped with a
//! monotonically increasing per-subscription dist id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use alder_core::DistInst;
use alder_core::EventCache;
use alder_core::EventData;
use alder_core::EventInst;
use alder_core::EventType;
use alder_core::SubscriptionId;
use alder_core::WatchEventDetail;
use alder_core::constants::DEFAULT_HANDLE_RETRY_INTERVAL;
use alder_core::constants::DEFAULT_TRANS_TIMEOUT;
use alder_core::constants::EVENT_QUEUE_DUPLICATE_KEY;
use alder_core::constants::EVENT_QUEUE_KEY;
use alder_core::constants::NIL_STR;
use alder_core::event::OBJ_ID_FIELD;
use alder_core::event::obj_type;
use alder_core::event::route_for;
use alder_core::keys;
use alder_core::unix_now;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::DistributionError;
use crate::error::Result;
use crate::registry::SubscriptionRegistry;
use crate::ring::HashRing;
use crate::sender::EventSender;
use crate::sender::idle;

/// Fans events out to per-subscriber senders, creating senders lazily for
/// subscriptions this instance owns.
pub struct EventHandler {
    cache: Arc<dyn EventCache>,
    registry: Arc<SubscriptionRegistry>,
    ring: Arc<HashRing>,
    http: reqwest::Client,
    /// Keyed supervisor of resident sender tasks, subid → sender.
    senders: RwLock<HashMap<SubscriptionId, Arc<EventSender>>>,
}

impl EventHandler {
    /// Create a handler; senders spawn lazily at first fan-out.
    pub fn new(
        cache: Arc<dyn EventCache>,
        registry: Arc<SubscriptionRegistry>,
        ring: Arc<HashRing>,
        http: reqwest::Client,
    ) -> Arc<Self> {
        Arc::new(EventHandler {
            cache,
            registry,
            ring,
            http,
            senders: RwLock::new(HashMap::new()),
        })
    }

    /// Ingest hydrated watch events onto the main queue.
    ///
    /// Synthetic details are skipped. A cache failure aborts the batch so
    /// the caller retries without advancing its cursor.
    pub async fn handle(&self, events: &[WatchEventDetail]) -> Result<()> {
        for event in events {
            let Some(kind) = event.kind else {
                continue;
            };
            let route = route_for(event.resource);
            let action = kind.into();

            // Delete events carry only the prior image.
            let data = match action {
                alder_core::EventAction::Delete => EventData {
                    pre_data: event.detail.clone(),
                    cur_data: None,
                },
                _ => EventData {
                    pre_data: None,
                    cur_data: event.detail.clone(),
                },
            };

            let inst = EventInst {
                cursor: event.cursor.clone(),
                event_type: route.event_type,
                obj_type: route.obj_type.to_string(),
                action,
                action_time: unix_now(),
                data: vec![data],
            };

            let payload = match serde_json::to_string(&inst) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(cursor = %event.cursor, error = %e, "skipping unserializable event");
                    continue;
                }
            };

            self.cache.lpush(EVENT_QUEUE_KEY, payload).await?;
        }
        Ok(())
    }

    /// Start the pump loop draining the main queue.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) {
        let handler = self;
        tokio::spawn(async move {
            info!("event handler pump started");
            handler.pump(cancel).await;
            info!("event handler pump stopped");
        });
    }

    async fn pump(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let popped = tokio::select! {
                _ = cancel.cancelled() => break,
                popped = self.cache.brpoplpush(EVENT_QUEUE_KEY, EVENT_QUEUE_DUPLICATE_KEY, DEFAULT_TRANS_TIMEOUT) => popped,
            };

            let raw = match popped {
                Ok(Some(raw)) if !raw.is_empty() && raw != NIL_STR => raw,
                Ok(_) => {
                    if idle(&cancel, DEFAULT_HANDLE_RETRY_INTERVAL).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "popping main event queue failed");
                    if idle(&cancel, DEFAULT_HANDLE_RETRY_INTERVAL).await {
                        break;
                    }
                    continue;
                }
            };

            let event: EventInst = match serde_json::from_str(&raw) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable event");
                    continue;
                }
            };

            if let Err(e) = self.handle_event(&event, &cancel).await {
                warn!(cursor = %event.cursor, error = %e, "handling event failed");
                if idle(&cancel, DEFAULT_HANDLE_RETRY_INTERVAL).await {
                    break;
                }
            }
        }
    }

    /// Fan one event out to every owned subscriber of its type.
    async fn handle_event(&self, event: &EventInst, cancel: &CancellationToken) -> Result<()> {
        for dist in dist_insts_for(event)? {
            let event_type = dist.event.subscription_type();
            let subscribers = self.registry.find_subscribers(&event_type);
            if subscribers.is_empty() {
                debug!(event_type = %event_type, "no subscribers, ignoring event");
                continue;
            }

            for subid in subscribers {
                if !self.ring.is_match(&subid.to_string()) {
                    continue;
                }
                // Each owned subscriber gets its own copy so the id stamps
                // below cannot race.
                self.push_to_sender(subid, dist.clone(), cancel).await?;
            }
        }
        Ok(())
    }

    /// Stamp ids and enqueue onto the subscriber's sender, creating it on
    /// first use.
    async fn push_to_sender(&self, subid: SubscriptionId, mut dist: DistInst, cancel: &CancellationToken) -> Result<()> {
        let sender = {
            let mut senders = self.senders.write().unwrap_or_else(|e| e.into_inner());
            senders
                .entry(subid)
                .or_insert_with(|| {
                    let sender = Arc::new(EventSender::new(
                        subid,
                        self.cache.clone(),
                        self.registry.clone(),
                        self.ring.clone(),
                        self.http.clone(),
                    ));
                    let task = sender.clone();
                    let cancel = cancel.child_token();
                    tokio::spawn(async move { task.run(cancel).await });
                    sender
                })
                .clone()
        };

        let dstb_id = self.cache.incr(&keys::dist_id(subid)).await?;
        dist.dstb_id = dstb_id;
        dist.subscription_id = subid;

        sender.enqueue(&dist).await
    }

    /// Number of resident senders, for tests and diagnostics.
    pub fn sender_count(&self) -> usize {
        self.senders.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// The dist insts an event expands to.
///
/// Exactly one dist per event, even when `data` holds several items. For
/// generic object events the object type is refined from the payload's
/// `bk_obj_id` field, taken from the prior image on delete; a missing field
/// falls through with the generic type.
fn dist_insts_for(event: &EventInst) -> Result<Vec<DistInst>> {
    let mut dist = DistInst {
        event: event.clone(),
        subscription_id: 0,
        dstb_id: 0,
    };

    if event.event_type == EventType::InstanceData && event.obj_type == obj_type::OBJECT {
        let Some(data) = event.data.first() else {
            return Ok(Vec::new());
        };

        let payload = match event.action {
            alder_core::EventAction::Delete => &data.pre_data,
            _ => &data.cur_data,
        };

        let Some(Value::Object(fields)) = payload else {
            return Err(DistributionError::MalformedEvent {
                message: format!("object event at cursor '{}' has no document payload", event.cursor),
            });
        };

        match fields.get(OBJ_ID_FIELD).and_then(Value::as_str) {
            Some(concrete) => dist.event.obj_type = concrete.to_string(),
            None => {
                warn!(cursor = %event.cursor, "object event payload missing {OBJ_ID_FIELD}");
            }
        }
    }

    Ok(vec![dist])
}

#[cfg(test)]
mod tests {
    use alder_core::ConfirmMode;
    use alder_core::CursorType;
    use alder_core::EventAction;
    use alder_core::EventKind;
    use alder_core::MemoryCache;
    use alder_core::Subscription;
    use serde_json::json;

    use super::*;
    use crate::reflector::SubscriptionEvent;

    fn handler_with(
        cache: Arc<MemoryCache>,
        registry: Arc<SubscriptionRegistry>,
        ring: Arc<HashRing>,
    ) -> Arc<EventHandler> {
        EventHandler::new(cache, registry, ring, reqwest::Client::new())
    }

    fn object_event(action: EventAction, payload: Value) -> EventInst {
        let data = match action {
            EventAction::Delete => EventData {
                pre_data: Some(payload),
                cur_data: None,
            },
            _ => EventData {
                pre_data: None,
                cur_data: Some(payload),
            },
        };
        EventInst {
            cursor: "c1".to_string(),
            event_type: EventType::InstanceData,
            obj_type: obj_type::OBJECT.to_string(),
            action,
            action_time: unix_now(),
            data: vec![data],
        }
    }

    #[test]
    fn object_type_is_refined_from_the_payload() {
        let event = object_event(EventAction::Create, json!({"bk_obj_id": "switch", "name": "sw-1"}));
        let dists = dist_insts_for(&event).unwrap();
        assert_eq!(dists.len(), 1);
        assert_eq!(dists[0].event.obj_type, "switch");
    }

    #[test]
    fn delete_refines_from_the_prior_image() {
        let event = object_event(EventAction::Delete, json!({"bk_obj_id": "router"}));
        let dists = dist_insts_for(&event).unwrap();
        assert_eq!(dists[0].event.obj_type, "router");
    }

    #[test]
    fn missing_obj_id_falls_through_generic() {
        let event = object_event(EventAction::Update, json!({"name": "mystery"}));
        let dists = dist_insts_for(&event).unwrap();
        assert_eq!(dists[0].event.obj_type, obj_type::OBJECT);
    }

    #[test]
    fn object_event_without_payload_is_malformed() {
        let mut event = object_event(EventAction::Create, json!({}));
        event.data[0].cur_data = Some(json!("not an object"));
        assert!(dist_insts_for(&event).is_err());

        let mut event = object_event(EventAction::Create, json!({}));
        event.data.clear();
        assert!(dist_insts_for(&event).unwrap().is_empty());
    }

    #[test]
    fn single_dist_even_with_multiple_data_items() {
        let mut event = object_event(EventAction::Create, json!({"bk_obj_id": "switch"}));
        event.data.push(EventData {
            pre_data: None,
            cur_data: Some(json!({"bk_obj_id": "router"})),
        });
        // One dist per event; extra data items do not multiply fan-out.
        assert_eq!(dist_insts_for(&event).unwrap().len(), 1);

        let host = EventInst {
            obj_type: obj_type::HOST.to_string(),
            ..event
        };
        assert_eq!(dist_insts_for(&host).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ingestion_routes_resources_onto_the_main_queue() {
        let cache = MemoryCache::new();
        let registry = SubscriptionRegistry::new();
        let ring = Arc::new(HashRing::new("a", vec!["a".to_string()]));
        let handler = handler_with(cache.clone(), registry, ring);

        let events = vec![
            WatchEventDetail {
                cursor: "h1".to_string(),
                resource: CursorType::Host,
                kind: Some(EventKind::Create),
                detail: Some(json!({"bk_host_id": 1})),
            },
            WatchEventDetail {
                cursor: "b1".to_string(),
                resource: CursorType::Biz,
                kind: Some(EventKind::Delete),
                detail: Some(json!({"bk_biz_id": 2})),
            },
            // Synthetic detail: skipped.
            WatchEventDetail::synthetic("x", CursorType::Host),
        ];

        handler.handle(&events).await.unwrap();
        assert_eq!(cache.llen(EVENT_QUEUE_KEY).await.unwrap(), 2);

        let first: EventInst =
            serde_json::from_str(&cache.blpop(EVENT_QUEUE_KEY, std::time::Duration::from_millis(10)).await.unwrap().unwrap())
                .unwrap();
        assert_eq!(first.obj_type, obj_type::HOST);
        assert_eq!(first.action, EventAction::Create);
        assert!(first.data[0].cur_data.is_some());
        assert!(first.data[0].pre_data.is_none());

        let second: EventInst =
            serde_json::from_str(&cache.blpop(EVENT_QUEUE_KEY, std::time::Duration::from_millis(10)).await.unwrap().unwrap())
                .unwrap();
        assert_eq!(second.obj_type, obj_type::APP);
        assert_eq!(second.action, EventAction::Delete);
        // Delete events carry only the prior image.
        assert!(second.data[0].pre_data.is_some());
        assert!(second.data[0].cur_data.is_none());
    }

    #[tokio::test]
    async fn fan_out_stamps_monotonic_dist_ids() {
        let cache = MemoryCache::new();
        let registry = SubscriptionRegistry::new();
        registry.apply(SubscriptionEvent::Added(Subscription {
            subscription_id: 7,
            owner_id: "o".to_string(),
            subscription_form: "hostcreate".to_string(),
            callback_url: "http://127.0.0.1:1/cb".to_string(),
            confirm_mode: ConfirmMode::HttpStatus,
            confirm_pattern: "200".to_string(),
            timeout_seconds: 0,
        }));
        let ring = Arc::new(HashRing::new("a", vec!["a".to_string()]));
        let handler = handler_with(cache.clone(), registry, ring);

        let event = EventInst {
            cursor: "h1".to_string(),
            event_type: EventType::InstanceData,
            obj_type: obj_type::HOST.to_string(),
            action: EventAction::Create,
            action_time: unix_now(),
            data: vec![EventData::default()],
        };

        // Pre-cancelled token keeps the spawned sender idle so the queue
        // contents can be inspected here.
        let cancel = CancellationToken::new();
        cancel.cancel();

        handler.handle_event(&event, &cancel).await.unwrap();
        handler.handle_event(&event, &cancel).await.unwrap();
        assert_eq!(handler.sender_count(), 1);

        let queue = keys::subscriber_queue(7);
        let mut seen = Vec::new();
        for _ in 0..2 {
            let raw = cache.blpop(&queue, std::time::Duration::from_millis(50)).await.unwrap().unwrap();
            let dist: DistInst = serde_json::from_str(&raw).unwrap();
            assert_eq!(dist.subscription_id, 7);
            seen.push(dist.dstb_id);
        }
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn unowned_subscribers_are_skipped() {
        let cache = MemoryCache::new();
        let registry = SubscriptionRegistry::new();
        registry.apply(SubscriptionEvent::Added(Subscription {
            subscription_id: 7,
            owner_id: "o".to_string(),
            subscription_form: "hostcreate".to_string(),
            callback_url: "http://127.0.0.1:1/cb".to_string(),
            confirm_mode: ConfirmMode::HttpStatus,
            confirm_pattern: "200".to_string(),
            timeout_seconds: 0,
        }));
        // This instance is not in the ring membership, so it owns nothing.
        let ring = Arc::new(HashRing::new("me", vec!["somebody-else".to_string()]));
        let handler = handler_with(cache.clone(), registry, ring);

        let event = EventInst {
            cursor: "h1".to_string(),
            event_type: EventType::InstanceData,
            obj_type: obj_type::HOST.to_string(),
            action: EventAction::Create,
            action_time: unix_now(),
            data: vec![EventData::default()],
        };

        let cancel = CancellationToken::new();
        handler.handle_event(&event, &cancel).await.unwrap();
        assert_eq!(handler.sender_count(), 0);
        assert_eq!(cache.llen(&keys::subscriber_queue(7)).await.unwrap(), 0);
    }
}
