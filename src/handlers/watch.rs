//! Watch API handler.
//!
//! `POST /watch/{resource}` serves three request shapes, distinguished by
//! body fields in precedence order: a cursor resumes after it, a non-zero
//! `start_from` resumes from that cluster time, anything else watches from
//! now. Validation failures come back as a `{code, message}` envelope with
//! HTTP 200, consistent with the surrounding service.

use alder_core::CursorType;
use alder_core::NO_EVENT_CURSOR;
use alder_core::WatchEventDetail;
use alder_core::WatchEventOptions;
use alder_core::WatchResp;
use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

/// Success code of the response envelope.
const CODE_OK: u32 = 0;
/// Invalid request input (unknown resource, bad options, bad cursor).
const CODE_INVALID_INPUT: u32 = 4001;

/// Response envelope shared by success and failure paths.
#[derive(Debug, Serialize)]
pub struct ApiReply<T> {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiReply<T> {
    fn ok(data: T) -> Self {
        ApiReply {
            code: CODE_OK,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    fn err(code: u32, message: impl Into<String>) -> Self {
        ApiReply {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Request id header threaded through watcher calls for diagnostics.
const REQUEST_ID_HEADER: &str = "x-request-id";

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// `POST /watch/{resource}`
pub async fn watch_event(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    headers: HeaderMap,
    Json(options): Json<WatchEventOptions>,
) -> Json<ApiReply<WatchResp>> {
    let rid = request_id(&headers);

    let Some(resource) = CursorType::parse(&resource) else {
        warn!(resource = %resource, rid = %rid, "watch request for unknown resource");
        return Json(ApiReply::err(CODE_INVALID_INPUT, format!("unknown resource '{resource}'")));
    };

    if let Some(cursor) = &options.cursor {
        if cursor.is_empty() {
            return Json(ApiReply::err(CODE_INVALID_INPUT, "cursor must not be empty"));
        }

        return match state.watcher.watch_with_cursor(resource, &options, &rid).await {
            Ok(events) => Json(ApiReply::ok(generate_resp(Some(cursor), resource, events))),
            Err(e) => {
                warn!(resource = %resource, rid = %rid, error = %e, "watch with cursor failed");
                Json(ApiReply::err(CODE_INVALID_INPUT, e.to_string()))
            }
        };
    }

    if options.start_from != 0 {
        return match state.watcher.watch_with_start_from(resource, &options, &rid).await {
            Ok(events) => Json(ApiReply::ok(generate_resp(None, resource, events))),
            Err(e) => {
                warn!(resource = %resource, rid = %rid, error = %e, "watch with start from failed");
                Json(ApiReply::err(CODE_INVALID_INPUT, e.to_string()))
            }
        };
    }

    match state.watcher.watch_from_now(resource, &options, &rid).await {
        Ok(event) => Json(ApiReply::ok(generate_resp(None, resource, vec![event]))),
        Err(e) => {
            warn!(resource = %resource, rid = %rid, error = %e, "watch from now failed");
            Json(ApiReply::err(CODE_INVALID_INPUT, e.to_string()))
        }
    }
}

/// Shape the watch response so the client always receives a cursor it can
/// replay.
///
/// No events, or a leading no-event sentinel, yields `watched: false` with a
/// single synthetic detail: the client's own start cursor when it supplied
/// one, the no-event sentinel otherwise. Anything else is watched, including
/// cursor-only details that just move the client's position forward.
pub fn generate_resp(start_cursor: Option<&str>, resource: CursorType, events: Vec<WatchEventDetail>) -> WatchResp {
    let replay_cursor = |fallback: &str| match start_cursor {
        Some(cursor) => cursor.to_string(),
        None => fallback.to_string(),
    };

    if events.is_empty() {
        return WatchResp {
            watched: false,
            events: vec![WatchEventDetail::synthetic(replay_cursor(NO_EVENT_CURSOR), resource)],
        };
    }

    if events[0].cursor == NO_EVENT_CURSOR {
        return WatchResp {
            watched: false,
            events: vec![WatchEventDetail::synthetic(replay_cursor(NO_EVENT_CURSOR), resource)],
        };
    }

    WatchResp {
        watched: true,
        events,
    }
}

/// `GET /healthz`
pub async fn healthz() -> Json<ApiReply<&'static str>> {
    Json(ApiReply::ok("ok"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real_event(cursor: &str) -> WatchEventDetail {
        WatchEventDetail {
            cursor: cursor.to_string(),
            resource: CursorType::Host,
            kind: Some(alder_core::EventKind::Create),
            detail: Some(serde_json::json!({"bk_host_id": 1})),
        }
    }

    #[test]
    fn no_events_without_start_cursor_returns_sentinel() {
        let resp = generate_resp(None, CursorType::Host, vec![]);
        assert!(!resp.watched);
        assert_eq!(resp.events.len(), 1);
        assert_eq!(resp.events[0].cursor, NO_EVENT_CURSOR);
    }

    #[test]
    fn no_events_with_start_cursor_echoes_it() {
        let resp = generate_resp(Some("c1"), CursorType::Host, vec![]);
        assert!(!resp.watched);
        assert_eq!(resp.events[0].cursor, "c1");
    }

    #[test]
    fn leading_no_event_sentinel_follows_the_same_policy() {
        let sentinel = WatchEventDetail::synthetic(NO_EVENT_CURSOR, CursorType::Host);

        let resp = generate_resp(Some("c1"), CursorType::Host, vec![sentinel.clone()]);
        assert!(!resp.watched);
        assert_eq!(resp.events[0].cursor, "c1");

        let resp = generate_resp(None, CursorType::Host, vec![sentinel]);
        assert!(!resp.watched);
        assert_eq!(resp.events[0].cursor, NO_EVENT_CURSOR);
    }

    #[test]
    fn real_events_flip_the_watched_flag() {
        let resp = generate_resp(Some("c1"), CursorType::Host, vec![real_event("c2"), real_event("c3")]);
        assert!(resp.watched);
        assert_eq!(resp.events.len(), 2);
    }

    #[test]
    fn from_now_position_with_history_is_watched() {
        // Watch-from-now on a stream with history hands back the newest
        // cursor with no payload; the leading cursor is real, so watched.
        let latest = WatchEventDetail::synthetic("c-latest", CursorType::Host);
        let resp = generate_resp(None, CursorType::Host, vec![latest]);
        assert!(resp.watched);
        assert_eq!(resp.events[0].cursor, "c-latest");
    }

    #[test]
    fn filtered_window_advance_is_watched() {
        // A window whose nodes all fail the kind filter echoes the window's
        // last cursor; that is progress, not an empty stream.
        let advance = WatchEventDetail::synthetic("c-window-end", CursorType::Host);
        let resp = generate_resp(Some("c1"), CursorType::Host, vec![advance]);
        assert!(resp.watched);
        assert_eq!(resp.events[0].cursor, "c-window-end");
    }
}
