//! Callback dispatcher
//!
//! Best-effort asynchronous notifications back to the application that
//! created a session. Events are enqueued on the request hot path and
//! delivered by a background worker, so a slow or dead callback endpoint
//! never holds up a WOPI request. Failed deliveries retry with exponential
//! backoff before being dropped.
//!
//! Events whose tenant has no callback URL, or whose session carries no
//! origin connection id, are skipped silently.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::CallbackConfig;
use crate::models::{Session, Tenant};

/// WOPI-observable event kinds delivered to the originating application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackEvent {
    SessionCreated,
    DocumentOpened,
    DocumentSaved,
    LockAcquired,
    LockReleased,
    SessionExpired,
}

impl CallbackEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackEvent::SessionCreated => "session_created",
            CallbackEvent::DocumentOpened => "document_opened",
            CallbackEvent::DocumentSaved => "document_saved",
            CallbackEvent::LockAcquired => "lock_acquired",
            CallbackEvent::LockReleased => "lock_released",
            CallbackEvent::SessionExpired => "session_expired",
        }
    }
}

/// One queued delivery
#[derive(Debug, Clone)]
struct Delivery {
    url: String,
    auth: Option<String>,
    payload: Value,
}

/// Enqueues callback deliveries for the background worker
pub struct CallbackDispatcher {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl CallbackDispatcher {
    /// Create a dispatcher and spawn its delivery worker
    pub fn new(config: CallbackConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = reqwest::Client::new();
        tokio::spawn(run_worker(client, rx, config));
        Self { tx }
    }

    /// Enqueue an event. Returns whether a delivery was actually queued.
    pub fn dispatch(
        &self,
        tenant: &Tenant,
        session: &Session,
        event: CallbackEvent,
        extras: Value,
    ) -> bool {
        let Some(base_url) = tenant.callback_base_url.as_deref() else {
            return false;
        };
        if session.origin_connection_id.is_none() {
            return false;
        }

        let delivery = Delivery {
            url: format!("{}/wopi/callback", base_url.trim_end_matches('/')),
            auth: tenant.callback_auth.clone(),
            payload: build_payload(session, event, extras),
        };

        if self.tx.send(delivery).is_err() {
            tracing::warn!("Callback worker is gone, dropping {}", event.as_str());
            return false;
        }
        true
    }
}

/// Build the event payload. Extras are merged on top of the template.
fn build_payload(session: &Session, event: CallbackEvent, extras: Value) -> Value {
    let mut payload = json!({
        "origin_connection_id": session.origin_connection_id,
        "origin_page_id": session.origin_page_id,
        "event": event.as_str(),
        "session_id": session.id,
        "file_path": session.file_path,
        "timestamp": Utc::now().to_rfc3339(),
    });

    if let (Some(map), Some(extra_map)) = (payload.as_object_mut(), extras.as_object()) {
        for (k, v) in extra_map {
            map.insert(k.clone(), v.clone());
        }
    }
    payload
}

async fn run_worker(
    client: reqwest::Client,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    config: CallbackConfig,
) {
    while let Some(delivery) = rx.recv().await {
        let client = client.clone();
        let config = config.clone();
        tokio::spawn(async move {
            deliver_with_retry(&client, delivery, &config).await;
        });
    }
}

async fn deliver_with_retry(client: &reqwest::Client, delivery: Delivery, config: &CallbackConfig) {
    let mut attempts = 0u32;
    let mut backoff = Duration::from_secs(config.base_backoff_secs);
    let max_backoff = Duration::from_secs(config.max_backoff_secs);

    loop {
        attempts += 1;
        match post_once(client, &delivery).await {
            Ok(()) => return,
            Err(e) => {
                if attempts >= config.max_attempts {
                    tracing::warn!(
                        url = %delivery.url,
                        attempts,
                        "Giving up on callback delivery: {}",
                        e
                    );
                    return;
                }
                tracing::debug!(
                    url = %delivery.url,
                    attempt = attempts,
                    "Callback delivery failed, retrying: {}",
                    e
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(max_backoff);
            }
        }
    }
}

async fn post_once(client: &reqwest::Client, delivery: &Delivery) -> anyhow::Result<()> {
    let mut request = client.post(&delivery.url).json(&delivery.payload);
    if let Some(auth) = &delivery.auth {
        request = request.header(reqwest::header::AUTHORIZATION, auth.as_str());
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        anyhow::bail!("callback endpoint returned {}", response.status());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EditorMode, Permission};
    use chrono::Duration as ChronoDuration;

    fn tenant(callback_base_url: Option<&str>) -> Tenant {
        Tenant {
            id: "acme".to_string(),
            name: None,
            active: true,
            editor_mode: EditorMode::Pool,
            editor_url: None,
            callback_base_url: callback_base_url.map(str::to_string),
            callback_auth: Some("Bearer cb-secret".to_string()),
            api_token_hash: None,
            created_at: Utc::now(),
        }
    }

    fn session(origin_connection_id: Option<&str>) -> Session {
        let now = Utc::now();
        Session {
            id: "sess-1".to_string(),
            tenant_id: "acme".to_string(),
            storage_name: "docs".to_string(),
            file_path: "a/b.xlsx".to_string(),
            file_id: "file-1".to_string(),
            access_token: "tok".to_string(),
            permissions: vec![Permission::View],
            account: "sales".to_string(),
            user: None,
            origin_connection_id: origin_connection_id.map(str::to_string),
            origin_page_id: Some("page-7".to_string()),
            lock_id: None,
            lock_expires_at: None,
            created_at: now,
            expires_at: now + ChronoDuration::hours(1),
            last_accessed_at: now,
            opened_at: None,
        }
    }

    #[test]
    fn test_payload_template() {
        let payload = build_payload(
            &session(Some("conn-1")),
            CallbackEvent::DocumentSaved,
            json!({"size": 1234}),
        );

        assert_eq!(payload["event"], "document_saved");
        assert_eq!(payload["session_id"], "sess-1");
        assert_eq!(payload["file_path"], "a/b.xlsx");
        assert_eq!(payload["origin_connection_id"], "conn-1");
        assert_eq!(payload["origin_page_id"], "page-7");
        assert_eq!(payload["size"], 1234);
        assert!(payload["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_dispatch_skips_without_callback_url() {
        let dispatcher = CallbackDispatcher::new(CallbackConfig::default());
        let queued = dispatcher.dispatch(
            &tenant(None),
            &session(Some("conn-1")),
            CallbackEvent::SessionCreated,
            json!({}),
        );
        assert!(!queued);
    }

    #[tokio::test]
    async fn test_dispatch_skips_without_origin_connection() {
        let dispatcher = CallbackDispatcher::new(CallbackConfig::default());
        let queued = dispatcher.dispatch(
            &tenant(Some("https://app.acme.example")),
            &session(None),
            CallbackEvent::SessionCreated,
            json!({}),
        );
        assert!(!queued);
    }

    #[tokio::test]
    async fn test_delivery_reaches_endpoint() {
        use axum::{extract::State, routing::post, Json, Router};
        use tokio::sync::mpsc;

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();

        async fn receive(
            State(tx): State<mpsc::UnboundedSender<Value>>,
            Json(body): Json<Value>,
        ) -> &'static str {
            let _ = tx.send(body);
            "ok"
        }

        let app = Router::new()
            .route("/wopi/callback", post(receive))
            .with_state(seen_tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dispatcher = CallbackDispatcher::new(CallbackConfig::default());
        let queued = dispatcher.dispatch(
            &tenant(Some(&format!("http://{}", addr))),
            &session(Some("conn-1")),
            CallbackEvent::LockAcquired,
            json!({"lock_id": "L1"}),
        );
        assert!(queued);

        let received = tokio::time::timeout(std::time::Duration::from_secs(5), seen_rx.recv())
            .await
            .expect("callback was not delivered")
            .unwrap();
        assert_eq!(received["event"], "lock_acquired");
        assert_eq!(received["lock_id"], "L1");
    }
}
