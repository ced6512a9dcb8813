//! Server-sent events for newly stored plays

use actix_web::{get, web, HttpResponse};
use bytes::Bytes;
use futures::stream::{self as fstream, Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::debug;

use super::AppState;
use crate::core::Subscription;

const KEEPALIVE: &[u8] = b": keepalive\n\n";

/// Reconnect hint and greeting sent as soon as a client connects
fn preamble(client_retry_ms: u64) -> Bytes {
    Bytes::from(format!("retry: {}\nevent: hello\ndata: {{}}\n\n", client_retry_ms))
}

/// One `update` event; every line of the payload gets its own `data:` field
fn update_frame(message: &str) -> Bytes {
    let mut frame = String::with_capacity(message.len() + 24);
    frame.push_str("event: update\n");
    for line in message.lines() {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    Bytes::from(frame)
}

/// Body stream for one subscriber; the subscription ends when the stream is dropped
pub fn event_stream(
    subscription: Subscription,
    heartbeat: Duration,
    client_retry_ms: u64,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    let hello = fstream::once(async move { Ok(preamble(client_retry_ms)) });

    let updates = fstream::unfold(subscription, move |subscription| async move {
        let frame = match subscription.next_message(heartbeat).await {
            Some(message) => update_frame(&message),
            None => Bytes::from_static(KEEPALIVE),
        };
        Some((Ok(frame), subscription))
    });

    hello.chain(updates)
}

/// Live stream of new plays
#[get("/stream")]
pub async fn stream(state: web::Data<AppState>) -> HttpResponse {
    let subscription = state.registry.subscribe();
    debug!(subscriber = subscription.id(), subscribers = state.registry.len(), "Stream opened");

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache, no-transform"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(event_stream(subscription, state.feed.heartbeat(), state.feed.client_retry_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SubscriberRegistry;
    use std::sync::Arc;

    fn text(bytes: Bytes) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_update_frame_format() {
        assert_eq!(
            text(update_frame(r#"{"type":"new_play"}"#)),
            "event: update\ndata: {\"type\":\"new_play\"}\n\n"
        );
        assert_eq!(text(update_frame("a\nb")), "event: update\ndata: a\ndata: b\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_sequence() {
        let registry = Arc::new(SubscriberRegistry::new(8));
        let subscription = registry.subscribe();
        let mut body = Box::pin(event_stream(subscription, Duration::from_secs(15), 3000));

        let first = text(body.next().await.unwrap().unwrap());
        assert_eq!(first, "retry: 3000\nevent: hello\ndata: {}\n\n");

        registry.broadcast(r#"{"type":"new_play","data":{"id":1}}"#);
        let second = text(body.next().await.unwrap().unwrap());
        assert!(second.starts_with("event: update\ndata: {\"type\":\"new_play\""));

        // nothing queued: a keepalive comment after the heartbeat interval
        let started = tokio::time::Instant::now();
        let third = text(body.next().await.unwrap().unwrap());
        assert_eq!(third, ": keepalive\n\n");
        assert!(started.elapsed() >= Duration::from_secs(15));

        assert_eq!(registry.len(), 1);
        drop(body);
        assert!(registry.is_empty());
    }

    #[actix_web::test]
    async fn test_stream_headers() {
        use crate::api::testing::temp_state;
        use actix_web::{test, App};

        let (state, _dir) = temp_state().await;
        let registry = state.registry.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).service(stream)).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/stream").to_request()).await;
        assert!(resp.status().is_success());

        let headers = resp.headers();
        assert_eq!(headers.get("content-type").unwrap(), "text/event-stream");
        assert_eq!(headers.get("cache-control").unwrap(), "no-cache, no-transform");
        assert_eq!(headers.get("x-accel-buffering").unwrap(), "no");
        assert_eq!(registry.len(), 1);

        drop(resp);
        assert!(registry.is_empty());
    }
}
