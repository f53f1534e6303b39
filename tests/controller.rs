use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use red_international::{
    ControllerEvent, EventHandler, FetchError, FlagSet, HtmlPage, LoadOutcome, MemoryFlagCache,
    RedbFlagCache, ReqwestConfigSource, VisibilityController,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::sleep;
use url::Url;

const PAGE: &str = r#"<html><body>
    <header id="red-home">Home</header>
    <div data-red-service="contact">Contact form</div>
    <div id="red-chat">Chat</div>
    <section class="red-services">Services</section>
</body></html>"#;

const KEY: &str = "red-international-config";

/// Minimal HTTP endpoint answering every request with the same response.
async fn serve(status: &'static str, body: &'static str) -> (Url, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (Url::parse(&format!("http://{addr}/config.json")).unwrap(), hits)
}

/// Endpoint on a port nobody listens on.
async fn unreachable() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Url::parse(&format!("http://{addr}/config.json")).unwrap()
}

fn source(endpoint: Url) -> Arc<ReqwestConfigSource> {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    Arc::new(ReqwestConfigSource::from_client(client, endpoint))
}

fn controller(
    page: &Arc<HtmlPage>,
    endpoint: Url,
    cache: MemoryFlagCache,
) -> VisibilityController {
    VisibilityController::builder()
        .with_page(page.clone())
        .with_source(source(endpoint))
        .with_cache(Arc::new(cache))
        .with_debounce(Duration::from_millis(20))
        .build()
        .unwrap()
}

#[derive(Default)]
struct RecordingHandler(Mutex<Vec<String>>);

impl EventHandler for RecordingHandler {
    fn handle(&self, event: &ControllerEvent) {
        let label = match event {
            ControllerEvent::Initializing => "initializing".to_string(),
            ControllerEvent::ConfigLoaded(loaded) => format!("loaded:{}", loaded.source),
            ControllerEvent::LoadFailed(failed) => {
                format!("failed:{:?}:{}", failed.stage, failed.origin)
            }
            ControllerEvent::ConfigApplied(_) => "applied".to_string(),
            ControllerEvent::ReapplyScheduled(_) => "scheduled".to_string(),
            ControllerEvent::Shutdown => "shutdown".to_string(),
        };
        self.0.lock().unwrap().push(label);
    }
}

#[tokio::test]
async fn remote_flags_are_applied_on_initialize() {
    let (endpoint, hits) = serve("200 OK", r#"{"home": true, "contact": true, "chat": false}"#).await;
    let page = Arc::new(HtmlPage::parse(PAGE));
    let controller = controller(&page, endpoint, MemoryFlagCache::new());

    controller.initialize().await;

    assert!(controller.is_initialized());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(controller.is_active("contact"));
    assert!(!controller.is_active("undefined-service"));

    let contact = &page.elements_with_service("contact")[0];
    assert!(!contact.hidden);
    assert!(contact.has_class("red-active"));
    assert!(!contact.has_class("red-inactive"));

    let chat = page.element_by_id("red-chat").unwrap();
    assert!(chat.hidden);
    assert!(chat.has_class("red-inactive"));

    // Not named by the payload, so left alone.
    let services = &page.elements_with_class("red-services")[0];
    assert!(!services.hidden);
    assert!(services.classes.iter().all(|c| c == "red-services"));
}

#[tokio::test]
async fn valid_cache_never_consults_remote() {
    let (endpoint, hits) = serve("200 OK", r#"{"chat": false}"#).await;
    let page = Arc::new(HtmlPage::parse(PAGE));
    let cache = MemoryFlagCache::new().with_entry(KEY, r#"{"chat": true}"#);
    let controller = controller(&page, endpoint, cache);

    controller.initialize().await;
    let outcome = controller.refresh().await;

    assert!(matches!(outcome, LoadOutcome::Cache(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(controller.is_active("chat"));
    assert!(!page.element_by_id("red-chat").unwrap().hidden);
}

#[tokio::test]
async fn corrupt_cache_falls_through_to_remote() {
    let (endpoint, hits) = serve("200 OK", r#"{"chat": true}"#).await;
    let page = Arc::new(HtmlPage::parse(PAGE));
    let cache = MemoryFlagCache::new().with_entry(KEY, "{chat: yes");
    let controller = controller(&page, endpoint, cache);

    let outcome = controller.load_config().await;

    assert_eq!(outcome.label(), "remote");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(controller.flags(), FlagSet::new().with("chat", true));
}

#[tokio::test]
async fn unreachable_endpoint_keeps_defaults() {
    let page = Arc::new(HtmlPage::parse(PAGE));
    let controller = controller(&page, unreachable().await, MemoryFlagCache::new());

    let outcome = controller.load_config().await;

    assert!(matches!(
        outcome,
        LoadOutcome::Fallback { error: FetchError::Http(_), .. }
    ));
    assert_eq!(controller.flags(), FlagSet::defaults());

    // Defaults are applied, not just held.
    let home = page.element_by_id("red-home").unwrap();
    assert!(!home.hidden);
    assert!(home.has_class("red-active"));
    assert!(page.elements_with_service("contact")[0].hidden);
    assert!(page.elements_with_class("red-services")[0].hidden);
}

#[tokio::test]
async fn malformed_payload_keeps_defaults() {
    let (endpoint, _) = serve("200 OK", r#"{"contact": "on"}"#).await;
    let page = Arc::new(HtmlPage::parse(PAGE));
    let controller = controller(&page, endpoint, MemoryFlagCache::new());

    let outcome = controller.load_config().await;

    assert!(matches!(outcome, LoadOutcome::Fallback { error: FetchError::Payload(_), .. }));
    assert_eq!(controller.flags(), FlagSet::defaults());
    assert!(!controller.is_active("contact"));
}

#[tokio::test]
async fn error_status_keeps_defaults() {
    let (endpoint, _) = serve("503 Service Unavailable", "{}").await;
    let page = Arc::new(HtmlPage::parse(PAGE));
    let controller = controller(&page, endpoint, MemoryFlagCache::new());

    let outcome = controller.load_config().await;

    assert!(matches!(outcome, LoadOutcome::Fallback { error: FetchError::Status(503), .. }));
    assert_eq!(controller.flags(), FlagSet::defaults());
}

#[tokio::test]
async fn added_elements_are_reapplied_after_debounce() {
    let (endpoint, _) = serve("200 OK", r#"{"newsletter": true, "chat": false}"#).await;
    let page = Arc::new(HtmlPage::parse(PAGE));
    let controller = controller(&page, endpoint, MemoryFlagCache::new());
    controller.initialize().await;

    page.append_to_body(r#"<div id="red-newsletter" style="display: none">Subscribe</div>"#);
    page.append_to_body(r#"<aside class="widget red-chat">Chat bubble</aside>"#);

    // Untouched until the debounce elapses.
    assert!(page.element_by_id("red-newsletter").unwrap().hidden);

    sleep(Duration::from_millis(150)).await;

    let newsletter = page.element_by_id("red-newsletter").unwrap();
    assert!(!newsletter.hidden);
    assert!(newsletter.has_class("red-active"));

    let bubble = page
        .elements_with_class("widget")
        .into_iter()
        .next()
        .unwrap();
    assert!(bubble.hidden);
    assert!(bubble.has_class("red-inactive"));
}

#[tokio::test]
async fn shutdown_stops_reapplication() {
    let (endpoint, _) = serve("200 OK", r#"{"newsletter": true}"#).await;
    let page = Arc::new(HtmlPage::parse(PAGE));
    let controller = controller(&page, endpoint, MemoryFlagCache::new());
    controller.initialize().await;
    controller.shutdown().await;

    assert!(!controller.is_initialized());
    assert_eq!(page.subscriber_count(), 0);

    page.append_to_body(r#"<div id="red-newsletter" style="display: none">Subscribe</div>"#);
    sleep(Duration::from_millis(100)).await;

    let newsletter = page.element_by_id("red-newsletter").unwrap();
    assert!(newsletter.hidden);
    assert!(!newsletter.has_class("red-active"));
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let (endpoint, hits) = serve("200 OK", r#"{"home": true}"#).await;
    let page = Arc::new(HtmlPage::parse(PAGE));
    let controller = controller(&page, endpoint, MemoryFlagCache::new());

    controller.initialize().await;
    controller.initialize().await;

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(page.subscriber_count(), 1);
}

#[tokio::test]
async fn local_override_applies_on_refresh() {
    let (endpoint, hits) = serve("200 OK", r#"{"about": false}"#).await;
    let page = Arc::new(HtmlPage::parse(PAGE));
    let controller = controller(&page, endpoint, MemoryFlagCache::new());
    controller.initialize().await;
    assert!(page.element_by_id("red-chat").unwrap().classes.is_empty());

    controller
        .set_local_override(&FlagSet::new().with("chat", true))
        .unwrap();
    let outcome = controller.refresh().await;
    assert_eq!(outcome.label(), "cache");
    assert!(page.element_by_id("red-chat").unwrap().has_class("red-active"));

    controller.clear_local_override().unwrap();
    let outcome = controller.refresh().await;
    assert_eq!(outcome.label(), "remote");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(controller.flags(), FlagSet::new().with("about", false));
}

#[tokio::test]
async fn redb_override_survives_new_controller() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flags.redb");
    let page = Arc::new(HtmlPage::parse(PAGE));

    {
        let cache = RedbFlagCache::open(&path).unwrap();
        let first = VisibilityController::builder()
            .with_page(page.clone())
            .with_source(source(unreachable().await))
            .with_cache(Arc::new(cache))
            .build()
            .unwrap();
        first
            .set_local_override(&FlagSet::new().with("projects", true))
            .unwrap();
    }

    let (endpoint, hits) = serve("200 OK", r#"{"projects": false}"#).await;
    let second = VisibilityController::builder()
        .with_page(page.clone())
        .with_source(source(endpoint))
        .with_cache(Arc::new(RedbFlagCache::open(&path).unwrap()))
        .build()
        .unwrap();

    assert!(matches!(second.load_config().await, LoadOutcome::Cache(_)));
    assert!(second.is_active("projects"));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn lifecycle_events_reach_handlers() {
    let page = Arc::new(HtmlPage::parse(PAGE));
    let recorder = Arc::new(RecordingHandler::default());
    let cache = MemoryFlagCache::new().with_entry(KEY, "not json");
    let endpoint = unreachable().await;
    let controller = VisibilityController::builder()
        .with_page(page.clone())
        .with_source(source(endpoint.clone()))
        .with_cache(Arc::new(cache))
        .with_event_handler(recorder.clone())
        .build()
        .unwrap();

    controller.initialize().await;
    assert_eq!(controller.flags(), FlagSet::defaults());
    controller.shutdown().await;

    let events = recorder.0.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "initializing".to_string(),
            format!("failed:Cache:{KEY}"),
            format!("failed:Remote:{endpoint}"),
            "applied".to_string(),
            "shutdown".to_string(),
        ]
    );
}
