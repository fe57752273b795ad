use std::time::Duration;

use actix_web::{App, HttpResponse, HttpServer, Responder, dev::ServerHandle, post, web};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

use judge::config::EventsConfig;
use judge::events::{BuildEvents, BuildFinishedEvent, EventHub};

type Received = mpsc::UnboundedSender<(String, Value)>;

#[post("/hooks/{name}")]
async fn receive_hook(
    path: web::Path<String>,
    tx: web::Data<Received>,
    body: web::Json<Value>,
) -> impl Responder {
    let _ = tx.send((path.into_inner(), body.into_inner()));
    HttpResponse::Ok().finish()
}

#[post("/broken")]
async fn broken_hook() -> impl Responder {
    HttpResponse::InternalServerError().finish()
}

// Starts a local receiver and returns its base url
fn start_receiver() -> (
    String,
    ServerHandle,
    mpsc::UnboundedReceiver<(String, Value)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let tx = web::Data::new(tx);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(tx.clone())
            .service(receive_hook)
            .service(broken_hook)
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];

    let server = server.run();
    let handle = server.handle();
    actix_web::rt::spawn(server);

    (format!("http://{addr}"), handle, rx)
}

fn event(key: &str, succeed: bool) -> BuildFinishedEvent {
    BuildFinishedEvent {
        key: key.to_string(),
        succeed,
    }
}

#[actix_web::test]
async fn test_event_reaches_global_and_build_hooks() {
    let (base, handle, mut rx) = start_receiver();
    let hub = EventHub::new(&EventsConfig {
        webhook_url: Some(format!("{base}/hooks/global")),
    })
    .unwrap();

    hub.publish_build_finished(event("b-1", true), Some(format!("{base}/hooks/build")))
        .await
        .unwrap();

    let mut received = Vec::new();
    for _ in 0..2 {
        let item = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        received.push(item);
    }
    received.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        received,
        vec![
            ("build".to_string(), json!({"uuid": "b-1", "succeed": true})),
            ("global".to_string(), json!({"uuid": "b-1", "succeed": true})),
        ]
    );

    handle.stop(true).await;
}

#[actix_web::test]
async fn test_event_without_global_hook_only_hits_build_hook() {
    let (base, handle, mut rx) = start_receiver();
    let hub = EventHub::new(&EventsConfig::default()).unwrap();

    hub.publish_build_finished(event("b-2", false), Some(format!("{base}/hooks/build")))
        .await
        .unwrap();

    let item = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(item, ("build".to_string(), json!({"uuid": "b-2", "succeed": false})));
    assert!(rx.try_recv().is_err());

    handle.stop(true).await;
}

#[actix_web::test]
async fn test_failing_hook_is_reported() {
    let (base, handle, mut rx) = start_receiver();
    let hub = EventHub::new(&EventsConfig {
        webhook_url: Some(format!("{base}/broken")),
    })
    .unwrap();
    let mut subscriber = hub.subscribe();

    let result = hub
        .publish_build_finished(event("b-3", true), Some(format!("{base}/hooks/build")))
        .await;
    assert!(result.is_err());

    // The other targets are still served
    assert_eq!(subscriber.recv().await.unwrap(), event("b-3", true));
    let item = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(item.0, "build");

    handle.stop(true).await;
}
