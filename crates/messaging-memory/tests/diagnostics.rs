mod common;

use common::*;
use fleet_messaging::cancel::CancelRequest;
use fleet_messaging_memory::MemoryBroker;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_ping_reaches_every_instance() {
    let broker = MemoryBroker::new();
    let _vehicles = bus(&broker, "vehicles", 1).await;
    let _tracker = bus(&broker, "tracker", 1).await;
    let client = bus(&broker, "client", 0).await;

    let mut names: Vec<String> = client
        .ping()
        .await
        .unwrap()
        .into_iter()
        .map(|pong| pong.identity.to_string())
        .collect();
    names.sort();

    assert_eq!(
        names,
        vec!["client-0-rust", "tracker-1-rust", "vehicles-1-rust"]
    );
}

#[tokio::test]
async fn test_info_targets_one_service() {
    let broker = MemoryBroker::new();
    let _echo = echo_service(&broker, "echo", 1, "services/echo").await;
    let _tracker = bus(&broker, "tracker", 1).await;
    let client = bus(&broker, "client", 0).await;

    let infos = client.info(Some("echo")).await.unwrap();
    assert_eq!(infos.len(), 1);

    let info = &infos[0];
    assert_eq!(info.identity.name, "echo");

    let mut handlers: Vec<&str> = info
        .handlers
        .iter()
        .map(|handler| handler.name.as_str())
        .collect();
    handlers.sort_unstable();
    assert_eq!(
        handlers,
        vec![CancelRequest::HANDLER_NAME, "echo", "info", "ping"]
    );

    let mut subjects: Vec<&str> = info
        .subscriptions
        .iter()
        .map(|subscription| subscription.subject.as_str())
        .collect();
    subjects.sort_unstable();
    assert_eq!(subjects.len(), 4);
    assert!(subjects.contains(&"messaging.control"));
    assert!(subjects.contains(&"messaging.control.echo"));
    assert!(subjects.contains(&"services.echo"));
    assert!(subjects.iter().any(|subject| subject.starts_with("inbox.echo.")));
}

#[tokio::test]
async fn test_info_broadcast_reports_routes() {
    let broker = MemoryBroker::new();
    let _echo = echo_service(&broker, "echo", 1, "services/echo").await;
    let client = bus(&broker, "client", 0).await;
    client
        .request(&echo("hi"), echo_request("services/echo"))
        .await
        .unwrap();

    let infos = client.info(None).await.unwrap();
    assert_eq!(infos.len(), 2);

    let echo_info = infos
        .iter()
        .find(|info| info.identity.name == "echo")
        .unwrap();
    assert!(
        echo_info
            .routes
            .iter()
            .any(|route| route.message_type == "echo" && route.sender == "client-0-rust")
    );
}
