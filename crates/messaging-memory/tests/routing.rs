mod common;

use std::time::Duration;

use async_trait::async_trait;
use common::*;
use fleet_messaging::Error;
use fleet_messaging::codec::CodecRegistry;
use fleet_messaging::envelope::{Message, TypedMessage};
use fleet_messaging::handler::{EventHandler, HandlerContext, HandlerError};
use fleet_messaging::path::{Destination, RenderProfile};
use fleet_messaging::subscription::{MessageSubscription, SubscriptionKind};
use fleet_messaging_memory::MemoryBroker;
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
struct VehicleStopped {
    vehicle: String,
}

impl TypedMessage for VehicleStopped {
    const MESSAGE_TYPE: &'static str = "vehicle-stopped";
}

struct Recorder {
    name: String,
    sender: mpsc::UnboundedSender<(String, String, VehicleStopped)>,
}

#[async_trait]
impl EventHandler for Recorder {
    type Event = VehicleStopped;

    fn name(&self) -> &str {
        &self.name
    }

    async fn process_event(
        &self,
        event: VehicleStopped,
        context: &HandlerContext,
    ) -> Result<(), HandlerError> {
        self.sender
            .send((self.name.clone(), context.envelope().subject.clone(), event))
            .map_err(|_| HandlerError::new("receiver dropped"))
    }
}

type Recorded = mpsc::UnboundedReceiver<(String, String, VehicleStopped)>;

fn recorder(bus: &Bus, name: &str) -> Recorded {
    let (sender, receiver) = mpsc::unbounded_channel();
    bus.register_event_handler(Recorder {
        name: name.to_string(),
        sender,
    })
    .unwrap();
    receiver
}

fn stopped(vehicle: &str) -> VehicleStopped {
    VehicleStopped {
        vehicle: vehicle.to_string(),
    }
}

const EVENTS: &str = "events/vehicles/{type}/{subType}";

#[tokio::test]
async fn test_prefix_only_routing_truncates() {
    let broker = MemoryBroker::new();
    let subscriber = bus_with(
        &broker,
        "tracker",
        1,
        RenderProfile::PrefixOnly,
        CodecRegistry::new(),
    )
    .await;
    let mut recorded = recorder(&subscriber, "tracker");
    subscriber
        .subscribe(MessageSubscription::topic(
            path(EVENTS).subscribe(&[]).unwrap(),
        ))
        .await
        .unwrap();
    assert!(
        subscriber
            .subscriptions()
            .await
            .iter()
            .any(|subscription| subscription.subject == "events.vehicles")
    );

    let publisher = bus_with(
        &broker,
        "vehicles",
        1,
        RenderProfile::PrefixOnly,
        CodecRegistry::new(),
    )
    .await;
    publisher
        .publish(
            path(EVENTS)
                .publish(&[("type", "query"), ("subType", "stopped")])
                .unwrap(),
            &stopped("v1"),
        )
        .await
        .unwrap();

    let (_, subject, event) = timeout(Duration::from_secs(1), recorded.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subject, "events.vehicles");
    assert_eq!(event, stopped("v1"));
}

#[tokio::test]
async fn test_wildcard_routing_filters_on_bound_variables() {
    let broker = MemoryBroker::new();
    let subscriber = bus(&broker, "tracker", 1).await;
    let mut recorded = recorder(&subscriber, "tracker");
    subscriber
        .subscribe(MessageSubscription::topic(
            path(EVENTS).subscribe(&[("type", "query")]).unwrap(),
        ))
        .await
        .unwrap();

    let publisher = bus(&broker, "vehicles", 1).await;
    for (kind, vehicle) in [("alert", "v1"), ("query", "v2")] {
        publisher
            .publish(
                path(EVENTS)
                    .publish(&[("type", kind), ("subType", "stopped")])
                    .unwrap(),
                &stopped(vehicle),
            )
            .await
            .unwrap();
    }

    let (_, subject, event) = timeout(Duration::from_secs(1), recorded.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subject, "events.vehicles.query.stopped");
    assert_eq!(event, stopped("v2"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(recorded.try_recv().is_err());
}

#[tokio::test]
async fn test_events_fan_out_to_every_handler() {
    let broker = MemoryBroker::new();
    let subscriber = bus(&broker, "tracker", 1).await;
    let mut audit = recorder(&subscriber, "audit");
    let mut notify = recorder(&subscriber, "notify");
    subscriber
        .subscribe(MessageSubscription::topic(subscribe_path("events/stops")))
        .await
        .unwrap();

    let publisher = bus(&broker, "vehicles", 1).await;
    publisher
        .publish_batch(vec![
            (
                Destination::from(publish_path("events/stops")),
                Message::event(&stopped("v1")).unwrap(),
            ),
            (
                Destination::from(publish_path("events/stops")),
                Message::event(&stopped("v2")).unwrap(),
            ),
        ])
        .await
        .unwrap();

    for receiver in [&mut audit, &mut notify] {
        let mut vehicles = Vec::new();
        for _ in 0..2 {
            let (_, _, event) = timeout(Duration::from_secs(1), receiver.recv())
                .await
                .unwrap()
                .unwrap();
            vehicles.push(event.vehicle);
        }
        vehicles.sort();
        assert_eq!(vehicles, vec!["v1".to_string(), "v2".to_string()]);
    }
}

#[tokio::test]
async fn test_second_request_handler_is_rejected() {
    let broker = MemoryBroker::new();
    let service = bus(&broker, "echo", 1).await;
    service
        .register_request_handler(EchoHandler::new("first"))
        .unwrap();

    let error = service
        .register_request_handler(EchoHandler::new("second"))
        .unwrap_err();

    assert!(matches!(error, Error::DuplicateRequestHandler { .. }));
}

#[tokio::test]
async fn test_equivalent_subscriptions_subscribe_once() {
    let broker = MemoryBroker::new();
    let service = bus(&broker, "tracker", 1).await;
    let before = service.driver().subscribe_calls();

    let zone = path("fleet/{zone}").subscribe(&[]).unwrap();
    let region = path("fleet/{region}").subscribe(&[]).unwrap();

    assert!(service.subscribe(MessageSubscription::topic(zone)).await.unwrap());
    assert!(
        !service
            .subscribe(MessageSubscription::topic(region.clone()))
            .await
            .unwrap()
    );
    assert_eq!(service.driver().subscribe_calls(), before + 1);
    assert_eq!(broker.subscription_count("fleet.*"), 1);

    assert!(service.subscribe(MessageSubscription::queue(region)).await.unwrap());
    assert_eq!(service.driver().subscribe_calls(), before + 2);
}

#[tokio::test]
async fn test_subscriptions_queue_until_start() {
    let broker = MemoryBroker::new();
    let service = fleet_messaging::MessageBus::new(
        fleet_messaging::identity::ServiceIdentity::new("late", 1),
        driver(&broker, RenderProfile::Wildcard, CodecRegistry::new()),
        options(),
    )
    .unwrap();

    assert!(
        service
            .subscribe(MessageSubscription::queue(subscribe_path("late/jobs")))
            .await
            .unwrap()
    );
    assert_eq!(service.driver().subscribe_calls(), 0);

    service.start().await.unwrap();
    service.start().await.unwrap();
    assert_eq!(service.driver().subscribe_calls(), 4);
    assert_eq!(broker.subscription_count("late.jobs"), 1);
}

#[tokio::test]
async fn test_queue_subscriptions_balance_instances() {
    let broker = MemoryBroker::new();
    let _first = echo_service(&broker, "worker", 1, "jobs/echo").await;
    let _second = echo_service(&broker, "worker", 2, "jobs/echo").await;
    let client = bus(&broker, "client", 0).await;

    let mut responders = Vec::new();
    for _ in 0..4 {
        let reply: EchoReply = client
            .request_typed(&echo("job"), echo_request("jobs/echo"))
            .await
            .unwrap();
        responders.push(reply.responder);
    }
    responders.sort();

    assert_eq!(
        responders,
        vec!["worker-1", "worker-1", "worker-2", "worker-2"]
    );
    assert!(
        client
            .subscriptions()
            .await
            .iter()
            .all(|subscription| subscription.kind == SubscriptionKind::Topic)
    );
}

#[tokio::test]
async fn test_unregistered_handler_is_ignored() {
    let broker = MemoryBroker::new();
    let service = echo_service(&broker, "echo", 1, "services/echo").await;
    let client = bus(&broker, "client", 0).await;

    assert!(service.unregister_handler("echo"));
    assert!(!service.unregister_handler("echo"));

    let error = client
        .request(
            &echo("anyone"),
            echo_request("services/echo").with_timeout(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, Error::RequestTimeout(_)));
}

#[tokio::test]
async fn test_routes_record_observed_traffic() {
    let broker = MemoryBroker::new();
    let service = echo_service(&broker, "echo", 1, "services/echo").await;
    let client = bus(&broker, "client", 0).await;

    for _ in 0..3 {
        client
            .request(&echo("hi"), echo_request("services/echo"))
            .await
            .unwrap();
    }

    let routes: Vec<_> = service
        .routes()
        .into_iter()
        .filter(|route| route.message_type == Echo::MESSAGE_TYPE)
        .collect();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].subject, "services.echo");
    assert_eq!(routes[0].subscription, "services.echo");
    assert_eq!(routes[0].sender, "client-0-rust");
    assert_eq!(routes[0].receiver, "echo-1-rust");
}
