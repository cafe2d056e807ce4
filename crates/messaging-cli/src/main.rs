//! Operator CLI for a fleet message bus running on NATS.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::time::Duration;

use clap::{Parser, Subcommand};
use fleet_messaging::cancel::CancelRequest;
use fleet_messaging::envelope::{Headers, Message, TypedBody};
use fleet_messaging::identity::ServiceIdentity;
use fleet_messaging::path::{Destination, MessagePath};
use fleet_messaging::{BusOptions, DiagnosticsOptions, MessageBus};
use fleet_messaging_nats::{NatsDriver, NatsDriverOptions};
use serde_json::{Map, Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Body was not a JSON object.
    #[error("body must be a JSON object")]
    BodyNotObject,

    /// Bad `--var` argument.
    #[error("invalid variable '{0}', expected name=value")]
    InvalidVariable(String),

    /// JSON failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Bus failure.
    #[error(transparent)]
    Messaging(#[from] fleet_messaging::Error),

    /// Path failure.
    #[error(transparent)]
    Path(#[from] fleet_messaging::path::Error),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// NATS server URLs
    #[arg(
        long,
        default_value = "nats://localhost:4222",
        env = "FLEET_NATS_SERVERS",
        value_delimiter = ','
    )]
    servers: Vec<String>,

    /// Service name this CLI identifies as
    #[arg(long, default_value = "fleet-bus", env = "FLEET_SERVICE_NAME")]
    service_name: String,

    /// Instance number this CLI identifies as
    #[arg(long, default_value_t = 0, env = "FLEET_SERVICE_INSTANCE")]
    instance: u32,

    /// How long to collect answers, in milliseconds
    #[arg(long, default_value_t = 3000, env = "FLEET_TIMEOUT_MS")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Pings every instance
    Ping,

    /// Describes every instance, or those of one service
    Info {
        /// Only ask this service
        #[arg(long)]
        service: Option<String>,
    },

    /// Cancels one request
    CancelId {
        /// Request id
        request_id: Uuid,

        #[command(flatten)]
        flags: CancelFlags,
    },

    /// Cancels every request of a type
    CancelType {
        /// Body type of the requests
        request_type: String,

        /// Only cancel on instances of this service
        #[arg(long)]
        scope: Option<String>,

        #[command(flatten)]
        flags: CancelFlags,
    },

    /// Cancels every child of a parent request
    CancelParent {
        /// Parent request id
        parent_id: Uuid,

        #[command(flatten)]
        flags: CancelFlags,
    },

    /// Publishes an event
    Publish {
        /// Path template, e.g. `events/vehicles/{type}`
        path: String,

        /// Event type
        #[arg(long = "type")]
        message_type: String,

        /// Variable bindings as name=value
        #[arg(long = "var")]
        vars: Vec<String>,

        /// Event fields as a JSON object
        #[arg(long, default_value = "{}")]
        body: String,
    },
}

#[derive(Clone, Debug, clap::Args)]
struct CancelFlags {
    /// Also cancel child requests
    #[arg(long)]
    cascade: bool,

    /// Answer only once cancelled handlers settled
    #[arg(long)]
    wait: bool,

    /// Send to this service only
    #[arg(long)]
    service: Option<String>,
}

impl CancelFlags {
    fn apply(&self, cancel: CancelRequest) -> CancelRequest {
        cancel.with_cascade(self.cascade).with_wait(self.wait)
    }
}

fn parse_var(var: &str) -> Result<(&str, &str), Error> {
    var.split_once('=')
        .filter(|(name, value)| !name.is_empty() && !value.is_empty())
        .ok_or_else(|| Error::InvalidVariable(var.to_string()))
}

fn event_body(message_type: &str, body: &str) -> Result<TypedBody, Error> {
    let Value::Object(fields) = serde_json::from_str::<Value>(body)? else {
        return Err(Error::BodyNotObject);
    };

    let mut event = TypedBody::new(message_type);
    event.fields = fields
        .into_iter()
        .filter(|(name, _)| name != "type")
        .collect::<Map<_, _>>();

    Ok(event)
}

fn print(value: &Value) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(bus: &MessageBus<NatsDriver>, command: Command, timeout: Duration) -> Result<(), Error> {
    match command {
        Command::Ping => {
            let pongs = bus.ping().await?;
            info!(responders = pongs.len(), "ping completed");
            print(&serde_json::to_value(pongs)?)
        }
        Command::Info { service } => {
            let infos = bus.info(service.as_deref()).await?;
            print(&serde_json::to_value(infos)?)
        }
        Command::CancelId { request_id, flags } => {
            let cancel = flags.apply(CancelRequest::by_id(request_id));
            cancel_and_print(bus, cancel, flags.service.as_deref(), timeout).await
        }
        Command::CancelType {
            request_type,
            scope,
            flags,
        } => {
            let cancel = flags.apply(CancelRequest::ByType {
                request_type,
                service_name: scope,
                cancel_child_requests: false,
                wait_on_completion: false,
            });
            cancel_and_print(bus, cancel, flags.service.as_deref(), timeout).await
        }
        Command::CancelParent { parent_id, flags } => {
            let cancel = flags.apply(CancelRequest::by_parent_id(parent_id));
            cancel_and_print(bus, cancel, flags.service.as_deref(), timeout).await
        }
        Command::Publish {
            path,
            message_type,
            vars,
            body,
        } => {
            let values = vars
                .iter()
                .map(|var| parse_var(var))
                .collect::<Result<Vec<_>, _>>()?;
            let destination = Destination::from(MessagePath::parse(&path)?.publish(&values)?);

            bus.publish_message(
                &destination,
                Message::Event(event_body(&message_type, &body)?),
                Headers::new(),
            )
            .await?;
            info!(%destination, %message_type, "published");
            Ok(())
        }
    }
}

async fn cancel_and_print(
    bus: &MessageBus<NatsDriver>,
    cancel: CancelRequest,
    service: Option<&str>,
    timeout: Duration,
) -> Result<(), Error> {
    let summary = bus.cancel(cancel, service, Some(timeout)).await?;
    let responders: Vec<String> = summary
        .responders
        .iter()
        .map(ToString::to_string)
        .collect();

    print(&json!({
        "found": summary.found,
        "cancelledMessageCount": summary.cancelled_message_count,
        "responders": responders,
    }))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let timeout = Duration::from_millis(args.timeout_ms);

    let driver = NatsDriver::new(NatsDriverOptions {
        servers: args.servers,
        client_name: args.service_name.clone(),
        ..NatsDriverOptions::default()
    });
    let options = BusOptions {
        diagnostics: DiagnosticsOptions {
            ping_timeout: timeout,
            info_timeout: timeout,
            ..DiagnosticsOptions::default()
        },
        ..BusOptions::default()
    };
    let bus = MessageBus::new(
        ServiceIdentity::new(args.service_name, args.instance),
        driver,
        options,
    )?;

    bus.start().await?;
    let result = run(&bus, args.command, timeout).await;
    bus.stop().await?;

    result
}
