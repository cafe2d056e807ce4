//! Wire message model.
//!
//! Every message is a JSON object carrying a `type` string. Requests and
//! responses wrap a typed body; anything else is an event body.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Error;

/// Header bag carried next to every message.
pub type Headers = HashMap<String, String>;

/// Header holding the sender identity, stamped on every publish.
pub const SENDER_HEADER: &str = "sender";

/// Field carrying the message type.
pub const TYPE_FIELD: &str = "type";

/// Reserved wire types.
pub mod message_types {
    /// A request envelope.
    pub const REQUEST: &str = "request";

    /// A successful response envelope.
    pub const RESPONSE_SUCCESS: &str = "response-success";

    /// A failed response envelope.
    pub const RESPONSE_ERROR: &str = "response-error";
}

/// A serde type with a fixed wire type name.
pub trait TypedMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The `type` value of this message.
    const MESSAGE_TYPE: &'static str;
}

/// A JSON object tagged with a `type` string.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TypedBody {
    /// The `type` value.
    #[serde(rename = "type")]
    pub message_type: String,

    /// Remaining fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TypedBody {
    /// An empty body of the given type.
    #[must_use]
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            fields: Map::new(),
        }
    }

    /// Serializes a typed message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message does not serialize to an object.
    pub fn encode<T: TypedMessage>(message: &T) -> Result<Self, serde_json::Error> {
        let mut fields = match serde_json::to_value(message)? {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => {
                return Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                    "message '{}' must serialize to an object, got {other}",
                    T::MESSAGE_TYPE
                )));
            }
        };
        fields.remove(TYPE_FIELD);

        Ok(Self {
            message_type: T::MESSAGE_TYPE.to_string(),
            fields,
        })
    }

    /// Builds a body from any serializable value carrying its own `type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an object with a string `type`.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(value)?)
    }

    /// Deserializes into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns an error if the fields do not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }

    /// Whether this body carries `T`'s type.
    #[must_use]
    pub fn is<T: TypedMessage>(&self) -> bool {
        self.message_type == T::MESSAGE_TYPE
    }

    /// The body as a JSON object including `type`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut fields = self.fields.clone();
        fields.insert(
            TYPE_FIELD.to_string(),
            Value::String(self.message_type.clone()),
        );
        Value::Object(fields)
    }
}

/// A request.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Unique request id.
    pub id: Uuid,

    /// Rendered address responses go to.
    pub reply_to: String,

    /// Request that caused this one, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,

    /// Caller's timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Absolute deadline after which handlers reply `expired`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// The request body.
    pub body: TypedBody,
}

impl Request {
    /// Whether the deadline has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Type of the wrapped body.
    #[must_use]
    pub fn body_type(&self) -> &str {
        &self.body.message_type
    }
}

/// Why a request failed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCode {
    /// The request arrived after its deadline.
    Expired,

    /// The handler ran out of time.
    Timeout,

    /// The handler gave up.
    Aborted,

    /// The handler failed.
    Exception,

    /// The handler was cancelled.
    Cancelled,
}

impl ErrorCode {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
            Self::Exception => "exception",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successful response.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSuccess {
    /// Unique response id.
    pub id: Uuid,

    /// Id of the answered request.
    pub request_id: Uuid,

    /// Response body.
    pub body: TypedBody,
}

/// A failed response.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseError {
    /// Unique response id.
    pub id: Uuid,

    /// Id of the answered request.
    pub request_id: Uuid,

    /// Failure category.
    pub code: ErrorCode,

    /// Human readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Either kind of response.
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    /// The request succeeded.
    Success(ResponseSuccess),

    /// The request failed.
    Error(ResponseError),
}

impl Response {
    /// A success response to `request_id` with a fresh id.
    #[must_use]
    pub fn success(request_id: Uuid, body: TypedBody) -> Self {
        Self::Success(ResponseSuccess {
            id: Uuid::new_v4(),
            request_id,
            body,
        })
    }

    /// An error response to `request_id` with a fresh id.
    #[must_use]
    pub fn error(request_id: Uuid, code: ErrorCode, error: Option<String>) -> Self {
        Self::Error(ResponseError {
            id: Uuid::new_v4(),
            request_id,
            code,
            error,
        })
    }

    /// Response id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        match self {
            Self::Success(success) => success.id,
            Self::Error(error) => error.id,
        }
    }

    /// Id of the answered request.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        match self {
            Self::Success(success) => success.request_id,
            Self::Error(error) => error.request_id,
        }
    }

    /// Whether this is a success response.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Error code of a failed response.
    #[must_use]
    pub const fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Success(_) => None,
            Self::Error(error) => Some(error.code),
        }
    }

    /// Decodes a success body as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoteError`] for error responses and
    /// [`Error::UnexpectedResponse`] when the body type differs.
    pub fn decode<T: TypedMessage>(&self) -> Result<T, Error> {
        match self {
            Self::Success(success) if success.body.is::<T>() => Ok(success.body.decode()?),
            Self::Success(success) => Err(Error::UnexpectedResponse {
                expected: T::MESSAGE_TYPE.to_string(),
                actual: success.body.message_type.clone(),
            }),
            Self::Error(error) => Err(Error::RemoteError {
                code: error.code,
                message: error.error.clone(),
            }),
        }
    }
}

/// Any message on the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// A request.
    Request(Request),

    /// A response.
    Response(Response),

    /// An event: any body whose type is not reserved.
    Event(TypedBody),
}

impl Message {
    /// The wire `type` of the outer object.
    #[must_use]
    pub fn message_type(&self) -> &str {
        match self {
            Self::Request(_) => message_types::REQUEST,
            Self::Response(Response::Success(_)) => message_types::RESPONSE_SUCCESS,
            Self::Response(Response::Error(_)) => message_types::RESPONSE_ERROR,
            Self::Event(body) => &body.message_type,
        }
    }

    /// The type handlers are looked up by: the wrapped body's type for
    /// requests, the outer type otherwise.
    #[must_use]
    pub fn body_type(&self) -> &str {
        match self {
            Self::Request(request) => request.body_type(),
            Self::Response(Response::Success(success)) => &success.body.message_type,
            _ => self.message_type(),
        }
    }

    /// The typed body carried by this message, if any.
    #[must_use]
    pub const fn body(&self) -> Option<&TypedBody> {
        match self {
            Self::Request(request) => Some(&request.body),
            Self::Response(Response::Success(success)) => Some(&success.body),
            Self::Response(Response::Error(_)) => None,
            Self::Event(body) => Some(body),
        }
    }

    /// The request, if this is one.
    #[must_use]
    pub const fn as_request(&self) -> Option<&Request> {
        match self {
            Self::Request(request) => Some(request),
            _ => None,
        }
    }

    /// The response, if this is one.
    #[must_use]
    pub const fn as_response(&self) -> Option<&Response> {
        match self {
            Self::Response(response) => Some(response),
            _ => None,
        }
    }

    /// An event carrying a typed message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message does not serialize to an object.
    pub fn event<T: TypedMessage>(message: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::Event(TypedBody::encode(message)?))
    }

    /// Serializes to a JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if a field fails to serialize.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Request(request) => tagged(message_types::REQUEST, request),
            Self::Response(Response::Success(success)) => {
                tagged(message_types::RESPONSE_SUCCESS, success)
            }
            Self::Response(Response::Error(error)) => tagged(message_types::RESPONSE_ERROR, error),
            Self::Event(body) => Ok(body.to_value()),
        }
    }

    /// Classifies a JSON object by its `type`.
    ///
    /// # Errors
    ///
    /// Returns an error if `type` is missing or the fields do not match.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let Some(message_type) = value.get(TYPE_FIELD).and_then(Value::as_str) else {
            return Err(<serde_json::Error as serde::de::Error>::missing_field(
                TYPE_FIELD,
            ));
        };

        match message_type {
            message_types::REQUEST => Ok(Self::Request(serde_json::from_value(value)?)),
            message_types::RESPONSE_SUCCESS => Ok(Self::Response(Response::Success(
                serde_json::from_value(value)?,
            ))),
            message_types::RESPONSE_ERROR => Ok(Self::Response(Response::Error(
                serde_json::from_value(value)?,
            ))),
            _ => Ok(Self::Event(serde_json::from_value(value)?)),
        }
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

fn tagged<T: Serialize>(message_type: &str, value: &T) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(value)?;
    if let Value::Object(fields) = &mut value {
        fields.insert(
            TYPE_FIELD.to_string(),
            Value::String(message_type.to_string()),
        );
    }
    Ok(value)
}

/// A message on its way to the driver.
#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingEnvelope {
    /// Rendered transport subject.
    pub subject: String,

    /// Headers to send.
    pub headers: Headers,

    /// The message.
    pub message: Message,
}

/// A message delivered by the driver.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomingEnvelope {
    /// Concrete subject the message was published to.
    pub subject: String,

    /// Subject of the subscription that matched.
    pub subscribed_subject: String,

    /// Received headers.
    pub headers: Headers,

    /// The message.
    pub message: Message,
}

impl IncomingEnvelope {
    /// The request, if this is one.
    #[must_use]
    pub const fn request(&self) -> Option<&Request> {
        self.message.as_request()
    }

    /// Value of the sender header.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.headers.get(SENDER_HEADER).map(String::as_str)
    }

    /// Splits responses off into a [`ResponseEnvelope`].
    ///
    /// # Errors
    ///
    /// Gives the envelope back unchanged if it is not a response.
    pub fn into_response(self) -> Result<ResponseEnvelope, Self> {
        match self.message {
            Message::Response(response) => Ok(ResponseEnvelope {
                subject: self.subject,
                headers: self.headers,
                response,
            }),
            message => Err(Self { message, ..self }),
        }
    }
}

/// A response delivered to a requester.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseEnvelope {
    /// Subject the response arrived on.
    pub subject: String,

    /// Received headers.
    pub headers: Headers,

    /// The response.
    pub response: Response,
}

impl ResponseEnvelope {
    /// Decodes a success body as `T`.
    ///
    /// # Errors
    ///
    /// See [`Response::decode`].
    pub fn decode<T: TypedMessage>(&self) -> Result<T, Error> {
        self.response.decode()
    }

    /// Value of the sender header.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.headers.get(SENDER_HEADER).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct VehicleStopped {
        vehicle_id: String,
    }

    impl TypedMessage for VehicleStopped {
        const MESSAGE_TYPE: &'static str = "vehicle-stopped";
    }

    #[test]
    fn test_event_wire_shape() {
        let message = Message::event(&VehicleStopped {
            vehicle_id: "v1".to_string(),
        })
        .unwrap();

        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "type": "vehicle-stopped", "vehicleId": "v1" })
        );
    }

    #[test]
    fn test_request_wire_shape() {
        let id = Uuid::new_v4();
        let message = Message::Request(Request {
            id,
            reply_to: "inbox.svc.1".to_string(),
            parent_id: None,
            timeout: Some(500),
            expires_at: None,
            body: TypedBody::encode(&VehicleStopped {
                vehicle_id: "v1".to_string(),
            })
            .unwrap(),
        });

        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "request",
                "id": id,
                "replyTo": "inbox.svc.1",
                "timeout": 500,
                "body": { "type": "vehicle-stopped", "vehicleId": "v1" },
            })
        );
    }

    #[test]
    fn test_classification_by_type() {
        let request_id = Uuid::new_v4();
        let error: Message = serde_json::from_value(json!({
            "type": "response-error",
            "id": Uuid::new_v4(),
            "requestId": request_id,
            "code": "expired",
        }))
        .unwrap();
        assert_eq!(
            error.as_response().and_then(Response::error_code),
            Some(ErrorCode::Expired)
        );

        let event: Message =
            serde_json::from_value(json!({ "type": "vehicle-stopped", "vehicleId": "v2" })).unwrap();
        assert_eq!(event.body_type(), "vehicle-stopped");
        assert_eq!(
            event.body().unwrap().decode::<VehicleStopped>().unwrap(),
            VehicleStopped {
                vehicle_id: "v2".to_string()
            }
        );

        assert!(serde_json::from_value::<Message>(json!({ "vehicleId": "v2" })).is_err());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut request = Request {
            id: Uuid::new_v4(),
            reply_to: "inbox".to_string(),
            parent_id: None,
            timeout: None,
            expires_at: None,
            body: TypedBody::new("noop"),
        };
        assert!(!request.is_expired_at(now));

        request.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(request.is_expired_at(now));
    }

    #[test]
    fn test_decode_checks_type() {
        let response = Response::success(Uuid::new_v4(), TypedBody::new("other"));
        assert!(matches!(
            response.decode::<VehicleStopped>(),
            Err(Error::UnexpectedResponse { .. })
        ));

        let response = Response::error(Uuid::new_v4(), ErrorCode::Cancelled, None);
        assert!(matches!(
            response.decode::<VehicleStopped>(),
            Err(Error::RemoteError {
                code: ErrorCode::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn test_into_response() {
        let envelope = IncomingEnvelope {
            subject: "inbox.a.b".to_string(),
            subscribed_subject: "inbox.a.b".to_string(),
            headers: Headers::new(),
            message: Message::Event(TypedBody::new("tick")),
        };
        let envelope = envelope.into_response().unwrap_err();

        assert_eq!(envelope.message.message_type(), "tick");
    }
}
