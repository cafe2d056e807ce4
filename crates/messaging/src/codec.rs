//! Payload encoding.
//!
//! JSON is the default. Individual message types can opt into another
//! codec; the choice travels in the [`CODEC_TYPE_HEADER`] header so the
//! receiving side can pick the same one.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::envelope::{Headers, Message};

/// Header naming the codec a payload was encoded with.
pub const CODEC_TYPE_HEADER: &str = "codec/type";

/// Errors raised while encoding or decoding payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// CBOR failure.
    #[error("cbor error: {0}")]
    Cbor(String),

    /// JSON failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The header named a codec this side does not know.
    #[error("no codec registered for '{0}'")]
    UnknownCodec(String),
}

/// Encodes whole messages to bytes and back.
pub trait BodyCodec: Debug + Send + Sync + 'static {
    /// Encodes a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    fn encode(&self, message: &Message) -> Result<Bytes, CodecError>;

    /// Decodes a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    fn decode(&self, payload: &[u8]) -> Result<Message, CodecError>;
}

/// UTF-8 JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl BodyCodec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(serde_json::to_vec(message)?))
    }

    fn decode(&self, payload: &[u8]) -> Result<Message, CodecError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Compact binary CBOR.
#[derive(Clone, Copy, Debug, Default)]
pub struct CborCodec;

impl BodyCodec for CborCodec {
    fn encode(&self, message: &Message) -> Result<Bytes, CodecError> {
        let mut payload = Vec::new();
        ciborium::ser::into_writer(message, &mut payload)
            .map_err(|e| CodecError::Cbor(e.to_string()))?;
        Ok(Bytes::from(payload))
    }

    fn decode(&self, payload: &[u8]) -> Result<Message, CodecError> {
        ciborium::de::from_reader(payload).map_err(|e| CodecError::Cbor(e.to_string()))
    }
}

/// Per message type codec overrides.
#[derive(Clone, Debug, Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn BodyCodec>>,
}

impl CodecRegistry {
    /// An empty registry: everything is JSON.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes messages whose outer type is `message_type` with `codec`.
    #[must_use]
    pub fn with_codec(mut self, message_type: impl Into<String>, codec: impl BodyCodec) -> Self {
        self.register(message_type, codec);
        self
    }

    /// Registers a codec for a message type.
    pub fn register(&mut self, message_type: impl Into<String>, codec: impl BodyCodec) {
        self.codecs.insert(message_type.into(), Arc::new(codec));
    }

    /// Codec registered for a type.
    #[must_use]
    pub fn find(&self, message_type: &str) -> Option<&Arc<dyn BodyCodec>> {
        self.codecs.get(message_type)
    }

    /// Encodes a message, recording the codec in `headers` when it is not
    /// JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, message: &Message, headers: &mut Headers) -> Result<Bytes, CodecError> {
        let message_type = message.message_type();

        match self.find(message_type) {
            Some(codec) => {
                headers.insert(CODEC_TYPE_HEADER.to_string(), message_type.to_string());
                codec.encode(message)
            }
            None => JsonCodec.encode(message),
        }
    }

    /// Decodes a payload using the codec named in `headers`, JSON otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec is unknown or decoding fails.
    pub fn decode(&self, payload: &[u8], headers: &Headers) -> Result<Message, CodecError> {
        match headers.get(CODEC_TYPE_HEADER) {
            Some(message_type) => self
                .find(message_type)
                .ok_or_else(|| CodecError::UnknownCodec(message_type.clone()))?
                .decode(payload),
            None => JsonCodec.decode(payload),
        }
    }
}
