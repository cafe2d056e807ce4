//! Abstract, slash-delimited message paths.
//!
//! A template such as `events/vehicles/{vehicleId(required)}/{kind:status}/...`
//! is parsed once into [`MessagePath`]. Binding values produces either a
//! [`PublishPath`] (every variable bound) or a [`SubscribePath`] (every
//! required variable bound). Neither is a transport subject yet: a
//! [`Renderer`] turns them into one.

mod error;
mod render;

pub use error::Error;
pub use render::{RenderProfile, Renderer};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Separator between template segments.
pub const PATH_SEPARATOR: char = '/';

/// Token marking a multi-level rest segment.
pub const REST_TOKEN: &str = "...";

/// Reserved binding name for the pieces covered by the rest segment.
///
/// The value is the pieces joined with `/`, e.g. `commands/move`.
pub const REST_VARIABLE: &str = "rest";

const REQUIRED_OPTION: &str = "required";

/// A named placeholder inside a template.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Variable {
    /// Name used when binding.
    pub name: String,

    /// Value used when the caller does not bind one.
    pub default_value: Option<String>,

    /// Whether subscriptions must bind this variable.
    pub required: bool,
}

/// One parsed template segment.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Segment {
    /// Fixed text.
    Literal(String),

    /// A `{name}` placeholder.
    Variable(Variable),

    /// The trailing `...` segment.
    Rest,
}

/// Parsed template plus the values bound so far.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessagePath {
    template: String,
    segments: Vec<Segment>,
    bound: BTreeMap<String, String>,
}

impl MessagePath {
    /// Parses a template.
    ///
    /// # Errors
    ///
    /// Returns an error if the template is malformed.
    pub fn parse(template: &str) -> Result<Self, Error> {
        let mut segments = Vec::new();
        let mut bound = BTreeMap::new();
        let mut seen_rest = false;

        for raw in template.split(PATH_SEPARATOR) {
            if raw.is_empty() {
                return Err(Error::EmptySegment {
                    template: template.to_string(),
                });
            }

            if seen_rest {
                return Err(if raw == REST_TOKEN {
                    Error::MultipleRest {
                        template: template.to_string(),
                    }
                } else {
                    Error::RestNotLast {
                        template: template.to_string(),
                    }
                });
            }

            if raw == REST_TOKEN {
                seen_rest = true;
                segments.push(Segment::Rest);
                continue;
            }

            if raw.starts_with('{') && raw.ends_with('}') {
                let variable = parse_variable(template, raw)?;

                if segments.iter().any(|segment| {
                    matches!(segment, Segment::Variable(existing) if existing.name == variable.name)
                }) {
                    return Err(Error::DuplicateVariable {
                        name: variable.name,
                    });
                }

                if let Some(default_value) = &variable.default_value {
                    bound.insert(variable.name.clone(), default_value.clone());
                }
                segments.push(Segment::Variable(variable));
                continue;
            }

            if !is_valid_literal(raw) {
                return Err(Error::InvalidSegment {
                    segment: raw.to_string(),
                });
            }
            segments.push(Segment::Literal(raw.to_string()));
        }

        Ok(Self {
            template: template.to_string(),
            segments,
            bound,
        })
    }

    /// The template this path was parsed from.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Parsed segments in order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Declared variables in order.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Variable(variable) => Some(variable),
            _ => None,
        })
    }

    /// Whether the template ends in `...`.
    #[must_use]
    pub fn has_rest(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Rest))
    }

    /// Current value of a variable, including defaults.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.bound.get(name).map(String::as_str)
    }

    /// Pieces bound to the rest segment, if any.
    #[must_use]
    pub fn rest(&self) -> Option<Vec<&str>> {
        self.value(REST_VARIABLE)
            .map(|rest| rest.split(PATH_SEPARATOR).collect())
    }

    /// Returns a copy with additional values bound, without validating
    /// completeness.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is not declared or a value is invalid.
    pub fn with_values(&self, values: &[(&str, &str)]) -> Result<Self, Error> {
        let mut path = self.clone();

        for (name, value) in values {
            if *name == REST_VARIABLE && path.has_rest() {
                if value.split(PATH_SEPARATOR).any(|piece| !is_valid_value(piece)) {
                    return Err(Error::InvalidValue {
                        name: (*name).to_string(),
                        value: (*value).to_string(),
                    });
                }
                path.bound.insert(REST_VARIABLE.to_string(), (*value).to_string());
                continue;
            }

            if !path.variables().any(|variable| variable.name == *name) {
                return Err(Error::UnknownVariable {
                    name: (*name).to_string(),
                    path: path.template.clone(),
                });
            }

            if !is_valid_value(value) {
                return Err(Error::InvalidValue {
                    name: (*name).to_string(),
                    value: (*value).to_string(),
                });
            }
            path.bound.insert((*name).to_string(), (*value).to_string());
        }

        Ok(path)
    }

    /// Binds values and checks every variable has one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnboundVariable`] if any variable, required or not,
    /// is left without a value, or any error from [`Self::with_values`].
    pub fn publish(&self, values: &[(&str, &str)]) -> Result<PublishPath, Error> {
        let path = self.with_values(values)?;

        if let Some(variable) = path
            .variables()
            .find(|variable| !path.bound.contains_key(&variable.name))
        {
            return Err(Error::UnboundVariable {
                name: variable.name.clone(),
                path: path.template.clone(),
            });
        }

        Ok(PublishPath(path))
    }

    /// Binds values and checks every required variable has one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRequiredVariable`] if a required variable is
    /// left without a value, or any error from [`Self::with_values`].
    pub fn subscribe(&self, values: &[(&str, &str)]) -> Result<SubscribePath, Error> {
        let path = self.with_values(values)?;

        if let Some(variable) = path
            .variables()
            .find(|variable| variable.required && !path.bound.contains_key(&variable.name))
        {
            return Err(Error::MissingRequiredVariable {
                name: variable.name.clone(),
                path: path.template.clone(),
            });
        }

        Ok(SubscribePath(path))
    }
}

impl fmt::Display for MessagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

impl FromStr for MessagePath {
    type Err = Error;

    fn from_str(template: &str) -> Result<Self, Self::Err> {
        Self::parse(template)
    }
}

/// A path whose variables are all bound.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublishPath(MessagePath);

impl PublishPath {
    /// The underlying bound path.
    #[must_use]
    pub const fn path(&self) -> &MessagePath {
        &self.0
    }
}

impl fmt::Display for PublishPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A path whose required variables are bound. Unbound optional variables
/// and the rest segment match broadly where the transport allows it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubscribePath(MessagePath);

impl SubscribePath {
    /// The underlying bound path.
    #[must_use]
    pub const fn path(&self) -> &MessagePath {
        &self.0
    }
}

impl fmt::Display for SubscribePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An opaque, already-rendered reply address taken from a request.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ReplyPath(String);

impl ReplyPath {
    /// Wraps a rendered reply address.
    #[must_use]
    pub fn new(reply_to: impl Into<String>) -> Self {
        Self(reply_to.into())
    }

    /// The rendered address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an outgoing message goes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Destination {
    /// A path rendered by the transport.
    Path(PublishPath),

    /// A reply address used verbatim.
    Reply(ReplyPath),
}

impl From<PublishPath> for Destination {
    fn from(path: PublishPath) -> Self {
        Self::Path(path)
    }
}

impl From<ReplyPath> for Destination {
    fn from(reply: ReplyPath) -> Self {
        Self::Reply(reply)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => path.fmt(f),
            Self::Reply(reply) => reply.fmt(f),
        }
    }
}

fn parse_variable(template: &str, raw: &str) -> Result<Variable, Error> {
    let inner = &raw[1..raw.len() - 1];

    let (declaration, default_value) = match inner.split_once(':') {
        Some((declaration, "")) => {
            return Err(Error::EmptyDefaultValue {
                variable: declaration.to_string(),
            });
        }
        Some((declaration, default_value)) => (declaration, Some(default_value.to_string())),
        None => (inner, None),
    };

    let (name, required) = match declaration.split_once('(') {
        Some((name, options)) => {
            let Some(options) = options.strip_suffix(')') else {
                return Err(Error::UnclosedOption {
                    segment: raw.to_string(),
                });
            };

            let mut required = false;
            for option in options.split(',').map(str::trim) {
                if option == REQUIRED_OPTION {
                    required = true;
                } else {
                    return Err(Error::UnknownOption {
                        variable: name.to_string(),
                        option: option.to_string(),
                    });
                }
            }
            (name, required)
        }
        None => (declaration, false),
    };

    if name.is_empty() {
        return Err(Error::EmptyVariableName {
            template: template.to_string(),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidSegment {
            segment: raw.to_string(),
        });
    }

    if let Some(default_value) = &default_value {
        if !is_valid_value(default_value) {
            return Err(Error::InvalidValue {
                name: name.to_string(),
                value: default_value.clone(),
            });
        }
    }

    Ok(Variable {
        name: name.to_string(),
        default_value,
        required,
    })
}

fn is_valid_literal(raw: &str) -> bool {
    !raw.contains(['{', '}']) && is_valid_value(raw)
}

fn is_valid_value(value: &str) -> bool {
    !value.is_empty()
        && !value.contains([PATH_SEPARATOR, '.', '*', '>'])
        && !value.chars().any(char::is_whitespace)
}
