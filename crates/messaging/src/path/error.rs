use thiserror::Error;

/// Errors raised while parsing, binding or rendering message paths.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    /// Default values must not be empty (`{name:}`).
    #[error("variable '{variable}' declares an empty default value")]
    EmptyDefaultValue {
        /// The offending variable.
        variable: String,
    },

    /// Two slashes in a row, or a leading/trailing slash.
    #[error("path template '{template}' contains an empty segment")]
    EmptySegment {
        /// The offending template.
        template: String,
    },

    /// `{}` or `{:default}`.
    #[error("path template '{template}' declares a variable without a name")]
    EmptyVariableName {
        /// The offending template.
        template: String,
    },

    /// The same variable name was declared twice.
    #[error("variable '{name}' is declared more than once")]
    DuplicateVariable {
        /// The repeated name.
        name: String,
    },

    /// A literal segment used reserved characters.
    #[error("segment '{segment}' is not a valid literal or variable")]
    InvalidSegment {
        /// The offending segment.
        segment: String,
    },

    /// A bound value was empty or would introduce extra levels.
    #[error("value '{value}' for variable '{name}' is empty or contains a separator")]
    InvalidValue {
        /// Variable being bound.
        name: String,
        /// Rejected value.
        value: String,
    },

    /// Required variable left unbound in a subscription or prefix-only render.
    #[error("required variable '{name}' of '{path}' has no value")]
    MissingRequiredVariable {
        /// Variable name.
        name: String,
        /// Template of the path.
        path: String,
    },

    /// More than one `...` segment.
    #[error("path template '{template}' contains more than one rest segment")]
    MultipleRest {
        /// The offending template.
        template: String,
    },

    /// `...` must be the final segment.
    #[error("rest segment must be the last segment of '{template}'")]
    RestNotLast {
        /// The offending template.
        template: String,
    },

    /// Any variable left unbound in a publish render.
    #[error("variable '{name}' of '{path}' must be bound before publishing")]
    UnboundVariable {
        /// Variable name.
        name: String,
        /// Template of the path.
        path: String,
    },

    /// `name(` without a closing parenthesis.
    #[error("option list of '{segment}' is not closed")]
    UnclosedOption {
        /// The offending segment.
        segment: String,
    },

    /// Only `required` is understood.
    #[error("variable '{variable}' uses unknown option '{option}'")]
    UnknownOption {
        /// The offending variable.
        variable: String,
        /// The unknown option.
        option: String,
    },

    /// Binding a name the template does not declare.
    #[error("'{path}' has no variable named '{name}'")]
    UnknownVariable {
        /// Variable name.
        name: String,
        /// Template of the path.
        path: String,
    },
}
