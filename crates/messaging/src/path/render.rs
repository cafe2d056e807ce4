use super::{Destination, Error, MessagePath, PublishPath, Segment, SubscribePath};

/// How much of a path a transport can express.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RenderProfile {
    /// Hierarchical subjects with single and multi-level wildcards.
    Wildcard,

    /// Only a static prefix: rendering stops at the first optional
    /// variable or rest segment.
    PrefixOnly,
}

/// Turns bound paths into transport subjects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Renderer {
    profile: RenderProfile,
    separator: String,
    single_wildcard: String,
    multi_wildcard: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Mode {
    Publish,
    Subscribe,
}

impl Renderer {
    /// Dot-separated subjects with `*` and `>` wildcards.
    #[must_use]
    pub fn wildcard() -> Self {
        Self::wildcard_with(".", "*", ">")
    }

    /// Wildcard-capable renderer using custom tokens.
    #[must_use]
    pub fn wildcard_with(separator: &str, single_wildcard: &str, multi_wildcard: &str) -> Self {
        Self {
            profile: RenderProfile::Wildcard,
            separator: separator.to_string(),
            single_wildcard: single_wildcard.to_string(),
            multi_wildcard: multi_wildcard.to_string(),
        }
    }

    /// Prefix-only renderer joining segments with `separator`.
    #[must_use]
    pub fn prefix_only(separator: &str) -> Self {
        Self {
            profile: RenderProfile::PrefixOnly,
            separator: separator.to_string(),
            single_wildcard: String::new(),
            multi_wildcard: String::new(),
        }
    }

    /// Default renderer for a profile.
    #[must_use]
    pub fn for_profile(profile: RenderProfile) -> Self {
        match profile {
            RenderProfile::Wildcard => Self::wildcard(),
            RenderProfile::PrefixOnly => Self::prefix_only("."),
        }
    }

    /// The profile this renderer implements.
    #[must_use]
    pub const fn profile(&self) -> RenderProfile {
        self.profile
    }

    /// Separator placed between rendered segments.
    #[must_use]
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Renders a publish path.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable the profile needs has no value.
    pub fn render_publish(&self, path: &PublishPath) -> Result<String, Error> {
        self.render(path.path(), Mode::Publish)
    }

    /// Renders a subscribe path.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable has no value.
    pub fn render_subscribe(&self, path: &SubscribePath) -> Result<String, Error> {
        self.render(path.path(), Mode::Subscribe)
    }

    /// Renders a destination. Reply addresses are used verbatim.
    ///
    /// # Errors
    ///
    /// See [`Self::render_publish`].
    pub fn render_destination(&self, destination: &Destination) -> Result<String, Error> {
        match destination {
            Destination::Path(path) => self.render_publish(path),
            Destination::Reply(reply) => Ok(reply.as_str().to_string()),
        }
    }

    fn render(&self, path: &MessagePath, mode: Mode) -> Result<String, Error> {
        let mut tokens: Vec<&str> = Vec::with_capacity(path.segments().len());

        for segment in path.segments() {
            match (self.profile, segment) {
                (_, Segment::Literal(literal)) => tokens.push(literal),

                (RenderProfile::Wildcard, Segment::Variable(variable)) => {
                    match (path.value(&variable.name), mode) {
                        (Some(value), _) => tokens.push(value),
                        (None, Mode::Subscribe) if !variable.required => {
                            tokens.push(&self.single_wildcard);
                        }
                        (None, Mode::Subscribe) => {
                            return Err(Error::MissingRequiredVariable {
                                name: variable.name.clone(),
                                path: path.template().to_string(),
                            });
                        }
                        (None, Mode::Publish) => {
                            return Err(Error::UnboundVariable {
                                name: variable.name.clone(),
                                path: path.template().to_string(),
                            });
                        }
                    }
                }

                (RenderProfile::Wildcard, Segment::Rest) => match (path.rest(), mode) {
                    (Some(pieces), _) => tokens.extend(pieces),
                    (None, Mode::Subscribe) => tokens.push(&self.multi_wildcard),
                    (None, Mode::Publish) => {}
                },

                (RenderProfile::PrefixOnly, Segment::Variable(variable)) if variable.required => {
                    let Some(value) = path.value(&variable.name) else {
                        return Err(Error::MissingRequiredVariable {
                            name: variable.name.clone(),
                            path: path.template().to_string(),
                        });
                    };
                    tokens.push(value);
                }

                (RenderProfile::PrefixOnly, Segment::Variable(_) | Segment::Rest) => break,
            }
        }

        Ok(tokens.join(self.separator.as_str()))
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::wildcard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{REST_VARIABLE, ReplyPath};

    fn vehicles() -> MessagePath {
        MessagePath::parse("events/vehicles/{type}/{subType}").unwrap()
    }

    #[test]
    fn test_wildcard_publish_renders_every_value() {
        let path = vehicles()
            .publish(&[("type", "query"), ("subType", "stopped")])
            .unwrap();

        assert_eq!(
            Renderer::wildcard().render_publish(&path).unwrap(),
            "events.vehicles.query.stopped"
        );
    }

    #[test]
    fn test_prefix_only_truncates_at_first_optional() {
        let path = vehicles()
            .publish(&[("type", "query"), ("subType", "stopped")])
            .unwrap();

        assert_eq!(
            Renderer::prefix_only(".").render_publish(&path).unwrap(),
            "events.vehicles"
        );
    }

    #[test]
    fn test_prefix_only_keeps_required_values() {
        let path = MessagePath::parse("commands/{vehicleId(required)}/{kind}/...")
            .unwrap()
            .subscribe(&[("vehicleId", "v7")])
            .unwrap();

        assert_eq!(
            Renderer::prefix_only("/").render_subscribe(&path).unwrap(),
            "commands/v7"
        );
    }

    #[test]
    fn test_wildcard_subscribe_uses_wildcards() {
        let path = MessagePath::parse("commands/{vehicleId(required)}/{kind}/...")
            .unwrap()
            .subscribe(&[("vehicleId", "v7")])
            .unwrap();

        assert_eq!(
            Renderer::wildcard().render_subscribe(&path).unwrap(),
            "commands.v7.*.>"
        );
    }

    #[test]
    fn test_wildcard_rest_expands_pieces() {
        let template = MessagePath::parse("commands/...").unwrap();
        let renderer = Renderer::wildcard();

        let publish = template.publish(&[(REST_VARIABLE, "move/fast")]).unwrap();
        assert_eq!(renderer.render_publish(&publish).unwrap(), "commands.move.fast");

        let bare = template.publish(&[]).unwrap();
        assert_eq!(renderer.render_publish(&bare).unwrap(), "commands");

        let subscribe = template.subscribe(&[(REST_VARIABLE, "move")]).unwrap();
        assert_eq!(renderer.render_subscribe(&subscribe).unwrap(), "commands.move");
    }

    #[test]
    fn test_published_subjects_have_no_placeholders() {
        let renderer = Renderer::wildcard();
        let templates = [
            "a/{x}",
            "a/{x(required)}/b/{y:z}",
            "{x}/{y}/...",
            "inbox/{name(required)}/{instanceId(required)}",
        ];

        for template in templates {
            let path = MessagePath::parse(template).unwrap();
            let values: Vec<(String, String)> = path
                .variables()
                .map(|variable| (variable.name.clone(), format!("v-{}", variable.name)))
                .collect();
            let values: Vec<(&str, &str)> = values
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect();

            let subject = renderer
                .render_publish(&path.publish(&values).unwrap())
                .unwrap();
            assert!(!subject.contains(['{', '}', '*', '>']), "{subject}");
            assert!(!subject.contains("..."), "{subject}");
        }
    }

    #[test]
    fn test_reply_destination_is_verbatim() {
        let destination = Destination::Reply(ReplyPath::new("inbox.svc.1234"));

        assert_eq!(
            Renderer::prefix_only("/")
                .render_destination(&destination)
                .unwrap(),
            "inbox.svc.1234"
        );
    }
}
