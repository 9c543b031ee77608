//! Status topic layout and MQTT topic-filter matching.
//!
//! Turtles publish on `<base>/<turtleId>/status`.  The bridge subscribes to
//! the single-level wildcard filter `<base>/+/status` and recovers the
//! identifier from the topic each message arrived on.

use quayos_types::QuayError;

/// Default base topic under which every turtle publishes.
pub const DEFAULT_BASE_TOPIC: &str = "quayos/turtles";

/// Trailing segment of every status topic.
pub const STATUS_SEGMENT: &str = "status";

/// Topic layout for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLayout {
    base: String,
}

impl TopicLayout {
    /// Build a layout rooted at `base`.
    ///
    /// Trailing slashes are stripped.
    ///
    /// # Errors
    ///
    /// Returns [`QuayError::Config`] when `base` is empty or contains an MQTT
    /// wildcard (`+` or `#`).
    pub fn new(base: impl Into<String>) -> Result<Self, QuayError> {
        let base = base.into();
        let base = base.trim_end_matches('/').to_string();
        if base.is_empty() {
            return Err(QuayError::Config("base topic must not be empty".to_string()));
        }
        if base.contains(['+', '#']) {
            return Err(QuayError::Config(format!(
                "base topic '{base}' must not contain MQTT wildcards"
            )));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// The wildcard filter covering every turtle's status topic.
    pub fn subscription_filter(&self) -> String {
        format!("{}/+/{}", self.base, STATUS_SEGMENT)
    }

    /// The concrete status topic for `turtle_id`.
    pub fn status_topic(&self, turtle_id: &str) -> String {
        format!("{}/{}/{}", self.base, turtle_id, STATUS_SEGMENT)
    }

    /// Recover the turtle identifier from a status topic.
    ///
    /// The identifier is the single segment between `<base>/` and the
    /// trailing `/status`.  Returns `None` for any other shape, including
    /// status topics published under a different base.
    pub fn turtle_id<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        let id = rest.strip_suffix(STATUS_SEGMENT)?.strip_suffix('/')?;
        if id.is_empty() || id.contains('/') {
            return None;
        }
        Some(id)
    }
}

impl Default for TopicLayout {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_TOPIC.to_string(),
        }
    }
}

/// Whether `topic` is matched by the MQTT subscription `filter`.
///
/// `+` matches exactly one level, a trailing `#` matches the parent level
/// and everything below it.
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
