//! Topic name and topic filter rules, and filter matching.

use crate::error::{MqttError, Result};

/// A topic name is non-empty and carries no wildcard characters.
#[must_use]
pub fn is_valid_topic_name(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['+', '#', '\0'])
}

/// `+` and `#` must occupy a whole level, and `#` only the last one.
#[must_use]
pub fn is_valid_topic_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.contains('\0') {
        return false;
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        match level {
            "#" if levels.peek().is_some() => return false,
            "#" | "+" => {}
            _ if level.contains(['+', '#']) => return false,
            _ => {}
        }
    }
    true
}

pub fn validate_topic_name(topic: &str) -> Result<()> {
    if is_valid_topic_name(topic) {
        Ok(())
    } else {
        Err(MqttError::InvalidTopicName(topic.to_string()))
    }
}

pub fn validate_topic_filter(filter: &str) -> Result<()> {
    if is_valid_topic_filter(filter) {
        Ok(())
    } else {
        Err(MqttError::InvalidTopicFilter(filter.to_string()))
    }
}

/// Segment-wise match of a concrete topic name against a filter.
///
/// `+` matches exactly one level. `#` matches the rest of the topic,
/// including zero levels, so `a/#` matches `a`. A `#` that is not the last
/// filter level matches nothing. Topics starting with `$` are not matched
/// by a wildcard in the first level.
#[must_use]
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic == filter {
        return !filter.contains(['+', '#']);
    }

    if topic.starts_with('$') && filter.starts_with(['+', '#']) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/').peekable();

    while let Some(filter_level) = filter_levels.next() {
        if filter_level == "#" {
            return filter_levels.peek().is_none();
        }
        match topic_levels.next() {
            Some(topic_level) if filter_level == "+" || filter_level == topic_level => {}
            _ => return false,
        }
    }

    topic_levels.next().is_none()
}
