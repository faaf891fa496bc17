//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use thiserror::Error;

/// The topic level separator
pub const TOPIC_LEVEL_SEPARATOR: char = '/';

/// The maximum byte length of a topic name or filter
pub const MAXIMUM_TOPIC_BYTE_LENGTH: usize = 65_535;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("A topic name or filter cannot be empty")]
    Empty,
    #[error("A topic of {} bytes exceeds the maximum length", .0)]
    TooLong(usize),
    #[error("Topic names and filters cannot contain a null character")]
    NullCharacter,
    #[error("Topic levels must be non-empty; adjacent separators are not allowed")]
    AdjacentSeparators,
    #[error("Topic names cannot contain wildcards")]
    WildcardInTopicName,
    #[error("Wildcards must occupy a whole topic level")]
    MixedWildcardLevel,
    #[error("The multi-level wildcard may only appear as the final level")]
    MultiWildcardNotLast,
}

fn validate_shape(value: &str) -> Result<(), TopicError> {
    if value.is_empty() {
        return Err(TopicError::Empty);
    }
    if value.len() > MAXIMUM_TOPIC_BYTE_LENGTH {
        return Err(TopicError::TooLong(value.len()));
    }
    if value.contains('\u{0000}') {
        return Err(TopicError::NullCharacter);
    }

    // An empty level is legal only as the very first or very last level,
    // which is how a leading or trailing separator reads.
    let levels: Vec<&str> = value.split(TOPIC_LEVEL_SEPARATOR).collect();
    for (index, level) in levels.iter().enumerate() {
        if level.is_empty() && index != 0 && index != levels.len() - 1 {
            return Err(TopicError::AdjacentSeparators);
        }
    }

    Ok(())
}

/// An owned MQTT topic name, as used for publishing.
///
/// Topic names never contain wildcards; for subscriptions, a
/// [`TopicFilter`] is used.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct TopicName(String);

impl TopicName {
    pub fn new(value: impl Into<String>) -> Result<TopicName, TopicError> {
        let value = value.into();

        validate_shape(&value)?;
        if value.contains(['+', '#']) {
            return Err(TopicError::WildcardInTopicName);
        }

        Ok(TopicName(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn levels(&self) -> impl Iterator<Item = &str> {
        self.0.split(TOPIC_LEVEL_SEPARATOR)
    }
}

impl AsRef<str> for TopicName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum FilterLevel {
    Literal(String),
    Single,
    Multi,
}

/// An owned MQTT topic filter, as used for subscriptions.
///
/// A filter is denoted as a string like `"sport/tennis/+"`: `+` matches
/// exactly one level, a final `#` matches zero or more trailing levels.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct TopicFilter {
    value: String,
    levels: Vec<FilterLevel>,
}

impl TopicFilter {
    pub fn new(value: impl Into<String>) -> Result<TopicFilter, TopicError> {
        let value = value.into();

        validate_shape(&value)?;

        let raw_levels: Vec<&str> = value.split(TOPIC_LEVEL_SEPARATOR).collect();
        let mut levels = Vec::with_capacity(raw_levels.len());

        for (index, level) in raw_levels.iter().enumerate() {
            let parsed = match *level {
                "+" => FilterLevel::Single,
                "#" => {
                    if index != raw_levels.len() - 1 {
                        return Err(TopicError::MultiWildcardNotLast);
                    }
                    FilterLevel::Multi
                }
                other => {
                    if other.contains(['+', '#']) {
                        return Err(TopicError::MixedWildcardLevel);
                    }
                    FilterLevel::Literal(other.to_string())
                }
            };
            levels.push(parsed);
        }

        Ok(TopicFilter { value, levels })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Walks both topics level by level: a literal level matches only
    /// itself bytewise, `+` consumes exactly one level, `#` matches all
    /// remaining levels including none.
    pub fn matches(&self, name: &TopicName) -> bool {
        let name_levels: Vec<&str> = name.levels().collect();

        for (index, level) in self.levels.iter().enumerate() {
            match level {
                FilterLevel::Multi => return true,
                FilterLevel::Single => {
                    if index >= name_levels.len() {
                        return false;
                    }
                }
                FilterLevel::Literal(literal) => {
                    if name_levels.get(index).copied() != Some(literal.as_str()) {
                        return false;
                    }
                }
            }
        }

        self.levels.len() == name_levels.len()
    }
}

impl AsRef<str> for TopicFilter {
    fn as_ref(&self) -> &str {
        &self.value
    }
}
