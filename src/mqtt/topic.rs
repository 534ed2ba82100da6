//! Wildcard topic patterns that encode the device id as one path segment.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Invalid subscription pattern.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicPatternError {
    #[error("Topic pattern cannot be empty")]
    Empty,

    #[error("Topic pattern '{0}' must contain exactly one '+' segment for the device id")]
    WildcardCount(String),

    #[error("Topic pattern '{0}' must not use the multi-level wildcard '#'")]
    MultiLevelWildcard(String),

    #[error("Topic pattern '{pattern}' has an invalid segment '{segment}'")]
    InvalidSegment { pattern: String, segment: String },
}

/// A subscription pattern such as `iot/sensor/+/value`.
///
/// Exactly one segment is the single-level wildcard `+`; it captures the
/// device id. `+` matches one whole, non-empty segment: `a/+/c` matches
/// `a/x/c` but not `a/x/y/c` or `a//c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Device,
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Result<Self, TopicPatternError> {
        if pattern.is_empty() {
            return Err(TopicPatternError::Empty);
        }

        let mut segments = Vec::new();
        let mut wildcards = 0;

        for segment in pattern.split('/') {
            match segment {
                "+" => {
                    wildcards += 1;
                    segments.push(Segment::Device);
                }
                "#" => return Err(TopicPatternError::MultiLevelWildcard(pattern.to_string())),
                s if s.contains(['+', '#']) => {
                    return Err(TopicPatternError::InvalidSegment {
                        pattern: pattern.to_string(),
                        segment: s.to_string(),
                    });
                }
                s => segments.push(Segment::Literal(s.to_string())),
            }
        }

        if wildcards != 1 {
            return Err(TopicPatternError::WildcardCount(pattern.to_string()));
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// The pattern as passed to the broker's SUBSCRIBE.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Device id captured by `+`, or `None` if `topic` does not match.
    pub fn extract_device_id<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let mut device_id = None;
        let mut parts = topic.split('/');

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Device if part.is_empty() => return None,
                Segment::Device => device_id = Some(part),
            }
        }

        // Extra trailing segments mean a deeper topic than the pattern
        if parts.next().is_some() {
            return None;
        }

        device_id
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.extract_device_id(topic).is_some()
    }

    /// Concrete topic for a device, e.g. for publishing test messages.
    pub fn topic_for(&self, device_id: &str) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(literal) => literal.as_str(),
                Segment::Device => device_id,
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl FromStr for TopicPattern {
    type Err = TopicPatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
