// ── Topic scheme ──
//
// Topic builders for every channel the station uses, plus the structured
// filter used to route inbound messages to handlers.

use std::fmt;

use crate::error::CoreError;

/// Root of every calling-station topic.
pub const TOPIC_PREFIX: &str = "M/TRANSFER";

/// Match-everything handler key.
pub const CATCH_ALL: &str = "*";

/// Status counters for every doctor in an org.
pub fn org_docs_status(org_code: &str) -> String {
    format!("{TOPIC_PREFIX}/ORG_DOCS_STATUS_SYNC/{org_code}")
}

/// Liveness beacons for one doctor.
pub fn doctor_heartbeat(org_code: &str, doc_id: i64) -> String {
    format!("{TOPIC_PREFIX}/DOC_HEARTBEAT/{org_code}/{doc_id}")
}

/// Patient changes within a department.
pub fn patient_update(org_code: &str, dept_id: i64) -> String {
    format!("{TOPIC_PREFIX}/PATIENT_UPDATE/{org_code}/{dept_id}")
}

// ── TopicFilter ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `+`: exactly one level.
    Single,
    /// `#`: this level and everything below. Always last.
    Tail,
}

/// A parsed topic pattern matched segment by segment on `/`.
///
/// Follows MQTT filter semantics: `+` matches one level, a trailing `#`
/// matches the remaining levels (including none), and wildcards do not
/// match `$`-prefixed system topics at the first level. The bare key `*`
/// matches every topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    raw: String,
    segments: Option<Vec<Segment>>,
}

impl TopicFilter {
    pub fn parse(filter: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidTopic {
            filter: filter.to_owned(),
            reason: reason.to_owned(),
        };

        if filter.is_empty() {
            return Err(invalid("empty filter"));
        }
        if filter == CATCH_ALL {
            return Ok(Self {
                raw: filter.to_owned(),
                segments: None,
            });
        }

        let parts: Vec<&str> = filter.split('/').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "+" => Segment::Single,
                "#" if i == last => Segment::Tail,
                "#" => return Err(invalid("'#' must be the last level")),
                p if p.contains(['+', '#']) => {
                    return Err(invalid("wildcards must occupy a whole level"));
                }
                p => Segment::Literal(p.to_owned()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: filter.to_owned(),
            segments: Some(segments),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, topic: &str) -> bool {
        let Some(segments) = &self.segments else {
            return true;
        };

        let levels: Vec<&str> = topic.split('/').collect();

        if topic.starts_with('$') && !matches!(segments.first(), Some(Segment::Literal(_))) {
            return false;
        }

        for (i, segment) in segments.iter().enumerate() {
            match segment {
                Segment::Tail => return true,
                Segment::Single => {
                    if i >= levels.len() {
                        return false;
                    }
                }
                Segment::Literal(lit) => match levels.get(i) {
                    Some(level) if level == lit => {}
                    _ => return false,
                },
            }
        }

        levels.len() == segments.len()
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
