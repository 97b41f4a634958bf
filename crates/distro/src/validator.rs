//! Raw-to-validated content conversion (§4.1).
//!
//! The validator never fails the whole batch on a single bad item: each
//! item either becomes a `ContentItem` or contributes an issue with a
//! field-path locator. Only malformed top-level JSON (not an object) is
//! treated as a hard failure.

use chrono::{DateTime, Utc};
use distro_types::{
    Channel, ContentItem, ContentKind, FieldPath, RawContent, Tone, ValidationIssue,
    ValidationWarning,
};
use serde_json::Value;

const WORDS_PER_MINUTE: f64 = 200.0;

/// Result of validating a raw content bundle: the items that passed, plus
/// every issue/warning collected along the way.
pub struct ValidationOutcome {
    pub items: Vec<ContentItem>,
    pub issues: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
}

pub struct Validator {
    registered_channels: Vec<Channel>,
}

impl Validator {
    pub fn new(registered_channels: Vec<Channel>) -> Self {
        Self { registered_channels }
    }

    /// Validates every item in `raw.items` in source order. Never fails on
    /// warnings; each item either produces a `ContentItem` or one or more
    /// issues rooted at `body[i]`.
    pub fn validate(&self, raw: &RawContent) -> ValidationOutcome {
        let mut items = Vec::new();
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        for (idx, draft) in raw.items.iter().enumerate() {
            let path = FieldPath::index("body", idx);
            match self.validate_one_at(draft, &raw.document_id, path.clone()) {
                Ok((item, mut item_warnings)) => {
                    items.push(item);
                    warnings.append(&mut item_warnings);
                }
                Err(mut item_issues) => issues.append(&mut item_issues),
            }
        }

        ValidationOutcome {
            items,
            issues,
            warnings,
        }
    }

    /// Validates a single pre-constructed item draft, for API callers that
    /// submit one item directly rather than a whole document.
    pub fn validate_one(
        &self,
        draft: &Value,
        document_id: &str,
    ) -> Result<(ContentItem, Vec<ValidationWarning>), Vec<ValidationIssue>> {
        self.validate_one_at(draft, document_id, FieldPath::root())
    }

    fn validate_one_at(
        &self,
        draft: &Value,
        document_id: &str,
        path: FieldPath,
    ) -> Result<(ContentItem, Vec<ValidationWarning>), Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        let Some(obj) = draft.as_object() else {
            return Err(vec![ValidationIssue {
                path,
                message: "expected an object".into(),
            }]);
        };

        let title = match obj.get("title").and_then(Value::as_str) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => {
                issues.push(ValidationIssue {
                    path: path.field("title"),
                    message: "title is required".into(),
                });
                String::new()
            }
        };

        let body = match obj.get("body").and_then(Value::as_str) {
            Some(b) => b.to_string(),
            None => {
                issues.push(ValidationIssue {
                    path: path.field("body"),
                    message: "body is required".into(),
                });
                String::new()
            }
        };

        let kind = match obj.get("kind").and_then(Value::as_str) {
            Some(k) => match k.parse::<ContentKind>() {
                Ok(kind) => Some(kind),
                Err(_) => {
                    issues.push(ValidationIssue {
                        path: path.field("kind"),
                        message: format!("unknown content kind: {k}"),
                    });
                    None
                }
            },
            None => {
                issues.push(ValidationIssue {
                    path: path.field("kind"),
                    message: "kind is required".into(),
                });
                None
            }
        };

        let published = match obj.get("published") {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                issues.push(ValidationIssue {
                    path: path.field("published"),
                    message: "published must be a boolean".into(),
                });
                false
            }
        };

        let featured = match obj.get("featured") {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                issues.push(ValidationIssue {
                    path: path.field("featured"),
                    message: "featured must be a boolean".into(),
                });
                false
            }
        };

        let priority = match obj.get("priority") {
            None => 3,
            Some(v) => match v.as_u64() {
                Some(p) if (1..=5).contains(&p) => p as u8,
                _ => {
                    issues.push(ValidationIssue {
                        path: path.field("priority"),
                        message: "priority must be an integer 1..5".into(),
                    });
                    3
                }
            },
        };

        let channels = match obj.get("channels") {
            None => Vec::new(),
            Some(Value::Array(arr)) => {
                let mut parsed = Vec::new();
                for entry in arr {
                    match entry.as_str().map(str::parse::<Channel>) {
                        Some(Ok(channel)) if self.registered_channels.contains(&channel) => {
                            parsed.push(channel)
                        }
                        Some(Ok(channel)) => {
                            issues.push(ValidationIssue {
                                path: path.field("channels"),
                                message: format!("channel not registered: {}", channel.as_str()),
                            });
                        }
                        _ => {
                            issues.push(ValidationIssue {
                                path: path.field("channels"),
                                message: format!("unknown channel: {entry}"),
                            });
                        }
                    }
                }
                parsed
            }
            Some(_) => {
                issues.push(ValidationIssue {
                    path: path.field("channels"),
                    message: "channels must be an array".into(),
                });
                Vec::new()
            }
        };

        let scheduled_for = match obj.get("scheduled_for").and_then(Value::as_str) {
            None => None,
            Some(s) => match s.parse::<DateTime<Utc>>() {
                Ok(when) => {
                    if when < Utc::now() {
                        warnings.push(ValidationWarning {
                            path: path.field("scheduled_for"),
                            message: "scheduled_for is in the past".into(),
                        });
                    }
                    Some(when)
                }
                Err(_) => {
                    issues.push(ValidationIssue {
                        path: path.field("scheduled_for"),
                        message: "scheduled_for must be a UTC ISO-8601 timestamp".into(),
                    });
                    None
                }
            },
        };

        let template = obj
            .get("template")
            .and_then(Value::as_str)
            .map(str::to_string);

        let tone = obj.get("tone").and_then(|v| {
            serde_json::from_value::<Tone>(v.clone()).ok()
        });

        let tags = match obj.get("tags") {
            None => Vec::new(),
            Some(Value::Array(arr)) => arr
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(_) => {
                issues.push(ValidationIssue {
                    path: path.field("tags"),
                    message: "tags must be an array of strings".into(),
                });
                Vec::new()
            }
        };

        let metadata = obj
            .get("metadata")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        if !issues.is_empty() {
            return Err(issues);
        }

        let kind = kind.expect("kind issue would have short-circuited above");
        let reading_time_minutes = (kind == ContentKind::Blog).then(|| reading_time(&body));
        let id = ContentItem::derive_id(document_id, &title, &body);

        let item = ContentItem {
            kind,
            id,
            title,
            body,
            published,
            featured,
            priority,
            channels,
            scheduled_for,
            template,
            tone,
            tags,
            metadata,
            reading_time_minutes,
        };

        Ok((item, warnings))
    }
}

/// Reading time at 200 words/minute, minimum 1 minute.
fn reading_time(body: &str) -> u32 {
    let words = body.split_whitespace().count() as f64;
    ((words / WORDS_PER_MINUTE).ceil() as u32).max(1)
}
