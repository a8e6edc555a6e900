//! Inbound queue payload and its schema validation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::layout::is_path_segment;

pub const FONT_ID_KEY: &str = "fontId";
pub const FILE_KEY_KEY: &str = "fileKey";
pub const MEMBER_ID_KEY: &str = "memberId";
pub const FONT_NAME_KEY: &str = "fontName";
pub const FONT_ENG_NAME_KEY: &str = "fontEngName";
pub const TEMPLATE_URL_KEY: &str = "templateUrl";
pub const AUTHOR_KEY: &str = "author";
pub const REQUEST_UUID_KEY: &str = "requestUuid";

/// Fields every job message must carry, non-empty, in the current schema version.
pub const REQUIRED_FIELDS: [&str; 8] = [
    FONT_ID_KEY,
    FILE_KEY_KEY,
    MEMBER_ID_KEY,
    FONT_NAME_KEY,
    FONT_ENG_NAME_KEY,
    TEMPLATE_URL_KEY,
    AUTHOR_KEY,
    REQUEST_UUID_KEY,
];

/// Reasons a queue payload is a malformed job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("message body is not valid JSON: {0}")]
    Encoding(String),

    #[error("message body is not a JSON object")]
    NotAnObject,

    #[error("required field `{0}` is missing")]
    MissingField(String),

    #[error("required field `{0}` is empty")]
    EmptyField(String),

    #[error("required field `{0}` must be a string")]
    NotAString(String),

    #[error("field `{field}` must be a single path segment, got {value:?}")]
    InvalidPathSegment { field: String, value: String },
}

/// Field values that passed validation, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedFields(HashMap<String, String>);

impl ValidatedFields {
    /// Get a validated value.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Remove a validated value, returning an empty string if it was never required.
    fn take(&mut self, field: &str) -> String {
        self.0.remove(field).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Check `body` against a list of required fields.
///
/// All-or-nothing: either every field is present as a non-blank string and all of
/// them are returned, or the first offending field (in `required` order) is named
/// in the error.
pub fn validate_required(body: &Value, required: &[&str]) -> Result<ValidatedFields, MessageError> {
    let object = body.as_object().ok_or(MessageError::NotAnObject)?;

    let mut fields = HashMap::with_capacity(required.len());
    for &name in required {
        let value = object
            .get(name)
            .ok_or_else(|| MessageError::MissingField(name.to_string()))?;
        let text = match value {
            Value::String(s) => s,
            Value::Null => return Err(MessageError::MissingField(name.to_string())),
            _ => return Err(MessageError::NotAString(name.to_string())),
        };
        if text.trim().is_empty() {
            return Err(MessageError::EmptyField(name.to_string()));
        }
        fields.insert(name.to_string(), text.clone());
    }

    Ok(ValidatedFields(fields))
}

/// A validated "build this font" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    /// Opaque job identifier, used for the status callback and log key.
    pub font_id: String,
    /// Storage key prefix for the compiled fonts.
    pub file_key: String,
    /// Requester identity.
    pub member_id: String,
    /// Display name; also names the per-stage working directories.
    pub font_name: String,
    /// ASCII-safe name handed to the compile stage.
    pub font_eng_name: String,
    /// Locator of the handwriting template image.
    pub template_url: String,
    pub author: String,
    /// Correlation id threading every log line and working directory for the job.
    pub request_uuid: String,
}

impl JobMessage {
    /// Parse and validate a raw queue body.
    pub fn parse(raw: &str) -> Result<Self, MessageError> {
        let body: Value =
            serde_json::from_str(raw).map_err(|e| MessageError::Encoding(e.to_string()))?;
        Self::from_value(&body)
    }

    /// Validate an already-decoded body.
    pub fn from_value(body: &Value) -> Result<Self, MessageError> {
        let mut fields = validate_required(body, &REQUIRED_FIELDS)?;

        let message = Self {
            font_id: fields.take(FONT_ID_KEY),
            file_key: fields.take(FILE_KEY_KEY),
            member_id: fields.take(MEMBER_ID_KEY),
            font_name: fields.take(FONT_NAME_KEY),
            font_eng_name: fields.take(FONT_ENG_NAME_KEY),
            template_url: fields.take(TEMPLATE_URL_KEY),
            author: fields.take(AUTHOR_KEY),
            request_uuid: fields.take(REQUEST_UUID_KEY),
        };

        // Both end up as directory or file names on the worker.
        for (field, value) in [
            (FONT_NAME_KEY, &message.font_name),
            (MEMBER_ID_KEY, &message.member_id),
        ] {
            if !is_path_segment(value) {
                return Err(MessageError::InvalidPathSegment {
                    field: field.to_string(),
                    value: value.clone(),
                });
            }
        }

        Ok(message)
    }

    /// First six characters of the correlation id, used as the log prefix.
    pub fn short_id(&self) -> &str {
        match self.request_uuid.char_indices().nth(6) {
            Some((idx, _)) => &self.request_uuid[..idx],
            None => &self.request_uuid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_body() -> Value {
        json!({
            "fontId": "42",
            "fileKey": "member-7/font-42",
            "memberId": "7",
            "fontName": "손글씨",
            "fontEngName": "Handwriting",
            "templateUrl": "https://bucket.s3.ap-northeast-2.amazonaws.com/t/7.png",
            "author": "kim",
            "requestUuid": "3f2b9c1e-0000-4000-8000-000000000000"
        })
    }

    #[test]
    fn accepts_complete_message() {
        let msg = JobMessage::from_value(&full_body()).expect("valid message");
        assert_eq!(msg.font_id, "42");
        assert_eq!(msg.file_key, "member-7/font-42");
        assert_eq!(msg.font_eng_name, "Handwriting");
        assert_eq!(msg.short_id(), "3f2b9c");
    }

    #[test]
    fn every_required_field_is_enforced() {
        for field in REQUIRED_FIELDS {
            let mut body = full_body();
            body.as_object_mut().expect("object").remove(field);
            let err = JobMessage::from_value(&body).expect_err("missing field");
            assert_eq!(err, MessageError::MissingField(field.to_string()));

            let mut body = full_body();
            body[field] = json!("   ");
            let err = JobMessage::from_value(&body).expect_err("blank field");
            assert_eq!(err, MessageError::EmptyField(field.to_string()));
        }
    }

    #[test]
    fn reports_first_missing_field_in_schema_order() {
        let err = validate_required(&json!({"fontId": "1"}), &REQUIRED_FIELDS)
            .expect_err("incomplete");
        assert_eq!(err, MessageError::MissingField(FILE_KEY_KEY.to_string()));
    }

    #[test]
    fn rejects_non_objects_and_bad_encodings() {
        assert_eq!(
            JobMessage::parse("[1, 2, 3]").expect_err("array"),
            MessageError::NotAnObject
        );
        assert!(matches!(
            JobMessage::parse("{\"fontId\": ").expect_err("truncated"),
            MessageError::Encoding(_)
        ));
    }

    #[test]
    fn rejects_non_string_values() {
        let mut body = full_body();
        body["fontId"] = json!(42);
        assert_eq!(
            JobMessage::from_value(&body).expect_err("number"),
            MessageError::NotAString("fontId".to_string())
        );
    }

    #[test]
    fn rejects_font_names_that_escape_the_work_root() {
        for bad in ["../etc", "a/b", ".."] {
            let mut body = full_body();
            body["fontName"] = json!(bad);
            assert!(matches!(
                JobMessage::from_value(&body),
                Err(MessageError::InvalidPathSegment { .. })
            ));
        }
    }

    #[test]
    fn round_trips_through_wire_names() {
        let msg = JobMessage::from_value(&full_body()).expect("valid");
        let raw = serde_json::to_string(&msg).expect("serialize");
        assert!(raw.contains("\"fontEngName\""));
        assert_eq!(JobMessage::parse(&raw).expect("parse"), msg);
    }
}
