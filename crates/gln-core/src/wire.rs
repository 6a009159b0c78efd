use crate::status::PipelineStatus;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

/// One frame as it came off the streaming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("binary frame rejected ({len} bytes); only text frames are supported")]
    BinaryFrame { len: usize },
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame decode failed: {0}")]
    Malformed(String),
    #[error("invalid received_at timestamp '{value}'")]
    InvalidTimestamp { value: String },
}

/// The JSON object carried by every text frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireEnvelope {
    #[serde(default)]
    pub gitlab: Option<GitlabPipelineEvent>,
    pub received_at: String,
    pub seq: u64,
    pub epoch: u64,
    /// Informational. Anything other than a non-negative integer reads as absent.
    #[serde(default, deserialize_with = "lenient_version")]
    pub version: Option<u64>,
}

fn lenient_version<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(serde_json::Value::deserialize(deserializer)?.as_u64())
}

/// Subset of the GitLab pipeline webhook body the notifier consumes.
/// Any other keys are ignored whatever their type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitlabPipelineEvent {
    pub object_attributes: ObjectAttributes,
    pub project: Project,
    #[serde(default)]
    pub commit: Option<Commit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectAttributes {
    pub id: u64,
    pub status: PipelineStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub web_url: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Commit {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineEvent {
    pub project_id: u64,
    pub project_name: String,
    pub namespace: String,
    pub status: PipelineStatus,
    pub commit_message: String,
    pub project_url: String,
    pub pipeline_id: u64,
    pub timestamp: DateTime<Utc>,
}

/// Decoded frame. `event` is `None` for the replay-complete marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub seq: u64,
    pub epoch: u64,
    pub received_at: DateTime<Utc>,
    pub version: Option<u64>,
    pub event: Option<PipelineEvent>,
}

impl Envelope {
    pub fn is_replay_marker(&self) -> bool {
        self.event.is_none()
    }
}

pub fn decode(frame: &RawFrame, max_frame_bytes: usize) -> Result<Envelope, DecodeError> {
    match frame {
        RawFrame::Text(text) => decode_text(text, max_frame_bytes),
        RawFrame::Binary(bytes) => Err(DecodeError::BinaryFrame { len: bytes.len() }),
    }
}

pub fn decode_text(text: &str, max_frame_bytes: usize) -> Result<Envelope, DecodeError> {
    let raw = text.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(DecodeError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    let wire: WireEnvelope =
        serde_json::from_str(raw).map_err(|err| DecodeError::Malformed(err.to_string()))?;
    wire.into_envelope()
}

impl WireEnvelope {
    pub fn into_envelope(self) -> Result<Envelope, DecodeError> {
        let received_at = parse_received_at(&self.received_at)?;
        let event = self.gitlab.map(|gitlab| PipelineEvent {
            project_id: gitlab.project.id,
            project_name: gitlab.project.name,
            namespace: gitlab.project.namespace,
            status: gitlab.object_attributes.status,
            commit_message: gitlab.commit.map(|commit| commit.message).unwrap_or_default(),
            project_url: gitlab.project.web_url,
            pipeline_id: gitlab.object_attributes.id,
            timestamp: received_at,
        });
        Ok(Envelope {
            seq: self.seq,
            epoch: self.epoch,
            received_at,
            version: self.version,
            event,
        })
    }
}

/// Accepts RFC 3339 with any fractional precision; a timestamp without an
/// offset is read as UTC.
pub fn parse_received_at(value: &str) -> Result<DateTime<Utc>, DecodeError> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| DecodeError::InvalidTimestamp {
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pipeline_frame(seq: u64, epoch: u64, status: &str) -> String {
        serde_json::json!({
            "gitlab": {
                "object_kind": "pipeline",
                "object_attributes": {
                    "id": 4411,
                    "ref": "main",
                    "status": status,
                    "detailed_status": status,
                    "stages": ["build", "test"],
                    "variables": []
                },
                "project": {
                    "id": 77,
                    "name": "billing",
                    "web_url": "https://gitlab.example.com/acme/billing",
                    "namespace": "acme",
                    "visibility_level": 20
                },
                "commit": {
                    "id": "a1b2c3",
                    "message": "Fix rounding in invoices\n",
                    "author": {"name": "Dev", "email": "dev@example.com"}
                },
                "builds": []
            },
            "received_at": "2026-10-17T09:15:02.123456Z",
            "seq": seq,
            "epoch": epoch,
            "version": 1
        })
        .to_string()
    }

    #[test]
    fn decodes_pipeline_event_and_ignores_unknown_keys() {
        let envelope = decode(
            &RawFrame::Text(pipeline_frame(5, 2, "running")),
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("decode");

        assert_eq!(envelope.seq, 5);
        assert_eq!(envelope.epoch, 2);
        assert_eq!(envelope.version, Some(1));
        let event = envelope.event.expect("inner event");
        assert_eq!(event.project_name, "billing");
        assert_eq!(event.project_id, 77);
        assert_eq!(event.namespace, "acme");
        assert_eq!(event.status, PipelineStatus::Running);
        assert_eq!(event.commit_message, "Fix rounding in invoices\n");
        assert_eq!(event.project_url, "https://gitlab.example.com/acme/billing");
        assert_eq!(event.pipeline_id, 4411);
        assert_eq!(event.timestamp, envelope.received_at);
    }

    #[test]
    fn null_gitlab_is_a_replay_marker() {
        let envelope = decode_text(
            r#"{"gitlab":null,"received_at":"2026-10-17T09:15:02.5Z","seq":9,"epoch":1,"version":1}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("decode marker");
        assert!(envelope.is_replay_marker());
        assert_eq!(envelope.seq, 9);

        let missing = decode_text(
            r#"{"received_at":"2026-10-17T09:15:02.5Z","seq":10,"epoch":1}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("decode marker without gitlab key");
        assert!(missing.is_replay_marker());
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        for frame in [
            r#"{"gitlab":null,"received_at":"2026-10-17T09:15:02Z","epoch":1}"#,
            r#"{"gitlab":null,"received_at":"2026-10-17T09:15:02Z","seq":1}"#,
            r#"{"gitlab":null,"seq":1,"epoch":1}"#,
        ] {
            let result = decode_text(frame, DEFAULT_MAX_FRAME_BYTES);
            assert!(
                matches!(result, Err(DecodeError::Malformed(_))),
                "expected malformed for {frame}: {result:?}"
            );
        }
    }

    #[test]
    fn invalid_json_and_binary_frames_are_rejected() {
        assert!(matches!(
            decode_text("{\"seq\":", DEFAULT_MAX_FRAME_BYTES),
            Err(DecodeError::Malformed(_))
        ));
        assert_eq!(
            decode(&RawFrame::Binary(vec![1, 2, 3]), DEFAULT_MAX_FRAME_BYTES),
            Err(DecodeError::BinaryFrame { len: 3 })
        );
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let result = decode_text(&pipeline_frame(1, 1, "success"), 64);
        assert!(matches!(result, Err(DecodeError::OversizedFrame { max: 64, .. })));
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let result = decode_text(
            r#"{"gitlab":null,"received_at":"yesterday","seq":1,"epoch":1}"#,
            DEFAULT_MAX_FRAME_BYTES,
        );
        assert_eq!(
            result,
            Err(DecodeError::InvalidTimestamp {
                value: "yesterday".to_string()
            })
        );
    }

    #[test]
    fn received_at_accepts_offsets_and_naive_times() {
        let expected = Utc
            .with_ymd_and_hms(2026, 10, 17, 9, 15, 2)
            .single()
            .expect("valid timestamp");
        assert_eq!(
            parse_received_at("2026-10-17T11:15:02+02:00").expect("offset"),
            expected
        );
        assert_eq!(
            parse_received_at("2026-10-17T09:15:02.000000").expect("naive"),
            expected
        );
    }

    #[test]
    fn version_is_informational_and_never_rejects_a_frame() {
        let read = |version: &str| {
            decode_text(
                &format!(
                    r#"{{"gitlab":null,"received_at":"2026-10-17T09:15:02Z","seq":1,"epoch":1,"version":{version}}}"#
                ),
                DEFAULT_MAX_FRAME_BYTES,
            )
            .map(|envelope| envelope.version)
        };
        assert_eq!(read("2"), Ok(Some(2)));
        assert_eq!(read("70000"), Ok(Some(70000)));
        assert_eq!(read("null"), Ok(None));
        assert_eq!(read("-1"), Ok(None));
        assert_eq!(read("\"v1\""), Ok(None));
        assert_eq!(read("{\"major\":1}"), Ok(None));

        let missing = decode_text(
            r#"{"received_at":"2026-10-17T09:15:02Z","seq":1,"epoch":1}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("missing version");
        assert_eq!(missing.version, None);
    }

    #[test]
    fn odd_typed_extra_fields_do_not_reject_the_frame() {
        let frame = serde_json::json!({
            "gitlab": {
                "object_kind": 7,
                "object_attributes": {
                    "id": 12,
                    "status": "success",
                    "ref": 123,
                    "sha": false,
                    "source": ["push"],
                    "detailed_status": {"text": "passed"},
                    "duration": 63.5
                },
                "project": {
                    "id": 5,
                    "name": "api",
                    "web_url": "https://gitlab.example.com/acme/api",
                    "namespace": "acme",
                    "path_with_namespace": null
                },
                "commit": {"message": "Ship it", "title": 1, "url": {"href": "x"}}
            },
            "received_at": "2026-10-17T09:15:02Z",
            "seq": 4,
            "epoch": 1
        })
        .to_string();
        let event = decode_text(&frame, DEFAULT_MAX_FRAME_BYTES)
            .expect("decode")
            .event
            .expect("event");
        assert_eq!(event.pipeline_id, 12);
        assert_eq!(event.status, PipelineStatus::Success);
        assert_eq!(event.commit_message, "Ship it");
    }

    #[test]
    fn missing_commit_yields_empty_message() {
        let frame = serde_json::json!({
            "gitlab": {
                "object_attributes": {"id": 1, "status": "failed"},
                "project": {"id": 2, "name": "api", "web_url": "https://x/api", "namespace": "acme"}
            },
            "received_at": "2026-10-17T09:15:02Z",
            "seq": 3,
            "epoch": 1
        })
        .to_string();
        let envelope = decode_text(&frame, DEFAULT_MAX_FRAME_BYTES).expect("decode");
        let event = envelope.event.expect("event");
        assert_eq!(event.commit_message, "");
        assert_eq!(event.status, PipelineStatus::Failed);
    }
}
