//! Inbound message envelope.
//!
//! One JSON object per frame with a `type` discriminant, validated once at
//! the deserialization boundary and dispatched by variant. Unknown
//! discriminants are forward-compatible: logged and ignored, never an
//! error to the client.

use serde::Deserialize;

/// Inbound message types this server understands.
const KNOWN_TYPES: &[&str] = &[
    "query",
    "clear",
    "ping",
    "set_graph_limit",
    "visibility",
    "job_control",
];

/// A message received from a client.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Execute a query and stream back the resulting graph.
    Query {
        /// Query text (may be multi-line).
        query: String,
    },
    /// Reset the canvas to an empty graph.
    Clear,
    /// Application-level liveness ping.
    Ping,
    /// Change the graph node limit for subsequent queries.
    SetGraphLimit {
        /// Requested node limit.
        limit: u32,
    },
    /// Update this connection's visibility preferences.
    Visibility {
        /// Which preference to change.
        action: VisibilityAction,
        /// Node type for `toggle_node_type`.
        #[serde(default)]
        node_type: Option<String>,
        /// Whether to hide (`true`) or show (`false`).
        #[serde(default)]
        hidden: bool,
    },
    /// Control a background job.
    JobControl {
        /// Requested action.
        action: JobAction,
        /// Target job.
        job_id: String,
    },
}

/// Visibility preference actions.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityAction {
    /// Hide or show one node type.
    ToggleNodeType,
    /// Hide or show isolated nodes.
    ToggleIsolated,
}

/// Job control actions.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    /// Pause a running or queued job.
    Pause,
    /// Resume a paused job.
    Resume,
    /// Fetch job details for the requesting client.
    Details,
}

/// Why an inbound frame was not dispatched.
#[derive(Debug)]
pub enum ParseRejection {
    /// The frame was not valid JSON or had a malformed payload.
    InvalidJson(serde_json::Error),
    /// Valid envelope with a discriminant this server does not know.
    UnknownType(String),
}

/// Parse one inbound frame.
///
/// Distinguishes malformed JSON from a well-formed envelope with an
/// unknown `type`, so the read loop can log the two differently.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ParseRejection> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => Ok(msg),
        Err(err) => {
            #[derive(Deserialize)]
            struct RawEnvelope {
                #[serde(rename = "type")]
                msg_type: Option<String>,
            }
            if let Ok(RawEnvelope {
                msg_type: Some(t), ..
            }) = serde_json::from_str::<RawEnvelope>(text)
            {
                if !KNOWN_TYPES.contains(&t.as_str()) {
                    return Err(ParseRejection::UnknownType(t));
                }
            }
            Err(ParseRejection::InvalidJson(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query() {
        let msg = parse_client_message(r#"{"type":"query","query":"show people"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Query {
                query: "show people".into()
            }
        );
    }

    #[test]
    fn parses_unit_variants() {
        assert_eq!(
            parse_client_message(r#"{"type":"clear"}"#).unwrap(),
            ClientMessage::Clear
        );
        assert_eq!(
            parse_client_message(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
    }

    #[test]
    fn parses_visibility_toggle() {
        let msg = parse_client_message(
            r#"{"type":"visibility","action":"toggle_node_type","node_type":"Contact","hidden":true}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Visibility {
                action: VisibilityAction::ToggleNodeType,
                node_type: Some("Contact".into()),
                hidden: true,
            }
        );
    }

    #[test]
    fn visibility_fields_default() {
        let msg =
            parse_client_message(r#"{"type":"visibility","action":"toggle_isolated"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Visibility {
                action: VisibilityAction::ToggleIsolated,
                node_type: None,
                hidden: false,
            }
        );
    }

    #[test]
    fn parses_job_control() {
        let msg = parse_client_message(
            r#"{"type":"job_control","action":"pause","job_id":"job_9"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::JobControl {
                action: JobAction::Pause,
                job_id: "job_9".into(),
            }
        );
    }

    #[test]
    fn unknown_type_is_distinguished() {
        let err = parse_client_message(r#"{"type":"vidstream_frame","data":[1,2]}"#).unwrap_err();
        match err {
            ParseRejection::UnknownType(t) => assert_eq!(t, "vidstream_frame"),
            ParseRejection::InvalidJson(_) => panic!("expected UnknownType"),
        }
    }

    #[test]
    fn invalid_json_is_invalid() {
        let err = parse_client_message("not json").unwrap_err();
        assert!(matches!(err, ParseRejection::InvalidJson(_)));
    }

    #[test]
    fn known_type_with_bad_payload_is_invalid_json() {
        // "query" is a known type, so a missing field is a payload error,
        // not an unknown discriminant.
        let err = parse_client_message(r#"{"type":"query"}"#).unwrap_err();
        assert!(matches!(err, ParseRejection::InvalidJson(_)));
    }

    #[test]
    fn missing_type_field_is_invalid_json() {
        let err = parse_client_message(r#"{"query":"x"}"#).unwrap_err();
        assert!(matches!(err, ParseRejection::InvalidJson(_)));
    }
}
