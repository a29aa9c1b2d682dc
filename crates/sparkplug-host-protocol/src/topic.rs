//! Sparkplug MQTT topic grammar (spec.md §4.1, §6).
//!
//! Two shapes are recognised:
//!
//! - `<ns>/<group_id>/<message_type>/<edge_node_id>[/<device_id>]`
//! - `<ns>/STATE/<host_id>`
//!
//! Parsing has no state and no concurrency concerns, matching the
//! free-function parsing style used for chip-read lines elsewhere in this
//! workspace's lower layers.

use crate::{Error, MessageType, SparkplugVersion};

/// The parsed shape of a topic — data topic vs. the Host's own STATE topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    Data {
        group_id: String,
        message_type: MessageType,
        edge_node_id: String,
        device_id: Option<String>,
    },
    State {
        host_id: String,
    },
}

/// A successfully parsed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub version: SparkplugVersion,
    pub kind: TopicKind,
}

/// Reject identifiers containing `+`, `/`, or `#`, or that are empty
/// (spec.md §6).
pub fn validate_identifier(id: &str) -> Result<(), Error> {
    if id.is_empty() {
        return Err(Error::InvalidArgument("identifier must not be empty".into()));
    }
    if id.contains(['+', '/', '#']) {
        return Err(Error::InvalidArgument(format!(
            "identifier '{id}' must not contain '+', '/', or '#'"
        )));
    }
    Ok(())
}

/// Parse an inbound MQTT topic into its normalized shape.
///
/// Fails with [`Error::UnsupportedTopic`] when the topic matches neither
/// Sparkplug pattern, or when the `message_type` token is not a recognised
/// enum value.
pub fn parse_topic(topic: &str) -> Result<ParsedTopic, Error> {
    let segments: Vec<&str> = topic.split('/').collect();

    if segments.len() >= 3 && segments[1].eq_ignore_ascii_case("STATE") {
        let version = SparkplugVersion::parse_namespace(segments[0])
            .ok_or_else(|| Error::UnsupportedTopic(topic.to_owned()))?;
        if segments.len() != 3 || segments[2].is_empty() {
            return Err(Error::UnsupportedTopic(topic.to_owned()));
        }
        return Ok(ParsedTopic {
            version,
            kind: TopicKind::State {
                host_id: segments[2].to_owned(),
            },
        });
    }

    if segments.len() == 4 || segments.len() == 5 {
        let version = SparkplugVersion::parse_namespace(segments[0])
            .ok_or_else(|| Error::UnsupportedTopic(topic.to_owned()))?;
        let group_id = segments[1];
        let message_type = MessageType::parse(segments[2])
            .ok_or_else(|| Error::UnsupportedTopic(topic.to_owned()))?;
        let edge_node_id = segments[3];
        if group_id.is_empty() || edge_node_id.is_empty() {
            return Err(Error::UnsupportedTopic(topic.to_owned()));
        }
        let device_id = match segments.get(4) {
            Some(d) if !d.is_empty() => Some((*d).to_owned()),
            Some(_) => return Err(Error::UnsupportedTopic(topic.to_owned())),
            None => None,
        };
        return Ok(ParsedTopic {
            version,
            kind: TopicKind::Data {
                group_id: group_id.to_owned(),
                message_type,
                edge_node_id: edge_node_id.to_owned(),
                device_id,
            },
        });
    }

    Err(Error::UnsupportedTopic(topic.to_owned()))
}

/// Build the topic for an outbound command or the Host's STATE certificate.
///
/// Used by the Host Coordinator for NCMD/DCMD/STATE publication (spec.md
/// §4.4) — the inverse of [`parse_topic`] for the shapes the Host itself
/// publishes.
pub fn encode_topic(version: SparkplugVersion, kind: &TopicKind) -> Result<String, Error> {
    let ns = version.namespace();
    match kind {
        TopicKind::State { host_id } => {
            validate_identifier(host_id)?;
            Ok(format!("{ns}/STATE/{host_id}"))
        }
        TopicKind::Data {
            group_id,
            message_type,
            edge_node_id,
            device_id,
        } => {
            validate_identifier(group_id)?;
            validate_identifier(edge_node_id)?;
            let token = message_type.as_topic_token();
            match device_id {
                Some(device_id) => {
                    validate_identifier(device_id)?;
                    Ok(format!("{ns}/{group_id}/{token}/{edge_node_id}/{device_id}"))
                }
                None => Ok(format!("{ns}/{group_id}/{token}/{edge_node_id}")),
            }
        }
    }
}

/// The wildcard subscription topic for a given Sparkplug version
/// (spec.md §4.4 startup sequence step 3).
pub fn wildcard_topic(version: SparkplugVersion) -> String {
    format!("{}/#", version.namespace())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_data_topic_without_device() {
        let parsed = parse_topic("spBv1.0/Plant1/NDATA/Edge1").expect("parses");
        assert_eq!(parsed.version, SparkplugVersion::V3_0_0);
        assert_eq!(
            parsed.kind,
            TopicKind::Data {
                group_id: "Plant1".into(),
                message_type: MessageType::NData,
                edge_node_id: "Edge1".into(),
                device_id: None,
            }
        );
    }

    #[test]
    fn parses_data_topic_with_device_and_is_case_insensitive_on_type_and_namespace() {
        let parsed = parse_topic("spbv1.0/Plant1/ddata/Edge1/Device1").expect("parses");
        assert_eq!(
            parsed.kind,
            TopicKind::Data {
                group_id: "Plant1".into(),
                message_type: MessageType::DData,
                edge_node_id: "Edge1".into(),
                device_id: Some("Device1".into()),
            }
        );
    }

    #[test]
    fn parses_state_topic_case_insensitively() {
        let parsed = parse_topic("spBv1.0/state/HostA").expect("parses");
        assert_eq!(
            parsed.kind,
            TopicKind::State {
                host_id: "HostA".into()
            }
        );
    }

    #[test]
    fn rejects_unknown_message_type_and_malformed_shapes() {
        assert!(parse_topic("spBv1.0/Plant1/BOGUS/Edge1").is_err());
        assert!(parse_topic("spBv1.0/Plant1/NDATA").is_err());
        assert!(parse_topic("spBv1.0/Plant1/NDATA/Edge1/Device1/Extra").is_err());
        assert!(parse_topic("otherns/Plant1/NDATA/Edge1").is_err());
        assert!(parse_topic("spBv1.0/STATE").is_err());
    }

    #[test]
    fn encode_topic_round_trips_parse_topic() {
        let kind = TopicKind::Data {
            group_id: "Plant1".into(),
            message_type: MessageType::DCmd,
            edge_node_id: "Edge1".into(),
            device_id: Some("Device1".into()),
        };
        let topic = encode_topic(SparkplugVersion::V3_0_0, &kind).expect("encodes");
        assert_eq!(topic, "spBv1.0/Plant1/DCMD/Edge1/Device1");
        let parsed = parse_topic(&topic).expect("parses back");
        assert_eq!(parsed.kind, kind);
    }

    #[test]
    fn validate_identifier_rejects_empty_and_reserved_characters() {
        assert!(validate_identifier("ok").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("a+b").is_err());
        assert!(validate_identifier("a/b").is_err());
        assert!(validate_identifier("a#b").is_err());
    }
}
