//! Automatic delivery acks for inbound chat messages.
//!
//! An ack is a `Response` message addressed to the original author. It reuses
//! the original `object_id` and carries the original timestamp as its content,
//! which is how the author correlates it with the row it already stored.

use crate::common::{Message, MsgType, Recipient};
use crate::error::ChatError;

pub fn build_response(original: &Message, self_id: &str) -> Message {
    Message::build(
        MsgType::Response,
        original.timestamp.to_string(),
        self_id,
        Recipient::Peer(original.from_peer_id.clone()),
        Some(original.object_id.clone()),
        None,
    )
}

/// Timestamp of the acknowledged message.
pub fn acked_timestamp(ack: &Message) -> Result<i64, ChatError> {
    ack.content.trim().parse::<i64>().map_err(|err| {
        ChatError::Decode(format!(
            "ack {} carries bad timestamp `{}`: {err}",
            ack.object_id, ack.content
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_correlates_with_original() {
        let original = Message::build(
            MsgType::Image,
            "/p&http://u",
            "B",
            Recipient::Group("g".into()),
            Some("U7".into()),
            Some(1234),
        );
        let ack = build_response(&original, "A");

        assert_eq!(ack.msg_type, MsgType::Response);
        assert_eq!(ack.object_id, "U7");
        assert_eq!(ack.from_peer_id, "A");
        assert_eq!(ack.to_peer_ids, vec!["B".to_string()]);
        assert!(ack.group_id.is_none());
        assert_eq!(acked_timestamp(&ack).unwrap(), 1234);
    }

    #[test]
    fn non_numeric_ack_content_is_rejected() {
        let mut ack = build_response(
            &Message::build(MsgType::Text, "x", "B", Recipient::Peer("A".into()), None, None),
            "A",
        );
        ack.content = "yesterday".into();
        assert!(matches!(acked_timestamp(&ack), Err(ChatError::Decode(_))));
    }
}
