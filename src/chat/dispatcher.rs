use std::sync::Arc;

use crate::common::{Message, Recipient};
use crate::error::ChatError;
use crate::network::SessionDirectory;

/// Routes messages between the chat core and the caller's session.
pub struct Dispatcher {
    self_id: String,
    sessions: Arc<SessionDirectory>,
}

impl Dispatcher {
    pub fn new(self_id: impl Into<String>, sessions: Arc<SessionDirectory>) -> Self {
        Self {
            self_id: self_id.into(),
            sessions,
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Hands the message to the peer session or to the group handle. No persistence.
    pub fn send(&self, msg: &Message) -> Result<(), ChatError> {
        let wire = msg.to_wire()?;
        match msg.recipient() {
            Some(Recipient::Peer(_)) => self
                .sessions
                .session_for(&self.self_id)?
                .send_message(&wire),
            Some(Recipient::Group(group_id)) => self
                .sessions
                .group(&self.self_id, &group_id)?
                .send_message(&wire),
            None => Err(ChatError::InvalidMessage(format!(
                "message {} needs exactly one of a peer or a group",
                msg.object_id
            ))),
        }
    }

    /// Publishes on the group whatever recipients the message names.
    pub fn send_in_group(&self, msg: &Message, group_id: &str) -> Result<(), ChatError> {
        let wire = msg.to_wire()?;
        self.sessions.group(&self.self_id, group_id)?.send_message(&wire)
    }

    /// Decodes an inbound body and fills in the routing the transport left implicit.
    ///
    /// Direct messages only name their sender, so the receiving identity is
    /// injected as the sole recipient and a claimed group is refused. Group
    /// messages take the group from the topic they arrived on; only acks may
    /// name recipients there.
    pub fn decode_inbound(&self, raw: &str, group_id: Option<&str>) -> Result<Message, ChatError> {
        let mut msg = Message::from_payload(raw)?;
        match group_id {
            None => {
                if let Some(claimed) = &msg.group_id {
                    return Err(ChatError::Decode(format!(
                        "message {} claims group {claimed} outside it",
                        msg.object_id
                    )));
                }
                if msg.to_peer_ids.is_empty() {
                    msg.to_peer_ids = vec![self.self_id.clone()];
                }
            }
            Some(group_id) if msg.is_response() && !msg.to_peer_ids.is_empty() => {
                log::trace!("Ack {} relayed on group {group_id}", msg.object_id);
            }
            Some(group_id) => {
                if !msg.to_peer_ids.is_empty() {
                    return Err(ChatError::Decode(format!(
                        "direct message {} arrived on group {group_id}",
                        msg.object_id
                    )));
                }
                match &msg.group_id {
                    Some(own) if own != group_id => {
                        return Err(ChatError::Decode(format!(
                            "message {} for group {own} arrived on group {group_id}",
                            msg.object_id
                        )));
                    }
                    _ => msg.group_id = Some(group_id.to_string()),
                }
            }
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::response::build_response;
    use crate::common::{MsgType, TransportEvent};
    use crate::network::MemoryHub;

    fn dispatcher(hub: &MemoryHub, identity: &str) -> Dispatcher {
        Dispatcher::new(identity, Arc::new(SessionDirectory::new(Arc::new(hub.factory()))))
    }

    #[test]
    fn peer_message_goes_through_session() {
        let hub = MemoryHub::new();
        let _a_rx = hub.connect("A");
        let mut b_rx = hub.connect("B");
        let b = dispatcher(&hub, "B");
        b.sessions.session_for("B").unwrap();

        let msg = Message::build(MsgType::Text, "hi", "A", Recipient::Peer("B".into()), None, None);
        dispatcher(&hub, "A").send(&msg).unwrap();

        let TransportEvent::Message { payload, group_id } = b_rx.try_recv().unwrap() else {
            panic!("expected a message");
        };
        assert_eq!(group_id, None);
        assert_eq!(b.decode_inbound(&payload, None).unwrap(), msg);
    }

    #[test]
    fn group_message_goes_through_group_handle() {
        let hub = MemoryHub::new();
        let _a_rx = hub.connect("A");
        let mut b_rx = hub.connect("B");
        let b = dispatcher(&hub, "B");
        b.sessions.group("B", "g").unwrap();

        let msg = Message::build(MsgType::Text, "hey", "A", Recipient::Group("g".into()), None, None);
        dispatcher(&hub, "A").send(&msg).unwrap();

        let TransportEvent::Message { payload, group_id } = b_rx.try_recv().unwrap() else {
            panic!("expected a message");
        };
        assert_eq!(group_id.as_deref(), Some("g"));
        let decoded = b.decode_inbound(&payload, group_id.as_deref()).unwrap();
        assert_eq!(decoded.group_id.as_deref(), Some("g"));
        assert!(decoded.to_peer_ids.is_empty());
    }

    #[test]
    fn receiver_is_injected_when_recipients_missing() {
        let hub = MemoryHub::new();
        let d = dispatcher(&hub, "me");
        let msg = d
            .decode_inbound(r#"{"objectId":"U1","fromPeerId":"B","content":"hi"}"#, None)
            .unwrap();
        assert_eq!(msg.to_peer_ids, vec!["me".to_string()]);
    }

    #[test]
    fn mismatched_group_context_is_rejected() {
        let hub = MemoryHub::new();
        let d = dispatcher(&hub, "me");
        assert!(d
            .decode_inbound(r#"{"objectId":"U1","groupId":"g1"}"#, Some("g2"))
            .is_err());
        assert!(d
            .decode_inbound(r#"{"objectId":"U1","toPeerIds":["me"]}"#, Some("g2"))
            .is_err());
        assert!(matches!(
            d.decode_inbound("garbage", None),
            Err(ChatError::Decode(_))
        ));
    }

    #[test]
    fn group_claim_on_peer_route_is_rejected() {
        let hub = MemoryHub::new();
        let d = dispatcher(&hub, "B");
        let spoofed = r#"{"objectId":"U1","fromPeerId":"A","groupId":"g","content":"x"}"#;
        assert!(matches!(
            d.decode_inbound(spoofed, None),
            Err(ChatError::Decode(_))
        ));
        assert_eq!(
            d.decode_inbound(spoofed, Some("g")).unwrap().group_id.as_deref(),
            Some("g")
        );
    }

    #[test]
    fn addressed_ack_is_accepted_on_group() {
        let hub = MemoryHub::new();
        let _a_rx = hub.connect("A");
        let _b_rx = hub.connect("B");
        let mut c_rx = hub.connect("C");
        let a = dispatcher(&hub, "A");
        a.sessions.group("A", "g").unwrap();
        let c = dispatcher(&hub, "C");
        c.sessions.group("C", "g").unwrap();

        let original = Message::build(MsgType::Text, "hey", "A", Recipient::Group("g".into()), None, None);
        let ack = build_response(&original, "B");
        dispatcher(&hub, "B").send_in_group(&ack, "g").unwrap();

        let TransportEvent::Message { payload, group_id } = c_rx.try_recv().unwrap() else {
            panic!("expected the ack");
        };
        assert_eq!(group_id.as_deref(), Some("g"));
        let decoded = c.decode_inbound(&payload, group_id.as_deref()).unwrap();
        assert!(decoded.is_response());
        assert_eq!(decoded.to_peer_ids, vec!["A".to_string()]);
        assert!(decoded.group_id.is_none());
    }

    #[test]
    fn unroutable_message_is_invalid() {
        let hub = MemoryHub::new();
        let mut msg = Message::build(MsgType::Text, "x", "A", Recipient::Peer("B".into()), None, None);
        msg.to_peer_ids.clear();
        assert!(matches!(
            dispatcher(&hub, "A").send(&msg),
            Err(ChatError::InvalidMessage(_))
        ));
    }
}
