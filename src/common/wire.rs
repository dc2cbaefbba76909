use std::path::{Component, Path};

use crate::error::ChatError;

use super::types::Message;

/// What a transport actually carries: routing hints plus the JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub to_peer_ids: Vec<String>,
    pub group_id: Option<String>,
    pub payload: String,
}

impl Message {
    pub fn to_wire(&self) -> Result<WireMessage, ChatError> {
        Ok(WireMessage {
            to_peer_ids: self.to_peer_ids.clone(),
            group_id: self.group_id.clone(),
            payload: self.to_payload()?,
        })
    }

    pub fn from_wire(wire: &WireMessage) -> Result<Self, ChatError> {
        Self::from_payload(&wire.payload)
    }

    pub fn to_payload(&self) -> Result<String, ChatError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a JSON body. Every field but `objectId` has a default, so partial
    /// error payloads from the transport still decode.
    pub fn from_payload(payload: &str) -> Result<Self, ChatError> {
        let msg: Message = serde_json::from_str(payload)?;
        check_object_id(&msg.object_id)?;
        if msg.group_id.is_some() && !msg.to_peer_ids.is_empty() {
            return Err(ChatError::Decode(format!(
                "message {} has both recipients and a group",
                msg.object_id
            )));
        }
        Ok(msg)
    }
}

/// Object ids name media files, so they must be one plain path segment.
pub fn check_object_id(object_id: &str) -> Result<(), ChatError> {
    if object_id.is_empty() {
        return Err(ChatError::Decode("empty objectId".to_string()));
    }
    let mut components = Path::new(object_id).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == object_id
    );
    if !single || object_id.contains(['/', '\\', '\0']) {
        return Err(ChatError::Decode(format!("objectId `{object_id}` is not a plain name")));
    }
    Ok(())
}

/// `<localPath>&<remoteUrl>` content of image and audio messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    pub url: String,
}

impl FileContent {
    pub fn new(path: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            url: url.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}&{}", self.path, self.url)
    }

    /// Splits on the first `&`; the URL keeps any later ones.
    pub fn parse(content: &str) -> Result<Self, ChatError> {
        content
            .split_once('&')
            .map(|(path, url)| Self::new(path, url))
            .ok_or_else(|| ChatError::Decode(format!("file content without url: {content}")))
    }
}

/// `<address>&<latitude>&<longitude>` content of location messages.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationContent {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationContent {
    pub fn encode(&self) -> String {
        format!("{}&{}&{}", self.address, self.latitude, self.longitude)
    }

    /// Coordinates are the last two fields so the address may contain `&`.
    pub fn parse(content: &str) -> Result<Self, ChatError> {
        let mut parts = content.rsplitn(3, '&');
        let (Some(lng), Some(lat), Some(address)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ChatError::Decode(format!("bad location content: {content}")));
        };
        let parse = |raw: &str| {
            raw.parse::<f64>()
                .map_err(|err| ChatError::Decode(format!("bad coordinate `{raw}`: {err}")))
        };
        Ok(Self {
            address: address.to_string(),
            latitude: parse(lat)?,
            longitude: parse(lng)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{MsgStatus, MsgType, Recipient};

    #[test]
    fn wire_round_trip_keeps_every_field() {
        let mut direct = Message::build(
            MsgType::Audio,
            "/tmp/a.amr&http://blobs/a?x=1&y=2",
            "A",
            Recipient::Peer("B".into()),
            None,
            Some(1_700_000_000_123),
        );
        direct.status = MsgStatus::SendFailed;
        let group = Message::build(
            MsgType::Location,
            "Main St&1.5&-2.25",
            "A",
            Recipient::Group("g".into()),
            Some("U9".into()),
            None,
        );
        for msg in [direct, group] {
            let wire = msg.to_wire().unwrap();
            assert_eq!(wire.to_peer_ids, msg.to_peer_ids);
            assert_eq!(wire.group_id, msg.group_id);
            assert_eq!(Message::from_wire(&wire).unwrap(), msg);
        }
    }

    #[test]
    fn partial_error_payload_decodes_with_defaults() {
        let msg = Message::from_payload(r#"{"objectId":"U2","fromPeerId":"A"}"#).unwrap();
        assert_eq!(msg.object_id, "U2");
        assert_eq!(msg.msg_type, MsgType::Text);
        assert_eq!(msg.status, MsgStatus::SendStart);
    }

    #[test]
    fn malformed_payloads_are_decode_errors() {
        for raw in [
            "",
            "not json",
            "{\"objectId\":",
            r#"{"content":"no id"}"#,
            r#"{"objectId":""}"#,
            r#"{"objectId":"U","toPeerIds":["B"],"groupId":"g"}"#,
            r#"{"objectId":"U","type":"sticker"}"#,
        ] {
            assert!(
                matches!(Message::from_payload(raw), Err(ChatError::Decode(_))),
                "{raw}"
            );
        }
    }

    #[test]
    fn object_ids_that_escape_the_media_dir_are_rejected() {
        for id in ["..", ".", "../../etc/cron.d/x", "a/b", "/abs", "a\\b", "nul\u{0000}byte"] {
            let raw = serde_json::json!({ "objectId": id, "fromPeerId": "B" }).to_string();
            assert!(
                matches!(Message::from_payload(&raw), Err(ChatError::Decode(_))),
                "{id}"
            );
        }
        let ok = Message::from_payload(r#"{"objectId":"5f1c-voice.amr"}"#).unwrap();
        assert_eq!(ok.object_id, "5f1c-voice.amr");
    }

    #[test]
    fn file_content_splits_on_first_ampersand() {
        let parsed = FileContent::parse("/sd/voice.amr&http://host/f?a=1&b=2").unwrap();
        assert_eq!(parsed.path, "/sd/voice.amr");
        assert_eq!(parsed.url, "http://host/f?a=1&b=2");
        assert_eq!(FileContent::parse(&parsed.encode()).unwrap(), parsed);
        assert!(FileContent::parse("no-separator").is_err());
    }

    #[test]
    fn location_content_parses_coordinates() {
        let loc = LocationContent::parse("Fish & Chips, Leeds&53.8&-1.55").unwrap();
        assert_eq!(loc.address, "Fish & Chips, Leeds");
        assert_eq!(loc.latitude, 53.8);
        assert_eq!(loc.longitude, -1.55);
        assert!(LocationContent::parse("nowhere&north&south").is_err());
        assert!(LocationContent::parse("1.0&2.0").is_err());
    }
}
