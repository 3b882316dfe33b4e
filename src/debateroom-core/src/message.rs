//! Debate messages and the bounded per-session log.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::participant::Role;

/// A message in the debate transcript.
///
/// Partial reveals carry `is_typing = true`; the finalized message carries the
/// full text and, when synthesis succeeded, the audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    pub role: Role,
    #[serde(rename = "message")]
    pub text: String,
    pub timestamp: String,
    #[serde(rename = "audio_base64", default, with = "audio_base64")]
    pub audio: Option<Vec<u8>>,
    pub is_typing: bool,
    pub is_playing: bool,
}

impl Message {
    /// A partial reveal of a response still being typed.
    pub fn typing(name: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            text: text.into(),
            timestamp: utc_timestamp(),
            audio: None,
            is_typing: true,
            is_playing: false,
        }
    }

    /// A finalized message.
    pub fn finalized(name: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            is_typing: false,
            ..Self::typing(name, role, text)
        }
    }

    pub fn with_audio(mut self, audio: Option<Vec<u8>>) -> Self {
        self.audio = audio;
        self
    }
}

/// Current UTC time in RFC 3339 form.
pub fn utc_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

mod audio_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(audio: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match audio {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        if encoded.is_empty() {
            return Ok(None);
        }
        STANDARD
            .decode(encoded.as_bytes())
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

/// FIFO log that evicts its oldest entry once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct MessageLog {
    entries: VecDeque<Message>,
    capacity: usize,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(128)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.entries.push_back(message);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// First message nobody has played yet, marked as played.
    pub fn take_unplayed(&mut self) -> Option<Message> {
        let message = self.entries.iter_mut().find(|m| !m.is_playing)?;
        message.is_playing = true;
        Some(message.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn msg(text: &str) -> Message {
        Message::finalized("gpt", Role::Pros, text)
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut log = MessageLog::new(3);
        for text in ["a", "b", "c", "d"] {
            log.push(msg(text));
        }
        let texts: Vec<_> = log.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_take_unplayed_marks_in_order() {
        let mut log = MessageLog::new(10);
        log.push(msg("first"));
        log.push(msg("second"));

        assert_eq!(log.take_unplayed().unwrap().text, "first");
        assert_eq!(log.take_unplayed().unwrap().text, "second");
        assert!(log.take_unplayed().is_none());
        assert!(log.iter().all(|m| m.is_playing));
    }

    #[test]
    fn test_audio_serializes_as_base64() {
        let message = msg("hi").with_audio(Some(vec![1, 2, 3]));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["audio_base64"], "AQID");
        assert_eq!(json["message"], "hi");
        assert_eq!(json["role"], "pros");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back.audio, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_missing_audio_is_empty_string() {
        let json = serde_json::to_value(msg("hi")).unwrap();
        assert_eq!(json["audio_base64"], "");
    }

    proptest! {
        #[test]
        fn log_never_exceeds_capacity(capacity in 1usize..120, appends in 0usize..400) {
            let mut log = MessageLog::new(capacity);
            for i in 0..appends {
                log.push(msg(&i.to_string()));
                prop_assert!(log.len() <= capacity);
            }
            prop_assert_eq!(log.len(), appends.min(capacity));
            if appends > 0 {
                let last = log.iter().last().unwrap();
                prop_assert_eq!(&last.text, &(appends - 1).to_string());
            }
        }
    }
}
