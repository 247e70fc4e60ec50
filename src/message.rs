// ABOUTME: Typed constructors and parsers for the ARMB command verbs (§4.2).
// ABOUTME: Sits above the codec: turns a raw (command, payload) pair into a `Message`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("unknown ARMB verb: {0:?}")]
    UnknownVerb(String),
    #[error("malformed {verb} command: {command:?}")]
    Malformed { verb: &'static str, command: String },
}

/// One decoded ARMB command, with its payload (if any) already split off by
/// the connection layer. Construction (`Message::*`) and parsing
/// (`Message::parse`) are the only two directions of travel — nothing here
/// touches a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Identity { hostname: String },
    Synchronize { sync_id: u32, settings: String },
    ConfirmSynchronize { sync_id: u32 },
    Render { frame: i64 },
    RejectRender { frame: i64 },
    CompleteRender { frame: i64 },
    Cancel,
    ConfirmCancel,
    Upload { frame: i64 },
    RejectUpload { frame: i64 },
    CompleteUpload { frame: i64, filename: String, payload: Vec<u8> },
    Cleanup,
}

impl Message {
    /// Encode into a `(command, payload)` pair ready for `Connection::send`.
    pub fn encode(&self) -> (String, Vec<u8>) {
        match self {
            Message::Identity { hostname } => (format!("IDENTITY {hostname}"), Vec::new()),
            Message::Synchronize { sync_id, settings } => {
                (format!("SYNCHRONIZE {sync_id}"), settings.clone().into_bytes())
            }
            Message::ConfirmSynchronize { sync_id } => {
                (format!("CONFIRM SYNCHRONIZE {sync_id}"), Vec::new())
            }
            Message::Render { frame } => (format!("RENDER {frame}"), Vec::new()),
            Message::RejectRender { frame } => (format!("REJECT RENDER {frame}"), Vec::new()),
            Message::CompleteRender { frame } => (format!("COMPLETE RENDER {frame}"), Vec::new()),
            Message::Cancel => ("CANCEL".to_string(), Vec::new()),
            Message::ConfirmCancel => ("CONFIRM CANCEL".to_string(), Vec::new()),
            Message::Upload { frame } => (format!("UPLOAD {frame}"), Vec::new()),
            Message::RejectUpload { frame } => (format!("REJECT UPLOAD {frame}"), Vec::new()),
            Message::CompleteUpload { frame, filename, payload } => {
                (format!("COMPLETE UPLOAD {frame} {filename}"), payload.clone())
            }
            Message::Cleanup => ("CLEANUP".to_string(), Vec::new()),
        }
    }

    /// Parse a decoded `(command, payload)` pair into a typed message.
    /// Unknown verbs are a fatal protocol error on the connection (§4.2).
    pub fn parse(command: &str, payload: Vec<u8>) -> Result<Message, MessageError> {
        let mut parts = command.splitn(2, ' ');
        let verb = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match verb {
            "IDENTITY" => {
                if is_hostname(rest) {
                    Ok(Message::Identity {
                        hostname: rest.to_string(),
                    })
                } else {
                    Err(malformed("IDENTITY", command))
                }
            }
            "SYNCHRONIZE" => {
                let sync_id = parse_sync_id(rest).ok_or_else(|| malformed("SYNCHRONIZE", command))?;
                let settings = String::from_utf8(payload).map_err(|_| malformed("SYNCHRONIZE", command))?;
                Ok(Message::Synchronize { sync_id, settings })
            }
            "CONFIRM" => parse_confirm(rest, command),
            "RENDER" => {
                let frame = parse_frame(rest).ok_or_else(|| malformed("RENDER", command))?;
                Ok(Message::Render { frame })
            }
            "REJECT" => parse_reject(rest, command),
            "COMPLETE" => parse_complete(rest, command, payload),
            "CANCEL" => Ok(Message::Cancel),
            "UPLOAD" => {
                let frame = parse_frame(rest).ok_or_else(|| malformed("UPLOAD", command))?;
                Ok(Message::Upload { frame })
            }
            "CLEANUP" => Ok(Message::Cleanup),
            _ => Err(MessageError::UnknownVerb(verb.to_string())),
        }
    }
}

fn parse_confirm(rest: &str, command: &str) -> Result<Message, MessageError> {
    if let Some(id) = rest.strip_prefix("SYNCHRONIZE ") {
        let sync_id = parse_sync_id(id.trim()).ok_or_else(|| malformed("CONFIRM SYNCHRONIZE", command))?;
        Ok(Message::ConfirmSynchronize { sync_id })
    } else if rest == "CANCEL" {
        Ok(Message::ConfirmCancel)
    } else {
        Err(malformed("CONFIRM", command))
    }
}

fn parse_reject(rest: &str, command: &str) -> Result<Message, MessageError> {
    if let Some(f) = rest.strip_prefix("RENDER ") {
        let frame = parse_frame(f.trim()).ok_or_else(|| malformed("REJECT RENDER", command))?;
        Ok(Message::RejectRender { frame })
    } else if let Some(f) = rest.strip_prefix("UPLOAD ") {
        let frame = parse_frame(f.trim()).ok_or_else(|| malformed("REJECT UPLOAD", command))?;
        Ok(Message::RejectUpload { frame })
    } else {
        Err(malformed("REJECT", command))
    }
}

fn parse_complete(rest: &str, command: &str, payload: Vec<u8>) -> Result<Message, MessageError> {
    if let Some(f) = rest.strip_prefix("RENDER ") {
        let frame = parse_frame(f.trim()).ok_or_else(|| malformed("COMPLETE RENDER", command))?;
        Ok(Message::CompleteRender { frame })
    } else if let Some(f) = rest.strip_prefix("UPLOAD ") {
        let mut tail = f.trim().splitn(2, ' ');
        let frame = tail
            .next()
            .and_then(parse_frame)
            .ok_or_else(|| malformed("COMPLETE UPLOAD", command))?;
        let filename = tail
            .next()
            .filter(|s| !s.is_empty() && !s.contains(char::is_whitespace))
            .ok_or_else(|| malformed("COMPLETE UPLOAD", command))?;
        Ok(Message::CompleteUpload {
            frame,
            filename: filename.to_string(),
            payload,
        })
    } else {
        Err(malformed("COMPLETE", command))
    }
}

fn malformed(verb: &'static str, command: &str) -> MessageError {
    MessageError::Malformed {
        verb,
        command: command.to_string(),
    }
}

fn parse_frame(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    s.parse::<i64>().ok()
}

fn parse_sync_id(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u32>().ok()
}

fn is_hostname(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trips() {
        let msg = Message::Identity {
            hostname: "box1".to_string(),
        };
        let (cmd, payload) = msg.encode();
        assert_eq!(cmd, "IDENTITY box1");
        assert!(payload.is_empty());
        assert_eq!(Message::parse(&cmd, payload).unwrap(), msg);
    }

    #[test]
    fn synchronize_carries_payload() {
        let msg = Message::Synchronize {
            sync_id: 42,
            settings: "resolution_x=100,resolution_y=100,percentage=100,display_mode=AREA".to_string(),
        };
        let (cmd, payload) = msg.encode();
        assert_eq!(cmd, "SYNCHRONIZE 42");
        assert_eq!(Message::parse(&cmd, payload).unwrap(), msg);
    }

    #[test]
    fn complete_upload_round_trips_with_filename_and_payload() {
        let msg = Message::CompleteUpload {
            frame: 5,
            filename: "5.png".to_string(),
            payload: vec![1, 2, 3, 4, 5],
        };
        let (cmd, payload) = msg.encode();
        assert_eq!(cmd, "COMPLETE UPLOAD 5 5.png");
        assert_eq!(payload, vec![1, 2, 3, 4, 5]);
        assert_eq!(Message::parse(&cmd, payload).unwrap(), msg);
    }

    #[test]
    fn negative_frame_numbers_parse() {
        let msg = Message::Render { frame: -3 };
        let (cmd, payload) = msg.encode();
        assert_eq!(cmd, "RENDER -3");
        assert_eq!(Message::parse(&cmd, payload).unwrap(), msg);
    }

    #[test]
    fn confirm_cancel_and_cancel_and_cleanup() {
        assert_eq!(Message::parse("CANCEL", vec![]).unwrap(), Message::Cancel);
        assert_eq!(
            Message::parse("CONFIRM CANCEL", vec![]).unwrap(),
            Message::ConfirmCancel
        );
        assert_eq!(Message::parse("CLEANUP", vec![]).unwrap(), Message::Cleanup);
    }

    #[test]
    fn unknown_verb_is_an_error() {
        assert_eq!(
            Message::parse("FROBNICATE 1", vec![]),
            Err(MessageError::UnknownVerb("FROBNICATE".to_string()))
        );
    }

    #[test]
    fn malformed_frame_number_is_an_error() {
        assert!(matches!(
            Message::parse("RENDER abc", vec![]),
            Err(MessageError::Malformed { verb: "RENDER", .. })
        ));
    }

    #[test]
    fn complete_upload_requires_whitespace_free_filename() {
        assert!(matches!(
            Message::parse("COMPLETE UPLOAD 5 my file.png", vec![]),
            Err(MessageError::Malformed {
                verb: "COMPLETE UPLOAD",
                ..
            })
        ));
    }
}
