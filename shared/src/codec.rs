//! Text codec for the device wire protocol
//!
//! Two message shapes come back from a device:
//!
//! ```text
//! command socket:  "ok"  |  "error ..."  |  "<value>"   (for Read commands)
//! status socket:   "bat:87;h:30;tof:55;...;\r\n"
//! ```
//!
//! Acknowledgments are interpreted against the kind of the command that is
//! waiting. Status datagrams are advisory: anything malformed is skipped.

use crate::command::CommandKind;
use thiserror::Error;

/// Errors that can occur while decoding an acknowledgment
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("acknowledgment is not valid UTF-8")]
    NotUtf8,

    #[error("empty acknowledgment datagram")]
    Empty,
}

/// Decoded acknowledgment for one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Control/Set command accepted and completed
    Ok,
    /// Value returned by a Read command
    Value(String),
    /// Device-reported failure, e.g. "error Not joystick"
    Error(String),
}

/// Decode an acknowledgment against the kind of the waiting command.
///
/// Devices reply `"ok"` in either case occasionally, so the comparison is
/// case-insensitive. Read replies are taken verbatim; they are assumed to
/// always succeed.
pub fn decode_ack(kind: CommandKind, raw: &[u8]) -> Result<AckOutcome, CodecError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| CodecError::NotUtf8)?
        .trim();

    if text.is_empty() {
        return Err(CodecError::Empty);
    }

    match kind {
        CommandKind::Control | CommandKind::Set => {
            if text.eq_ignore_ascii_case("ok") {
                Ok(AckOutcome::Ok)
            } else {
                Ok(AckOutcome::Error(text.to_string()))
            }
        }
        CommandKind::Read => Ok(AckOutcome::Value(text.to_string())),
    }
}

/// One parsed status datagram: the `key:value` fields that survived parsing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryFrame {
    pub fields: Vec<(String, String)>,
}

impl TelemetryFrame {
    /// Parse a status datagram. Returns `None` when nothing usable is in it
    /// - undecodable bytes, an empty payload, or a stray `"ok"` that some
    /// firmware versions emit on the status port. Malformed parts inside an
    /// otherwise valid datagram are skipped.
    pub fn parse(raw: &[u8]) -> Option<TelemetryFrame> {
        let text = std::str::from_utf8(raw).ok()?.trim();

        if text.is_empty() || text.eq_ignore_ascii_case("ok") {
            return None;
        }

        let mut fields = Vec::new();
        for part in text.split(';') {
            let mut kv = part.splitn(2, ':');
            match (kv.next(), kv.next()) {
                (Some(key), Some(value)) if !key.is_empty() => {
                    fields.push((key.to_string(), value.trim().to_string()));
                }
                _ => {}
            }
        }

        if fields.is_empty() {
            None
        } else {
            Some(TelemetryFrame { fields })
        }
    }
}
