//! Per-message decisions for the command channel.

use serde_json::Value;

use playout_ipc::{PlayerCommand, RemoteCommand};

use crate::auth::AuthToken;

/// Close code for a missing or wrong token.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Close code for a payload that is not a JSON object.
pub const CLOSE_INVALID_PAYLOAD: u16 = 1007;

/// Why a connection is being closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Unauthorized,
    InvalidPayload(String),
}

impl CloseReason {
    pub fn code(&self) -> u16 {
        match self {
            Self::Unauthorized => CLOSE_POLICY_VIOLATION,
            Self::InvalidPayload(_) => CLOSE_INVALID_PAYLOAD,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Unauthorized => "invalid token",
            Self::InvalidPayload(reason) => reason,
        }
    }
}

/// What to do with one incoming text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Authenticated and well formed.
    Dispatch(PlayerCommand),

    /// Authenticated but not a command we act on. The connection stays open.
    Ignore(String),

    /// Close the connection.
    Close(CloseReason),
}

/// Decide what a text message means.
///
/// The token is checked before the command is looked at, so an
/// unauthenticated peer learns nothing about which commands exist.
pub fn route(text: &str, token: &AuthToken) -> Disposition {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return Disposition::Close(CloseReason::InvalidPayload(format!("malformed JSON: {e}"))),
    };
    if !value.is_object() {
        return Disposition::Close(CloseReason::InvalidPayload(
            "expected a JSON object".to_string(),
        ));
    }

    match value.get("token").and_then(Value::as_str) {
        Some(candidate) if token.matches(candidate) => {}
        _ => return Disposition::Close(CloseReason::Unauthorized),
    }

    let remote: RemoteCommand = match serde_json::from_value(value) {
        Ok(remote) => remote,
        Err(e) => return Disposition::Ignore(format!("unrecognised command: {e}")),
    };
    match remote.to_player_command() {
        Ok(command) => Disposition::Dispatch(command),
        Err(e) => Disposition::Ignore(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_ipc::Volume;

    fn message(token: &AuthToken, body: &str) -> String {
        format!(r#"{{"token":"{}",{}}}"#, token.as_str(), body)
    }

    #[test]
    fn test_dispatches_valid_commands() {
        let token = AuthToken::generate();
        assert_eq!(
            route(&message(&token, r#""command":"play""#), &token),
            Disposition::Dispatch(PlayerCommand::Play)
        );
        assert_eq!(
            route(&message(&token, r#""command":"reset""#), &token),
            Disposition::Dispatch(PlayerCommand::Reset)
        );
        assert_eq!(
            route(&message(&token, r#""command":"volume","value":140"#), &token),
            Disposition::Dispatch(PlayerCommand::SetVolume(Volume::MAX))
        );
    }

    #[test]
    fn test_bad_token_closes() {
        let token = AuthToken::generate();
        let other = AuthToken::generate();
        let disposition = route(&message(&other, r#""command":"play""#), &token);
        assert_eq!(disposition, Disposition::Close(CloseReason::Unauthorized));
        assert_eq!(CloseReason::Unauthorized.code(), 1008);

        assert_eq!(
            route(r#"{"command":"play"}"#, &token),
            Disposition::Close(CloseReason::Unauthorized)
        );
        assert_eq!(
            route(r#"{"token":7,"command":"play"}"#, &token),
            Disposition::Close(CloseReason::Unauthorized)
        );
    }

    #[test]
    fn test_token_checked_before_command() {
        let token = AuthToken::generate();
        assert_eq!(
            route(r#"{"token":"nope","command":"rewind"}"#, &token),
            Disposition::Close(CloseReason::Unauthorized)
        );
    }

    #[test]
    fn test_malformed_payload_closes() {
        let token = AuthToken::generate();
        for text in ["{not json", "[1,2]", "\"play\"", ""] {
            match route(text, &token) {
                Disposition::Close(reason) => assert_eq!(reason.code(), 1007, "{text}"),
                other => panic!("expected close for {text:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_or_incomplete_command_ignored() {
        let token = AuthToken::generate();
        for body in [
            r#""command":"rewind""#,
            r#""command":"volume""#,
            r#""command":"volume","value":"loud""#,
            r#""value":3"#,
        ] {
            assert!(
                matches!(route(&message(&token, body), &token), Disposition::Ignore(_)),
                "{body}"
            );
        }
    }
}
