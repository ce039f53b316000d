//! OBS WebSocket v5 frames.
//!
//! Only the subset the daemon needs: the Hello/Identify/Identified
//! handshake (with password authentication) and Request/RequestResponse.
//! Every frame on the wire is `{"op": <u8>, "d": {...}}`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// RPC version negotiated in `Identify`.
pub const RPC_VERSION: u32 = 1;

/// WebSocket close code OBS uses when authentication fails.
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4009;

/// Frame opcodes.
pub mod op {
    pub const HELLO: u8 = 0;
    pub const IDENTIFY: u8 = 1;
    pub const IDENTIFIED: u8 = 2;
    pub const EVENT: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const REQUEST_RESPONSE: u8 = 7;
}

/// Request types used by the daemon.
pub mod request {
    pub const GET_VERSION: &str = "GetVersion";
    pub const START_RECORD: &str = "StartRecord";
    pub const STOP_RECORD: &str = "StopRecord";
}

/// Raw frame envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub op: u8,
    pub d: Value,
}

// ============================================================================
// Handshake
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default)]
    pub obs_web_socket_version: Option<String>,
    pub rpc_version: u32,
    /// Present only when the server requires a password.
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub rpc_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    /// Bitmask of event categories; 0 because the daemon ignores events.
    pub event_subscriptions: u32,
}

impl Identify {
    /// Builds the Identify payload answering `hello`.
    ///
    /// Returns `ObsProtocolError::PasswordRequired` if the server challenges
    /// and no password is configured.
    pub fn answering(hello: &Hello, password: &str) -> Result<Self, ObsProtocolError> {
        let authentication = match &hello.authentication {
            Some(_) if password.is_empty() => return Err(ObsProtocolError::PasswordRequired),
            Some(auth) => Some(auth_response(password, &auth.salt, &auth.challenge)),
            None => None,
        };

        Ok(Self {
            rpc_version: RPC_VERSION,
            authentication,
            event_subscriptions: 0,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

/// Computes the Identify authentication string.
///
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    BASE64.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_type: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: u32,
    #[serde(default)]
    pub comment: Option<String>,
}

impl RequestResponse {
    /// Converts a failed status into an error, passing successes through.
    pub fn into_result(self) -> Result<Option<Value>, ObsProtocolError> {
        if self.request_status.result {
            Ok(self.response_data)
        } else {
            Err(ObsProtocolError::RequestFailed {
                request_type: self.request_type,
                code: self.request_status.code,
                comment: self.request_status.comment.unwrap_or_default(),
            })
        }
    }
}

/// `GetVersion` response data (fields the daemon reads).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(default)]
    pub obs_version: String,
    #[serde(default)]
    pub obs_web_socket_version: String,
}

/// `StopRecord` response data.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRecordData {
    #[serde(default)]
    pub output_path: Option<String>,
}

// ============================================================================
// Encoding / decoding
// ============================================================================

/// A decoded server frame.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    Hello(Hello),
    Identified(Identified),
    RequestResponse(RequestResponse),
    Event(Value),
    /// An opcode the daemon does not handle.
    Other { op: u8 },
}

/// Decodes one text frame from the server.
pub fn decode(text: &str) -> Result<ServerFrame, ObsProtocolError> {
    let frame: Frame = serde_json::from_str(text).map_err(ObsProtocolError::malformed)?;

    let decoded = match frame.op {
        op::HELLO => ServerFrame::Hello(from_data(frame.d)?),
        op::IDENTIFIED => ServerFrame::Identified(from_data(frame.d)?),
        op::REQUEST_RESPONSE => ServerFrame::RequestResponse(from_data(frame.d)?),
        op::EVENT => ServerFrame::Event(frame.d),
        other => ServerFrame::Other { op: other },
    };

    Ok(decoded)
}

/// Encodes an Identify frame.
pub fn encode_identify(identify: &Identify) -> Result<String, ObsProtocolError> {
    encode(op::IDENTIFY, identify)
}

/// Encodes a Request frame.
pub fn encode_request(request: &Request) -> Result<String, ObsProtocolError> {
    encode(op::REQUEST, request)
}

fn encode<T: Serialize>(op: u8, data: &T) -> Result<String, ObsProtocolError> {
    let d = serde_json::to_value(data).map_err(ObsProtocolError::malformed)?;
    serde_json::to_string(&Frame { op, d }).map_err(ObsProtocolError::malformed)
}

fn from_data<T: for<'de> Deserialize<'de>>(d: Value) -> Result<T, ObsProtocolError> {
    serde_json::from_value(d).map_err(ObsProtocolError::malformed)
}

/// Errors in OBS frame handling.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ObsProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("server requires a password but none is configured")]
    PasswordRequired,

    #[error("{request_type} failed (code {code}): {comment}")]
    RequestFailed {
        request_type: String,
        code: u32,
        comment: String,
    },
}

impl ObsProtocolError {
    fn malformed<E: std::fmt::Display>(err: E) -> Self {
        Self::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_response_matches_reference_vector() {
        let auth = auth_response(
            "supersecretpassword",
            "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=",
            "+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY=",
        );
        assert_eq!(auth, "1Ct943GAT+6YQUUX47Ia/ncufilbe6+oD6lY+5kaCu4=");
    }

    #[test]
    fn test_decode_hello_with_auth() {
        let text = json!({
            "op": 0,
            "d": {
                "obsWebSocketVersion": "5.1.0",
                "rpcVersion": 1,
                "authentication": {"challenge": "c", "salt": "s"}
            }
        })
        .to_string();

        match decode(&text).unwrap() {
            ServerFrame::Hello(hello) => {
                assert_eq!(hello.rpc_version, 1);
                assert_eq!(hello.authentication.unwrap().salt, "s");
            }
            other => panic!("Expected Hello, got {other:?}"),
        }
    }

    #[test]
    fn test_identify_without_challenge() {
        let hello = Hello {
            obs_web_socket_version: None,
            rpc_version: 1,
            authentication: None,
        };
        let identify = Identify::answering(&hello, "ignored").unwrap();
        assert!(identify.authentication.is_none());

        let text = encode_identify(&identify).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["op"], 1);
        assert_eq!(value["d"]["rpcVersion"], 1);
        assert_eq!(value["d"]["eventSubscriptions"], 0);
        assert!(value["d"].get("authentication").is_none());
    }

    #[test]
    fn test_identify_challenge_without_password() {
        let hello = Hello {
            obs_web_socket_version: None,
            rpc_version: 1,
            authentication: Some(AuthChallenge {
                challenge: "c".to_string(),
                salt: "s".to_string(),
            }),
        };
        assert_eq!(
            Identify::answering(&hello, "").unwrap_err(),
            ObsProtocolError::PasswordRequired
        );
    }

    #[test]
    fn test_encode_request() {
        let text = encode_request(&Request {
            request_type: request::START_RECORD.to_string(),
            request_id: "7".to_string(),
            request_data: None,
        })
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["op"], 6);
        assert_eq!(value["d"]["requestType"], "StartRecord");
        assert_eq!(value["d"]["requestId"], "7");
    }

    #[test]
    fn test_stop_record_response_output_path() {
        let text = json!({
            "op": 7,
            "d": {
                "requestType": "StopRecord",
                "requestId": "3",
                "requestStatus": {"result": true, "code": 100},
                "responseData": {"outputPath": "/rec/2024-05-01 10-00-00.mkv"}
            }
        })
        .to_string();

        let ServerFrame::RequestResponse(response) = decode(&text).unwrap() else {
            panic!("Expected RequestResponse");
        };
        let data = response.into_result().unwrap().unwrap();
        let stop: StopRecordData = serde_json::from_value(data).unwrap();
        assert_eq!(stop.output_path.as_deref(), Some("/rec/2024-05-01 10-00-00.mkv"));
    }

    #[test]
    fn test_failed_request_status() {
        let response = RequestResponse {
            request_type: "StartRecord".to_string(),
            request_id: "1".to_string(),
            request_status: RequestStatus {
                result: false,
                code: 500,
                comment: Some("Output is already active".to_string()),
            },
            response_data: None,
        };
        let err = response.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "StartRecord failed (code 500): Output is already active"
        );
    }

    #[test]
    fn test_decode_unknown_op_and_garbage() {
        assert!(matches!(
            decode(r#"{"op": 9, "d": {}}"#).unwrap(),
            ServerFrame::Other { op: 9 }
        ));
        assert!(decode("not json").is_err());
    }
}
