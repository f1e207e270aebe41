//! SASL profile of the receiver's credential.
//!
//! Feedback endpoints authenticate with PLAIN over the already-encrypted
//! transport: the user name and the SAS token travel as the mechanism's
//! initial response.

use bytes::{BufMut, Bytes, BytesMut};

use crate::frames::sasl;
use crate::performative::{SaslInit, SaslOutcome};
use crate::transport::NegotiationError;

pub const PLAIN: &str = "PLAIN";

/// Next step of the SASL exchange
pub enum Negotiation {
    /// Send an Init frame
    Init(SaslInit),

    /// Negotiation finished with the peer's outcome
    Outcome(SaslOutcome),
}

/// Client-side SASL profile
#[derive(Clone)]
pub enum SaslProfile {
    /// SASL PLAIN with a user name and a bearer token
    Plain {
        /// Authentication identity
        username: String,

        /// The SAS token
        password: String,
    },
}

// The token must not end up in logs
impl std::fmt::Debug for SaslProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaslProfile::Plain { username, .. } => f
                .debug_struct("Plain")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

impl SaslProfile {
    /// The mechanism symbol announced by the peer that this profile matches
    pub fn mechanism(&self) -> &'static str {
        match self {
            SaslProfile::Plain { .. } => PLAIN,
        }
    }

    /// Initial response of the profile
    pub fn initial_response(&self) -> Option<Bytes> {
        match self {
            SaslProfile::Plain { username, password } => {
                let username = username.as_bytes();
                let password = password.as_bytes();
                let mut buf = BytesMut::with_capacity(username.len() + password.len() + 2);
                buf.put_u8(0);
                buf.put_slice(username);
                buf.put_u8(0);
                buf.put_slice(password);
                Some(buf.freeze())
            }
        }
    }

    /// Reacts to an incoming SASL frame
    pub fn on_frame(
        &self,
        frame: sasl::Frame,
        hostname: Option<&str>,
    ) -> Result<Negotiation, NegotiationError> {
        match frame {
            sasl::Frame::Mechanisms(mechanisms) => {
                let mechanism = self.mechanism();
                if mechanisms
                    .sasl_server_mechanisms
                    .iter()
                    .any(|m| m == mechanism)
                {
                    let init = SaslInit {
                        mechanism: mechanism.to_string(),
                        initial_response: self.initial_response(),
                        hostname: hostname.map(Into::into),
                    };
                    Ok(Negotiation::Init(init))
                } else {
                    Err(NegotiationError::NotImplemented(Some(format!(
                        "{:?} is not supported by the peer",
                        mechanism
                    ))))
                }
            }
            sasl::Frame::Outcome(outcome) => Ok(Negotiation::Outcome(outcome)),
            frame => Err(NegotiationError::NotImplemented(Some(format!(
                "{:?} is not expected",
                frame
            )))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::frames::sasl;
    use crate::performative::SaslMechanisms;
    use crate::transport::NegotiationError;

    use super::{Negotiation, SaslProfile};

    fn profile() -> SaslProfile {
        SaslProfile::Plain {
            username: "user".to_string(),
            password: "example".to_string(),
        }
    }

    #[test]
    fn test_plain_initial_response() {
        let response = profile().initial_response().unwrap();
        assert_eq!(&response[..], b"\x00user\x00example");
    }

    #[test]
    fn test_init_sent_when_plain_is_offered() {
        let mechanisms = sasl::Frame::Mechanisms(SaslMechanisms {
            sasl_server_mechanisms: vec!["EXTERNAL".to_string(), "PLAIN".to_string()],
        });
        match profile().on_frame(mechanisms, Some("host")).unwrap() {
            Negotiation::Init(init) => {
                assert_eq!(init.mechanism, "PLAIN");
                assert_eq!(init.hostname.as_deref(), Some("host"));
            }
            _ => panic!("expected Init"),
        }
    }

    #[test]
    fn test_missing_plain_mechanism_is_an_error() {
        let mechanisms = sasl::Frame::Mechanisms(SaslMechanisms {
            sasl_server_mechanisms: vec!["EXTERNAL".to_string()],
        });
        let result = profile().on_frame(mechanisms, None);
        assert!(matches!(result, Err(NegotiationError::NotImplemented(_))));
    }

    #[test]
    fn test_debug_redacts_token() {
        let formatted = format!("{:?}", profile());
        assert!(!formatted.contains("example"));
        assert!(formatted.contains("user"));
    }
}
