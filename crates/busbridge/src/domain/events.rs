//! Bridge event kinds.
//!
//! Every externally visible step of a connection's life is announced to the
//! optional bridge event interceptor as one of these kinds.  Some of them gate
//! an action (the interceptor can veto it), the rest are informational.
//!
//! | Kind             | Raised when                              | Veto effect                     |
//! |------------------|------------------------------------------|---------------------------------|
//! | `SocketCreated`  | a connection is accepted                 | connection closed               |
//! | `SocketPing`     | a client ping arrives                    | none                            |
//! | `SocketIdle`     | no ping within the ping timeout          | `rejected` sent, stays open     |
//! | `SocketClosed`   | a connection closed                      | none                            |
//! | `SocketError`    | the transport failed                     | none                            |
//! | `Send`           | client `send`                            | `rejected`                      |
//! | `Publish`        | client `publish`                         | `rejected`                      |
//! | `Receive`        | a bus message is about to be delivered   | message dropped                 |
//! | `Register`       | client `register`                        | `rejected`                      |
//! | `Registered`     | a subscription was installed             | none                            |
//! | `Unregister`     | client `unregister`, or cleanup on close | `rejected`                      |

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of a bridge event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeEventType {
    SocketCreated,
    SocketPing,
    SocketIdle,
    SocketClosed,
    SocketError,
    Send,
    Publish,
    Receive,
    Register,
    Registered,
    Unregister,
}

impl BridgeEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            BridgeEventType::SocketCreated => "SOCKET_CREATED",
            BridgeEventType::SocketPing => "SOCKET_PING",
            BridgeEventType::SocketIdle => "SOCKET_IDLE",
            BridgeEventType::SocketClosed => "SOCKET_CLOSED",
            BridgeEventType::SocketError => "SOCKET_ERROR",
            BridgeEventType::Send => "SEND",
            BridgeEventType::Publish => "PUBLISH",
            BridgeEventType::Receive => "RECEIVE",
            BridgeEventType::Register => "REGISTER",
            BridgeEventType::Registered => "REGISTERED",
            BridgeEventType::Unregister => "UNREGISTER",
        }
    }
}

impl fmt::Display for BridgeEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
