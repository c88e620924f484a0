//! Tether Core - session, codec, and wire protocol for a bidirectional
//! remote-eval bridge.
//!
//! A [`Session`] sits on one persistent duplex message connection and lets
//! the local side execute code on the remote peer while exchanging live
//! function references in both directions. Functions cross the wire as
//! opaque integer handles paired with a structural *cast tree* that marks
//! which leaves of a payload are handles; the session keeps the four id
//! namespaces (owned callbacks, peer proxies, and the two pending-request
//! maps) that give handles their meaning.
//!
//! This crate is transport-agnostic: it consumes an already-established
//! connection as an outbound frame sink plus inbound frame calls. See the
//! `tether-server` crate for the WebSocket endpoint.
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_core::{BridgeValue, Session};
//!
//! async fn greet(session: &Session) -> tether_core::Result<()> {
//!     let out = session.eval("return 1+1", Vec::new()).await?;
//!     println!("peer said {:?}", out);
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod codec;
pub mod error;
pub mod ledger;
pub mod protocol;
pub mod session;
pub mod value;

// Re-export commonly used types
pub use codec::{deserialize, deserialize_args, serialize, serialize_args, Cast};
pub use error::{BridgeError, Result};
pub use ledger::{Ledger, PendingReply};
pub use protocol::WireMessage;
pub use session::{Session, SessionEvent, CLOSED_EVENT};
pub use value::{callback_fn, BridgeValue, Callback, CallbackFn};
