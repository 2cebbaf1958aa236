//! Fabric messages and their wire codec.
//!
//! Four variants travel over the fabric:
//!
//! - [`Event`]: fan-out notification on a topic
//! - [`Request`]: expects a reply on its `reply_to_topic`
//! - [`Response`]: answers a request, carrying its `request_message_id`
//! - [`ErrorResponse`]: a response that reports failure with a code and text
//!
//! ```
//! use switchboard::message::{codec, Message, Request, Response};
//!
//! let request = Request::new("/svc/echo")
//!     .with_reply_to_topic("/switchboard/client/me")
//!     .with_string_payload("ping");
//! let response = Response::for_request(&request).with_string_payload("pong");
//!
//! let bytes = codec::encode(&Message::Response(response.clone()));
//! assert_eq!(codec::decode(&bytes).unwrap(), Message::Response(response));
//! ```

pub mod codec;
#[allow(clippy::module_inception)]
mod message;

pub use codec::{decode, encode, encode_with_version, DecodeError, WireVersion};
pub use message::{
    generate_message_id, ErrorResponse, Event, Header, Message, MessageType, Request, Response,
};
