//! Typed fabric messages.

use std::fmt;

use uuid::Uuid;

/// Discriminant written to the wire for each message variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    Event = 2,
    ErrorResponse = 3,
}

impl MessageType {
    /// Wire tag for this variant.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Look up a variant by its wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(MessageType::Request),
            1 => Some(MessageType::Response),
            2 => Some(MessageType::Event),
            3 => Some(MessageType::ErrorResponse),
            _ => None,
        }
    }

    /// True when callbacks registered for `self` receive messages of
    /// type `incoming`. Response callbacks also see error responses.
    pub fn accepts(self, incoming: MessageType) -> bool {
        self == incoming
            || (self == MessageType::Response && incoming == MessageType::ErrorResponse)
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Event => "event",
            MessageType::ErrorResponse => "error_response",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fields shared by every message variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    message_id: String,
    source_client_id: String,
    destination_topic: String,
    payload: Vec<u8>,
    other_fields: Vec<(String, String)>,
}

impl Header {
    fn new(destination_topic: impl Into<String>) -> Self {
        Self {
            message_id: generate_message_id(),
            source_client_id: String::new(),
            destination_topic: destination_topic.into(),
            payload: Vec::new(),
            other_fields: Vec::new(),
        }
    }

    pub(crate) fn from_wire(
        message_id: String,
        source_client_id: String,
        destination_topic: String,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_id,
            source_client_id,
            destination_topic,
            payload,
            other_fields: Vec::new(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn source_client_id(&self) -> &str {
        &self.source_client_id
    }

    pub fn destination_topic(&self) -> &str {
        &self.destination_topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Application metadata carried from wire version 1 onwards.
    pub fn other_fields(&self) -> &[(String, String)] {
        &self.other_fields
    }

    /// Look up a metadata value by key (first match wins).
    pub fn other_field(&self, key: &str) -> Option<&str> {
        self.other_fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn set_other_fields(&mut self, fields: Vec<(String, String)>) {
        self.other_fields = fields;
    }

    pub(crate) fn set_source_client_id(&mut self, client_id: &str) {
        self.source_client_id = client_id.to_string();
    }
}

/// Generate a fresh message id.
pub fn generate_message_id() -> String {
    format!("{{{}}}", Uuid::new_v4())
}

/// Builder methods and accessors shared by every variant.
macro_rules! header_methods {
    ($ty:ident, $($path:ident).+) => {
        impl $ty {
            pub fn header(&self) -> &Header {
                &self.$($path).+
            }

            pub fn message_id(&self) -> &str {
                &self.$($path).+.message_id
            }

            pub fn source_client_id(&self) -> &str {
                &self.$($path).+.source_client_id
            }

            pub fn destination_topic(&self) -> &str {
                &self.$($path).+.destination_topic
            }

            pub fn payload(&self) -> &[u8] {
                &self.$($path).+.payload
            }

            /// The payload as a string (if valid UTF-8).
            pub fn payload_str(&self) -> Option<&str> {
                std::str::from_utf8(&self.$($path).+.payload).ok()
            }

            pub fn other_fields(&self) -> &[(String, String)] {
                &self.$($path).+.other_fields
            }

            /// Replace the payload.
            pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
                self.$($path).+.payload = payload.into();
                self
            }

            /// Replace the payload with the bytes of a string.
            pub fn with_string_payload(self, payload: impl Into<String>) -> Self {
                self.with_payload(payload.into().into_bytes())
            }

            /// Replace the payload with a bitcode-serialized value.
            pub fn with_encoded_payload<T: serde::Serialize>(
                self,
                payload: &T,
            ) -> Result<Self, bitcode::Error> {
                let bytes = bitcode::serialize(payload)?;
                Ok(self.with_payload(bytes))
            }

            /// Decode the payload from bitcode binary format.
            pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
                bitcode::deserialize(&self.$($path).+.payload)
            }

            pub fn with_source_client_id(mut self, client_id: impl Into<String>) -> Self {
                self.$($path).+.source_client_id = client_id.into();
                self
            }

            /// Append a metadata pair (sent from wire version 1 onwards).
            pub fn with_other_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
                self.$($path).+.other_fields.push((key.into(), value.into()));
                self
            }
        }
    };
}

/// A one-way notification published to every subscriber of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    header: Header,
}

impl Event {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            header: Header::new(topic),
        }
    }

    pub(crate) fn from_header(header: Header) -> Self {
        Self { header }
    }
}

header_methods!(Event, header);

/// A message expecting a [`Response`] on its reply-to topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    header: Header,
    reply_to_topic: String,
    service_id: String,
}

impl Request {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            header: Header::new(topic),
            reply_to_topic: String::new(),
            service_id: String::new(),
        }
    }

    pub(crate) fn from_parts(header: Header, reply_to_topic: String, service_id: String) -> Self {
        Self {
            header,
            reply_to_topic,
            service_id,
        }
    }

    pub fn reply_to_topic(&self) -> &str {
        &self.reply_to_topic
    }

    /// The service this request targets; empty when any service may answer.
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn with_reply_to_topic(mut self, topic: impl Into<String>) -> Self {
        self.reply_to_topic = topic.into();
        self
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }
}

header_methods!(Request, header);

/// A reply correlated to a [`Request`] by `request_message_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    header: Header,
    request_message_id: String,
    service_id: String,
}

impl Response {
    /// Build a response addressed to the request's reply-to topic.
    pub fn for_request(request: &Request) -> Self {
        Self {
            header: Header::new(request.reply_to_topic()),
            request_message_id: request.message_id().to_string(),
            service_id: request.service_id().to_string(),
        }
    }

    /// Build a response by hand, for callers that track correlation ids themselves.
    pub fn new(topic: impl Into<String>, request_message_id: impl Into<String>) -> Self {
        Self {
            header: Header::new(topic),
            request_message_id: request_message_id.into(),
            service_id: String::new(),
        }
    }

    pub(crate) fn from_parts(
        header: Header,
        request_message_id: String,
        service_id: String,
    ) -> Self {
        Self {
            header,
            request_message_id,
            service_id,
        }
    }

    pub fn request_message_id(&self) -> &str {
        &self.request_message_id
    }

    /// The responding service; empty when unknown.
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }
}

header_methods!(Response, header);

/// A [`Response`] reporting that the request failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    response: Response,
    error_code: i32,
    error_message: String,
}

impl ErrorResponse {
    pub fn new(response: Response, error_code: i32, error_message: impl Into<String>) -> Self {
        Self {
            response,
            error_code,
            error_message: error_message.into(),
        }
    }

    /// Build an error reply addressed to the request's reply-to topic.
    pub fn for_request(request: &Request, error_code: i32, error_message: impl Into<String>) -> Self {
        Self::new(Response::for_request(request), error_code, error_message)
    }

    /// The base response fields.
    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn request_message_id(&self) -> &str {
        self.response.request_message_id()
    }

    pub fn service_id(&self) -> &str {
        self.response.service_id()
    }

    pub fn error_code(&self) -> i32 {
        self.error_code
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }
}

header_methods!(ErrorResponse, response.header);

/// A decoded fabric message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Event(Event),
    Request(Request),
    Response(Response),
    ErrorResponse(ErrorResponse),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Event(_) => MessageType::Event,
            Message::Request(_) => MessageType::Request,
            Message::Response(_) => MessageType::Response,
            Message::ErrorResponse(_) => MessageType::ErrorResponse,
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Message::Event(m) => m.header(),
            Message::Request(m) => m.header(),
            Message::Response(m) => m.header(),
            Message::ErrorResponse(m) => m.header(),
        }
    }

    pub(crate) fn header_mut(&mut self) -> &mut Header {
        match self {
            Message::Event(m) => &mut m.header,
            Message::Request(m) => &mut m.header,
            Message::Response(m) => &mut m.header,
            Message::ErrorResponse(m) => &mut m.response.header,
        }
    }

    pub fn message_id(&self) -> &str {
        self.header().message_id()
    }

    pub fn source_client_id(&self) -> &str {
        self.header().source_client_id()
    }

    pub fn destination_topic(&self) -> &str {
        self.header().destination_topic()
    }

    pub fn payload(&self) -> &[u8] {
        self.header().payload()
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(self.payload()).ok()
    }

    /// The correlation id, for response variants.
    pub fn request_message_id(&self) -> Option<&str> {
        match self {
            Message::Response(m) => Some(m.request_message_id()),
            Message::ErrorResponse(m) => Some(m.request_message_id()),
            _ => None,
        }
    }

    /// True for `Response` and `ErrorResponse`.
    pub fn is_response(&self) -> bool {
        self.request_message_id().is_some()
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Message::ErrorResponse(_))
    }
}

impl From<Event> for Message {
    fn from(m: Event) -> Self {
        Message::Event(m)
    }
}

impl From<Request> for Message {
    fn from(m: Request) -> Self {
        Message::Request(m)
    }
}

impl From<Response> for Message {
    fn from(m: Response) -> Self {
        Message::Response(m)
    }
}

impl From<ErrorResponse> for Message {
    fn from(m: ErrorResponse) -> Self {
        Message::ErrorResponse(m)
    }
}
