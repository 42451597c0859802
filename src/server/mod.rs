//! HTTP/1.1 server: request/response model, wire codec, per-connection protocol and the
//! accept loop.

mod codec;
pub mod cookie;
pub mod form;
pub mod http_server;
pub mod protocol;
pub mod request;
pub mod response;

pub use cookie::Cookie;
pub use form::{FormData, UploadedFile};
pub use http_server::{HttpServer, ServerHandle};
pub use protocol::{Protocol, State, Transport};
pub use request::{body_channel, BodySender, BodyStream, HeaderVec, Request, MAX_INLINE_HEADERS};
pub use response::{reason_phrase, ChunkStream, Response, ResponseBody};
