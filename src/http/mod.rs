//! HTTP proxy frontend for Sockbridge
//!
//! Speaks the subset of HTTP/1.1 proxy semantics local clients use:
//! `CONNECT host:port` tunnels and plain requests in absolute or origin form.

mod body;
mod frontend;
mod head;
mod headers;
mod response;
mod target;

pub use body::{copy_body, copy_chunked, read_chunked, BodyKind, MAX_CHUNKED_REQUEST_BODY};
pub use frontend::{ClientClose, HttpProxyFrontend};
pub use head::{
    parse_request, parse_response, read_request_head, read_response_head, RequestHead,
    ResponseHead, MAX_HEADERS, MAX_HEAD_SIZE,
};
pub use headers::{content_length, expects_continue, is_chunked, is_hop_by_hop, strip_hop_by_hop, Header, HOP_BY_HOP_HEADERS};
pub use response::{error_response, write_error, CONNECTION_ESTABLISHED, CONTINUE};
pub use target::{
    parse_connect_target, parse_request_target, ForwardTarget, DEFAULT_CONNECT_PORT,
    DEFAULT_HTTP_PORT,
};
