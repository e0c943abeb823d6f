use http::{HeaderMap, HeaderName, header};

/// Connection-scoped headers never relayed back to the caller.
pub static HOP_BY_HOP_HEADERS: [HeaderName; 4] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers. `HeaderMap` lookups are case-insensitive.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}
