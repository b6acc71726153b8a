//! canned minimal html status pages.

use http::{Response, StatusCode, header::CONTENT_TYPE};

use crate::body::ResponseBody;

/// Response extension overriding the canonical reason phrase of the status
/// line, e.g. `404 File Not Found`.
#[derive(Clone, Copy, Debug)]
pub struct Reason(pub &'static str);

/// Build a minimal html page response for the given status.
pub fn status_page(status: StatusCode, reason: Option<&'static str>) -> Response<ResponseBody> {
    let phrase = reason.or_else(|| status.canonical_reason()).unwrap_or("Unknown");

    let body = format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{code} {phrase}</title></head>\n\
         <body><h1>{code} {phrase}</h1></body>\n</html>\n",
        code = status.as_u16(),
    );

    let mut res = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .body(ResponseBody::from(body))
        .unwrap();

    if let Some(reason) = reason {
        res.extensions_mut().insert(Reason(reason));
    }

    res
}

pub fn bad_request() -> Response<ResponseBody> {
    status_page(StatusCode::BAD_REQUEST, None)
}

pub fn entity_too_large() -> Response<ResponseBody> {
    status_page(StatusCode::PAYLOAD_TOO_LARGE, Some("Entity Too Large"))
}

pub fn not_found() -> Response<ResponseBody> {
    status_page(StatusCode::NOT_FOUND, Some("File Not Found"))
}

pub fn forbidden() -> Response<ResponseBody> {
    status_page(StatusCode::FORBIDDEN, None)
}

pub fn method_not_allowed() -> Response<ResponseBody> {
    status_page(StatusCode::METHOD_NOT_ALLOWED, None)
}

pub fn internal_server_error() -> Response<ResponseBody> {
    status_page(StatusCode::INTERNAL_SERVER_ERROR, None)
}

pub fn service_unavailable() -> Response<ResponseBody> {
    status_page(StatusCode::SERVICE_UNAVAILABLE, None)
}
