use serde::Serialize;
use warp::http::StatusCode;
use warp::{reply, Reply};

/// JSON body plus status, already flattened to a `Response` so handlers with
/// several reply shapes share one return type.
pub fn json_response<T: Serialize>(value: &T, status: StatusCode) -> warp::reply::Response {
    reply::with_status(reply::json(value), status).into_response()
}
