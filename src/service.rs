//! the handler seam between the connection engine and user code.

use http::{Request, Response};

use crate::{body::ResponseBody, h1::RequestBody};

/// The single pluggable request handler a server dispatches to.
///
/// A handler receives the parsed request with its streaming body and must
/// produce a response; failures are expressed as error status responses, not
/// as `Err` values, so the engine never has to guess a mapping. Connection
/// tasks run on a per worker [LocalSet](tokio::task::LocalSet), hence call
/// futures do not need to be `Send`.
#[allow(async_fn_in_trait)]
pub trait HttpService {
    async fn call(&self, req: Request<RequestBody>) -> Response<ResponseBody>;
}
