//! Status handling shared by the HTTP-backed fetchers.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode, header::RETRY_AFTER};
use serde::de::DeserializeOwned;

use crate::ResolveError;

/// Map an upstream status onto the resolver taxonomy: 404 is a definitive
/// not-found (`Ok(None)`), 429 is [`ResolveError::RateLimited`], anything
/// else outside 2xx is [`ResolveError::Upstream`].
pub(crate) fn check_status(resp: Response) -> Result<Option<Response>, ResolveError> {
  match resp.status() {
    StatusCode::NOT_FOUND => Ok(None),
    StatusCode::TOO_MANY_REQUESTS => Err(ResolveError::RateLimited {
      retry_after: retry_after(&resp),
    }),
    status if !status.is_success() => Err(ResolveError::Upstream(format!(
      "{} responded {status}",
      resp.url().host_str().unwrap_or("upstream")
    ))),
    _ => Ok(Some(resp)),
  }
}

/// Send `req` and decode a JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(
  req: RequestBuilder,
) -> Result<Option<T>, ResolveError> {
  let Some(resp) = check_status(req.send().await?)? else {
    return Ok(None);
  };
  let body = resp.json::<T>().await.map_err(|e| ResolveError::Decode(e.to_string()))?;
  Ok(Some(body))
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored and the
/// caller's default applies.
fn retry_after(resp: &Response) -> Option<Duration> {
  resp
    .headers()
    .get(RETRY_AFTER)?
    .to_str()
    .ok()?
    .trim()
    .parse::<u64>()
    .ok()
    .map(Duration::from_secs)
}
