//! Shared request plumbing for the Nomad and Consul clients.

use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Url};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Parse a configured API address into a base URL.
pub(crate) fn parse_base(addr: &str) -> ClientResult<Url> {
    let url = Url::parse(addr).map_err(|e| ClientError::InvalidUrl(format!("{addr}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ClientError::InvalidUrl(addr.to_string()));
    }
    Ok(url)
}

/// Append path segments to a base URL, percent-encoding each one.
///
/// Segments may contain `/` (periodic child job ids do), which is encoded.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> ClientResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| ClientError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Send a request and decode a JSON body, returning the response headers too.
pub(crate) async fn get_json<T: DeserializeOwned>(
    request: RequestBuilder,
    endpoint: &Url,
) -> ClientResult<(T, HeaderMap)> {
    let label = endpoint.path().to_string();
    debug!(endpoint = %label, "Sending request");

    let response = request.send().await.map_err(|source| ClientError::Http {
        endpoint: label.clone(),
        source,
    })?;

    let status = response.status();
    let headers = response.headers().clone();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            endpoint: label,
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await.map_err(|source| ClientError::Http {
        endpoint: label.clone(),
        source,
    })?;

    let value = serde_json::from_slice(&bytes).map_err(|source| ClientError::Decode {
        endpoint: label,
        source,
    })?;

    Ok((value, headers))
}

/// Deserialize `null` as the type's default. The Nomad and Consul APIs
/// serialize empty slices and maps as `null`.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
