use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};

use super::error::SynthesisError;

/// Build the shared HTTP client. `timeout` bounds every synthesis call so a
/// hung provider cannot stall a job's counter forever.
pub fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
        .expect("failed to build HTTP client")
}

/// Send the request and map HTTP failures onto [`SynthesisError`].
pub(crate) async fn send(request: RequestBuilder) -> Result<Response, SynthesisError> {
    let response = request.send().await?;
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(1000);
        return Err(SynthesisError::RateLimited {
            retry_after_ms: retry_after,
        });
    }

    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(SynthesisError::ApiError {
            status: status.as_u16(),
            message,
        });
    }

    Ok(response)
}

/// Send the request and return the response body as audio bytes.
pub(crate) async fn send_for_audio(request: RequestBuilder) -> Result<Vec<u8>, SynthesisError> {
    let bytes = send(request).await?.bytes().await?;
    if bytes.is_empty() {
        return Err(SynthesisError::InvalidResponse("empty audio body".into()));
    }
    Ok(bytes.to_vec())
}
