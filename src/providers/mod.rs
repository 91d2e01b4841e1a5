pub mod anthropic;
pub mod traits;

pub use anthropic::AnthropicProvider;
pub use traits::TextProvider;

/// Build an error from a non-success upstream response, capturing status and
/// body without leaking it past logs.
pub(crate) async fn api_error(provider: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
    anyhow::anyhow!("{provider} API error ({status}): {body}")
}
