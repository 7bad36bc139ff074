//! Webhook URL validation.

use url::Url;

use chainhook_core::HookError;

/// Parse `raw` and accept it only if it is an absolute `http`/`https` URL
/// with a host.
pub fn validate_webhook_url(raw: &str) -> Result<Url, HookError> {
    let url = Url::parse(raw).map_err(|_| HookError::InvalidUrl("invalid URL format".into()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(HookError::InvalidUrl(
            "only HTTP and HTTPS URLs are allowed".into(),
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(HookError::InvalidUrl("URL has no host".into()));
    }
    Ok(url)
}
