use std::{sync::OnceLock, time::Duration};

use tracing::{debug, warn};

/// Browser-like user agent for gateway calls.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Apply an optional proxy URL to an existing `reqwest::ClientBuilder`.
///
/// `None` keeps reqwest's default system/env proxy behaviour. An invalid URL
/// disables proxying.
pub fn apply_proxy(builder: reqwest::ClientBuilder, proxy_url: Option<&str>) -> reqwest::ClientBuilder {
    let Some(url) = proxy_url else {
        return builder;
    };

    match reqwest::Proxy::all(url) {
        Ok(proxy) => builder.proxy(proxy),
        Err(error) => {
            warn!(
                proxy_url = %url,
                error = %error,
                "Invalid proxy URL; disabling proxy"
            );
            builder.no_proxy()
        }
    }
}

/// Build the `reqwest::Client` used for search calls.
pub fn build_search_client(
    proxy_url: Option<&str>,
    request_timeout: Duration,
    user_agent: &str,
) -> reqwest::Client {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .gzip(true)
        .deflate(true);

    if request_timeout > Duration::ZERO {
        builder = builder.timeout(request_timeout);
    }

    builder = apply_proxy(builder, proxy_url);

    builder.build().unwrap_or_else(|error| {
        warn!(
            error = %error,
            "Failed to create HTTP client; falling back to reqwest defaults"
        );
        reqwest::Client::new()
    })
}
