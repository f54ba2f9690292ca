//! Shared HTTP client for the STT and TTS services

use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;

static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

/// Idle keep-alive connections retained per service host
pub const MAX_IDLE_PER_HOST: usize = 4;

/// One keep-alive pool shared by every speech request in the process
pub(crate) fn client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new())
    })
}

/// Join a base URL and a path without doubling the slash
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://stt:9001", "/warmup"), "http://stt:9001/warmup");
        assert_eq!(join_url("http://stt:9001/", "/warmup"), "http://stt:9001/warmup");
    }
}
