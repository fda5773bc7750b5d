//! Bearer-token provider abstraction.
//!
//! WAN sessions authenticate to the SmartLink broker with an OAuth bearer
//! token. Token storage and refresh live outside the core (OS keychain,
//! browser flows); the engine only needs these two operations.

use futures::future::BoxFuture;

/// Supplies bearer tokens for broker registration.
///
/// Implementations may suspend (network refresh, user interaction); the
/// controller awaits them before touching the broker.
pub trait TokenProvider: Send + Sync {
    /// Returns a currently-valid bearer token, acquiring one if needed.
    fn ensure_valid_token(&self) -> BoxFuture<'_, Result<String, String>>;

    /// Refreshes the token if it is near expiry, returning the fresh one.
    fn refresh_if_needed(&self) -> BoxFuture<'_, Result<String, String>>;
}

/// Provider wrapping a fixed token. For tests and headless deployments
/// where a long-lived token is provisioned out of band.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Wraps the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn ensure_valid_token(&self) -> BoxFuture<'_, Result<String, String>> {
        Box::pin(std::future::ready(Ok(self.token.clone())))
    }

    fn refresh_if_needed(&self) -> BoxFuture<'_, Result<String, String>> {
        self.ensure_valid_token()
    }
}
