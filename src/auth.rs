//! Credential seam.
//!
//! The client never acquires tokens. It asks a [`CredentialProvider`] for
//! the current one right before each connection attempt and appends it to
//! the connection target as a query parameter.

use std::fmt;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use url::Url;

use crate::error::AuthError;

/// Future returned by [`CredentialProvider::resolve`].
pub type CredentialFuture = BoxFuture<'static, Result<Option<String>, AuthError>>;

/// Resolves the credential to present on the next connection attempt.
///
/// `Ok(None)` means "connect anonymously". An `Err` is treated as a
/// transient failure and retried on the reconnect schedule.
pub trait CredentialProvider: Send + Sync + 'static {
    /// Returns the current credential.
    fn resolve(&self) -> CredentialFuture;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> CredentialFuture + Send + Sync + 'static,
{
    fn resolve(&self) -> CredentialFuture {
        self()
    }
}

/// Provider that never presents a credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn resolve(&self) -> CredentialFuture {
        futures_util::future::ready(Ok(None)).boxed()
    }
}

/// Provider returning a fixed token.
#[derive(Clone)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    /// Wraps `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl CredentialProvider for StaticCredentials {
    fn resolve(&self) -> CredentialFuture {
        futures_util::future::ready(Ok(Some(self.token.clone()))).boxed()
    }
}

/// Returns `base` with `param=<token>` set in its query string.
///
/// An existing `param` pair is replaced; other pairs are kept in order.
/// With no token the base target is returned unchanged.
#[must_use]
pub fn authorize_target(base: &Url, param: &str, token: Option<&str>) -> Url {
    let Some(token) = token else {
        return base.clone();
    };

    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut target = base.clone();
    target.set_query(None);
    {
        let mut pairs = target.query_pairs_mut();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
        pairs.append_pair(param, token);
    }
    target
}
