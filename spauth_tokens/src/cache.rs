//! Early-refresh caching of access tokens

use std::error;

use aliri_clock::{Clock, System};
use async_trait::async_trait;
use spauth::AccessToken;
use tokio::sync::Mutex;

use crate::{AccessTokenRecord, Renewal, TokenKind};

/// A means of obtaining a fresh token of a given kind
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    /// The error type returned when renewal fails in a way the caller must see
    type Error: error::Error + Send + Sync + 'static;

    /// Obtains a fresh token of the given kind
    ///
    /// Failures that should read as "no token" rather than as an error, such as an
    /// unreachable issuance service, are reported as [`Renewal::Unavailable`].
    async fn renew(&self, kind: TokenKind) -> Result<Renewal, Self::Error>;
}

/// A cache holding one access token for each [`TokenKind`]
///
/// Each kind has its own lock. A caller that finds its token stale holds the lock for
/// that kind until renewal finishes, so concurrent callers wait for and then share the
/// renewed token rather than each issuing their own. A slot is only overwritten once a
/// renewal succeeds.
#[derive(Debug)]
pub struct AccessTokenCache<C = System> {
    slots: [Mutex<AccessTokenRecord>; 4],
    clock: C,
}

impl AccessTokenCache<System> {
    /// Constructs an empty cache
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
            clock: System,
        }
    }
}

impl Default for AccessTokenCache<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> AccessTokenCache<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> AccessTokenCache<D> {
        AccessTokenCache {
            slots: self.slots,
            clock,
        }
    }

    /// A mutable reference to the clock
    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// A snapshot of the record held for `kind`
    pub async fn record(&self, kind: TokenKind) -> AccessTokenRecord {
        self.slots[kind.index()].lock().await.clone()
    }
}

impl<C: Clock + Send + Sync> AccessTokenCache<C> {
    /// Returns the cached token for `kind`, renewing it first if it is no longer valid
    ///
    /// Returns `Ok(None)` when the cached token is unusable and the renewer reports that
    /// no fresh token is available.
    #[tracing::instrument(err, skip(self, renewer))]
    pub async fn get_or_renew<R: TokenRenewer + ?Sized>(
        &self,
        kind: TokenKind,
        renewer: &R,
    ) -> Result<Option<AccessToken>, R::Error> {
        let mut slot = self.slots[kind.index()].lock().await;

        if slot.is_valid_with_clock(&self.clock) {
            tracing::trace!("using cached access token");
            return Ok(slot.token().map(ToOwned::to_owned));
        }

        tracing::debug!("cached access token unusable; renewing");
        match renewer.renew(kind).await? {
            Renewal::Fresh(issued) => {
                *slot = AccessTokenRecord::from_issued(issued);
                tracing::debug!(expires_on = slot.expires_on().0, "cached renewed access token");
                Ok(slot.token().map(ToOwned::to_owned))
            }
            Renewal::Unavailable => {
                tracing::debug!("no access token available");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use aliri_clock::{TestClock, UnixTime};
    use color_eyre::Result;
    use spauth::IssuedToken;
    use thiserror::Error;
    use tracing_test::traced_test;

    use super::*;

    #[derive(Debug, Error)]
    #[error("renewal refused")]
    struct Refused;

    #[derive(Debug, Default)]
    struct CountingRenewer {
        calls: AtomicUsize,
        now: u64,
        unavailable: bool,
        refuse: bool,
    }

    #[async_trait]
    impl TokenRenewer for CountingRenewer {
        type Error = Refused;

        async fn renew(&self, kind: TokenKind) -> Result<Renewal, Self::Error> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::task::yield_now().await;

            if self.refuse {
                return Err(Refused);
            }
            if self.unavailable {
                return Ok(Renewal::Unavailable);
            }

            Ok(Renewal::Fresh(IssuedToken::new(
                AccessToken::new(format!("{}-{}", kind, call)),
                UnixTime(self.now),
                UnixTime(self.now + 3600),
            )))
        }
    }

    fn cache(now: u64) -> AccessTokenCache<TestClock> {
        AccessTokenCache::new().with_clock(TestClock::new(UnixTime(now)))
    }

    #[tokio::test]
    async fn valid_token_is_reused() -> Result<()> {
        let cache = cache(1000);
        let renewer = CountingRenewer {
            now: 1000,
            ..Default::default()
        };

        let first = cache.get_or_renew(TokenKind::UserHost, &renewer).await?;
        let second = cache.get_or_renew(TokenKind::UserHost, &renewer).await?;

        assert_eq!(first, second);
        assert_eq!(renewer.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn token_within_tolerance_is_renewed() -> Result<()> {
        let mut cache = cache(1000);
        let renewer = CountingRenewer {
            now: 1000,
            ..Default::default()
        };

        cache.get_or_renew(TokenKind::AppOnlyHost, &renewer).await?;
        cache.clock_mut().set(UnixTime(1000 + 3600 - 300));
        let renewed = cache.get_or_renew(TokenKind::AppOnlyHost, &renewer).await?;

        assert_eq!(renewer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            renewed.as_deref().map(|t| t.as_str()),
            Some("app-only/host-2")
        );
        Ok(())
    }

    #[tokio::test]
    async fn kinds_are_cached_independently() -> Result<()> {
        let cache = cache(1000);
        let renewer = CountingRenewer {
            now: 1000,
            ..Default::default()
        };

        cache.get_or_renew(TokenKind::UserHost, &renewer).await?;
        cache.get_or_renew(TokenKind::UserAppWeb, &renewer).await?;

        assert_eq!(renewer.calls.load(Ordering::SeqCst), 2);
        assert!(cache.record(TokenKind::AppOnlyHost).await.token().is_none());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn unavailable_renewal_keeps_slot_empty() -> Result<()> {
        let cache = cache(1000);
        let renewer = CountingRenewer {
            unavailable: true,
            ..Default::default()
        };

        assert!(cache.get_or_renew(TokenKind::UserHost, &renewer).await?.is_none());
        assert_eq!(cache.record(TokenKind::UserHost).await, AccessTokenRecord::empty());
        assert!(logs_contain("no access token available"));
        Ok(())
    }

    #[tokio::test]
    async fn failed_renewal_leaves_previous_record() -> Result<()> {
        let mut cache = cache(1000);
        let good = CountingRenewer {
            now: 1000,
            ..Default::default()
        };
        cache.get_or_renew(TokenKind::UserHost, &good).await?;
        let before = cache.record(TokenKind::UserHost).await;

        cache.clock_mut().set(UnixTime(10_000));
        let bad = CountingRenewer {
            refuse: true,
            ..Default::default()
        };
        assert!(cache.get_or_renew(TokenKind::UserHost, &bad).await.is_err());
        assert_eq!(cache.record(TokenKind::UserHost).await, before);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_renewal() -> Result<()> {
        let cache = Arc::new(cache(1000));
        let renewer = Arc::new(CountingRenewer {
            now: 1000,
            ..Default::default()
        });

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let renewer = Arc::clone(&renewer);
                tokio::spawn(async move {
                    cache.get_or_renew(TokenKind::UserHost, &*renewer).await
                })
            })
            .collect();

        for task in tasks {
            let token = task.await??;
            assert_eq!(token.as_deref().map(|t| t.as_str()), Some("user/host-1"));
        }
        assert_eq!(renewer.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
