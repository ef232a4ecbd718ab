use std::{net::SocketAddr, num::NonZeroU32, sync::Arc};

use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};

use super::auth::{resolve_user, ResolvedUser};
use crate::{
    config::Config,
    error::{AppError, AppResult},
    routes::AppState,
};

pub type KeyedRateLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Named throttle classes applied per route group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleScope {
    /// Unauthenticated callers, keyed by client IP
    Anon,
    /// Authenticated callers, keyed by user
    User,
    ReviewCreate,
    ReviewList,
    ReviewDetail,
}

impl ThrottleScope {
    pub fn name(self) -> &'static str {
        match self {
            ThrottleScope::Anon => "anon",
            ThrottleScope::User => "user",
            ThrottleScope::ReviewCreate => "review-create",
            ThrottleScope::ReviewList => "review-list",
            ThrottleScope::ReviewDetail => "review-detail",
        }
    }

    /// Whether this scope throttles the given caller at all
    fn applies_to(self, identity: &Identity) -> bool {
        match self {
            ThrottleScope::Anon => matches!(identity, Identity::Anonymous(_)),
            ThrottleScope::User => matches!(identity, Identity::User(_)),
            _ => true,
        }
    }
}

/// Who a request is counted against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User(i64),
    Anonymous(String),
}

impl Identity {
    fn key(&self) -> String {
        match self {
            Identity::User(id) => format!("user:{}", id),
            Identity::Anonymous(ip) => format!("ip:{}", ip),
        }
    }
}

fn limiter(per_minute: u32) -> KeyedRateLimiter {
    let burst = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
    RateLimiter::keyed(Quota::per_minute(burst))
}

/// One keyed limiter per throttle scope
pub struct Throttles {
    anon: KeyedRateLimiter,
    user: KeyedRateLimiter,
    review_create: KeyedRateLimiter,
    review_list: KeyedRateLimiter,
    review_detail: KeyedRateLimiter,
}

impl Throttles {
    pub fn from_config(config: &Config) -> Self {
        Self {
            anon: limiter(config.anon_rate_per_minute),
            user: limiter(config.user_rate_per_minute),
            review_create: limiter(config.review_create_rate_per_minute),
            review_list: limiter(config.review_list_rate_per_minute),
            review_detail: limiter(config.review_detail_rate_per_minute),
        }
    }

    fn limiter(&self, scope: ThrottleScope) -> &KeyedRateLimiter {
        match scope {
            ThrottleScope::Anon => &self.anon,
            ThrottleScope::User => &self.user,
            ThrottleScope::ReviewCreate => &self.review_create,
            ThrottleScope::ReviewList => &self.review_list,
            ThrottleScope::ReviewDetail => &self.review_detail,
        }
    }

    /// Counts one request against `scope`, failing once its quota is spent
    pub fn check(&self, scope: ThrottleScope, identity: &Identity) -> AppResult<()> {
        if !scope.applies_to(identity) {
            return Ok(());
        }

        let key = identity.key();
        self.limiter(scope).check_key(&key).map_err(|_| {
            tracing::warn!(scope = scope.name(), key = %key, "Rate limit exceeded");
            AppError::RateLimited(scope.name())
        })
    }
}

fn client_ip(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Applies `scopes` in order before running the handler.
///
/// The caller is authenticated here so user-keyed scopes see the real user;
/// an invalid token is throttled as anonymous and rejected later by the
/// handler's extractor.
pub async fn throttle_middleware(
    state: Arc<AppState>,
    scopes: &'static [ThrottleScope],
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = match resolve_user(request.headers(), &state).await {
        Ok(Some(user)) => {
            tracing::Span::current().record("user", user.username.as_str());
            let identity = Identity::User(user.id);
            request.extensions_mut().insert(ResolvedUser(Some(user)));
            identity
        }
        Ok(None) => {
            request.extensions_mut().insert(ResolvedUser(None));
            Identity::Anonymous(client_ip(&request))
        }
        Err(AppError::Unauthorized) => Identity::Anonymous(client_ip(&request)),
        Err(e) => return Err(e),
    };

    for scope in scopes {
        state.throttles.check(*scope, &identity)?;
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttles(per_minute: u32) -> Throttles {
        let config = Config {
            anon_rate_per_minute: per_minute,
            user_rate_per_minute: per_minute,
            review_create_rate_per_minute: per_minute,
            review_list_rate_per_minute: per_minute,
            review_detail_rate_per_minute: per_minute,
            ..Config::default()
        };
        Throttles::from_config(&config)
    }

    #[test]
    fn test_quota_is_enforced_per_key() {
        let throttles = throttles(2);
        let alice = Identity::User(1);
        let bob = Identity::User(2);

        assert!(throttles.check(ThrottleScope::ReviewCreate, &alice).is_ok());
        assert!(throttles.check(ThrottleScope::ReviewCreate, &alice).is_ok());
        assert!(matches!(
            throttles.check(ThrottleScope::ReviewCreate, &alice),
            Err(AppError::RateLimited("review-create"))
        ));
        assert!(throttles.check(ThrottleScope::ReviewCreate, &bob).is_ok());
    }

    #[test]
    fn test_scopes_are_independent() {
        let throttles = throttles(1);
        let caller = Identity::Anonymous("10.0.0.1".to_string());

        assert!(throttles.check(ThrottleScope::ReviewList, &caller).is_ok());
        assert!(throttles.check(ThrottleScope::ReviewDetail, &caller).is_ok());
        assert!(throttles.check(ThrottleScope::ReviewList, &caller).is_err());
    }

    #[test]
    fn test_anon_scope_skips_users() {
        let throttles = throttles(1);
        let user = Identity::User(7);
        for _ in 0..5 {
            assert!(throttles.check(ThrottleScope::Anon, &user).is_ok());
        }
    }

    #[test]
    fn test_user_scope_skips_anonymous() {
        let throttles = throttles(1);
        let anon = Identity::Anonymous("10.0.0.2".to_string());
        for _ in 0..5 {
            assert!(throttles.check(ThrottleScope::User, &anon).is_ok());
        }
    }

    #[test]
    fn test_zero_quota_still_admits_one() {
        let throttles = throttles(0);
        let anon = Identity::Anonymous("10.0.0.3".to_string());
        assert!(throttles.check(ThrottleScope::Anon, &anon).is_ok());
        assert!(throttles.check(ThrottleScope::Anon, &anon).is_err());
    }
}
