//! Cookie service: set/clear httpOnly auth cookies.

use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

/// Cookie name for the access token.
pub const ACCESS_COOKIE: &str = "auth_token";
/// Cookie name for the refresh token.
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Shared attributes. A `max_age` of `None` makes a session cookie.
fn base(name: &str, value: &str, secure: bool, max_age: Option<Duration>) -> Cookie<'static> {
    let mut builder = Cookie::build((name.to_string(), value.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string());
    if let Some(max_age) = max_age {
        builder = builder.max_age(max_age);
    }
    builder.build()
}

/// Build a httpOnly cookie for the access token.
pub fn access_cookie(token: &str, max_age_secs: i64, secure: bool, persistent: bool) -> Cookie<'static> {
    let max_age = persistent.then(|| Duration::seconds(max_age_secs));
    base(ACCESS_COOKIE, token, secure, max_age)
}

/// Build a httpOnly cookie for the refresh token.
pub fn refresh_cookie(token: &str, max_age_days: i64, secure: bool, persistent: bool) -> Cookie<'static> {
    let max_age = persistent.then(|| Duration::days(max_age_days));
    base(REFRESH_COOKIE, token, secure, max_age)
}

/// Build expired cookie to clear the access token.
pub fn clear_access_cookie(secure: bool) -> Cookie<'static> {
    base(ACCESS_COOKIE, "", secure, Some(Duration::ZERO))
}

/// Build expired cookie to clear the refresh token.
pub fn clear_refresh_cookie(secure: bool) -> Cookie<'static> {
    base(REFRESH_COOKIE, "", secure, Some(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistent_access_cookie_attributes() {
        let cookie = access_cookie("tok", 900, true, true);
        assert_eq!(cookie.name(), ACCESS_COOKIE);
        assert_eq!(cookie.value(), "tok");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(900)));
    }

    #[test]
    fn session_refresh_cookie_has_no_max_age() {
        let cookie = refresh_cookie("tok", 30, false, false);
        assert_eq!(cookie.name(), REFRESH_COOKIE);
        assert_eq!(cookie.secure(), Some(false));
        assert!(cookie.max_age().is_none());
    }

    #[test]
    fn clearing_cookies_expire_immediately() {
        assert_eq!(clear_access_cookie(false).max_age(), Some(Duration::ZERO));
        assert_eq!(clear_refresh_cookie(false).value(), "");
    }
}
