//! Route paths.

pub const GET_HEALTH: &str = "/health";
pub const POST_AUTH_LOGIN: &str = "/auth/login";
pub const POST_AUTH_REFRESH_TOKEN: &str = "/auth/refresh-token";
pub const POST_AUTH_REFRESH: &str = "/auth/refresh";
pub const POST_AUTH_LOGOUT: &str = "/auth/logout";
pub const POST_AUTH_LOGOUT_ALL: &str = "/auth/logout-all";
pub const POST_AUTH_FORGOT_PASSWORD: &str = "/auth/forgot-password";
pub const POST_AUTH_RESET_PASSWORD: &str = "/auth/reset-password/{token}";
pub const GET_AUTH_ME: &str = "/auth/me";
pub const POST_AUTH_USERS_ID_REVOKE_SESSIONS: &str = "/auth/users/{id}/revoke-sessions";
