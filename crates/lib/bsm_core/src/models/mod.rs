//! Domain models shared by the auth layer and its callers.

pub mod auth;
