//! Storage key constants.

/// Keys persisted in the session vault.
pub struct StorageKeys;

impl StorageKeys {
    /// OAuth access token
    pub const ACCESS_TOKEN: &'static str = "access_token";

    /// OAuth refresh token
    pub const REFRESH_TOKEN: &'static str = "refresh_token";

    /// OIDC id token
    pub const ID_TOKEN: &'static str = "id_token";

    /// Access token expiry (RFC 3339, UTC)
    pub const EXPIRES_AT: &'static str = "expires_at";

    /// Serialized DPoP private JWK
    pub const DPOP_JWK: &'static str = "dpop_jwk";

    /// Every key owned by the session, in clear order.
    pub const ALL: [&'static str; 5] = [
        Self::EXPIRES_AT,
        Self::ACCESS_TOKEN,
        Self::REFRESH_TOKEN,
        Self::ID_TOKEN,
        Self::DPOP_JWK,
    ];
}
