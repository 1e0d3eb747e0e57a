use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use log::{debug, info, warn};
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::installation_key::ParsedInstallationKey;
use crate::proof;
use crate::transport::read_payload;

/// Tokens this close to expiry are renewed before use
pub const EXPIRY_MARGIN_SECONDS: i64 = 30;
/// Lifetime assumed when the access token has no readable `exp` claim
pub const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 3600;

#[derive(Serialize)]
struct SigninRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshTokenRequest<'a> {
    username: &'a str,
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct RegistrationRequest<'a> {
    pk: &'a str,
    #[serde(rename = "installationId")]
    installation_id: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "refreshToken")]
    refresh_token: Option<String>,
}

/// JWT claims we read from access tokens
#[derive(Debug, Deserialize)]
struct Claims {
    exp: i64,
}

/// Short-lived credentials for one signed-in session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    fn from_response(
        response: TokenResponse,
        previous_refresh_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = token_expiry(&response.access_token)
            .unwrap_or_else(|| now + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECONDS));
        let refresh_token = response
            .refresh_token
            .or_else(|| previous_refresh_token.map(str::to_string))
            .unwrap_or_default();

        Self {
            access_token: response.access_token,
            refresh_token,
            expires_at,
        }
    }

    /// Whether the token outlives the safety margin from `now`
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > Duration::seconds(EXPIRY_MARGIN_SECONDS)
    }
}

/// Read the `exp` claim of a JWT access token.
///
/// The signature is not checked: the token is opaque to us and only the
/// server can validate it.
pub fn token_expiry(access_token: &str) -> Option<DateTime<Utc>> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    let token_data =
        decode::<Claims>(access_token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    DateTime::from_timestamp(token_data.claims.exp, 0)
}

enum SessionState {
    Unauthenticated,
    Authenticated(SessionToken),
}

/// Owns the bearer token for one account and installation.
///
/// Acquisition, sign-in and refresh all run under one async lock held across
/// the network exchange. While a renewal is in flight (the refreshing state)
/// every other requester waits on the lock and then reuses its result, so at
/// most one sign-in or refresh is ever outstanding.
pub struct Session {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    key: ParsedInstallationKey,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        username: String,
        password: String,
        key: ParsedInstallationKey,
    ) -> Self {
        Self {
            http,
            base_url,
            username,
            password,
            key,
            state: Mutex::new(SessionState::Unauthenticated),
        }
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn installation_key(&self) -> &ParsedInstallationKey {
        &self.key
    }

    /// The token currently held, if signed in.
    ///
    /// Waits on the session lock, so while a renewal is in flight this
    /// returns only once that exchange has settled.
    pub async fn current_token(&self) -> Option<SessionToken> {
        match &*self.state.lock().await {
            SessionState::Authenticated(token) => Some(token.clone()),
            SessionState::Unauthenticated => None,
        }
    }

    /// Bind this installation's public key to the account.
    ///
    /// Done once per installation, normally right after the key is generated.
    pub async fn register_client(&self) -> Result<()> {
        debug!("Registering installation {}", self.key.installation_id);

        let body = RegistrationRequest {
            pk: self.key.public_key_b64(),
            installation_id: &self.key.installation_id,
        };
        let request = with_headers(
            self.http
                .post(format!("{}/auth/init", self.base_url))
                .json(&body),
            proof::registration_headers(&self.key),
        );

        let (status, payload) = read_payload(request.send().await?).await?;
        if !status.is_success() {
            warn!("Installation registration failed with status: {}", status);
            return Err(Error::Auth {
                status: status.as_u16(),
                payload,
            });
        }

        info!("Registered installation {}", self.key.installation_id);
        Ok(())
    }

    /// Return a usable access token, signing in or refreshing only when needed
    pub async fn access_token(&self) -> Result<String> {
        let mut state = self.state.lock().await;

        if let SessionState::Authenticated(token) = &*state {
            if token.is_fresh(Utc::now()) {
                return Ok(token.access_token.clone());
            }
            debug!("Access token expires at {}, renewing", token.expires_at);
        }

        let token = self.renew(&mut state).await?;
        Ok(token.access_token)
    }

    /// Sign in with the account credentials and hold the new token.
    ///
    /// A failed sign-in leaves any previously held token in place.
    pub async fn sign_in(&self) -> Result<SessionToken> {
        let mut state = self.state.lock().await;
        let token = self.request_sign_in().await?;
        *state = SessionState::Authenticated(token.clone());
        Ok(token)
    }

    /// Renew the session regardless of the held token's expiry.
    ///
    /// Uses the refresh token when one is held and falls back to a full
    /// sign-in if the refresh is rejected. With no session it just signs in.
    pub async fn refresh_token(&self) -> Result<SessionToken> {
        let mut state = self.state.lock().await;
        self.renew(&mut state).await
    }

    async fn renew(&self, state: &mut SessionState) -> Result<SessionToken> {
        let result = match state {
            SessionState::Authenticated(current) if !current.refresh_token.is_empty() => {
                match self.request_refresh(&current.refresh_token).await {
                    Ok(token) => Ok(token),
                    Err(err) => {
                        warn!("Token refresh failed, signing in again: {}", err);
                        self.request_sign_in().await
                    }
                }
            }
            _ => self.request_sign_in().await,
        };

        // The old token stays in place until the exchange settles
        match result {
            Ok(token) => {
                *state = SessionState::Authenticated(token.clone());
                Ok(token)
            }
            Err(err) => {
                *state = SessionState::Unauthenticated;
                Err(err)
            }
        }
    }

    async fn request_sign_in(&self) -> Result<SessionToken> {
        debug!("Signing in as {}", self.username);

        let body = SigninRequest {
            username: &self.username,
            password: &self.password,
        };
        let request = with_headers(
            self.http
                .post(format!("{}/auth/signin", self.base_url))
                .json(&body),
            proof::signed_request_headers(&self.key),
        );

        let token = read_token(request.send().await?, None).await?;
        info!("Authentication successful for user: {}", self.username);
        Ok(token)
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<SessionToken> {
        debug!("Refreshing access token for {}", self.username);

        let body = RefreshTokenRequest {
            username: &self.username,
            refresh_token,
        };
        let request = with_headers(
            self.http
                .post(format!("{}/auth/refreshtoken", self.base_url))
                .json(&body),
            proof::signed_request_headers(&self.key),
        );

        let token = read_token(request.send().await?, Some(refresh_token)).await?;
        debug!("Access token refreshed, expires at {}", token.expires_at);
        Ok(token)
    }
}

fn with_headers(request: RequestBuilder, headers: Vec<(&'static str, String)>) -> RequestBuilder {
    headers
        .into_iter()
        .fold(request, |request, (name, value)| request.header(name, value))
}

async fn read_token(
    response: Response,
    previous_refresh_token: Option<&str>,
) -> Result<SessionToken> {
    let (status, payload) = read_payload(response).await?;

    if !status.is_success() {
        debug!("Authentication failed with status: {}", status);
        return Err(Error::Auth {
            status: status.as_u16(),
            payload,
        });
    }

    let response: TokenResponse = serde_json::from_value(payload)?;
    Ok(SessionToken::from_response(
        response,
        previous_refresh_token,
        Utc::now(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: i64,
    }

    fn jwt_expiring_at(exp: i64) -> String {
        let claims = TestClaims {
            sub: "me@example.com".to_string(),
            exp,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test")).unwrap()
    }

    #[test]
    fn test_token_expiry_reads_exp_claim() {
        let exp = Utc::now().timestamp() + 600;
        let token = jwt_expiring_at(exp);
        assert_eq!(token_expiry(&token).unwrap().timestamp(), exp);
    }

    #[test]
    fn test_token_expiry_accepts_already_expired_token() {
        let exp = Utc::now().timestamp() - 600;
        assert_eq!(token_expiry(&jwt_expiring_at(exp)).unwrap().timestamp(), exp);
    }

    #[test]
    fn test_token_expiry_ignores_opaque_tokens() {
        assert!(token_expiry("simple_test_token").is_none());
        assert!(token_expiry("eyJhbGciOiJIUzUxMiJ9.invalid.token").is_none());
    }

    #[test]
    fn test_token_freshness_margin() {
        let now = Utc::now();
        let token = |secs| SessionToken {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: now + Duration::seconds(secs),
        };

        assert!(token(3600).is_fresh(now));
        assert!(token(EXPIRY_MARGIN_SECONDS + 1).is_fresh(now));
        assert!(!token(EXPIRY_MARGIN_SECONDS).is_fresh(now));
        assert!(!token(1).is_fresh(now));
        assert!(!token(-10).is_fresh(now));
    }

    #[test]
    fn test_token_from_opaque_response_gets_default_lifetime() {
        let now = Utc::now();
        let response: TokenResponse =
            serde_json::from_value(json!({ "accessToken": "token-a", "refreshToken": "token-r" }))
                .unwrap();

        let token = SessionToken::from_response(response, None, now);
        assert_eq!(token.access_token, "token-a");
        assert_eq!(token.refresh_token, "token-r");
        assert_eq!(
            token.expires_at,
            now + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECONDS)
        );
    }

    #[test]
    fn test_refresh_response_without_refresh_token_keeps_previous() {
        let response: TokenResponse =
            serde_json::from_value(json!({ "accessToken": "new" })).unwrap();

        let token = SessionToken::from_response(response, Some("refresh-1"), Utc::now());
        assert_eq!(token.access_token, "new");
        assert_eq!(token.refresh_token, "refresh-1");
    }

    #[test]
    fn test_request_bodies_use_cloud_field_names() {
        let signin = serde_json::to_value(SigninRequest {
            username: "user",
            password: "pass",
        })
        .unwrap();
        assert_eq!(signin, json!({ "username": "user", "password": "pass" }));

        let refresh = serde_json::to_value(RefreshTokenRequest {
            username: "user",
            refresh_token: "r",
        })
        .unwrap();
        assert_eq!(refresh, json!({ "username": "user", "refreshToken": "r" }));

        let registration = serde_json::to_value(RegistrationRequest {
            pk: "pk",
            installation_id: "id",
        })
        .unwrap();
        assert_eq!(registration, json!({ "pk": "pk", "installationId": "id" }));
    }
}
