use log::{debug, error};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::dashboard::{DashboardSnapshot, BREWING_MODE, STANDBY_MODE};
use crate::error::{Error, Result};
use crate::installation_key::{InstallationKey, ParsedInstallationKey};
use crate::session::{Session, SessionToken};
use crate::transport::{read_payload, DEFAULT_BASE_URL};

/// One authenticated call against the cloud API
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub url: String,
    pub method: Method,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            method: Method::POST,
            body: Some(body),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MachineCommand {
    pub mode: String,
}

impl MachineCommand {
    pub fn turn_on() -> Self {
        Self {
            mode: BREWING_MODE.to_string(),
        }
    }

    pub fn turn_off() -> Self {
        Self {
            mode: STANDBY_MODE.to_string(),
        }
    }

    pub fn power(enabled: bool) -> Self {
        if enabled {
            Self::turn_on()
        } else {
            Self::turn_off()
        }
    }
}

/// Client for the La Marzocco cloud holding exactly one session.
///
/// Every device operation goes through [`api_call`](Self::api_call), which
/// attaches a bearer token obtained from the session.
pub struct LaMarzoccoClient {
    session: Session,
}

impl LaMarzoccoClient {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        installation_key: &InstallationKey,
    ) -> Result<Self> {
        Self::new_with_base_url(
            username,
            password,
            installation_key,
            DEFAULT_BASE_URL.to_string(),
        )
    }

    /// Client against a custom API root, e.g. a mock server
    pub fn new_with_base_url(
        username: impl Into<String>,
        password: impl Into<String>,
        installation_key: &InstallationKey,
        base_url: String,
    ) -> Result<Self> {
        let key = installation_key.parse()?;
        Ok(Self::with_parsed_key(username, password, key, base_url))
    }

    pub fn with_parsed_key(
        username: impl Into<String>,
        password: impl Into<String>,
        key: ParsedInstallationKey,
        base_url: String,
    ) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            session: Session::new(
                reqwest::Client::new(),
                base_url,
                username.into(),
                password.into(),
                key,
            ),
        }
    }

    pub fn base_url(&self) -> &str {
        self.session.base_url()
    }

    pub fn installation_id(&self) -> &str {
        &self.session.installation_key().installation_id
    }

    /// The session token currently held, if any
    pub async fn session_token(&self) -> Option<SessionToken> {
        self.session.current_token().await
    }

    /// Register this installation's public key with the account
    pub async fn register_client(&self) -> Result<()> {
        self.session.register_client().await
    }

    pub async fn access_token(&self) -> Result<String> {
        self.session.access_token().await
    }

    pub async fn sign_in(&self) -> Result<SessionToken> {
        self.session.sign_in().await
    }

    pub async fn refresh_token(&self) -> Result<SessionToken> {
        self.session.refresh_token().await
    }

    /// Perform an authenticated call and return the decoded JSON response.
    ///
    /// Non-success statuses fail with [`Error::Api`] carrying the status and
    /// the decoded error body. No retries are attempted.
    pub async fn api_call(&self, request: ApiRequest) -> Result<Value> {
        let ApiRequest { url, method, body } = request;
        let token = self.session.access_token().await?;

        debug!("{} {}", method, url);

        let mut builder = self
            .session
            .http()
            .request(method, &url)
            .bearer_auth(token);
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        let (status, payload) = read_payload(builder.send().await?).await?;
        if status.is_success() {
            Ok(payload)
        } else {
            error!("Request to {} failed with status: {}", url, status);
            Err(Error::Api {
                status: status.as_u16(),
                payload,
            })
        }
    }

    pub async fn get_dashboard(&self, serial_number: &str) -> Result<DashboardSnapshot> {
        debug!("Fetching dashboard for machine: {}", serial_number);

        let url = format!("{}/things/{}/dashboard", self.base_url(), serial_number);
        let payload = self.api_call(ApiRequest::get(url)).await?;
        Ok(DashboardSnapshot::from(payload))
    }

    /// Ask the cloud to switch the machine on (brewing mode) or to standby.
    ///
    /// Success means the write was accepted, not that the machine changed
    /// state; poll the dashboard to confirm.
    pub async fn set_power(&self, serial_number: &str, enabled: bool) -> Result<Value> {
        let command = MachineCommand::power(enabled);
        debug!("Sending command to {}: {:?}", serial_number, command);

        let url = format!(
            "{}/things/{}/command/CoffeeMachineChangeMode",
            self.base_url(),
            serial_number
        );
        self.api_call(ApiRequest::post(url, serde_json::to_value(&command)?))
            .await
    }
}
