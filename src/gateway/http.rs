use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::debug;

use super::{SessionGateway, StartReply, StatusReply};
use crate::errors::GatewayError;

// -----------------------------------------------------------------------------
// ----- HttpGateway -----------------------------------------------------------

/// JSON-over-HTTP client for the gateway's `start`, `status` and
/// `disconnect` endpoints.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    base_url: String,
    token: Option<SecretString>,
    client: reqwest::Client,
}

// -----------------------------------------------------------------------------
// ----- HttpGateway: Static ---------------------------------------------------

impl HttpGateway {
    pub fn new(
        base_url: &str,
        token: Option<SecretString>,
        request_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::unavailable(format!("http client setup: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- HttpGateway: SessionGateway -------------------------------------------

#[async_trait]
impl SessionGateway for HttpGateway {
    async fn start(&self, hint: &str) -> Result<StartReply, GatewayError> {
        let mut reply: StartReply = self.post("start", &StartRequest { hint }).await?;

        if reply.session_name.trim().is_empty() {
            return Err(GatewayError::rejected("start returned an empty sessionName"));
        }

        reply.pairing_image = non_empty(reply.pairing_image);
        Ok(reply)
    }

    async fn status(&self, session_name: &str, force: bool) -> Result<StatusReply, GatewayError> {
        let mut reply: StatusReply = self
            .post("status", &StatusRequest {
                session_name,
                force,
            })
            .await?;

        reply.pairing_image = non_empty(reply.pairing_image);
        Ok(reply)
    }

    async fn disconnect(&self, session_name: &str) -> Result<(), GatewayError> {
        let reply: DisconnectReply = self
            .post("disconnect", &DisconnectRequest { session_name })
            .await?;

        if !reply.ack {
            return Err(GatewayError::rejected(format!(
                "disconnect of {session_name} was not acknowledged"
            )));
        }

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- HttpGateway: Private --------------------------------------------------

impl HttpGateway {
    async fn post<B, R>(&self, endpoint: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!("gateway POST {url}");

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = self.token.as_ref() {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::unavailable(format!("{endpoint}: {e}")))?;

        let status = response.status();
        if is_transient_status(status) {
            return Err(GatewayError::unavailable(format!(
                "{endpoint}: provider answered {status}"
            )));
        }

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GatewayError::rejected(format!(
                "{endpoint}: provider answered {status}: {detail}"
            )));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| GatewayError::rejected(format!("{endpoint}: malformed reply: {e}")))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn non_empty(image: Option<String>) -> Option<String> {
    image.filter(|payload| !payload.trim().is_empty())
}

// -----------------------------------------------------------------------------
// ----- Internal: Wire format -------------------------------------------------

#[derive(Debug, Serialize)]
struct StartRequest<'a> {
    hint: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusRequest<'a> {
    session_name: &'a str,
    force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DisconnectRequest<'a> {
    session_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct DisconnectReply {
    #[serde(default)]
    ack: bool,
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
