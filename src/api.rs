// API client module: a small blocking HTTP client that submits an
// assembly's FASTA text to the rMLST sequence-identification endpoint.
// It is intentionally small and synchronous; one process handles one
// assembly per invocation.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::oauth::OauthSigner;

/// The rMLST species-identification scheme id on every database.
const SCHEME_ID: u32 = 1;

/// Request body for the sequence-identification endpoint. The whole
/// FASTA text travels base64-encoded in one JSON field.
#[derive(Serialize, Debug)]
struct SequenceQuery {
    base64: bool,
    details: bool,
    sequence: String,
}

/// Status and raw body of a service response. Non-200 is data here, not
/// an error: "no prediction" and "server error" need different
/// user-facing messages upstream.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub text: String,
}

impl ApiResponse {
    pub fn new(status: u16, text: String) -> Self {
        ApiResponse { status, text }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Decode the body as JSON; a non-JSON body is a transport error.
    pub fn json(&self) -> Result<Value, Error> {
        serde_json::from_str(&self.text)
            .map_err(|_| Error::Transport(format!("server returned a non-JSON body: {}", self.text)))
    }
}

/// Blocking client holding the REST root, the target database and the
/// configured timeout.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    db: String,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        db: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(ApiClient {
            client,
            base_url: base_url.into(),
            db: db.into(),
        })
    }

    pub fn sequence_endpoint(&self) -> String {
        format!(
            "{}/db/{}/schemes/{}/sequence",
            self.base_url, self.db, SCHEME_ID
        )
    }

    /// POST the encoded sequence. With a signer the request carries an
    /// OAuth Authorization header; without one it is the anonymous kiosk
    /// call. Network failures are transport errors; the HTTP status is
    /// returned to the caller for interpretation.
    pub fn submit(&self, fasta: &str, signer: Option<&OauthSigner>) -> Result<ApiResponse, Error> {
        let url = self.sequence_endpoint();
        let payload = SequenceQuery {
            base64: true,
            details: true,
            sequence: STANDARD.encode(fasta.as_bytes()),
        };
        let mut req = self.client.post(&url).json(&payload);
        if let Some(signer) = signer {
            req = req.header(AUTHORIZATION, signer.authorization_header("POST", &url));
        }
        let res = req
            .send()
            .map_err(|e| Error::Transport(format!("failed to reach {url}: {e}")))?;
        let status = res.status().as_u16();
        let text = res.text().unwrap_or_else(|_| "".into());
        Ok(ApiResponse::new(status, text))
    }
}
