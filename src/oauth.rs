// OAuth1.0a credential lifecycle for the PubMLST REST API.
//
// The flow is the standard three-legged one: a short-lived request token,
// one interactive authorization step in the browser, then a durable
// access token. Protected calls are signed with a short-lived session
// token that is fetched fresh before every call and refreshed once more
// if the server still answers 401.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dialoguer::Input;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use sha1::Sha1;

use crate::api::ApiResponse;
use crate::config::{epoch_secs, CredentialRecord, CredentialStore};
use crate::error::Error;

type HmacSha1 = Hmac<Sha1>;

/// RFC 3986 unreserved characters pass through; everything else is
/// percent-encoded, as OAuth1.0a requires.
const OAUTH_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode(s: &str) -> String {
    utf8_percent_encode(s, OAUTH_ENCODE).to_string()
}

fn hmac_sha1_base64(key: &[u8], data: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC key");
    mac.update(data);
    STANDARD.encode(mac.finalize().into_bytes())
}

/// `METHOD&enc(url)&enc(sorted k=v pairs)` per RFC 5849 §3.4.1.
fn signature_base(method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut pairs: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect();
    pairs.sort();
    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(url),
        encode(&pairs.join("&"))
    )
}

/// Signs a single request. `token`/`token_secret` carry whichever token
/// the current leg of the flow uses (request, access or session);
/// `callback` and `verifier` are only set on the legs that need them.
#[derive(Debug, Clone, Default)]
pub struct OauthSigner {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub token: Option<String>,
    pub token_secret: Option<String>,
    pub callback: Option<String>,
    pub verifier: Option<String>,
}

impl OauthSigner {
    /// Value for the `Authorization` header of a signed request.
    pub fn authorization_header(&self, method: &str, url: &str) -> String {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        self.header_with(method, url, &nonce, epoch_secs())
    }

    fn oauth_params(&self, nonce: &str, timestamp: u64) -> Vec<(String, String)> {
        let mut params = vec![
            ("oauth_consumer_key".to_string(), self.consumer_key.clone()),
            ("oauth_nonce".to_string(), nonce.to_string()),
            ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_version".to_string(), "1.0".to_string()),
        ];
        if let Some(cb) = &self.callback {
            params.push(("oauth_callback".to_string(), cb.clone()));
        }
        if let Some(t) = &self.token {
            params.push(("oauth_token".to_string(), t.clone()));
        }
        if let Some(v) = &self.verifier {
            params.push(("oauth_verifier".to_string(), v.clone()));
        }
        params
    }

    fn header_with(&self, method: &str, url: &str, nonce: &str, timestamp: u64) -> String {
        let mut params = self.oauth_params(nonce, timestamp);
        let base = signature_base(method, url, &params);
        let key = format!(
            "{}&{}",
            encode(&self.consumer_secret),
            encode(self.token_secret.as_deref().unwrap_or(""))
        );
        let signature = hmac_sha1_base64(key.as_bytes(), base.as_bytes());
        params.push(("oauth_signature".to_string(), signature));
        let fields: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, encode(v)))
            .collect();
        format!("OAuth {}", fields.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub token: String,
    pub secret: String,
}

/// The three token endpoints of the remote service, as a trait so the
/// lifecycle logic can be driven by a fake in tests.
pub trait TokenService {
    fn request_token(&self, consumer_key: &str, consumer_secret: &str)
        -> Result<TokenPair, Error>;
    fn access_token(
        &self,
        consumer_key: &str,
        consumer_secret: &str,
        request: &TokenPair,
        verifier: &str,
    ) -> Result<TokenPair, Error>;
    fn session_token(
        &self,
        consumer_key: &str,
        consumer_secret: &str,
        access: &TokenPair,
    ) -> Result<TokenPair, Error>;
    fn authorize_url(&self, request_token: &str) -> String;
}

/// Where the user authorizes the client in a browser. This is the
/// interactive website, not the REST root, so it is not derived from
/// `--base-url`.
const AUTHORIZE_WEB_BASE: &str = "https://pubmlst.org/bigsdb";

/// Blocking implementation against `{base}/db/{db}/oauth/...`.
pub struct RestTokenService {
    client: Client,
    base_url: String,
    db: String,
}

impl RestTokenService {
    pub fn new(
        base_url: impl Into<String>,
        db: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(RestTokenService {
            client,
            base_url: base_url.into(),
            db: db.into(),
        })
    }

    fn fetch(
        &self,
        endpoint: &str,
        signer: &OauthSigner,
        failure: fn(String) -> Error,
    ) -> Result<TokenPair, Error> {
        let url = format!("{}/db/{}/oauth/{}", self.base_url, self.db, endpoint);
        let header = signer.authorization_header("GET", &url);
        let res = self
            .client
            .get(&url)
            .header(AUTHORIZATION, header)
            .send()
            .map_err(|e| failure(format!("{endpoint}: {e}")))?;
        let status = res.status();
        let text = res.text().unwrap_or_else(|_| "".into());
        if !status.is_success() {
            return Err(failure(format!("{endpoint}: {status} - {text}")));
        }
        let body: Value = serde_json::from_str(&text)
            .map_err(|_| failure(format!("{endpoint}: unexpected response: {text}")))?;
        let token = body.get("oauth_token").and_then(Value::as_str);
        let secret = body.get("oauth_token_secret").and_then(Value::as_str);
        match (token, secret) {
            (Some(t), Some(s)) => Ok(TokenPair {
                token: t.to_string(),
                secret: s.to_string(),
            }),
            _ => Err(failure(format!("{endpoint}: response missing token fields: {text}"))),
        }
    }
}

impl TokenService for RestTokenService {
    fn request_token(
        &self,
        consumer_key: &str,
        consumer_secret: &str,
    ) -> Result<TokenPair, Error> {
        let signer = OauthSigner {
            consumer_key: consumer_key.to_string(),
            consumer_secret: consumer_secret.to_string(),
            callback: Some("oob".to_string()),
            ..Default::default()
        };
        self.fetch("get_request_token", &signer, Error::Authentication)
    }

    fn access_token(
        &self,
        consumer_key: &str,
        consumer_secret: &str,
        request: &TokenPair,
        verifier: &str,
    ) -> Result<TokenPair, Error> {
        let signer = OauthSigner {
            consumer_key: consumer_key.to_string(),
            consumer_secret: consumer_secret.to_string(),
            token: Some(request.token.clone()),
            token_secret: Some(request.secret.clone()),
            verifier: Some(verifier.to_string()),
            ..Default::default()
        };
        self.fetch("get_access_token", &signer, Error::Authentication)
    }

    fn session_token(
        &self,
        consumer_key: &str,
        consumer_secret: &str,
        access: &TokenPair,
    ) -> Result<TokenPair, Error> {
        let signer = OauthSigner {
            consumer_key: consumer_key.to_string(),
            consumer_secret: consumer_secret.to_string(),
            token: Some(access.token.clone()),
            token_secret: Some(access.secret.clone()),
            ..Default::default()
        };
        self.fetch("get_session_token", &signer, Error::Session)
    }

    fn authorize_url(&self, request_token: &str) -> String {
        format!(
            "{}?db={}&page=authorizeClient&oauth_token={}",
            AUTHORIZE_WEB_BASE, self.db, request_token
        )
    }
}

/// Asks the user for the verification code shown after authorizing the
/// client. Pluggable so tests can supply a fixed verifier.
pub trait AuthPrompt {
    fn verifier(&mut self, authorize_url: &str) -> Result<String, Error>;
}

pub struct ConsolePrompt;

impl AuthPrompt for ConsolePrompt {
    fn verifier(&mut self, authorize_url: &str) -> Result<String, Error> {
        println!("Open the following URL in a browser and authorize this client:");
        println!("  {authorize_url}");
        let code: String = Input::new()
            .with_prompt("Verification code")
            .interact_text()
            .map_err(|e| Error::Authentication(format!("could not read verification code: {e}")))?;
        Ok(code.trim().to_string())
    }
}

/// Obtains and refreshes tokens, keeping the credential record and its
/// backing store in sync after every change.
pub struct Lifecycle<S, P, C> {
    service: S,
    prompt: P,
    store: C,
}

impl<S: TokenService, P: AuthPrompt, C: CredentialStore> Lifecycle<S, P, C> {
    pub fn new(service: S, prompt: P, store: C) -> Self {
        Lifecycle {
            service,
            prompt,
            store,
        }
    }

    pub fn load_record(&self) -> Result<CredentialRecord, Error> {
        self.store
            .load()
            .map_err(|e| Error::Configuration(format!("{e:#}")))
    }

    fn save_record(&self, record: &CredentialRecord) -> Result<(), Error> {
        self.store
            .save(record)
            .map_err(|e| Error::Configuration(format!("{e:#}")))
    }

    fn consumer(record: &CredentialRecord) -> Result<(String, String), Error> {
        match (&record.consumer_key, &record.consumer_secret) {
            (Some(k), Some(s)) => Ok((k.clone(), s.clone())),
            _ => Err(Error::Configuration(
                "consumer key and secret are required; pass --consumer-key/--consumer-secret once \
                 to store them"
                    .into(),
            )),
        }
    }

    /// Returns immediately if a durable access token is already present;
    /// otherwise runs the interactive three-legged authorization and
    /// persists the result.
    pub fn ensure_access_token(&mut self, record: &mut CredentialRecord) -> Result<(), Error> {
        if record.has_access_token() {
            return Ok(());
        }
        let (key, secret) = Self::consumer(record)?;
        log::info!("No access token on file; starting interactive authorization");
        let request = self.service.request_token(&key, &secret)?;
        let url = self.service.authorize_url(&request.token);
        let verifier = self.prompt.verifier(&url)?;
        let access = self.service.access_token(&key, &secret, &request, &verifier)?;
        record.access_token = Some(access.token);
        record.access_token_secret = Some(access.secret);
        record.clear_session();
        self.save_record(record)?;
        log::info!("Access token stored");
        Ok(())
    }

    /// Fetches a fresh session token signed with the access token and
    /// persists it with the current timestamp.
    pub fn refresh_session_token(&mut self, record: &mut CredentialRecord) -> Result<(), Error> {
        let (key, secret) = Self::consumer(record)?;
        let access = match (&record.access_token, &record.access_token_secret) {
            (Some(t), Some(s)) => TokenPair {
                token: t.clone(),
                secret: s.clone(),
            },
            _ => {
                return Err(Error::Configuration(
                    "no access token on file; run with --auth-only to authorize first".into(),
                ))
            }
        };
        let session = self.service.session_token(&key, &secret, &access)?;
        record.session_token = Some(session.token);
        record.session_token_secret = Some(session.secret);
        record.session_token_time = Some(epoch_secs());
        self.save_record(record)?;
        Ok(())
    }

    fn protected_signer(record: &CredentialRecord) -> Result<OauthSigner, Error> {
        let (key, secret) = Self::consumer(record)?;
        Ok(OauthSigner {
            consumer_key: key,
            consumer_secret: secret,
            token: record.session_token.clone(),
            token_secret: record.session_token_secret.clone(),
            ..Default::default()
        })
    }

    /// Session tokens are always fetched fresh before a protected call.
    /// If the call still comes back 401 the token is refreshed once more
    /// and the call retried exactly once; a second 401 is fatal.
    pub fn call_protected<F>(
        &mut self,
        record: &mut CredentialRecord,
        mut call: F,
    ) -> Result<ApiResponse, Error>
    where
        F: FnMut(&OauthSigner) -> Result<ApiResponse, Error>,
    {
        self.refresh_session_token(record)?;
        let response = call(&Self::protected_signer(record)?)?;
        if response.status != 401 {
            return Ok(response);
        }
        log::warn!("Server rejected the session token; refreshing and retrying once");
        self.refresh_session_token(record)?;
        let response = call(&Self::protected_signer(record)?)?;
        if response.status == 401 {
            return Err(Error::Authentication(format!(
                "still unauthorized after a fresh session token: {}",
                response.text
            )));
        }
        Ok(response)
    }
}
