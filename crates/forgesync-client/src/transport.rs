//! Transport seam between the session and a concrete hub.
//!
//! The session speaks call descriptors; how they reach the hub is the
//! transport's business. `HttpTransport` posts XML-RPC over HTTP(S);
//! `MockHub` (mock.rs) answers in-process for tests.

use crate::call::{CallDescriptor, CallOutcome};
use crate::xmlrpc;
use forgesync_core::{Error, HubProfile, Result};

/// Pluggable hub transport. Executes a whole batch; per-call faults are
/// outcomes, transport-level failures are errors.
#[async_trait::async_trait]
pub trait HubTransport: Send + Sync {
    async fn multicall(&self, calls: &[CallDescriptor]) -> Result<Vec<CallOutcome>>;

    /// Where this transport points, for diagnostics.
    fn endpoint(&self) -> String;
}

/// XML-RPC over HTTP(S) via reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(profile: &HubProfile) -> Result<Self> {
        let url = profile
            .url
            .clone()
            .ok_or_else(|| Error::Config("no hub url configured".into()))?;

        let mut builder = reqwest::Client::builder();
        if profile.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(token) = &profile.token {
            let mut headers = reqwest::header::HeaderMap::new();
            let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::Config(format!("invalid hub token: {}", e)))?;
            auth.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, auth);
            builder = builder.default_headers(headers);
        }
        let client = builder
            .build()
            .map_err(|e| Error::transport_from("failed to build http client", Box::new(e)))?;

        Ok(Self { client, url })
    }
}

#[async_trait::async_trait]
impl HubTransport for HttpTransport {
    async fn multicall(&self, calls: &[CallDescriptor]) -> Result<Vec<CallOutcome>> {
        let body = xmlrpc::encode_multicall(calls)?;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::transport_from(format!("post to {} failed", self.url), Box::new(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(format!(
                "hub returned http {} from {}",
                status, self.url
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::transport_from("failed to read hub response", Box::new(e)))?;
        xmlrpc::decode_multicall(&text, calls.len())
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}
