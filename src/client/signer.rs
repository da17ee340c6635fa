//! Request signing seam. Credential discovery belongs to the host; the
//! provider only needs something that decorates outgoing requests.

use reqwest::RequestBuilder;

/// Attaches credentials to an outgoing request
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: RequestBuilder) -> RequestBuilder;
}

/// Sends a pre-issued IAM token as `X-Auth-Token`
pub struct TokenSigner {
    token: String,
}

impl TokenSigner {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self { token: token.into() }
    }
}

impl RequestSigner for TokenSigner {
    fn sign(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("X-Auth-Token", &self.token)
    }
}

/// Leaves requests untouched; used against local endpoints
pub struct AnonymousSigner;

impl RequestSigner for AnonymousSigner {
    fn sign(&self, request: RequestBuilder) -> RequestBuilder {
        request
    }
}
