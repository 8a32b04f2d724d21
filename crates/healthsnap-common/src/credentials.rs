//! Resolved credentials handed to collectors and uploaders.
//!
//! Loading and rotation happen outside this crate; these types only carry
//! what the signing and bearer-auth paths consume.

/// Static AWS access key pair, optionally with a session token for
/// temporary credentials.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// No credential could be obtained from any configured source.
    #[error("Credentials unavailable: {0}")]
    Unavailable(String),

    /// A credential source responded with something that is not a credential.
    #[error("Invalid credentials: {0}")]
    Invalid(String),
}

/// Supplier of OAuth2 bearer tokens for Google APIs.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns a token valid for at least the next request.
    async fn token(&self) -> Result<String, CredentialError>;
}

/// A fixed bearer token, e.g. from `gcloud auth print-access-token`.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait::async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, CredentialError> {
        if self.0.trim().is_empty() {
            return Err(CredentialError::Invalid("empty access token".to_string()));
        }
        Ok(self.0.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_secrets() {
        let creds = AwsCredentials::new("AKIDEXAMPLE", "super-secret").with_session_token("tok");
        let out = format!("{creds:?}");

        assert!(out.contains("AKIDEXAMPLE"));
        assert!(!out.contains("super-secret"));
        assert!(!out.contains("tok\""));
    }

    #[tokio::test]
    async fn static_token_is_trimmed_and_must_be_non_empty() {
        assert_eq!(StaticToken::new(" ya29.abc\n").token().await.unwrap(), "ya29.abc");
        assert!(StaticToken::new("  ").token().await.is_err());
    }
}
