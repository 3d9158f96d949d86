/// Supplies the bearer credential and contact identity for outbound requests.
///
/// Injected into the client instead of being read from ambient session state.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Bearer token for the `Authorization` header, if the caller is signed in.
    async fn bearer_token(&self) -> Option<String>;

    /// Stable contact/session identifier attached to chat requests.
    fn contact_id(&self) -> Option<String> {
        None
    }
}

/// Fixed credentials, for tests and the CLI.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials {
    token: Option<String>,
    contact_id: Option<String>,
}

impl StaticCredentials {
    /// No token and no contact id.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            contact_id: None,
        }
    }

    pub fn with_contact_id(mut self, contact_id: impl Into<String>) -> Self {
        self.contact_id = Some(contact_id.into());
        self
    }
}

#[async_trait::async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self) -> Option<String> {
        self.token.clone().filter(|t| !t.trim().is_empty())
    }

    fn contact_id(&self) -> Option<String> {
        self.contact_id.clone()
    }
}
