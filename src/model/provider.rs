use serde::{Deserialize, Serialize};

/// Stored credentials for a model provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: Option<i64>,
    pub name: String,
    pub api_key: String,
    /// Overrides the built-in base URL for `name` when set.
    pub api_url: Option<String>,
}

impl Provider {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            api_key: api_key.into(),
            api_url: None,
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }
}

// Keys never reach logs.
impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("api_key", &"***")
            .field("api_url", &self.api_url)
            .finish()
    }
}
