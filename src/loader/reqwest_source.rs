//! Reqwest-based implementation of the `ConfigSource` trait.

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::{ConfigSource, FetchError};
use crate::flags::FlagSet;

/// Fetches the flag set with a single GET against a fixed endpoint.
#[derive(Clone, Debug)]
pub struct ReqwestConfigSource {
    client: Client,
    endpoint: Url,
}

impl ReqwestConfigSource {
    pub fn new(endpoint: Url) -> Result<Self, FetchError> {
        let client = Client::builder().build()?;
        Ok(Self { client, endpoint })
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(client: Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ConfigSource for ReqwestConfigSource {
    fn describe(&self) -> String {
        self.endpoint.to_string()
    }

    async fn fetch(&self) -> Result<FlagSet, FetchError> {
        let response = self.client.get(self.endpoint.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(FlagSet::from_json(&body)?)
    }
}
