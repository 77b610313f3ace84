use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{ApiResponse, AvatarPresence, PersonalityWithAvatar, PresenceSource};
use crate::{AvatarError, Result};

/// Bulk listing served by the personalities backend at
/// `{api_base}/personalities/avatars`.
pub struct HttpPresenceSource {
    client: Client,
    endpoint: Url,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

impl HttpPresenceSource {
    pub fn new(api_base: &Url) -> Result<Self> {
        let mut endpoint = api_base.clone();
        endpoint
            .path_segments_mut()
            .map_err(|_| {
                AvatarError::Config(format!(
                    "{} cannot be used as a base URL",
                    api_base
                ))
            })?
            .pop_if_empty()
            .extend(["personalities", "avatars"]);

        let client = Client::builder().build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// All personalities together with their avatar flag and shows.
    pub async fn fetch_personalities(
        &self,
    ) -> Result<Vec<PersonalityWithAvatar>> {
        log::debug!("loading avatar information from {}", self.endpoint);
        let response = self
            .client
            .get(self.endpoint.clone())
            .send()
            .await
            .map_err(|e| AvatarError::Initialization(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AvatarError::Initialization(e.to_string()))?;
        parse_listing(status, &body)
    }
}

fn parse_listing(
    status: StatusCode,
    body: &str,
) -> Result<Vec<PersonalityWithAvatar>> {
    if !status.is_success() {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        let message = parsed.error.unwrap_or_else(|| {
            format!("HTTP error! status: {}", status.as_u16())
        });
        return Err(AvatarError::Initialization(message));
    }

    let envelope: ApiResponse<Vec<PersonalityWithAvatar>> =
        serde_json::from_str(body).map_err(|e| {
            AvatarError::Initialization(format!("malformed listing: {}", e))
        })?;
    if !envelope.success {
        return Err(AvatarError::Initialization(
            envelope
                .error
                .unwrap_or_else(|| "backend reported a failure".to_owned()),
        ));
    }
    Ok(envelope.data.unwrap_or_default())
}

#[async_trait]
impl PresenceSource for HttpPresenceSource {
    async fn fetch_presence(&self) -> Result<Vec<AvatarPresence>> {
        let rows = self.fetch_personalities().await?;
        Ok(rows.into_iter().map(AvatarPresence::from).collect())
    }
}
