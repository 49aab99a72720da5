//! Character lookups
//!
//! The marriage core does not model characters; it consumes identifiers
//! and asks the platform's character service for existence and level when
//! validating proposals. The lookup sits behind a narrow trait so the
//! processor never sees HTTP.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::CharacterServiceConfig;
use crate::error::{MarriageError, MarriageResult};
use crate::tenant::{
    Tenant, HEADER_MAJOR_VERSION, HEADER_MINOR_VERSION, HEADER_REGION, HEADER_SPAN_ID,
    HEADER_TENANT_ID,
};

/// The character attributes the marriage rules need
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Character {
    pub id: u32,
    pub level: u16,
}

/// External character lookup seam
#[async_trait]
pub trait CharacterDirectory: Send + Sync {
    /// Returns `None` when the character does not exist in the tenant
    async fn find(&self, tenant: &Tenant, character_id: u32)
        -> MarriageResult<Option<Character>>;
}

#[derive(Debug, Deserialize)]
struct CharacterDocument {
    data: CharacterResource,
}

#[derive(Debug, Deserialize)]
struct CharacterResource {
    id: String,
    attributes: CharacterAttributes,
}

#[derive(Debug, Deserialize)]
struct CharacterAttributes {
    level: u16,
}

/// Character service client over its JSON resource API
pub struct HttpCharacterDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCharacterDirectory {
    pub fn new(config: &CharacterServiceConfig) -> MarriageResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| MarriageError::CharacterService(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CharacterDirectory for HttpCharacterDirectory {
    async fn find(
        &self,
        tenant: &Tenant,
        character_id: u32,
    ) -> MarriageResult<Option<Character>> {
        let url = format!("{}/api/characters/{}", self.base_url, character_id);
        let mut request = self
            .client
            .get(&url)
            .header(HEADER_TENANT_ID, tenant.id.to_string())
            .header(HEADER_REGION, tenant.region.as_str())
            .header(HEADER_MAJOR_VERSION, tenant.major_version.to_string())
            .header(HEADER_MINOR_VERSION, tenant.minor_version.to_string());
        if let Some(span_id) = &tenant.span_id {
            request = request.header(HEADER_SPAN_ID, span_id.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| MarriageError::CharacterService(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(MarriageError::CharacterService(format!(
                "character service returned {} for {}",
                response.status(),
                url
            )));
        }

        let document: CharacterDocument = response
            .json()
            .await
            .map_err(|e| MarriageError::CharacterService(e.to_string()))?;
        let id = document
            .data
            .id
            .parse::<u32>()
            .map_err(|e| MarriageError::CharacterService(format!("bad character id: {e}")))?;
        Ok(Some(Character {
            id,
            level: document.data.attributes.level,
        }))
    }
}
