use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::client::{page_limit, CatalogClient, HealthStatus};
use super::model::{Mod, ModVersion};
use crate::core::error::{ManagerError, ManagerResult};
use crate::core::http::APP_USER_AGENT;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Catalog client for the REST server.
pub struct RestCatalog {
    client: Client,
    base_url: Url,
}

impl RestCatalog {
    pub fn new(base_url: &str) -> ManagerResult<Self> {
        let parsed = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| ManagerError::Other(format!("Invalid server URL {}: {}", base_url, e)))?;
        if parsed.cannot_be_a_base() {
            return Err(ManagerError::Other(format!(
                "Server URL {} cannot hold API paths",
                base_url
            )));
        }

        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: parsed,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Base URL extended by `segments`, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> ManagerResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ManagerError::Other(format!("{} cannot hold API paths", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET the endpoint at `segments` and decode JSON; 404 becomes `None`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> ManagerResult<Option<T>> {
        let url = self.endpoint(segments)?;
        debug!("GET {} {:?}", url, query);

        let response = self.client.get(url.clone()).query(query).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ManagerError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(Some(response.json().await?))
    }
}

fn page_query(
    limit: Option<usize>,
    after: Option<&str>,
    before: Option<&str>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![("limit", page_limit(limit).to_string())];
    if let Some(after) = after {
        query.push(("after", after.to_string()));
    }
    if let Some(before) = before {
        query.push(("before", before.to_string()));
    }
    query
}

/// The server omits `mod_id` on nested version payloads.
fn stamp_mod_id(version: &mut ModVersion, mod_id: &str) {
    if version.mod_id.is_empty() {
        version.mod_id = mod_id.to_string();
    }
}

#[async_trait]
impl CatalogClient for RestCatalog {
    async fn get_health(&self) -> ManagerResult<HealthStatus> {
        self.get_json(&["health"], &[])
            .await?
            .ok_or_else(|| ManagerError::Other(format!("{} has no health endpoint", self.base_url)))
    }

    async fn get_mod_list(
        &self,
        limit: Option<usize>,
        after: Option<&str>,
        before: Option<&str>,
    ) -> ManagerResult<Vec<Mod>> {
        Ok(self
            .get_json(&["mods"], &page_query(limit, after, before))
            .await?
            .unwrap_or_default())
    }

    async fn get_mod(&self, mod_id: &str) -> ManagerResult<Option<Mod>> {
        self.get_json(&["mods", mod_id], &[]).await
    }

    async fn get_mod_versions(
        &self,
        mod_id: &str,
        limit: Option<usize>,
        after: Option<&str>,
    ) -> ManagerResult<Vec<ModVersion>> {
        let versions: Option<Vec<ModVersion>> = self
            .get_json(&["mods", mod_id, "versions"], &page_query(limit, after, None))
            .await?;

        let mut versions = versions.ok_or_else(|| ManagerError::ModNotFound(mod_id.to_string()))?;
        versions.iter_mut().for_each(|v| stamp_mod_id(v, mod_id));
        Ok(versions)
    }

    async fn get_mod_version(
        &self,
        mod_id: &str,
        version_id: &str,
    ) -> ManagerResult<Option<ModVersion>> {
        let version: Option<ModVersion> = self
            .get_json(&["mods", mod_id, "versions", version_id], &[])
            .await?;

        Ok(version.map(|mut v| {
            stamp_mod_id(&mut v, mod_id);
            v
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let catalog = RestCatalog::new("https://mods.example.org/api/").unwrap();
        assert_eq!(catalog.base_url(), "https://mods.example.org/api");
    }

    #[test]
    fn ids_are_escaped_as_single_segments() {
        let catalog = RestCatalog::new("https://mods.example.org/api").unwrap();
        let url = catalog
            .endpoint(&["mods", "a/b?c#d", "versions", "1.0 beta"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://mods.example.org/api/mods/a%2Fb%3Fc%23d/versions/1.0%20beta"
        );

        let root = RestCatalog::new("https://mods.example.org").unwrap();
        assert_eq!(
            root.endpoint(&["health"]).unwrap().as_str(),
            "https://mods.example.org/health"
        );
    }

    #[test]
    fn rejects_unusable_server_url() {
        assert!(RestCatalog::new("not a url").is_err());
        assert!(RestCatalog::new("mailto:admin@example.org").is_err());
    }

    #[test]
    fn page_query_includes_bounds() {
        let query = page_query(Some(250), Some("m1"), None);
        assert_eq!(
            query,
            vec![("limit", "100".to_string()), ("after", "m1".to_string())]
        );
    }
}
