//! Control-plane REST client

use async_trait::async_trait;
use pipesync_core::domain::binding::JenkinsBinding;
use pipesync_core::domain::meta::ObjectMeta;
use pipesync_core::domain::pipeline::Pipeline;
use pipesync_core::domain::pipeline_config::PipelineConfig;
use pipesync_core::{ApiError, ControlPlane, NamespaceName, ResourceKind};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::{handle_empty_response, handle_optional_response, handle_response};

/// API group and version of the pipeline resources
const API_PREFIX: &str = "apis/devops.alauda.io/v1alpha1";
const JSON_PATCH: &str = "application/json-patch+json";

#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(default)]
    items: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    metadata: ObjectMeta,
}

/// HTTP client for the control-plane API server
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    /// Base URL of the API server (e.g., "https://kubernetes.default.svc")
    base_url: String,
    /// Bearer token sent with every request
    token: Option<String>,
    /// HTTP client instance
    client: Client,
}

impl ControlPlaneClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a client with a custom HTTP client (timeouts, TLS roots, ...)
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Get the base URL of the API server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resource_url(&self, kind: ResourceKind, key: &NamespaceName) -> String {
        format!(
            "{}/{}/namespaces/{}/{}/{}",
            self.base_url,
            API_PREFIX,
            key.namespace,
            kind.plural(),
            key.name
        )
    }

    fn collection_url(&self, kind: ResourceKind) -> String {
        format!("{}/{}/{}", self.base_url, API_PREFIX, kind.plural())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_resource<T: DeserializeOwned>(
        &self,
        kind: ResourceKind,
        key: &NamespaceName,
    ) -> Result<Option<T>> {
        let url = self.resource_url(kind, key);
        let response = self.authorize(self.client.get(&url)).send().await?;

        handle_optional_response(response).await
    }

    async fn list_resource_keys(&self, kind: ResourceKind) -> Result<Vec<NamespaceName>> {
        let url = self.collection_url(kind);
        let response = self.authorize(self.client.get(&url)).send().await?;
        let list: ResourceList = handle_response(response).await?;

        Ok(list
            .items
            .into_iter()
            .map(|entry| entry.metadata.namespace_name())
            .collect())
    }

    async fn patch_resource(
        &self,
        kind: ResourceKind,
        key: &NamespaceName,
        patch: &JsonValue,
    ) -> Result<()> {
        let url = self.resource_url(kind, key);
        let response = self
            .authorize(self.client.patch(&url))
            .header(CONTENT_TYPE, JSON_PATCH)
            .body(patch.to_string())
            .send()
            .await?;

        handle_empty_response(response).await
    }
}

#[async_trait]
impl ControlPlane for ControlPlaneClient {
    async fn get_pipeline_config(
        &self,
        key: &NamespaceName,
    ) -> std::result::Result<Option<PipelineConfig>, ApiError> {
        Ok(self.get_resource(ResourceKind::PipelineConfig, key).await?)
    }

    async fn get_pipeline(
        &self,
        key: &NamespaceName,
    ) -> std::result::Result<Option<Pipeline>, ApiError> {
        Ok(self.get_resource(ResourceKind::Pipeline, key).await?)
    }

    async fn get_jenkins_binding(
        &self,
        key: &NamespaceName,
    ) -> std::result::Result<Option<JenkinsBinding>, ApiError> {
        Ok(self.get_resource(ResourceKind::JenkinsBinding, key).await?)
    }

    async fn list_keys(
        &self,
        kind: ResourceKind,
    ) -> std::result::Result<Vec<NamespaceName>, ApiError> {
        Ok(self.list_resource_keys(kind).await?)
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        key: &NamespaceName,
        patch: &JsonValue,
    ) -> std::result::Result<(), ApiError> {
        tracing::debug!("Patching {} {}", kind, key);
        Ok(self.patch_resource(kind, key, patch).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = ControlPlaneClient::new("https://api.local:6443/");
        assert_eq!(client.base_url(), "https://api.local:6443");
    }

    #[test]
    fn test_resource_urls() {
        let client = ControlPlaneClient::new("https://api.local").with_token("t0ken");
        let key = NamespaceName::new("team-a", "build");

        assert_eq!(
            client.resource_url(ResourceKind::PipelineConfig, &key),
            "https://api.local/apis/devops.alauda.io/v1alpha1/namespaces/team-a/pipelineconfigs/build"
        );
        assert_eq!(
            client.collection_url(ResourceKind::JenkinsBinding),
            "https://api.local/apis/devops.alauda.io/v1alpha1/jenkinsbindings"
        );
    }

    #[test]
    fn test_list_parsing() {
        let body = r#"{"kind":"PipelineList","items":[
            {"metadata":{"namespace":"a","name":"one"},"spec":{}},
            {"metadata":{"namespace":"b","name":"two"}}
        ]}"#;
        let list: ResourceList = serde_json::from_str(body).unwrap();
        let keys: Vec<_> = list
            .items
            .into_iter()
            .map(|entry| entry.metadata.namespace_name())
            .collect();
        assert_eq!(keys, vec![NamespaceName::new("a", "one"), NamespaceName::new("b", "two")]);
    }
}
