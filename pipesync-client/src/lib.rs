//! Pipesync HTTP Clients
//!
//! REST implementations of the two seams defined in `pipesync-core`:
//!
//! - [`ControlPlaneClient`]: reads and patches PipelineConfig, Pipeline and
//!   JenkinsBinding resources (`ControlPlane`)
//! - [`JenkinsClient`]: drives folders, jobs, builds and the queue of a Jenkins
//!   instance (`ExecutionEngine`)
//!
//! # Example
//!
//! ```no_run
//! use pipesync_client::JenkinsClient;
//! use pipesync_core::ExecutionEngine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let jenkins = JenkinsClient::new("http://jenkins:8080").with_credentials("admin", "token");
//!
//!     if let Some(item) = jenkins.get_item("ns/ns-demo").await? {
//!         println!("found {} ({})", item.full_name(), item.class_name());
//!     }
//!     Ok(())
//! }
//! ```

mod control_plane;
pub mod error;
mod jenkins;

// Re-export commonly used types
pub use control_plane::ControlPlaneClient;
pub use error::{ClientError, Result};
pub use jenkins::JenkinsClient;

use serde::de::DeserializeOwned;

// =============================================================================
// Response Handlers
// =============================================================================

/// Fails with [`ClientError::ApiError`] unless the response is a success
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    Ok(response)
}

/// Handle an API response and deserialize JSON
async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    check_status(response)
        .await?
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}

/// Handle an API response whose body is plain text (e.g. config.xml)
async fn handle_text_response(response: reqwest::Response) -> Result<String> {
    check_status(response)
        .await?
        .text()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to read response body: {}", e)))
}

/// Handle an API response that returns no content (e.g. DELETE operations)
async fn handle_empty_response(response: reqwest::Response) -> Result<()> {
    check_status(response).await.map(|_| ())
}

/// Like [`handle_response`], mapping 404 to `None`
async fn handle_optional_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Option<T>> {
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    handle_response(response).await.map(Some)
}
