//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (workflow submission, history and queue
//! inspection, image upload, output download) using [`reqwest`].

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::models::{
    parse_history, HistoryEntry, OutputFile, PromptError, QueueSnapshot, SubmitResponse,
    UploadResponse,
};

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    client_id: String,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// `/prompt` refused the workflow with a structured validation error.
    #[error("ComfyUI rejected the workflow: {}", .error.message())]
    PromptRejected {
        error: PromptError,
        /// The full response body.
        payload: Value,
    },

    /// A 2xx response whose body did not have the expected shape.
    #[error("Unexpected ComfyUI response: {0}")]
    Decode(String),

    /// Writing a downloaded file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComfyUIApiError {
    /// True when the server could not be reached or answered with a
    /// server-side failure, as opposed to refusing the request.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Request(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful to apply request timeouts).
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            api_url,
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// HTTP API base URL (e.g. `http://host:8188`).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Identifier sent with every submission from this client.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// this client's ID. Returns the server-assigned `prompt_id` and
    /// queue position. A structured validation failure comes back as
    /// [`ComfyUIApiError::PromptRejected`].
    pub async fn submit_workflow(
        &self,
        workflow: &Value,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": self.client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let parsed: Option<Value> = serde_json::from_str(&text).ok();

        if let Some(error) = parsed.as_ref().and_then(PromptError::from_body) {
            return Err(ComfyUIApiError::PromptRejected {
                error,
                payload: parsed.unwrap_or(Value::Null),
            });
        }

        if !status.is_success() {
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed = parsed.ok_or_else(|| ComfyUIApiError::Decode(text.clone()))?;
        let submitted: SubmitResponse = serde_json::from_value(parsed)
            .map_err(|e| ComfyUIApiError::Decode(format!("{e}: {text}")))?;

        tracing::debug!(
            api_url = %self.api_url,
            prompt_id = %submitted.prompt_id,
            number = submitted.number,
            "Workflow queued on ComfyUI",
        );
        Ok(submitted)
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. Returns `None` while
    /// the prompt has not finished.
    pub async fn get_history(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        let body: Value = Self::parse_response(response).await?;
        parse_history(&body, prompt_id).map_err(|e| ComfyUIApiError::Decode(e.to_string()))
    }

    /// Current execution queue (`GET /queue`).
    pub async fn get_queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/queue", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Upload an image to the server's input folder.
    ///
    /// Sends a multipart `POST /upload/image` with `overwrite=true`.
    pub async fn upload_image(
        &self,
        file_name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(mime_type)?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .send()
            .await?;

        let uploaded: UploadResponse = Self::parse_response(response).await?;
        tracing::debug!(
            file_name,
            reference = %uploaded.reference(),
            "Image uploaded to ComfyUI",
        );
        Ok(uploaded)
    }

    /// Stream an output file (`GET /view`) into `dest`.
    ///
    /// Returns the number of bytes written.
    pub async fn download_output<W>(
        &self,
        file: &OutputFile,
        dest: &mut W,
    ) -> Result<u64, ComfyUIApiError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[
                ("filename", file.filename.as_str()),
                ("subfolder", file.subfolder.as_str()),
                ("type", file.folder_type.as_str()),
            ])
            .send()
            .await?;

        let mut response = Self::ensure_success(response).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            dest.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        dest.flush().await?;
        Ok(written)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = ComfyUIApi::new("http://localhost:8188/");
        assert_eq!(api.api_url(), "http://localhost:8188");
    }

    #[test]
    fn client_id_is_stable_per_instance() {
        let api = ComfyUIApi::new("http://localhost:8188");
        let id = api.client_id().to_string();
        assert_eq!(api.client_id(), id);
        assert_ne!(ComfyUIApi::new("http://localhost:8188").client_id(), id);
    }

    #[test]
    fn server_errors_count_as_transport() {
        let err = ComfyUIApiError::ApiError {
            status: 502,
            body: "bad gateway".into(),
        };
        assert!(err.is_transport());
        let err = ComfyUIApiError::ApiError {
            status: 400,
            body: "bad".into(),
        };
        assert!(!err.is_transport());
    }
}
