//! Uploading input images to the backend.

use std::path::Path;

use image::ImageFormat;

use crate::backend::Backend;
use crate::error::GenerationError;

/// Upload the image at `path` and return the backend's reference to it.
///
/// The format is checked locally from the extension before any bytes are
/// sent. Every call is a fresh upload.
pub async fn upload_asset(backend: &dyn Backend, path: &Path) -> Result<String, GenerationError> {
    let format = ImageFormat::from_path(path).map_err(|e| GenerationError::UnsupportedFormat {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GenerationError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(GenerationError::UploadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("upload.{}", format.extensions_str().first().unwrap_or(&"png")));

    tracing::info!(
        path = %path.display(),
        bytes = data.len(),
        mime = format.to_mime_type(),
        "Uploading input image",
    );
    backend
        .upload_image(path, &file_name, format.to_mime_type(), data)
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::Value;
    use vidgen_core::job::JobId;

    use super::*;
    use crate::backend::BackendStatus;

    #[derive(Default)]
    struct RecordingBackend {
        uploads: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        async fn submit(&self, _: &Value) -> Result<JobId, GenerationError> {
            unreachable!()
        }

        async fn upload_image(
            &self,
            _path: &Path,
            file_name: &str,
            mime_type: &str,
            data: Vec<u8>,
        ) -> Result<String, GenerationError> {
            self.uploads
                .lock()
                .unwrap()
                .push((file_name.into(), mime_type.into(), data.len()));
            Ok(format!("uploads/{file_name}"))
        }

        async fn status(&self, _: &JobId) -> Result<BackendStatus, GenerationError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn uploads_with_detected_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.JPG");
        std::fs::write(&path, [0xff, 0xd8, 0xff, 0xe0]).unwrap();

        let backend = RecordingBackend::default();
        let reference = upload_asset(&backend, &path).await.unwrap();

        assert_eq!(reference, "uploads/face.JPG");
        let uploads = backend.uploads.lock().unwrap();
        assert_eq!(uploads.as_slice(), &[("face.JPG".to_string(), "image/jpeg".to_string(), 4)]);
    }

    #[tokio::test]
    async fn each_call_uploads_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, [1, 2, 3]).unwrap();

        let backend = RecordingBackend::default();
        upload_asset(&backend, &path).await.unwrap();
        upload_asset(&backend, &path).await.unwrap();
        assert_eq!(backend.uploads.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RecordingBackend::default();
        let err = upload_asset(&backend, &dir.path().join("nope.png"))
            .await
            .unwrap_err();
        assert_matches!(err, GenerationError::NotFound { .. });
        assert!(backend.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_extension_is_rejected_locally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let backend = RecordingBackend::default();
        let err = upload_asset(&backend, &path).await.unwrap_err();
        assert_matches!(err, GenerationError::UnsupportedFormat { .. });
        assert!(backend.uploads.lock().unwrap().is_empty());
    }
}
