//! Copying a finished job's outputs to local files.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use vidgen_comfyui::models::OutputFile;
use vidgen_core::job::JobId;

use crate::backend::ArtifactFetcher;
use crate::error::GenerationError;

/// Upper bound on `_N` suffixes tried before giving up on a name.
const MAX_SUFFIX: u32 = 10_000;

/// Copy every file in `outputs` to `<output_dir>/<prefix>.<ext>`.
///
/// Existing files are never replaced: a taken name gets a `_1`, `_2`,
/// ... suffix. Names are claimed with exclusive create, so concurrent
/// retrievals into one directory cannot collide.
pub async fn save_outputs(
    fetcher: &dyn ArtifactFetcher,
    job_id: &JobId,
    outputs: &[OutputFile],
    output_dir: &Path,
    prefix: &str,
) -> Result<Vec<PathBuf>, GenerationError> {
    if outputs.is_empty() {
        return Err(GenerationError::NoOutput {
            job_id: job_id.clone(),
        });
    }

    let failed = |message: String| GenerationError::RetrievalFailed {
        job_id: job_id.clone(),
        message,
    };

    let mut saved = Vec::with_capacity(outputs.len());
    for output in outputs {
        let (path, mut file) = create_unique(output_dir, prefix, output.extension())
            .await
            .map_err(|e| failed(format!("cannot create file in {}: {e}", output_dir.display())))?;

        let fetched = match fetcher.fetch(output, &mut file).await {
            Ok(bytes) => file.flush().await.map(|()| bytes),
            Err(e) => Err(e),
        };

        match fetched {
            Ok(bytes) => {
                tracing::info!(
                    job_id = %job_id,
                    source = %output.relative_path(),
                    dest = %path.display(),
                    bytes,
                    "Saved output",
                );
                saved.push(path);
            }
            Err(e) => {
                drop(file);
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(dest = %path.display(), error = %rm, "Could not remove partial file");
                }
                return Err(failed(format!("{}: {e}", output.relative_path())));
            }
        }
    }
    Ok(saved)
}

/// Exclusively create the first free name among `<prefix>.<ext>`,
/// `<prefix>_1.<ext>`, `<prefix>_2.<ext>`, ...
pub async fn create_unique(
    dir: &Path,
    prefix: &str,
    extension: &str,
) -> std::io::Result<(PathBuf, File)> {
    for n in 0..MAX_SUFFIX {
        let name = if n == 0 {
            format!("{prefix}.{extension}")
        } else {
            format!("{prefix}_{n}.{extension}")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free name for {prefix}.{extension}"),
    ))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;

    struct BytesFetcher(&'static [u8]);

    #[async_trait]
    impl ArtifactFetcher for BytesFetcher {
        async fn fetch(&self, _: &OutputFile, dest: &mut File) -> std::io::Result<u64> {
            dest.write_all(self.0).await?;
            Ok(self.0.len() as u64)
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl ArtifactFetcher for FailingFetcher {
        async fn fetch(&self, _: &OutputFile, dest: &mut File) -> std::io::Result<u64> {
            dest.write_all(b"partial").await?;
            Err(std::io::Error::other("connection reset"))
        }
    }

    fn output(filename: &str, fallback: &'static str) -> OutputFile {
        OutputFile {
            node_id: "8".into(),
            filename: filename.into(),
            subfolder: String::new(),
            folder_type: "output".into(),
            fallback_extension: fallback,
        }
    }

    #[tokio::test]
    async fn saves_with_backend_extension() {
        let dir = tempfile::tempdir().unwrap();
        let saved = save_outputs(
            &BytesFetcher(b"mp4"),
            &JobId::new("j"),
            &[output("clip_00001_.mp4", "mp4")],
            dir.path(),
            "clip",
        )
        .await
        .unwrap();

        assert_eq!(saved, vec![dir.path().join("clip.mp4")]);
        assert_eq!(std::fs::read(&saved[0]).unwrap(), b"mp4");
    }

    #[tokio::test]
    async fn existing_files_are_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("shot.png"), b"old").unwrap();
        std::fs::write(dir.path().join("shot_1.png"), b"old").unwrap();

        let saved = save_outputs(
            &BytesFetcher(b"new"),
            &JobId::new("j"),
            &[output("shot_00001_.png", "png"), output("shot_00002_.png", "png")],
            dir.path(),
            "shot",
        )
        .await
        .unwrap();

        assert_eq!(
            saved,
            vec![dir.path().join("shot_2.png"), dir.path().join("shot_3.png")]
        );
        assert_eq!(std::fs::read(dir.path().join("shot.png")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn extensionless_output_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let saved = save_outputs(
            &BytesFetcher(b"x"),
            &JobId::new("j"),
            &[output("render", "mp4")],
            dir.path(),
            "out",
        )
        .await
        .unwrap();
        assert_eq!(saved[0].file_name().unwrap(), "out.mp4");
    }

    #[tokio::test]
    async fn empty_outputs_is_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_outputs(&BytesFetcher(b""), &JobId::new("j"), &[], dir.path(), "out")
            .await
            .unwrap_err();
        assert_matches!(err, GenerationError::NoOutput { ref job_id } if job_id.as_str() == "j");
    }

    #[tokio::test]
    async fn failed_fetch_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_outputs(
            &FailingFetcher,
            &JobId::new("j"),
            &[output("a.mp4", "mp4")],
            dir.path(),
            "out",
        )
        .await
        .unwrap_err();

        assert_matches!(err, GenerationError::RetrievalFailed { .. });
        assert!(!dir.path().join("out.mp4").exists());
    }

    #[tokio::test]
    async fn concurrent_claims_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let dir = dir.path().to_path_buf();
            tasks.push(tokio::spawn(async move {
                create_unique(&dir, "race", "mp4").await.unwrap().0
            }));
        }
        let mut names = Vec::new();
        for t in tasks {
            names.push(t.await.unwrap());
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 10);
    }
}
