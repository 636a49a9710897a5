//! Operator-facing text: the request banner and failure reports.

use std::fmt::Write;

use vidgen_core::mode::VIDEO_FRAME_RATE;
use vidgen_core::request::GenerationRequest;
use vidgen_pipeline::GenerationError;

const RULE_WIDTH: usize = 60;
const PROMPT_PREVIEW_CHARS: usize = 50;

/// Summary of a resolved request, shown before submission.
pub fn banner(request: &GenerationRequest, server: &str) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "vidgen - {}", request.mode.display_name());
    let _ = writeln!(out, "{rule}");
    if let Some(image) = &request.image_path {
        let _ = writeln!(out, "Image:      {}", image.display());
    }
    let _ = writeln!(out, "Prompt:     {}", preview(&request.prompt));
    let _ = writeln!(out, "Resolution: {}x{}", request.width, request.height);
    if let (Some(frames), Some(secs)) = (request.frame_count, request.duration_secs()) {
        let _ = writeln!(out, "Frames:     {frames} (~{secs:.1}s at {VIDEO_FRAME_RATE}fps)");
    }
    let seed = request
        .seed
        .map(|s| s.to_string())
        .unwrap_or_else(|| "random".into());
    let _ = writeln!(
        out,
        "Settings:   CFG={}, Steps={}, Seed={seed}",
        request.guidance_scale, request.step_count
    );
    let _ = writeln!(out, "Server:     {server}");
    let _ = write!(out, "{rule}");
    out
}

fn preview(prompt: &str) -> String {
    let mut chars = prompt.chars();
    let head: String = chars.by_ref().take(PROMPT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Multi-line description of a failure for stderr.
pub fn failure(err: &GenerationError) -> String {
    let mut out = format!("error[{}]: {err}", err.kind());
    if let Some(detail) = err.backend_detail() {
        let rendered = serde_json::to_string_pretty(detail).unwrap_or_else(|_| detail.to_string());
        let _ = write!(out, "\nbackend response:\n{rendered}");
    }
    if let Some(job_id) = err.job_id() {
        let _ = write!(out, "\njob id: {job_id}");
        if matches!(err, GenerationError::TimedOut { .. } | GenerationError::Cancelled { .. }) {
            let _ = write!(out, " (still running on the backend; pick it up with --resume {job_id})");
        }
    }
    out
}
