//! Parameter binding: request values into template placeholder slots.
//!
//! Binding is a pure transform. The template is never modified; every
//! call works on a private copy of its document, so concurrently running
//! requests cannot observe each other's values.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::error::CoreError;
use crate::graph::{BoundGraph, GraphTemplate, Role};
use crate::mode::GenerationMode;
use crate::request::GenerationRequest;

/// Seed value written when the caller did not choose one. The backend's
/// own convention decides what it means; the client never invents a seed.
///
/// Stock `KSampler.seed` and `KSamplerAdvanced.noise_seed` have a minimum
/// of 0 and fail `/prompt` validation on this value. Templates used
/// without an explicit seed need a seed node (or a server-side hook) that
/// treats a negative seed as "pick one".
pub const UNSET_SEED: i64 = -1;

/// Roles a template for `mode` must expose.
pub fn required_roles(mode: GenerationMode) -> Vec<Role> {
    let mut roles = vec![
        Role::Prompt,
        Role::NegativePrompt,
        Role::Width,
        Role::Height,
        Role::StepCount,
        Role::GuidanceScale,
        Role::Seed,
        Role::OutputPrefix,
    ];
    if mode.is_video() {
        roles.push(Role::FrameCount);
    }
    if mode.requires_image() {
        roles.push(Role::Image);
    }
    roles
}

/// Check that `template` designates a location for every role `mode`
/// requires.
///
/// Run before uploading assets so a broken template fails without
/// touching the backend.
pub fn check_template(mode: GenerationMode, template: &GraphTemplate) -> Result<(), CoreError> {
    let placeholders = template.placeholders();
    for role in required_roles(mode) {
        if !placeholders.iter().any(|p| p.key == role.key()) {
            return Err(CoreError::MissingLocation {
                mode,
                role: role.key().to_string(),
            });
        }
    }
    Ok(())
}

/// Concrete value for `role`, or `None` if the request has none.
fn role_value(request: &GenerationRequest, image_ref: Option<&str>, role: Role) -> Option<Value> {
    match role {
        Role::Prompt => Some(json!(request.prompt)),
        Role::NegativePrompt => Some(json!(request.negative_prompt)),
        Role::Width => Some(json!(request.width)),
        Role::Height => Some(json!(request.height)),
        Role::FrameCount => request.frame_count.map(|f| json!(f)),
        Role::StepCount => Some(json!(request.step_count)),
        Role::SplitStep => Some(json!(request.split_step())),
        Role::GuidanceScale => Some(json!(request.guidance_scale)),
        Role::Seed => Some(match request.seed {
            Some(seed) => json!(seed),
            None => json!(UNSET_SEED),
        }),
        Role::Image => image_ref.map(|r| json!(r)),
        Role::OutputPrefix => Some(json!(request.output_prefix)),
    }
}

/// Bind `request` into `template`.
///
/// `image_ref` is the backend reference returned by the asset uploader;
/// it is required for image-conditioned modes.
pub fn bind(
    request: &GenerationRequest,
    template: &GraphTemplate,
    image_ref: Option<&str>,
) -> Result<BoundGraph, CoreError> {
    if request.mode.requires_image() && image_ref.is_none() {
        return Err(CoreError::Validation {
            field: "image_path",
            message: format!("{} mode needs an uploaded image reference", request.mode),
        });
    }
    check_template(request.mode, template)?;

    let mut document = Value::Object(template.document().clone());
    let mut locations: BTreeMap<Role, Vec<String>> = BTreeMap::new();
    let mut unresolved = Vec::new();

    for placeholder in template.placeholders() {
        let value = Role::from_key(&placeholder.key)
            .and_then(|role| role_value(request, image_ref, role).map(|v| (role, v)));

        match (value, document.pointer_mut(&placeholder.pointer)) {
            (Some((role, value)), Some(slot)) => {
                *slot = value;
                locations.entry(role).or_default().push(placeholder.pointer);
            }
            _ => unresolved.push(format!("{{{{{}}}}} at {}", placeholder.key, placeholder.pointer)),
        }
    }

    if !unresolved.is_empty() {
        return Err(CoreError::UnresolvedPlaceholders(unresolved));
    }

    Ok(BoundGraph::new(document, locations))
}
