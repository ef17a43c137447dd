//! Handler for `POST /virtual-tryon`.

use axum::extract::{Multipart, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use instafit_comfyui::template::{JobTemplate, PatchFields};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

/// Mask prompt used when the request carries none.
pub const DEFAULT_PROMPT: &str = "shirt";

/// Extension used for uploads whose filename has none.
const FALLBACK_EXTENSION: &str = "jpg";

/// One uploaded image field.
struct ImagePart {
    data: Vec<u8>,
    extension: String,
}

/// Fields of a try-on request.
#[derive(Default)]
struct TryOnForm {
    person: Option<ImagePart>,
    garment: Option<ImagePart>,
    prompt: Option<String>,
}

/// Lowercased alphanumeric extension of `filename`, if it has one.
fn extension_of(filename: Option<&str>) -> String {
    filename
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

async fn read_form(mut multipart: Multipart) -> AppResult<TryOnForm> {
    let mut form = TryOnForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "person_image" | "garment_image" => {
                let extension = extension_of(field.file_name());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                if data.is_empty() {
                    return Err(AppError::BadRequest(format!("{name} is empty")));
                }
                let part = ImagePart {
                    data: data.to_vec(),
                    extension,
                };
                if name == "person_image" {
                    form.person = Some(part);
                } else {
                    form.garment = Some(part);
                }
            }
            "prompt" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                form.prompt = Some(text);
            }
            _ => {} // ignore unknown fields
        }
    }

    Ok(form)
}

/// POST /virtual-tryon
///
/// Uploads both photos to the engine, patches the job template with their
/// references and the mask prompt, then streams the job to completion and
/// returns the generated image as an attachment.
pub async fn virtual_tryon(
    user: AuthUser,
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Response> {
    let form = read_form(multipart).await?;
    let person = form
        .person
        .ok_or_else(|| AppError::BadRequest("person_image is required".into()))?;
    let garment = form
        .garment
        .ok_or_else(|| AppError::BadRequest("garment_image is required".into()))?;
    let prompt = form
        .prompt
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_PROMPT.to_string());

    let session = uuid::Uuid::new_v4();
    tracing::info!(user_id = %user.user_id, %session, prompt = %prompt, "Starting try-on");

    state.supervisor.ensure_started().await?;

    let person_ref = state
        .jobs
        .upload_input(person.data, &format!("person_{session}.{}", person.extension))
        .await?;
    let garment_ref = state
        .jobs
        .upload_input(garment.data, &format!("garment_{session}.{}", garment.extension))
        .await?;

    let mut template = JobTemplate::load(&state.config.engine.workflow_path).await?;
    template.patch(&PatchFields {
        prompt: Some(prompt),
        garment_image: Some(garment_ref),
        person_image: Some(person_ref),
    });

    // The job runs on its own task so that a dropped request still lets the
    // client observe cancellation and remove the job from the engine.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let jobs = state.jobs.clone();
    let job = tokio::spawn(async move { jobs.submit(&template, &cancel).await });

    let artifact = job
        .await
        .map_err(|e| AppError::InternalError(format!("Try-on task failed: {e}")))??;

    tracing::info!(
        user_id = %user.user_id,
        %session,
        bytes = artifact.data.len(),
        "Try-on complete"
    );

    let disposition = format!(
        "attachment; filename=vton_result_{session}.{}",
        artifact.format.extension()
    );
    Ok((
        [
            (CONTENT_TYPE, artifact.format.content_type().to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        artifact.data,
    )
        .into_response())
}
