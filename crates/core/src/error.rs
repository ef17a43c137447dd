#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    /// Malformed or missing user input.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// An external collaborator (segmentation, storage, engine) failed.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// The generation engine sent a malformed or out-of-order stream.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A required resource is unavailable for this request.
    #[error("Resource unavailable: {0}")]
    Resource(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
