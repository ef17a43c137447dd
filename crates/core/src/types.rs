/// Authenticated user identifier, taken verbatim from the `userId` token claim.
pub type UserId = String;

/// Free-form metadata attached to a segmented garment (category, colour, ...).
pub type Metadata = serde_json::Map<String, serde_json::Value>;
