pub mod auth;
pub mod tryon;
pub mod wardrobe;
