pub mod catalog;
pub mod diversity;
pub mod feedback;
pub mod history;
pub mod interactions;
pub mod locks;
pub mod model_cache;
pub mod recommender;
pub mod sessions;
