mod repository;

pub use repository::JobStore;
