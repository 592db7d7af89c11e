//! Repository traits for catalogue and cache operations.

pub mod catalogue;
pub mod requests;

pub use catalogue::CatalogueRepo;
pub use requests::RequestRepo;
