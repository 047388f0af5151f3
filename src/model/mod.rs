pub mod catalog;
pub mod header;

pub use header::HduHeader;
