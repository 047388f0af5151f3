pub mod helpers;

pub mod config;
pub mod estimate;
pub mod filter;
pub mod stack;
pub mod stamp;
