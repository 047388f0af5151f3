pub mod constants;
pub mod mmap;
