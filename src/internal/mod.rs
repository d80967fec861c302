pub mod arena;
pub mod id;
pub mod mapping;
