pub mod duration;
pub mod id;
pub mod types;
