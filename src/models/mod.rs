pub mod api_key;
pub mod subscription;
pub mod usage;
pub mod workout;
