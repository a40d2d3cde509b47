pub mod health;
pub mod keys;
pub mod usage;
pub mod webhooks;
pub mod workouts;
