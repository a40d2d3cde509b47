use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::subscription::Tier;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "difficulty", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

/// The served business entity. `tier_access` is what the admission
/// pipeline ultimately protects: a tenant only sees workouts at or below
/// its subscription tier.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Workout {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub difficulty: Difficulty,
    pub muscle_groups: Vec<String>,
    pub equipment: Vec<String>,
    pub instructions: String,
    pub tier_access: Tier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Query filters for workout listing; hashed into the list cache key.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct WorkoutFilter {
    pub difficulty: Option<Difficulty>,
    pub muscle_group: Option<String>,
    pub equipment: Option<String>,
}
