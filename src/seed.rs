use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::engine::{Engine, EngineError};
use crate::model::{NewActivity, UserProfile};

/// Startup data: activities get fresh ids, users keep the ids given.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub activities: Vec<NewActivity>,
    pub users: Vec<UserProfile>,
}

#[derive(Debug)]
pub enum SeedError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Engine(EngineError),
}

impl std::fmt::Display for SeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedError::Io(e) => write!(f, "seed file: {e}"),
            SeedError::Parse(e) => write!(f, "seed file is not valid JSON: {e}"),
            SeedError::Engine(e) => write!(f, "seed rejected: {e}"),
        }
    }
}

impl std::error::Error for SeedError {}

impl Seed {
    pub fn from_json(text: &str) -> Result<Self, SeedError> {
        serde_json::from_str(text).map_err(SeedError::Parse)
    }

    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let text = std::fs::read_to_string(path).map_err(SeedError::Io)?;
        Self::from_json(&text)
    }

    /// Insert everything through the engine, so the usual validation applies.
    pub async fn apply(self, engine: &Engine) -> Result<(), SeedError> {
        let users = self.users.len();
        let activities = self.activities.len();
        for user in self.users {
            engine.upsert_user(user).await.map_err(SeedError::Engine)?;
        }
        for activity in self.activities {
            engine
                .create_activity(activity)
                .await
                .map_err(SeedError::Engine)?;
        }
        info!("seeded {users} users and {activities} activities");
        Ok(())
    }
}
