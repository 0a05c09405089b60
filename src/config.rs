use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_path: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_path: env::var("ACTION_GATE_DB")
                .unwrap_or_else(|_| "data/action-gate.db".to_string()),
        }
    }
}
