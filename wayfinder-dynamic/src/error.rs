use thiserror::Error;

#[derive(Error, Debug)]
pub enum DynamicError {
    #[error("Dynamic workflows are disabled for this session")]
    FeatureDisabled,

    #[error("Planner error: {0}")]
    Planner(String),

    #[error("Planner timed out after {0}ms")]
    PlannerTimeout(u64),

    #[error("Session is not running")]
    NotRunning,

    #[error(transparent)]
    Heal(#[from] wayfinder::HealError),
}
