use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalkthroughError {
    #[error("Step {0} is out of range")]
    StepOutOfRange(usize),

    #[error("Healing failed: {0}")]
    HealingFailed(String),

    #[error("Overlay error: {0}")]
    Overlay(String),

    #[error(transparent)]
    Heal(#[from] wayfinder::HealError),
}
