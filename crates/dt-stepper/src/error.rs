use dt_schedule::SchedulerError;
use dt_time::TimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("simulation configuration error: {0}")]
    Config(#[from] TimeError),

    #[error("engine has no listener attached")]
    Detached,

    #[error("seed registration failed: {0}")]
    Schedule(#[from] SchedulerError),

    #[error("engine worker thread panicked")]
    WorkerPanicked,
}

pub type SimResult<T> = Result<T, SimError>;
