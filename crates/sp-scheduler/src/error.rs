use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Shutdown in progress")]
    ShutdownInProgress,

    #[error("Settings error: {0}")]
    Settings(#[from] sp_common::SettingsError),
}
