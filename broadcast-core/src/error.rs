use std::fmt;

use thiserror::Error;

/// Which part of the effective-weather window came up empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSubject {
    Temperature,
    Precipitation,
}

impl fmt::Display for WindowSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSubject::Temperature => f.write_str("temperature"),
            WindowSubject::Precipitation => f.write_str("precipitation"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("weather data source error: {0}")]
    DataSource(String),

    #[error("forecast area resolution error: {0}")]
    AreaResolution(String),

    #[error("no {0} data inside the 09:00-23:00 window")]
    NoDataInWindow(WindowSubject),

    #[error("message delivery error: {0}")]
    Delivery(String),

    #[error("user store error: {0}")]
    UserStore(String),

    #[error("invalid weather: {0}")]
    InvalidWeather(String),

    #[error("invalid location: {0}")]
    InvalidLocation(String),
}

impl BroadcastError {
    /// Errors that indicate a logic bug or a broken run rather than a
    /// per-group operational fault. These abort `execute()`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidWeather(_) | Self::UserStore(_))
    }
}
