//! Core library for the daily `weather-broadcast` job.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Collaborator traits (user store, weather source, forecast areas, messaging)
//!   and their HTTP/file implementations
//! - The windowed daily-summary calculation
//! - The grouped broadcast run with retries and failure isolation
//!
//! It is used by `broadcast-cli`, but can also be driven from other binaries
//! or a scheduled function.

pub mod broadcast;
pub mod calculator;
pub mod config;
pub mod error;
mod http;
pub mod message;
pub mod messaging;
pub mod model;
pub mod provider;
pub mod retry;
pub mod store;

pub use broadcast::{BroadcastOrchestrator, BroadcastReport, PrecipitationSource};
pub use calculator::{CalculatorVariant, WeatherCalculator};
pub use config::{Config, ProviderConfig};
pub use error::BroadcastError;
pub use model::{Location, User, Weather};
pub use provider::{ForecastAreaResolver, ProviderId, WeatherDataSource};
