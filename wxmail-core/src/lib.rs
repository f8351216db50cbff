//! Core library for the `wxmail` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Weather providers returning raw payloads
//! - Report composition (payload parsing and sentence rendering)
//! - Recipient loading, SMS gateway resolution and multi-recipient delivery
//!
//! It is used by `wxmail-cli`, but [`run::run`] can be driven by any caller.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod message;
pub mod model;
pub mod provider;
pub mod recipients;
pub mod report;
pub mod run;
pub mod transport;

pub use config::{Config, Credentials, ProviderConfig};
pub use dispatch::{ComposedReport, DeliveryDispatcher, DispatchSettings};
pub use error::{
    ComposeError, DeliveryFailure, DispatchError, ProviderError, RunError, ValidationError,
};
pub use gateway::{Carrier, GatewayDirectory};
pub use model::{
    BatchReport, Channel, DeliveryOutcome, DeliveryResult, Destination, RawPayload, Recipient,
    RunRequest, RunResult, TemperatureUnit, WeatherRequest, WeatherSnapshot,
};
pub use provider::{ProviderId, WeatherProvider};
pub use recipients::{RecipientDirectory, RecipientLoad};
pub use report::{ReportComposer, ReportFlag, ReportOptions};
