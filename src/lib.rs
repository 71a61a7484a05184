pub mod config;
pub mod error;
pub mod models;
pub mod prompt;
pub mod service;
pub mod session;
pub mod summary;
pub mod terminal;
pub mod transport;
pub mod web;

pub use crate::error::{Result, ScreeningError};
pub use crate::service::ScreeningService;
pub use crate::session::ScreeningSession;
pub use crate::summary::{SummaryClient, SummaryResult};
