//! In-process INDI drivers
//!
//! A driver implements [`Driver`] and manipulates its properties through a
//! [`DriverContext`]. [`DriverRunner`] connects the two to a byte stream:
//! it decodes requests, dispatches them to the driver and writes everything
//! the context emits.

pub mod config;
pub mod context;
pub mod driver;
pub mod registry;
pub mod runner;

pub use config::DriverConfig;
pub use context::{CONNECTION_PROPERTY, CONNECT_ELEMENT, DISCONNECT_ELEMENT, DriverContext};
pub use driver::{Driver, NewValues};
pub use registry::{DriverFactory, DriverRegistry};
pub use runner::DriverRunner;

pub use indi_core::{IndiError, IndiResult};
