//! The driver trait

use crate::context::DriverContext;
use async_trait::async_trait;
use indi_core::{BlobValue, IndiResult, SwitchStatus, Timestamp};
use indi_protocol::IndiMessage;

/// Values a client asked to apply to one property
///
/// Every pair names an existing element of the property and carries a value
/// that passed the element's type and range checks.
#[derive(Debug, Clone, PartialEq)]
pub struct NewValues<T> {
    pub property: String,
    pub timestamp: Timestamp,
    pub values: Vec<(String, T)>,
}

impl<T> NewValues<T> {
    /// Requested value for `element`, if present
    pub fn get(&self, element: &str) -> Option<&T> {
        self.values
            .iter()
            .find(|(name, _)| name == element)
            .map(|(_, value)| value)
    }
}

/// Device logic running inside the server process
///
/// Only [`name`](Driver::name) and [`init`](Driver::init) are required; the
/// remaining hooks default to doing nothing.
#[async_trait]
pub trait Driver: Send {
    /// Device name; every property of the driver belongs to it
    fn name(&self) -> &str;

    /// Define the initial properties
    async fn init(&mut self, ctx: &mut DriverContext) -> IndiResult<()>;

    async fn process_new_text(
        &mut self,
        _ctx: &mut DriverContext,
        _values: NewValues<String>,
    ) -> IndiResult<()> {
        Ok(())
    }

    async fn process_new_number(
        &mut self,
        _ctx: &mut DriverContext,
        _values: NewValues<f64>,
    ) -> IndiResult<()> {
        Ok(())
    }

    async fn process_new_switch(
        &mut self,
        _ctx: &mut DriverContext,
        _values: NewValues<SwitchStatus>,
    ) -> IndiResult<()> {
        Ok(())
    }

    async fn process_new_blob(
        &mut self,
        _ctx: &mut DriverContext,
        _values: NewValues<BlobValue>,
    ) -> IndiResult<()> {
        Ok(())
    }

    /// Called after all properties were sent in answer to `getProperties`
    async fn properties_requested(&mut self, _ctx: &mut DriverContext) -> IndiResult<()> {
        Ok(())
    }

    /// Definitions, updates, messages and deletions of other devices this
    /// driver subscribed to with [`DriverContext::snoop`]
    async fn process_snooped(
        &mut self,
        _ctx: &mut DriverContext,
        _message: &IndiMessage,
    ) -> IndiResult<()> {
        Ok(())
    }

    /// Whether the framework should manage the standard `CONNECTION` property
    fn handles_connection(&self) -> bool {
        false
    }

    /// Open the device; only called when `handles_connection` is true
    async fn connect(&mut self, _ctx: &mut DriverContext, _timestamp: Timestamp) -> IndiResult<()> {
        Ok(())
    }

    /// Close the device; only called when `handles_connection` is true
    async fn disconnect(&mut self, _ctx: &mut DriverContext, _timestamp: Timestamp) -> IndiResult<()> {
        Ok(())
    }

    /// The driver is about to stop; its device is removed right after
    async fn is_being_destroyed(&mut self, _ctx: &mut DriverContext) {}
}
