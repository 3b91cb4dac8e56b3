//! Driver context: property ownership and outbound messages
//!
//! The context owns every property of one device. Structural changes and
//! value updates made through it are immediately turned into protocol
//! messages for the peers.

use indi_core::{
    Element, IndiError, IndiResult, Property, PropertyBuilder, PropertyKind, PropertyState,
    PropertyStore, SwitchRule, SwitchStatus, Timestamp,
};
use indi_protocol::{DelProperty, GetProperties, IndiMessage, Message, PropertyRender};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Name of the standard connection property
pub const CONNECTION_PROPERTY: &str = "CONNECTION";
pub const CONNECT_ELEMENT: &str = "CONNECT";
pub const DISCONNECT_ELEMENT: &str = "DISCONNECT";

const CONNECTION_GROUP: &str = "Main Control";
const CONNECTION_TIMEOUT: i64 = 100;

/// Property registry and message sink of one driver
pub struct DriverContext {
    device: String,
    properties: Vec<Property>,
    outbound: mpsc::UnboundedSender<IndiMessage>,
    store: Option<Arc<dyn PropertyStore>>,
}

impl DriverContext {
    pub fn new(
        device: &str,
        outbound: mpsc::UnboundedSender<IndiMessage>,
        store: Option<Arc<dyn PropertyStore>>,
    ) -> Self {
        Self {
            device: device.to_string(),
            properties: Vec::new(),
            outbound,
            store,
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device
    }

    /// Start a property builder already bound to this device
    pub fn builder(&self, kind: PropertyKind, name: &str) -> PropertyBuilder {
        Property::builder(kind, name).device(&self.device)
    }

    /// Restore a saveable property from the configured store, or build it
    ///
    /// Without a store the property is simply built and not saveable.
    pub fn load_or_build(&self, builder: PropertyBuilder) -> IndiResult<Property> {
        let builder = builder.device(&self.device);
        match &self.store {
            Some(store) => Property::load_or_build(Arc::clone(store), builder),
            None => builder.build(),
        }
    }

    /// Send a raw message
    pub fn send(&self, message: IndiMessage) {
        if self.outbound.send(message).is_err() {
            log::debug!("{}: outbound channel closed, message dropped", self.device);
        }
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name() == name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.name() == name)
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    fn position(&self, name: &str) -> IndiResult<usize> {
        self.properties
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| IndiError::NotFound(format!("{}.{}", self.device, name)))
    }

    /// Register a property and send its definition
    ///
    /// # Errors
    ///
    /// `InvalidData` if the property belongs to another device, `InvalidName`
    /// if a property with the same name is already registered
    pub fn add_property(&mut self, property: Property, message: Option<&str>) -> IndiResult<()> {
        if property.device() != self.device {
            return Err(IndiError::InvalidData(format!(
                "Property {} belongs to device '{}', not '{}'",
                property.name(),
                property.device(),
                self.device
            )));
        }
        if self.property(property.name()).is_some() {
            return Err(IndiError::InvalidName(format!(
                "Property {}.{} already defined",
                self.device,
                property.name()
            )));
        }

        self.properties.push(property);
        if let Some(property) = self.properties.last_mut() {
            let definition = property.render_definition(message);
            self.send(definition);
        }
        Ok(())
    }

    /// Send the current values of a property
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown property, `RuleViolation` if a switch
    /// property does not satisfy its rule
    pub fn update_property(&mut self, name: &str, message: Option<&str>) -> IndiResult<()> {
        self.send_update(name, false, message)
    }

    /// Like [`update_property`](Self::update_property), also sending number
    /// bounds
    pub fn update_property_with_limits(&mut self, name: &str, message: Option<&str>) -> IndiResult<()> {
        self.send_update(name, true, message)
    }

    fn send_update(&mut self, name: &str, limits: bool, message: Option<&str>) -> IndiResult<()> {
        let property = &self.properties[self.position(name)?];
        if !property.check_correct_values() {
            return Err(IndiError::RuleViolation(format!(
                "Switch {} does not follow its rule",
                property.name()
            )));
        }

        let update = property.render_update(limits, message);
        self.send(update);
        Ok(())
    }

    /// Unregister a property and tell the peers it is gone
    pub fn remove_property(&mut self, name: &str, message: Option<&str>) -> IndiResult<()> {
        let property = self.properties.remove(self.position(name)?);
        self.send(IndiMessage::DelProperty(DelProperty {
            device: self.device.clone(),
            name: Some(property.name().to_string()),
            timestamp: Some(Timestamp::now()),
            message: message.map(str::to_string),
        }));
        Ok(())
    }

    /// Unregister every property and tell the peers the device is gone
    pub fn remove_device(&mut self, message: Option<&str>) {
        self.properties.clear();
        self.send(IndiMessage::DelProperty(DelProperty {
            device: self.device.clone(),
            name: None,
            timestamp: Some(Timestamp::now()),
            message: message.map(str::to_string),
        }));
    }

    /// Send a device message
    pub fn send_message(&self, text: &str) {
        self.send(IndiMessage::Message(Message {
            device: Some(self.device.clone()),
            timestamp: Some(Timestamp::now()),
            message: Some(text.to_string()),
        }));
    }

    /// Subscribe to another device's properties
    pub fn snoop(&self, device: &str, property: Option<&str>) {
        self.send(IndiMessage::GetProperties(GetProperties::new(Some(device), property)));
    }

    /// Re-send definitions, all or one named property
    pub(crate) fn send_definitions(&mut self, only: Option<&str>) {
        let mut definitions = Vec::new();
        for property in &mut self.properties {
            if only.is_none_or(|name| name == property.name()) {
                definitions.push(property.render_definition(None));
            }
        }
        for definition in definitions {
            self.send(definition);
        }
    }

    pub(crate) fn add_connection_property(&mut self) -> IndiResult<()> {
        let property = self
            .builder(PropertyKind::Switch, CONNECTION_PROPERTY)
            .label("Connection")
            .group(CONNECTION_GROUP)
            .state(PropertyState::Idle)
            .rule(SwitchRule::OneOfMany)
            .timeout(CONNECTION_TIMEOUT)
            .element(Element::switch(CONNECT_ELEMENT, SwitchStatus::Off)?.with_label("Connect"))
            .element(Element::switch(DISCONNECT_ELEMENT, SwitchStatus::On)?.with_label("Disconnect"))
            .build()?;
        self.add_property(property, None)
    }

    pub fn is_connected(&self) -> bool {
        self.property(CONNECTION_PROPERTY)
            .and_then(|p| p.element(CONNECT_ELEMENT))
            .and_then(|e| e.value().as_switch())
            .is_some_and(|s| s.is_on())
    }

    /// Reflect the outcome of a connect/disconnect attempt
    pub(crate) fn set_connection(&mut self, connected: bool, error: Option<&str>) -> IndiResult<()> {
        let property = self.property_mut(CONNECTION_PROPERTY).ok_or_else(|| {
            IndiError::NotFound(CONNECTION_PROPERTY.to_string())
        })?;

        let element = if connected { CONNECT_ELEMENT } else { DISCONNECT_ELEMENT };
        property.set_only_one_switch_on(element)?;
        property.set_state(if error.is_some() {
            PropertyState::Alert
        } else {
            PropertyState::Ok
        });
        self.update_property(CONNECTION_PROPERTY, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indi_core::{ElementValue, NumberSpec};

    fn context() -> (DriverContext, mpsc::UnboundedReceiver<IndiMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DriverContext::new("Focuser", tx, None), rx)
    }

    fn position(ctx: &DriverContext) -> Property {
        ctx.builder(PropertyKind::Number, "POSITION")
            .element(
                Element::number("ABS", 0.0, NumberSpec::new("%6.0f", 0.0, 5000.0, 1.0).unwrap()).unwrap(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_add_property_sends_definition() {
        let (mut ctx, mut rx) = context();
        ctx.add_property(position(&ctx), Some("ready")).unwrap();

        let IndiMessage::Def(def) = rx.try_recv().unwrap() else {
            panic!("expected definition");
        };
        assert_eq!(def.device, "Focuser");
        assert_eq!(def.message.as_deref(), Some("ready"));
        assert!(ctx.property("POSITION").unwrap().is_published());

        assert!(matches!(
            ctx.add_property(position(&ctx), None),
            Err(IndiError::InvalidName(_))
        ));
    }

    #[test]
    fn test_add_foreign_property_rejected() {
        let (mut ctx, _rx) = context();
        let foreign = Property::builder(PropertyKind::Text, "X").device("Other").build().unwrap();
        assert!(matches!(ctx.add_property(foreign, None), Err(IndiError::InvalidData(_))));
    }

    #[test]
    fn test_update_property() {
        let (mut ctx, mut rx) = context();
        ctx.add_property(position(&ctx), None).unwrap();
        rx.try_recv().unwrap();

        let property = ctx.property_mut("POSITION").unwrap();
        property.set_value("ABS", ElementValue::Number(1200.0)).unwrap();
        property.set_state(PropertyState::Busy);
        ctx.update_property("POSITION", None).unwrap();

        let IndiMessage::Set(set) = rx.try_recv().unwrap() else {
            panic!("expected update");
        };
        assert_eq!(set.state, Some(PropertyState::Busy));
        assert_eq!(set.elements[0].value, ElementValue::Number(1200.0));
        assert!(set.elements[0].bounds.is_none());

        ctx.update_property_with_limits("POSITION", None).unwrap();
        let IndiMessage::Set(set) = rx.try_recv().unwrap() else {
            panic!("expected update");
        };
        assert!(set.elements[0].bounds.is_some());

        assert!(matches!(ctx.update_property("NOPE", None), Err(IndiError::NotFound(_))));
    }

    #[test]
    fn test_update_rejects_rule_violation() {
        let (mut ctx, mut rx) = context();
        ctx.add_connection_property().unwrap();
        rx.try_recv().unwrap();

        let property = ctx.property_mut(CONNECTION_PROPERTY).unwrap();
        property.reset_all_switches();
        property.set_state(PropertyState::Ok);
        assert!(matches!(
            ctx.update_property(CONNECTION_PROPERTY, None),
            Err(IndiError::RuleViolation(_))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_remove_property_and_device() {
        let (mut ctx, mut rx) = context();
        ctx.add_property(position(&ctx), None).unwrap();
        rx.try_recv().unwrap();

        ctx.remove_property("POSITION", Some("bye")).unwrap();
        let IndiMessage::DelProperty(del) = rx.try_recv().unwrap() else {
            panic!("expected delProperty");
        };
        assert_eq!(del.name.as_deref(), Some("POSITION"));
        assert!(ctx.property("POSITION").is_none());

        ctx.remove_device(None);
        let IndiMessage::DelProperty(del) = rx.try_recv().unwrap() else {
            panic!("expected delProperty");
        };
        assert_eq!(del.name, None);
    }

    #[test]
    fn test_messages_and_snoop() {
        let (ctx, mut rx) = context();
        ctx.send_message("Hello");
        ctx.snoop("Telescope", Some("EQUATORIAL_EOD_COORD"));

        assert_eq!(rx.try_recv().unwrap().device(), Some("Focuser"));
        let IndiMessage::GetProperties(get) = rx.try_recv().unwrap() else {
            panic!("expected getProperties");
        };
        assert_eq!(get.device.as_deref(), Some("Telescope"));
        assert_eq!(get.name.as_deref(), Some("EQUATORIAL_EOD_COORD"));
    }

    #[test]
    fn test_connection_property() {
        let (mut ctx, mut rx) = context();
        ctx.add_connection_property().unwrap();
        let IndiMessage::Def(def) = rx.try_recv().unwrap() else {
            panic!("expected definition");
        };
        assert_eq!(def.group.as_deref(), Some("Main Control"));
        assert_eq!(def.timeout, Some(100));
        assert!(!ctx.is_connected());

        ctx.set_connection(true, None).unwrap();
        assert!(ctx.is_connected());
        let IndiMessage::Set(set) = rx.try_recv().unwrap() else {
            panic!("expected update");
        };
        assert_eq!(set.state, Some(PropertyState::Ok));

        ctx.set_connection(false, Some("port busy")).unwrap();
        assert!(!ctx.is_connected());
        let IndiMessage::Set(set) = rx.try_recv().unwrap() else {
            panic!("expected update");
        };
        assert_eq!(set.state, Some(PropertyState::Alert));
        assert_eq!(set.message.as_deref(), Some("port busy"));
    }

    #[test]
    fn test_load_or_build_uses_store() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn PropertyStore> = Arc::new(indi_core::FileStore::new(dir.path()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = DriverContext::new("Focuser", tx, Some(store.clone()));

        let builder = || {
            Property::builder(PropertyKind::Text, "PORT").element(Element::text("PORT", "/dev/ttyUSB0").unwrap())
        };
        let mut property = ctx.load_or_build(builder()).unwrap();
        assert!(property.is_saveable());
        assert_eq!(property.device(), "Focuser");

        property.set_value("PORT", ElementValue::Text("/dev/ttyACM3".into())).unwrap();
        property.render_update(false, None);

        let restored = ctx.load_or_build(builder()).unwrap();
        assert_eq!(restored.element("PORT").unwrap().value().as_text(), Some("/dev/ttyACM3"));
    }
}
