//! Rendering properties into definition and update messages

use crate::message::{DefElement, DefVector, IndiMessage, NumberBounds, OneElement, SetVector};
use indi_core::{Property, PropertyKind, Timestamp};

/// Turn a [`Property`] into outbound protocol messages
pub trait PropertyRender {
    /// Full `def*Vector`; marks the property published
    fn render_definition(&mut self, message: Option<&str>) -> IndiMessage;

    /// `set*Vector` with current values, saving a snapshot for saveable
    /// properties
    ///
    /// # Arguments
    ///
    /// * `include_min_max_step` - Also send number bounds, for limits that
    ///   changed after the definition
    /// * `message` - Optional message attached to the update
    fn render_update(&self, include_min_max_step: bool, message: Option<&str>) -> IndiMessage;
}

impl PropertyRender for Property {
    fn render_definition(&mut self, message: Option<&str>) -> IndiMessage {
        self.mark_published();

        let is_light = self.kind() == PropertyKind::Light;
        let elements = self
            .elements()
            .iter()
            .map(|element| DefElement {
                name: element.name().to_string(),
                label: Some(element.label().to_string()),
                value: element.value().clone(),
                number: element.number_spec().cloned(),
            })
            .collect();

        IndiMessage::Def(DefVector {
            kind: self.kind(),
            device: self.device().to_string(),
            name: self.name().to_string(),
            label: Some(self.label().to_string()),
            group: Some(self.group().to_string()),
            state: self.state(),
            permission: (!is_light).then_some(self.permission()),
            rule: self.rule(),
            timeout: (!is_light).then_some(self.timeout()),
            timestamp: Some(Timestamp::now()),
            message: message.map(str::to_string),
            elements,
        })
    }

    fn render_update(&self, include_min_max_step: bool, message: Option<&str>) -> IndiMessage {
        self.save();

        let elements = self
            .elements()
            .iter()
            .map(|element| OneElement {
                name: element.name().to_string(),
                value: element.value().clone(),
                bounds: element
                    .number_spec()
                    .filter(|_| include_min_max_step)
                    .map(NumberBounds::from),
            })
            .collect();

        IndiMessage::Set(SetVector {
            kind: self.kind(),
            device: self.device().to_string(),
            name: self.name().to_string(),
            state: Some(self.state()),
            timeout: (self.kind() != PropertyKind::Light).then_some(self.timeout()),
            timestamp: Some(Timestamp::now()),
            message: message.map(str::to_string),
            elements,
        })
    }
}
