//! Properties: named, typed groups of elements owned by a device
//!
//! A property starts out unpublished, when elements may still be added, and
//! becomes published the first time its definition is rendered. From then on
//! its element set is frozen while element values stay mutable.

use crate::element::{Element, ElementValue, normalize_name};
use crate::error::{IndiError, IndiResult};
use crate::persistence::{PropertyKey, PropertyStore};
use crate::types::{PropertyKind, PropertyPermission, PropertyState, SwitchRule, SwitchStatus};
use std::fmt;
use std::sync::Arc;

/// Group used when none (or a blank one) is given
pub const DEFAULT_GROUP: &str = "Unsorted";

/// Builder for [`Property`]
#[derive(Debug, Clone)]
pub struct PropertyBuilder {
    kind: PropertyKind,
    name: String,
    device: String,
    label: Option<String>,
    group: Option<String>,
    state: PropertyState,
    permission: PropertyPermission,
    timeout: i64,
    rule: SwitchRule,
    elements: Vec<Element>,
}

impl PropertyBuilder {
    pub fn device(mut self, device: &str) -> Self {
        self.device = device.trim().to_string();
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn state(mut self, state: PropertyState) -> Self {
        self.state = state;
        self
    }

    pub fn permission(mut self, permission: PropertyPermission) -> Self {
        self.permission = permission;
        self
    }

    /// Timeout hint in milliseconds; negative values become 0
    pub fn timeout(mut self, timeout: i64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Occupancy rule; only meaningful for switch properties
    pub fn rule(mut self, rule: SwitchRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }

    /// Device the property will belong to
    pub fn device_name(&self) -> &str {
        &self.device
    }

    /// Property name as given (untrimmed names are trimmed by `build`)
    pub fn property_name(&self) -> &str {
        self.name.trim()
    }

    /// Validate and build the property
    ///
    /// # Errors
    ///
    /// - `InvalidName` for an empty property name
    /// - `InvalidPermission` for a write-only switch property
    /// - any `add_element` error for the queued elements
    pub fn build(self) -> IndiResult<Property> {
        let name = normalize_name(&self.name)?;

        if self.kind == PropertyKind::Switch && self.permission == PropertyPermission::WriteOnly {
            return Err(IndiError::InvalidPermission(format!(
                "Switch property {} cannot be write-only",
                name
            )));
        }

        // Lights are informational only
        let permission = if self.kind == PropertyKind::Light {
            PropertyPermission::ReadOnly
        } else {
            self.permission
        };

        let label = match self.label.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => name.clone(),
        };

        let group = match self.group.as_deref().map(str::trim) {
            Some(group) if !group.is_empty() => group.to_string(),
            _ => DEFAULT_GROUP.to_string(),
        };

        let mut property = Property {
            device: self.device,
            kind: self.kind,
            name,
            label,
            group,
            state: self.state,
            permission,
            timeout: clamp_timeout(self.timeout),
            rule: (self.kind == PropertyKind::Switch).then_some(self.rule),
            elements: Vec::with_capacity(self.elements.len()),
            published: false,
            store: None,
        };

        for element in self.elements {
            property.add_element(element)?;
        }

        Ok(property)
    }
}

fn clamp_timeout(timeout: i64) -> u32 {
    timeout.clamp(0, u32::MAX as i64) as u32
}

/// Store handle of a saveable property
#[derive(Clone)]
struct SaveHandle(Arc<dyn PropertyStore>);

impl fmt::Debug for SaveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SaveHandle")
    }
}

/// Named, typed group of elements belonging to one device
#[derive(Debug, Clone)]
pub struct Property {
    device: String,
    kind: PropertyKind,
    name: String,
    label: String,
    group: String,
    state: PropertyState,
    permission: PropertyPermission,
    timeout: u32,
    rule: Option<SwitchRule>,
    elements: Vec<Element>,
    published: bool,
    store: Option<SaveHandle>,
}

impl Property {
    /// Start building a property of the given kind
    ///
    /// Defaults: state Idle, permission ReadWrite (ReadOnly for lights),
    /// timeout 0, rule OneOfMany for switches.
    pub fn builder(kind: PropertyKind, name: &str) -> PropertyBuilder {
        PropertyBuilder {
            kind,
            name: name.to_string(),
            device: String::new(),
            label: None,
            group: None,
            state: PropertyState::Idle,
            permission: PropertyPermission::ReadWrite,
            timeout: 0,
            rule: SwitchRule::OneOfMany,
            elements: Vec::new(),
        }
    }

    /// Restore the property from `store` or build a fresh one
    ///
    /// Either way the result is saveable: every rendered update writes a new
    /// snapshot. A snapshot that cannot be read is logged and replaced.
    pub fn load_or_build(store: Arc<dyn PropertyStore>, builder: PropertyBuilder) -> IndiResult<Self> {
        let key = PropertyKey::new(builder.device_name(), builder.property_name());

        let restored = match store.load(&key) {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Discarding snapshot {}: {}", key, e);
                None
            }
        };

        let mut property = match restored {
            Some(property) => property,
            None => builder.build()?,
        };
        property.published = false;
        property.store = Some(SaveHandle(store));
        Ok(property)
    }

    /// Owning device name, trimmed; empty until the builder sets one
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display label, the name when none was given
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Display group, [`DEFAULT_GROUP`] when none was given
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn state(&self) -> PropertyState {
        self.state
    }

    /// Takes effect with the next rendered update
    pub fn set_state(&mut self, state: PropertyState) {
        self.state = state;
    }

    pub fn permission(&self) -> PropertyPermission {
        self.permission
    }

    /// Timeout hint in milliseconds
    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    /// Negative values become 0
    pub fn set_timeout(&mut self, timeout: i64) {
        self.timeout = clamp_timeout(timeout);
    }

    /// Switch rule, `None` for every other kind
    pub fn rule(&self) -> Option<SwitchRule> {
        self.rule
    }

    /// Whether the definition has gone out and the element set is frozen
    pub fn is_published(&self) -> bool {
        self.published
    }

    /// Freeze the element set; called when the definition goes out
    pub fn mark_published(&mut self) {
        self.published = true;
    }

    /// Whether updates write a snapshot, see [`Property::load_or_build`]
    pub fn is_saveable(&self) -> bool {
        self.store.is_some()
    }

    /// Persistence key of this property
    pub fn key(&self) -> PropertyKey {
        PropertyKey::new(&self.device, &self.name)
    }

    /// Elements in insertion order
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Read-only access; values change through [`Property::set_value`]
    /// and bounds through [`Property::set_number_bounds`]
    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.name() == name)
    }

    pub fn element_names(&self) -> Vec<&str> {
        self.elements.iter().map(Element::name).collect()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Append an element
    ///
    /// # Errors
    ///
    /// - `WrongElementKind` if the element kind differs from the property kind
    /// - `AlreadyPublished` once the definition has been sent
    /// - `DuplicateElement` if an element with the same name exists
    pub fn add_element(&mut self, element: Element) -> IndiResult<()> {
        if element.kind() != self.kind {
            return Err(IndiError::WrongElementKind(format!(
                "{} element {} in {} property {}",
                element.kind(),
                element.name(),
                self.kind,
                self.name
            )));
        }
        if self.published {
            return Err(IndiError::AlreadyPublished(self.name.clone()));
        }
        if self.element(element.name()).is_some() {
            return Err(IndiError::DuplicateElement(format!("{}.{}", self.name, element.name())));
        }

        self.elements.push(element);
        Ok(())
    }

    fn element_index(&self, name: &str) -> IndiResult<usize> {
        self.elements
            .iter()
            .position(|e| e.name() == name)
            .ok_or_else(|| IndiError::NotFound(format!("{}.{}", self.name, name)))
    }

    /// Set the value of one element
    ///
    /// Turning a switch ON under an exclusive rule (OneOfMany, AtMostOne)
    /// turns every sibling OFF first.
    pub fn set_value(&mut self, element: &str, value: ElementValue) -> IndiResult<()> {
        let index = self.element_index(element)?;
        self.elements[index].validate(&value)?;

        let exclusive = self.rule.is_some_and(|r| r.is_exclusive());
        if exclusive && value == ElementValue::Switch(SwitchStatus::On) {
            self.reset_all_switches();
        }

        self.elements[index].set_value(value)
    }

    /// Set several element values; all are validated before any is applied
    pub fn set_values<'a, I>(&mut self, values: I) -> IndiResult<()>
    where
        I: IntoIterator<Item = (&'a str, ElementValue)>,
    {
        let values: Vec<(usize, ElementValue)> = values
            .into_iter()
            .map(|(name, value)| {
                let index = self.element_index(name)?;
                self.elements[index].validate(&value)?;
                Ok((index, value))
            })
            .collect::<IndiResult<_>>()?;

        for (index, value) in values {
            let name = self.elements[index].name().to_string();
            self.set_value(&name, value)?;
        }
        Ok(())
    }

    /// Parse `text` with the element's number format and set it
    pub fn set_number_from_str(&mut self, element: &str, text: &str) -> IndiResult<()> {
        let index = self.element_index(element)?;
        self.elements[index].set_number_from_str(text)
    }

    /// Change the bounds and step of a number element
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown element, `TypeMismatch` for a non-number
    /// element, `OutOfRange` when `min > max` or the current value falls
    /// outside the new bounds. The old bounds stay in place on error.
    pub fn set_number_bounds(&mut self, element: &str, min: f64, max: f64, step: f64) -> IndiResult<()> {
        let index = self.element_index(element)?;
        let target = &mut self.elements[index];
        let name = target.name().to_string();
        let current = target.value().as_number();
        let spec = target
            .number_spec_mut()
            .ok_or_else(|| IndiError::TypeMismatch(format!("{} is not a number element", name)))?;
        if min > max {
            return Err(IndiError::OutOfRange(format!("{}: min {} above max {}", name, min, max)));
        }
        if let Some(value) = current.filter(|v| *v < min || *v > max) {
            return Err(IndiError::OutOfRange(format!(
                "{}: current value {} outside [{}, {}]",
                name, value, min, max
            )));
        }

        spec.min = min;
        spec.max = max;
        spec.step = step;
        Ok(())
    }

    /// Number of switch elements currently ON
    pub fn selected_count(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| e.value().as_switch().is_some_and(|s| s.is_on()))
            .count()
    }

    /// First switch element that is ON
    pub fn first_on(&self) -> Option<&Element> {
        self.elements
            .iter()
            .find(|e| e.value().as_switch().is_some_and(|s| s.is_on()))
    }

    pub fn reset_all_switches(&mut self) {
        for element in &mut self.elements {
            if element.kind() == PropertyKind::Switch {
                // Kind checked above, cannot fail
                let _ = element.set_value(ElementValue::Switch(SwitchStatus::Off));
            }
        }
    }

    /// Turn `element` ON and every other switch OFF, regardless of the rule
    pub fn set_only_one_switch_on(&mut self, element: &str) -> IndiResult<()> {
        let index = self.element_index(element)?;
        self.elements[index].validate(&ElementValue::Switch(SwitchStatus::On))?;
        self.reset_all_switches();
        self.elements[index].set_value(ElementValue::Switch(SwitchStatus::On))
    }

    /// Whether the switch occupancy satisfies the rule
    ///
    /// Only enforced while the state is Ok: OneOfMany needs exactly one
    /// element ON and AtMostOne at most one.
    pub fn check_correct_values(&self) -> bool {
        if self.state != PropertyState::Ok {
            return true;
        }

        match self.rule {
            Some(SwitchRule::OneOfMany) => self.selected_count() == 1,
            Some(SwitchRule::AtMostOne) => self.selected_count() <= 1,
            _ => true,
        }
    }

    /// Write a snapshot if the property is saveable
    ///
    /// Failures are logged; they never interrupt the update that triggered them.
    pub fn save(&self) {
        if let Some(SaveHandle(store)) = &self.store {
            if let Err(e) = store.save(&self.key(), self) {
                log::warn!("Failed to save property {}: {}", self.key(), e);
            }
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} - {}", self.name, self.state)?;
        for element in &self.elements {
            writeln!(f, "  {} - {}", element.name(), element.formatted_value())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::NumberSpec;
    use crate::persistence::MockPropertyStore;
    use crate::types::LightState;

    fn slew_mode() -> Property {
        Property::builder(PropertyKind::Switch, "SLEW_MODE")
            .device("Telescope")
            .rule(SwitchRule::OneOfMany)
            .element(Element::switch("A", SwitchStatus::On).unwrap())
            .element(Element::switch("B", SwitchStatus::Off).unwrap())
            .element(Element::switch("C", SwitchStatus::Off).unwrap())
            .build()
            .unwrap()
    }

    fn statuses(property: &Property) -> Vec<bool> {
        property
            .elements()
            .iter()
            .map(|e| e.value().as_switch().unwrap().is_on())
            .collect()
    }

    #[test]
    fn test_builder_defaults() {
        let property = Property::builder(PropertyKind::Text, " PORT ")
            .device("Focuser")
            .group("  ")
            .timeout(-5)
            .build()
            .unwrap();

        assert_eq!(property.name(), "PORT");
        assert_eq!(property.label(), "PORT");
        assert_eq!(property.group(), DEFAULT_GROUP);
        assert_eq!(property.timeout(), 0);
        assert_eq!(property.state(), PropertyState::Idle);
        assert_eq!(property.rule(), None);
        assert!(!property.is_published());
    }

    #[test]
    fn test_builder_errors() {
        assert!(matches!(
            Property::builder(PropertyKind::Number, "").build(),
            Err(IndiError::InvalidName(_))
        ));
        assert!(matches!(
            Property::builder(PropertyKind::Switch, "S")
                .permission(PropertyPermission::WriteOnly)
                .build(),
            Err(IndiError::InvalidPermission(_))
        ));
        assert!(Property::builder(PropertyKind::Text, "T")
            .permission(PropertyPermission::WriteOnly)
            .build()
            .is_ok());
    }

    #[test]
    fn test_lights_are_read_only() {
        let property = Property::builder(PropertyKind::Light, "STATUS")
            .permission(PropertyPermission::ReadWrite)
            .element(Element::light("MOVING", LightState::Busy).unwrap())
            .build()
            .unwrap();
        assert_eq!(property.permission(), PropertyPermission::ReadOnly);
    }

    #[test]
    fn test_add_element_rules() {
        let mut property = Property::builder(PropertyKind::Text, "INFO").build().unwrap();
        property.add_element(Element::text("A", "1").unwrap()).unwrap();

        assert!(matches!(
            property.add_element(Element::switch("S", SwitchStatus::On).unwrap()),
            Err(IndiError::WrongElementKind(_))
        ));
        assert!(matches!(
            property.add_element(Element::text("A", "2").unwrap()),
            Err(IndiError::DuplicateElement(_))
        ));

        property.mark_published();
        assert!(matches!(
            property.add_element(Element::text("B", "3").unwrap()),
            Err(IndiError::AlreadyPublished(_))
        ));
        assert_eq!(property.element_names(), vec!["A"]);
    }

    #[test]
    fn test_radio_button_effect() {
        let mut property = slew_mode();
        property.set_value("B", ElementValue::Switch(SwitchStatus::On)).unwrap();
        assert_eq!(statuses(&property), vec![false, true, false]);
        assert_eq!(property.selected_count(), 1);
        assert_eq!(property.first_on().unwrap().name(), "B");
    }

    #[test]
    fn test_any_of_many_keeps_siblings() {
        let mut property = Property::builder(PropertyKind::Switch, "OPTIONS")
            .rule(SwitchRule::AnyOfMany)
            .element(Element::switch("X", SwitchStatus::On).unwrap())
            .element(Element::switch("Y", SwitchStatus::Off).unwrap())
            .build()
            .unwrap();
        property.set_value("Y", ElementValue::Switch(SwitchStatus::On)).unwrap();
        assert_eq!(statuses(&property), vec![true, true]);
    }

    #[test]
    fn test_check_correct_values() {
        let mut property = slew_mode();
        property.set_state(PropertyState::Ok);
        assert!(property.check_correct_values());

        property.reset_all_switches();
        assert!(!property.check_correct_values());

        property.set_state(PropertyState::Busy);
        assert!(property.check_correct_values());

        let mut at_most_one = Property::builder(PropertyKind::Switch, "AMO")
            .rule(SwitchRule::AtMostOne)
            .state(PropertyState::Ok)
            .element(Element::switch("X", SwitchStatus::Off).unwrap())
            .element(Element::switch("Y", SwitchStatus::Off).unwrap())
            .build()
            .unwrap();
        assert!(at_most_one.check_correct_values());
        at_most_one.set_only_one_switch_on("Y").unwrap();
        assert!(at_most_one.check_correct_values());

        // The builder does not enforce the rule, so two ON switches can load
        for rule in [SwitchRule::OneOfMany, SwitchRule::AtMostOne] {
            let mut doubled = Property::builder(PropertyKind::Switch, "DOUBLED")
                .rule(rule)
                .state(PropertyState::Ok)
                .element(Element::switch("X", SwitchStatus::On).unwrap())
                .element(Element::switch("Y", SwitchStatus::On).unwrap())
                .element(Element::switch("Z", SwitchStatus::Off).unwrap())
                .build()
                .unwrap();
            assert_eq!(doubled.selected_count(), 2);
            assert!(!doubled.check_correct_values(), "{:?} accepted two ON", rule);

            doubled.set_value("Z", ElementValue::Switch(SwitchStatus::On)).unwrap();
            assert!(doubled.check_correct_values());
        }
    }

    #[test]
    fn test_number_bounds_keep_value_inside() {
        let mut property = Property::builder(PropertyKind::Number, "ABS")
            .element(Element::number("POS", 50.0, NumberSpec::new("%g", 0.0, 100.0, 1.0).unwrap()).unwrap())
            .build()
            .unwrap();

        assert!(matches!(
            property.set_number_bounds("POS", 0.0, 10.0, 1.0),
            Err(IndiError::OutOfRange(_))
        ));
        assert!(matches!(
            property.set_number_bounds("POS", 80.0, 20.0, 1.0),
            Err(IndiError::OutOfRange(_))
        ));
        let spec = property.element("POS").unwrap().number_spec().unwrap();
        assert_eq!((spec.min, spec.max, spec.step), (0.0, 100.0, 1.0));

        property.set_number_bounds("POS", 40.0, 60.0, 0.5).unwrap();
        let spec = property.element("POS").unwrap().number_spec().unwrap();
        assert_eq!((spec.min, spec.max, spec.step), (40.0, 60.0, 0.5));
        assert!(matches!(
            property.set_value("POS", ElementValue::Number(61.0)),
            Err(IndiError::OutOfRange(_))
        ));

        assert!(matches!(
            property.set_number_bounds("NOPE", 0.0, 1.0, 1.0),
            Err(IndiError::NotFound(_))
        ));
        let mut text = Property::builder(PropertyKind::Text, "PORT")
            .element(Element::text("PORT", "/dev/ttyUSB0").unwrap())
            .build()
            .unwrap();
        assert!(matches!(
            text.set_number_bounds("PORT", 0.0, 1.0, 1.0),
            Err(IndiError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_set_values_is_all_or_nothing() {
        let spec = NumberSpec::new("%g", 0.0, 10.0, 1.0).unwrap();
        let mut property = Property::builder(PropertyKind::Number, "GAIN")
            .element(Element::number("R", 1.0, spec.clone()).unwrap())
            .element(Element::number("G", 2.0, spec).unwrap())
            .build()
            .unwrap();

        let result = property.set_values([
            ("R", ElementValue::Number(5.0)),
            ("G", ElementValue::Number(50.0)),
        ]);
        assert!(matches!(result, Err(IndiError::OutOfRange(_))));
        assert_eq!(property.element("R").unwrap().value().as_number(), Some(1.0));

        property
            .set_values([("R", ElementValue::Number(5.0)), ("G", ElementValue::Number(6.0))])
            .unwrap();
        assert_eq!(property.element("G").unwrap().value().as_number(), Some(6.0));

        assert!(matches!(
            property.set_value("B", ElementValue::Number(1.0)),
            Err(IndiError::NotFound(_))
        ));
    }

    #[test]
    fn test_summary() {
        let property = slew_mode();
        assert_eq!(property.to_string(), "SLEW_MODE - Idle\n  A - On\n  B - Off\n  C - Off\n");
    }

    #[test]
    fn test_load_or_build_fresh() {
        let mut store = MockPropertyStore::new();
        store.expect_load().times(1).returning(|_| Ok(None));
        store.expect_save().times(1).returning(|_, _| Ok(()));

        let builder = Property::builder(PropertyKind::Text, "PORT")
            .device("My Focuser")
            .element(Element::text("PORT", "/dev/ttyACM0").unwrap());
        let property = Property::load_or_build(Arc::new(store), builder).unwrap();

        assert!(property.is_saveable());
        assert_eq!(property.key().device(), "MyFocuser");
        property.save();
    }

    #[test]
    fn test_load_or_build_restores() {
        let saved = Property::builder(PropertyKind::Text, "PORT")
            .device("Focuser")
            .element(Element::text("PORT", "/dev/ttyUSB1").unwrap())
            .build()
            .unwrap();

        let mut store = MockPropertyStore::new();
        store.expect_load().returning(move |_| Ok(Some(saved.clone())));

        let builder = Property::builder(PropertyKind::Text, "PORT")
            .device("Focuser")
            .element(Element::text("PORT", "/dev/ttyACM0").unwrap());
        let property = Property::load_or_build(Arc::new(store), builder).unwrap();

        assert_eq!(property.element("PORT").unwrap().value().as_text(), Some("/dev/ttyUSB1"));
        assert!(!property.is_published());
    }

    #[test]
    fn test_save_failure_is_swallowed() {
        let mut store = MockPropertyStore::new();
        store.expect_load().returning(|_| Err(IndiError::Persistence("corrupt".into())));
        store
            .expect_save()
            .returning(|_, _| Err(IndiError::Persistence("disk full".into())));

        let builder = Property::builder(PropertyKind::Text, "PORT").element(Element::text("P", "x").unwrap());
        let property = Property::load_or_build(Arc::new(store), builder).unwrap();
        property.save();
    }
}
