//! Elements: the single typed values grouped inside a property
//!
//! The five element kinds are a closed set, so an element stores its value as
//! an [`ElementValue`] variant and kind checks are a `match` on it. Number
//! elements additionally carry a [`NumberSpec`] with bounds and a display
//! format.

use crate::datatypes::{BlobValue, NumberFormat};
use crate::error::{IndiError, IndiResult};
use crate::types::{LightState, PropertyKind, SwitchStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed value of an element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementValue {
    Text(String),
    Number(f64),
    Switch(SwitchStatus),
    Light(LightState),
    Blob(BlobValue),
}

impl ElementValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            ElementValue::Text(_) => PropertyKind::Text,
            ElementValue::Number(_) => PropertyKind::Number,
            ElementValue::Switch(_) => PropertyKind::Switch,
            ElementValue::Light(_) => PropertyKind::Light,
            ElementValue::Blob(_) => PropertyKind::Blob,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ElementValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ElementValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_switch(&self) -> Option<SwitchStatus> {
        match self {
            ElementValue::Switch(status) => Some(*status),
            _ => None,
        }
    }

    pub fn as_light(&self) -> Option<LightState> {
        match self {
            ElementValue::Light(state) => Some(*state),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&BlobValue> {
        match self {
            ElementValue::Blob(blob) => Some(blob),
            _ => None,
        }
    }
}

impl fmt::Display for ElementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementValue::Text(text) => f.write_str(text),
            ElementValue::Number(value) => write!(f, "{}", value),
            ElementValue::Switch(status) => write!(f, "{}", status),
            ElementValue::Light(state) => write!(f, "{}", state),
            ElementValue::Blob(blob) => write!(f, "{} bytes ({})", blob.size(), blob.format()),
        }
    }
}

/// Bounds, step and display format of a number element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberSpec {
    pub format: NumberFormat,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl NumberSpec {
    /// Create a number spec from a format pattern
    ///
    /// # Errors
    ///
    /// Returns `IndiError::BadFormat` if the pattern is not a valid number format
    pub fn new(format: &str, min: f64, max: f64, step: f64) -> IndiResult<Self> {
        Ok(Self {
            format: NumberFormat::parse(format)?,
            min,
            max,
            step,
        })
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn check(&self, element: &str, value: f64) -> IndiResult<()> {
        if self.contains(value) {
            Ok(())
        } else {
            Err(IndiError::OutOfRange(format!(
                "{} = {} not in [{}, {}]",
                element, value, self.min, self.max
            )))
        }
    }
}

/// One named, typed value of a property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    name: String,
    label: String,
    value: ElementValue,
    number: Option<NumberSpec>,
}

impl Element {
    fn with_value(name: &str, value: ElementValue, number: Option<NumberSpec>) -> IndiResult<Self> {
        let name = normalize_name(name)?;
        Ok(Self {
            label: name.clone(),
            name,
            value,
            number,
        })
    }

    pub fn text(name: &str, value: impl Into<String>) -> IndiResult<Self> {
        Self::with_value(name, ElementValue::Text(value.into()), None)
    }

    /// Number element; the initial value must already lie inside the bounds
    pub fn number(name: &str, value: f64, spec: NumberSpec) -> IndiResult<Self> {
        spec.check(name.trim(), value)?;
        Self::with_value(name, ElementValue::Number(value), Some(spec))
    }

    pub fn switch(name: &str, status: SwitchStatus) -> IndiResult<Self> {
        Self::with_value(name, ElementValue::Switch(status), None)
    }

    pub fn light(name: &str, state: LightState) -> IndiResult<Self> {
        Self::with_value(name, ElementValue::Light(state), None)
    }

    pub fn blob(name: &str) -> IndiResult<Self> {
        Self::with_value(name, ElementValue::Blob(BlobValue::default()), None)
    }

    /// Run this element back through its constructor, re-checking the name
    /// and, for numbers, that the value lies inside the bounds
    pub(crate) fn rebuilt(&self) -> IndiResult<Self> {
        let element = match (&self.value, &self.number) {
            (ElementValue::Number(value), Some(spec)) => Self::number(&self.name, *value, spec.clone())?,
            (ElementValue::Number(_), None) => {
                return Err(IndiError::BadFormat(format!("{} has no number bounds", self.name)));
            }
            (value, _) => Self::with_value(&self.name, value.clone(), None)?,
        };
        Ok(element.with_label(&self.label))
    }

    /// Replace the label; an empty label falls back to the element name
    pub fn with_label(mut self, label: &str) -> Self {
        let label = label.trim();
        if !label.is_empty() {
            self.label = label.to_string();
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> PropertyKind {
        self.value.kind()
    }

    pub fn value(&self) -> &ElementValue {
        &self.value
    }

    pub fn number_spec(&self) -> Option<&NumberSpec> {
        self.number.as_ref()
    }

    /// Mutable bounds; [`Property::set_number_bounds`](crate::property::Property::set_number_bounds)
    /// is the public way in
    pub(crate) fn number_spec_mut(&mut self) -> Option<&mut NumberSpec> {
        self.number.as_mut()
    }

    /// Value rendered with the element's display format (numbers only use it)
    pub fn formatted_value(&self) -> String {
        match (&self.value, &self.number) {
            (ElementValue::Number(value), Some(spec)) => spec.format.format(*value),
            (value, _) => value.to_string(),
        }
    }

    /// Check a candidate value against this element without applying it
    ///
    /// # Errors
    ///
    /// Returns `IndiError::TypeMismatch` for a value of another kind and
    /// `IndiError::OutOfRange` for a number outside the bounds
    pub fn validate(&self, value: &ElementValue) -> IndiResult<()> {
        if value.kind() != self.kind() {
            return Err(IndiError::TypeMismatch(format!(
                "{} expects a {} value, got {}",
                self.name,
                self.kind(),
                value.kind()
            )));
        }

        if let (ElementValue::Number(candidate), Some(spec)) = (value, &self.number) {
            spec.check(&self.name, *candidate)?;
        }

        Ok(())
    }

    /// Set a new value; nothing changes when validation fails
    ///
    /// Switch rules are enforced by the owning property, see
    /// [`Property::set_value`](crate::property::Property::set_value).
    pub(crate) fn set_value(&mut self, value: ElementValue) -> IndiResult<()> {
        self.validate(&value)?;
        self.value = value;
        Ok(())
    }

    /// Parse text with the element's number format and set it
    ///
    /// # Errors
    ///
    /// `TypeMismatch` on non-number elements, `BadFormat` for unparseable
    /// text, `OutOfRange` outside the bounds
    pub(crate) fn set_number_from_str(&mut self, text: &str) -> IndiResult<()> {
        let spec = self.number.as_ref().ok_or_else(|| {
            IndiError::TypeMismatch(format!("{} is not a number element", self.name))
        })?;
        let value = spec.format.parse_value(text)?;
        self.set_value(ElementValue::Number(value))
    }
}

/// Trim a property or element name, rejecting empty names
pub(crate) fn normalize_name(name: &str) -> IndiResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(IndiError::InvalidName("Name must not be empty".to_string()));
    }
    Ok(name.to_string())
}
