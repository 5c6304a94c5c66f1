//! In-memory reference host
//!
//! [`HeapObject`] is a small, mutable object model implementing
//! [`HostObject`]: insertion-ordered own properties, a replaceable prototype,
//! optional function source and optionally unreadable properties. The replay
//! driver builds its heap out of these, and the tests use them to build
//! arbitrary (including cyclic) object graphs.

use crate::error::HostError;
use crate::value::{HostObject, HostProperty, HostValue, ObjectRef};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// A host object living in the reference heap
pub struct HeapObject {
    label: String,
    properties: RefCell<Vec<(String, HostProperty)>>,
    prototype: RefCell<Option<ObjectRef>>,
    source: Option<String>,
    unreadable: RefCell<HashSet<String>>,
}

impl HeapObject {
    fn with_parts(label: &str, source: Option<String>) -> Rc<Self> {
        Rc::new(Self {
            label: label.to_string(),
            properties: RefCell::new(Vec::new()),
            prototype: RefCell::new(None),
            source,
            unreadable: RefCell::new(HashSet::new()),
        })
    }

    /// Ordinary object with a null prototype
    pub fn plain() -> Rc<Self> {
        Self::with_parts("object", None)
    }

    /// Function object rendering as `source`
    pub fn function(source: &str) -> Rc<Self> {
        Self::with_parts("function", Some(source.to_string()))
    }

    /// Host-specific object reported under `label`
    pub fn exotic(label: &str) -> Rc<Self> {
        Self::with_parts(label, None)
    }

    /// Define or replace an own property, keeping its original position
    pub fn define(&self, name: &str, property: HostProperty) {
        let mut properties = self.properties.borrow_mut();
        if let Some(slot) = properties.iter_mut().find(|(key, _)| key == name) {
            slot.1 = property;
        } else {
            properties.push((name.to_string(), property));
        }
    }

    /// Define a writable, enumerable, configurable data property
    pub fn set(&self, name: &str, value: HostValue) {
        self.define(name, HostProperty::data(value));
    }

    /// Make the descriptor of `name` fail to read
    pub fn poison(&self, name: &str) {
        self.unreadable.borrow_mut().insert(name.to_string());
        if !self.properties.borrow().iter().any(|(key, _)| key == name) {
            self.set(name, HostValue::Undefined);
        }
    }

    pub fn set_prototype(&self, prototype: Option<ObjectRef>) {
        *self.prototype.borrow_mut() = prototype;
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl HostObject for HeapObject {
    fn own_property_names(&self) -> Vec<String> {
        self.properties
            .borrow()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn own_property(&self, name: &str) -> Result<Option<HostProperty>, HostError> {
        if self.unreadable.borrow().contains(name) {
            return Err(HostError::UnreadableProperty(name.to_string()));
        }
        Ok(self
            .properties
            .borrow()
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, property)| property.clone()))
    }

    fn prototype(&self) -> Option<ObjectRef> {
        self.prototype.borrow().clone()
    }

    fn render_source(&self) -> Option<String> {
        self.source.clone()
    }

    fn type_label(&self) -> String {
        self.label.clone()
    }
}
