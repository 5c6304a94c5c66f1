//! Host value model and value references
//!
//! The instrumentation host hands runtime values to the recorder as
//! [`HostValue`]. Objects, functions and exotic values are shared host
//! allocations behind [`ObjectRef`]; the recorder only ever looks at them
//! through the [`HostObject`] trait.
//!
//! Exported records never embed a live value. Every value is turned into a
//! [`ValueReference`]: primitives by value (stringified), everything else by
//! surrogate id.

use crate::error::HostError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Surrogate id in the object-identity sequence (objects, functions, exotics)
pub type ObjectId = u64;

/// Surrogate id in the function-description sequence
pub type FunctionId = u64;

/// Instruction-site identifier supplied by the host
pub type Iid = u64;

/// Shared handle to a host allocation
pub type ObjectRef = Rc<dyn HostObject>;

/// Read-only view of a host object
///
/// Implemented by the instrumentation host. The recorder never mutates host
/// objects and never calls accessor functions.
pub trait HostObject {
    /// Own property names in host enumeration order
    fn own_property_names(&self) -> Vec<String>;

    /// Own property descriptor for `name`
    ///
    /// `Ok(None)` means the host reports no descriptor (the property vanished
    /// between enumeration and lookup). `Err` models a descriptor the host
    /// could not produce; the recorder skips such properties.
    fn own_property(&self, name: &str) -> Result<Option<HostProperty>, HostError>;

    /// Prototype of this object, `None` for a null prototype
    fn prototype(&self) -> Option<ObjectRef>;

    /// Generic textual rendering, used as function source fallback
    fn render_source(&self) -> Option<String> {
        None
    }

    /// Host type label, reported for exotic values
    fn type_label(&self) -> String {
        "object".to_string()
    }
}

/// A runtime value as supplied by the host
#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    /// Symbol, carried by its description
    Symbol(String),
    Object(ObjectRef),
    Function(ObjectRef),
    /// Host-specific value the recorder does not describe structurally
    Exotic(ObjectRef),
}

impl HostValue {
    /// Wrap a concrete host object as an object value
    pub fn object<T: HostObject + 'static>(obj: &Rc<T>) -> Self {
        HostValue::Object(obj.clone() as ObjectRef)
    }

    /// Wrap a concrete host object as a function value
    pub fn function<T: HostObject + 'static>(obj: &Rc<T>) -> Self {
        HostValue::Function(obj.clone() as ObjectRef)
    }

    /// Wrap a concrete host object as an exotic value
    pub fn exotic<T: HostObject + 'static>(obj: &Rc<T>) -> Self {
        HostValue::Exotic(obj.clone() as ObjectRef)
    }

    pub fn string(s: impl Into<String>) -> Self {
        HostValue::String(s.into())
    }

    /// `typeof`-style name of the value
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null | HostValue::Object(_) => "object",
            HostValue::Boolean(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::String(_) => "string",
            HostValue::Symbol(_) => "symbol",
            HostValue::Function(_) => "function",
            HostValue::Exotic(_) => "exotic",
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, HostValue::Function(_))
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Undefined => write!(f, "Undefined"),
            HostValue::Null => write!(f, "Null"),
            HostValue::Boolean(b) => write!(f, "Boolean({b})"),
            HostValue::Number(n) => write!(f, "Number({n})"),
            HostValue::String(s) => write!(f, "String({s:?})"),
            HostValue::Symbol(s) => write!(f, "Symbol({s:?})"),
            HostValue::Object(o) => write!(f, "Object({:p})", Rc::as_ptr(o) as *const ()),
            HostValue::Function(o) => write!(f, "Function({:p})", Rc::as_ptr(o) as *const ()),
            HostValue::Exotic(o) => write!(f, "Exotic({:p})", Rc::as_ptr(o) as *const ()),
        }
    }
}

impl fmt::Debug for dyn HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:p})", self.type_label(), self as *const dyn HostObject as *const ())
    }
}

/// Storage slot of a host property
#[derive(Clone, Debug)]
pub enum PropertySlot {
    Data {
        value: HostValue,
        writable: bool,
    },
    Accessor {
        get: Option<ObjectRef>,
        set: Option<ObjectRef>,
    },
}

/// Host-side property descriptor
#[derive(Clone, Debug)]
pub struct HostProperty {
    pub slot: PropertySlot,
    pub enumerable: bool,
    pub configurable: bool,
}

impl HostProperty {
    /// Writable, enumerable, configurable data property
    pub fn data(value: HostValue) -> Self {
        Self {
            slot: PropertySlot::Data {
                value,
                writable: true,
            },
            enumerable: true,
            configurable: true,
        }
    }

    /// Accessor property with the given getter and setter functions
    pub fn accessor(get: Option<ObjectRef>, set: Option<ObjectRef>) -> Self {
        Self {
            slot: PropertySlot::Accessor { get, set },
            enumerable: true,
            configurable: true,
        }
    }

    pub fn with_flags(mut self, enumerable: bool, configurable: bool) -> Self {
        self.enumerable = enumerable;
        self.configurable = configurable;
        self
    }

    /// Mark a data property read-only (no-op for accessors)
    pub fn read_only(mut self) -> Self {
        if let PropertySlot::Data { writable, .. } = &mut self.slot {
            *writable = false;
        }
        self
    }
}

/// Id-or-value encoding of a runtime value inside exported records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ValueReference {
    Undefined,
    Null,
    Boolean {
        val: String,
    },
    Number {
        val: String,
    },
    String {
        val: String,
    },
    Symbol {
        val: String,
    },
    Object {
        id: ObjectId,
    },
    Function {
        id: ObjectId,
        funid: FunctionId,
    },
    Exotic {
        id: ObjectId,
        label: String,
    },
}

impl ValueReference {
    /// Object-identity id carried by this reference, if any
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            ValueReference::Object { id }
            | ValueReference::Function { id, .. }
            | ValueReference::Exotic { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn number(n: f64) -> Self {
        ValueReference::Number {
            val: format_number(n),
        }
    }
}

impl fmt::Display for ValueReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueReference::Undefined => write!(f, "undefined"),
            ValueReference::Null => write!(f, "null"),
            ValueReference::Boolean { val } | ValueReference::Number { val } => write!(f, "{val}"),
            ValueReference::String { val } => write!(f, "\"{val}\""),
            ValueReference::Symbol { val } => write!(f, "symbol:{val}"),
            ValueReference::Object { id } => write!(f, "object {id}"),
            ValueReference::Function { id, funid } => write!(f, "function {id}/{funid}"),
            ValueReference::Exotic { id, label } => write!(f, "exotic {label} {id}"),
        }
    }
}

/// Stringify a number the way the traced language prints it
///
/// Integral values drop the fractional part, non-finite values use the
/// language spellings, and negative zero prints as `0`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == f64::INFINITY {
        "Infinity".to_string()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number_integral() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-42.0), "-42");
        assert_eq!(format_number(0.5), "0.5");
    }

    #[test]
    fn test_format_number_special_values() {
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(-0.0), "0");
    }

    #[test]
    fn test_value_reference_serialization() {
        let json = serde_json::to_string(&ValueReference::number(1.0)).unwrap();
        assert_eq!(json, r#"{"type":"number","val":"1"}"#);

        let json = serde_json::to_string(&ValueReference::Function { id: 3, funid: 0 }).unwrap();
        assert_eq!(json, r#"{"type":"function","id":3,"funid":0}"#);

        let json = serde_json::to_string(&ValueReference::Null).unwrap();
        assert_eq!(json, r#"{"type":"null"}"#);
    }

    #[test]
    fn test_object_id_only_for_references() {
        assert_eq!(ValueReference::Object { id: 7 }.object_id(), Some(7));
        assert_eq!(ValueReference::Undefined.object_id(), None);
        assert_eq!(
            ValueReference::String {
                val: "x".to_string()
            }
            .object_id(),
            None
        );
    }

    #[test]
    fn test_type_name() {
        assert_eq!(HostValue::Null.type_name(), "object");
        assert_eq!(HostValue::Number(1.0).type_name(), "number");
        assert_eq!(HostValue::Undefined.type_name(), "undefined");
    }

    #[test]
    fn test_accessor_property_debug_shows_label() {
        use crate::heap::HeapObject;

        let getter = HeapObject::function("function () {}") as ObjectRef;
        let property = HostProperty::accessor(Some(getter), None);
        let text = format!("{:?}", property);
        assert!(text.contains("Accessor"));
        assert!(text.contains("function(0x"));
    }
}
