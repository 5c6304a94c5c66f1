//! Value description: surrogate references and structural object records
//!
//! [`ValueDescriber`] turns any [`HostValue`] into a [`ValueReference`]. The
//! first time an object is seen it is registered and then described: own
//! properties and the properties of every prototype level are flattened into
//! one [`ObjectRecord`].
//!
//! The id is always registered *before* the property walk starts. A property
//! that leads back to an object under construction therefore hits the
//! "already known" branch and is encoded as a plain reference, which is what
//! makes cyclic graphs terminate.
//!
//! Description records are queued in emission order (a nested object's
//! record precedes its parent's) and drained by the encoder, which submits
//! them ahead of the event that triggered them.

use crate::event::Record;
use crate::identity::IdentityRegistry;
use crate::value::{
    FunctionId, HostValue, ObjectId, ObjectRef, PropertySlot, ValueReference,
};
use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::rc::Rc;

use crate::function::SourceOrigin;

/// Property names never described (instrumentation bookkeeping and
/// call-site reflection)
pub const DEFAULT_EXCLUDED: &[&str] = &["caller", "callee", "arguments", "*J$IID*", "*J$SID*"];

/// Property descriptor as exported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PropertyDescriptor {
    GetterOnly {
        getter: ValueReference,
        enumerable: bool,
        configurable: bool,
    },
    SetterOnly {
        setter: ValueReference,
        enumerable: bool,
        configurable: bool,
    },
    Accessor {
        getter: ValueReference,
        setter: ValueReference,
        enumerable: bool,
        configurable: bool,
    },
    Data {
        value: ValueReference,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    pub fn is_enumerable(&self) -> bool {
        match self {
            PropertyDescriptor::GetterOnly { enumerable, .. }
            | PropertyDescriptor::SetterOnly { enumerable, .. }
            | PropertyDescriptor::Accessor { enumerable, .. }
            | PropertyDescriptor::Data { enumerable, .. } => *enumerable,
        }
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            PropertyDescriptor::GetterOnly { configurable, .. }
            | PropertyDescriptor::SetterOnly { configurable, .. }
            | PropertyDescriptor::Accessor { configurable, .. }
            | PropertyDescriptor::Data { configurable, .. } => *configurable,
        }
    }

    /// Writable flag; accessors are never writable
    pub fn is_writable(&self) -> bool {
        matches!(self, PropertyDescriptor::Data { writable: true, .. })
    }

    /// Value references held by this descriptor
    pub fn references(&self) -> Vec<&ValueReference> {
        match self {
            PropertyDescriptor::GetterOnly { getter, .. } => vec![getter],
            PropertyDescriptor::SetterOnly { setter, .. } => vec![setter],
            PropertyDescriptor::Accessor { getter, setter, .. } => vec![getter, setter],
            PropertyDescriptor::Data { value, .. } => vec![value],
        }
    }
}

/// One property of an [`ObjectRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedProperty {
    pub name: String,
    #[serde(flatten)]
    pub descriptor: PropertyDescriptor,
}

/// Structural description of one object id, built once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub properties: Vec<NamedProperty>,
}

impl ObjectRecord {
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.descriptor)
    }

    /// Object ids referenced by any property
    pub fn references(&self) -> Vec<ObjectId> {
        self.properties
            .iter()
            .flat_map(|p| p.descriptor.references())
            .filter_map(ValueReference::object_id)
            .collect()
    }
}

/// Allow-list restricting which property names are described
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExposureFilter {
    allowed: HashSet<String>,
}

impl ExposureFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, name: &str) -> bool {
        self.allowed.contains(name)
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

/// Counters kept by the describer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriberStats {
    pub objects_described: u64,
    pub functions_described: u64,
    pub exotics_seen: u64,
    pub properties_skipped: u64,
}

/// Session-owned value describer
///
/// Owns both id sequences and the queue of pending description records.
pub struct ValueDescriber {
    pub(crate) objects: IdentityRegistry,
    pub(crate) functions: IdentityRegistry,
    pub(crate) function_sources: FnvHashMap<FunctionId, SourceOrigin>,
    excluded: HashSet<String>,
    pending: Vec<Record>,
    pub(crate) stats: DescriberStats,
}

impl ValueDescriber {
    pub fn new() -> Self {
        Self::with_excluded(DEFAULT_EXCLUDED.iter().copied())
    }

    /// Describer skipping the given property names everywhere
    pub fn with_excluded<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            objects: IdentityRegistry::new(),
            functions: IdentityRegistry::new(),
            function_sources: FnvHashMap::default(),
            excluded: excluded.into_iter().map(Into::into).collect(),
            pending: Vec::new(),
            stats: DescriberStats::default(),
        }
    }

    /// Encode `value`, describing it on first sight
    pub fn reference(&mut self, value: &HostValue) -> ValueReference {
        self.reference_filtered(value, None)
    }

    /// Encode `value`; a first-sight description of it honours `filter`
    ///
    /// The filter applies only to `value` itself, not to objects reached
    /// through its properties.
    pub fn reference_filtered(
        &mut self,
        value: &HostValue,
        filter: Option<&ExposureFilter>,
    ) -> ValueReference {
        match value {
            HostValue::Undefined => ValueReference::Undefined,
            HostValue::Null => ValueReference::Null,
            HostValue::Boolean(b) => ValueReference::Boolean { val: b.to_string() },
            HostValue::Number(n) => ValueReference::number(*n),
            HostValue::String(s) => ValueReference::String { val: s.clone() },
            HostValue::Symbol(s) => ValueReference::Symbol { val: s.clone() },
            HostValue::Object(obj) => ValueReference::Object {
                id: self.object_identity(obj, filter),
            },
            HostValue::Function(f) => self.function_value(f, filter, None),
            HostValue::Exotic(obj) => {
                let label = obj.type_label();
                let (id, fresh) = self.objects.resolve_or_assign(obj);
                if fresh {
                    self.stats.exotics_seen += 1;
                    self.emit(Record::Exotic {
                        id,
                        label: label.clone(),
                    });
                }
                ValueReference::Exotic { id, label }
            }
        }
    }

    /// Object id of `obj`, registering and describing it on first sight
    pub(crate) fn object_identity(
        &mut self,
        obj: &ObjectRef,
        filter: Option<&ExposureFilter>,
    ) -> ObjectId {
        let (id, fresh) = self.objects.resolve_or_assign(obj);
        if fresh {
            self.describe_registered(id, obj, filter);
        }
        id
    }

    /// Walk and emit the record of an id registered by the caller
    pub(crate) fn describe_registered(
        &mut self,
        id: ObjectId,
        obj: &ObjectRef,
        filter: Option<&ExposureFilter>,
    ) {
        let record = self.describe(id, obj, filter);
        self.stats.objects_described += 1;
        self.emit(Record::Object(record));
    }

    /// Build the record for a freshly registered id
    fn describe(
        &mut self,
        id: ObjectId,
        obj: &ObjectRef,
        filter: Option<&ExposureFilter>,
    ) -> ObjectRecord {
        let mut record = ObjectRecord {
            id,
            properties: Vec::new(),
        };
        let mut shadowed: HashSet<String> = HashSet::new();
        let mut visited: FnvHashSet<usize> = FnvHashSet::default();

        let mut level = Some(obj.clone());
        while let Some(current) = level {
            if !visited.insert(Rc::as_ptr(&current) as *const () as usize) {
                break;
            }
            self.describe_level(&current, filter, &mut shadowed, &mut record);
            level = current.prototype();
        }

        record
    }

    fn describe_level(
        &mut self,
        level: &ObjectRef,
        filter: Option<&ExposureFilter>,
        shadowed: &mut HashSet<String>,
        record: &mut ObjectRecord,
    ) {
        for name in level.own_property_names() {
            if self.excluded.contains(&name) || filter.is_some_and(|f| !f.allows(&name)) {
                continue;
            }
            if !shadowed.insert(name.clone()) {
                continue;
            }

            let property = match level.own_property(&name) {
                Ok(Some(property)) => property,
                Ok(None) => {
                    self.stats.properties_skipped += 1;
                    continue;
                }
                Err(err) => {
                    tracing::debug!(property = %name, error = %err, "skipping unreadable property");
                    self.stats.properties_skipped += 1;
                    continue;
                }
            };

            let enumerable = property.enumerable;
            let configurable = property.configurable;
            let descriptor = match property.slot {
                PropertySlot::Accessor {
                    get: Some(get),
                    set: Some(set),
                } => PropertyDescriptor::Accessor {
                    getter: self.reference(&HostValue::Function(get)),
                    setter: self.reference(&HostValue::Function(set)),
                    enumerable,
                    configurable,
                },
                PropertySlot::Accessor {
                    get: Some(get),
                    set: None,
                } => PropertyDescriptor::GetterOnly {
                    getter: self.reference(&HostValue::Function(get)),
                    enumerable,
                    configurable,
                },
                PropertySlot::Accessor {
                    get: None,
                    set: Some(set),
                } => PropertyDescriptor::SetterOnly {
                    setter: self.reference(&HostValue::Function(set)),
                    enumerable,
                    configurable,
                },
                PropertySlot::Accessor {
                    get: None,
                    set: None,
                } => PropertyDescriptor::Data {
                    value: ValueReference::Undefined,
                    writable: false,
                    enumerable,
                    configurable,
                },
                PropertySlot::Data { value, writable } => PropertyDescriptor::Data {
                    value: self.reference(&value),
                    writable,
                    enumerable,
                    configurable,
                },
            };

            record.properties.push(NamedProperty { name, descriptor });
        }
    }

    pub(crate) fn emit(&mut self, record: Record) {
        self.pending.push(record);
    }

    /// Take the description records queued since the last drain
    pub fn drain(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.pending)
    }

    /// Object id already assigned to `value`, without describing anything
    pub fn known_id(&self, value: &HostValue) -> Option<ObjectId> {
        match value {
            HostValue::Object(obj) | HostValue::Function(obj) | HostValue::Exotic(obj) => {
                self.objects.lookup(obj)
            }
            _ => None,
        }
    }

    pub fn stats(&self) -> DescriberStats {
        self.stats
    }

    /// Number of object ids assigned so far
    pub fn objects_assigned(&self) -> u64 {
        self.objects.assigned()
    }

    /// Number of function ids assigned so far
    pub fn functions_assigned(&self) -> u64 {
        self.functions.assigned()
    }
}

impl Default for ValueDescriber {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapObject;
    use crate::value::HostProperty;

    fn objects(records: &[Record]) -> Vec<&ObjectRecord> {
        records
            .iter()
            .filter_map(|r| match r {
                Record::Object(o) => Some(o),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_primitives_encode_by_value() {
        let mut d = ValueDescriber::new();
        assert_eq!(d.reference(&HostValue::Undefined), ValueReference::Undefined);
        assert_eq!(d.reference(&HostValue::Null), ValueReference::Null);
        assert_eq!(
            d.reference(&HostValue::Boolean(true)),
            ValueReference::Boolean {
                val: "true".to_string()
            }
        );
        assert_eq!(
            d.reference(&HostValue::string("hi")),
            ValueReference::String {
                val: "hi".to_string()
            }
        );
        assert_eq!(d.objects_assigned(), 0);
        assert!(d.drain().is_empty());
    }

    #[test]
    fn test_object_described_once() {
        let mut d = ValueDescriber::new();
        let obj = HeapObject::plain();
        obj.set("x", HostValue::Number(1.0));
        let value = HostValue::object(&obj);

        assert_eq!(d.reference(&value), ValueReference::Object { id: 0 });
        assert_eq!(d.reference(&value), ValueReference::Object { id: 0 });

        let records = d.drain();
        assert_eq!(records.len(), 1);
        let record = objects(&records)[0];
        assert_eq!(
            record.property("x"),
            Some(&PropertyDescriptor::Data {
                value: ValueReference::number(1.0),
                writable: true,
                enumerable: true,
                configurable: true,
            })
        );
        assert_eq!(d.stats().objects_described, 1);
    }

    #[test]
    fn test_self_cycle_terminates() {
        let mut d = ValueDescriber::new();
        let obj = HeapObject::plain();
        obj.set("me", HostValue::object(&obj));

        assert_eq!(d.reference(&HostValue::object(&obj)), ValueReference::Object { id: 0 });
        let records = d.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(
            objects(&records)[0].property("me").map(|p| p.references()[0].clone()),
            Some(ValueReference::Object { id: 0 })
        );
    }

    #[test]
    fn test_nested_records_precede_parent() {
        let mut d = ValueDescriber::new();
        let parent = HeapObject::plain();
        let child = HeapObject::plain();
        parent.set("child", HostValue::object(&child));
        child.set("parent", HostValue::object(&parent));

        d.reference(&HostValue::object(&parent));
        let records = d.drain();
        let ids: Vec<ObjectId> = objects(&records).iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 0]);
    }

    #[test]
    fn test_accessor_kinds() {
        let mut d = ValueDescriber::new();
        let obj = HeapObject::plain();
        let getter = HeapObject::function("function () { return 1; }") as ObjectRef;
        let setter = HeapObject::function("function (v) {}") as ObjectRef;
        obj.define("both", HostProperty::accessor(Some(getter.clone()), Some(setter.clone())));
        obj.define("get", HostProperty::accessor(Some(getter.clone()), None));
        obj.define("set", HostProperty::accessor(None, Some(setter)));

        d.reference(&HostValue::object(&obj));
        let records = d.drain();
        let record = objects(&records).into_iter().find(|o| o.id == 0).unwrap();

        assert!(matches!(record.property("both"), Some(PropertyDescriptor::Accessor { .. })));
        assert!(matches!(record.property("get"), Some(PropertyDescriptor::GetterOnly { .. })));
        assert!(matches!(record.property("set"), Some(PropertyDescriptor::SetterOnly { .. })));
        // getter described once even though it is used twice
        assert_eq!(d.functions_assigned(), 2);
    }

    #[test]
    fn test_flags_recorded() {
        let mut d = ValueDescriber::new();
        let obj = HeapObject::plain();
        obj.define(
            "frozen",
            HostProperty::data(HostValue::Number(3.0))
                .read_only()
                .with_flags(false, false),
        );

        d.reference(&HostValue::object(&obj));
        let records = d.drain();
        let prop = objects(&records)[0].property("frozen").unwrap().clone();
        assert!(!prop.is_writable());
        assert!(!prop.is_enumerable());
        assert!(!prop.is_configurable());
    }

    #[test]
    fn test_prototype_chain_flattened_with_shadowing() {
        let mut d = ValueDescriber::new();
        let proto = HeapObject::plain();
        proto.set("inherited", HostValue::Number(1.0));
        proto.set("shadowed", HostValue::string("proto"));
        let obj = HeapObject::plain();
        obj.set("shadowed", HostValue::string("own"));
        obj.set_prototype(Some(proto.clone() as ObjectRef));

        d.reference(&HostValue::object(&obj));
        let records = d.drain();
        let record = objects(&records)[0];

        let names: Vec<&str> = record.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["shadowed", "inherited"]);
        assert_eq!(
            record.property("shadowed").unwrap().references()[0],
            &ValueReference::String {
                val: "own".to_string()
            }
        );
    }

    #[test]
    fn test_prototype_cycle_terminates() {
        let mut d = ValueDescriber::new();
        let a = HeapObject::plain();
        let b = HeapObject::plain();
        a.set("a", HostValue::Number(1.0));
        b.set("b", HostValue::Number(2.0));
        a.set_prototype(Some(b.clone() as ObjectRef));
        b.set_prototype(Some(a.clone() as ObjectRef));

        d.reference(&HostValue::object(&a));
        let records = d.drain();
        assert_eq!(objects(&records)[0].properties.len(), 2);
    }

    #[test]
    fn test_excluded_and_filtered_names() {
        let mut d = ValueDescriber::new();
        let obj = HeapObject::plain();
        obj.set("arguments", HostValue::Null);
        obj.set("*J$IID*", HostValue::Number(1.0));
        obj.set("Math", HostValue::Null);
        obj.set("debris", HostValue::Null);

        let filter = ExposureFilter::new(["Math", "arguments"]);
        d.reference_filtered(&HostValue::object(&obj), Some(&filter));
        let records = d.drain();
        let names: Vec<&str> = objects(&records)[0]
            .properties
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["Math"]);
    }

    #[test]
    fn test_unreadable_property_skipped() {
        let mut d = ValueDescriber::new();
        let obj = HeapObject::plain();
        obj.set("ok", HostValue::Number(1.0));
        obj.poison("broken");

        d.reference(&HostValue::object(&obj));
        let records = d.drain();
        let record = objects(&records)[0];
        assert!(record.property("ok").is_some());
        assert!(record.property("broken").is_none());
        assert_eq!(d.stats().properties_skipped, 1);
    }

    #[test]
    fn test_exotic_value() {
        let mut d = ValueDescriber::new();
        let ext = HeapObject::exotic("bigint");

        let first = d.reference(&HostValue::exotic(&ext));
        let second = d.reference(&HostValue::exotic(&ext));
        assert_eq!(
            first,
            ValueReference::Exotic {
                id: 0,
                label: "bigint".to_string()
            }
        );
        assert_eq!(first, second);
        assert_eq!(
            d.drain(),
            vec![Record::Exotic {
                id: 0,
                label: "bigint".to_string()
            }]
        );
    }

    #[test]
    fn test_object_record_json() {
        let record = ObjectRecord {
            id: 2,
            properties: vec![NamedProperty {
                name: "g".to_string(),
                descriptor: PropertyDescriptor::GetterOnly {
                    getter: ValueReference::Function { id: 3, funid: 1 },
                    enumerable: false,
                    configurable: true,
                },
            }],
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["properties"][0]["name"], "g");
        assert_eq!(json["properties"][0]["kind"], "getter-only");
        assert_eq!(json["properties"][0]["getter"]["id"], 3);
    }
}
