//! Function descriptions
//!
//! Every function value gets, besides its object id, an id in the separate
//! function sequence and a [`FunctionRecord`] with best-effort source text.
//! Source text comes, in order of preference, from:
//!
//! 1. the original script source, sliced at the literal's position (only
//!    known at the literal's instruction site), or
//! 2. the host's generic rendering of the function value.
//!
//! Neither being available is a valid outcome, not an error.

use crate::describe::{ExposureFilter, ValueDescriber};
use crate::event::Record;
use crate::value::{FunctionId, HostValue, ObjectId, ObjectRef, ValueReference};
use serde::{Deserialize, Serialize};

/// Where a function's source text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceOrigin {
    /// Sliced from the original script
    Original,
    /// Host rendering of the function value
    Rendered,
    /// No text available
    Unavailable,
}

/// Description of a function id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionRecord {
    pub fun_id: FunctionId,
    pub object_id: ObjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    pub origin: SourceOrigin,
}

impl FunctionRecord {
    /// Build a record, preferring `original` text over the host rendering
    pub fn build(
        fun_id: FunctionId,
        object_id: ObjectId,
        function: &ObjectRef,
        original: Option<String>,
    ) -> Self {
        let (source_text, origin) = match original {
            Some(text) => (Some(text), SourceOrigin::Original),
            None => match function.render_source() {
                Some(text) => (Some(text), SourceOrigin::Rendered),
                None => (None, SourceOrigin::Unavailable),
            },
        };

        Self {
            fun_id,
            object_id,
            source_text,
            origin,
        }
    }
}

impl ValueDescriber {
    /// Function id of `function`, describing it on first sight
    ///
    /// `object_id` must already be assigned. When `original` text arrives for
    /// a function that was described without it, a companion
    /// `function-source` record is emitted instead; the first record is
    /// never rebuilt.
    pub(crate) fn function_identity(
        &mut self,
        function: &ObjectRef,
        object_id: ObjectId,
        original: Option<String>,
    ) -> FunctionId {
        let (fun_id, fresh) = self.functions.resolve_or_assign(function);

        if fresh {
            let record = FunctionRecord::build(fun_id, object_id, function, original);
            self.function_sources.insert(fun_id, record.origin);
            self.stats.functions_described += 1;
            self.emit(Record::Function(record));
        } else if let Some(text) = original {
            let known = self.function_sources.get(&fun_id).copied();
            if known != Some(SourceOrigin::Original) {
                self.function_sources.insert(fun_id, SourceOrigin::Original);
                self.emit(Record::FunctionSource { fun_id, text });
            }
        }

        fun_id
    }

    /// Encode a function literal, attaching its original source text
    ///
    /// Must run before the literal's event is built so the function record
    /// carries the text recovered at this instruction site.
    pub fn reference_literal_function(
        &mut self,
        function: &ObjectRef,
        original: Option<String>,
    ) -> ValueReference {
        self.function_value(function, None, original)
    }

    /// Encode a function value
    ///
    /// Order matters: the object id is registered, then the function id is
    /// assigned and its record built with `original`, and only then is the
    /// object's property graph walked. A function reachable from its own
    /// graph (`f.prototype.constructor`) therefore resolves to the finished
    /// function id instead of being described from its rendering mid-walk,
    /// and functions reached through the walk get later function ids.
    pub(crate) fn function_value(
        &mut self,
        function: &ObjectRef,
        filter: Option<&ExposureFilter>,
        original: Option<String>,
    ) -> ValueReference {
        let (id, fresh) = self.objects.resolve_or_assign(function);
        let funid = self.function_identity(function, id, original);
        if fresh {
            self.describe_registered(id, function, filter);
        }
        ValueReference::Function { id, funid }
    }

    /// Function id already assigned to `value`
    pub fn known_function_id(&self, value: &HostValue) -> Option<FunctionId> {
        match value {
            HostValue::Function(f) => self.functions.lookup(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapObject;

    fn functions(records: &[Record]) -> Vec<&FunctionRecord> {
        records
            .iter()
            .filter_map(|r| match r {
                Record::Function(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_function_gets_both_ids() {
        let mut d = ValueDescriber::new();
        let f = HeapObject::function("function f(){}");

        let reference = d.reference(&HostValue::function(&f));
        assert_eq!(reference, ValueReference::Function { id: 0, funid: 0 });

        let records = d.drain();
        // function record, then the object record it points at
        assert!(matches!(records[0], Record::Function(_)));
        assert!(matches!(records[1], Record::Object(_)));
        let record = functions(&records)[0];
        assert_eq!(record.object_id, 0);
        assert_eq!(record.source_text.as_deref(), Some("function f(){}"));
        assert_eq!(record.origin, SourceOrigin::Rendered);
    }

    #[test]
    fn test_function_described_once() {
        let mut d = ValueDescriber::new();
        let f = HeapObject::function("function f(){}");
        let value = HostValue::function(&f);

        d.reference(&value);
        d.reference(&value);
        assert_eq!(functions(&d.drain()).len(), 1);
        assert_eq!(d.known_function_id(&value), Some(0));
    }

    #[test]
    fn test_literal_source_preferred() {
        let mut d = ValueDescriber::new();
        let f = HeapObject::function("function f(){ /* instrumented */ }") as ObjectRef;

        let reference = d.reference_literal_function(&f, Some("function f(){}".to_string()));
        assert_eq!(reference, ValueReference::Function { id: 0, funid: 0 });

        let records = d.drain();
        let record = functions(&records)[0];
        assert_eq!(record.source_text.as_deref(), Some("function f(){}"));
        assert_eq!(record.origin, SourceOrigin::Original);
    }

    #[test]
    fn test_late_original_source_emits_companion_once() {
        let mut d = ValueDescriber::new();
        let f = HeapObject::function("rendered") as ObjectRef;

        d.reference(&HostValue::Function(f.clone()));
        d.drain();

        d.reference_literal_function(&f, Some("original".to_string()));
        d.reference_literal_function(&f, Some("original".to_string()));
        assert_eq!(
            d.drain(),
            vec![Record::FunctionSource {
                fun_id: 0,
                text: "original".to_string()
            }]
        );
    }

    #[test]
    fn test_missing_source_is_not_an_error() {
        let mut d = ValueDescriber::new();
        let f = HeapObject::plain() as ObjectRef;

        d.reference(&HostValue::Function(f));
        let records = d.drain();
        let record = functions(&records)[0];
        assert!(record.source_text.is_none());
        assert_eq!(record.origin, SourceOrigin::Unavailable);
    }

    #[test]
    fn test_function_record_json() {
        let record = FunctionRecord {
            fun_id: 0,
            object_id: 3,
            source_text: Some("function f(){return 1;}".to_string()),
            origin: SourceOrigin::Original,
        };
        let json = serde_json::to_value(Record::Function(record)).unwrap();
        assert_eq!(json["fact"], "function");
        assert_eq!(json["funId"], 0);
        assert_eq!(json["objectId"], 3);
        assert_eq!(json["sourceText"], "function f(){return 1;}");
    }
}
