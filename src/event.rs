//! Exported record types
//!
//! A trace is an ordered stream of [`Record`]s. Event records describe one
//! lifecycle hook each; description records (objects, functions, exotics)
//! appear the first time an id is referenced, ahead of the record that
//! references it.
//!
//! JSON layout: every record carries a `fact` tag, event records add a
//! `step` tag, and value fields are [`ValueReference`]s:
//!
//! ```json
//! {"fact":"step","step":"funpost","iid":9,"f":{"type":"function","id":3,"funid":0},
//!  "base":{"type":"undefined"},"args":{"type":"object","id":4},
//!  "isConstructor":false,"isMethod":false,"result":{"type":"number","val":"1"}}
//! ```

use crate::describe::ObjectRecord;
use crate::function::FunctionRecord;
use crate::value::{FunctionId, Iid, ObjectId, ValueReference};
use serde::{Deserialize, Serialize};

/// How a `declare` hook binds its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclareKind {
    /// The `arguments` array of a function
    ArgumentArray,
    /// A formal parameter
    Argument,
    /// A `catch` clause parameter
    Catch,
    /// Any other local declaration
    Local,
}

impl DeclareKind {
    pub fn classify(is_argument: bool, argument_index: i64, is_catch_param: bool) -> Self {
        match (is_argument, argument_index, is_catch_param) {
            (true, -1, _) => DeclareKind::ArgumentArray,
            (true, index, _) if index >= 0 => DeclareKind::Argument,
            (_, _, true) => DeclareKind::Catch,
            _ => DeclareKind::Local,
        }
    }
}

/// One lifecycle hook, encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum EventRecord {
    FunPre {
        iid: Iid,
        f: ValueReference,
        base: ValueReference,
        args: ValueReference,
        is_constructor: bool,
        is_method: bool,
    },
    FunPost {
        iid: Iid,
        f: ValueReference,
        base: ValueReference,
        args: ValueReference,
        is_constructor: bool,
        is_method: bool,
        result: ValueReference,
    },
    Literal {
        iid: Iid,
        val: ValueReference,
        has_getter_setter: bool,
    },
    ForIn {
        iid: Iid,
        val: ValueReference,
    },
    Declare {
        iid: Iid,
        name: String,
        val: ValueReference,
        kind: DeclareKind,
        is_argument: bool,
        argument_index: i64,
        is_catch_param: bool,
    },
    GetPre {
        iid: Iid,
        base: ValueReference,
        offset: String,
        is_computed: bool,
        is_op_assign: bool,
        is_method_call: bool,
    },
    GetPost {
        iid: Iid,
        base: ValueReference,
        offset: String,
        val: ValueReference,
        is_computed: bool,
        is_op_assign: bool,
        is_method_call: bool,
    },
    PutPre {
        iid: Iid,
        base: ValueReference,
        offset: String,
        val: ValueReference,
        is_computed: bool,
        is_op_assign: bool,
    },
    PutPost {
        iid: Iid,
        base: ValueReference,
        offset: String,
        val: ValueReference,
        is_computed: bool,
        is_op_assign: bool,
    },
    Read {
        iid: Iid,
        name: String,
        val: ValueReference,
        is_global: bool,
        is_script_local: bool,
    },
    Write {
        iid: Iid,
        name: String,
        val: ValueReference,
        lhs: ValueReference,
        is_global: bool,
        is_script_local: bool,
    },
    Return {
        iid: Iid,
        val: ValueReference,
    },
    Throw {
        iid: Iid,
        val: ValueReference,
    },
    FuncEnter {
        iid: Iid,
        f: ValueReference,
        #[serde(rename = "this")]
        this_value: ValueReference,
        args: ValueReference,
    },
    FuncExit {
        iid: Iid,
        ret: ValueReference,
        exc: ValueReference,
    },
    ScriptEnter {
        iid: Iid,
        instrumented: String,
        original: String,
    },
    ScriptExit {
        iid: Iid,
    },
    /// Script exit with a pending exception
    ScriptExc {
        iid: Iid,
        exc: ValueReference,
    },
    BinaryPre {
        iid: Iid,
        op: String,
        left: ValueReference,
        right: ValueReference,
        is_op_assign: bool,
        is_switch_comparison: bool,
        is_computed: bool,
    },
    BinaryPost {
        iid: Iid,
        op: String,
        left: ValueReference,
        right: ValueReference,
        is_op_assign: bool,
        is_switch_comparison: bool,
        is_computed: bool,
        result: ValueReference,
    },
    UnaryPre {
        iid: Iid,
        op: String,
        left: ValueReference,
    },
    UnaryPost {
        iid: Iid,
        op: String,
        left: ValueReference,
        result: ValueReference,
    },
    Conditional {
        iid: Iid,
        result: ValueReference,
    },
    ExprEnd {
        iid: Iid,
    },
    With {
        iid: Iid,
        val: ValueReference,
    },
}

impl EventRecord {
    /// Value of the `step` tag
    pub fn step(&self) -> &'static str {
        match self {
            EventRecord::FunPre { .. } => "funpre",
            EventRecord::FunPost { .. } => "funpost",
            EventRecord::Literal { .. } => "literal",
            EventRecord::ForIn { .. } => "forin",
            EventRecord::Declare { .. } => "declare",
            EventRecord::GetPre { .. } => "getpre",
            EventRecord::GetPost { .. } => "getpost",
            EventRecord::PutPre { .. } => "putpre",
            EventRecord::PutPost { .. } => "putpost",
            EventRecord::Read { .. } => "read",
            EventRecord::Write { .. } => "write",
            EventRecord::Return { .. } => "return",
            EventRecord::Throw { .. } => "throw",
            EventRecord::FuncEnter { .. } => "funcenter",
            EventRecord::FuncExit { .. } => "funcexit",
            EventRecord::ScriptEnter { .. } => "scriptenter",
            EventRecord::ScriptExit { .. } => "scriptexit",
            EventRecord::ScriptExc { .. } => "scriptexc",
            EventRecord::BinaryPre { .. } => "binarypre",
            EventRecord::BinaryPost { .. } => "binarypost",
            EventRecord::UnaryPre { .. } => "unarypre",
            EventRecord::UnaryPost { .. } => "unarypost",
            EventRecord::Conditional { .. } => "conditional",
            EventRecord::ExprEnd { .. } => "exprend",
            EventRecord::With { .. } => "with",
        }
    }

    pub fn iid(&self) -> Iid {
        match self {
            EventRecord::FunPre { iid, .. }
            | EventRecord::FunPost { iid, .. }
            | EventRecord::Literal { iid, .. }
            | EventRecord::ForIn { iid, .. }
            | EventRecord::Declare { iid, .. }
            | EventRecord::GetPre { iid, .. }
            | EventRecord::GetPost { iid, .. }
            | EventRecord::PutPre { iid, .. }
            | EventRecord::PutPost { iid, .. }
            | EventRecord::Read { iid, .. }
            | EventRecord::Write { iid, .. }
            | EventRecord::Return { iid, .. }
            | EventRecord::Throw { iid, .. }
            | EventRecord::FuncEnter { iid, .. }
            | EventRecord::FuncExit { iid, .. }
            | EventRecord::ScriptEnter { iid, .. }
            | EventRecord::ScriptExit { iid }
            | EventRecord::ScriptExc { iid, .. }
            | EventRecord::BinaryPre { iid, .. }
            | EventRecord::BinaryPost { iid, .. }
            | EventRecord::UnaryPre { iid, .. }
            | EventRecord::UnaryPost { iid, .. }
            | EventRecord::Conditional { iid, .. }
            | EventRecord::ExprEnd { iid }
            | EventRecord::With { iid, .. } => *iid,
        }
    }

    /// Value fields of this event, labelled, in declaration order
    pub fn values(&self) -> Vec<(&'static str, &ValueReference)> {
        match self {
            EventRecord::FunPre { f, base, args, .. } => {
                vec![("f", f), ("base", base), ("args", args)]
            }
            EventRecord::FunPost {
                f,
                base,
                args,
                result,
                ..
            } => vec![("f", f), ("base", base), ("args", args), ("result", result)],
            EventRecord::Literal { val, .. }
            | EventRecord::ForIn { val, .. }
            | EventRecord::Declare { val, .. }
            | EventRecord::Return { val, .. }
            | EventRecord::Throw { val, .. }
            | EventRecord::With { val, .. } => vec![("val", val)],
            EventRecord::GetPre { base, .. } => vec![("base", base)],
            EventRecord::GetPost { base, val, .. }
            | EventRecord::PutPre { base, val, .. }
            | EventRecord::PutPost { base, val, .. } => vec![("base", base), ("val", val)],
            EventRecord::Read { val, .. } => vec![("val", val)],
            EventRecord::Write { val, lhs, .. } => vec![("val", val), ("lhs", lhs)],
            EventRecord::FuncEnter {
                f,
                this_value,
                args,
                ..
            } => vec![("f", f), ("this", this_value), ("args", args)],
            EventRecord::FuncExit { ret, exc, .. } => vec![("ret", ret), ("exc", exc)],
            EventRecord::ScriptEnter { .. }
            | EventRecord::ScriptExit { .. }
            | EventRecord::ExprEnd { .. } => Vec::new(),
            EventRecord::ScriptExc { exc, .. } => vec![("exc", exc)],
            EventRecord::BinaryPre { left, right, .. } => vec![("left", left), ("right", right)],
            EventRecord::BinaryPost {
                left,
                right,
                result,
                ..
            } => vec![("left", left), ("right", right), ("result", result)],
            EventRecord::UnaryPre { left, .. } => vec![("left", left)],
            EventRecord::UnaryPost { left, result, .. } => vec![("left", left), ("result", result)],
            EventRecord::Conditional { result, .. } => vec![("result", result)],
        }
    }
}

/// One entry of the exported record stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fact", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Record {
    /// Whether globals are properties of the global object
    GlobalsAreProperties { value: bool },
    /// A named root value
    Global { name: String, value: ValueReference },
    /// A lifecycle event
    Step(EventRecord),
    /// Structural description of an object id
    Object(ObjectRecord),
    /// Description of a function id
    Function(FunctionRecord),
    /// Original source recovered after the function was first described
    FunctionSource { fun_id: FunctionId, text: String },
    /// Opaque description of an exotic value
    Exotic { id: ObjectId, label: String },
    /// End of execution
    End,
}

impl Record {
    /// Object ids this record describes
    pub fn describes(&self) -> Option<ObjectId> {
        match self {
            Record::Object(object) => Some(object.id),
            Record::Exotic { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Object ids this record refers to
    pub fn references(&self) -> Vec<ObjectId> {
        match self {
            Record::Global { value, .. } => value.object_id().into_iter().collect(),
            Record::Step(event) => event
                .values()
                .into_iter()
                .filter_map(|(_, value)| value.object_id())
                .collect(),
            Record::Object(object) => object.references(),
            Record::Function(function) => vec![function.object_id],
            _ => Vec::new(),
        }
    }

    pub fn is_step(&self) -> bool {
        matches!(self, Record::Step(_))
    }
}

impl From<EventRecord> for Record {
    fn from(event: EventRecord) -> Self {
        Record::Step(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_kind_classification() {
        assert_eq!(DeclareKind::classify(true, -1, false), DeclareKind::ArgumentArray);
        assert_eq!(DeclareKind::classify(true, 0, false), DeclareKind::Argument);
        assert_eq!(DeclareKind::classify(true, 3, false), DeclareKind::Argument);
        assert_eq!(DeclareKind::classify(false, -1, true), DeclareKind::Catch);
        assert_eq!(DeclareKind::classify(false, -1, false), DeclareKind::Local);
    }

    #[test]
    fn test_step_record_json_layout() {
        let record = Record::Step(EventRecord::Conditional {
            iid: 4,
            result: ValueReference::Boolean {
                val: "true".to_string(),
            },
        });

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["fact"], "step");
        assert_eq!(json["step"], "conditional");
        assert_eq!(json["iid"], 4);
        assert_eq!(json["result"]["type"], "boolean");
    }

    #[test]
    fn test_field_names_are_camel_case() {
        let event = EventRecord::FunPre {
            iid: 1,
            f: ValueReference::Function { id: 2, funid: 0 },
            base: ValueReference::Undefined,
            args: ValueReference::Object { id: 3 },
            is_constructor: true,
            is_method: false,
        };

        let json = serde_json::to_string(&Record::Step(event)).unwrap();
        assert!(json.contains("\"isConstructor\":true"));
        assert!(json.contains("\"isMethod\":false"));
        assert!(json.contains("\"step\":\"funpre\""));
    }

    #[test]
    fn test_record_roundtrip_through_json() {
        let record = Record::Step(EventRecord::FuncEnter {
            iid: 8,
            f: ValueReference::Function { id: 5, funid: 1 },
            this_value: ValueReference::Object { id: 0 },
            args: ValueReference::Object { id: 6 },
        });

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"this\":"));
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_end_record() {
        let json = serde_json::to_string(&Record::End).unwrap();
        assert_eq!(json, r#"{"fact":"end"}"#);
    }

    #[test]
    fn test_step_references() {
        let record = Record::Step(EventRecord::Write {
            iid: 2,
            name: "x".to_string(),
            val: ValueReference::Object { id: 9 },
            lhs: ValueReference::Undefined,
            is_global: true,
            is_script_local: false,
        });
        assert_eq!(record.references(), vec![9]);
        assert_eq!(record.describes(), None);
    }
}
