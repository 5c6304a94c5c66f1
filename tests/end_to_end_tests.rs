//! End-to-end recording scenarios through `TraceSession`
//!
//! Each test drives the hooks the way an instrumentation host would and
//! inspects the record stream delivered to a memory sink.

mod common;

use common::{assert_no_forward_references, memory_session, memory_session_with, steps};
use rastro::config::RecorderConfig;
use rastro::describe::PropertyDescriptor;
use rastro::event::{EventRecord, Record};
use rastro::function::SourceOrigin;
use rastro::heap::HeapObject;
use rastro::source_map::ScriptSource;
use rastro::value::{HostProperty, ObjectRef};
use rastro::{Analysis, HostValue, ValueReference};

const SCRIPT: &str = "function f(){return 1;}\nf();";

#[test]
fn test_declare_and_call_function() {
    let (mut session, sink, _clock) = memory_session();
    session.register_script("a.js", ScriptSource::new(SCRIPT).with_position(5, [1, 1, 1, 24]));

    let f = HeapObject::function("function f(){ J$.Fe(5); return J$.X1(1); }");
    let args = HeapObject::plain();
    let fv = HostValue::function(&f);
    let argsv = HostValue::object(&args);

    session.script_enter(1, "a_instr_.js", "a.js");
    session.literal(5, &fv, false);
    session.invoke_fun_pre(9, &fv, &HostValue::Undefined, &argsv, false, false);
    session.invoke_fun(
        9,
        &fv,
        &HostValue::Undefined,
        &argsv,
        &HostValue::Number(1.0),
        false,
        false,
    );
    session.script_exit(1, None);
    session.end_execution();

    let records = sink.all_records();
    assert_eq!(
        steps(&records),
        vec!["scriptenter", "literal", "funpre", "funpost", "scriptexit"]
    );

    // Global is id 0, so f is the next object id
    let function = records
        .iter()
        .find_map(|r| match r {
            Record::Function(f) => Some(f),
            _ => None,
        })
        .expect("function record");
    assert_eq!(function.fun_id, 0);
    assert_eq!(function.object_id, 1);
    assert_eq!(function.source_text.as_deref(), Some("function f(){return 1;}"));
    assert_eq!(function.origin, SourceOrigin::Original);

    let funpre = records
        .iter()
        .find_map(|r| match r {
            Record::Step(EventRecord::FunPre { f, .. }) => Some(f.clone()),
            _ => None,
        })
        .expect("funpre");
    assert_eq!(funpre, ValueReference::Function { id: 1, funid: 0 });

    let result = records
        .iter()
        .find_map(|r| match r {
            Record::Step(EventRecord::FunPost { result, .. }) => Some(result.clone()),
            _ => None,
        })
        .expect("funpost");
    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        serde_json::json!({"type": "number", "val": "1"})
    );

    assert_no_forward_references(&records);
}

#[test]
fn test_function_record_precedes_literal_event() {
    let (mut session, sink, _clock) = memory_session();
    let f = HeapObject::function("function g(){}");
    session.literal(3, &HostValue::function(&f), false);
    session.end_execution();

    let records = sink.all_records();
    let function_at = records
        .iter()
        .position(|r| matches!(r, Record::Function(_)))
        .unwrap();
    let literal_at = records
        .iter()
        .position(|r| matches!(r, Record::Step(EventRecord::Literal { .. })))
        .unwrap();
    assert!(function_at < literal_at);
}

#[test]
fn test_global_is_object_zero() {
    let global = HeapObject::plain();
    let math = HeapObject::plain();
    global.set("Math", HostValue::object(&math));

    let (mut session, sink, _clock) =
        memory_session_with(&HostValue::object(&global), &RecorderConfig::default());
    let math_ref = session.identify_global("Math", &HostValue::object(&math));
    session.end_execution();

    let records = sink.all_records();
    assert_eq!(records[0], Record::GlobalsAreProperties { value: true });
    assert!(records.contains(&Record::Global {
        name: "global".to_string(),
        value: ValueReference::Object { id: 0 },
    }));
    // Math was reached through the global's description, so it keeps id 1
    assert_eq!(math_ref, ValueReference::Object { id: 1 });
    assert_no_forward_references(&records);
}

#[test]
fn test_cyclic_graph_through_events() {
    let (mut session, sink, _clock) = memory_session();

    let a = HeapObject::plain();
    let b = HeapObject::plain();
    a.set("next", HostValue::object(&b));
    b.set("next", HostValue::object(&a));
    b.set("self", HostValue::object(&b));

    session.write(2, "a", &HostValue::object(&a), &HostValue::Undefined, true, false);
    session.read(3, "a", &HostValue::object(&a), true, false);
    session.end_execution();

    let records = sink.all_records();
    let objects: Vec<u64> = records
        .iter()
        .filter_map(|r| match r {
            Record::Object(o) => Some(o.id),
            _ => None,
        })
        .collect();
    // global, then b (nested) before a
    assert_eq!(objects, vec![0, 2, 1]);
    assert_no_forward_references(&records);
}

#[test]
fn test_accessor_property_described_with_functions() {
    let (mut session, sink, _clock) = memory_session();

    let obj = HeapObject::plain();
    let getter = HeapObject::function("function () { return 42; }") as ObjectRef;
    obj.define(
        "answer",
        HostProperty::accessor(Some(getter), None).with_flags(false, true),
    );

    session.get_field_pre(4, &HostValue::object(&obj), "answer", false, false, false);
    session.end_execution();

    let records = sink.all_records();
    let record = records
        .iter()
        .find_map(|r| match r {
            Record::Object(o) if o.property("answer").is_some() => Some(o),
            _ => None,
        })
        .unwrap();
    match record.property("answer") {
        Some(PropertyDescriptor::GetterOnly {
            getter: ValueReference::Function { .. },
            enumerable: false,
            configurable: true,
        }) => {}
        other => panic!("unexpected descriptor {:?}", other),
    }
    assert_no_forward_references(&records);
}

#[test]
fn test_exception_paths() {
    let (mut session, sink, _clock) = memory_session();
    let error = HeapObject::plain();
    error.set("message", HostValue::string("boom"));
    let errv = HostValue::object(&error);

    session.script_enter(1, "i.js", "o.js");
    session.throw_value(2, &errv);
    session.function_exit(3, &HostValue::Undefined, Some(&errv));
    session.script_exit(1, Some(&errv));
    session.end_execution();

    let records = sink.all_records();
    assert_eq!(
        steps(&records),
        vec!["scriptenter", "throw", "funcexit", "scriptexc"]
    );
    // error described once, before the throw
    let descriptions = records
        .iter()
        .filter(|r| r.describes() == Some(1))
        .count();
    assert_eq!(descriptions, 1);
}

#[test]
fn test_every_hook_records_one_event() {
    let (mut session, sink, _clock) = memory_session();
    let obj = HostValue::object(&HeapObject::plain());
    let f = HostValue::function(&HeapObject::function("function h(){}"));
    let n = HostValue::Number(2.0);

    session.script_enter(1, "i.js", "o.js");
    session.declare(2, "arguments", &obj, true, -1, false);
    session.declare(3, "x", &n, true, 0, false);
    session.function_enter(4, &f, &obj, &obj);
    session.for_in_object(5, &obj);
    session.get_field(6, &obj, "k", &n, false, false, false);
    session.put_field_pre(7, &obj, "k", &n, false, false);
    session.put_field(8, &obj, "k", &n, false, false);
    session.binary_pre(9, "+", &n, &n, false, false, false);
    session.binary(10, "+", &n, &n, &HostValue::Number(4.0), false, false, false);
    session.unary_pre(11, "-", &n);
    session.unary(12, "-", &n, &HostValue::Number(-2.0));
    session.conditional(13, &HostValue::Boolean(false));
    session.with(14, &obj);
    session.end_expression(15);
    session.return_value(16, &n);
    session.function_exit(17, &n, None);
    session.script_exit(1, None);
    session.end_execution();

    let records = sink.all_records();
    assert_eq!(
        steps(&records),
        vec![
            "scriptenter",
            "declare",
            "declare",
            "funcenter",
            "forin",
            "getpost",
            "putpre",
            "putpost",
            "binarypre",
            "binarypost",
            "unarypre",
            "unarypost",
            "conditional",
            "with",
            "exprend",
            "return",
            "funcexit",
            "scriptexit",
        ]
    );
    assert_eq!(records.last(), Some(&Record::End));
    assert_no_forward_references(&records);
}

#[test]
fn test_negative_zero_and_nan_encoding() {
    let (mut session, sink, _clock) = memory_session();
    session.literal(1, &HostValue::Number(-0.0), false);
    session.literal(2, &HostValue::Number(f64::NAN), false);
    session.end_execution();

    let values: Vec<ValueReference> = sink
        .all_records()
        .into_iter()
        .filter_map(|r| match r {
            Record::Step(EventRecord::Literal { val, .. }) => Some(val),
            _ => None,
        })
        .collect();
    assert_eq!(
        values,
        vec![
            ValueReference::Number {
                val: "0".to_string()
            },
            ValueReference::Number {
                val: "NaN".to_string()
            },
        ]
    );
}

fn function_records(records: &[Record]) -> Vec<&rastro::function::FunctionRecord> {
    records
        .iter()
        .filter_map(|r| match r {
            Record::Function(f) => Some(f),
            _ => None,
        })
        .collect()
}

#[test]
fn test_literal_keeps_original_source_through_prototype_cycle() {
    let (mut session, sink, _clock) = memory_session();
    session.register_script("a.js", ScriptSource::new(SCRIPT).with_position(5, [1, 1, 1, 24]));

    // f.prototype.constructor === f
    let f = HeapObject::function("function f(){ J$.instrumented(); }");
    let prototype = HeapObject::plain();
    prototype.define(
        "constructor",
        HostProperty::data(HostValue::function(&f)).with_flags(false, true),
    );
    f.define(
        "prototype",
        HostProperty::data(HostValue::object(&prototype)).with_flags(false, false),
    );

    session.script_enter(1, "a_instr_.js", "a.js");
    session.literal(5, &HostValue::function(&f), false);
    session.end_execution();

    let records = sink.all_records();
    let functions = function_records(&records);
    assert_eq!(functions.len(), 1);
    assert_eq!(functions[0].fun_id, 0);
    assert_eq!(functions[0].object_id, 1);
    assert_eq!(functions[0].origin, SourceOrigin::Original);
    assert_eq!(
        functions[0].source_text.as_deref(),
        Some("function f(){return 1;}")
    );
    assert!(!records
        .iter()
        .any(|r| matches!(r, Record::FunctionSource { .. })));

    // the constructor property points back at the literal's function
    let proto_record = records
        .iter()
        .find_map(|r| match r {
            Record::Object(o) if o.property("constructor").is_some() => Some(o),
            _ => None,
        })
        .unwrap();
    match proto_record.property("constructor") {
        Some(PropertyDescriptor::Data { value, .. }) => {
            assert_eq!(value, &ValueReference::Function { id: 1, funid: 0 })
        }
        other => panic!("unexpected descriptor {:?}", other),
    }
    assert_no_forward_references(&records);
}

#[test]
fn test_literal_function_id_precedes_reachable_functions() {
    let (mut session, sink, _clock) = memory_session();
    session.register_script("a.js", ScriptSource::new(SCRIPT).with_position(5, [1, 1, 1, 24]));

    let f = HeapObject::function("function f(){ J$.instrumented(); }");
    let g = HeapObject::function("function g(){}");
    f.set("helper", HostValue::function(&g));

    session.script_enter(1, "a_instr_.js", "a.js");
    session.literal(5, &HostValue::function(&f), false);
    session.end_execution();

    let records = sink.all_records();
    let functions = function_records(&records);
    let summary: Vec<(u64, u64, SourceOrigin)> = functions
        .iter()
        .map(|f| (f.fun_id, f.object_id, f.origin))
        .collect();
    assert_eq!(
        summary,
        vec![
            (0, 1, SourceOrigin::Original),
            (1, 2, SourceOrigin::Rendered),
        ]
    );
    assert_no_forward_references(&records);
}
