//! Event encoding
//!
//! One method per lifecycle hook, each turning raw hook arguments into an
//! [`EventRecord`]. Runtime values go through [`EventEncoder::value`]; any
//! description records produced along the way stay queued until the caller
//! collects them with [`EventEncoder::take_descriptions`], which must happen
//! before the event itself is submitted.

use crate::describe::{ExposureFilter, ValueDescriber};
use crate::event::{DeclareKind, EventRecord, Record};
use crate::source_map::{ScriptSource, ScriptTable};
use crate::value::{HostValue, Iid, ValueReference};

/// Hook-argument to record translation for one session
pub struct EventEncoder {
    describer: ValueDescriber,
    scripts: ScriptTable,
}

impl EventEncoder {
    pub fn new(describer: ValueDescriber) -> Self {
        Self {
            describer,
            scripts: ScriptTable::new(),
        }
    }

    /// Value reference for `value`, describing it on first sight
    pub fn value(&mut self, value: &HostValue) -> ValueReference {
        self.describer.reference(value)
    }

    /// Value reference whose first-sight description honours `filter`
    pub fn root_value(&mut self, value: &HostValue, filter: &ExposureFilter) -> ValueReference {
        self.describer.reference_filtered(value, Some(filter))
    }

    fn optional(&mut self, value: Option<&HostValue>) -> ValueReference {
        match value {
            Some(value) => self.value(value),
            None => ValueReference::Undefined,
        }
    }

    /// Description records queued since the last call, in emission order
    pub fn take_descriptions(&mut self) -> Vec<Record> {
        self.describer.drain()
    }

    pub fn register_script(&mut self, sid: impl Into<String>, script: ScriptSource) {
        self.scripts.register(sid, script);
    }

    pub fn scripts(&self) -> &ScriptTable {
        &self.scripts
    }

    pub fn describer(&self) -> &ValueDescriber {
        &self.describer
    }

    pub fn fun_pre(
        &mut self,
        iid: Iid,
        f: &HostValue,
        base: &HostValue,
        args: &HostValue,
        is_constructor: bool,
        is_method: bool,
    ) -> EventRecord {
        EventRecord::FunPre {
            iid,
            f: self.value(f),
            base: self.value(base),
            args: self.value(args),
            is_constructor,
            is_method,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn fun_post(
        &mut self,
        iid: Iid,
        f: &HostValue,
        base: &HostValue,
        args: &HostValue,
        result: &HostValue,
        is_constructor: bool,
        is_method: bool,
    ) -> EventRecord {
        EventRecord::FunPost {
            iid,
            f: self.value(f),
            base: self.value(base),
            args: self.value(args),
            is_constructor,
            is_method,
            result: self.value(result),
        }
    }

    /// Literal event; function literals pick up their original source here
    pub fn literal(&mut self, iid: Iid, val: &HostValue, has_getter_setter: bool) -> EventRecord {
        let val = match val {
            HostValue::Function(f) => {
                let original = self.scripts.text_at(iid);
                if original.is_none() {
                    tracing::debug!(iid, "no source position for function literal");
                }
                self.describer.reference_literal_function(f, original)
            }
            other => self.value(other),
        };

        EventRecord::Literal {
            iid,
            val,
            has_getter_setter,
        }
    }

    pub fn for_in(&mut self, iid: Iid, val: &HostValue) -> EventRecord {
        EventRecord::ForIn {
            iid,
            val: self.value(val),
        }
    }

    pub fn declare(
        &mut self,
        iid: Iid,
        name: &str,
        val: &HostValue,
        is_argument: bool,
        argument_index: i64,
        is_catch_param: bool,
    ) -> EventRecord {
        EventRecord::Declare {
            iid,
            name: name.to_string(),
            val: self.value(val),
            kind: DeclareKind::classify(is_argument, argument_index, is_catch_param),
            is_argument,
            argument_index,
            is_catch_param,
        }
    }

    pub fn get_pre(
        &mut self,
        iid: Iid,
        base: &HostValue,
        offset: &str,
        is_computed: bool,
        is_op_assign: bool,
        is_method_call: bool,
    ) -> EventRecord {
        EventRecord::GetPre {
            iid,
            base: self.value(base),
            offset: offset.to_string(),
            is_computed,
            is_op_assign,
            is_method_call,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn get_post(
        &mut self,
        iid: Iid,
        base: &HostValue,
        offset: &str,
        val: &HostValue,
        is_computed: bool,
        is_op_assign: bool,
        is_method_call: bool,
    ) -> EventRecord {
        EventRecord::GetPost {
            iid,
            base: self.value(base),
            offset: offset.to_string(),
            val: self.value(val),
            is_computed,
            is_op_assign,
            is_method_call,
        }
    }

    pub fn put_pre(
        &mut self,
        iid: Iid,
        base: &HostValue,
        offset: &str,
        val: &HostValue,
        is_computed: bool,
        is_op_assign: bool,
    ) -> EventRecord {
        EventRecord::PutPre {
            iid,
            base: self.value(base),
            offset: offset.to_string(),
            val: self.value(val),
            is_computed,
            is_op_assign,
        }
    }

    pub fn put_post(
        &mut self,
        iid: Iid,
        base: &HostValue,
        offset: &str,
        val: &HostValue,
        is_computed: bool,
        is_op_assign: bool,
    ) -> EventRecord {
        EventRecord::PutPost {
            iid,
            base: self.value(base),
            offset: offset.to_string(),
            val: self.value(val),
            is_computed,
            is_op_assign,
        }
    }

    pub fn read(
        &mut self,
        iid: Iid,
        name: &str,
        val: &HostValue,
        is_global: bool,
        is_script_local: bool,
    ) -> EventRecord {
        EventRecord::Read {
            iid,
            name: name.to_string(),
            val: self.value(val),
            is_global,
            is_script_local,
        }
    }

    pub fn write(
        &mut self,
        iid: Iid,
        name: &str,
        val: &HostValue,
        lhs: &HostValue,
        is_global: bool,
        is_script_local: bool,
    ) -> EventRecord {
        EventRecord::Write {
            iid,
            name: name.to_string(),
            val: self.value(val),
            lhs: self.value(lhs),
            is_global,
            is_script_local,
        }
    }

    pub fn return_value(&mut self, iid: Iid, val: &HostValue) -> EventRecord {
        EventRecord::Return {
            iid,
            val: self.value(val),
        }
    }

    pub fn throw_value(&mut self, iid: Iid, val: &HostValue) -> EventRecord {
        EventRecord::Throw {
            iid,
            val: self.value(val),
        }
    }

    pub fn function_enter(
        &mut self,
        iid: Iid,
        f: &HostValue,
        this_value: &HostValue,
        args: &HostValue,
    ) -> EventRecord {
        EventRecord::FuncEnter {
            iid,
            f: self.value(f),
            this_value: self.value(this_value),
            args: self.value(args),
        }
    }

    /// Function exit; `exc` is the pending exception, if any
    pub fn function_exit(
        &mut self,
        iid: Iid,
        ret: &HostValue,
        exc: Option<&HostValue>,
    ) -> EventRecord {
        EventRecord::FuncExit {
            iid,
            ret: self.value(ret),
            exc: self.optional(exc),
        }
    }

    pub fn script_enter(&mut self, iid: Iid, instrumented: &str, original: &str) -> EventRecord {
        self.scripts.enter(original);
        EventRecord::ScriptEnter {
            iid,
            instrumented: instrumented.to_string(),
            original: original.to_string(),
        }
    }

    /// `scriptexit`, or `scriptexc` when the script ended by throwing
    pub fn script_exit(&mut self, iid: Iid, exc: Option<&HostValue>) -> EventRecord {
        if self.scripts.exit().is_none() {
            tracing::debug!(iid, "script exit without matching enter");
        }
        match exc {
            Some(exc) => EventRecord::ScriptExc {
                iid,
                exc: self.value(exc),
            },
            None => EventRecord::ScriptExit { iid },
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn binary_pre(
        &mut self,
        iid: Iid,
        op: &str,
        left: &HostValue,
        right: &HostValue,
        is_op_assign: bool,
        is_switch_comparison: bool,
        is_computed: bool,
    ) -> EventRecord {
        EventRecord::BinaryPre {
            iid,
            op: op.to_string(),
            left: self.value(left),
            right: self.value(right),
            is_op_assign,
            is_switch_comparison,
            is_computed,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn binary_post(
        &mut self,
        iid: Iid,
        op: &str,
        left: &HostValue,
        right: &HostValue,
        result: &HostValue,
        is_op_assign: bool,
        is_switch_comparison: bool,
        is_computed: bool,
    ) -> EventRecord {
        EventRecord::BinaryPost {
            iid,
            op: op.to_string(),
            left: self.value(left),
            right: self.value(right),
            is_op_assign,
            is_switch_comparison,
            is_computed,
            result: self.value(result),
        }
    }

    pub fn unary_pre(&mut self, iid: Iid, op: &str, left: &HostValue) -> EventRecord {
        EventRecord::UnaryPre {
            iid,
            op: op.to_string(),
            left: self.value(left),
        }
    }

    pub fn unary_post(
        &mut self,
        iid: Iid,
        op: &str,
        left: &HostValue,
        result: &HostValue,
    ) -> EventRecord {
        EventRecord::UnaryPost {
            iid,
            op: op.to_string(),
            left: self.value(left),
            result: self.value(result),
        }
    }

    pub fn conditional(&mut self, iid: Iid, result: &HostValue) -> EventRecord {
        EventRecord::Conditional {
            iid,
            result: self.value(result),
        }
    }

    pub fn expression_end(&mut self, iid: Iid) -> EventRecord {
        EventRecord::ExprEnd { iid }
    }

    pub fn with(&mut self, iid: Iid, val: &HostValue) -> EventRecord {
        EventRecord::With {
            iid,
            val: self.value(val),
        }
    }
}

impl Default for EventEncoder {
    fn default() -> Self {
        Self::new(ValueDescriber::new())
    }
}
