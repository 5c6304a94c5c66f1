//! Recording sessions
//!
//! [`Analysis`] is the callback surface an instrumentation host drives, one
//! method per lifecycle hook. [`TraceSession`] implements it by encoding each
//! hook and submitting the resulting records to its export pipeline.
//!
//! Hooks never fail and never panic outward: encoding degrades to partial
//! records and sink failures are absorbed by the pipeline. Errors surface
//! only from [`TraceSession::finish`].
//!
//! The session owns no timer thread. The delayed flush fires when the host
//! calls back in, either through a hook or through [`Analysis::poll`].

use crate::config::RecorderConfig;
use crate::describe::{DescriberStats, ExposureFilter, ValueDescriber};
use crate::encoder::EventEncoder;
use crate::error::{Result, TraceError};
use crate::event::{EventRecord, Record};
use crate::export::{Clock, ExportPipeline, PipelineState, PipelineStats, SystemClock};
use crate::sink::Sink;
use crate::source_map::ScriptSource;
use crate::value::{HostValue, Iid, ValueReference};

/// Lifecycle hooks fired by the instrumentation host
///
/// All calls happen synchronously on the traced program's thread, in
/// execution order. Exceptions are passed as `Some(value)`; `None` means the
/// code completed normally.
#[allow(clippy::too_many_arguments)]
pub trait Analysis {
    fn invoke_fun_pre(
        &mut self,
        iid: Iid,
        f: &HostValue,
        base: &HostValue,
        args: &HostValue,
        is_constructor: bool,
        is_method: bool,
    );

    fn invoke_fun(
        &mut self,
        iid: Iid,
        f: &HostValue,
        base: &HostValue,
        args: &HostValue,
        result: &HostValue,
        is_constructor: bool,
        is_method: bool,
    );

    fn literal(&mut self, iid: Iid, val: &HostValue, has_getter_setter: bool);

    fn for_in_object(&mut self, iid: Iid, val: &HostValue);

    fn declare(
        &mut self,
        iid: Iid,
        name: &str,
        val: &HostValue,
        is_argument: bool,
        argument_index: i64,
        is_catch_param: bool,
    );

    fn get_field_pre(
        &mut self,
        iid: Iid,
        base: &HostValue,
        offset: &str,
        is_computed: bool,
        is_op_assign: bool,
        is_method_call: bool,
    );

    fn get_field(
        &mut self,
        iid: Iid,
        base: &HostValue,
        offset: &str,
        val: &HostValue,
        is_computed: bool,
        is_op_assign: bool,
        is_method_call: bool,
    );

    fn put_field_pre(
        &mut self,
        iid: Iid,
        base: &HostValue,
        offset: &str,
        val: &HostValue,
        is_computed: bool,
        is_op_assign: bool,
    );

    fn put_field(
        &mut self,
        iid: Iid,
        base: &HostValue,
        offset: &str,
        val: &HostValue,
        is_computed: bool,
        is_op_assign: bool,
    );

    fn read(&mut self, iid: Iid, name: &str, val: &HostValue, is_global: bool, is_script_local: bool);

    fn write(
        &mut self,
        iid: Iid,
        name: &str,
        val: &HostValue,
        lhs: &HostValue,
        is_global: bool,
        is_script_local: bool,
    );

    fn return_value(&mut self, iid: Iid, val: &HostValue);

    fn throw_value(&mut self, iid: Iid, val: &HostValue);

    fn function_enter(&mut self, iid: Iid, f: &HostValue, this_value: &HostValue, args: &HostValue);

    fn function_exit(&mut self, iid: Iid, ret: &HostValue, exc: Option<&HostValue>);

    fn script_enter(&mut self, iid: Iid, instrumented: &str, original: &str);

    fn script_exit(&mut self, iid: Iid, exc: Option<&HostValue>);

    fn binary_pre(
        &mut self,
        iid: Iid,
        op: &str,
        left: &HostValue,
        right: &HostValue,
        is_op_assign: bool,
        is_switch_comparison: bool,
        is_computed: bool,
    );

    fn binary(
        &mut self,
        iid: Iid,
        op: &str,
        left: &HostValue,
        right: &HostValue,
        result: &HostValue,
        is_op_assign: bool,
        is_switch_comparison: bool,
        is_computed: bool,
    );

    fn unary_pre(&mut self, iid: Iid, op: &str, left: &HostValue);

    fn unary(&mut self, iid: Iid, op: &str, left: &HostValue, result: &HostValue);

    fn conditional(&mut self, iid: Iid, result: &HostValue);

    fn end_expression(&mut self, iid: Iid);

    fn end_execution(&mut self);

    fn with(&mut self, iid: Iid, val: &HostValue);

    /// The host is idle between turns of its event loop
    ///
    /// The delayed flush is a deadline checked here and at the start of every
    /// other hook. No thread watches it: a host that never calls `poll` gets
    /// its buffered records delivered only by its next hook, the size
    /// trigger or `end_execution`. Returns whether a delayed flush ran.
    fn poll(&mut self) -> bool;
}

/// One recording session: identity state, script tables and export pipeline
pub struct TraceSession {
    encoder: EventEncoder,
    pipeline: ExportPipeline,
    ended: bool,
}

impl TraceSession {
    /// Start a session rooted at `global`
    ///
    /// Emits `globals-are-properties`, then describes `global` (id 0) with
    /// the configured root exposure filter.
    pub fn start(global: &HostValue, config: &RecorderConfig, sink: Box<dyn Sink>) -> Result<Self> {
        Self::start_with_clock(global, config, sink, Box::new(SystemClock))
    }

    pub fn start_with_clock(
        global: &HostValue,
        config: &RecorderConfig,
        sink: Box<dyn Sink>,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|err| TraceError::Config(err.to_string()))?;

        let describer = ValueDescriber::with_excluded(config.describe.excluded.iter().cloned());
        let pipeline = ExportPipeline::with_clock(sink, config.export.to_export_config(), clock);
        let mut session = Self {
            encoder: EventEncoder::new(describer),
            pipeline,
            ended: false,
        };

        session.pipeline.submit(Record::GlobalsAreProperties {
            value: config.globals_are_properties,
        });

        let filter = config.describe.root_filter();
        let root = session.root(global, &filter);
        if root.object_id() != Some(0) {
            return Err(TraceError::Config(format!(
                "global object must be an object or function, got {}",
                global.type_name()
            )));
        }
        tracing::debug!(sink = session.pipeline.sink_name(), "trace session started");
        Ok(session)
    }

    fn root(&mut self, global: &HostValue, filter: &ExposureFilter) -> ValueReference {
        let value = self.encoder.root_value(global, filter);
        self.submit_descriptions();
        self.pipeline.submit(Record::Global {
            name: "global".to_string(),
            value: value.clone(),
        });
        value
    }

    /// Name a root value, e.g. a builtin constructor
    pub fn identify_global(&mut self, name: &str, value: &HostValue) -> ValueReference {
        let reference = self.encoder.value(value);
        self.submit_descriptions();
        self.pipeline.submit(Record::Global {
            name: name.to_string(),
            value: reference.clone(),
        });
        reference
    }

    /// Install the position table of script `sid`
    pub fn register_script(&mut self, sid: impl Into<String>, script: ScriptSource) {
        self.encoder.register_script(sid, script);
    }

    fn submit_descriptions(&mut self) {
        for record in self.encoder.take_descriptions() {
            self.pipeline.submit(record);
        }
    }

    fn emit(&mut self, event: EventRecord) {
        self.submit_descriptions();
        tracing::trace!(step = event.step(), iid = event.iid(), "event");
        self.pipeline.submit(Record::Step(event));
    }

    /// Final flush and sink close
    pub fn finish(mut self) -> Result<PipelineStats> {
        if !self.ended {
            tracing::debug!("session finished without end_execution");
        }
        let stats = self.pipeline.shutdown()?;
        let described = self.encoder.describer().stats();
        tracing::info!(
            records = stats.records_submitted,
            batches = stats.batches_sent,
            failed = stats.failed_batches,
            objects = described.objects_described,
            functions = described.functions_described,
            "trace session finished"
        );
        Ok(stats)
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    pub fn describer_stats(&self) -> DescriberStats {
        self.encoder.describer().stats()
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.pipeline.state()
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }
}

impl Analysis for TraceSession {
    fn invoke_fun_pre(
        &mut self,
        iid: Iid,
        f: &HostValue,
        base: &HostValue,
        args: &HostValue,
        is_constructor: bool,
        is_method: bool,
    ) {
        let event = self
            .encoder
            .fun_pre(iid, f, base, args, is_constructor, is_method);
        self.emit(event);
    }

    fn invoke_fun(
        &mut self,
        iid: Iid,
        f: &HostValue,
        base: &HostValue,
        args: &HostValue,
        result: &HostValue,
        is_constructor: bool,
        is_method: bool,
    ) {
        let event = self
            .encoder
            .fun_post(iid, f, base, args, result, is_constructor, is_method);
        self.emit(event);
    }

    fn literal(&mut self, iid: Iid, val: &HostValue, has_getter_setter: bool) {
        let event = self.encoder.literal(iid, val, has_getter_setter);
        self.emit(event);
    }

    fn for_in_object(&mut self, iid: Iid, val: &HostValue) {
        let event = self.encoder.for_in(iid, val);
        self.emit(event);
    }

    fn declare(
        &mut self,
        iid: Iid,
        name: &str,
        val: &HostValue,
        is_argument: bool,
        argument_index: i64,
        is_catch_param: bool,
    ) {
        let event = self
            .encoder
            .declare(iid, name, val, is_argument, argument_index, is_catch_param);
        self.emit(event);
    }

    fn get_field_pre(
        &mut self,
        iid: Iid,
        base: &HostValue,
        offset: &str,
        is_computed: bool,
        is_op_assign: bool,
        is_method_call: bool,
    ) {
        let event = self
            .encoder
            .get_pre(iid, base, offset, is_computed, is_op_assign, is_method_call);
        self.emit(event);
    }

    fn get_field(
        &mut self,
        iid: Iid,
        base: &HostValue,
        offset: &str,
        val: &HostValue,
        is_computed: bool,
        is_op_assign: bool,
        is_method_call: bool,
    ) {
        let event = self.encoder.get_post(
            iid,
            base,
            offset,
            val,
            is_computed,
            is_op_assign,
            is_method_call,
        );
        self.emit(event);
    }

    fn put_field_pre(
        &mut self,
        iid: Iid,
        base: &HostValue,
        offset: &str,
        val: &HostValue,
        is_computed: bool,
        is_op_assign: bool,
    ) {
        let event = self
            .encoder
            .put_pre(iid, base, offset, val, is_computed, is_op_assign);
        self.emit(event);
    }

    fn put_field(
        &mut self,
        iid: Iid,
        base: &HostValue,
        offset: &str,
        val: &HostValue,
        is_computed: bool,
        is_op_assign: bool,
    ) {
        let event = self
            .encoder
            .put_post(iid, base, offset, val, is_computed, is_op_assign);
        self.emit(event);
    }

    fn read(&mut self, iid: Iid, name: &str, val: &HostValue, is_global: bool, is_script_local: bool) {
        let event = self.encoder.read(iid, name, val, is_global, is_script_local);
        self.emit(event);
    }

    fn write(
        &mut self,
        iid: Iid,
        name: &str,
        val: &HostValue,
        lhs: &HostValue,
        is_global: bool,
        is_script_local: bool,
    ) {
        let event = self
            .encoder
            .write(iid, name, val, lhs, is_global, is_script_local);
        self.emit(event);
    }

    fn return_value(&mut self, iid: Iid, val: &HostValue) {
        let event = self.encoder.return_value(iid, val);
        self.emit(event);
    }

    fn throw_value(&mut self, iid: Iid, val: &HostValue) {
        let event = self.encoder.throw_value(iid, val);
        self.emit(event);
    }

    fn function_enter(&mut self, iid: Iid, f: &HostValue, this_value: &HostValue, args: &HostValue) {
        let event = self.encoder.function_enter(iid, f, this_value, args);
        self.emit(event);
    }

    fn function_exit(&mut self, iid: Iid, ret: &HostValue, exc: Option<&HostValue>) {
        let event = self.encoder.function_exit(iid, ret, exc);
        self.emit(event);
    }

    fn script_enter(&mut self, iid: Iid, instrumented: &str, original: &str) {
        if self.encoder.scripts().get(original).is_none() {
            tracing::debug!(script = original, "entering script without position table");
        }
        let event = self.encoder.script_enter(iid, instrumented, original);
        self.emit(event);
    }

    fn script_exit(&mut self, iid: Iid, exc: Option<&HostValue>) {
        let event = self.encoder.script_exit(iid, exc);
        self.emit(event);
    }

    fn binary_pre(
        &mut self,
        iid: Iid,
        op: &str,
        left: &HostValue,
        right: &HostValue,
        is_op_assign: bool,
        is_switch_comparison: bool,
        is_computed: bool,
    ) {
        let event = self.encoder.binary_pre(
            iid,
            op,
            left,
            right,
            is_op_assign,
            is_switch_comparison,
            is_computed,
        );
        self.emit(event);
    }

    fn binary(
        &mut self,
        iid: Iid,
        op: &str,
        left: &HostValue,
        right: &HostValue,
        result: &HostValue,
        is_op_assign: bool,
        is_switch_comparison: bool,
        is_computed: bool,
    ) {
        let event = self.encoder.binary_post(
            iid,
            op,
            left,
            right,
            result,
            is_op_assign,
            is_switch_comparison,
            is_computed,
        );
        self.emit(event);
    }

    fn unary_pre(&mut self, iid: Iid, op: &str, left: &HostValue) {
        let event = self.encoder.unary_pre(iid, op, left);
        self.emit(event);
    }

    fn unary(&mut self, iid: Iid, op: &str, left: &HostValue, result: &HostValue) {
        let event = self.encoder.unary_post(iid, op, left, result);
        self.emit(event);
    }

    fn conditional(&mut self, iid: Iid, result: &HostValue) {
        let event = self.encoder.conditional(iid, result);
        self.emit(event);
    }

    fn end_expression(&mut self, iid: Iid) {
        let event = self.encoder.expression_end(iid);
        self.emit(event);
    }

    fn end_execution(&mut self) {
        self.submit_descriptions();
        self.pipeline.submit(Record::End);
        self.pipeline.flush();
        self.ended = true;
    }

    fn with(&mut self, iid: Iid, val: &HostValue) {
        let event = self.encoder.with(iid, val);
        self.emit(event);
    }

    fn poll(&mut self) -> bool {
        if self.ended {
            return false;
        }
        self.pipeline.poll()
    }
}
