use std::fmt;
use std::sync::Mutex;

use crate::api::Rule;
use crate::labels::LabelArray;

/// Write-only side channel the resolver reports its decisions to.
pub trait TraceSink {
    fn append(&self, line: &str);
}

/// In-memory sink, mainly for tests and the CLI.
#[derive(Debug, Default)]
pub struct BufferSink {
    buffer: Mutex<String>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buffer.lock().unwrap().clone()
    }
}

impl TraceSink for BufferSink {
    fn append(&self, line: &str) {
        self.buffer.lock().unwrap().push_str(line);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TraceLevel {
    #[default]
    Disabled,
    Verbose,
}

/// Labels and options for one resolve call. Ingress queries set `to`,
/// egress queries set both label arrays.
pub struct SearchContext<'a> {
    pub from: LabelArray,
    pub to: LabelArray,
    pub trace: TraceLevel,
    pub sink: Option<&'a dyn TraceSink>,
}

impl Default for SearchContext<'_> {
    fn default() -> Self {
        Self {
            from: LabelArray::new(),
            to: LabelArray::new(),
            trace: TraceLevel::Disabled,
            sink: None,
        }
    }
}

impl<'a> SearchContext<'a> {
    pub fn ingress(to: LabelArray) -> Self {
        Self {
            to,
            ..Self::default()
        }
    }

    pub fn egress(from: LabelArray, to: LabelArray) -> Self {
        Self {
            from,
            to,
            ..Self::default()
        }
    }

    pub fn with_trace(mut self, sink: &'a dyn TraceSink) -> Self {
        self.trace = TraceLevel::Verbose;
        self.sink = Some(sink);
        self
    }

    pub(crate) fn policy_trace(&self, args: fmt::Arguments<'_>) {
        tracing::trace!("{args}");
        if self.trace == TraceLevel::Disabled {
            return;
        }
        if let Some(sink) = self.sink {
            sink.append(&format!("{args}\n"));
        }
    }
}

/// Counters accumulated while walking the rule set.
#[derive(Debug, Default)]
pub struct TraceState {
    /// Rules whose endpoint selector matched the search context.
    pub selected_rules: usize,
    /// Rules that contributed at least one filter to the result.
    pub matched_rules: usize,
    pub(crate) rule_id: usize,
}

impl TraceState {
    pub(crate) fn select_rule(&mut self, ctx: &SearchContext<'_>, rule: &Rule) {
        ctx.policy_trace(format_args!(
            "* Rule {} {}: selected",
            self.rule_id, rule.endpoint_selector
        ));
        self.selected_rules += 1;
    }

    pub(crate) fn unselect_rule(&self, ctx: &SearchContext<'_>, rule: &Rule) {
        ctx.policy_trace(format_args!(
            "  Rule {} {}: did not select",
            self.rule_id, rule.endpoint_selector
        ));
    }

    pub(crate) fn trace(&self, ctx: &SearchContext<'_>, total: usize) {
        ctx.policy_trace(format_args!(
            "{}/{} rules selected",
            self.selected_rules, total
        ));
        if self.matched_rules == 0 {
            ctx.policy_trace(format_args!("Found no allow rule"));
        } else {
            ctx.policy_trace(format_args!("Found allow rule"));
        }
    }
}
