//! VM execution tracing.
//!
//! A trait-based hook system, mirroring the teacher's `VmTracer`: the
//! dispatch loop is generic over `Tr: VmTracer`, so [`NoopTracer`]'s
//! default no-op methods monomorphize away to nothing in a release build.
//! Concrete tracers only override the hooks they care about.

use std::collections::HashMap;

use crate::bytecode::op::Opcode;

/// One recorded execution event, used by [`RecordingTracer`].
#[derive(Debug, Clone)]
pub enum TraceEvent {
    Instruction { ip: u32, opcode: Opcode, frame_depth: usize },
    Call { frame_depth: usize },
    Return { frame_depth: usize },
    HandlerPush { frame_depth: usize },
    HandlerPop { frame_depth: usize },
    Throw { message: String, frame_depth: usize },
}

/// Hook points the dispatch loop calls into at key execution events.
pub trait VmTracer: std::fmt::Debug {
    /// Called before dispatching each instruction. The hottest hook —
    /// keep overrides lightweight.
    #[inline(always)]
    fn on_instruction(&mut self, _ip: u32, _opcode: Opcode, _frame_depth: usize) {}

    #[inline(always)]
    fn on_call(&mut self, _frame_depth: usize) {}

    #[inline(always)]
    fn on_return(&mut self, _frame_depth: usize) {}

    #[inline(always)]
    fn on_handler_push(&mut self, _frame_depth: usize) {}

    #[inline(always)]
    fn on_handler_pop(&mut self, _frame_depth: usize) {}

    #[inline(always)]
    fn on_throw(&mut self, _message: &str, _frame_depth: usize) {}
}

/// Zero-cost production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Human-readable execution log to stderr.
#[derive(Debug)]
pub struct StderrTracer {
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self { limit: None, count: 0, stopped: false }
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit), count: 0, stopped: false }
    }
}

impl Default for StderrTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, ip: u32, opcode: Opcode, frame_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{ip:>5}] {opcode:?}  frames={frame_depth}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, frame_depth: usize) {
        if !self.stopped {
            eprintln!("  >>> CALL  depth={frame_depth}");
        }
    }

    fn on_return(&mut self, frame_depth: usize) {
        if !self.stopped {
            eprintln!("  <<< RETURN  depth={frame_depth}");
        }
    }

    fn on_throw(&mut self, message: &str, frame_depth: usize) {
        if !self.stopped {
            eprintln!("  !!! THROW {message:?}  depth={frame_depth}");
        }
    }
}

/// Opcode frequency counters and call-depth tracking.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    opcode_counts: HashMap<Opcode, u64>,
    total_instructions: u64,
    max_depth: usize,
    total_calls: u64,
}

#[derive(Debug)]
pub struct ProfilingReport {
    pub opcode_counts: Vec<(Opcode, u64)>,
    pub total_instructions: u64,
    pub max_depth: usize,
    pub total_calls: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        let mut opcode_counts: Vec<_> = self.opcode_counts.iter().map(|(&k, &v)| (k, v)).collect();
        opcode_counts.sort_by(|a, b| b.1.cmp(&a.1));
        ProfilingReport {
            opcode_counts,
            total_instructions: self.total_instructions,
            max_depth: self.max_depth,
            total_calls: self.total_calls,
        }
    }
}

impl VmTracer for ProfilingTracer {
    fn on_instruction(&mut self, _ip: u32, opcode: Opcode, _frame_depth: usize) {
        *self.opcode_counts.entry(opcode).or_insert(0) += 1;
        self.total_instructions += 1;
    }

    fn on_call(&mut self, frame_depth: usize) {
        self.total_calls += 1;
        self.max_depth = self.max_depth.max(frame_depth);
    }
}

/// Full event recording for post-mortem inspection or deterministic replay.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self { events: Vec::with_capacity(limit.min(1024)), limit: Some(limit) }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn at_limit(&self) -> bool {
        self.limit.is_some_and(|l| self.events.len() >= l)
    }
}

impl VmTracer for RecordingTracer {
    fn on_instruction(&mut self, ip: u32, opcode: Opcode, frame_depth: usize) {
        if !self.at_limit() {
            self.events.push(TraceEvent::Instruction { ip, opcode, frame_depth });
        }
    }

    fn on_call(&mut self, frame_depth: usize) {
        if !self.at_limit() {
            self.events.push(TraceEvent::Call { frame_depth });
        }
    }

    fn on_return(&mut self, frame_depth: usize) {
        if !self.at_limit() {
            self.events.push(TraceEvent::Return { frame_depth });
        }
    }

    fn on_handler_push(&mut self, frame_depth: usize) {
        if !self.at_limit() {
            self.events.push(TraceEvent::HandlerPush { frame_depth });
        }
    }

    fn on_handler_pop(&mut self, frame_depth: usize) {
        if !self.at_limit() {
            self.events.push(TraceEvent::HandlerPop { frame_depth });
        }
    }

    fn on_throw(&mut self, message: &str, frame_depth: usize) {
        if !self.at_limit() {
            self.events.push(TraceEvent::Throw { message: message.to_string(), frame_depth });
        }
    }
}

impl std::fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== VM Profiling Report ===")?;
        writeln!(f, "Total instructions: {}", self.total_instructions)?;
        writeln!(f, "Total calls:        {}", self.total_calls)?;
        writeln!(f, "Max call depth:     {}", self.max_depth)?;
        writeln!(f)?;
        writeln!(f, "--- Opcode Frequency ---")?;
        for (opcode, count) in &self.opcode_counts {
            let pct = (f64::from(u32::try_from(*count).unwrap_or(u32::MAX)) / self.total_instructions as f64) * 100.0;
            writeln!(f, "  {opcode:<20?} {count:>10}  ({pct:>5.1}%)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_tracer_compiles_to_no_state() {
        let mut t = NoopTracer;
        t.on_instruction(0, Opcode::Nop, 1);
    }

    #[test]
    fn recording_tracer_respects_its_limit() {
        let mut t = RecordingTracer::with_limit(2);
        for _ in 0..5 {
            t.on_call(1);
        }
        assert_eq!(t.events().len(), 2);
    }
}
