//! Query sessions.
//!
//! A session owns everything one query needs to run: the graph context
//! (and with it the node-id sequence), the input buffers, the execution
//! time range, the engine, and after compilation the compiled query and
//! its output buffer. The lifecycle is linear: set times, create inputs,
//! build the graph, compile once, fill buffers, execute.

use std::rc::Rc;

use rivulet_graph::{GraphCtx, GraphError, GraphNode};
use rivulet_types::DataType;
use thiserror::Error;
use tracing::debug;

use crate::engine::{CompiledQuery, Engine, EngineError, Interpreter};
use crate::region::{Region, RegionError};
use crate::value::Value;

/// A violation of the session lifecycle order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("start and end times must be set, with start < end, before this operation")]
    TimesUnset,

    #[error("cannot change execution times after compilation")]
    TimesFrozen,

    #[error("session already holds a compiled query")]
    AlreadyCompiled,

    #[error("query must be compiled before execution")]
    NotCompiled,

    #[error("a query needs at least one input stream")]
    NoInputs,

    #[error("node has no input buffer attached to this session")]
    NoBuffer,

    #[error("query graph was not built from this session's inputs")]
    ForeignGraph,
}

/// Any error surfaced through the session API.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Region(#[from] RegionError),
}

struct SourceEntry {
    node: GraphNode,
    name: String,
    region: Region,
}

/// One query's worth of state, from graph construction through execution.
pub struct Session {
    engine: Box<dyn Engine>,
    ctx: Rc<GraphCtx>,
    t_start: Option<i64>,
    t_end: Option<i64>,
    sources: Vec<SourceEntry>,
    compiled: Option<CompiledQuery>,
    output: Option<Region>,
}

impl Session {
    /// A session backed by the reference interpreter.
    pub fn new() -> Self {
        Self::with_engine(Box::new(Interpreter::new()))
    }

    pub fn with_engine(engine: Box<dyn Engine>) -> Self {
        Self {
            engine,
            ctx: GraphCtx::new(),
            t_start: None,
            t_end: None,
            sources: Vec::new(),
            compiled: None,
            output: None,
        }
    }

    pub fn set_start_time(&mut self, t: i64) -> Result<(), LifecycleError> {
        if self.compiled.is_some() {
            return Err(LifecycleError::TimesFrozen);
        }
        self.t_start = Some(t);
        Ok(())
    }

    pub fn set_end_time(&mut self, t: i64) -> Result<(), LifecycleError> {
        if self.compiled.is_some() {
            return Err(LifecycleError::TimesFrozen);
        }
        self.t_end = Some(t);
        Ok(())
    }

    /// The validated execution range `[t_start, t_end)`.
    fn times(&self) -> Result<(i64, i64), LifecycleError> {
        match (self.t_start, self.t_end) {
            (Some(t0), Some(t1)) if t0 < t1 => Ok((t0, t1)),
            _ => Err(LifecycleError::TimesUnset),
        }
    }

    /// Create a source node with a buffer of `capacity` slots attached to
    /// this session. The batch time of the source is the execution range.
    pub fn create_input(
        &mut self,
        capacity: usize,
        dtype: DataType,
    ) -> Result<GraphNode, SessionError> {
        let (t0, t1) = self.times()?;
        let name = format!("in_stream_{}", self.sources.len() + 1);
        let node = GraphNode::source(&self.ctx, name.clone(), dtype.clone(), t1 - t0)?;
        self.sources.push(SourceEntry {
            node: node.clone(),
            name,
            region: Region::new(capacity, dtype, t0),
        });
        Ok(node)
    }

    // Lookups go by node identity. Ids restart at 1 per context, so a
    // node from another session can carry the same id as one of ours.
    fn region_mut(&mut self, node: &GraphNode) -> Result<&mut Region, LifecycleError> {
        self.sources
            .iter_mut()
            .find(|s| s.node.same_node(node))
            .map(|s| &mut s.region)
            .ok_or(LifecycleError::NoBuffer)
    }

    fn region(&self, node: &GraphNode) -> Result<&Region, LifecycleError> {
        self.sources
            .iter()
            .find(|s| s.node.same_node(node))
            .map(|s| &s.region)
            .ok_or(LifecycleError::NoBuffer)
    }

    /// Close the open span of `node`'s buffer at `t` as a data slot.
    pub fn commit_data(&mut self, node: &GraphNode, t: i64) -> Result<(), SessionError> {
        self.region_mut(node)?.commit_data(t)?;
        Ok(())
    }

    /// Close the open span of `node`'s buffer at `t` as a gap.
    pub fn commit_null(&mut self, node: &GraphNode, t: i64) -> Result<(), SessionError> {
        self.region_mut(node)?.commit_null(t)?;
        Ok(())
    }

    /// Write `payload` into slot `idx` of `node`'s buffer.
    pub fn write_data(
        &mut self,
        node: &GraphNode,
        payload: Value,
        t: i64,
        idx: usize,
    ) -> Result<(), SessionError> {
        self.region_mut(node)?.write_data(payload, t, idx)?;
        Ok(())
    }

    /// Index of the most recently committed slot of `node`'s buffer.
    pub fn data_end_idx(&self, node: &GraphNode) -> Result<usize, SessionError> {
        Ok(self.region(node)?.end_idx())
    }

    /// Lower `graph` and hand the result to the engine, exactly once per
    /// session. Freezes the execution times and allocates the output
    /// buffer, sized like the largest input buffer.
    pub fn compile(&mut self, graph: &GraphNode, name: &str) -> Result<(), SessionError> {
        let (t0, _) = self.times()?;
        if self.compiled.is_some() {
            return Err(LifecycleError::AlreadyCompiled.into());
        }
        if self.sources.is_empty() {
            return Err(LifecycleError::NoInputs.into());
        }
        // A graph from another context may reuse our source names; symbol
        // names only identify buffers within the owning session.
        if !graph.same_ctx(&self.ctx) {
            return Err(LifecycleError::ForeignGraph.into());
        }

        debug!(query = name, "lowering query graph");
        let builder = graph.lower()?;
        let op = builder.finish().map_err(GraphError::from)?;
        let compiled = self.engine.compile(&op, name)?;

        // Every input of the lowered operator must have a buffer here.
        for sym in compiled.inputs() {
            if !self.sources.iter().any(|s| s.name == sym.name) {
                return Err(LifecycleError::NoBuffer.into());
            }
        }

        let capacity = self
            .sources
            .iter()
            .map(|s| s.region.capacity())
            .max()
            .unwrap_or(0);
        self.output = Some(Region::new(capacity, compiled.output_dtype(), t0));
        self.compiled = Some(compiled);
        Ok(())
    }

    /// Run the compiled query over the session's time range. The output
    /// buffer is rebuilt on every call, so execution can be repeated.
    pub fn execute(&mut self) -> Result<(), SessionError> {
        let (t0, t1) = self.times()?;
        let compiled = self.compiled.as_ref().ok_or(LifecycleError::NotCompiled)?;
        let out = self.output.as_mut().ok_or(LifecycleError::NotCompiled)?;
        *out = Region::new(out.capacity(), out.schema().clone(), t0);

        let mut ins = Vec::with_capacity(compiled.inputs().len());
        for sym in compiled.inputs() {
            let entry = self
                .sources
                .iter()
                .find(|s| s.name == sym.name)
                .ok_or(LifecycleError::NoBuffer)?;
            ins.push(&entry.region);
        }

        self.engine.execute(compiled, t0, t1, out, &ins)?;
        Ok(())
    }

    /// The query result buffer; present once compiled.
    pub fn output(&self) -> Option<&Region> {
        self.output.as_ref()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
