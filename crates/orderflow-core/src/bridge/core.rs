//! ToolBridge: instrumented tool execution for blocking workflow threads

use orderflow_tools::builtins::PROMPT_KEYS;
use orderflow_tools::{RunContext, ToolContext, ToolHandle, ToolRegistry};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::context;
use super::handoff::Handoff;
use super::runtime::{blocking_wait, ToolRuntime};
use super::types::{BridgeError, BridgeSettings};
use crate::clarification::{ClarificationError, ClarificationRequest};
use crate::config::ClarificationFallback;
use crate::orchestrator::{RunOrchestrator, StepReport};
use crate::protocol::StepStatus;
use crate::tracker::{Claim, ExecutionRecord, ExecutionTracker, RecordStatus};

const WAITING_STEP: &str = "Waiting for user input";
const ANSWERED_STEP: &str = "User input received";
const CLARIFICATION_FAILED_STEP: &str = "Clarification failed";

type BridgeResult = Result<Value, BridgeError>;

/// Runs tools on behalf of synchronous workflows
pub struct ToolBridge {
    tools: Arc<ToolRegistry>,
    orchestrator: Arc<RunOrchestrator>,
    settings: BridgeSettings,
    tool_runtime: ToolRuntime,
    /// Runtime the clarification coordinator lives on
    runtime: Option<Handle>,
}

impl ToolBridge {
    /// Create a bridge and start its async tool runtime.
    ///
    /// Captures the current tokio runtime, if any, for clarifications; see
    /// [`Self::with_runtime`].
    pub fn new(
        tools: Arc<ToolRegistry>,
        orchestrator: Arc<RunOrchestrator>,
        settings: BridgeSettings,
    ) -> Result<Self, BridgeError> {
        Ok(Self {
            tools,
            orchestrator,
            settings,
            tool_runtime: ToolRuntime::start()?,
            runtime: Handle::try_current().ok(),
        })
    }

    /// Use an explicit runtime for clarifications
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Bridge settings
    #[must_use]
    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Registered tools
    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run orchestrator used for reporting
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<RunOrchestrator> {
        &self.orchestrator
    }

    /// Run a tool.
    ///
    /// `ctx` falls back to the thread-local scope; with no context at all
    /// the tool runs uninstrumented. The deduplication key is the tool name,
    /// or tool name plus question for clarification tools.
    pub fn run(&self, tool: &str, ctx: Option<&RunContext>, args: Value) -> BridgeResult {
        let handle = self.resolve(tool)?;
        let tool_id = if handle.definition().is_clarification() {
            let question = question_of(&args).unwrap_or_default();
            format!("{tool}:{question}")
        } else {
            tool.to_string()
        };
        self.execute(&handle, &tool_id, ctx, args)
    }

    /// Run a tool under an explicit deduplication key.
    ///
    /// Calls sharing `tool_id` within one run execute at most once; use
    /// distinct keys for deliberate repeats.
    pub fn run_as(
        &self,
        tool: &str,
        tool_id: &str,
        ctx: Option<&RunContext>,
        args: Value,
    ) -> BridgeResult {
        let handle = self.resolve(tool)?;
        self.execute(&handle, tool_id, ctx, args)
    }

    fn resolve(&self, tool: &str) -> Result<ToolHandle, BridgeError> {
        self.tools
            .get(tool)
            .filter(|h| h.definition().enabled)
            .ok_or_else(|| BridgeError::UnknownTool(tool.to_string()))
    }

    fn execute(
        &self,
        handle: &ToolHandle,
        tool_id: &str,
        ctx: Option<&RunContext>,
        args: Value,
    ) -> BridgeResult {
        let Some(ctx) = ctx.cloned().or_else(context::current) else {
            debug!(tool = %handle.name(), "No run context; running tool uninstrumented");
            return self.run_detached(handle, args);
        };

        if self.is_inactive(&ctx) {
            debug!(run_id = %ctx.run_id, tool = %handle.name(), "Refusing tool call for inactive or unknown run");
            return Err(BridgeError::RunInactive(ctx.run_id));
        }

        match self.orchestrator.tracker().claim(&ctx, tool_id, handle.name()) {
            Claim::Execute { step_id } => self.run_step(handle, tool_id, &step_id, &ctx, args),
            Claim::Cached(record) => Ok(self.replay(handle, &ctx, record)),
            Claim::InFlight(pending) => self.join_in_flight(handle, &ctx, &pending),
        }
    }

    fn run_detached(&self, handle: &ToolHandle, args: Value) -> BridgeResult {
        if handle.definition().is_clarification() {
            let question = question_of(&args).unwrap_or_default();
            return self.fallback(&question, "no live run for this call");
        }
        self.invoke(handle, &ToolContext::detached(), args)
    }

    fn run_step(
        &self,
        handle: &ToolHandle,
        tool_id: &str,
        step_id: &str,
        ctx: &RunContext,
        args: Value,
    ) -> BridgeResult {
        let definition = handle.definition();
        let clarification = definition.is_clarification();
        let started = Instant::now();
        let mut claim = ClaimGuard {
            tracker: self.orchestrator.tracker(),
            run_id: &ctx.run_id,
            tool_id,
            step_id,
            settled: false,
        };

        let opening = if clarification {
            StepReport::new(step_id, WAITING_STEP, StepStatus::Waiting)
        } else {
            StepReport::new(step_id, definition.display_name.as_str(), StepStatus::Started)
        };
        self.orchestrator
            .report_step(&ctx.run_id, opening.with_tool(handle.name()));

        let outcome = if clarification {
            self.ask(ctx, &args)
        } else {
            self.invoke(handle, &ToolContext::from(ctx), args)
        };
        let elapsed = started.elapsed();

        match &outcome {
            Ok(value) => {
                claim.settle(RecordStatus::Completed, Some(value.clone()), None);
                let name = if clarification {
                    ANSWERED_STEP
                } else {
                    definition.display_name.as_str()
                };
                self.orchestrator.report_step(
                    &ctx.run_id,
                    StepReport::new(step_id, name, StepStatus::Completed)
                        .with_tool(handle.name())
                        .with_output(value.clone())
                        .with_duration(elapsed),
                );
            }
            Err(e) => {
                claim.settle(RecordStatus::Failed, None, Some(e.to_string()));
                let name = if clarification {
                    CLARIFICATION_FAILED_STEP
                } else {
                    definition.display_name.as_str()
                };
                warn!(
                    run_id = %ctx.run_id,
                    step_id = %step_id,
                    tool = %handle.name(),
                    error = %e,
                    "Tool call failed"
                );
                self.orchestrator.report_step(
                    &ctx.run_id,
                    StepReport::new(step_id, name, StepStatus::Failed)
                        .with_tool(handle.name())
                        .with_error(e.to_string())
                        .with_duration(elapsed),
                );
            }
        }
        outcome
    }

    fn replay(&self, handle: &ToolHandle, ctx: &RunContext, record: ExecutionRecord) -> Value {
        warn!(
            run_id = %ctx.run_id,
            tool_id = %record.tool_id,
            step_id = %record.step_id,
            "Duplicate tool call; returning recorded result"
        );
        let output = record.result.unwrap_or(Value::Null);
        let step_id = self.orchestrator.tracker().next_step_id(ctx, handle.name());
        self.orchestrator.report_step(
            &ctx.run_id,
            StepReport::new(step_id, handle.definition().display_name.as_str(), StepStatus::Skipped)
                .with_tool(handle.name())
                .with_output(output.clone()),
        );
        output
    }

    fn join_in_flight(
        &self,
        handle: &ToolHandle,
        ctx: &RunContext,
        pending: &Handoff<ExecutionRecord>,
    ) -> BridgeResult {
        let wait = if handle.definition().is_clarification() {
            self.settings.bridge_wait()
        } else {
            self.settings.tool_timeout
        };
        info!(run_id = %ctx.run_id, tool = %handle.name(), "Waiting for in-flight call of the same tool");

        match blocking_wait(|| pending.wait_timeout(wait)) {
            Some(record) if record.status == RecordStatus::Completed => {
                Ok(record.result.unwrap_or(Value::Null))
            }
            Some(record) => Err(BridgeError::Tool(orderflow_tools::Error::Execution(
                record.error.unwrap_or_else(|| "tool failed".to_string()),
            ))),
            None => Err(self.timed_out(handle.name(), wait)),
        }
    }

    fn invoke(&self, handle: &ToolHandle, ctx: &ToolContext, args: Value) -> BridgeResult {
        match handle {
            ToolHandle::Blocking(tool) => tool.execute(ctx, args).map_err(BridgeError::Tool),
            ToolHandle::Async(tool) => {
                let tool = Arc::clone(tool);
                let ctx = ctx.clone();
                let timeout = self.settings.tool_timeout;
                self.tool_runtime
                    .run(async move { tool.execute(&ctx, args).await }, timeout)
                    .ok_or_else(|| self.timed_out(handle.name(), timeout))?
                    .map_err(BridgeError::Tool)
            }
        }
    }

    /// Ask the run's client and block until answered, expired or cancelled.
    fn ask(&self, ctx: &RunContext, args: &Value) -> BridgeResult {
        let Some(question) = question_of(args) else {
            return Err(BridgeError::Tool(orderflow_tools::Error::InvalidInput(format!(
                "clarification needs one of: {}",
                PROMPT_KEYS.join(", ")
            ))));
        };

        let Some(runtime) = self.runtime.clone() else {
            error!(run_id = %ctx.run_id, "No async runtime reachable for clarification");
            return self.fallback(&question, "no async runtime reachable");
        };
        let registry = self.orchestrator.registry();
        let Some(token) = registry.session_token(&ctx.run_id) else {
            return self.fallback(&question, "run session not found");
        };
        if !registry.is_connected(&ctx.client_id) {
            return self.fallback(&question, "client not connected");
        }

        let timeout = args
            .get("timeout_seconds")
            .and_then(Value::as_u64)
            .filter(|s| *s > 0)
            .map_or(self.settings.clarification_timeout, Duration::from_secs)
            .min(self.settings.max_clarification_timeout);
        let mut request = ClarificationRequest::new(&ctx.client_id, &ctx.run_id, question.as_str())
            .with_timeout(timeout);
        if let Some(options) = options_of(args) {
            request = request.with_options(options);
        }
        if let Some(extra) = args.get("context").filter(|v| v.is_object()) {
            request = request.with_context(extra.clone());
        }

        let slot = Arc::new(Handoff::new());
        let filler = Arc::clone(&slot);
        let coordinator = Arc::clone(self.orchestrator.coordinator());
        self.orchestrator.set_waiting(&ctx.run_id, true);
        let waiting = WaitingGuard {
            orchestrator: &self.orchestrator,
            run_id: &ctx.run_id,
        };
        runtime.spawn(async move {
            filler.fill(coordinator.request(request, token).await);
        });

        let wait = timeout.saturating_add(self.settings.grace);
        let outcome = blocking_wait(|| slot.take_timeout(wait));
        drop(waiting);

        match outcome {
            Some(Ok(answer)) => {
                info!(run_id = %ctx.run_id, "Clarification answered");
                Ok(Value::String(answer))
            }
            Some(Err(ClarificationError::NotDelivered { client_id })) => {
                self.fallback(&question, &format!("client {client_id} unreachable"))
            }
            Some(Err(e)) => Err(BridgeError::Clarification(e)),
            None => {
                error!(
                    run_id = %ctx.run_id,
                    wait_secs = wait.as_secs(),
                    "Clarification wait exceeded without a resolution"
                );
                Err(self.timed_out("clarification", wait))
            }
        }
    }

    fn fallback(&self, question: &str, reason: &str) -> BridgeResult {
        match self.settings.fallback {
            ClarificationFallback::Fail => {
                error!(question = %question, reason = %reason, "Cannot ask for clarification");
                Err(BridgeError::NoExecutionContext(format!(
                    "cannot ask for clarification: {reason}"
                )))
            }
            ClarificationFallback::DefaultAnswer => {
                error!(
                    question = %question,
                    reason = %reason,
                    answer = %self.settings.fallback_answer,
                    "Cannot ask for clarification; substituting configured fallback answer"
                );
                Ok(Value::String(self.settings.fallback_answer.clone()))
            }
        }
    }

    fn timed_out(&self, tool: &str, waited: Duration) -> BridgeError {
        error!(tool = %tool, waited_ms = waited.as_millis() as u64, "Bridge wait timed out");
        BridgeError::Timeout {
            tool: tool.to_string(),
            secs: waited.as_secs(),
        }
    }

    /// Move a run to a new workflow phase.
    pub fn report_phase(&self, ctx: &RunContext, phase: &str, description: &str) {
        self.orchestrator.report_phase(&ctx.run_id, phase, description);
    }

    /// Push a progress update for a run.
    pub fn report_progress(&self, ctx: &RunContext, step: &str, pct: f64, message: Option<&str>) {
        self.orchestrator
            .report_progress(&ctx.run_id, step, pct, message);
    }

    /// Record how many steps a run will take, unless the client already said.
    pub fn set_total_steps(&self, ctx: &RunContext, total: u32) {
        let known = self
            .orchestrator
            .status(&ctx.run_id)
            .and_then(|s| s.total_steps)
            .is_some();
        if !known {
            self.orchestrator.set_total_steps(&ctx.run_id, total);
        }
    }

    /// Whether the run was cancelled, already finished or is not tracked
    #[must_use]
    pub fn is_inactive(&self, ctx: &RunContext) -> bool {
        self.orchestrator
            .status(&ctx.run_id)
            .is_none_or(|s| s.is_terminal())
    }
}

/// Releases a claimed step if the call unwinds before recording an outcome,
/// so callers parked on the same key are not left waiting.
struct ClaimGuard<'a> {
    tracker: &'a ExecutionTracker,
    run_id: &'a str,
    tool_id: &'a str,
    step_id: &'a str,
    settled: bool,
}

impl ClaimGuard<'_> {
    fn settle(&mut self, status: RecordStatus, result: Option<Value>, error: Option<String>) {
        self.settled = true;
        self.tracker
            .mark_executed(self.run_id, self.tool_id, self.step_id, status, result, error);
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(run_id = %self.run_id, step_id = %self.step_id, "Tool call aborted before recording an outcome");
            self.settle(RecordStatus::Failed, None, Some("tool call aborted".to_string()));
        }
    }
}

/// Puts a run back to `running` once its clarification wait ends, however it ends.
struct WaitingGuard<'a> {
    orchestrator: &'a RunOrchestrator,
    run_id: &'a str,
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.set_waiting(self.run_id, false);
    }
}

fn question_of(args: &Value) -> Option<String> {
    if let Some(text) = args.as_str() {
        return Some(text.to_string()).filter(|t| !t.trim().is_empty());
    }
    PROMPT_KEYS
        .iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string)
}

fn options_of(args: &Value) -> Option<Vec<String>> {
    let options: Vec<String> = args
        .get("options")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    (!options.is_empty()).then_some(options)
}
