//! Orchestrator：单个 Run 的主控循环
//!
//! PLAN → EXECUTE_TOOL → EVALUATE 往复推进，直到 DONE / FAILED 或在 NEEDS_APPROVAL 暂停。
//! 每次迁移先在内存状态机上校验，再与 Step / Transition / Run 状态一并提交到 RunStore；
//! 因此任何时刻都可以从最新 Step 的 state 重建状态机继续运行（重启、审批恢复）。
//!
//! 失败分两类：
//! - 预期失败（Oracle 错误、回复格式错误、参数校验失败、工具重试耗尽、超出步数上限）
//!   由各阶段直接调用 `fail_run`，循环随后结束；
//! - 意外错误（存储错误、非法迁移）经 `fail_run("Unexpected error: …")` 记录一次后向上返回。

use std::sync::Arc;

use chrono::Utc;
use tracing::Instrument;

use crate::core::retry::{RetryCoordinator, RetryKey, RetryVerdict};
use crate::core::{AgentError, State, StateMachine};
use crate::oracle::{DecisionOracle, EvaluationDecision, PlanDecision};
use crate::store::{Run, RunStatus, RunStore, ToolCall, ToolCallStatus};
use crate::tools::{ToolExecutor, ToolInfo, ToolRegistry};

/// 循环参数
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// 单个 Run 最多规划的步数
    pub max_steps: i64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self { max_steps: 10 }
    }
}

/// 一个 Run 在内存中的推进位置
struct RunCursor {
    run_id: i64,
    goal: String,
    machine: StateMachine,
    step_number: i64,
}

enum Flow {
    Continue,
    Paused,
}

pub struct Orchestrator {
    store: RunStore,
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    oracle: DecisionOracle,
    retry: RetryCoordinator,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: RunStore,
        registry: Arc<ToolRegistry>,
        oracle: DecisionOracle,
        retry: RetryCoordinator,
        settings: OrchestratorSettings,
    ) -> Self {
        let executor = ToolExecutor::new(Arc::clone(&registry));
        Self {
            store,
            registry,
            executor,
            oracle,
            retry,
            settings,
        }
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub fn tools(&self) -> Vec<ToolInfo> {
        self.registry.list()
    }

    pub fn create_run(&self, goal: &str) -> Result<Run, AgentError> {
        let run = self.store.create_run(goal)?;
        tracing::info!(run_id = run.id, goal = %run.goal, "Run created");
        Ok(run)
    }

    /// 驱动 Run 直到终态或审批暂停，返回此时的 Run 状态。
    /// 已终止或正在等待审批的 Run 原样返回其状态。
    pub async fn start(&self, run_id: i64) -> Result<RunStatus, AgentError> {
        let span = tracing::info_span!("run", run_id);
        self.start_inner(run_id).instrument(span).await
    }

    /// 人工审批：approved = true 时执行被挂起的工具并继续循环，否则 Run 置为 FAILED
    pub async fn resume_after_approval(
        &self,
        run_id: i64,
        approved: bool,
        reason: &str,
    ) -> Result<RunStatus, AgentError> {
        let span = tracing::info_span!("run", run_id);
        self.resume_inner(run_id, approved, reason)
            .instrument(span)
            .await
    }

    async fn start_inner(&self, run_id: i64) -> Result<RunStatus, AgentError> {
        let run = self.store.get_run(run_id)?;
        if run.status.is_terminal() || run.status == RunStatus::NeedsApproval {
            tracing::info!(status = %run.status, "Run not runnable, skipping");
            return Ok(run.status);
        }
        let mut cursor = self.load_cursor(&run)?;
        tracing::info!(
            state = %cursor.machine.current(),
            step = cursor.step_number,
            "Starting run loop"
        );
        self.drive(&mut cursor).await
    }

    async fn resume_inner(
        &self,
        run_id: i64,
        approved: bool,
        reason: &str,
    ) -> Result<RunStatus, AgentError> {
        let run = self.store.get_run(run_id)?;
        if run.status != RunStatus::NeedsApproval {
            return Err(AgentError::NotAwaitingApproval {
                run_id,
                status: run.status.to_string(),
            });
        }
        let mut cursor = self.load_cursor(&run)?;
        if cursor.machine.current() != State::NeedsApproval {
            tracing::warn!(
                state = %cursor.machine.current(),
                "Latest step not paused, forcing NEEDS_APPROVAL"
            );
            cursor.machine = StateMachine::starting_at(State::NeedsApproval);
        }
        tracing::info!(approved, reason, "Approval decision received");

        match self.apply_approval(&mut cursor, approved, reason).await {
            Ok(Flow::Continue) => self.drive(&mut cursor).await,
            Ok(Flow::Paused) => Ok(RunStatus::from_state(cursor.machine.current())),
            Err(e) => {
                self.fail_unexpected(&mut cursor, &e);
                Err(e)
            }
        }
    }

    /// 由最新 Step 重建状态机；还没有 Step 时从 PLAN / 0 开始
    fn load_cursor(&self, run: &Run) -> Result<RunCursor, AgentError> {
        let (machine, step_number) = match self.store.latest_step(run.id)? {
            Some(step) => (StateMachine::starting_at(step.state), step.step_number),
            None => (StateMachine::new(), 0),
        };
        Ok(RunCursor {
            run_id: run.id,
            goal: run.goal.clone(),
            machine,
            step_number,
        })
    }

    async fn drive(&self, cur: &mut RunCursor) -> Result<RunStatus, AgentError> {
        match self.run_loop(cur).await {
            Ok(status) => Ok(status),
            Err(e) => {
                self.fail_unexpected(cur, &e);
                Err(e)
            }
        }
    }

    async fn run_loop(&self, cur: &mut RunCursor) -> Result<RunStatus, AgentError> {
        loop {
            let state = cur.machine.current();
            if state.is_terminal() {
                break;
            }
            // 步数上限在每轮开头检查（暂停中的 Run 除外），先于 PLAN 的计数
            if state != State::NeedsApproval && cur.step_number >= self.settings.max_steps {
                let reason = format!("Max steps ({}) exceeded", self.settings.max_steps);
                self.fail_run(cur, &reason)?;
                break;
            }
            if state == State::Plan {
                cur.step_number += 1;
            }
            tracing::info!(step = cur.step_number, state = %state, "Executing step");

            match state {
                State::Plan => self.handle_plan(cur).await?,
                State::ExecuteTool => self.handle_execute(cur).await?,
                State::Evaluate => self.handle_evaluate(cur).await?,
                State::NeedsApproval => {
                    if let Flow::Paused = self.handle_needs_approval(cur)? {
                        break;
                    }
                }
                State::Done | State::Failed => break,
            }
        }

        let status = RunStatus::from_state(cur.machine.current());
        self.store.set_run_status(cur.run_id, status)?;
        tracing::info!(status = %status, steps = cur.step_number, "Run loop finished");
        Ok(status)
    }

    // ---------- PLAN ----------

    async fn handle_plan(&self, cur: &mut RunCursor) -> Result<(), AgentError> {
        let tools = self.registry.list();
        let history = self.store.history(cur.run_id)?;
        let decision = match self.oracle.plan(&cur.goal, &tools, &history).await {
            Ok(d) => d,
            Err(AgentError::Oracle(msg)) => {
                return self.fail_run(cur, &format!("Oracle error during planning: {msg}"));
            }
            Err(AgentError::ResponseFormat(msg)) => {
                return self.fail_run(cur, &format!("Invalid plan format: {msg}"));
            }
            Err(e) => return Err(e),
        };

        match decision {
            PlanDecision::Done { reasoning } => {
                tracing::info!(reasoning = %reasoning, "Planner declared goal achieved");
                let from = cur.machine.transition(State::Done)?;
                self.store
                    .append_step_transition(cur.run_id, cur.step_number, from, State::Done, &reasoning)?;
            }
            PlanDecision::CallTool {
                tool_name,
                inputs,
                reasoning,
            } => {
                let validated = match self.registry.validate_inputs(&tool_name, &inputs) {
                    Ok(v) => v,
                    Err(e) => return self.fail_run(cur, &format!("Invalid tool inputs: {e}")),
                };
                cur.machine.transition(State::ExecuteTool)?;
                let (_, call) = self.store.append_planned_step(
                    cur.run_id,
                    cur.step_number,
                    &reasoning,
                    &tool_name,
                    &validated,
                )?;
                tracing::info!(tool = %tool_name, tool_call_id = call.id, "Planned tool call");
            }
        }
        Ok(())
    }

    // ---------- EXECUTE_TOOL ----------

    async fn handle_execute(&self, cur: &mut RunCursor) -> Result<(), AgentError> {
        let Some(step) = self.store.get_step(cur.run_id, cur.step_number)? else {
            return self.fail_run(cur, "No current step found");
        };
        // 审批已提交但派发前进程退出：按已批准的调用继续，不再过闸门
        if self.store.approval_committed(cur.run_id, cur.step_number)? {
            if let Some(call) = self.store.latest_tool_call(step.id)? {
                tracing::info!(tool = %call.tool_name, status = %call.status, "Resuming approved tool call");
                return self.execute_approved(cur, call).await;
            }
        }
        let Some(mut call) = self.store.pending_tool_call(step.id)? else {
            return self.fail_run(cur, "No pending tool call found");
        };

        let tool = match self.registry.get(&call.tool_name) {
            Ok(t) => t,
            Err(e) => {
                self.mark_call_failed(&mut call, e.to_string())?;
                return self.fail_run(cur, &format!("Tool error: {e}"));
            }
        };

        // 审批闸门（派发前）：工具不执行，等待人工决定
        if tool.requires_approval() {
            call.status = ToolCallStatus::NeedsApproval;
            self.store.update_tool_call(&call)?;
            self.suspend(cur)?;
            tracing::info!(tool = %call.tool_name, "Tool requires approval, pausing before dispatch");
            return Ok(());
        }

        let key = RetryKey::new(cur.run_id, call.id);
        let attempts = self.retry.attempts(&key)?;
        self.retry.wait_before_dispatch(&key, attempts).await;

        call.status = ToolCallStatus::Running;
        self.store.update_tool_call(&call)?;

        match self.executor.execute(&call.tool_name, call.inputs.clone()).await {
            Ok(output) => {
                self.mark_call_succeeded(&mut call, output)?;
                self.retry.clear(&key)?;
                // 审批闸门（派发后）：执行期间工具变为需要审批
                if self.registry.requires_approval(&call.tool_name) {
                    self.suspend(cur)?;
                    tracing::info!(tool = %call.tool_name, "Tool requires approval, pausing after dispatch");
                    return Ok(());
                }
                self.advance(cur, State::Evaluate)
            }
            Err(e) if e.is_retryable() => match self.retry.record_failure(&key, attempts)? {
                RetryVerdict::Retry(failures) => {
                    call.status = ToolCallStatus::Pending;
                    call.error_message = Some(e.to_string());
                    self.store.update_tool_call(&call)?;
                    tracing::warn!(
                        tool = %call.tool_name,
                        attempt = failures,
                        max_attempts = self.retry.policy().max_attempts,
                        error = %e,
                        "Tool failed, will retry"
                    );
                    Ok(())
                }
                RetryVerdict::Exhausted(failures) => {
                    tracing::error!(tool = %call.tool_name, attempts = failures, "Retries exhausted");
                    self.mark_call_failed(&mut call, e.to_string())?;
                    self.fail_run(cur, &format!("Tool error: {}", failure_message(&e)))
                }
            },
            Err(e) => {
                self.mark_call_failed(&mut call, e.to_string())?;
                self.fail_run(cur, &format!("Tool error: {}", failure_message(&e)))
            }
        }
    }

    // ---------- EVALUATE ----------

    async fn handle_evaluate(&self, cur: &mut RunCursor) -> Result<(), AgentError> {
        let tools = self.registry.list();
        let history = self.store.history(cur.run_id)?;
        let evaluation = match self.oracle.evaluate(&cur.goal, &tools, &history).await {
            Ok(e) => e,
            Err(AgentError::Oracle(msg)) => {
                return self.fail_run(cur, &format!("Oracle error during evaluation: {msg}"));
            }
            Err(AgentError::ResponseFormat(msg)) => {
                return self.fail_run(cur, &format!("Invalid evaluation format: {msg}"));
            }
            Err(e) => return Err(e),
        };

        let reasoning = evaluation.reasoning.unwrap_or_default();
        if let Some(step) = self.store.get_step(cur.run_id, cur.step_number)? {
            self.store
                .append_reasoning(step.id, &format!("\n[Evaluation] {reasoning}"))?;
        }
        tracing::info!(decision = ?evaluation.decision, reasoning = %reasoning, "Evaluation");

        match evaluation.decision {
            EvaluationDecision::Invalid(msg) => {
                self.fail_run(cur, &format!("Invalid evaluation format: {msg}"))
            }
            EvaluationDecision::Continue => self.advance(cur, State::Plan),
            EvaluationDecision::Done => self.advance(cur, State::Done),
            EvaluationDecision::NeedsApproval => self.advance(cur, State::NeedsApproval),
            EvaluationDecision::Failed => {
                let reason = if reasoning.is_empty() {
                    "Agent decided to fail".to_string()
                } else {
                    reasoning
                };
                self.fail_run(cur, &reason)
            }
        }
    }

    // ---------- NEEDS_APPROVAL ----------

    fn handle_needs_approval(&self, cur: &mut RunCursor) -> Result<Flow, AgentError> {
        match self.current_tool_call(cur)? {
            Some(call) => {
                self.store.set_run_status(cur.run_id, RunStatus::NeedsApproval)?;
                tracing::info!(tool = %call.tool_name, tool_call_id = call.id, "Paused awaiting approval");
                Ok(Flow::Paused)
            }
            None => {
                tracing::warn!("Nothing awaiting approval, returning to planning");
                self.return_to_plan(cur)?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn apply_approval(
        &self,
        cur: &mut RunCursor,
        approved: bool,
        reason: &str,
    ) -> Result<Flow, AgentError> {
        let step = self.store.get_step(cur.run_id, cur.step_number)?;
        let call = self.current_tool_call(cur)?;
        let verdict = if approved { "approved" } else { "rejected" };
        if let Some(step) = &step {
            self.store
                .append_reasoning(step.id, &format!("\n[Approval] {verdict}: {reason}"))?;
        }

        if !approved {
            if let Some(mut call) = call {
                self.mark_call_failed(&mut call, format!("Rejected: {reason}"))?;
            }
            self.fail_run(cur, &format!("Approval rejected: {reason}"))?;
            return Ok(Flow::Paused);
        }

        let Some(call) = call else {
            self.return_to_plan(cur)?;
            return Ok(Flow::Continue);
        };

        self.advance(cur, State::ExecuteTool)?;
        self.execute_approved(cur, call).await?;
        if cur.machine.is_terminal() {
            return Ok(Flow::Paused);
        }
        Ok(Flow::Continue)
    }

    /// 已批准的调用：未成功时派发一次（不走重试），随后进入 EVALUATE
    async fn execute_approved(&self, cur: &mut RunCursor, mut call: ToolCall) -> Result<(), AgentError> {
        if call.status != ToolCallStatus::Success {
            call.status = ToolCallStatus::Running;
            self.store.update_tool_call(&call)?;
            match self.executor.execute(&call.tool_name, call.inputs.clone()).await {
                Ok(output) => self.mark_call_succeeded(&mut call, output)?,
                Err(e) => {
                    self.mark_call_failed(&mut call, e.to_string())?;
                    return self.fail_run(cur, &format!("Tool error: {}", failure_message(&e)));
                }
            }
        }
        self.advance(cur, State::Evaluate)
    }

    // ---------- helpers ----------

    fn current_tool_call(&self, cur: &RunCursor) -> Result<Option<ToolCall>, AgentError> {
        match self.store.get_step(cur.run_id, cur.step_number)? {
            Some(step) => self.store.latest_tool_call(step.id),
            None => Ok(None),
        }
    }

    /// 内存迁移 + 持久化（Step.state、Transition、Run 状态投影）
    fn advance(&self, cur: &mut RunCursor, target: State) -> Result<(), AgentError> {
        let from = cur.machine.transition(target)?;
        self.store.commit_transition(
            cur.run_id,
            cur.step_number,
            from,
            target,
            Some(RunStatus::from_state(target)),
        )
    }

    fn suspend(&self, cur: &mut RunCursor) -> Result<(), AgentError> {
        let from = cur.machine.suspend_for_approval()?;
        self.store.commit_transition(
            cur.run_id,
            cur.step_number,
            from,
            State::NeedsApproval,
            Some(RunStatus::NeedsApproval),
        )
    }

    fn return_to_plan(&self, cur: &mut RunCursor) -> Result<(), AgentError> {
        let from = cur.machine.current();
        cur.machine.reset();
        self.store.commit_transition(
            cur.run_id,
            cur.step_number,
            from,
            State::Plan,
            Some(RunStatus::Running),
        )
    }

    fn mark_call_succeeded(&self, call: &mut ToolCall, output: serde_json::Value) -> Result<(), AgentError> {
        call.outputs = Some(output);
        call.status = ToolCallStatus::Success;
        call.error_message = None;
        call.executed_at = Some(Utc::now());
        self.store.update_tool_call(call)
    }

    fn mark_call_failed(&self, call: &mut ToolCall, message: String) -> Result<(), AgentError> {
        call.status = ToolCallStatus::Failed;
        call.error_message = Some(message);
        self.store.update_tool_call(call)
    }

    /// 进入 FAILED：写入失败 Step（当前编号已被占用时顺延一位）。已处于终态时不做任何事。
    fn fail_run(&self, cur: &mut RunCursor, reason: &str) -> Result<(), AgentError> {
        if cur.machine.is_terminal() {
            tracing::warn!(
                state = %cur.machine.current(),
                reason,
                "Run already terminal, ignoring failure"
            );
            return Ok(());
        }
        let number = if self.store.get_step(cur.run_id, cur.step_number)?.is_some() {
            cur.step_number + 1
        } else {
            cur.step_number
        };
        let from = cur.machine.transition(State::Failed)?;
        self.store.record_failure(cur.run_id, number, from, reason)?;
        cur.step_number = number;
        tracing::error!(reason, step = number, "Run failed");
        Ok(())
    }

    fn fail_unexpected(&self, cur: &mut RunCursor, err: &AgentError) {
        tracing::error!(error = %err, "Unexpected error in run loop");
        if let Err(e) = self.fail_run(cur, &format!("Unexpected error: {err}")) {
            tracing::error!(error = %e, "Could not record failure");
        }
    }
}

/// 工具错误的简短描述（去掉 "Tool execution failed:" 前缀）
fn failure_message(err: &AgentError) -> String {
    match err {
        AgentError::ToolExecution(msg) => msg.clone(),
        other => other.to_string(),
    }
}
