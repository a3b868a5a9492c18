//! 运行状态机：固定迁移表 + 追加式历史
//!
//! 纯值对象，不做任何 I/O。Orchestrator 每次迁移成功后再把结果落库。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 循环状态（同时也是 Step.state 的取值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Plan,
    ExecuteTool,
    Evaluate,
    NeedsApproval,
    Done,
    Failed,
}

impl State {
    pub const ALL: [State; 6] = [
        State::Plan,
        State::ExecuteTool,
        State::Evaluate,
        State::NeedsApproval,
        State::Done,
        State::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::ExecuteTool => "execute_tool",
            Self::Evaluate => "evaluate",
            Self::NeedsApproval => "needs_approval",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = AgentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "plan" => Ok(Self::Plan),
            "execute_tool" => Ok(Self::ExecuteTool),
            "evaluate" => Ok(Self::Evaluate),
            "needs_approval" => Ok(Self::NeedsApproval),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(AgentError::Store(format!("unknown step state '{value}'"))),
        }
    }
}

/// 迁移表：state -> 合法目标集合
fn allowed_targets(state: State) -> &'static [State] {
    match state {
        State::Plan => &[State::ExecuteTool, State::Done, State::Failed],
        State::ExecuteTool => &[State::Evaluate, State::Failed],
        State::Evaluate => &[State::Plan, State::NeedsApproval, State::Done, State::Failed],
        State::NeedsApproval => &[State::ExecuteTool, State::Failed],
        State::Done | State::Failed => &[],
    }
}

/// 状态机：当前状态 + 迁移历史
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachine {
    current: State,
    history: Vec<State>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::starting_at(State::Plan)
    }

    /// 从已持久化的 Step 状态重建（重启 / 审批恢复时使用）
    pub fn starting_at(state: State) -> Self {
        Self {
            current: state,
            history: vec![state],
        }
    }

    pub fn current(&self) -> State {
        self.current
    }

    pub fn history(&self) -> &[State] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn can_transition(from: State, to: State) -> bool {
        allowed_targets(from).contains(&to)
    }

    pub fn allowed_from(state: State) -> &'static [State] {
        allowed_targets(state)
    }

    /// 迁移到 target；非法迁移返回 InvalidTransition 且状态不变
    pub fn transition(&mut self, target: State) -> Result<State, AgentError> {
        let from = self.current;
        if !Self::can_transition(from, target) {
            return Err(AgentError::InvalidTransition {
                from,
                to: target,
                allowed: allowed_targets(from).to_vec(),
            });
        }
        self.current = target;
        self.history.push(target);
        Ok(from)
    }

    /// 审批闸门的暂停边：仅允许从 EXECUTE_TOOL 挂起到 NEEDS_APPROVAL。
    /// 不属于迁移表，工具尚未（或刚刚）执行时由执行阶段调用。
    pub fn suspend_for_approval(&mut self) -> Result<State, AgentError> {
        let from = self.current;
        if from != State::ExecuteTool {
            return Err(AgentError::InvalidTransition {
                from,
                to: State::NeedsApproval,
                allowed: allowed_targets(from).to_vec(),
            });
        }
        self.current = State::NeedsApproval;
        self.history.push(State::NeedsApproval);
        Ok(from)
    }

    /// 回到 PLAN，历史清空为 [PLAN]
    pub fn reset(&mut self) {
        self.current = State::Plan;
        self.history = vec![State::Plan];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_succeeds_iff_target_in_table() {
        for from in State::ALL {
            for to in State::ALL {
                let mut sm = StateMachine::starting_at(from);
                let result = sm.transition(to);
                if allowed_targets(from).contains(&to) {
                    assert!(result.is_ok(), "{from} -> {to} should be legal");
                    assert_eq!(sm.current(), to);
                    assert_eq!(sm.history(), &[from, to]);
                } else {
                    assert!(result.is_err(), "{from} -> {to} should be rejected");
                    assert_eq!(sm.current(), from);
                    assert_eq!(sm.history(), &[from]);
                }
            }
        }
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        for terminal in [State::Done, State::Failed] {
            let mut sm = StateMachine::starting_at(terminal);
            assert!(sm.is_terminal());
            for to in State::ALL {
                assert!(sm.transition(to).is_err());
            }
            assert!(sm.suspend_for_approval().is_err());
            assert_eq!(sm.current(), terminal);
        }
    }

    #[test]
    fn test_invalid_transition_reports_legal_set() {
        let mut sm = StateMachine::new();
        match sm.transition(State::Evaluate) {
            Err(AgentError::InvalidTransition { from, to, allowed }) => {
                assert_eq!(from, State::Plan);
                assert_eq!(to, State::Evaluate);
                assert_eq!(allowed, vec![State::ExecuteTool, State::Done, State::Failed]);
            }
            other => panic!("Expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn test_full_cycle_history() {
        let mut sm = StateMachine::new();
        sm.transition(State::ExecuteTool).unwrap();
        sm.transition(State::Evaluate).unwrap();
        sm.transition(State::Plan).unwrap();
        sm.transition(State::Done).unwrap();
        assert_eq!(
            sm.history(),
            &[State::Plan, State::ExecuteTool, State::Evaluate, State::Plan, State::Done]
        );
    }

    #[test]
    fn test_suspend_only_from_execute_tool() {
        let mut sm = StateMachine::starting_at(State::ExecuteTool);
        assert_eq!(sm.suspend_for_approval().unwrap(), State::ExecuteTool);
        assert_eq!(sm.current(), State::NeedsApproval);
        // 审批通过后回到执行阶段
        sm.transition(State::ExecuteTool).unwrap();

        let mut sm = StateMachine::starting_at(State::Evaluate);
        assert!(sm.suspend_for_approval().is_err());
        assert_eq!(sm.current(), State::Evaluate);
    }

    #[test]
    fn test_reset() {
        let mut sm = StateMachine::new();
        sm.transition(State::Failed).unwrap();
        sm.reset();
        assert_eq!(sm.current(), State::Plan);
        assert_eq!(sm.history(), &[State::Plan]);
    }

    #[test]
    fn test_state_string_roundtrip() {
        for s in State::ALL {
            assert_eq!(s.as_str().parse::<State>().unwrap(), s);
        }
        assert!("maybe".parse::<State>().is_err());
    }
}
