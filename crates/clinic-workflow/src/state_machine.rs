//! 排队号状态机
//!
//! 管理排队号从候诊到完成/取消的状态转换

use clinic_core::{ClinicError, Result, TicketStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// 排队号状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TicketEvent {
    Claim,    // 叫号领取
    Complete, // 服务完成
    Cancel,   // 取消
}

impl TicketEvent {
    /// 到达目标状态所需的事件
    pub fn for_target(target: TicketStatus) -> Option<Self> {
        match target {
            TicketStatus::InProgress => Some(TicketEvent::Claim),
            TicketStatus::Completed => Some(TicketEvent::Complete),
            TicketStatus::Cancelled => Some(TicketEvent::Cancel),
            TicketStatus::Waiting => None,
        }
    }
}

/// 排队号状态机
#[derive(Debug)]
pub struct TicketStateMachine {
    transitions: HashMap<(TicketStatus, TicketEvent), TicketStatus>,
}

impl TicketStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        transitions.insert((TicketStatus::Waiting, TicketEvent::Claim), TicketStatus::InProgress);
        transitions.insert((TicketStatus::Waiting, TicketEvent::Cancel), TicketStatus::Cancelled);
        transitions.insert((TicketStatus::InProgress, TicketEvent::Complete), TicketStatus::Completed);
        transitions.insert((TicketStatus::InProgress, TicketEvent::Cancel), TicketStatus::Cancelled);

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: TicketStatus, event: TicketEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: TicketStatus, event: TicketEvent) -> Result<TicketStatus> {
        match self.transitions.get(&(from, event)) {
            Some(to) => Ok(*to),
            None => Err(ClinicError::invalid_transition(from, event)),
        }
    }

    /// 校验一次“期望状态 + 目标状态”的比较并设置
    ///
    /// 请求领取时，若排队号已被他人领取（服务中，或已领取并完成）返回 `AlreadyClaimed`；
    /// 期望状态与当前状态不符或转换不合法时返回 `InvalidTransition`。
    pub fn authorize(
        &self,
        ticket_id: Uuid,
        current: TicketStatus,
        expected: Option<TicketStatus>,
        target: TicketStatus,
    ) -> Result<TicketStatus> {
        if target == TicketStatus::InProgress {
            let claimed_elsewhere = match current {
                TicketStatus::InProgress => true,
                // 只有领取过的排队号才能完成
                TicketStatus::Completed => expected == Some(TicketStatus::Waiting),
                _ => false,
            };
            if claimed_elsewhere {
                return Err(ClinicError::AlreadyClaimed(ticket_id));
            }
        }

        if let Some(expected) = expected {
            if expected != current {
                return Err(ClinicError::invalid_transition(current, target));
            }
        }

        let event = TicketEvent::for_target(target)
            .ok_or_else(|| ClinicError::invalid_transition(current, target))?;

        self.transition(current, event)
            .map_err(|_| ClinicError::invalid_transition(current, target))
    }

    /// 获取所有可能的状态
    pub fn get_all_states() -> Vec<TicketStatus> {
        vec![
            TicketStatus::Waiting,
            TicketStatus::InProgress,
            TicketStatus::Completed,
            TicketStatus::Cancelled,
        ]
    }

    /// 获取状态的所有可能事件
    pub fn get_possible_events(&self, current_state: TicketStatus) -> Vec<TicketEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == current_state)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl Default for TicketStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let sm = TicketStateMachine::new();

        assert!(sm.can_transition(TicketStatus::Waiting, TicketEvent::Claim));
        assert!(sm.can_transition(TicketStatus::Waiting, TicketEvent::Cancel));
        assert!(sm.can_transition(TicketStatus::InProgress, TicketEvent::Complete));
        assert!(sm.can_transition(TicketStatus::InProgress, TicketEvent::Cancel));
    }

    #[test]
    fn test_invalid_transitions() {
        let sm = TicketStateMachine::new();

        assert!(!sm.can_transition(TicketStatus::Waiting, TicketEvent::Complete));
        assert!(!sm.can_transition(TicketStatus::Completed, TicketEvent::Claim));
        assert!(!sm.can_transition(TicketStatus::Cancelled, TicketEvent::Claim));
        assert!(!sm.can_transition(TicketStatus::Completed, TicketEvent::Cancel));
    }

    #[test]
    fn test_terminal_states_have_no_events() {
        let sm = TicketStateMachine::new();

        for state in TicketStateMachine::get_all_states() {
            let events = sm.get_possible_events(state);
            assert_eq!(events.is_empty(), state.is_terminal(), "{:?}", state);
        }
    }

    #[test]
    fn test_authorize_claim_race() {
        let sm = TicketStateMachine::new();
        let id = Uuid::new_v4();

        let to = sm
            .authorize(id, TicketStatus::Waiting, Some(TicketStatus::Waiting), TicketStatus::InProgress)
            .unwrap();
        assert_eq!(to, TicketStatus::InProgress);

        let lost = sm.authorize(id, TicketStatus::InProgress, Some(TicketStatus::Waiting), TicketStatus::InProgress);
        assert!(matches!(lost, Err(ClinicError::AlreadyClaimed(ticket)) if ticket == id));
    }

    #[test]
    fn test_late_claim_after_completion() {
        let sm = TicketStateMachine::new();
        let id = Uuid::new_v4();

        let late = sm.authorize(id, TicketStatus::Completed, Some(TicketStatus::Waiting), TicketStatus::InProgress);
        assert!(matches!(late, Err(ClinicError::AlreadyClaimed(ticket)) if ticket == id));

        // 已取消的排队号不算被领取
        let cancelled = sm.authorize(id, TicketStatus::Cancelled, Some(TicketStatus::Waiting), TicketStatus::InProgress);
        assert!(matches!(cancelled, Err(ClinicError::InvalidTransition { .. })));
    }

    #[test]
    fn test_authorize_rejects_reopening() {
        let sm = TicketStateMachine::new();
        let id = Uuid::new_v4();

        let result = sm.authorize(id, TicketStatus::Completed, None, TicketStatus::InProgress);
        assert!(matches!(result, Err(ClinicError::InvalidTransition { .. })));

        let result = sm.authorize(id, TicketStatus::InProgress, None, TicketStatus::Waiting);
        assert!(matches!(result, Err(ClinicError::InvalidTransition { .. })));

        let result = sm.authorize(id, TicketStatus::Waiting, Some(TicketStatus::InProgress), TicketStatus::Completed);
        assert!(matches!(result, Err(ClinicError::InvalidTransition { .. })));
    }
}
