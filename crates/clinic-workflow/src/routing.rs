//! 工作流路由规则
//!
//! 根据医嘱创建或服务站完成事件，决定患者下一步去哪个服务站排队

use clinic_core::{
    LabRequest, LabUrgency, Prescription, StationAssignees, StationKind, Ticket, TicketPriority,
    TicketRequest,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 触发路由的事件
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// 医生开出检验申请
    LabRequestCreated {
        request: LabRequest,
        assignee: Option<Uuid>,
    },
    /// 医生开出处方
    PrescriptionCreated {
        prescription: Prescription,
        assignee: Option<Uuid>,
    },
    /// 某服务站的排队号已完成
    TicketCompleted { ticket: Ticket },
}

/// 规则触发条件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RoutingTrigger {
    LabRequestCreated,
    PrescriptionCreated,
    TicketCompleted(StationKind),
}

/// 新排队号的优先级来源
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PriorityPolicy {
    Fixed(TicketPriority),
    FromLabUrgency, // 急查检验对应加急
}

/// 路由规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub name: String,
    pub trigger: RoutingTrigger,
    pub target: StationKind,
    pub priority: PriorityPolicy,
}

/// 工作流路由器
///
/// 不保存任何状态，只持有规则表和各服务站默认负责人
#[derive(Debug, Clone)]
pub struct WorkflowRouter {
    rules: Vec<RoutingRule>,
    defaults: StationAssignees,
}

impl WorkflowRouter {
    /// 使用标准就诊路径创建路由器
    pub fn new(defaults: StationAssignees) -> Self {
        Self::with_rules(Self::care_pathway(), defaults)
    }

    /// 使用自定义规则表创建路由器
    pub fn with_rules(rules: Vec<RoutingRule>, defaults: StationAssignees) -> Self {
        Self { rules, defaults }
    }

    /// 标准就诊路径
    ///
    /// 检验结果提交和发药完成不触发任何规则。
    pub fn care_pathway() -> Vec<RoutingRule> {
        vec![
            RoutingRule {
                name: "lab-referral".to_string(),
                trigger: RoutingTrigger::LabRequestCreated,
                target: StationKind::Lab,
                priority: PriorityPolicy::FromLabUrgency,
            },
            RoutingRule {
                name: "pharmacy-referral".to_string(),
                trigger: RoutingTrigger::PrescriptionCreated,
                target: StationKind::Pharmacy,
                priority: PriorityPolicy::Fixed(TicketPriority::Normal),
            },
            RoutingRule {
                name: "consultation-checkout".to_string(),
                trigger: RoutingTrigger::TicketCompleted(StationKind::Doctor),
                target: StationKind::Cashier,
                priority: PriorityPolicy::Fixed(TicketPriority::Normal),
            },
        ]
    }

    /// 获取规则表
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// 服务站默认负责人
    pub fn default_assignee(&self, station: StationKind) -> Option<Uuid> {
        self.defaults.get(station)
    }

    /// 计算事件产生的入队请求
    pub fn route(&self, event: &WorkflowEvent) -> Vec<TicketRequest> {
        let requests: Vec<TicketRequest> = self
            .rules
            .iter()
            .filter(|rule| Self::matches(&rule.trigger, event))
            .map(|rule| self.apply(rule, event))
            .collect();

        for request in &requests {
            tracing::debug!(
                "Routing patient {} to {} with priority {:?}",
                request.patient.id,
                request.station,
                request.priority
            );
        }
        requests
    }

    fn matches(trigger: &RoutingTrigger, event: &WorkflowEvent) -> bool {
        match (trigger, event) {
            (RoutingTrigger::LabRequestCreated, WorkflowEvent::LabRequestCreated { .. }) => true,
            (RoutingTrigger::PrescriptionCreated, WorkflowEvent::PrescriptionCreated { .. }) => true,
            (RoutingTrigger::TicketCompleted(station), WorkflowEvent::TicketCompleted { ticket }) => {
                ticket.station == *station
            }
            _ => false,
        }
    }

    fn apply(&self, rule: &RoutingRule, event: &WorkflowEvent) -> TicketRequest {
        let (patient, requested_assignee, urgency) = match event {
            WorkflowEvent::LabRequestCreated { request, assignee } => {
                (request.patient.clone(), *assignee, Some(request.urgency))
            }
            WorkflowEvent::PrescriptionCreated {
                prescription,
                assignee,
            } => (prescription.patient.clone(), *assignee, None),
            WorkflowEvent::TicketCompleted { ticket } => (ticket.patient.clone(), None, None),
        };

        let priority = match &rule.priority {
            PriorityPolicy::Fixed(priority) => *priority,
            PriorityPolicy::FromLabUrgency => match urgency {
                Some(LabUrgency::Urgent) => TicketPriority::Urgent,
                _ => TicketPriority::Normal,
            },
        };

        TicketRequest {
            patient,
            station: rule.target,
            assignee: requested_assignee.or_else(|| self.defaults.get(rule.target)),
            priority,
        }
    }
}

impl Default for WorkflowRouter {
    fn default() -> Self {
        Self::new(StationAssignees::default())
    }
}
