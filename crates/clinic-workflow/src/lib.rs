//! # 门诊排队工作流模块
//!
//! 提供患者在各服务站之间流转的完整排队管理功能，包括：
//! - 排队号生成：按服务站连续递增的排队号
//! - 队列存储：加急优先、同级先到先服务的队列视图
//! - 状态机：排队号的合法状态转换与独占领取
//! - 医嘱登记：检验申请、检验结果与处方
//! - 工作流路由：医嘱或就诊完成后自动将患者转入下一服务站

pub mod engine;
pub mod orders;
pub mod queue;
pub mod routing;
pub mod sequencer;
pub mod state_machine;

// 重新导出主要类型
pub use engine::{ClinicOverview, ClinicWorkflow, OrderPlacement, TicketUpdate};
pub use orders::ClinicalOrderRegistry;
pub use queue::{MemoryQueueStore, QueueStore, StationSummary};
pub use routing::{PriorityPolicy, RoutingRule, RoutingTrigger, WorkflowEvent, WorkflowRouter};
pub use sequencer::{IssuedCode, TicketSequencer};
pub use state_machine::{TicketEvent, TicketStateMachine};
