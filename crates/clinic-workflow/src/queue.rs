//! 队列存储
//!
//! 保存所有排队号（含历史记录），并为各服务站提供有序的队列视图

use async_trait::async_trait;
use chrono::Utc;
use clinic_core::{
    ClinicError, Result, StationKind, StatusChange, Ticket, TicketCode, TicketRequest, TicketStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::sequencer::TicketSequencer;
use crate::state_machine::TicketStateMachine;

/// 服务站排队统计
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationSummary {
    pub station: StationKind,
    pub waiting: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub cancelled: usize,
}

/// 队列存储特征
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// 新建排队号，初始状态为候诊
    async fn enqueue(&self, request: TicketRequest) -> Result<Ticket>;

    /// 服务站队列视图：仅候诊/服务中，加急在前，同级按入队时间先后
    async fn view_queue(&self, station: StationKind, assignee: Option<Uuid>) -> Result<Vec<Ticket>>;

    /// 排队号状态的唯一修改入口
    async fn transition(
        &self,
        ticket_id: Uuid,
        expected: Option<TicketStatus>,
        new_status: TicketStatus,
        actor: Option<Uuid>,
    ) -> Result<Ticket>;

    /// 按ID获取排队号
    async fn get(&self, ticket_id: Uuid) -> Result<Ticket>;

    /// 按排队号查找
    async fn find_by_code(&self, code: TicketCode) -> Result<Ticket>;

    /// 患者的全部排队号，按入队先后
    async fn tickets_for_patient(&self, patient_id: Uuid) -> Result<Vec<Ticket>>;

    /// 各服务站排队统计
    async fn station_summary(&self) -> Result<Vec<StationSummary>>;
}

#[derive(Debug, Default)]
struct TicketTable {
    tickets: HashMap<Uuid, Ticket>,
    by_code: HashMap<TicketCode, Uuid>,
    patient_tickets: HashMap<Uuid, Vec<Uuid>>, // patient_id -> ticket_ids
    next_sequence: u64,
}

/// 内存队列存储
#[derive(Debug)]
pub struct MemoryQueueStore {
    sequencer: Arc<TicketSequencer>,
    state_machine: TicketStateMachine,
    table: RwLock<TicketTable>,
}

impl MemoryQueueStore {
    /// 创建新的队列存储
    pub fn new(sequencer: Arc<TicketSequencer>) -> Self {
        Self {
            sequencer,
            state_machine: TicketStateMachine::new(),
            table: RwLock::new(TicketTable::default()),
        }
    }

    /// 获取排队号生成器
    pub fn sequencer(&self) -> &Arc<TicketSequencer> {
        &self.sequencer
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new(Arc::new(TicketSequencer::new()))
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, request: TicketRequest) -> Result<Ticket> {
        // 号码签发与写入在同一服务站锁内完成
        let issued = self.sequencer.issue(request.station).await;
        let mut table = self.table.write().await;

        table.next_sequence += 1;
        let now = Utc::now();
        let ticket = Ticket {
            id: Uuid::new_v4(),
            patient: request.patient,
            station: request.station,
            assignee: request.assignee,
            code: issued.code(),
            status: TicketStatus::Waiting,
            priority: request.priority,
            created_at: now,
            updated_at: now,
            handled_by: None,
            sequence: table.next_sequence,
            history: vec![StatusChange {
                status: TicketStatus::Waiting,
                at: now,
                actor: None,
            }],
        };

        table.by_code.insert(ticket.code, ticket.id);
        table
            .patient_tickets
            .entry(ticket.patient.id)
            .or_insert_with(Vec::new)
            .push(ticket.id);
        table.tickets.insert(ticket.id, ticket.clone());
        drop(table);
        drop(issued);

        tracing::info!(
            "Enqueued ticket {} ({}) for patient {} at {} with priority {:?}",
            ticket.code,
            ticket.id,
            ticket.patient.id,
            ticket.station,
            ticket.priority
        );
        Ok(ticket)
    }

    async fn view_queue(&self, station: StationKind, assignee: Option<Uuid>) -> Result<Vec<Ticket>> {
        let table = self.table.read().await;

        let mut items: Vec<&Ticket> = table
            .tickets
            .values()
            .filter(|ticket| ticket.station == station && ticket.status.is_active())
            .filter(|ticket| assignee.map_or(true, |id| ticket.assignee == Some(id)))
            .collect();

        // 加急在前，其次入队时间，同一时刻按入队序号
        items.sort_by_key(|ticket| (ticket.priority.sort_rank(), ticket.created_at, ticket.sequence));

        tracing::debug!("Queue view for {} returned {} tickets", station, items.len());
        Ok(items.into_iter().cloned().collect())
    }

    async fn transition(
        &self,
        ticket_id: Uuid,
        expected: Option<TicketStatus>,
        new_status: TicketStatus,
        actor: Option<Uuid>,
    ) -> Result<Ticket> {
        let mut table = self.table.write().await;
        let ticket = table
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| ClinicError::NotFound(format!("Ticket {} not found", ticket_id)))?;

        let old_status = ticket.status;
        let to = match self.state_machine.authorize(ticket_id, old_status, expected, new_status) {
            Ok(to) => to,
            Err(e) => {
                tracing::warn!(
                    "Rejected transition of ticket {} from {:?} to {:?}: {}",
                    ticket.code,
                    old_status,
                    new_status,
                    e
                );
                return Err(e);
            }
        };

        let now = Utc::now();
        ticket.status = to;
        ticket.updated_at = now;
        if to == TicketStatus::InProgress {
            ticket.handled_by = actor;
        }
        ticket.history.push(StatusChange {
            status: to,
            at: now,
            actor,
        });

        tracing::info!(
            "Updated ticket {} status from {:?} to {:?}",
            ticket.code,
            old_status,
            to
        );
        Ok(ticket.clone())
    }

    async fn get(&self, ticket_id: Uuid) -> Result<Ticket> {
        let table = self.table.read().await;
        table
            .tickets
            .get(&ticket_id)
            .cloned()
            .ok_or_else(|| ClinicError::NotFound(format!("Ticket {} not found", ticket_id)))
    }

    async fn find_by_code(&self, code: TicketCode) -> Result<Ticket> {
        let table = self.table.read().await;
        table
            .by_code
            .get(&code)
            .and_then(|id| table.tickets.get(id))
            .cloned()
            .ok_or_else(|| ClinicError::NotFound(format!("Ticket {} not found", code)))
    }

    async fn tickets_for_patient(&self, patient_id: Uuid) -> Result<Vec<Ticket>> {
        let table = self.table.read().await;
        Ok(table
            .patient_tickets
            .get(&patient_id)
            .map(|ids| ids.iter().filter_map(|id| table.tickets.get(id)).cloned().collect())
            .unwrap_or_default())
    }

    async fn station_summary(&self) -> Result<Vec<StationSummary>> {
        let table = self.table.read().await;

        let mut summaries: Vec<StationSummary> = StationKind::ALL
            .iter()
            .map(|&station| StationSummary {
                station,
                waiting: 0,
                in_progress: 0,
                completed: 0,
                cancelled: 0,
            })
            .collect();

        for ticket in table.tickets.values() {
            let Some(summary) = summaries.iter_mut().find(|s| s.station == ticket.station) else {
                continue;
            };
            match ticket.status {
                TicketStatus::Waiting => summary.waiting += 1,
                TicketStatus::InProgress => summary.in_progress += 1,
                TicketStatus::Completed => summary.completed += 1,
                TicketStatus::Cancelled => summary.cancelled += 1,
            }
        }

        Ok(summaries)
    }
}
