//! 门诊工作流引擎
//!
//! 协调队列存储、医嘱登记和路由规则的核心引擎

use crate::{
    orders::ClinicalOrderRegistry,
    queue::{MemoryQueueStore, QueueStore, StationSummary},
    routing::{WorkflowEvent, WorkflowRouter},
    sequencer::TicketSequencer,
};
use clinic_core::{
    ClinicError, LabRequest, LabRequestDraft, LabRequestStatus, LabResult, LabResultDraft,
    PatientRef, Prescription, PrescriptionDraft, PrescriptionStatus, Result, StationAssignees,
    StationKind, Ticket, TicketCode, TicketPriority, TicketRequest, TicketStatus,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// 医嘱及其产生的排队号
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacement<T> {
    pub order: T,
    pub ticket: Ticket,
}

/// 状态变更结果及由此路由出的新排队号
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketUpdate {
    pub ticket: Ticket,
    pub routed: Vec<Ticket>,
}

/// 门诊概览
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicOverview {
    pub stations: Vec<StationSummary>,
    pub pending_lab_requests: usize,
    pub pending_prescriptions: usize,
}

/// 门诊工作流引擎
///
/// 所有操作只需共享引用，可放入 `Arc` 供多个服务站并发调用
pub struct ClinicWorkflow {
    store: Arc<dyn QueueStore>,
    registry: Arc<ClinicalOrderRegistry>,
    router: WorkflowRouter,
}

impl std::fmt::Debug for ClinicWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClinicWorkflow")
            .field("registry", &self.registry)
            .field("router", &self.router)
            .finish()
    }
}

impl ClinicWorkflow {
    /// 使用内存存储创建新的工作流引擎
    pub fn new(defaults: StationAssignees) -> Self {
        let sequencer = Arc::new(TicketSequencer::new());
        Self::with_components(
            Arc::new(MemoryQueueStore::new(sequencer)),
            Arc::new(ClinicalOrderRegistry::new()),
            WorkflowRouter::new(defaults),
        )
    }

    /// 使用指定组件创建工作流引擎
    pub fn with_components(
        store: Arc<dyn QueueStore>,
        registry: Arc<ClinicalOrderRegistry>,
        router: WorkflowRouter,
    ) -> Self {
        Self {
            store,
            registry,
            router,
        }
    }

    /// 患者到诊，进入医生诊室队列
    pub async fn check_in(
        &self,
        patient: PatientRef,
        doctor: Option<Uuid>,
        priority: TicketPriority,
    ) -> Result<Ticket> {
        tracing::info!("Checking in patient {} for consultation", patient.id);

        self.store
            .enqueue(TicketRequest {
                patient,
                station: StationKind::Doctor,
                assignee: doctor.or_else(|| self.router.default_assignee(StationKind::Doctor)),
                priority,
            })
            .await
    }

    /// 手动入队
    pub async fn enqueue(&self, request: TicketRequest) -> Result<Ticket> {
        self.store.enqueue(request).await
    }

    /// 服务站队列视图
    pub async fn view_queue(&self, station: StationKind, assignee: Option<Uuid>) -> Result<Vec<Ticket>> {
        self.store.view_queue(station, assignee).await
    }

    /// 领取排队号（候诊 -> 服务中），并发领取时只有一方成功
    pub async fn claim_ticket(&self, ticket_id: Uuid, operator: Uuid) -> Result<Ticket> {
        self.store
            .transition(
                ticket_id,
                Some(TicketStatus::Waiting),
                TicketStatus::InProgress,
                Some(operator),
            )
            .await
    }

    /// 叫下一位：按队列顺序领取第一个仍在候诊的排队号
    pub async fn call_next(
        &self,
        station: StationKind,
        assignee: Option<Uuid>,
        operator: Uuid,
    ) -> Result<Option<Ticket>> {
        let queue = self.store.view_queue(station, assignee).await?;

        for candidate in queue.iter().filter(|t| t.status == TicketStatus::Waiting) {
            match self.claim_ticket(candidate.id, operator).await {
                Ok(ticket) => {
                    tracing::info!("Called ticket {} at {}", ticket.code, station);
                    return Ok(Some(ticket));
                }
                // 被他人抢先领取或已取消，继续下一位
                Err(ClinicError::AlreadyClaimed(_)) | Err(ClinicError::InvalidTransition { .. }) => {
                    tracing::debug!("Ticket {} no longer available, trying next", candidate.code);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::debug!("No waiting tickets at {}", station);
        Ok(None)
    }

    /// 更新排队号状态，完成事件会触发路由
    pub async fn transition_ticket(
        &self,
        ticket_id: Uuid,
        expected: Option<TicketStatus>,
        new_status: TicketStatus,
        actor: Option<Uuid>,
    ) -> Result<TicketUpdate> {
        let ticket = self
            .store
            .transition(ticket_id, expected, new_status, actor)
            .await?;

        let routed = if ticket.status == TicketStatus::Completed {
            self.dispatch(WorkflowEvent::TicketCompleted {
                ticket: ticket.clone(),
            })
            .await?
        } else {
            Vec::new()
        };

        Ok(TicketUpdate { ticket, routed })
    }

    /// 完成服务（服务中 -> 已完成）
    pub async fn complete_ticket(&self, ticket_id: Uuid, operator: Uuid) -> Result<TicketUpdate> {
        self.transition_ticket(
            ticket_id,
            Some(TicketStatus::InProgress),
            TicketStatus::Completed,
            Some(operator),
        )
        .await
    }

    /// 取消排队号
    pub async fn cancel_ticket(&self, ticket_id: Uuid, operator: Uuid) -> Result<Ticket> {
        self.store
            .transition(ticket_id, None, TicketStatus::Cancelled, Some(operator))
            .await
    }

    /// 开检验申请并转入检验科排队
    pub async fn create_lab_request(
        &self,
        draft: LabRequestDraft,
        assignee: Option<Uuid>,
    ) -> Result<OrderPlacement<LabRequest>> {
        let request = ClinicalOrderRegistry::build_lab_request(draft)?;
        let ticket_request = self.route_single(&WorkflowEvent::LabRequestCreated {
            request: request.clone(),
            assignee,
        })?;

        let request = self.registry.record_lab_request(request).await;
        let ticket = self.store.enqueue(ticket_request).await?;

        Ok(OrderPlacement {
            order: request,
            ticket,
        })
    }

    /// 提交检验结果，不触发路由
    pub async fn submit_lab_results(
        &self,
        request_id: Uuid,
        results: Vec<LabResultDraft>,
    ) -> Result<Vec<LabResult>> {
        self.registry.submit_lab_results(request_id, results).await
    }

    /// 更新检验申请状态
    pub async fn update_lab_request_status(
        &self,
        request_id: Uuid,
        status: LabRequestStatus,
    ) -> Result<LabRequest> {
        self.registry.update_lab_request_status(request_id, status).await
    }

    /// 审核检验结果
    pub async fn verify_lab_result(&self, result_id: Uuid, verifier: Uuid) -> Result<LabResult> {
        self.registry.verify_lab_result(result_id, verifier).await
    }

    /// 开处方并转入药房排队
    pub async fn create_prescription(
        &self,
        draft: PrescriptionDraft,
        assignee: Option<Uuid>,
    ) -> Result<OrderPlacement<Prescription>> {
        let prescription = ClinicalOrderRegistry::build_prescription(draft)?;
        let ticket_request = self.route_single(&WorkflowEvent::PrescriptionCreated {
            prescription: prescription.clone(),
            assignee,
        })?;

        let prescription = self.registry.record_prescription(prescription).await;
        let ticket = self.store.enqueue(ticket_request).await?;

        Ok(OrderPlacement {
            order: prescription,
            ticket,
        })
    }

    /// 更新处方状态，不触发路由
    pub async fn update_prescription_status(
        &self,
        prescription_id: Uuid,
        status: PrescriptionStatus,
        actor: Uuid,
        pharmacy_notes: Option<String>,
    ) -> Result<Prescription> {
        self.registry
            .update_prescription_status(prescription_id, status, actor, pharmacy_notes)
            .await
    }

    /// 按排队号查找
    pub async fn find_ticket(&self, code: TicketCode) -> Result<Ticket> {
        self.store.find_by_code(code).await
    }

    /// 患者的全部排队号
    pub async fn tickets_for_patient(&self, patient_id: Uuid) -> Result<Vec<Ticket>> {
        self.store.tickets_for_patient(patient_id).await
    }

    /// 获取门诊概览
    pub async fn overview(&self) -> Result<ClinicOverview> {
        Ok(ClinicOverview {
            stations: self.store.station_summary().await?,
            pending_lab_requests: self.registry.pending_lab_requests().await.len(),
            pending_prescriptions: self.registry.pending_prescriptions().await.len(),
        })
    }

    /// 获取队列存储
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// 获取医嘱登记处
    pub fn registry(&self) -> &Arc<ClinicalOrderRegistry> {
        &self.registry
    }

    /// 获取路由器
    pub fn router(&self) -> &WorkflowRouter {
        &self.router
    }

    /// 按规则表为事件入队
    async fn dispatch(&self, event: WorkflowEvent) -> Result<Vec<Ticket>> {
        let mut tickets = Vec::new();
        for request in self.router.route(&event) {
            tickets.push(self.store.enqueue(request).await?);
        }
        Ok(tickets)
    }

    /// 医嘱事件必须恰好产生一个入队请求，在写入任何状态之前校验
    fn route_single(&self, event: &WorkflowEvent) -> Result<TicketRequest> {
        let mut requests = self.router.route(event);
        match requests.len() {
            1 => Ok(requests.remove(0)),
            n => Err(ClinicError::Internal(format!(
                "Order routing produced {} tickets, expected exactly one",
                n
            ))),
        }
    }
}

impl Default for ClinicWorkflow {
    fn default() -> Self {
        Self::new(StationAssignees::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{PriorityPolicy, RoutingRule, RoutingTrigger};
    use clinic_core::{LabTest, LabUrgency, Medication};
    use std::collections::HashSet;

    fn patient(name: &str) -> PatientRef {
        PatientRef::new(Uuid::new_v4(), name)
    }

    fn lab_draft(patient: PatientRef, urgency: LabUrgency) -> LabRequestDraft {
        LabRequestDraft {
            patient,
            physician_id: Uuid::new_v4(),
            tests: vec![LabTest::new("CBC", "Complete Blood Count")],
            urgency,
            clinical_info: None,
            diagnosis: None,
            notes: None,
        }
    }

    fn prescription_draft(patient: PatientRef) -> PrescriptionDraft {
        PrescriptionDraft {
            patient,
            physician_id: Uuid::new_v4(),
            medications: vec![Medication {
                name: "Paracetamol".to_string(),
                dosage: "500mg".to_string(),
                frequency: "every 6 hours".to_string(),
                duration: "3 days".to_string(),
                route: Some("oral".to_string()),
                quantity: 12,
                refills: 0,
                instructions: None,
                timing: None,
            }],
            diagnosis: None,
            allergies: vec![],
            notes: None,
        }
    }

    async fn count(workflow: &ClinicWorkflow, station: StationKind) -> usize {
        workflow.view_queue(station, None).await.unwrap().len()
    }

    #[tokio::test]
    async fn test_urgent_lab_request_creates_one_urgent_lab_ticket() {
        let workflow = ClinicWorkflow::default();
        let p = patient("John Smith");
        workflow.check_in(p.clone(), None, TicketPriority::Normal).await.unwrap();

        let placement = workflow
            .create_lab_request(lab_draft(p.clone(), LabUrgency::Urgent), None)
            .await
            .unwrap();

        assert_eq!(placement.ticket.station, StationKind::Lab);
        assert_eq!(placement.ticket.priority, TicketPriority::Urgent);
        assert_eq!(placement.ticket.patient, p);
        assert_eq!(count(&workflow, StationKind::Lab).await, 1);
        assert_eq!(count(&workflow, StationKind::Doctor).await, 1);
    }

    #[tokio::test]
    async fn test_completing_doctor_ticket_routes_to_cashier() {
        let workflow = ClinicWorkflow::default();
        let doctor = Uuid::new_v4();
        let p = patient("Emma Davis");
        let ticket = workflow.check_in(p.clone(), Some(doctor), TicketPriority::Urgent).await.unwrap();

        workflow.claim_ticket(ticket.id, doctor).await.unwrap();
        let update = workflow.complete_ticket(ticket.id, doctor).await.unwrap();

        assert_eq!(update.ticket.status, TicketStatus::Completed);
        assert_eq!(update.routed.len(), 1);
        assert_eq!(update.routed[0].station, StationKind::Cashier);
        assert_eq!(update.routed[0].priority, TicketPriority::Normal);
        assert_eq!(update.routed[0].code.to_string(), "D001");

        let all = workflow.tickets_for_patient(p.id).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(count(&workflow, StationKind::Lab).await, 0);
        assert_eq!(count(&workflow, StationKind::Pharmacy).await, 0);
    }

    #[tokio::test]
    async fn test_completion_at_other_stations_routes_nowhere() {
        let workflow = ClinicWorkflow::default();
        let tech = Uuid::new_v4();
        let placement = workflow
            .create_lab_request(lab_draft(patient("David Wilson"), LabUrgency::Routine), None)
            .await
            .unwrap();

        workflow.claim_ticket(placement.ticket.id, tech).await.unwrap();
        let update = workflow.complete_ticket(placement.ticket.id, tech).await.unwrap();

        assert!(update.routed.is_empty());
        assert_eq!(count(&workflow, StationKind::Cashier).await, 0);
    }

    #[tokio::test]
    async fn test_prescription_routes_normal_pharmacy_ticket() {
        let workflow = ClinicWorkflow::default();
        let urgent_first = workflow
            .create_lab_request(lab_draft(patient("Ann"), LabUrgency::Urgent), None)
            .await
            .unwrap();
        assert_eq!(urgent_first.ticket.priority, TicketPriority::Urgent);

        let placement = workflow
            .create_prescription(prescription_draft(patient("Ann")), None)
            .await
            .unwrap();

        assert_eq!(placement.ticket.station, StationKind::Pharmacy);
        assert_eq!(placement.ticket.priority, TicketPriority::Normal);
        assert_eq!(placement.ticket.code.to_string(), "C001");
        assert_eq!(count(&workflow, StationKind::Pharmacy).await, 1);
    }

    #[tokio::test]
    async fn test_empty_orders_create_no_tickets() {
        let workflow = ClinicWorkflow::default();
        let mut draft = lab_draft(patient("John"), LabUrgency::Urgent);
        draft.tests.clear();

        let result = workflow.create_lab_request(draft, None).await;
        assert!(matches!(result, Err(ClinicError::EmptyOrder(_))));

        let mut rx = prescription_draft(patient("John"));
        rx.medications.clear();
        let result = workflow.create_prescription(rx, None).await;
        assert!(matches!(result, Err(ClinicError::EmptyOrder(_))));

        assert_eq!(count(&workflow, StationKind::Lab).await, 0);
        assert_eq!(count(&workflow, StationKind::Pharmacy).await, 0);
    }

    #[tokio::test]
    async fn test_results_and_dispensing_do_not_route() {
        let workflow = ClinicWorkflow::default();
        let p = patient("John");
        let lab = workflow
            .create_lab_request(lab_draft(p.clone(), LabUrgency::Routine), None)
            .await
            .unwrap();
        let rx = workflow
            .create_prescription(prescription_draft(p.clone()), None)
            .await
            .unwrap();
        let before = workflow.tickets_for_patient(p.id).await.unwrap().len();

        workflow
            .submit_lab_results(
                lab.order.id,
                vec![LabResultDraft {
                    test_id: "CBC".to_string(),
                    value: "WBC 6.1".to_string(),
                    interpretation: None,
                    notes: None,
                    status: clinic_core::LabResultStatus::Completed,
                    performed_by: Uuid::new_v4(),
                }],
            )
            .await
            .unwrap();
        workflow
            .update_prescription_status(rx.order.id, PrescriptionStatus::Dispensed, Uuid::new_v4(), None)
            .await
            .unwrap();

        assert_eq!(workflow.tickets_for_patient(p.id).await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_cancel_and_reclaim() {
        let workflow = ClinicWorkflow::default();
        let operator = Uuid::new_v4();
        let ticket = workflow.check_in(patient("John"), None, TicketPriority::Normal).await.unwrap();

        workflow.cancel_ticket(ticket.id, operator).await.unwrap();
        let result = workflow.claim_ticket(ticket.id, operator).await;
        assert!(matches!(result, Err(ClinicError::InvalidTransition { .. })));

        // 已取消的诊室号不会路由到收费处
        assert_eq!(count(&workflow, StationKind::Cashier).await, 0);
    }

    #[tokio::test]
    async fn test_call_next_follows_queue_order() {
        let workflow = ClinicWorkflow::default();
        let operator = Uuid::new_v4();
        let normal = workflow.check_in(patient("John"), None, TicketPriority::Normal).await.unwrap();
        let urgent = workflow.check_in(patient("Emma"), None, TicketPriority::Urgent).await.unwrap();

        let first = workflow.call_next(StationKind::Doctor, None, operator).await.unwrap().unwrap();
        assert_eq!(first.id, urgent.id);
        assert_eq!(first.handled_by, Some(operator));

        let second = workflow.call_next(StationKind::Doctor, None, operator).await.unwrap().unwrap();
        assert_eq!(second.id, normal.id);

        assert!(workflow.call_next(StationKind::Doctor, None, operator).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_ticket_and_overview() {
        let workflow = ClinicWorkflow::default();
        let p = patient("John");
        workflow.check_in(p.clone(), None, TicketPriority::Normal).await.unwrap();
        workflow
            .create_lab_request(lab_draft(p.clone(), LabUrgency::Routine), None)
            .await
            .unwrap();

        let found = workflow.find_ticket("B001".parse().unwrap()).await.unwrap();
        assert_eq!(found.patient.id, p.id);

        let overview = workflow.overview().await.unwrap();
        assert_eq!(overview.pending_lab_requests, 1);
        assert_eq!(overview.pending_prescriptions, 0);
        let waiting: usize = overview.stations.iter().map(|s| s.waiting).sum();
        assert_eq!(waiting, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_operators_race_for_one_ticket() {
        let workflow = Arc::new(ClinicWorkflow::default());
        let ticket = workflow.check_in(patient("John"), None, TicketPriority::Normal).await.unwrap();
        let ticket_id = ticket.id;

        let a = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.claim_ticket(ticket_id, Uuid::new_v4()).await })
        };
        let b = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.claim_ticket(ticket_id, Uuid::new_v4()).await })
        };

        let outcomes = vec![a.await.unwrap(), b.await.unwrap()];
        let won = outcomes.iter().filter(|r| r.is_ok()).count();
        let lost = outcomes
            .iter()
            .filter(|r| matches!(r, Err(ClinicError::AlreadyClaimed(_))))
            .count();
        assert_eq!((won, lost), (1, 1));

        let stored = workflow.store().get(ticket_id).await.unwrap();
        assert_eq!(stored.status, TicketStatus::InProgress);
        let claims = stored
            .history
            .iter()
            .filter(|c| c.status == TicketStatus::InProgress)
            .count();
        assert_eq!(claims, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_call_next_never_double_serves() {
        let workflow = Arc::new(ClinicWorkflow::default());
        for i in 0..10 {
            workflow
                .check_in(patient(&format!("Patient {}", i)), None, TicketPriority::Normal)
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let workflow = workflow.clone();
            handles.push(tokio::spawn(async move {
                let operator = Uuid::new_v4();
                let mut served = Vec::new();
                while let Some(ticket) = workflow.call_next(StationKind::Doctor, None, operator).await.unwrap() {
                    served.push(ticket.id);
                }
                served
            }));
        }

        let mut served = HashSet::new();
        for handle in handles {
            for ticket_id in handle.await.unwrap() {
                assert!(served.insert(ticket_id), "ticket {} served twice", ticket_id);
            }
        }
        assert_eq!(served.len(), 10);
    }

    #[tokio::test]
    async fn test_late_claim_after_completion_reports_claimed() {
        let workflow = ClinicWorkflow::default();
        let ticket = workflow.check_in(patient("John"), None, TicketPriority::Normal).await.unwrap();
        let first = Uuid::new_v4();

        workflow.claim_ticket(ticket.id, first).await.unwrap();
        workflow.complete_ticket(ticket.id, first).await.unwrap();

        let late = workflow.claim_ticket(ticket.id, Uuid::new_v4()).await;
        assert!(matches!(late, Err(ClinicError::AlreadyClaimed(id)) if id == ticket.id));

        let stored = workflow.store().get(ticket.id).await.unwrap();
        assert_eq!(stored.status, TicketStatus::Completed);
        assert_eq!(stored.handled_by, Some(first));
    }

    #[tokio::test]
    async fn test_unroutable_order_leaves_no_state() {
        let workflow = ClinicWorkflow::with_components(
            Arc::new(MemoryQueueStore::default()),
            Arc::new(ClinicalOrderRegistry::new()),
            WorkflowRouter::with_rules(vec![], StationAssignees::default()),
        );
        let p = patient("Emma");

        let result = workflow.create_lab_request(lab_draft(p.clone(), LabUrgency::Urgent), None).await;
        assert!(matches!(result, Err(ClinicError::Internal(_))));
        let result = workflow.create_prescription(prescription_draft(p.clone()), None).await;
        assert!(matches!(result, Err(ClinicError::Internal(_))));

        assert!(workflow.registry().pending_lab_requests().await.is_empty());
        assert!(workflow.registry().pending_prescriptions().await.is_empty());
        assert!(workflow.tickets_for_patient(p.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_order_routed_twice_is_rejected_whole() {
        let mut rules = WorkflowRouter::care_pathway();
        rules.push(RoutingRule {
            name: "pharmacy-referral-copy".to_string(),
            trigger: RoutingTrigger::PrescriptionCreated,
            target: StationKind::Pharmacy,
            priority: PriorityPolicy::Fixed(TicketPriority::Normal),
        });
        let workflow = ClinicWorkflow::with_components(
            Arc::new(MemoryQueueStore::default()),
            Arc::new(ClinicalOrderRegistry::new()),
            WorkflowRouter::with_rules(rules, StationAssignees::default()),
        );
        let p = patient("John");

        let result = workflow.create_prescription(prescription_draft(p.clone()), None).await;
        assert!(matches!(result, Err(ClinicError::Internal(_))));
        assert_eq!(count(&workflow, StationKind::Pharmacy).await, 0);
        assert!(workflow.registry().pending_prescriptions().await.is_empty());

        // 检验申请仍按单条规则正常路由
        let placed = workflow.create_lab_request(lab_draft(p, LabUrgency::Routine), None).await.unwrap();
        assert_eq!(placed.ticket.station, StationKind::Lab);
    }
}
