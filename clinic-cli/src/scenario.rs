//! 场景回放
//!
//! 场景文件是一组按顺序执行的步骤。患者和工作人员用姓名引用，
//! 同一姓名在整个场景内对应同一个 ID；排队号用号码引用，如 `A001`。

use anyhow::Context;
use clinic_core::{
    ClinicError, LabRequestDraft, LabRequestStatus, LabResultDraft, LabResultStatus, LabTest,
    LabUrgency, Medication, PatientRef, PrescriptionDraft, PrescriptionStatus, Result, StationKind,
    TicketCode, TicketPriority,
};
use clinic_workflow::ClinicWorkflow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

/// 场景
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub steps: Vec<Step>,
}

/// 场景步骤
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// 患者到诊
    CheckIn {
        patient: String,
        #[serde(default)]
        doctor: Option<String>,
        #[serde(default)]
        priority: TicketPriority,
    },
    /// 领取指定排队号
    Claim { ticket: TicketCode, staff: String },
    /// 叫下一位
    CallNext {
        station: StationKind,
        staff: String,
        /// 只看分配给此人的队列
        #[serde(default)]
        assignee: Option<String>,
    },
    Complete { ticket: TicketCode, staff: String },
    Cancel { ticket: TicketCode, staff: String },
    /// 开检验申请
    OrderLabs {
        patient: String,
        physician: String,
        tests: Vec<LabTest>,
        #[serde(default = "routine")]
        urgency: LabUrgency,
        #[serde(default)]
        assignee: Option<String>,
        #[serde(default)]
        notes: Option<String>,
    },
    /// 开处方
    Prescribe {
        patient: String,
        physician: String,
        medications: Vec<Medication>,
        #[serde(default)]
        diagnosis: Option<String>,
        #[serde(default)]
        allergies: Vec<String>,
        #[serde(default)]
        assignee: Option<String>,
    },
    /// 为患者最近一次未取消的检验申请提交结果
    SubmitResults {
        patient: String,
        technician: String,
        results: Vec<ResultEntry>,
    },
    /// 为患者最早一张待发药处方发药
    Dispense {
        patient: String,
        pharmacist: String,
        #[serde(default)]
        notes: Option<String>,
    },
}

fn routine() -> LabUrgency {
    LabUrgency::Routine
}

/// 单项检验结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEntry {
    pub test_id: String,
    pub value: String,
    #[serde(default)]
    pub interpretation: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Step {
    pub fn action(&self) -> &'static str {
        match self {
            Step::CheckIn { .. } => "check_in",
            Step::Claim { .. } => "claim",
            Step::CallNext { .. } => "call_next",
            Step::Complete { .. } => "complete",
            Step::Cancel { .. } => "cancel",
            Step::OrderLabs { .. } => "order_labs",
            Step::Prescribe { .. } => "prescribe",
            Step::SubmitResults { .. } => "submit_results",
            Step::Dispense { .. } => "dispense",
        }
    }
}

/// 失败的步骤
#[derive(Debug)]
pub struct StepFailure {
    pub index: usize,
    pub action: &'static str,
    pub error: ClinicError,
}

/// 回放结果
#[derive(Debug, Default)]
pub struct ScenarioReport {
    pub applied: usize,
    pub failures: Vec<StepFailure>,
}

impl Scenario {
    /// 从 JSON 文件加载场景
    pub async fn load(path: &str) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read scenario file {}", path))?;
        let scenario: Scenario = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse scenario file {}", path))?;

        info!("Loaded scenario with {} steps from {}", scenario.steps.len(), path);
        Ok(scenario)
    }

    /// 内置演示：两位患者走完诊室、检验、药房、收费的流程
    pub fn walkthrough() -> Self {
        let doctor = "Dr. Wilson";
        let lab_tech = "Sarah Johnson";
        let pharmacist = "Mike Chen";
        let cashier = "Lisa Park";

        let mut cbc = LabTest::new("CBC", "Complete Blood Count");
        cbc.normal_range = Some("4.5-11.0 x10^9/L".to_string());
        cbc.category = Some("Hematology".to_string());

        let steps = vec![
            Step::CheckIn {
                patient: "John Smith".to_string(),
                doctor: Some(doctor.to_string()),
                priority: TicketPriority::Normal,
            },
            Step::CheckIn {
                patient: "Emma Davis".to_string(),
                doctor: Some(doctor.to_string()),
                priority: TicketPriority::Urgent,
            },
            Step::CallNext {
                station: StationKind::Doctor,
                staff: doctor.to_string(),
                assignee: Some(doctor.to_string()),
            },
            Step::OrderLabs {
                patient: "Emma Davis".to_string(),
                physician: doctor.to_string(),
                tests: vec![cbc],
                urgency: LabUrgency::Urgent,
                assignee: Some(lab_tech.to_string()),
                notes: Some("Fever for three days".to_string()),
            },
            Step::Complete {
                ticket: TicketCode::new(StationKind::Doctor, 2),
                staff: doctor.to_string(),
            },
            Step::CallNext {
                station: StationKind::Doctor,
                staff: doctor.to_string(),
                assignee: Some(doctor.to_string()),
            },
            Step::Prescribe {
                patient: "John Smith".to_string(),
                physician: doctor.to_string(),
                medications: vec![Medication {
                    name: "Amoxicillin".to_string(),
                    dosage: "500mg".to_string(),
                    frequency: "three times daily".to_string(),
                    duration: "7 days".to_string(),
                    route: Some("oral".to_string()),
                    quantity: 21,
                    refills: 0,
                    instructions: Some("Take with food".to_string()),
                    timing: None,
                }],
                diagnosis: Some("Acute sinusitis".to_string()),
                allergies: vec![],
                assignee: Some(pharmacist.to_string()),
            },
            Step::Complete {
                ticket: TicketCode::new(StationKind::Doctor, 1),
                staff: doctor.to_string(),
            },
            Step::CallNext {
                station: StationKind::Lab,
                staff: lab_tech.to_string(),
                assignee: None,
            },
            Step::SubmitResults {
                patient: "Emma Davis".to_string(),
                technician: lab_tech.to_string(),
                results: vec![ResultEntry {
                    test_id: "CBC".to_string(),
                    value: "13.2 x10^9/L".to_string(),
                    interpretation: Some("Elevated white cell count".to_string()),
                    notes: None,
                }],
            },
            Step::Complete {
                ticket: TicketCode::new(StationKind::Lab, 1),
                staff: lab_tech.to_string(),
            },
            Step::CallNext {
                station: StationKind::Pharmacy,
                staff: pharmacist.to_string(),
                assignee: None,
            },
            Step::Dispense {
                patient: "John Smith".to_string(),
                pharmacist: pharmacist.to_string(),
                notes: Some("Counselled on dosage".to_string()),
            },
            Step::Complete {
                ticket: TicketCode::new(StationKind::Pharmacy, 1),
                staff: pharmacist.to_string(),
            },
            Step::CallNext {
                station: StationKind::Cashier,
                staff: cashier.to_string(),
                assignee: None,
            },
            Step::Complete {
                ticket: TicketCode::new(StationKind::Cashier, 1),
                staff: cashier.to_string(),
            },
        ];

        Self { steps }
    }
}

/// 场景执行器
pub struct ScenarioRunner<'a> {
    workflow: &'a ClinicWorkflow,
    people: HashMap<String, Uuid>,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(workflow: &'a ClinicWorkflow) -> Self {
        Self {
            workflow,
            people: HashMap::new(),
        }
    }

    /// 依次执行全部步骤，失败的步骤记录后继续
    pub async fn run(&mut self, scenario: &Scenario) -> ScenarioReport {
        let mut report = ScenarioReport::default();

        for (index, step) in scenario.steps.iter().enumerate() {
            match self.apply(step).await {
                Ok(outcome) => {
                    info!("Step {} ({}): {}", index + 1, step.action(), outcome);
                    report.applied += 1;
                }
                Err(error) => {
                    warn!("Step {} ({}) rejected: {}", index + 1, step.action(), error);
                    report.failures.push(StepFailure {
                        index,
                        action: step.action(),
                        error,
                    });
                }
            }
        }

        report
    }

    /// 姓名对应的 ID，首次出现时分配
    pub fn person(&mut self, name: &str) -> Uuid {
        *self
            .people
            .entry(name.to_string())
            .or_insert_with(Uuid::new_v4)
    }

    fn patient(&mut self, name: &str) -> PatientRef {
        PatientRef::new(self.person(name), name)
    }

    fn optional_person(&mut self, name: &Option<String>) -> Option<Uuid> {
        name.as_deref().map(|name| self.person(name))
    }

    async fn apply(&mut self, step: &Step) -> Result<String> {
        match step {
            Step::CheckIn {
                patient,
                doctor,
                priority,
            } => {
                let patient = self.patient(patient);
                let doctor = self.optional_person(doctor);
                let ticket = self.workflow.check_in(patient, doctor, *priority).await?;
                Ok(format!("{} issued to {}", ticket.code, ticket.patient.name))
            }
            Step::Claim { ticket, staff } => {
                let operator = self.person(staff);
                let current = self.workflow.find_ticket(*ticket).await?;
                let claimed = self.workflow.claim_ticket(current.id, operator).await?;
                Ok(format!("{} claimed by {}", claimed.code, staff))
            }
            Step::CallNext {
                station,
                staff,
                assignee,
            } => {
                let operator = self.person(staff);
                let assignee = self.optional_person(assignee);
                match self.workflow.call_next(*station, assignee, operator).await? {
                    Some(ticket) => Ok(format!("{} called {}", staff, ticket.code)),
                    None => Ok(format!("no one waiting at {}", station)),
                }
            }
            Step::Complete { ticket, staff } => {
                let operator = self.person(staff);
                let current = self.workflow.find_ticket(*ticket).await?;
                let update = self.workflow.complete_ticket(current.id, operator).await?;
                let routed: Vec<String> = update.routed.iter().map(|t| t.code.to_string()).collect();
                if routed.is_empty() {
                    Ok(format!("{} completed", update.ticket.code))
                } else {
                    Ok(format!("{} completed, routed to {}", update.ticket.code, routed.join(", ")))
                }
            }
            Step::Cancel { ticket, staff } => {
                let operator = self.person(staff);
                let current = self.workflow.find_ticket(*ticket).await?;
                let cancelled = self.workflow.cancel_ticket(current.id, operator).await?;
                Ok(format!("{} cancelled", cancelled.code))
            }
            Step::OrderLabs {
                patient,
                physician,
                tests,
                urgency,
                assignee,
                notes,
            } => {
                let draft = LabRequestDraft {
                    patient: self.patient(patient),
                    physician_id: self.person(physician),
                    tests: tests.clone(),
                    urgency: *urgency,
                    clinical_info: None,
                    diagnosis: None,
                    notes: notes.clone(),
                };
                let assignee = self.optional_person(assignee);
                let placement = self.workflow.create_lab_request(draft, assignee).await?;
                Ok(format!(
                    "lab request {} queued as {}",
                    placement.order.id, placement.ticket.code
                ))
            }
            Step::Prescribe {
                patient,
                physician,
                medications,
                diagnosis,
                allergies,
                assignee,
            } => {
                let draft = PrescriptionDraft {
                    patient: self.patient(patient),
                    physician_id: self.person(physician),
                    medications: medications.clone(),
                    diagnosis: diagnosis.clone(),
                    allergies: allergies.clone(),
                    notes: None,
                };
                let assignee = self.optional_person(assignee);
                let placement = self.workflow.create_prescription(draft, assignee).await?;
                Ok(format!(
                    "prescription {} queued as {}",
                    placement.order.id, placement.ticket.code
                ))
            }
            Step::SubmitResults {
                patient,
                technician,
                results,
            } => {
                let patient_id = self.person(patient);
                let performed_by = self.person(technician);
                let request = self
                    .workflow
                    .registry()
                    .lab_requests_for_patient(patient_id)
                    .await
                    .into_iter()
                    .rev()
                    .find(|r| r.status != LabRequestStatus::Cancelled)
                    .ok_or_else(|| {
                        ClinicError::NotFound(format!("No open lab request for {}", patient))
                    })?;

                let drafts = results
                    .iter()
                    .map(|entry| LabResultDraft {
                        test_id: entry.test_id.clone(),
                        value: entry.value.clone(),
                        interpretation: entry.interpretation.clone(),
                        notes: entry.notes.clone(),
                        status: LabResultStatus::Completed,
                        performed_by,
                    })
                    .collect();

                let recorded = self.workflow.submit_lab_results(request.id, drafts).await?;
                Ok(format!("{} results recorded for {}", recorded.len(), patient))
            }
            Step::Dispense {
                patient,
                pharmacist,
                notes,
            } => {
                let patient_id = self.person(patient);
                let actor = self.person(pharmacist);
                let prescription = self
                    .workflow
                    .registry()
                    .pending_prescriptions()
                    .await
                    .into_iter()
                    .find(|p| p.patient.id == patient_id)
                    .ok_or_else(|| {
                        ClinicError::NotFound(format!("No pending prescription for {}", patient))
                    })?;

                let dispensed = self
                    .workflow
                    .update_prescription_status(
                        prescription.id,
                        PrescriptionStatus::Dispensed,
                        actor,
                        notes.clone(),
                    )
                    .await?;
                Ok(format!("prescription {} dispensed", dispensed.id))
            }
        }
    }
}
