//! 医嘱登记
//!
//! 管理检验申请、检验结果和处方，各自维护独立于排队号的生命周期

use chrono::Utc;
use clinic_core::{
    ClinicError, LabRequest, LabRequestDraft, LabRequestStatus, LabResult, LabResultDraft,
    LabResultStatus, LabUrgency, Prescription, PrescriptionDraft, PrescriptionStatus, Result,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct OrderBook {
    lab_requests: HashMap<Uuid, LabRequest>,
    lab_results: HashMap<Uuid, LabResult>,
    prescriptions: HashMap<Uuid, Prescription>,
    request_results: HashMap<Uuid, Vec<Uuid>>, // request_id -> result_ids
    patient_requests: HashMap<Uuid, Vec<Uuid>>, // patient_id -> request_ids
    patient_results: HashMap<Uuid, Vec<Uuid>>, // patient_id -> result_ids
}

/// 医嘱登记处
#[derive(Debug, Default)]
pub struct ClinicalOrderRegistry {
    book: RwLock<OrderBook>,
}

fn lab_request_transition_allowed(from: LabRequestStatus, to: LabRequestStatus) -> bool {
    use LabRequestStatus::*;
    matches!(
        (from, to),
        (Pending, InProgress) | (Pending, Cancelled) | (InProgress, Completed) | (InProgress, Cancelled)
    )
}

fn prescription_transition_allowed(from: PrescriptionStatus, to: PrescriptionStatus) -> bool {
    use PrescriptionStatus::*;
    matches!((from, to), (Pending, Dispensed) | (Pending, Cancelled))
}

impl ClinicalOrderRegistry {
    /// 创建新的医嘱登记处
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建检验申请
    pub async fn create_lab_request(&self, draft: LabRequestDraft) -> Result<LabRequest> {
        let request = Self::build_lab_request(draft)?;
        Ok(self.record_lab_request(request).await)
    }

    /// 校验草稿并生成检验申请，不写入登记处
    pub fn build_lab_request(draft: LabRequestDraft) -> Result<LabRequest> {
        if draft.tests.is_empty() {
            return Err(ClinicError::EmptyOrder("lab request tests".to_string()));
        }

        let mut seen = HashSet::new();
        for test in &draft.tests {
            if !seen.insert(test.id.as_str()) {
                return Err(ClinicError::Validation(format!(
                    "Lab test {} requested twice",
                    test.id
                )));
            }
        }

        let now = Utc::now();
        let request = LabRequest {
            id: Uuid::new_v4(),
            patient: draft.patient,
            physician_id: draft.physician_id,
            tests: draft.tests,
            urgency: draft.urgency,
            status: LabRequestStatus::Pending,
            clinical_info: draft.clinical_info,
            diagnosis: draft.diagnosis,
            notes: draft.notes,
            created_at: now,
            updated_at: now,
        };
        Ok(request)
    }

    /// 写入已校验的检验申请
    pub async fn record_lab_request(&self, request: LabRequest) -> LabRequest {
        let mut book = self.book.write().await;
        book.patient_requests
            .entry(request.patient.id)
            .or_insert_with(Vec::new)
            .push(request.id);
        book.lab_requests.insert(request.id, request.clone());

        tracing::info!(
            "Created lab request {} for patient {} with {} tests ({:?})",
            request.id,
            request.patient.id,
            request.tests.len(),
            request.urgency
        );
        request
    }

    /// 提交检验结果
    ///
    /// 全部校验通过后才写入；不会改变所属申请的状态。
    pub async fn submit_lab_results(
        &self,
        request_id: Uuid,
        drafts: Vec<LabResultDraft>,
    ) -> Result<Vec<LabResult>> {
        if drafts.is_empty() {
            return Err(ClinicError::Validation(format!(
                "No results submitted for lab request {}",
                request_id
            )));
        }

        let mut book = self.book.write().await;
        let request = book
            .lab_requests
            .get(&request_id)
            .ok_or_else(|| ClinicError::NotFound(format!("Lab request {} not found", request_id)))?;

        if request.status == LabRequestStatus::Cancelled {
            return Err(ClinicError::invalid_transition(request.status, LabRequestStatus::Completed));
        }

        let already_reported: HashSet<&str> = book
            .request_results
            .get(&request_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| book.lab_results.get(id))
                    .map(|r| r.test_id.as_str())
                    .collect()
            })
            .unwrap_or_default();

        let now = Utc::now();
        let mut submitted: HashSet<&str> = HashSet::new();
        let mut results = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            let test = request.test(&draft.test_id).ok_or_else(|| {
                ClinicError::NotFound(format!(
                    "Test {} is not part of lab request {}",
                    draft.test_id, request_id
                ))
            })?;
            if already_reported.contains(draft.test_id.as_str()) || !submitted.insert(draft.test_id.as_str()) {
                return Err(ClinicError::Validation(format!(
                    "Result for test {} already recorded",
                    draft.test_id
                )));
            }
            if draft.status == LabResultStatus::Verified {
                return Err(ClinicError::Validation(
                    "Results are verified separately after submission".to_string(),
                ));
            }

            results.push(LabResult {
                id: Uuid::new_v4(),
                request_id,
                patient_id: request.patient.id,
                test_id: test.id.clone(),
                test_name: test.name.clone(),
                value: draft.value.clone(),
                normal_range: test.normal_range.clone(),
                interpretation: draft.interpretation.clone(),
                status: draft.status,
                performed_by: draft.performed_by,
                verified_by: None,
                notes: draft.notes.clone(),
                recorded_at: now,
            });
        }

        let patient_id = request.patient.id;
        for result in &results {
            book.request_results
                .entry(request_id)
                .or_insert_with(Vec::new)
                .push(result.id);
            book.patient_results
                .entry(patient_id)
                .or_insert_with(Vec::new)
                .push(result.id);
            book.lab_results.insert(result.id, result.clone());
        }

        tracing::info!(
            "Recorded {} lab results for request {}",
            results.len(),
            request_id
        );
        Ok(results)
    }

    /// 更新检验申请状态
    pub async fn update_lab_request_status(
        &self,
        request_id: Uuid,
        status: LabRequestStatus,
    ) -> Result<LabRequest> {
        let mut book = self.book.write().await;
        let request = book
            .lab_requests
            .get_mut(&request_id)
            .ok_or_else(|| ClinicError::NotFound(format!("Lab request {} not found", request_id)))?;

        if !lab_request_transition_allowed(request.status, status) {
            tracing::warn!(
                "Rejected lab request {} status change {:?} -> {:?}",
                request_id,
                request.status,
                status
            );
            return Err(ClinicError::invalid_transition(request.status, status));
        }

        let old_status = request.status;
        request.status = status;
        request.updated_at = Utc::now();

        tracing::info!(
            "Updated lab request {} status from {:?} to {:?}",
            request_id,
            old_status,
            status
        );
        Ok(request.clone())
    }

    /// 审核检验结果
    pub async fn verify_lab_result(&self, result_id: Uuid, verifier: Uuid) -> Result<LabResult> {
        let mut book = self.book.write().await;
        let result = book
            .lab_results
            .get_mut(&result_id)
            .ok_or_else(|| ClinicError::NotFound(format!("Lab result {} not found", result_id)))?;

        if result.status != LabResultStatus::Completed {
            return Err(ClinicError::invalid_transition(result.status, LabResultStatus::Verified));
        }

        result.status = LabResultStatus::Verified;
        result.verified_by = Some(verifier);

        tracing::info!("Lab result {} verified by {}", result_id, verifier);
        Ok(result.clone())
    }

    /// 创建处方
    pub async fn create_prescription(&self, draft: PrescriptionDraft) -> Result<Prescription> {
        let prescription = Self::build_prescription(draft)?;
        Ok(self.record_prescription(prescription).await)
    }

    /// 校验草稿并生成处方，不写入登记处
    pub fn build_prescription(draft: PrescriptionDraft) -> Result<Prescription> {
        if draft.medications.is_empty() {
            return Err(ClinicError::EmptyOrder("prescription medications".to_string()));
        }

        let now = Utc::now();
        let prescription = Prescription {
            id: Uuid::new_v4(),
            patient: draft.patient,
            physician_id: draft.physician_id,
            medications: draft.medications,
            diagnosis: draft.diagnosis,
            allergies: draft.allergies,
            notes: draft.notes,
            status: PrescriptionStatus::Pending,
            dispensed_by: None,
            dispensed_at: None,
            pharmacy_notes: None,
            created_at: now,
            updated_at: now,
        };
        Ok(prescription)
    }

    /// 写入已校验的处方
    pub async fn record_prescription(&self, prescription: Prescription) -> Prescription {
        let mut book = self.book.write().await;
        book.prescriptions.insert(prescription.id, prescription.clone());

        tracing::info!(
            "Created prescription {} for patient {} with {} medications",
            prescription.id,
            prescription.patient.id,
            prescription.medications.len()
        );
        prescription
    }

    /// 更新处方状态：待发药 -> 已发药 / 已取消
    pub async fn update_prescription_status(
        &self,
        prescription_id: Uuid,
        status: PrescriptionStatus,
        actor: Uuid,
        pharmacy_notes: Option<String>,
    ) -> Result<Prescription> {
        let mut book = self.book.write().await;
        let prescription = book.prescriptions.get_mut(&prescription_id).ok_or_else(|| {
            ClinicError::NotFound(format!("Prescription {} not found", prescription_id))
        })?;

        if !prescription_transition_allowed(prescription.status, status) {
            tracing::warn!(
                "Rejected prescription {} status change {:?} -> {:?}",
                prescription_id,
                prescription.status,
                status
            );
            return Err(ClinicError::invalid_transition(prescription.status, status));
        }

        let now = Utc::now();
        prescription.status = status;
        prescription.updated_at = now;
        if status == PrescriptionStatus::Dispensed {
            prescription.dispensed_by = Some(actor);
            prescription.dispensed_at = Some(now);
        }
        if pharmacy_notes.is_some() {
            prescription.pharmacy_notes = pharmacy_notes;
        }

        tracing::info!(
            "Prescription {} marked {:?} by {}",
            prescription_id,
            status,
            actor
        );
        Ok(prescription.clone())
    }

    /// 获取检验申请
    pub async fn get_lab_request(&self, request_id: Uuid) -> Result<LabRequest> {
        let book = self.book.read().await;
        book.lab_requests
            .get(&request_id)
            .cloned()
            .ok_or_else(|| ClinicError::NotFound(format!("Lab request {} not found", request_id)))
    }

    /// 获取处方
    pub async fn get_prescription(&self, prescription_id: Uuid) -> Result<Prescription> {
        let book = self.book.read().await;
        book.prescriptions.get(&prescription_id).cloned().ok_or_else(|| {
            ClinicError::NotFound(format!("Prescription {} not found", prescription_id))
        })
    }

    /// 患者的全部检验申请
    pub async fn lab_requests_for_patient(&self, patient_id: Uuid) -> Vec<LabRequest> {
        let book = self.book.read().await;
        book.patient_requests
            .get(&patient_id)
            .map(|ids| ids.iter().filter_map(|id| book.lab_requests.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    /// 患者的全部检验结果
    pub async fn lab_results_for_patient(&self, patient_id: Uuid) -> Vec<LabResult> {
        let book = self.book.read().await;
        book.patient_results
            .get(&patient_id)
            .map(|ids| ids.iter().filter_map(|id| book.lab_results.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    /// 某检验申请的结果
    pub async fn lab_results_for_request(&self, request_id: Uuid) -> Result<Vec<LabResult>> {
        let book = self.book.read().await;
        if !book.lab_requests.contains_key(&request_id) {
            return Err(ClinicError::NotFound(format!("Lab request {} not found", request_id)));
        }
        Ok(book
            .request_results
            .get(&request_id)
            .map(|ids| ids.iter().filter_map(|id| book.lab_results.get(id)).cloned().collect())
            .unwrap_or_default())
    }

    /// 待处理的检验申请，急查在前，同级按开单时间
    pub async fn pending_lab_requests(&self) -> Vec<LabRequest> {
        let book = self.book.read().await;
        let mut requests: Vec<LabRequest> = book
            .lab_requests
            .values()
            .filter(|r| r.status == LabRequestStatus::Pending)
            .cloned()
            .collect();

        requests.sort_by_key(|r| (r.urgency != LabUrgency::Urgent, r.created_at));
        requests
    }

    /// 待发药的处方，按开方时间
    pub async fn pending_prescriptions(&self) -> Vec<Prescription> {
        let book = self.book.read().await;
        let mut prescriptions: Vec<Prescription> = book
            .prescriptions
            .values()
            .filter(|p| p.status == PrescriptionStatus::Pending)
            .cloned()
            .collect();

        prescriptions.sort_by_key(|p| p.created_at);
        prescriptions
    }
}
