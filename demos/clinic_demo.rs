//! 门诊工作流演示程序
//!
//! 展示排队号发放、抢号、医嘱路由和检验结果录入

use clinic_admin::{init_logging, LoggingConfig};
use clinic_core::{
    LabRequestDraft, LabResultDraft, LabResultStatus, LabTest, LabUrgency, Medication, PatientRef,
    PrescriptionDraft, PrescriptionStatus, StationAssignees, StationKind, TicketPriority,
};
use clinic_workflow::ClinicWorkflow;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    init_logging(&LoggingConfig::default())?;

    let doctor = Uuid::new_v4();
    let lab_tech = Uuid::new_v4();
    let pharmacist = Uuid::new_v4();
    let cashier = Uuid::new_v4();

    // 创建工作流，各服务站设置默认负责人
    let workflow = ClinicWorkflow::new(StationAssignees {
        doctor: Some(doctor),
        lab: Some(lab_tech),
        pharmacy: Some(pharmacist),
        cashier: Some(cashier),
    });

    info!("Demo workflow created with default assignees for every station");
    println!("🏥 门诊排队工作流演示\n");

    // 1. 患者到诊
    let john = PatientRef::new(Uuid::new_v4(), "John Smith");
    let emma = PatientRef::new(Uuid::new_v4(), "Emma Davis");
    let first = workflow.check_in(john.clone(), None, TicketPriority::Normal).await?;
    let second = workflow.check_in(emma.clone(), None, TicketPriority::Urgent).await?;
    println!("✅ {} 取号 {}", john.name, first.code);
    println!("✅ {} 取号 {} (加急)", emma.name, second.code);

    // 2. 两位医生同时叫号，加急患者优先
    let other_doctor = Uuid::new_v4();
    let (a, b) = tokio::join!(
        workflow.call_next(StationKind::Doctor, None, doctor),
        workflow.call_next(StationKind::Doctor, None, other_doctor),
    );
    for called in [a?, b?].into_iter().flatten() {
        println!("📣 叫号 {} -> {}", called.code, called.patient.name);
    }

    // 3. 开检验申请和处方
    let mut cbc = LabTest::new("CBC", "Complete Blood Count");
    cbc.normal_range = Some("4.5-11.0 x10^9/L".to_string());

    let lab = workflow
        .create_lab_request(
            LabRequestDraft {
                patient: emma.clone(),
                physician_id: doctor,
                tests: vec![cbc],
                urgency: LabUrgency::Urgent,
                clinical_info: Some("Fever for three days".to_string()),
                diagnosis: None,
                notes: None,
            },
            None,
        )
        .await?;
    println!("🧪 检验申请已转入检验科: {} ({:?})", lab.ticket.code, lab.ticket.priority);

    let rx = workflow
        .create_prescription(
            PrescriptionDraft {
                patient: john.clone(),
                physician_id: doctor,
                medications: vec![Medication {
                    name: "Amoxicillin".to_string(),
                    dosage: "500mg".to_string(),
                    frequency: "three times daily".to_string(),
                    duration: "7 days".to_string(),
                    route: Some("oral".to_string()),
                    quantity: 21,
                    refills: 0,
                    instructions: None,
                    timing: None,
                }],
                diagnosis: Some("Acute sinusitis".to_string()),
                allergies: vec!["Penicillin (mild rash)".to_string()],
                notes: None,
            },
            None,
        )
        .await?;
    println!("💊 处方已转入药房: {}", rx.ticket.code);

    // 4. 诊室完成，自动转收费处
    for ticket in [&first, &second] {
        let current = workflow.find_ticket(ticket.code).await?;
        let operator = current.handled_by.unwrap_or(doctor);
        let update = workflow.complete_ticket(current.id, operator).await?;
        for routed in &update.routed {
            println!("💳 {} 完成，转入收费处 {}", update.ticket.code, routed.code);
        }
    }

    // 5. 检验科录入结果
    workflow.claim_ticket(lab.ticket.id, lab_tech).await?;
    let results = workflow
        .submit_lab_results(
            lab.order.id,
            vec![LabResultDraft {
                test_id: "CBC".to_string(),
                value: "13.2 x10^9/L".to_string(),
                interpretation: Some("Elevated".to_string()),
                notes: None,
                status: LabResultStatus::Completed,
                performed_by: lab_tech,
            }],
        )
        .await?;
    workflow.complete_ticket(lab.ticket.id, lab_tech).await?;
    println!("📝 录入 {} 项检验结果", results.len());

    // 6. 药房发药
    workflow.claim_ticket(rx.ticket.id, pharmacist).await?;
    workflow
        .update_prescription_status(rx.order.id, PrescriptionStatus::Dispensed, pharmacist, None)
        .await?;
    workflow.complete_ticket(rx.ticket.id, pharmacist).await?;
    println!("✅ 处方已发药");

    // 7. 显示各服务站队列
    let overview = workflow.overview().await?;
    println!("\n📊 门诊概览:");
    for summary in &overview.stations {
        println!(
            "   {}: 候诊 {} / 服务中 {} / 已完成 {} / 已取消 {}",
            summary.station,
            summary.waiting,
            summary.in_progress,
            summary.completed,
            summary.cancelled
        );
    }
    println!("   待处理检验申请: {}", overview.pending_lab_requests);
    println!("   待发药处方: {}", overview.pending_prescriptions);

    let cashier_queue = workflow.view_queue(StationKind::Cashier, Some(cashier)).await?;
    println!("\n💳 收费处队列:");
    for ticket in cashier_queue {
        println!("   - {} {} {:?}", ticket.code, ticket.patient.name, ticket.status);
    }

    info!(
        "Demo finished with {} tickets waiting at the cashier",
        overview.stations.iter().find(|s| s.station == StationKind::Cashier).map_or(0, |s| s.waiting)
    );
    println!("\n🎉 演示完成!");
    Ok(())
}
