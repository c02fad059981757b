//! 门诊排队演练程序

mod scenario;

use anyhow::Result;
use clap::Parser;
use clinic_admin::{init_logging, ClinicConfig, ConfigManager};
use clinic_core::StationKind;
use clinic_workflow::ClinicWorkflow;
use scenario::{Scenario, ScenarioRunner};
use tracing::{info, warn};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "clinic-cli")]
#[command(about = "门诊排队工作流演练：回放场景文件并打印各服务站队列")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 场景文件（JSON），不提供时运行内置演示
    #[arg(short, long)]
    scenario: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::new(args.config.as_deref())?;
    let mut config = manager.get_config().await;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    // 初始化日志
    init_logging(&config.logging)?;
    info!("Starting queue workflow for {}", config.facility.name);

    let workflow = ClinicWorkflow::new(config.station_assignees());

    let scenario = match &args.scenario {
        Some(path) => Scenario::load(path).await?,
        None => {
            info!("No scenario file given, running the built-in walkthrough");
            Scenario::walkthrough()
        }
    };

    let mut runner = ScenarioRunner::new(&workflow);
    let report = runner.run(&scenario).await;
    for failure in &report.failures {
        warn!("Step {} ({}) failed: {}", failure.index + 1, failure.action, failure.error);
    }

    print_boards(&workflow, &config).await?;
    println!(
        "\n{} of {} steps applied, {} failed",
        report.applied,
        scenario.steps.len(),
        report.failures.len()
    );
    Ok(())
}

/// 打印各服务站的当前队列
async fn print_boards(workflow: &ClinicWorkflow, config: &ClinicConfig) -> Result<()> {
    println!("{}", config.facility.name);

    for station in StationKind::ALL {
        let queue = workflow.view_queue(station, None).await?;
        println!("\n{} ({} in queue)", config.station(station).display_name, queue.len());
        for ticket in queue {
            println!(
                "  {}  {:<24} {:?} {:?}",
                ticket.code, ticket.patient.name, ticket.status, ticket.priority
            );
        }
    }

    let overview = workflow.overview().await?;
    println!(
        "\nPending lab requests: {}  Pending prescriptions: {}",
        overview.pending_lab_requests, overview.pending_prescriptions
    );
    Ok(())
}
