//! 门诊排队与分诊工作流引擎
//!
//! 汇总各子 crate，供演示程序和集成方使用

pub use clinic_admin;
pub use clinic_core;
pub use clinic_workflow;
