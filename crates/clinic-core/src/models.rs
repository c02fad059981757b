//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ClinicError;

/// 服务站类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum StationKind {
    Doctor,   // 医生诊室
    Lab,      // 检验科
    Pharmacy, // 药房
    Cashier,  // 收费处
}

impl StationKind {
    /// 全部服务站，按排队号字母顺序
    pub const ALL: [StationKind; 4] = [
        StationKind::Doctor,
        StationKind::Lab,
        StationKind::Pharmacy,
        StationKind::Cashier,
    ];

    /// 排队号前缀字母
    pub fn letter(self) -> char {
        match self {
            StationKind::Doctor => 'A',
            StationKind::Lab => 'B',
            StationKind::Pharmacy => 'C',
            StationKind::Cashier => 'D',
        }
    }

    /// 由前缀字母反查服务站
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'A' => Some(StationKind::Doctor),
            'B' => Some(StationKind::Lab),
            'C' => Some(StationKind::Pharmacy),
            'D' => Some(StationKind::Cashier),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StationKind::Doctor => "doctor",
            StationKind::Lab => "lab",
            StationKind::Pharmacy => "pharmacy",
            StationKind::Cashier => "cashier",
        }
    }
}

impl fmt::Display for StationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 患者引用（由外部患者登记模块解析）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatientRef {
    pub id: Uuid,
    pub name: String, // 显示姓名
}

impl PatientRef {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// 排队优先级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Normal, // 普通
    Urgent, // 加急
}

impl TicketPriority {
    /// 排序键，加急在前
    pub fn sort_rank(self) -> u8 {
        match self {
            TicketPriority::Urgent => 0,
            TicketPriority::Normal => 1,
        }
    }
}

impl Default for TicketPriority {
    fn default() -> Self {
        TicketPriority::Normal
    }
}

/// 排队号状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TicketStatus {
    Waiting,    // 候诊中
    InProgress, // 服务中
    Completed,  // 已完成
    Cancelled,  // 已取消
}

impl TicketStatus {
    /// 终态不再变化
    pub fn is_terminal(self) -> bool {
        matches!(self, TicketStatus::Completed | TicketStatus::Cancelled)
    }

    /// 是否出现在队列视图中
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

/// 排队号，如 `A007`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TicketCode {
    pub station: StationKind,
    pub number: u32,
}

impl TicketCode {
    pub fn new(station: StationKind, number: u32) -> Self {
        Self { station, number }
    }
}

impl fmt::Display for TicketCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.station.letter(), self.number)
    }
}

impl FromStr for TicketCode {
    type Err = ClinicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        let letter = chars
            .next()
            .ok_or_else(|| ClinicError::Validation("Empty ticket code".to_string()))?;
        let station = StationKind::from_letter(letter)
            .ok_or_else(|| ClinicError::Validation(format!("Unknown station letter in ticket code {}", s)))?;
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClinicError::Validation(format!("Malformed ticket code {}", s)));
        }
        let number: u32 = digits
            .parse()
            .map_err(|_| ClinicError::Validation(format!("Malformed ticket code {}", s)))?;
        if number == 0 {
            return Err(ClinicError::Validation(format!("Ticket numbers start at 1: {}", s)));
        }
        Ok(Self { station, number })
    }
}

impl TryFrom<String> for TicketCode {
    type Error = ClinicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TicketCode> for String {
    fn from(code: TicketCode) -> Self {
        code.to_string()
    }
}

/// 状态变更记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub status: TicketStatus,
    pub at: DateTime<Utc>,
    pub actor: Option<Uuid>, // 操作人员ID
}

/// 排队号
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub patient: PatientRef,
    pub station: StationKind,
    pub assignee: Option<Uuid>, // 指定的医生/窗口
    pub code: TicketCode,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub handled_by: Option<Uuid>, // 领取该号的人员
    pub sequence: u64,            // 全局入队序号，同时间戳时的次序
    pub history: Vec<StatusChange>,
}

/// 入队请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketRequest {
    pub patient: PatientRef,
    pub station: StationKind,
    pub assignee: Option<Uuid>,
    pub priority: TicketPriority,
}

/// 各服务站默认负责人
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StationAssignees {
    pub doctor: Option<Uuid>,
    pub lab: Option<Uuid>,
    pub pharmacy: Option<Uuid>,
    pub cashier: Option<Uuid>,
}

impl StationAssignees {
    pub fn get(&self, station: StationKind) -> Option<Uuid> {
        match station {
            StationKind::Doctor => self.doctor,
            StationKind::Lab => self.lab,
            StationKind::Pharmacy => self.pharmacy,
            StationKind::Cashier => self.cashier,
        }
    }
}

/// 检验项目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabTest {
    pub id: String, // 项目编码，如 CBC
    pub name: String,
    pub description: Option<String>,
    pub normal_range: Option<String>, // 参考范围
    pub unit: Option<String>,
    pub category: Option<String>,
}

impl LabTest {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            normal_range: None,
            unit: None,
            category: None,
        }
    }
}

/// 检验紧急程度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LabUrgency {
    Routine, // 常规
    Urgent,  // 急查
}

/// 检验申请状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum LabRequestStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

/// 检验申请
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabRequest {
    pub id: Uuid,
    pub patient: PatientRef,
    pub physician_id: Uuid, // 开单医生
    pub tests: Vec<LabTest>,
    pub urgency: LabUrgency,
    pub status: LabRequestStatus,
    pub clinical_info: Option<String>, // 临床信息
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LabRequest {
    pub fn test(&self, test_id: &str) -> Option<&LabTest> {
        self.tests.iter().find(|t| t.id == test_id)
    }
}

/// 新建检验申请的内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabRequestDraft {
    pub patient: PatientRef,
    pub physician_id: Uuid,
    pub tests: Vec<LabTest>,
    pub urgency: LabUrgency,
    #[serde(default)]
    pub clinical_info: Option<String>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// 检验结果状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LabResultStatus {
    Pending,   // 待出结果
    Completed, // 已出结果
    Verified,  // 已审核
}

/// 检验结果，每个申请的每个项目一条
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabResult {
    pub id: Uuid,
    pub request_id: Uuid,
    pub patient_id: Uuid,
    pub test_id: String,
    pub test_name: String,
    pub value: String,
    pub normal_range: Option<String>,
    pub interpretation: Option<String>, // 结果解读
    pub status: LabResultStatus,
    pub performed_by: Uuid,
    pub verified_by: Option<Uuid>,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// 提交的单项检验结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabResultDraft {
    pub test_id: String,
    pub value: String,
    #[serde(default)]
    pub interpretation: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub status: LabResultStatus,
    pub performed_by: Uuid,
}

/// 药品医嘱
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Medication {
    pub name: String,
    pub dosage: String,    // 剂量
    pub frequency: String, // 频次
    pub duration: String,  // 疗程
    #[serde(default)]
    pub route: Option<String>, // 给药途径
    pub quantity: u32,
    #[serde(default)]
    pub refills: u32,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub timing: Option<String>,
}

/// 处方状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PrescriptionStatus {
    Pending,   // 待发药
    Dispensed, // 已发药
    Cancelled, // 已取消
}

/// 处方
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    pub patient: PatientRef,
    pub physician_id: Uuid,
    pub medications: Vec<Medication>,
    pub diagnosis: Option<String>,
    pub allergies: Vec<String>, // 过敏史
    pub notes: Option<String>,
    pub status: PrescriptionStatus,
    pub dispensed_by: Option<Uuid>,
    pub dispensed_at: Option<DateTime<Utc>>,
    pub pharmacy_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建处方的内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescriptionDraft {
    pub patient: PatientRef,
    pub physician_id: Uuid,
    pub medications: Vec<Medication>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}
