//! 错误定义模块

use thiserror::Error;
use uuid::Uuid;

/// 门诊系统统一错误类型
#[derive(Error, Debug)]
pub enum ClinicError {
    #[error("无效状态转换: 从 {from} 到 {to}")]
    InvalidTransition { from: String, to: String },

    #[error("排队号已被领取: {0}")]
    AlreadyClaimed(Uuid),

    #[error("空医嘱: {0} 至少需要一项")]
    EmptyOrder(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl ClinicError {
    /// 构造状态转换错误
    pub fn invalid_transition(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        ClinicError::InvalidTransition {
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }

    /// 调用方是否应将其展示为“号码已不可用”
    pub fn is_claim_conflict(&self) -> bool {
        matches!(self, ClinicError::AlreadyClaimed(_))
    }
}

/// 门诊系统统一结果类型
pub type Result<T> = std::result::Result<T, ClinicError>;
