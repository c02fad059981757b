//! 配置管理
//!
//! 提供统一的配置加载、验证、保存和重新加载功能

use anyhow::{Context, Result};
use clinic_core::{StationAssignees, StationKind};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: Arc<RwLock<ClinicConfig>>,
    /// 配置文件路径
    config_path: Option<String>,
    /// 配置验证器
    validator: ConfigValidator,
}

/// 门诊系统完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClinicConfig {
    /// 机构配置
    pub facility: FacilityConfig,
    /// 服务站配置
    pub stations: StationsConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 机构配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FacilityConfig {
    /// 机构名称
    pub name: String,
}

/// 服务站配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StationsConfig {
    pub doctor: StationConfig,
    pub lab: StationConfig,
    pub pharmacy: StationConfig,
    pub cashier: StationConfig,
}

/// 单个服务站配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationConfig {
    /// 显示名称
    pub display_name: String,
    /// 调用方未指定时的默认负责人
    #[serde(default)]
    pub default_assignee: Option<Uuid>,
}

/// 日志格式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或过滤指令
    pub level: String,
    /// 输出格式
    pub format: LogFormat,
}

/// 配置验证规则
pub struct ValidationRule {
    /// 字段路径
    pub field_path: String,
    /// 验证函数
    pub validator: fn(&ClinicConfig) -> Result<()>,
    /// 错误消息
    pub error_message: String,
}

impl std::fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationRule")
            .field("field_path", &self.field_path)
            .field("error_message", &self.error_message)
            .finish()
    }
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

impl ClinicConfig {
    /// 服务站默认负责人
    pub fn station_assignees(&self) -> StationAssignees {
        StationAssignees {
            doctor: self.stations.doctor.default_assignee,
            lab: self.stations.lab.default_assignee,
            pharmacy: self.stations.pharmacy.default_assignee,
            cashier: self.stations.cashier.default_assignee,
        }
    }

    /// 服务站配置
    pub fn station(&self, station: StationKind) -> &StationConfig {
        match station {
            StationKind::Doctor => &self.stations.doctor,
            StationKind::Lab => &self.stations.lab,
            StationKind::Pharmacy => &self.stations.pharmacy,
            StationKind::Cashier => &self.stations.cashier,
        }
    }
}

impl ConfigManager {
    /// 创建新的配置管理器，未提供路径时使用默认配置
    pub fn new(config_path: Option<&str>) -> Result<Self> {
        let config = match config_path {
            Some(path) => Self::load_config(path)?,
            None => {
                info!("No configuration file given, using defaults and environment");
                Self::load_environment()?
            }
        };

        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: config_path.map(str::to_string),
            validator,
        })
    }

    /// 从文件加载配置，环境变量 `CLINIC__*` 可覆盖文件中的值
    fn load_config(config_path: &str) -> Result<ClinicConfig> {
        let settings = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(Self::environment())
            .build()
            .with_context(|| format!("Failed to read configuration from {}", config_path))?;

        let config: ClinicConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        info!("Configuration loaded successfully from: {}", config_path);
        Ok(config)
    }

    /// 环境变量覆盖源，如 `CLINIC__FACILITY__NAME`
    fn environment() -> Environment {
        Environment::with_prefix("CLINIC").separator("__")
    }

    /// 仅从环境变量加载，未设置的字段使用默认值
    fn load_environment() -> Result<ClinicConfig> {
        Self::load_from_environment(Self::environment())
    }

    fn load_from_environment(environment: Environment) -> Result<ClinicConfig> {
        let settings = Config::builder()
            .add_source(environment)
            .build()
            .context("Failed to read configuration from environment")?;

        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// 获取配置
    pub async fn get_config(&self) -> ClinicConfig {
        let config = self.config.read().await;
        config.clone()
    }

    /// 更新配置
    pub async fn update_config(&self, new_config: ClinicConfig) -> Result<()> {
        self.validator.validate(&new_config)?;

        {
            let mut config = self.config.write().await;
            *config = new_config;
        }

        info!("Configuration updated successfully");
        Ok(())
    }

    /// 保存配置到文件
    pub async fn save_config(&self) -> Result<()> {
        let path = self
            .config_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No configuration path to save to"))?;

        let config = self.config.read().await;
        let config_str = toml::to_string_pretty(&*config).context("Failed to serialize configuration")?;

        tokio::fs::write(path, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", path);
        Ok(())
    }

    /// 重新加载配置
    pub async fn reload_config(&self) -> Result<()> {
        let path = self
            .config_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No configuration path to reload from"))?;
        let new_config = Self::load_config(path)?;
        self.update_config(new_config).await
    }

    /// 验证当前配置
    pub async fn validate_config(&self) -> Result<()> {
        let config = self.config.read().await;
        self.validator.validate(&config)
    }
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "facility.name".to_string(),
                validator: |config| {
                    if config.facility.name.trim().is_empty() {
                        Err(anyhow::anyhow!("Facility name cannot be empty"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid facility name".to_string(),
            },
            ValidationRule {
                field_path: "stations.*.display_name".to_string(),
                validator: |config| {
                    for station in StationKind::ALL {
                        if config.station(station).display_name.trim().is_empty() {
                            return Err(anyhow::anyhow!("Display name for {} cannot be empty", station));
                        }
                    }
                    Ok(())
                },
                error_message: "Invalid station display name".to_string(),
            },
            ValidationRule {
                field_path: "logging.level".to_string(),
                validator: |config| {
                    EnvFilter::try_new(&config.logging.level)
                        .map(|_| ())
                        .map_err(|e| anyhow::anyhow!("Unparseable log level {}: {}", config.logging.level, e))
                },
                error_message: "Invalid log level".to_string(),
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &ClinicConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("{}: {}", rule.error_message, e));
            }
        }

        info!("Configuration validation passed");
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for FacilityConfig {
    fn default() -> Self {
        Self {
            name: "Outpatient Clinic".to_string(),
        }
    }
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self {
            doctor: StationConfig::named("Doctor Consultation"),
            lab: StationConfig::named("Laboratory"),
            pharmacy: StationConfig::named("Pharmacy"),
            cashier: StationConfig::named("Cashier"),
        }
    }
}

impl StationConfig {
    fn named(display_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            default_assignee: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path() -> String {
        std::env::temp_dir()
            .join(format!("clinic-config-{}.toml", Uuid::new_v4()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ClinicConfig::default();
        assert!(ConfigValidator::new().validate(&config).is_ok());
        assert_eq!(config.station_assignees(), StationAssignees::default());
        assert_eq!(config.station(StationKind::Lab).display_name, "Laboratory");
    }

    #[test]
    fn test_validator_rejects_bad_values() {
        let validator = ConfigValidator::new();

        let mut config = ClinicConfig::default();
        config.facility.name = "  ".to_string();
        assert!(validator.validate(&config).is_err());

        let mut config = ClinicConfig::default();
        config.stations.pharmacy.display_name.clear();
        assert!(validator.validate(&config).is_err());

        let mut config = ClinicConfig::default();
        config.logging.level = "clinic=[".to_string();
        assert!(validator.validate(&config).is_err());
    }

    #[test]
    fn test_station_assignees_from_config() {
        let lab_tech = Uuid::new_v4();
        let mut config = ClinicConfig::default();
        config.stations.lab.default_assignee = Some(lab_tech);

        let assignees = config.station_assignees();
        assert_eq!(assignees.get(StationKind::Lab), Some(lab_tech));
        assert_eq!(assignees.get(StationKind::Doctor), None);
    }

    #[tokio::test]
    async fn test_load_partial_file() {
        let path = temp_config_path();
        let cashier = Uuid::new_v4();
        let contents = format!(
            "[facility]\nname = \"Riverside Clinic\"\n\n[stations.cashier]\ndisplay_name = \"Billing\"\ndefault_assignee = \"{}\"\n",
            cashier
        );
        tokio::fs::write(&path, contents).await.unwrap();

        let manager = ConfigManager::new(Some(&path)).unwrap();
        let config = manager.get_config().await;
        assert_eq!(config.facility.name, "Riverside Clinic");
        assert_eq!(config.stations.cashier.display_name, "Billing");
        assert_eq!(config.station_assignees().cashier, Some(cashier));
        // 未出现的段落使用默认值
        assert_eq!(config.stations.doctor.display_name, "Doctor Consultation");

        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn test_update_save_and_reload() {
        let path = temp_config_path();
        let manager = ConfigManager::new(Some(&path)).unwrap();

        let mut config = manager.get_config().await;
        config.facility.name = "Northside Health Centre".to_string();
        manager.update_config(config.clone()).await.unwrap();
        manager.save_config().await.unwrap();

        let mut invalid = config.clone();
        invalid.facility.name.clear();
        assert!(manager.update_config(invalid).await.is_err());

        manager.reload_config().await.unwrap();
        assert_eq!(manager.get_config().await.facility.name, "Northside Health Centre");

        tokio::fs::remove_file(&path).await.ok();
    }

    #[test]
    fn test_environment_applies_without_file() {
        let vars: std::collections::HashMap<String, String> = [
            ("CLINIC__FACILITY__NAME", "Harbour Clinic"),
            ("CLINIC__LOGGING__FORMAT", "json"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config =
            ConfigManager::load_from_environment(ConfigManager::environment().source(Some(vars))).unwrap();
        assert_eq!(config.facility.name, "Harbour Clinic");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.stations, StationsConfig::default());
    }

    #[tokio::test]
    async fn test_without_path() {
        let manager = ConfigManager::new(None).unwrap();
        assert_eq!(manager.get_config().await, ClinicConfig::default());
        assert!(manager.save_config().await.is_err());
        assert!(manager.validate_config().await.is_ok());
    }
}
