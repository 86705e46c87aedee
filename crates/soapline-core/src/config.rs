//! 端点配置。
//!
//! 配置以 TOML 描述，经 `serde` 反序列化：
//!
//! ```toml
//! protocol = "soap12"
//! roles = ["urn:role:auditor"]
//! known_headers = ["{urn:x}Trace"]
//! max_frame_size = 1048576
//!
//! [addressing]
//! enabled = true
//! version = "w3c"
//!
//! [compact]
//! retain_state = true
//! share_vocabulary = false
//! value_size_limit = 32
//! max_entries = 4096
//! memory_limit = 65536
//!
//! [pool]
//! max_idle = 8
//! ```

use serde::Deserialize;
use soapline_pool::PoolSet;
use thiserror::Error;

use crate::endpoint::Endpoint;
use crate::infoset::QName;
use crate::must_understand::{MustUnderstandFactory, RoleSet};
use crate::pipeline::{Dispatcher, PipelineTemplate, TemplateBuilder};
use crate::protocol::{AddressingVersion, SoapVersion};
use crate::registry::HeaderRegistry;

/// 配置错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML 语法或字段类型错误。
    #[error("invalid endpoint configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// 已知头名不符合 `{namespace}local` 记法。
    #[error("invalid qualified name `{0}`, expected `{{namespace}}local`")]
    InvalidQName(String),
    /// 词表上限为零，有状态编解码器将无法插入任何条目。
    #[error("compact vocabulary limit `{0}` must be greater than zero")]
    ZeroLimit(&'static str),
}

/// 寻址特性。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AddressingConfig {
    pub enabled: bool,
    pub version: AddressingVersion,
}

impl Default for AddressingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            version: AddressingVersion::W3c,
        }
    }
}

/// 紧凑编解码器与词表上限。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CompactConfig {
    /// 跨消息保留词表。
    pub retain_state: bool,
    /// `copy()` 得到的副本与原实例共用同一词表。
    pub share_vocabulary: bool,
    /// 可进入值表的单个值的最大字节数。
    pub value_size_limit: usize,
    /// 每张表的最大条目数。
    pub max_entries: usize,
    /// 每张表的最大累计字节数。
    pub memory_limit: usize,
}

impl Default for CompactConfig {
    fn default() -> Self {
        Self {
            retain_state: false,
            share_vocabulary: false,
            value_size_limit: 32,
            max_entries: 4096,
            memory_limit: 64 * 1024,
        }
    }
}

/// 资源池。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_idle: 8 }
    }
}

/// 端点配置。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    pub protocol: SoapVersion,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub known_headers: Vec<String>,
    #[serde(default)]
    pub max_frame_size: Option<usize>,
    #[serde(default)]
    pub addressing: AddressingConfig,
    #[serde(default)]
    pub compact: CompactConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl EndpointConfig {
    /// 解析并校验配置。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.known_header_names()?;
        if self.compact.max_entries == 0 {
            return Err(ConfigError::ZeroLimit("max_entries"));
        }
        if self.compact.memory_limit == 0 {
            return Err(ConfigError::ZeroLimit("memory_limit"));
        }
        Ok(())
    }

    /// 解析已知头名。
    pub fn known_header_names(&self) -> Result<Vec<QName>, ConfigError> {
        self.known_headers
            .iter()
            .map(|text| QName::parse_clark(text).ok_or_else(|| ConfigError::InvalidQName(text.clone())))
            .collect()
    }

    /// 构建已知头注册表。
    pub fn registry(&self) -> Result<HeaderRegistry, ConfigError> {
        Ok(self.known_header_names()?.into_iter().collect())
    }

    /// 端点扮演的角色。
    pub fn role_set(&self) -> RoleSet {
        RoleSet::new(self.protocol).with_roles(self.roles.iter().cloned())
    }

    /// 生效的寻址版本；未启用时为 `None`。
    pub fn addressing_version(&self) -> Option<AddressingVersion> {
        self.addressing.enabled.then_some(self.addressing.version)
    }

    /// 预置已知头注册表与服务端 must-understand 阶段的模板构建器。
    ///
    /// must-understand 阶段位于链首，调用方追加的阶段排在其后。
    pub fn template_builder(&self) -> Result<TemplateBuilder, ConfigError> {
        Ok(PipelineTemplate::builder(self.protocol)
            .registry(self.registry()?)
            .stage(MustUnderstandFactory::server(self.role_set())))
    }

    /// 以给定分派器固化模板。
    pub fn template(&self, dispatcher: impl Dispatcher + 'static) -> Result<PipelineTemplate, ConfigError> {
        Ok(self.template_builder()?.build(dispatcher))
    }

    /// 组装端点：寻址版本进入每次调用的上下文，帧上限作用于端点及其开启的通道。
    pub fn endpoint(&self, dispatcher: impl Dispatcher + 'static) -> Result<Endpoint, ConfigError> {
        Ok(self.endpoint_from(self.template(dispatcher)?))
    }

    /// 以自行组装的模板（通常来自 [`EndpointConfig::template_builder`]）构建端点。
    pub fn endpoint_from(&self, template: PipelineTemplate) -> Endpoint {
        Endpoint::new(template)
            .with_addressing(self.addressing_version())
            .with_max_frame_size(self.max_frame_size)
    }

    /// 按配置的空闲上限为一个工作线程创建资源池。
    pub fn pool_set(&self) -> PoolSet {
        PoolSet::with_max_idle(self.pool.max_idle)
    }
}
