#![deny(unsafe_code)]

//! `soapline-core` 定义 SOAP 风格请求/响应处理的核心契约。
//!
//! # 模块定位（Why）
//! - 一份端点配置构建出一个只读的 [`PipelineTemplate`]，每个并发调用克隆出私有的
//!   [`PipelineInstance`]，阶段内的逐调用暂存状态因此无需加锁；
//! - must-understand 校验位于链首，违反时按协议版本合成标准形态的 Fault 并短路下游；
//! - 编解码器位于网络边界，通过显式传入的 [`soapline_pool::PoolSet`] 复用解析器/序列化器。
//!
//! # 模块地图（What）
//! - [`infoset`]：限定名与元素树；
//! - [`message`]：消息、头块、附件与属性袋；
//! - [`protocol`]：SOAP 版本与 WS-Addressing 身份；
//! - [`registry`]：已知头注册表；
//! - [`fault`]：Fault 构造；
//! - [`pipeline`]：阶段链、模板与克隆；
//! - [`must_understand`]：must-understand 阶段；
//! - [`codec`]：线格式编解码契约与内容类型协商；
//! - [`channel`] / [`endpoint`]：把编解码器与管线串联起来的胶水层；
//! - [`config`]：TOML 端点配置；
//! - [`error`]：稳定错误码；
//! - [`observability`]：日志字段约定与订阅者安装。

pub mod channel;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod fault;
pub mod infoset;
pub mod message;
pub mod must_understand;
pub mod observability;
pub mod pipeline;
pub mod protocol;
pub mod registry;

pub use channel::{Channel, ChannelId};
pub use codec::{
    Codec, CodecDescriptor, CodecRegistry, ContentType, DecodeContext, EncodeContext,
    EncodedPayload,
};
pub use config::{AddressingConfig, CompactConfig, ConfigError, EndpointConfig, PoolConfig};
pub use endpoint::Endpoint;
pub use error::{SoapError, codes};
pub use fault::{Fault, FaultCode};
pub use infoset::{Attribute, Element, Node, QName};
pub use message::{Attachment, AttachmentSet, Header, Message, PropertyBag};
pub use must_understand::{MustUnderstandFactory, RoleSet, Side, not_understood};
pub use pipeline::{
    Action, CallScope, Cancellation, CloneStageFactory, Dispatcher, PipelineInstance,
    PipelineTemplate, Stage, StageDescriptor, StageFactory, TemplateBuilder, TemplateShared,
};
pub use protocol::{AddressingVersion, SoapVersion};
pub use registry::{EffectiveRegistry, HeaderRegistry, HeaderRegistryBuilder};
