//! 线格式编解码契约与内容类型协商。
//!
//! # 契约说明（What）
//! - `decode` 接收空字节流时返回空消息，而不是报错；
//! - `encode` 遇到无负载的消息时只写信封骨架；
//! - 格式错误报告为 [`codes::MESSAGE_CREATION`]，信封版本与配置不符报告为
//!   [`codes::VERSION_MISMATCH`]，两者都与 must-understand Fault 区分开；
//! - `copy` 产生可并发使用的独立实例，只共享显式配置为共享的状态。

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use soapline_pool::PoolSet;

use crate::error::{SoapError, codes};
use crate::message::Message;
use crate::protocol::SoapVersion;

/// 元素嵌套深度的默认上限。
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// `ContentType` 以 `type/subtype; key=value` 形式描述负载语义。
///
/// # 逻辑解析（How）
/// - 内部以 `Cow<'static, str>` 保存，静态常量与运行时拼接的值可以共存；
/// - [`ContentType::media_type`] 与 [`ContentType::parameter`] 在读取时解析，参数值两侧的引号会被去掉。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContentType(Cow<'static, str>);

impl ContentType {
    pub fn new(value: impl Into<Cow<'static, str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 小写的 `type/subtype` 部分。
    pub fn media_type(&self) -> String {
        split_params(&self.0)
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }

    /// 按名读取参数（名字不区分大小写）。
    pub fn parameter(&self, name: &str) -> Option<String> {
        split_params(&self.0).skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim().eq_ignore_ascii_case(name).then(|| {
                let value = value.trim();
                value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value)
                    .to_owned()
            })
        })
    }

    /// 追加一个带引号的参数。
    pub fn with_quoted_parameter(&self, name: &str, value: &str) -> Self {
        Self::new(format!("{};{name}=\"{value}\"", self.0))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 以 `;` 切分参数，忽略引号内的分号。
fn split_params(value: &str) -> impl Iterator<Item = &str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (idx, ch) in value.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            ';' if !quoted => {
                parts.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts.into_iter()
}

/// 编解码器的静态描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodecDescriptor {
    name: &'static str,
    version: SoapVersion,
    content_type: ContentType,
}

impl CodecDescriptor {
    pub fn new(name: &'static str, version: SoapVersion, content_type: ContentType) -> Self {
        Self {
            name,
            version,
            content_type,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    /// 协商用的静态内容类型。
    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }
}

/// 编码结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedPayload {
    pub bytes: Bytes,
    pub content_type: ContentType,
}

/// 编码上下文：携带工作线程的资源池。
pub struct EncodeContext<'a> {
    pools: &'a mut PoolSet,
}

impl<'a> EncodeContext<'a> {
    pub fn new(pools: &'a mut PoolSet) -> Self {
        Self { pools }
    }

    pub fn pools(&mut self) -> &mut PoolSet {
        self.pools
    }
}

/// 解码上下文：资源池、帧大小与嵌套深度上限。
pub struct DecodeContext<'a> {
    pools: &'a mut PoolSet,
    max_frame_size: Option<usize>,
    max_depth: usize,
}

impl<'a> DecodeContext<'a> {
    pub fn new(pools: &'a mut PoolSet) -> Self {
        Self {
            pools,
            max_frame_size: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: Option<usize>) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn pools(&mut self) -> &mut PoolSet {
        self.pools
    }

    pub fn max_frame_size(&self) -> Option<usize> {
        self.max_frame_size
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// 校验入站帧长度。
    pub fn check_frame_size(&self, len: usize) -> Result<(), SoapError> {
        match self.max_frame_size {
            Some(limit) if len > limit => Err(SoapError::new(
                codes::BUDGET_EXCEEDED,
                format!("frame of {len} bytes exceeds limit of {limit} bytes"),
            )),
            _ => Ok(()),
        }
    }

    /// 校验嵌套深度。
    pub fn check_depth(&self, depth: usize) -> Result<(), SoapError> {
        if depth > self.max_depth {
            Err(SoapError::new(
                codes::MESSAGE_CREATION,
                format!("element nesting exceeds depth limit of {}", self.max_depth),
            ))
        } else {
            Ok(())
        }
    }
}

/// 线格式编解码器。
///
/// 实例绑定到单个通道，方法接收 `&mut self`；需要并发时通过 [`Codec::copy`] 获取独立实例。
pub trait Codec: Send {
    fn descriptor(&self) -> &CodecDescriptor;

    /// 针对具体消息的内容类型，可在静态类型上追加参数。
    fn content_type(&self, message: &Message) -> ContentType;

    /// 序列化消息；负载会被读取（消费）。
    fn encode(
        &mut self,
        message: &mut Message,
        ctx: &mut EncodeContext<'_>,
    ) -> Result<EncodedPayload, SoapError>;

    /// 反序列化消息。
    fn decode(
        &mut self,
        bytes: &[u8],
        content_type: &ContentType,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<Message, SoapError>;

    /// 独立副本。
    fn copy(&self) -> Box<dyn Codec>;
}

/// 按内容类型协商编解码器。
///
/// 注册的是原型；协商成功时返回原型的 [`Codec::copy`]。
#[derive(Default)]
pub struct CodecRegistry {
    prototypes: Vec<Box<dyn Codec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, codec: Box<dyn Codec>) {
        self.prototypes.push(codec);
    }

    /// 已注册的描述信息。
    pub fn descriptors(&self) -> impl Iterator<Item = &CodecDescriptor> {
        self.prototypes.iter().map(|codec| codec.descriptor())
    }

    /// 匹配媒体类型；`multipart/related` 按其 `type` 参数匹配根部件。
    pub fn negotiate(&self, content_type: &ContentType) -> Result<Box<dyn Codec>, SoapError> {
        let mut wanted = content_type.media_type();
        if wanted == "multipart/related" {
            if let Some(root) = content_type.parameter("type") {
                wanted = root.to_ascii_lowercase();
            }
        }
        self.prototypes
            .iter()
            .find(|codec| codec.descriptor().content_type().media_type() == wanted)
            .map(|codec| codec.copy())
            .ok_or_else(|| {
                SoapError::new(
                    codes::UNSUPPORTED_CONTENT_TYPE,
                    format!("no codec registered for content type {content_type}"),
                )
            })
    }
}
