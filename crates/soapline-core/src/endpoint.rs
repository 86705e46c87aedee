//! 端点：解码 → 管线 → 编码。
//!
//! # 错误转换（What）
//! - 解码失败转换为 `Client`（1.1）/`Sender`（1.2）Fault；
//! - 信封版本不符转换为 `VersionMismatch` Fault；
//! - 管线中携带 Fault 的错误转换为 Fault 响应；
//! - 超出端点 `max_frame_size` 的入站帧按解码失败处理；
//! - 仅无 Fault 的阶段失败、分派失败与编码失败以 `Err` 返回，且只影响本次调用。

use soapline_pool::PoolSet;
use tracing::warn;

use crate::channel::Channel;
use crate::codec::{Codec, ContentType, EncodedPayload};
use crate::error::{SoapError, codes};
use crate::fault::Fault;
use crate::message::Message;
use crate::pipeline::{CallScope, PipelineTemplate};
use crate::protocol::{AddressingVersion, SoapVersion};

/// 服务端端点。
#[derive(Clone, Debug)]
pub struct Endpoint {
    template: PipelineTemplate,
    addressing: Option<AddressingVersion>,
    max_frame_size: Option<usize>,
}

impl Endpoint {
    pub fn new(template: PipelineTemplate) -> Self {
        Self {
            template,
            addressing: None,
            max_frame_size: None,
        }
    }

    /// 启用寻址特性；新建的调用上下文将把对应头身份视为已知。
    pub fn with_addressing(mut self, addressing: Option<AddressingVersion>) -> Self {
        self.addressing = addressing;
        self
    }

    /// 入站帧的字节上限；同时作用于 [`Endpoint::open_channel`] 开启的通道。
    pub fn with_max_frame_size(mut self, max_frame_size: Option<usize>) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn max_frame_size(&self) -> Option<usize> {
        self.max_frame_size
    }

    /// 以原型的副本开启一条带有本端点帧上限的通道。
    pub fn open_channel(&self, prototype: &dyn Codec) -> Channel {
        Channel::open(prototype).with_max_frame_size(self.max_frame_size)
    }

    pub fn template(&self) -> &PipelineTemplate {
        &self.template
    }

    pub fn version(&self) -> SoapVersion {
        self.template.version()
    }

    /// 按端点配置创建调用上下文。
    pub fn call_scope(&self) -> CallScope {
        CallScope::new().with_addressing(self.addressing)
    }

    /// 处理一个已解码的请求。
    pub fn handle(&self, call: &CallScope, request: Message) -> Result<Message, SoapError> {
        match self.template.clone_instance().run(call, request) {
            Ok(response) => Ok(response),
            Err(mut err) => match err.take_fault() {
                Some(fault) => {
                    warn!(code = err.code(), "call ended with protocol fault");
                    Ok(fault.into_message())
                }
                None => Err(err),
            },
        }
    }

    /// 处理一帧入站字节并返回编码后的响应。
    pub fn serve(
        &self,
        channel: &mut Channel,
        request: &[u8],
        content_type: &ContentType,
        call: &CallScope,
        pools: &mut PoolSet,
    ) -> Result<EncodedPayload, SoapError> {
        let decoded = match self.max_frame_size {
            Some(limit) if request.len() > limit => Err(SoapError::new(
                codes::BUDGET_EXCEEDED,
                format!("frame of {} bytes exceeds limit of {limit} bytes", request.len()),
            )),
            _ => channel.decode(request, content_type, pools),
        };
        let mut response = match decoded {
            Ok(message) => self.handle(call, message)?,
            Err(err) => {
                warn!(code = err.code(), error = %err, "request could not be decoded");
                self.decode_fault(&err).into_message()
            }
        };
        channel.encode(&mut response, pools)
    }

    fn decode_fault(&self, err: &SoapError) -> Fault {
        let version = self.version();
        if err.code() == codes::VERSION_MISMATCH {
            Fault::version_mismatch(version)
        } else {
            Fault::sender(version, err.message().to_owned())
        }
    }
}
