//! 错误域：[`SoapError`] 与稳定错误码 [`codes`]。
//!
//! 协议层可以恢复的错误携带一份 [`Fault`]，由端点转换为故障消息；其余错误原样交给调用方。

use std::borrow::Cow;
use std::error::Error;
use std::fmt;

use crate::fault::Fault;

type ErrorCause = Box<dyn Error + Send + Sync + 'static>;

/// `SoapError` 是跨模块共享的稳定错误形态。
///
/// # 设计背景（Why）
/// - 编解码、管线与应用分派产生的故障需要合流为统一的错误码，便于日志与调用方精确分类；
/// - 协议层可恢复的错误（must-understand、解码失败、版本不符）同时携带一份 [`Fault`]，
///   端点据此合成可序列化的故障消息，而不是把错误抛过调用边界。
///
/// # 契约说明（What）
/// - `code`：来自 [`codes`] 的稳定字符串，遵循 `<域>.<语义>` 约定；
/// - `message`：面向排障人员的描述；
/// - `cause`：可选底层原因，通过 [`Error::source`] 暴露；
/// - `fault`：可选的协议 Fault，仅在错误可被转换为故障消息时存在。
#[derive(Debug)]
pub struct SoapError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
    fault: Option<Box<Fault>>,
}

impl SoapError {
    /// 构造错误。
    ///
    /// ```
    /// use soapline_core::{SoapError, codes};
    ///
    /// let err = SoapError::new(codes::MESSAGE_CREATION, "unexpected end of envelope");
    /// assert_eq!(err.code(), codes::MESSAGE_CREATION);
    /// assert_eq!(err.to_string(), "[soap.message_creation] unexpected end of envelope");
    /// ```
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            fault: None,
        }
    }

    /// 附带底层原因。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 附带协议 Fault。
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(Box::new(fault));
        self
    }

    /// must-understand 违规：错误码固定为 [`codes::MUST_UNDERSTAND`]，并携带同一份 Fault。
    pub fn must_understand(fault: Fault) -> Self {
        let message = fault.reason().to_owned();
        Self::new(codes::MUST_UNDERSTAND, message).with_fault(fault)
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 描述文本。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 底层原因。
    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// 携带的协议 Fault。
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_deref()
    }

    /// 移出协议 Fault，错误本身保留码值与描述。
    pub fn take_fault(&mut self) -> Option<Fault> {
        self.fault.take().map(|fault| *fault)
    }

    /// 取出协议 Fault。
    pub fn into_fault(self) -> Option<Fault> {
        self.fault.map(|fault| *fault)
    }
}

impl fmt::Display for SoapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for SoapError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}

/// 稳定错误码。
///
/// 码值一经发布不得修改语义；新增码值请沿用 `<域>.<语义>` 格式。
pub mod codes {
    /// 入站强制头块未被理解。
    pub const MUST_UNDERSTAND: &str = "soap.must_understand";
    /// 信封命名空间与端点配置的协议版本不符。
    pub const VERSION_MISMATCH: &str = "soap.version_mismatch";
    /// 字节流无法构造为消息。
    pub const MESSAGE_CREATION: &str = "soap.message_creation";
    /// 入站帧超出 `max_frame_size`。
    pub const BUDGET_EXCEEDED: &str = "protocol.budget_exceeded";
    /// 编码失败。
    pub const ENCODE: &str = "codec.encode";
    /// 没有编解码器能处理该内容类型。
    pub const UNSUPPORTED_CONTENT_TYPE: &str = "codec.unsupported_content_type";
    /// 解码端词表无法容纳对端声明插入的条目。
    pub const VOCABULARY_OVERFLOW: &str = "codec.vocabulary_overflow";
    /// 消息负载已被读取。
    pub const PAYLOAD_CONSUMED: &str = "message.payload_consumed";
    /// 调用在完成前被取消。
    pub const CANCELLED: &str = "pipeline.cancelled";
    /// 阶段返回失败。
    pub const STAGE_FAILED: &str = "pipeline.stage_failed";
    /// 应用分派失败。
    pub const DISPATCH_FAILED: &str = "app.dispatch_failed";
}
