#![deny(unsafe_code)]

//! `soapline-codec-xml`：纯文本 XML 信封编解码器。
//!
//! # 模块定位（Why）
//! - 为 `soapline-core` 的 [`Codec`] 契约提供最直接的线格式实现，也是紧凑编解码器的对照基线；
//! - 解析器与序列化器实例经由 [`soapline_pool::PoolSet`] 复用，调用方无需关心其生命周期。
//!
//! # 模块地图（What）
//! - `reader`：`quick_xml::NsReader` 事件流 → 元素树 → [`Message`]；
//! - `writer`：[`Message`] → `quick_xml::Writer` 输出的信封字节；
//! - `mime`：携带附件时的 `multipart/related` 封装。

mod mime;
mod reader;
mod writer;

use bytes::Bytes;
use soapline_core::{
    Codec, CodecDescriptor, ContentType, DecodeContext, EncodeContext, EncodedPayload, Message,
    SoapError, SoapVersion, codes,
};
use tracing::debug;

use crate::reader::{XmlParser, envelope_to_message};
use crate::writer::XmlWriter;

/// SOAP 1.1 的内容类型。
pub const SOAP11_CONTENT_TYPE: &str = "text/xml; charset=utf-8";
/// SOAP 1.2 的内容类型。
pub const SOAP12_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

const MULTIPART_RELATED: &str = "multipart/related";

/// 纯 XML 编解码器。
///
/// # 行为概览（How）
/// - `encode`：取出负载，借用池中的序列化器写出信封；存在附件时再封装为 `multipart/related`；
/// - `decode`：先校验帧预算，空正文直接返回空消息；其余输入借用池中的解析器建树并解释信封；
/// - 实例无状态，`copy` 即克隆。
///
/// # 契约说明（What）
/// - 1.2 消息带有 SOAP action 时，内容类型追加 `action` 参数；解码时反向读取该参数；
/// - 信封命名空间与本实例版本不符时报告 [`codes::VERSION_MISMATCH`]。
#[derive(Clone, Debug)]
pub struct XmlCodec {
    descriptor: CodecDescriptor,
}

impl XmlCodec {
    pub fn new(version: SoapVersion) -> Self {
        let content_type = match version {
            SoapVersion::Soap11 => SOAP11_CONTENT_TYPE,
            SoapVersion::Soap12 => SOAP12_CONTENT_TYPE,
        };
        Self {
            descriptor: CodecDescriptor::new("soapline.xml", version, ContentType::new(content_type)),
        }
    }

    pub fn soap11() -> Self {
        Self::new(SoapVersion::Soap11)
    }

    pub fn soap12() -> Self {
        Self::new(SoapVersion::Soap12)
    }

    pub fn version(&self) -> SoapVersion {
        self.descriptor.version()
    }
}

impl Codec for XmlCodec {
    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn content_type(&self, message: &Message) -> ContentType {
        let base = self.descriptor.content_type().clone();
        match (self.version(), message.soap_action()) {
            (SoapVersion::Soap12, Some(action)) => base.with_quoted_parameter("action", action),
            _ => base,
        }
    }

    fn encode(
        &mut self,
        message: &mut Message,
        ctx: &mut EncodeContext<'_>,
    ) -> Result<EncodedPayload, SoapError> {
        let payload = message.read_payload()?;
        let content_type = self.content_type(message);
        let envelope = {
            let mut writer = ctx.pools().pool::<XmlWriter>().acquire();
            Bytes::copy_from_slice(writer.write_envelope(
                self.version(),
                message.headers(),
                payload.as_ref(),
            )?)
        };

        if message.attachments().is_empty() {
            debug!(len = envelope.len(), content_type = %content_type, "encoded XML envelope");
            return Ok(EncodedPayload {
                bytes: envelope,
                content_type,
            });
        }
        let (bytes, content_type) = mime::write_related(&envelope, &content_type, message.attachments());
        debug!(
            len = bytes.len(),
            attachments = message.attachments().len(),
            "encoded XML envelope with attachments"
        );
        Ok(EncodedPayload { bytes, content_type })
    }

    fn decode(
        &mut self,
        bytes: &[u8],
        content_type: &ContentType,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<Message, SoapError> {
        ctx.check_frame_size(bytes.len())?;
        if bytes.is_empty() {
            return Ok(Message::new(self.version()));
        }

        let (root, root_content_type, attachments) = if content_type.media_type() == MULTIPART_RELATED {
            let related = mime::read_related(&Bytes::copy_from_slice(bytes), content_type)?;
            (related.root, related.root_content_type, Some(related.attachments))
        } else {
            (Bytes::copy_from_slice(bytes), content_type.clone(), None)
        };

        let text = std::str::from_utf8(&root).map_err(|err| {
            SoapError::new(codes::MESSAGE_CREATION, "couldn't create SOAP message: body is not UTF-8")
                .with_cause(err)
        })?;
        let max_depth = ctx.max_depth();
        let envelope = ctx
            .pools()
            .pool::<XmlParser>()
            .acquire()
            .parse_document(text, max_depth)?;
        let mut message = envelope_to_message(self.version(), envelope)?;
        message.set_soap_action(root_content_type.parameter("action"));
        if let Some(attachments) = attachments {
            for (content_id, attachment) in attachments.iter() {
                message
                    .attachments_mut()
                    .insert(content_id, attachment.clone());
            }
        }
        debug!(
            len = bytes.len(),
            headers = message.headers().len(),
            has_payload = message.has_payload(),
            "decoded XML envelope"
        );
        Ok(message)
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}
