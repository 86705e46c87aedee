#![deny(unsafe_code)]

//! `soapline-codec-compact`：有状态的紧凑二进制编解码器。
//!
//! # 模块定位（Why）
//! - 同一通道上的消息往往重复相同的限定名与短值，保留跨消息的词表后，后续消息只需写出下标；
//! - 词表归编解码器实例所有，而实例归通道独占，因此词表的生命周期就是通道的生命周期。
//!
//! # 契约说明（What）
//! - 编码与解码各自维护一份词表；启用 `retain_state` 时跨消息保留，否则每条消息从空词表开始；
//! - 一条消息的编解码对词表是原子的：失败时回滚到消息开始时的检查点；
//! - 编码端的上限只是插入策略，超过上限的名字与值以字面量写出；解码端若因自身上限无法
//!   接受对端插入的条目，则以 [`codes::VOCABULARY_OVERFLOW`] 拒绝整条消息；
//! - `copy()` 保留配置与内容类型；只有配置了 `share_vocabulary` 时副本才与原实例共用词表。

mod frame;
mod vocabulary;
mod wire;

use bytes::{Bytes, BytesMut};
use soapline_core::{
    Codec, CodecDescriptor, CompactConfig, ContentType, DecodeContext, EncodeContext,
    EncodedPayload, Message, SoapError, SoapVersion, codes,
};
use soapline_pool::{PoolFamily, Poolable, ResetOutcome};
use tracing::debug;

use crate::frame::{FrameReader, FrameWriter};
use crate::vocabulary::VocabularyHandle;
use crate::wire::{FLAG_SOAP12, FLAG_STATEFUL, MAGIC, WireReader, malformed};

pub use crate::vocabulary::{Vocabulary, VocabularyLimits, VocabularyStats};

/// 按协议版本与是否有状态返回静态内容类型。
pub fn content_type_for(version: SoapVersion, stateful: bool) -> &'static str {
    match (version, stateful) {
        (SoapVersion::Soap11, false) => "application/compact+xml",
        (SoapVersion::Soap12, false) => "application/soap+compact",
        (SoapVersion::Soap11, true) => "application/vnd.stateful.compact+xml",
        (SoapVersion::Soap12, true) => "application/vnd.stateful.soap+compact",
    }
}

/// 序列化暂存缓冲，经资源池复用。
struct CompactScratch(BytesMut);

impl Poolable for CompactScratch {
    const FAMILY: PoolFamily = PoolFamily::new("compact.serializer");

    fn create() -> Self {
        Self(BytesMut::with_capacity(512))
    }

    fn reset(&mut self) -> ResetOutcome {
        self.0.clear();
        ResetOutcome::Ready
    }
}

/// 紧凑编解码器。
///
/// # 行为概览（How）
/// - `encode`：在池化的暂存缓冲中写出魔数、标志与帧体，整个过程持有序列化词表；
/// - `decode`：校验帧预算、魔数与标志后，在解析词表上读取帧体；
/// - 独占词表由 `&mut self` 保护，共享词表由 `spin::Mutex` 保护。
pub struct CompactCodec {
    descriptor: CodecDescriptor,
    config: CompactConfig,
    serializer: VocabularyHandle,
    parser: VocabularyHandle,
}

impl CompactCodec {
    /// 无状态实例，使用默认上限。
    pub fn new(version: SoapVersion) -> Self {
        Self::from_config(version, &CompactConfig::default())
    }

    /// 有状态实例，使用默认上限。
    pub fn stateful(version: SoapVersion) -> Self {
        Self::from_config(
            version,
            &CompactConfig {
                retain_state: true,
                ..CompactConfig::default()
            },
        )
    }

    pub fn from_config(version: SoapVersion, config: &CompactConfig) -> Self {
        let limits = VocabularyLimits::from(config);
        Self {
            descriptor: CodecDescriptor::new(
                "soapline.compact",
                version,
                ContentType::new(content_type_for(version, config.retain_state)),
            ),
            config: config.clone(),
            serializer: VocabularyHandle::new(limits, config.share_vocabulary),
            parser: VocabularyHandle::new(limits, config.share_vocabulary),
        }
    }

    pub fn version(&self) -> SoapVersion {
        self.descriptor.version()
    }

    pub fn is_stateful(&self) -> bool {
        self.config.retain_state
    }

    /// 编码方向的词表统计。
    pub fn serializer_stats(&self) -> VocabularyStats {
        self.serializer.stats()
    }

    /// 解码方向的词表统计。
    pub fn parser_stats(&self) -> VocabularyStats {
        self.parser.stats()
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.version() == SoapVersion::Soap12 {
            flags |= FLAG_SOAP12;
        }
        if self.is_stateful() {
            flags |= FLAG_STATEFUL;
        }
        flags
    }
}

impl Codec for CompactCodec {
    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    /// 带有原始 SOAP action 的 Fault 消息在内容类型上追加 `action` 参数。
    fn content_type(&self, message: &Message) -> ContentType {
        let base = self.descriptor.content_type().clone();
        match message.soap_action() {
            Some(action) if message.is_fault() => base.with_quoted_parameter("action", action),
            _ => base,
        }
    }

    fn encode(
        &mut self,
        message: &mut Message,
        ctx: &mut EncodeContext<'_>,
    ) -> Result<EncodedPayload, SoapError> {
        let content_type = self.content_type(message);
        let flags = self.flags();
        let retain = self.is_stateful();
        let mut scratch = ctx.pools().pool::<CompactScratch>().acquire();
        scratch.0.clear();
        scratch.0.extend_from_slice(&MAGIC);
        scratch.0.extend_from_slice(&[flags]);

        self.serializer.with(|vocabulary| {
            if !retain {
                vocabulary.clear();
            }
            let checkpoint = vocabulary.checkpoint();
            let outcome = FrameWriter::new(vocabulary, &mut scratch.0).message(message);
            if outcome.is_err() {
                vocabulary.rollback(checkpoint);
            }
            outcome
        })?;

        let bytes = Bytes::copy_from_slice(&scratch.0);
        debug!(
            len = bytes.len(),
            stateful = retain,
            names = self.serializer.stats().names,
            values = self.serializer.stats().values,
            "encoded compact frame"
        );
        Ok(EncodedPayload {
            bytes,
            content_type,
        })
    }

    fn decode(
        &mut self,
        bytes: &[u8],
        content_type: &ContentType,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<Message, SoapError> {
        ctx.check_frame_size(bytes.len())?;
        let version = self.version();
        if bytes.is_empty() {
            return Ok(Message::new(version));
        }

        let mut wire = WireReader::new(bytes);
        wire.magic()?;
        let flags = wire.u8()?;
        if flags & !(FLAG_SOAP12 | FLAG_STATEFUL) != 0 {
            return Err(malformed(format!("unknown compact frame flags {flags:#04x}")));
        }
        let frame_version = if flags & FLAG_SOAP12 != 0 {
            SoapVersion::Soap12
        } else {
            SoapVersion::Soap11
        };
        if frame_version != version {
            return Err(SoapError::new(
                codes::VERSION_MISMATCH,
                format!("compact frame carries {frame_version:?}, channel expects {version:?}"),
            ));
        }
        let retain = self.is_stateful();
        if (flags & FLAG_STATEFUL != 0) != retain {
            return Err(malformed(
                "compact frame statefulness does not match the channel codec",
            ));
        }

        let max_depth = ctx.max_depth();
        let mut message = self.parser.with(|vocabulary| {
            if !retain {
                vocabulary.clear();
            }
            let checkpoint = vocabulary.checkpoint();
            let outcome = FrameReader::new(wire, vocabulary, max_depth).message(version);
            if outcome.is_err() {
                vocabulary.rollback(checkpoint);
            }
            outcome
        })?;
        if message.soap_action().is_none() {
            message.set_soap_action(content_type.parameter("action"));
        }
        debug!(
            len = bytes.len(),
            headers = message.headers().len(),
            has_payload = message.has_payload(),
            "decoded compact frame"
        );
        Ok(message)
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(Self {
            descriptor: self.descriptor.clone(),
            config: self.config.clone(),
            serializer: self.serializer.duplicate(),
            parser: self.parser.duplicate(),
        })
    }
}
