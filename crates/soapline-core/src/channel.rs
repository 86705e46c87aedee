//! 通道：一条连接与其专属编解码器实例的绑定。
//!
//! 有状态编解码器的词表随编解码器实例存在，而编解码器实例归通道独占；
//! 通道被丢弃时词表随之释放，不存在任何全局状态。同一通道同一时刻只允许一个调用使用。

use std::sync::atomic::{AtomicU64, Ordering};

use soapline_pool::PoolSet;
use tracing::trace;

use crate::codec::{Codec, ContentType, DecodeContext, EncodeContext, EncodedPayload};
use crate::error::SoapError;
use crate::message::Message;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// 通道标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// 绑定了编解码器实例的通道。
pub struct Channel {
    id: ChannelId,
    codec: Box<dyn Codec>,
    max_frame_size: Option<usize>,
}

impl Channel {
    pub fn new(codec: Box<dyn Codec>) -> Self {
        Self {
            id: ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed)),
            codec,
            max_frame_size: None,
        }
    }

    /// 以原型的副本开启新通道；原型的词表不会被共享，除非它被配置为共享。
    pub fn open(prototype: &dyn Codec) -> Self {
        Self::new(prototype.copy())
    }

    pub fn with_max_frame_size(mut self, max_frame_size: Option<usize>) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    pub fn codec_mut(&mut self) -> &mut dyn Codec {
        self.codec.as_mut()
    }

    /// 解码入站字节。
    pub fn decode(
        &mut self,
        bytes: &[u8],
        content_type: &ContentType,
        pools: &mut PoolSet,
    ) -> Result<Message, SoapError> {
        trace!(channel = self.id.0, len = bytes.len(), "decoding inbound frame");
        let mut ctx = DecodeContext::new(pools).with_max_frame_size(self.max_frame_size);
        self.codec.decode(bytes, content_type, &mut ctx)
    }

    /// 编码出站消息。
    pub fn encode(&mut self, message: &mut Message, pools: &mut PoolSet) -> Result<EncodedPayload, SoapError> {
        let mut ctx = EncodeContext::new(pools);
        let encoded = self.codec.encode(message, &mut ctx)?;
        trace!(channel = self.id.0, len = encoded.bytes.len(), "encoded outbound frame");
        Ok(encoded)
    }
}
