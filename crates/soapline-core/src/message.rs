//! 消息模型：头块、只读一次的负载、附件与属性袋。

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{SoapError, codes};
use crate::infoset::{Element, QName};
use crate::protocol::SoapVersion;

/// 消息头块。
///
/// # 契约说明（What）
/// - `content` 是头块元素本身，不含 `mustUnderstand` 与 `actor`/`role` 协议属性，
///   这两项由编解码器在线格式与字段之间转换；
/// - `understood` 初始为 `false`，由声明处理该头的阶段通过 [`Header::mark_understood`] 置位，
///   且只能成功一次。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    content: Element,
    must_understand: bool,
    role: Option<String>,
    understood: bool,
}

impl Header {
    /// 以头块元素构造非强制头。
    pub fn new(content: Element) -> Self {
        Self {
            content,
            must_understand: false,
            role: None,
            understood: false,
        }
    }

    /// 设置强制标记。
    pub fn with_must_understand(mut self, must_understand: bool) -> Self {
        self.must_understand = must_understand;
        self
    }

    /// 设置目标角色。
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// 头块限定名。
    pub fn name(&self) -> &QName {
        &self.content.name
    }

    pub fn must_understand(&self) -> bool {
        self.must_understand
    }

    /// 目标角色；`None` 表示未声明（最终接收者）。
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn is_understood(&self) -> bool {
        self.understood
    }

    /// 标记为已理解；已标记过时返回 `false`。
    pub fn mark_understood(&mut self) -> bool {
        !std::mem::replace(&mut self.understood, true)
    }

    /// 头块原始内容。
    pub fn content(&self) -> &Element {
        &self.content
    }
}

/// 附件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub content_type: String,
    pub data: Bytes,
}

impl Attachment {
    pub fn new(content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            data: data.into(),
        }
    }
}

/// 以 content-id 为键的附件集合，键唯一，迭代按键排序。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttachmentSet {
    entries: BTreeMap<String, Attachment>,
}

impl AttachmentSet {
    /// 插入附件；同名 content-id 已存在时替换并返回旧值。
    pub fn insert(&mut self, content_id: impl Into<String>, attachment: Attachment) -> Option<Attachment> {
        self.entries.insert(content_id.into(), attachment)
    }

    pub fn get(&self, content_id: &str) -> Option<&Attachment> {
        self.entries.get(content_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Attachment)> {
        self.entries.iter().map(|(cid, att)| (cid.as_str(), att))
    }
}

/// 字符串键、不透明值的属性袋。深拷贝时值按引用共享。
#[derive(Clone, Default)]
pub struct PropertyBag {
    entries: BTreeMap<String, Arc<dyn Any + Send + Sync>>,
}

impl PropertyBag {
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Arc::new(value));
    }

    /// 按类型读取；类型不符时返回 `None`。
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.entries.get(key)?.downcast_ref::<T>()
    }

    /// 读取共享句柄。
    pub fn get_shared(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PropertyBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

#[derive(Clone, Debug)]
enum Payload {
    Absent,
    Present(Element),
    Consumed,
}

/// 一次请求或响应。
///
/// # 契约说明（What）
/// - 负载只能读取一次：[`Message::read_payload`] 会把它移出，再次读取返回
///   [`codes::PAYLOAD_CONSUMED`]；需要重读时先用 [`Message::copy`] 得到深拷贝；
/// - 头块按插入顺序迭代，顺序在一次调用内稳定；
/// - `soap_action` 记录发起方的 SOAP action，故障消息沿用它生成内容类型参数。
#[derive(Clone, Debug)]
pub struct Message {
    version: SoapVersion,
    headers: Vec<Header>,
    payload: Payload,
    attachments: AttachmentSet,
    properties: PropertyBag,
    soap_action: Option<String>,
}

impl Message {
    /// 空消息：无头、无负载。
    pub fn new(version: SoapVersion) -> Self {
        Self {
            version,
            headers: Vec::new(),
            payload: Payload::Absent,
            attachments: AttachmentSet::default(),
            properties: PropertyBag::default(),
            soap_action: None,
        }
    }

    /// 携带负载的消息。
    pub fn with_payload(version: SoapVersion, payload: Element) -> Self {
        let mut message = Self::new(version);
        message.payload = Payload::Present(payload);
        message
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut [Header] {
        &mut self.headers
    }

    pub fn add_header(&mut self, header: Header) {
        self.headers.push(header);
    }

    /// 按名查找第一个头块。
    pub fn header(&self, name: &QName) -> Option<&Header> {
        self.headers.iter().find(|header| header.name() == name)
    }

    /// 负载是否尚未读取。
    pub fn has_payload(&self) -> bool {
        matches!(self.payload, Payload::Present(_))
    }

    /// 负载根元素名，不消费负载。
    pub fn peek_payload_name(&self) -> Option<&QName> {
        match &self.payload {
            Payload::Present(el) => Some(&el.name),
            Payload::Absent | Payload::Consumed => None,
        }
    }

    /// 负载根是否为本版本的 `Fault` 元素。
    pub fn is_fault(&self) -> bool {
        self.peek_payload_name()
            .is_some_and(|name| *name == self.version.fault_name())
    }

    /// 取出负载。无负载时返回 `Ok(None)`，已读取时报错。
    pub fn read_payload(&mut self) -> Result<Option<Element>, SoapError> {
        match std::mem::replace(&mut self.payload, Payload::Consumed) {
            Payload::Present(el) => Ok(Some(el)),
            Payload::Absent => {
                self.payload = Payload::Absent;
                Ok(None)
            }
            Payload::Consumed => Err(SoapError::new(
                codes::PAYLOAD_CONSUMED,
                "message payload has already been read",
            )),
        }
    }

    /// 替换负载。
    pub fn set_payload(&mut self, payload: Option<Element>) {
        self.payload = match payload {
            Some(el) => Payload::Present(el),
            None => Payload::Absent,
        };
    }

    /// 深拷贝；属性值按引用共享。负载已读取时失败。
    pub fn copy(&self) -> Result<Message, SoapError> {
        if matches!(self.payload, Payload::Consumed) {
            return Err(SoapError::new(
                codes::PAYLOAD_CONSUMED,
                "cannot copy a message whose payload has already been read",
            ));
        }
        Ok(self.clone())
    }

    pub fn attachments(&self) -> &AttachmentSet {
        &self.attachments
    }

    pub fn attachments_mut(&mut self) -> &mut AttachmentSet {
        &mut self.attachments
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyBag {
        &mut self.properties
    }

    pub fn soap_action(&self) -> Option<&str> {
        self.soap_action.as_deref()
    }

    pub fn set_soap_action(&mut self, action: Option<String>) {
        self.soap_action = action;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Element {
        Element::new(QName::new("urn:shop", "order")).with_text("42")
    }

    #[test]
    fn payload_is_read_once() {
        let mut message = Message::with_payload(SoapVersion::Soap12, order());
        assert_eq!(message.peek_payload_name(), Some(&QName::new("urn:shop", "order")));
        assert_eq!(message.read_payload().expect("首次读取").map(|el| el.text()), Some("42".into()));
        let err = message.read_payload().expect_err("第二次读取必须失败");
        assert_eq!(err.code(), codes::PAYLOAD_CONSUMED);
        assert!(message.copy().is_err(), "负载被读取后不能再深拷贝");
    }

    #[test]
    fn absent_payload_reads_as_none_repeatedly() {
        let mut message = Message::new(SoapVersion::Soap11);
        assert!(message.read_payload().expect("无负载").is_none());
        assert!(message.read_payload().expect("无负载可重复读取").is_none());
        assert!(message.copy().is_ok());
    }

    #[test]
    fn copy_shares_property_values() {
        let mut message = Message::with_payload(SoapVersion::Soap11, order());
        message.properties_mut().insert("tenant", String::from("acme"));
        let mut copy = message.copy().expect("深拷贝");
        let original = message.properties().get_shared("tenant").expect("属性存在");
        let copied = copy.properties().get_shared("tenant").expect("属性存在");
        assert!(Arc::ptr_eq(&original, &copied));
        assert!(copy.read_payload().expect("读取拷贝").is_some());
        assert!(message.has_payload(), "读取拷贝不影响原消息");
    }

    #[test]
    fn header_is_understood_exactly_once() {
        let mut header = Header::new(Element::new(QName::new("urn:x", "Foo"))).with_must_understand(true);
        assert!(!header.is_understood());
        assert!(header.mark_understood());
        assert!(!header.mark_understood());
        assert!(header.is_understood());
    }

    #[test]
    fn attachments_are_keyed_by_content_id() {
        let mut set = AttachmentSet::default();
        assert!(set.insert("a@x", Attachment::new("text/plain", "one")).is_none());
        let previous = set.insert("a@x", Attachment::new("text/plain", "two"));
        assert_eq!(previous.map(|att| att.data), Some(Bytes::from_static(b"one")));
        assert_eq!(set.len(), 1);
    }
}
