//! 协议 Fault 的构造与解析。
//!
//! 两个协议版本的 Fault 形态差异必须逐一保留：
//! - SOAP 1.1：`faultcode`/`faultstring`/`detail` 均为无命名空间子元素，
//!   must-understand 违规的头名写入 `detail`；
//! - SOAP 1.2：`Code/Value`、`Reason/Text`、`Detail` 位于信封命名空间，
//!   must-understand 违规的每个头名各生成一个 `NotUnderstood` **头块**。

use crate::infoset::{Element, QName, XML_NAMESPACE};
use crate::message::{Header, Message};
use crate::protocol::{ENVELOPE_PREFIX, SoapVersion};

/// must-understand Fault 的固定原因文本。
pub const MUST_UNDERSTAND_REASON: &str = "One or more mandatory SOAP header blocks not understood";

/// Fault 代码。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultCode {
    VersionMismatch,
    MustUnderstand,
    /// 1.1 拼写为 `Client`。
    Sender,
    /// 1.1 拼写为 `Server`。
    Receiver,
}

impl FaultCode {
    /// 信封命名空间下的本地名。
    pub fn local_name(self, version: SoapVersion) -> &'static str {
        match (self, version) {
            (Self::VersionMismatch, _) => "VersionMismatch",
            (Self::MustUnderstand, _) => "MustUnderstand",
            (Self::Sender, SoapVersion::Soap11) => "Client",
            (Self::Sender, SoapVersion::Soap12) => "Sender",
            (Self::Receiver, SoapVersion::Soap11) => "Server",
            (Self::Receiver, SoapVersion::Soap12) => "Receiver",
        }
    }

    fn from_local_name(local: &str) -> Option<Self> {
        match local {
            "VersionMismatch" => Some(Self::VersionMismatch),
            "MustUnderstand" => Some(Self::MustUnderstand),
            "Client" | "Sender" => Some(Self::Sender),
            "Server" | "Receiver" => Some(Self::Receiver),
            _ => None,
        }
    }
}

/// 协议 Fault。
///
/// 通过 [`Fault::into_message`] 得到可直接交给编解码器序列化的故障消息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    version: SoapVersion,
    code: FaultCode,
    reason: String,
    detail: Option<Element>,
    headers: Vec<Header>,
    not_understood: Vec<QName>,
    action: Option<String>,
}

impl Fault {
    pub fn new(version: SoapVersion, code: FaultCode, reason: impl Into<String>) -> Self {
        Self {
            version,
            code,
            reason: reason.into(),
            detail: None,
            headers: Vec::new(),
            not_understood: Vec::new(),
            action: None,
        }
    }

    /// must-understand 违规 Fault。
    ///
    /// 原因文本为固定句子加上逐个 `{ns}local` 名字；1.1 在 `detail` 中逐个列出，
    /// 1.2 为每个名字追加一个 `NotUnderstood` 头块，`qname` 属性引用该名字。
    pub fn must_understand(version: SoapVersion, names: &[QName]) -> Self {
        let listed = names
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let mut fault = Self::new(
            version,
            FaultCode::MustUnderstand,
            format!("{MUST_UNDERSTAND_REASON}: {listed}"),
        );
        fault.not_understood = names.to_vec();
        match version {
            SoapVersion::Soap11 => {
                let mut detail = Element::new(QName::local("detail"));
                for (idx, name) in names.iter().enumerate() {
                    detail = detail.with_child(qname_reference(QName::local("NotUnderstood"), idx, name));
                }
                fault.detail = Some(detail);
            }
            SoapVersion::Soap12 => {
                fault.headers = names
                    .iter()
                    .enumerate()
                    .map(|(idx, name)| {
                        Header::new(qname_reference(version.qname("NotUnderstood"), idx, name))
                    })
                    .collect();
            }
        }
        fault
    }

    /// 版本不符 Fault，以端点自身的版本表达；1.2 追加 `Upgrade` 头块声明支持的信封。
    pub fn version_mismatch(version: SoapVersion) -> Self {
        let mut fault = Self::new(
            version,
            FaultCode::VersionMismatch,
            format!(
                "SOAP envelope version mismatch, expected envelope in namespace {}",
                version.envelope_namespace()
            ),
        );
        if version == SoapVersion::Soap12 {
            let supported = qname_reference(
                version.qname("SupportedEnvelope"),
                0,
                &version.qname("Envelope"),
            );
            fault.headers.push(Header::new(
                Element::new(version.qname("Upgrade")).with_child(supported),
            ));
        }
        fault
    }

    /// 发送方错误（1.1 `Client`，1.2 `Sender`）。
    pub fn sender(version: SoapVersion, reason: impl Into<String>) -> Self {
        Self::new(version, FaultCode::Sender, reason)
    }

    /// 接收方错误（1.1 `Server`，1.2 `Receiver`）。
    pub fn receiver(version: SoapVersion, reason: impl Into<String>) -> Self {
        Self::new(version, FaultCode::Receiver, reason)
    }

    /// 附带 detail 内容；1.1 包装在 `detail` 中，1.2 包装在 `Detail` 中。
    pub fn with_detail_entry(mut self, entry: Element) -> Self {
        let detail = self.detail.take().unwrap_or_else(|| Element::new(self.detail_name()));
        self.detail = Some(detail.with_child(entry));
        self
    }

    /// 记录原始请求的 SOAP action。
    pub fn with_action(mut self, action: Option<String>) -> Self {
        self.action = action;
        self
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub fn code(&self) -> FaultCode {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn detail(&self) -> Option<&Element> {
        self.detail.as_ref()
    }

    /// Fault 专属头块（1.2 的 `NotUnderstood`/`Upgrade`）。
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// 触发 must-understand Fault 的头名。
    pub fn not_understood(&self) -> &[QName] {
        &self.not_understood
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    fn detail_name(&self) -> QName {
        match self.version {
            SoapVersion::Soap11 => QName::local("detail"),
            SoapVersion::Soap12 => self.version.qname("Detail"),
        }
    }

    /// 构造 `Fault` 负载元素。
    pub fn to_element(&self) -> Element {
        let version = self.version;
        let code_text = format!("{ENVELOPE_PREFIX}:{}", self.code.local_name(version));
        let mut fault = Element::new(version.fault_name())
            .with_namespace(ENVELOPE_PREFIX, version.envelope_namespace());
        fault = match version {
            SoapVersion::Soap11 => fault
                .with_child(Element::new(QName::local("faultcode")).with_text(code_text))
                .with_child(Element::new(QName::local("faultstring")).with_text(self.reason.clone())),
            SoapVersion::Soap12 => fault
                .with_child(
                    Element::new(version.qname("Code"))
                        .with_child(Element::new(version.qname("Value")).with_text(code_text)),
                )
                .with_child(
                    Element::new(version.qname("Reason")).with_child(
                        Element::new(version.qname("Text"))
                            .with_attribute(QName::new(XML_NAMESPACE, "lang"), "en")
                            .with_text(self.reason.clone()),
                    ),
                ),
        };
        if let Some(detail) = &self.detail {
            fault = fault.with_child(detail.clone());
        }
        fault
    }

    /// 转换为故障消息：Fault 头块在前，负载为 `Fault` 元素。
    pub fn into_message(self) -> Message {
        let mut message = Message::with_payload(self.version, self.to_element());
        message.set_soap_action(self.action);
        for header in self.headers {
            message.add_header(header);
        }
        message
    }

    /// 从 `Fault` 负载元素解析代码、原因与 detail。
    ///
    /// 1.2 的 `NotUnderstood` 位于消息头块中，此处不会恢复。
    pub fn parse(version: SoapVersion, element: &Element) -> Option<Self> {
        if element.name != version.fault_name() {
            return None;
        }
        let (code_text, reason, detail) = match version {
            SoapVersion::Soap11 => (
                element.child(&QName::local("faultcode"))?.text(),
                element
                    .child(&QName::local("faultstring"))
                    .map(Element::text)
                    .unwrap_or_default(),
                element.child(&QName::local("detail")).cloned(),
            ),
            SoapVersion::Soap12 => (
                element
                    .child(&version.qname("Code"))?
                    .child(&version.qname("Value"))?
                    .text(),
                element
                    .child(&version.qname("Reason"))
                    .and_then(|reason| reason.child(&version.qname("Text")))
                    .map(Element::text)
                    .unwrap_or_default(),
                element.child(&version.qname("Detail")).cloned(),
            ),
        };
        let local = code_text.trim().rsplit(':').next()?;
        let mut fault = Self::new(version, FaultCode::from_local_name(local)?, reason);
        fault.detail = detail;
        if let Some(detail) = &fault.detail {
            fault.not_understood = detail
                .child_elements()
                .filter(|el| el.name.local_name() == "NotUnderstood")
                .filter_map(|el| {
                    let value = el.attribute(&QName::local("qname"))?;
                    el.resolve_prefixed(value).or_else(|| Some(QName::local(value)))
                })
                .collect();
        }
        Some(fault)
    }
}

/// 生成 `<name qname="nsN:local" xmlns:nsN="uri"/>` 形式的名字引用。
fn qname_reference(element: QName, idx: usize, target: &QName) -> Element {
    if target.namespace().is_empty() {
        return Element::new(element).with_attribute(QName::local("qname"), target.local_name());
    }
    let prefix = format!("ns{}", idx + 1);
    Element::new(element)
        .with_namespace(prefix.clone(), target.namespace())
        .with_attribute(
            QName::local("qname"),
            format!("{prefix}:{}", target.local_name()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foo() -> QName {
        QName::new("urn:x", "Foo")
    }

    #[test]
    fn soap11_fault_lists_names_in_detail() {
        let fault = Fault::must_understand(SoapVersion::Soap11, &[foo(), QName::new("urn:y", "Bar")]);
        assert!(fault.headers().is_empty(), "1.1 不生成 Fault 头块");
        assert!(fault.reason().starts_with(MUST_UNDERSTAND_REASON));
        assert!(fault.reason().contains("{urn:x}Foo"));
        assert!(fault.reason().contains("{urn:y}Bar"));

        let element = fault.to_element();
        let code = element.child(&QName::local("faultcode")).expect("faultcode");
        assert_eq!(code.text(), "S:MustUnderstand");
        let detail = element.child(&QName::local("detail")).expect("detail");
        assert_eq!(detail.child_elements().count(), 2);
    }

    #[test]
    fn soap12_fault_adds_one_header_per_name() {
        let fault = Fault::must_understand(SoapVersion::Soap12, &[foo()]);
        assert_eq!(fault.headers().len(), 1);
        let header = fault.headers()[0].content();
        assert_eq!(header.name, SoapVersion::Soap12.qname("NotUnderstood"));
        let qname = header.attribute(&QName::local("qname")).expect("qname 属性");
        assert_eq!(header.resolve_prefixed(qname), Some(foo()));
        assert!(fault.detail().is_none());
    }

    #[test]
    fn parse_recovers_fault_fields() {
        for version in [SoapVersion::Soap11, SoapVersion::Soap12] {
            let fault = Fault::sender(version, "bad envelope")
                .with_detail_entry(Element::new(QName::new("urn:x", "why")).with_text("eof"));
            let parsed = Fault::parse(version, &fault.to_element()).expect("可解析");
            assert_eq!(parsed.code(), FaultCode::Sender);
            assert_eq!(parsed.reason(), "bad envelope");
            assert_eq!(parsed.detail(), fault.detail());
        }
    }

    #[test]
    fn parse_reads_soap11_not_understood_names() {
        let fault = Fault::must_understand(SoapVersion::Soap11, &[foo()]);
        let parsed = Fault::parse(SoapVersion::Soap11, &fault.to_element()).expect("可解析");
        assert_eq!(parsed.not_understood(), &[foo()]);
    }

    #[test]
    fn soap12_version_mismatch_carries_upgrade_header() {
        let message = Fault::version_mismatch(SoapVersion::Soap12).into_message();
        let upgrade = message
            .header(&SoapVersion::Soap12.qname("Upgrade"))
            .expect("Upgrade 头块");
        assert!(upgrade.content().child(&SoapVersion::Soap12.qname("SupportedEnvelope")).is_some());
        assert!(message.is_fault());

        let soap11 = Fault::version_mismatch(SoapVersion::Soap11).into_message();
        assert!(soap11.headers().is_empty());
    }
}
