//! SOAP 协议版本与 WS-Addressing 头身份。

use serde::Deserialize;

use crate::infoset::QName;

/// 编解码器与 Fault 构造统一使用的信封前缀。
pub const ENVELOPE_PREFIX: &str = "S";

/// SOAP 1.1 信封命名空间。
pub const SOAP11_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
/// SOAP 1.2 信封命名空间。
pub const SOAP12_ENVELOPE_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

const SOAP11_ACTOR_NEXT: &str = "http://schemas.xmlsoap.org/soap/actor/next";
const SOAP12_ROLE_NEXT: &str = "http://www.w3.org/2003/05/soap-envelope/role/next";
const SOAP12_ROLE_NONE: &str = "http://www.w3.org/2003/05/soap-envelope/role/none";
const SOAP12_ROLE_ULTIMATE_RECEIVER: &str =
    "http://www.w3.org/2003/05/soap-envelope/role/ultimateReceiver";

/// 协议版本。
///
/// 两个版本在头属性拼写、Fault 形态与内容类型上都存在差异，这些差异必须逐一保留。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoapVersion {
    Soap11,
    Soap12,
}

impl SoapVersion {
    /// 信封命名空间。
    pub fn envelope_namespace(self) -> &'static str {
        match self {
            Self::Soap11 => SOAP11_ENVELOPE_NS,
            Self::Soap12 => SOAP12_ENVELOPE_NS,
        }
    }

    /// 根据信封命名空间识别版本。
    pub fn from_envelope_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            SOAP11_ENVELOPE_NS => Some(Self::Soap11),
            SOAP12_ENVELOPE_NS => Some(Self::Soap12),
            _ => None,
        }
    }

    /// 信封命名空间下的限定名。
    pub fn qname(self, local: &str) -> QName {
        QName::new(self.envelope_namespace(), local)
    }

    /// `mustUnderstand` 属性名。
    pub fn must_understand_attribute(self) -> QName {
        self.qname("mustUnderstand")
    }

    /// 序列化 `mustUnderstand` 为真时使用的字面量：1.1 为 `1`，1.2 为 `true`。
    pub fn must_understand_literal(self) -> &'static str {
        match self {
            Self::Soap11 => "1",
            Self::Soap12 => "true",
        }
    }

    /// 角色属性名：1.1 为 `actor`，1.2 为 `role`。
    pub fn role_attribute(self) -> QName {
        match self {
            Self::Soap11 => self.qname("actor"),
            Self::Soap12 => self.qname("role"),
        }
    }

    /// `next` 角色 URI。
    pub fn role_next(self) -> &'static str {
        match self {
            Self::Soap11 => SOAP11_ACTOR_NEXT,
            Self::Soap12 => SOAP12_ROLE_NEXT,
        }
    }

    /// 显式的最终接收者角色 URI；1.1 以缺省 actor 表示。
    pub fn role_ultimate_receiver(self) -> Option<&'static str> {
        match self {
            Self::Soap11 => None,
            Self::Soap12 => Some(SOAP12_ROLE_ULTIMATE_RECEIVER),
        }
    }

    /// `none` 角色 URI，仅 1.2 定义。
    pub fn role_none(self) -> Option<&'static str> {
        match self {
            Self::Soap11 => None,
            Self::Soap12 => Some(SOAP12_ROLE_NONE),
        }
    }

    /// Fault 元素名。
    pub fn fault_name(self) -> QName {
        self.qname("Fault")
    }
}

/// 解析 `mustUnderstand` 属性值，两个版本都接受 `1`/`true`/`0`/`false`。
pub fn parse_must_understand(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

/// WS-Addressing 命名空间版本。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressingVersion {
    /// `http://www.w3.org/2005/08/addressing`
    W3c,
    /// `http://schemas.xmlsoap.org/ws/2004/08/addressing`
    MemberSubmission,
}

/// 协议保留的寻址头本地名。
const ADDRESSING_HEADERS: [&str; 7] = [
    "Action",
    "MessageID",
    "ReplyTo",
    "FaultTo",
    "From",
    "RelatesTo",
    "To",
];

impl AddressingVersion {
    pub fn namespace(self) -> &'static str {
        match self {
            Self::W3c => "http://www.w3.org/2005/08/addressing",
            Self::MemberSubmission => "http://schemas.xmlsoap.org/ws/2004/08/addressing",
        }
    }

    /// 该版本下隐式已知的头身份。每次调用都新建，不缓存为全局常量。
    pub fn known_headers(self) -> Vec<QName> {
        ADDRESSING_HEADERS
            .iter()
            .map(|local| QName::new(self.namespace(), *local))
            .collect()
    }

    /// `Action` 头的限定名。
    pub fn action(self) -> QName {
        QName::new(self.namespace(), "Action")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_spell_header_attributes_differently() {
        assert_eq!(SoapVersion::Soap11.role_attribute().local_name(), "actor");
        assert_eq!(SoapVersion::Soap12.role_attribute().local_name(), "role");
        assert_eq!(SoapVersion::Soap11.must_understand_literal(), "1");
        assert_eq!(SoapVersion::Soap12.must_understand_literal(), "true");
    }

    #[test]
    fn envelope_namespace_identifies_version() {
        for version in [SoapVersion::Soap11, SoapVersion::Soap12] {
            assert_eq!(
                SoapVersion::from_envelope_namespace(version.envelope_namespace()),
                Some(version)
            );
        }
        assert_eq!(SoapVersion::from_envelope_namespace("urn:other"), None);
    }

    #[test]
    fn addressing_identities_follow_namespace() {
        let names = AddressingVersion::MemberSubmission.known_headers();
        assert_eq!(names.len(), 7);
        assert!(names.iter().all(|name| name.namespace()
            == "http://schemas.xmlsoap.org/ws/2004/08/addressing"));
        assert!(names.contains(&QName::new(
            "http://schemas.xmlsoap.org/ws/2004/08/addressing",
            "RelatesTo"
        )));
    }
}
