//! 限定名与元素树。
//!
//! 编解码器与 must-understand 阶段只需要一个极简的信息集：元素、属性、带前缀的命名空间声明
//! 以及文本节点。完整 DOM 属于外部协作方，不在此实现。

use std::fmt;

/// XML 保留的 `xml:` 前缀所绑定的命名空间。
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// 命名空间限定名。
///
/// `Display` 采用 `{namespace}local` 记法，命名空间为空时只输出本地名。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QName {
    namespace: String,
    local: String,
}

impl QName {
    /// 构造限定名。
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    /// 无命名空间的名字。
    pub fn local(local: impl Into<String>) -> Self {
        Self::new(String::new(), local)
    }

    /// 命名空间 URI，可能为空。
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 本地名。
    pub fn local_name(&self) -> &str {
        &self.local
    }

    /// 解析 `{namespace}local` 或裸 `local` 记法。
    ///
    /// 返回 `None` 的情形：大括号不闭合、本地名为空，或本地名含有 `:`、空白、大括号。
    pub fn parse_clark(text: &str) -> Option<Self> {
        let (namespace, local) = match text.strip_prefix('{') {
            Some(rest) => {
                let end = rest.find('}')?;
                (&rest[..end], &rest[end + 1..])
            }
            None => ("", text),
        };
        let valid = !local.is_empty()
            && !local
                .chars()
                .any(|c| c == ':' || c == '{' || c == '}' || c.is_whitespace());
        valid.then(|| Self::new(namespace, local))
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

/// 元素属性。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

/// 元素的子节点。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// 元素。
///
/// # 契约说明（What）
/// - `namespaces` 只保存带前缀的命名空间声明（例如 `qname` 属性值引用的前缀）；
///   元素自身与属性的命名空间由 [`QName`] 表达，序列化时按需生成声明；
/// - 子节点保持文档顺序。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    pub namespaces: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    /// 构造空元素。
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
            children: Vec::new(),
        }
    }

    /// 追加属性。
    pub fn with_attribute(mut self, name: QName, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            name,
            value: value.into(),
        });
        self
    }

    /// 追加带前缀的命名空间声明。
    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.push((prefix.into(), uri.into()));
        self
    }

    /// 追加子元素。
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    /// 追加文本。
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// 查找属性值。
    pub fn attribute(&self, name: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| &attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    /// 移除并返回属性值。
    pub fn take_attribute(&mut self, name: &QName) -> Option<String> {
        let idx = self.attributes.iter().position(|attr| &attr.name == name)?;
        Some(self.attributes.remove(idx).value)
    }

    /// 子元素迭代器。
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    /// 第一个名字匹配的子元素。
    pub fn child(&self, name: &QName) -> Option<&Element> {
        self.child_elements().find(|el| &el.name == name)
    }

    /// 直接文本子节点的拼接。
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// 按声明解析 `prefix:local` 形式的属性值。
    pub fn resolve_prefixed(&self, value: &str) -> Option<QName> {
        let (prefix, local) = value.split_once(':')?;
        self.namespaces
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| QName::new(uri.clone(), local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clark_notation_round_trips_through_display() {
        let name = QName::parse_clark("{urn:x}Foo").expect("合法记法");
        assert_eq!(name, QName::new("urn:x", "Foo"));
        assert_eq!(name.to_string(), "{urn:x}Foo");
        assert_eq!(QName::parse_clark("Bar"), Some(QName::local("Bar")));
    }

    #[test]
    fn clark_notation_rejects_malformed_names() {
        for bad in ["", "{urn:x", "{urn:x}", "{urn:x}a:b", "a b"] {
            assert!(QName::parse_clark(bad).is_none(), "{bad} 应被拒绝");
        }
    }

    #[test]
    fn prefixed_values_resolve_against_local_declarations() {
        let el = Element::new(QName::local("NotUnderstood"))
            .with_namespace("ns1", "urn:x")
            .with_attribute(QName::local("qname"), "ns1:Foo");
        let value = el.attribute(&QName::local("qname")).expect("属性存在");
        assert_eq!(el.resolve_prefixed(value), Some(QName::new("urn:x", "Foo")));
        assert_eq!(el.resolve_prefixed("ns2:Foo"), None);
    }
}
