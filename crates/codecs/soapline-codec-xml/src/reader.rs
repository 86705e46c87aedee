//! 信封解析。
//!
//! `quick_xml::NsReader` 负责词法层与命名空间解析，本模块只维护打开中的元素栈，
//! 随后把元素树解释为 [`Message`]：`Header` 子元素去掉协议属性后成为 [`Header`]，
//! `Body` 的唯一子元素成为负载。

use quick_xml::NsReader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, PrefixDeclaration, ResolveResult};
use soapline_core::infoset::XML_NAMESPACE;
use soapline_core::protocol::parse_must_understand;
use soapline_core::{Attribute, Element, Header, Message, Node, QName, SoapError, SoapVersion, codes};
use soapline_pool::{PoolFamily, Poolable, ResetOutcome};

use crate::writer::GENERATED_PREFIX;

fn malformed(detail: impl Into<String>) -> SoapError {
    SoapError::new(
        codes::MESSAGE_CREATION,
        format!("couldn't create SOAP message: {}", detail.into()),
    )
}

fn is_generated_prefix(prefix: &str) -> bool {
    prefix
        .strip_prefix(GENERATED_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

fn utf8<'b>(bytes: &'b [u8], what: &str) -> Result<&'b str, SoapError> {
    std::str::from_utf8(bytes).map_err(|err| malformed(format!("{what} is not UTF-8")).with_cause(err))
}

/// 解析结果转换为命名空间 URI；未绑定即空命名空间。
fn namespace_of(resolved: ResolveResult<'_>) -> Result<String, SoapError> {
    match resolved {
        ResolveResult::Bound(Namespace(uri)) => utf8(uri, "namespace URI").map(str::to_owned),
        ResolveResult::Unbound => Ok(String::new()),
        ResolveResult::Unknown(prefix) if prefix == b"xml" => Ok(XML_NAMESPACE.to_owned()),
        ResolveResult::Unknown(prefix) => Err(malformed(format!(
            "undeclared namespace prefix `{}`",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

/// 可复用的解析器：打开中的元素栈。
#[derive(Default)]
pub(crate) struct XmlParser {
    stack: Vec<Element>,
}

impl Poolable for XmlParser {
    const FAMILY: PoolFamily = PoolFamily::new("xml.parser");

    fn create() -> Self {
        Self::default()
    }

    fn reset(&mut self) -> ResetOutcome {
        self.stack.clear();
        ResetOutcome::Ready
    }
}

impl XmlParser {
    /// 把文档解析为元素树。
    pub(crate) fn parse_document(&mut self, text: &str, max_depth: usize) -> Result<Element, SoapError> {
        self.stack.clear();
        let mut reader = NsReader::from_str(text);
        let mut root = None;
        loop {
            let event = reader
                .read_event()
                .map_err(|err| malformed(format!("at byte {}", reader.buffer_position())).with_cause(err))?;
            match event {
                Event::Start(start) => {
                    let element = open(&reader, &start)?;
                    self.stack.push(element);
                    if self.stack.len() > max_depth {
                        return Err(malformed(format!("element nesting exceeds {max_depth}")));
                    }
                }
                Event::Empty(start) => {
                    if self.stack.len() >= max_depth {
                        return Err(malformed(format!("element nesting exceeds {max_depth}")));
                    }
                    let element = open(&reader, &start)?;
                    self.attach(element, &mut root)?;
                }
                Event::End(_) => {
                    let mut element = self
                        .stack
                        .pop()
                        .ok_or_else(|| malformed("unbalanced end tag"))?;
                    element
                        .children
                        .retain(|node| !matches!(node, Node::Text(text) if text.trim().is_empty()));
                    self.attach(element, &mut root)?;
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|err| malformed("invalid character reference").with_cause(err))?;
                    self.push_text(&text)?;
                }
                Event::CData(data) => {
                    let text = utf8(&data, "CDATA")?.to_owned();
                    self.push_text(&text)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }
        if !self.stack.is_empty() {
            return Err(malformed("unexpected end of document"));
        }
        root.ok_or_else(|| malformed("document has no root element"))
    }

    fn attach(&mut self, element: Element, root: &mut Option<Element>) -> Result<(), SoapError> {
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(Node::Element(element));
                Ok(())
            }
            None if root.is_none() => {
                *root = Some(element);
                Ok(())
            }
            None => Err(malformed("document has more than one root element")),
        }
    }

    fn push_text(&mut self, text: &str) -> Result<(), SoapError> {
        let Some(parent) = self.stack.last_mut() else {
            return if text.trim().is_empty() {
                Ok(())
            } else {
                Err(malformed("character content outside the root element"))
            };
        };
        match parent.children.last_mut() {
            Some(Node::Text(existing)) => existing.push_str(text),
            _ => parent.children.push(Node::Text(text.to_owned())),
        }
        Ok(())
    }
}

/// 用读取器当前的命名空间绑定解析开始标签。
fn open(reader: &NsReader<&[u8]>, start: &BytesStart<'_>) -> Result<Element, SoapError> {
    let (resolved, local) = reader.resolve_element(start.name());
    let mut element = Element::new(QName::new(namespace_of(resolved)?, utf8(local.as_ref(), "element name")?));
    for attr in start.attributes() {
        let attr = attr.map_err(|err| malformed("invalid attribute").with_cause(err))?;
        match attr.key.as_namespace_binding() {
            Some(PrefixDeclaration::Named(prefix)) => {
                let prefix = utf8(prefix, "namespace prefix")?;
                if !is_generated_prefix(prefix) {
                    let uri = utf8(&attr.value, "namespace URI")?;
                    element.namespaces.push((prefix.to_owned(), uri.to_owned()));
                }
                continue;
            }
            Some(PrefixDeclaration::Default) => continue,
            None => {}
        }
        let (resolved, local) = reader.resolve_attribute(attr.key);
        let name = QName::new(namespace_of(resolved)?, utf8(local.as_ref(), "attribute name")?);
        let value = attr
            .unescape_value()
            .map_err(|err| malformed("invalid attribute value").with_cause(err))?
            .into_owned();
        element.attributes.push(Attribute { name, value });
    }
    Ok(element)
}

/// 把信封元素树解释为消息。
pub(crate) fn envelope_to_message(version: SoapVersion, envelope: Element) -> Result<Message, SoapError> {
    if envelope.name.local_name() != "Envelope" {
        return Err(malformed(format!(
            "expected an Envelope element, found {}",
            envelope.name
        )));
    }
    if SoapVersion::from_envelope_namespace(envelope.name.namespace()) != Some(version) {
        return Err(SoapError::new(
            codes::VERSION_MISMATCH,
            format!(
                "expected envelope namespace {}, found `{}`",
                version.envelope_namespace(),
                envelope.name.namespace()
            ),
        ));
    }

    let header_name = version.qname("Header");
    let body_name = version.qname("Body");
    let mut message = Message::new(version);
    let mut body = None;
    for node in envelope.children {
        let Node::Element(child) = node else {
            continue;
        };
        if child.name == header_name && body.is_none() {
            for block in child.children {
                if let Node::Element(block) = block {
                    message.add_header(header_from_element(version, block)?);
                }
            }
        } else if child.name == body_name && body.is_none() {
            body = Some(child);
        } else {
            return Err(malformed(format!("unexpected envelope child {}", child.name)));
        }
    }

    let body = body.ok_or_else(|| malformed("envelope has no Body"))?;
    let mut entries = body.children.into_iter().filter_map(|node| match node {
        Node::Element(el) => Some(el),
        Node::Text(_) => None,
    });
    let payload = entries.next();
    if entries.next().is_some() {
        return Err(malformed("Body carries more than one payload element"));
    }
    message.set_payload(payload);
    Ok(message)
}

fn header_from_element(version: SoapVersion, mut block: Element) -> Result<Header, SoapError> {
    let must_understand = match block.take_attribute(&version.must_understand_attribute()) {
        Some(value) => parse_must_understand(&value)
            .ok_or_else(|| malformed(format!("invalid mustUnderstand value `{value}`")))?,
        None => false,
    };
    let role = block.take_attribute(&version.role_attribute());
    let mut header = Header::new(block).with_must_understand(must_understand);
    if let Some(role) = role {
        header = header.with_role(role);
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Element, SoapError> {
        XmlParser::create().parse_document(text, 64)
    }

    #[test]
    fn namespaces_are_resolved_and_generated_prefixes_dropped() {
        let doc = r#"<a:root xmlns:a="urn:a" xmlns:ans3="urn:g" xmlns:keep="urn:k" ans3:x="1" keep:y="2"><child/></a:root>"#;
        let root = parse(doc).expect("合法文档");
        assert_eq!(root.name, QName::new("urn:a", "root"));
        assert_eq!(root.namespaces, vec![("a".to_owned(), "urn:a".to_owned()), ("keep".to_owned(), "urn:k".to_owned())]);
        assert_eq!(root.attribute(&QName::new("urn:g", "x")), Some("1"));
        assert_eq!(root.attribute(&QName::new("urn:k", "y")), Some("2"));
        let child = root.child_elements().next().expect("子元素");
        assert_eq!(child.name, QName::local("child"));
    }

    #[test]
    fn whitespace_only_text_is_dropped_and_text_is_merged() {
        let root = parse("<r>\n  <i>a &amp; <![CDATA[b]]></i>\n</r>").expect("合法文档");
        assert_eq!(root.children.len(), 1);
        let item = root.child_elements().next().expect("子元素");
        assert_eq!(item.text(), "a & b");
    }

    #[test]
    fn structural_errors_are_message_creation_failures() {
        for doc in ["<a><b></a>", "<a>", "", "<p:a/>", "<a/><b/>"] {
            let err = parse(doc).expect_err(doc);
            assert_eq!(err.code(), codes::MESSAGE_CREATION, "{doc}");
        }
    }

    #[test]
    fn depth_limit_is_enforced() {
        let err = XmlParser::create()
            .parse_document("<a><b><c/></b></a>", 2)
            .expect_err("超过深度");
        assert_eq!(err.code(), codes::MESSAGE_CREATION);
    }
}
