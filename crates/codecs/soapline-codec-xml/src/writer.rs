//! 信封序列化。
//!
//! 标记由 `quick_xml::Writer` 输出到池化的字节缓冲。元素使用默认命名空间声明；
//! 属性命名空间优先复用作用域内已有前缀，找不到时生成 `ans{N}` 前缀并就地声明，
//! 读取端会丢弃这类生成的声明。

use std::io::Write;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use soapline_core::infoset::XML_NAMESPACE;
use soapline_core::protocol::ENVELOPE_PREFIX;
use soapline_core::{Element, Header, Node, QName, SoapError, SoapVersion, codes};
use soapline_pool::{PoolFamily, Poolable, ResetOutcome};

/// 写入端生成的属性前缀。
pub(crate) const GENERATED_PREFIX: &str = "ans";

fn write_failed(err: impl std::error::Error + Send + Sync + 'static) -> SoapError {
    SoapError::new(codes::ENCODE, "couldn't write SOAP envelope").with_cause(err)
}

#[derive(Default)]
struct Scope {
    default_ns: String,
    prefixes: Vec<(String, String)>,
}

/// 可复用的序列化器：输出缓冲与命名空间作用域栈。
#[derive(Default)]
pub(crate) struct XmlWriter {
    out: Vec<u8>,
    scopes: Vec<Scope>,
}

impl Poolable for XmlWriter {
    const FAMILY: PoolFamily = PoolFamily::new("xml.serializer");

    fn create() -> Self {
        Self::default()
    }

    fn reset(&mut self) -> ResetOutcome {
        self.out.clear();
        self.scopes.clear();
        ResetOutcome::Ready
    }
}

impl XmlWriter {
    /// 写出完整信封并返回字节；无负载时 `Body` 为空。
    pub(crate) fn write_envelope(
        &mut self,
        version: SoapVersion,
        headers: &[Header],
        payload: Option<&Element>,
    ) -> Result<&[u8], SoapError> {
        let env_ns = version.envelope_namespace();
        self.out.clear();
        self.scopes.clear();
        self.scopes.push(Scope {
            default_ns: String::new(),
            prefixes: vec![(ENVELOPE_PREFIX.to_owned(), env_ns.to_owned())],
        });

        let mut xml = Writer::new(&mut self.out);
        xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(write_failed)?;
        let envelope = envelope_tag("Envelope");
        let mut start = BytesStart::new(envelope.as_str());
        start.push_attribute((format!("xmlns:{ENVELOPE_PREFIX}").as_str(), env_ns));
        xml.write_event(Event::Start(start)).map_err(write_failed)?;

        if !headers.is_empty() {
            open_envelope_child(&mut xml, "Header")?;
            for header in headers {
                let mut extra = Vec::with_capacity(2);
                if header.must_understand() {
                    extra.push((
                        version.must_understand_attribute(),
                        version.must_understand_literal(),
                    ));
                }
                if let Some(role) = header.role() {
                    extra.push((version.role_attribute(), role));
                }
                write_element(&mut xml, &mut self.scopes, header.content(), &extra)?;
            }
            close_envelope_child(&mut xml, "Header")?;
        }

        open_envelope_child(&mut xml, "Body")?;
        if let Some(payload) = payload {
            write_element(&mut xml, &mut self.scopes, payload, &[])?;
        }
        close_envelope_child(&mut xml, "Body")?;
        close_envelope_child(&mut xml, "Envelope")?;
        Ok(&self.out)
    }
}

fn envelope_tag(local: &str) -> String {
    format!("{ENVELOPE_PREFIX}:{local}")
}

fn open_envelope_child<W: Write>(xml: &mut Writer<W>, local: &str) -> Result<(), SoapError> {
    xml.write_event(Event::Start(BytesStart::new(envelope_tag(local))))
        .map_err(write_failed)
}

fn close_envelope_child<W: Write>(xml: &mut Writer<W>, local: &str) -> Result<(), SoapError> {
    xml.write_event(Event::End(BytesEnd::new(envelope_tag(local))))
        .map_err(write_failed)
}

fn resolve<'s>(scopes: &'s [Scope], current: &'s Scope, prefix: &str) -> Option<&'s str> {
    std::iter::once(current)
        .chain(scopes.iter().rev())
        .flat_map(|scope| scope.prefixes.iter().rev())
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri.as_str())
}

/// 查找当前仍绑定到 `uri` 的前缀。
fn prefix_for(scopes: &[Scope], current: &Scope, uri: &str) -> Option<String> {
    std::iter::once(current)
        .chain(scopes.iter().rev())
        .flat_map(|scope| scope.prefixes.iter().rev())
        .filter(|(_, bound)| bound == uri)
        .map(|(prefix, _)| prefix)
        .find(|prefix| resolve(scopes, current, prefix) == Some(uri))
        .cloned()
}

fn write_element<W: Write>(
    xml: &mut Writer<W>,
    scopes: &mut Vec<Scope>,
    element: &Element,
    extra: &[(QName, &str)],
) -> Result<(), SoapError> {
    let parent_default = scopes
        .last()
        .map(|scope| scope.default_ns.clone())
        .unwrap_or_default();
    let mut scope = Scope {
        default_ns: parent_default,
        prefixes: element.namespaces.clone(),
    };
    let local = element.name.local_name();

    let mut start = BytesStart::new(local);
    if element.name.namespace() != scope.default_ns {
        start.push_attribute(("xmlns", element.name.namespace()));
        scope.default_ns = element.name.namespace().to_owned();
    }
    for (prefix, uri) in &element.namespaces {
        start.push_attribute((format!("xmlns:{prefix}").as_str(), uri.as_str()));
    }

    let attributes = extra.iter().map(|(name, value)| (name, *value)).chain(
        element
            .attributes
            .iter()
            .map(|attr| (&attr.name, attr.value.as_str())),
    );
    for (name, value) in attributes {
        let ns = name.namespace();
        if ns.is_empty() {
            start.push_attribute((name.local_name(), value));
            continue;
        }
        let prefix = if ns == XML_NAMESPACE {
            "xml".to_owned()
        } else if let Some(prefix) = prefix_for(scopes, &scope, ns) {
            prefix
        } else {
            let mut n = 0usize;
            let generated = loop {
                let candidate = format!("{GENERATED_PREFIX}{n}");
                if resolve(scopes, &scope, &candidate).is_none() {
                    break candidate;
                }
                n += 1;
            };
            start.push_attribute((format!("xmlns:{generated}").as_str(), ns));
            scope.prefixes.push((generated.clone(), ns.to_owned()));
            generated
        };
        start.push_attribute((format!("{prefix}:{}", name.local_name()).as_str(), value));
    }

    if element.children.is_empty() {
        return xml.write_event(Event::Empty(start)).map_err(write_failed);
    }
    xml.write_event(Event::Start(start)).map_err(write_failed)?;
    scopes.push(scope);
    for child in &element.children {
        match child {
            Node::Element(el) => write_element(xml, scopes, el, &[])?,
            Node::Text(text) => xml
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(write_failed)?,
        }
    }
    scopes.pop();
    xml.write_event(Event::End(BytesEnd::new(local)))
        .map_err(write_failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_protocol_attributes_use_envelope_prefix() {
        let mut writer = XmlWriter::create();
        let header = Header::new(Element::new(QName::new("urn:x", "Foo")))
            .with_must_understand(true)
            .with_role("urn:role:a");
        let xml = writer.write_envelope(SoapVersion::Soap11, &[header], None).expect("写出信封");
        let xml = std::str::from_utf8(xml).expect("UTF-8");
        assert!(xml.contains(r#"<Foo xmlns="urn:x" S:mustUnderstand="1" S:actor="urn:role:a"/>"#));
        assert!(xml.ends_with("<S:Body></S:Body></S:Envelope>"));
    }

    #[test]
    fn foreign_attribute_namespace_gets_generated_prefix() {
        let mut writer = XmlWriter::create();
        let payload = Element::new(QName::local("item"))
            .with_attribute(QName::new("urn:attr", "kind"), "a&b")
            .with_text("x < y");
        let xml = writer.write_envelope(SoapVersion::Soap12, &[], Some(&payload)).expect("写出信封");
        let xml = std::str::from_utf8(xml).expect("UTF-8");
        assert!(xml.contains(r#"<item xmlns:ans0="urn:attr" ans0:kind="a&amp;b">x &lt; y</item>"#));
    }

    #[test]
    fn unqualified_child_resets_default_namespace() {
        let mut writer = XmlWriter::create();
        let payload = Element::new(QName::new("urn:x", "outer")).with_child(Element::new(QName::local("inner")));
        let xml = writer.write_envelope(SoapVersion::Soap11, &[], Some(&payload)).expect("写出信封");
        let xml = std::str::from_utf8(xml).expect("UTF-8");
        assert!(xml.contains(r#"<outer xmlns="urn:x"><inner xmlns=""/></outer>"#));
    }
}
