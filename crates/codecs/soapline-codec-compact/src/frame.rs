//! 消息与帧之间的转换。
//!
//! 帧体依次为：头块计数与各头块（标志字节、可选角色、元素）、负载存在标志与负载、
//! SOAP action 存在标志与字符串、附件计数与各附件。元素按名字、命名空间声明、属性、子节点的顺序写出。

use bytes::BytesMut;
use soapline_core::{
    Attachment, Element, Header, Message, Node, QName, SoapError, SoapVersion, codes,
};

use crate::vocabulary::Vocabulary;
use crate::wire::{
    REF_INDEX_BASE, REF_LITERAL, REF_LITERAL_INSERT, WireReader, malformed, put_bytes, put_str,
    put_varint,
};

const HEADER_MUST_UNDERSTAND: u8 = 0b01;
const HEADER_HAS_ROLE: u8 = 0b10;

const NODE_ELEMENT: u8 = 0;
const NODE_TEXT: u8 = 1;

fn overflow(table: &str) -> SoapError {
    SoapError::new(
        codes::VOCABULARY_OVERFLOW,
        format!("peer inserted into the {table} table beyond the local vocabulary limits"),
    )
}

/// 写出帧体；调用方负责魔数与标志字节。
pub(crate) struct FrameWriter<'v> {
    vocabulary: &'v mut Vocabulary,
    out: &'v mut BytesMut,
}

impl<'v> FrameWriter<'v> {
    pub(crate) fn new(vocabulary: &'v mut Vocabulary, out: &'v mut BytesMut) -> Self {
        Self { vocabulary, out }
    }

    /// 写出整条消息；负载在头块之后读取，因此读取失败时词表中可能已有本条消息插入的条目。
    pub(crate) fn message(&mut self, message: &mut Message) -> Result<(), SoapError> {
        put_varint(self.out, message.headers().len() as u64);
        for header in message.headers() {
            self.header(header);
        }

        match message.read_payload()? {
            Some(payload) => {
                self.out.extend_from_slice(&[1]);
                self.element(&payload);
            }
            None => self.out.extend_from_slice(&[0]),
        }

        match message.soap_action() {
            Some(action) => {
                self.out.extend_from_slice(&[1]);
                put_str(self.out, action);
            }
            None => self.out.extend_from_slice(&[0]),
        }

        put_varint(self.out, message.attachments().len() as u64);
        for (content_id, attachment) in message.attachments().iter() {
            put_str(self.out, content_id);
            put_str(self.out, &attachment.content_type);
            put_bytes(self.out, &attachment.data);
        }
        Ok(())
    }

    fn header(&mut self, header: &Header) {
        let mut flags = 0;
        if header.must_understand() {
            flags |= HEADER_MUST_UNDERSTAND;
        }
        if header.role().is_some() {
            flags |= HEADER_HAS_ROLE;
        }
        self.out.extend_from_slice(&[flags]);
        if let Some(role) = header.role() {
            self.value(role);
        }
        self.element(header.content());
    }

    fn element(&mut self, element: &Element) {
        self.name(&element.name);
        put_varint(self.out, element.namespaces.len() as u64);
        for (prefix, uri) in &element.namespaces {
            self.value(prefix);
            self.value(uri);
        }
        put_varint(self.out, element.attributes.len() as u64);
        for attribute in &element.attributes {
            self.name(&attribute.name);
            self.value(&attribute.value);
        }
        put_varint(self.out, element.children.len() as u64);
        for child in &element.children {
            match child {
                Node::Element(child) => {
                    self.out.extend_from_slice(&[NODE_ELEMENT]);
                    self.element(child);
                }
                Node::Text(text) => {
                    self.out.extend_from_slice(&[NODE_TEXT]);
                    self.value(text);
                }
            }
        }
    }

    fn name(&mut self, name: &QName) {
        if let Some(idx) = self.vocabulary.lookup_name(name) {
            put_varint(self.out, idx as u64 + REF_INDEX_BASE);
            return;
        }
        let marker = if self.vocabulary.insert_name(name.clone()) {
            REF_LITERAL_INSERT
        } else {
            REF_LITERAL
        };
        put_varint(self.out, marker);
        put_str(self.out, name.namespace());
        put_str(self.out, name.local_name());
    }

    fn value(&mut self, value: &str) {
        if let Some(idx) = self.vocabulary.lookup_value(value) {
            put_varint(self.out, idx as u64 + REF_INDEX_BASE);
            return;
        }
        let inserted =
            self.vocabulary.value_eligible(value) && self.vocabulary.insert_value(value.to_owned());
        put_varint(self.out, if inserted { REF_LITERAL_INSERT } else { REF_LITERAL });
        put_str(self.out, value);
    }
}

enum Reference {
    Literal { insert: bool },
    Index(usize),
}

/// 读取帧体；魔数与标志字节已由调用方消费。
pub(crate) struct FrameReader<'a, 'v> {
    wire: WireReader<'a>,
    vocabulary: &'v mut Vocabulary,
    max_depth: usize,
}

impl<'a, 'v> FrameReader<'a, 'v> {
    pub(crate) fn new(wire: WireReader<'a>, vocabulary: &'v mut Vocabulary, max_depth: usize) -> Self {
        Self {
            wire,
            vocabulary,
            max_depth,
        }
    }

    pub(crate) fn message(mut self, version: SoapVersion) -> Result<Message, SoapError> {
        let mut message = Message::new(version);
        let header_count = self.wire.length()?;
        for _ in 0..header_count {
            let header = self.header()?;
            message.add_header(header);
        }

        if self.flag()? {
            let payload = self.element(1)?;
            message.set_payload(Some(payload));
        }
        if self.flag()? {
            message.set_soap_action(Some(self.wire.str()?.to_owned()));
        }

        let attachment_count = self.wire.length()?;
        for _ in 0..attachment_count {
            let content_id = self.wire.str()?.to_owned();
            let content_type = self.wire.str()?.to_owned();
            let data = self.wire.bytes()?.to_vec();
            message
                .attachments_mut()
                .insert(content_id, Attachment::new(content_type, data));
        }

        if !self.wire.is_exhausted() {
            return Err(malformed("trailing bytes after compact frame"));
        }
        Ok(message)
    }

    fn flag(&mut self) -> Result<bool, SoapError> {
        match self.wire.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(malformed(format!("invalid presence flag {other}"))),
        }
    }

    fn header(&mut self) -> Result<Header, SoapError> {
        let flags = self.wire.u8()?;
        if flags & !(HEADER_MUST_UNDERSTAND | HEADER_HAS_ROLE) != 0 {
            return Err(malformed(format!("invalid header flags {flags:#04x}")));
        }
        let role = if flags & HEADER_HAS_ROLE != 0 {
            Some(self.value()?)
        } else {
            None
        };
        let content = self.element(1)?;
        let mut header =
            Header::new(content).with_must_understand(flags & HEADER_MUST_UNDERSTAND != 0);
        if let Some(role) = role {
            header = header.with_role(role);
        }
        Ok(header)
    }

    fn element(&mut self, depth: usize) -> Result<Element, SoapError> {
        if depth > self.max_depth {
            return Err(malformed(format!("element nesting exceeds {}", self.max_depth)));
        }
        let mut element = Element::new(self.name()?);
        let namespace_count = self.wire.length()?;
        for _ in 0..namespace_count {
            let prefix = self.value()?;
            let uri = self.value()?;
            element.namespaces.push((prefix, uri));
        }
        let attribute_count = self.wire.length()?;
        for _ in 0..attribute_count {
            let name = self.name()?;
            let value = self.value()?;
            element = element.with_attribute(name, value);
        }
        let child_count = self.wire.length()?;
        for _ in 0..child_count {
            match self.wire.u8()? {
                NODE_ELEMENT => {
                    let child = self.element(depth + 1)?;
                    element.children.push(Node::Element(child));
                }
                NODE_TEXT => {
                    let text = self.value()?;
                    element.children.push(Node::Text(text));
                }
                other => return Err(malformed(format!("invalid node tag {other}"))),
            }
        }
        Ok(element)
    }

    fn reference(&mut self) -> Result<Reference, SoapError> {
        match self.wire.varint()? {
            REF_LITERAL => Ok(Reference::Literal { insert: false }),
            REF_LITERAL_INSERT => Ok(Reference::Literal { insert: true }),
            reference => usize::try_from(reference - REF_INDEX_BASE)
                .map(Reference::Index)
                .map_err(|_| malformed(format!("reference {reference} out of range"))),
        }
    }

    fn name(&mut self) -> Result<QName, SoapError> {
        match self.reference()? {
            Reference::Index(idx) => self
                .vocabulary
                .name(idx)
                .cloned()
                .ok_or_else(|| malformed(format!("unknown name reference {idx}"))),
            Reference::Literal { insert } => {
                let namespace = self.wire.str()?;
                let local = self.wire.str()?;
                let name = QName::new(namespace, local);
                if insert && !self.vocabulary.insert_name(name.clone()) {
                    return Err(overflow("names"));
                }
                Ok(name)
            }
        }
    }

    fn value(&mut self) -> Result<String, SoapError> {
        match self.reference()? {
            Reference::Index(idx) => self
                .vocabulary
                .value(idx)
                .map(str::to_owned)
                .ok_or_else(|| malformed(format!("unknown value reference {idx}"))),
            Reference::Literal { insert } => {
                let value = self.wire.str()?.to_owned();
                if insert && !self.vocabulary.insert_value(value.clone()) {
                    return Err(overflow("values"));
                }
                Ok(value)
            }
        }
    }
}
