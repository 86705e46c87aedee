//! 解码边界：空正文、格式错误、版本不符、帧预算与头块属性。

use soapline_codec_xml::{SOAP11_CONTENT_TYPE, SOAP12_CONTENT_TYPE, XmlCodec};
use soapline_core::{
    Codec, CodecRegistry, ContentType, DecodeContext, Element, EncodeContext, Header, Message, QName, SoapError,
    SoapVersion, codes,
};
use soapline_pool::PoolSet;

const SOAP11_ENVELOPE: &str = r#"<?xml version="1.0"?>
<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/">
  <S:Header>
    <t:Trace xmlns:t="urn:trace" S:mustUnderstand="1" S:actor="urn:role:a">abc</t:Trace>
  </S:Header>
  <S:Body>
    <order xmlns="urn:shop"><id>42</id></order>
  </S:Body>
</S:Envelope>"#;

fn decode(codec: &mut XmlCodec, body: &[u8], content_type: &str) -> Result<Message, SoapError> {
    let mut pools = PoolSet::new();
    codec.decode(
        body,
        &ContentType::new(content_type.to_owned()),
        &mut DecodeContext::new(&mut pools),
    )
}

#[test]
fn empty_body_yields_an_empty_message() {
    for mut codec in [XmlCodec::soap11(), XmlCodec::soap12()] {
        let mut message = decode(&mut codec, b"", SOAP11_CONTENT_TYPE).expect("空正文不是错误");
        assert!(message.headers().is_empty());
        assert!(!message.has_payload());
        assert_eq!(message.read_payload().expect("无负载"), None);
    }
}

#[test]
fn envelope_headers_and_payload_are_interpreted() {
    let mut message =
        decode(&mut XmlCodec::soap11(), SOAP11_ENVELOPE.as_bytes(), SOAP11_CONTENT_TYPE).expect("合法信封");
    let header = &message.headers()[0];
    assert_eq!(header.name(), &QName::new("urn:trace", "Trace"));
    assert!(header.must_understand());
    assert_eq!(header.role(), Some("urn:role:a"));
    assert!(!header.is_understood());
    assert!(header.content().attributes.is_empty(), "协议属性已剥离");
    assert_eq!(header.content().text(), "abc");

    let payload = message.read_payload().expect("读取负载").expect("有负载");
    assert_eq!(payload.name, QName::new("urn:shop", "order"));
    assert_eq!(
        payload.child(&QName::new("urn:shop", "id")).map(Element::text),
        Some("42".to_owned())
    );
}

#[test]
fn malformed_input_is_a_message_creation_error() {
    let cases: [&[u8]; 6] = [
        b"<S:Envelope",
        b"\xff\xfe not utf-8",
        br#"<Envelope xmlns="http://schemas.xmlsoap.org/soap/envelope/"><Header/></Envelope>"#,
        br#"<order xmlns="urn:shop"/>"#,
        br#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Body><a/><b/></S:Body></S:Envelope>"#,
        br#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Header><h S:mustUnderstand="maybe"/></S:Header><S:Body/></S:Envelope>"#,
    ];
    for body in cases {
        let err = decode(&mut XmlCodec::soap11(), body, SOAP11_CONTENT_TYPE).expect_err("格式错误");
        assert_eq!(err.code(), codes::MESSAGE_CREATION, "{}", String::from_utf8_lossy(body));
    }
}

#[test]
fn foreign_envelope_namespace_is_a_version_mismatch() {
    let soap12 = r#"<S:Envelope xmlns:S="http://www.w3.org/2003/05/soap-envelope"><S:Body/></S:Envelope>"#;
    let err = decode(&mut XmlCodec::soap11(), soap12.as_bytes(), SOAP12_CONTENT_TYPE).expect_err("版本不符");
    assert_eq!(err.code(), codes::VERSION_MISMATCH);

    let unknown = r#"<S:Envelope xmlns:S="urn:not-soap"><S:Body/></S:Envelope>"#;
    let err = decode(&mut XmlCodec::soap12(), unknown.as_bytes(), SOAP12_CONTENT_TYPE).expect_err("版本不符");
    assert_eq!(err.code(), codes::VERSION_MISMATCH);
}

#[test]
fn oversized_frame_is_rejected_before_parsing() {
    let mut pools = PoolSet::new();
    let mut ctx = DecodeContext::new(&mut pools).with_max_frame_size(Some(16));
    let err = XmlCodec::soap11()
        .decode(
            SOAP11_ENVELOPE.as_bytes(),
            &ContentType::new(SOAP11_CONTENT_TYPE),
            &mut ctx,
        )
        .expect_err("超出帧预算");
    assert_eq!(err.code(), codes::BUDGET_EXCEEDED);
}

#[test]
fn soap12_headers_and_action_survive_a_round_trip() {
    let mut pools = PoolSet::new();
    let mut codec = XmlCodec::soap12();
    let mut message = Message::new(SoapVersion::Soap12);
    message.add_header(
        Header::new(Element::new(QName::new("urn:x", "Session")).with_text("s-1"))
            .with_must_understand(true)
            .with_role("http://www.w3.org/2003/05/soap-envelope/role/next"),
    );
    message.add_header(Header::new(Element::new(QName::new("urn:x", "Hint"))));
    message.set_soap_action(Some("urn:shop:order".into()));

    let encoded = codec
        .encode(&mut message, &mut EncodeContext::new(&mut pools))
        .expect("编码成功");
    let text = std::str::from_utf8(&encoded.bytes).expect("UTF-8");
    assert!(text.contains(r#"S:mustUnderstand="true""#));
    assert!(text.ends_with("<S:Body></S:Body></S:Envelope>"), "无负载只写信封骨架");
    assert_eq!(encoded.content_type.parameter("action").as_deref(), Some("urn:shop:order"));

    let decoded = codec
        .decode(&encoded.bytes, &encoded.content_type, &mut DecodeContext::new(&mut pools))
        .expect("解码成功");
    assert_eq!(decoded.soap_action(), Some("urn:shop:order"));
    assert_eq!(decoded.headers().len(), 2);
    assert!(decoded.headers()[0].must_understand());
    assert_eq!(
        decoded.headers()[0].role(),
        Some("http://www.w3.org/2003/05/soap-envelope/role/next")
    );
    assert!(!decoded.headers()[1].must_understand());
    assert_eq!(decoded.headers()[1].role(), None);
}

#[test]
fn multipart_without_start_uses_the_first_part() {
    let body = concat!(
        "--b\r\n",
        "Content-Type: text/xml; charset=utf-8\r\n",
        "\r\n",
        r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Body><ping/></S:Body></S:Envelope>"#,
        "\r\n--b\r\n",
        "Content-Type: text/plain\r\n",
        "Content-ID: <note@example>\r\n",
        "\r\n",
        "hello\r\n",
        "--b--\r\n"
    );
    let message = decode(
        &mut XmlCodec::soap11(),
        body.as_bytes(),
        "multipart/related; type=\"text/xml\"; boundary=b",
    )
    .expect("合法多部件");
    assert_eq!(message.peek_payload_name(), Some(&QName::local("ping")));
    let note = message.attachments().get("note@example").expect("附件");
    assert_eq!(note.content_type, "text/plain");
    assert_eq!(&note.data[..], b"hello");
}

#[test]
fn registry_negotiates_by_media_type_and_multipart_root() {
    let mut registry = CodecRegistry::new();
    registry.register(Box::new(XmlCodec::soap11()));
    registry.register(Box::new(XmlCodec::soap12()));

    let codec = registry
        .negotiate(&ContentType::new("Application/SOAP+xml; charset=utf-8; action=\"urn:op\""))
        .expect("SOAP 1.2 内容类型");
    assert_eq!(codec.descriptor().version(), SoapVersion::Soap12);

    let codec = registry
        .negotiate(&ContentType::new(
            "multipart/related; type=\"text/xml\"; boundary=\"b\"; start=\"<rootpart@soapline>\"",
        ))
        .expect("按根部件类型匹配");
    assert_eq!(codec.descriptor().version(), SoapVersion::Soap11);

    let Err(err) = registry.negotiate(&ContentType::new("application/json")) else {
        panic!("未注册的类型不应协商成功");
    };
    assert_eq!(err.code(), codes::UNSUPPORTED_CONTENT_TYPE);
    assert_eq!(registry.descriptors().count(), 2);
}
