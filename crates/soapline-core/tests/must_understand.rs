//! must-understand 校验的性质测试与场景测试。
//!
//! # 教案式说明
//! - **意图（Why）**：校验结果为空当且仅当每个强制头块都可按角色忽略、已被理解，
//!   或出现在有效注册表中；Fault 形态必须按协议版本区分；
//! - **逻辑（How）**：`proptest` 随机生成头块组合，以独立实现的判定作为对照；
//!   场景测试覆盖空注册表、寻址身份与客户端方向；
//! - **契约（What）**：所有断言只依赖公开 API。

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use soapline_core::{
    Action, AddressingVersion, CallScope, EffectiveRegistry, Element, Fault, FaultCode, Header,
    HeaderRegistry, Message, MustUnderstandFactory, PipelineTemplate, QName, RoleSet, SoapError,
    SoapVersion, codes, fault::MUST_UNDERSTAND_REASON, not_understood,
};

const W3C_NS: &str = "http://www.w3.org/2005/08/addressing";
const EXTRA_ROLE: &str = "urn:role:auditor";

fn mandatory(ns: &str, local: &str) -> Header {
    Header::new(Element::new(QName::new(ns, local))).with_must_understand(true)
}

fn echo(_call: &CallScope, request: Message) -> Result<Message, SoapError> {
    Ok(request)
}

fn server_template(version: SoapVersion, registry: HeaderRegistry) -> PipelineTemplate {
    PipelineTemplate::builder(version)
        .registry(registry)
        .stage(MustUnderstandFactory::server(RoleSet::new(version)))
        .build(echo)
}

#[derive(Clone, Debug)]
struct GenHeader {
    name: QName,
    must_understand: bool,
    role: Option<String>,
    understood: bool,
}

fn gen_name() -> impl Strategy<Value = QName> {
    (
        prop::sample::select(vec!["urn:a", "urn:b", W3C_NS]),
        prop::sample::select(vec!["A", "B", "Action", "To"]),
    )
        .prop_map(|(ns, local)| QName::new(ns, local))
}

fn gen_role(version: SoapVersion) -> impl Strategy<Value = Option<String>> {
    let mut roles = vec![
        None,
        Some(String::new()),
        Some(version.role_next().to_owned()),
        Some(EXTRA_ROLE.to_owned()),
        Some("urn:role:elsewhere".to_owned()),
    ];
    roles.extend(version.role_none().map(|r| Some(r.to_owned())));
    roles.extend(version.role_ultimate_receiver().map(|r| Some(r.to_owned())));
    prop::sample::select(roles)
}

fn gen_header(version: SoapVersion) -> impl Strategy<Value = GenHeader> {
    (gen_name(), any::<bool>(), gen_role(version), any::<bool>()).prop_map(
        |(name, must_understand, role, understood)| GenHeader {
            name,
            must_understand,
            role,
            understood,
        },
    )
}

fn gen_version() -> impl Strategy<Value = SoapVersion> {
    prop::sample::select(vec![SoapVersion::Soap11, SoapVersion::Soap12])
}

/// 与实现无关的角色判定。
fn oracle_plays(version: SoapVersion, role: Option<&str>, extra: bool) -> bool {
    match role {
        None | Some("") => true,
        Some(role) if Some(role) == version.role_none() => false,
        Some(role) if role == version.role_next() => true,
        Some(role) if Some(role) == version.role_ultimate_receiver() => true,
        Some(EXTRA_ROLE) => extra,
        Some(_) => false,
    }
}

proptest! {
    #[test]
    fn check_is_empty_iff_every_mandatory_header_is_acceptable(
        (version, headers) in gen_version().prop_flat_map(|v| (Just(v), prop::collection::vec(gen_header(v), 0..8))),
        declared in prop::collection::btree_set(gen_name(), 0..4),
        addressing in any::<bool>(),
        extra in any::<bool>(),
    ) {
        let mut roles = RoleSet::new(version);
        if extra {
            roles = roles.with_role(EXTRA_ROLE);
        }
        let registry: HeaderRegistry = declared.iter().cloned().collect();
        let addressing = addressing.then_some(AddressingVersion::W3c);
        let effective = EffectiveRegistry::new(Arc::new(registry), addressing);

        let built: Vec<Header> = headers
            .iter()
            .map(|h| {
                let mut header = Header::new(Element::new(h.name.clone()))
                    .with_must_understand(h.must_understand);
                if let Some(role) = &h.role {
                    header = header.with_role(role.clone());
                }
                if h.understood {
                    header.mark_understood();
                }
                header
            })
            .collect();

        let expected: BTreeSet<QName> = headers
            .iter()
            .filter(|h| h.must_understand && !h.understood)
            .filter(|h| oracle_plays(version, h.role.as_deref(), extra))
            .filter(|h| !declared.contains(&h.name))
            .filter(|h| !(addressing.is_some() && h.name.namespace() == W3C_NS && ["Action", "To"].contains(&h.name.local_name())))
            .map(|h| h.name.clone())
            .collect();

        let result = not_understood(&built, &roles, &effective);
        let unique: BTreeSet<QName> = result.iter().cloned().collect();
        prop_assert_eq!(unique.len(), result.len(), "结果必须去重");
        prop_assert_eq!(result.is_empty(), expected.is_empty());
        prop_assert_eq!(unique, expected);
    }
}

#[test]
fn empty_registry_rejects_unknown_mandatory_header() {
    let template = server_template(SoapVersion::Soap11, HeaderRegistry::empty());
    let mut request = Message::new(SoapVersion::Soap11);
    request.add_header(mandatory("urn:x", "Foo"));

    let mut response = template
        .clone_instance()
        .run(&CallScope::new(), request)
        .expect("Fault 以响应返回");
    assert!(response.is_fault());
    let payload = response.read_payload().expect("读取负载").expect("Fault 负载");
    let fault = Fault::parse(SoapVersion::Soap11, &payload).expect("合法 Fault");
    assert_eq!(fault.code(), FaultCode::MustUnderstand);
    assert!(fault.reason().contains(MUST_UNDERSTAND_REASON));
    assert!(fault.reason().contains("Foo"));
    assert_eq!(fault.not_understood(), &[QName::new("urn:x", "Foo")]);
}

#[test]
fn addressing_headers_are_implicitly_known() {
    let template = server_template(SoapVersion::Soap12, HeaderRegistry::empty());
    let mut request = Message::new(SoapVersion::Soap12);
    request.add_header(mandatory(W3C_NS, "Action"));
    let call = CallScope::new().with_addressing(Some(AddressingVersion::W3c));

    let response = template
        .clone_instance()
        .run(&call, request)
        .expect("调用成功");
    assert!(!response.is_fault());
    assert_eq!(response.headers().len(), 1, "请求被原样回显");
}

#[test]
fn addressing_identities_depend_on_the_call() {
    let template = server_template(SoapVersion::Soap12, HeaderRegistry::empty());
    let request = || {
        let mut message = Message::new(SoapVersion::Soap12);
        message.add_header(mandatory(W3C_NS, "Action"));
        message
    };

    let without = template
        .clone_instance()
        .run(&CallScope::new(), request())
        .expect("Fault 响应");
    assert!(without.is_fault(), "未启用寻址时 Action 不是已知头");

    let member = CallScope::new().with_addressing(Some(AddressingVersion::MemberSubmission));
    let mismatched = template
        .clone_instance()
        .run(&member, request())
        .expect("Fault 响应");
    assert!(mismatched.is_fault(), "寻址命名空间必须匹配");
}

#[test]
fn soap11_fault_reason_lists_every_offending_name() {
    let names = [QName::new("urn:x", "Foo"), QName::new("urn:y", "Bar")];
    let fault = Fault::must_understand(SoapVersion::Soap11, &names);
    for name in &names {
        assert!(fault.reason().contains(&name.to_string()));
    }
    let message = fault.into_message();
    assert!(message.headers().is_empty(), "1.1 的名字只出现在 detail 中");
}

#[test]
fn soap12_fault_has_one_header_per_offending_name() {
    let template = server_template(SoapVersion::Soap12, HeaderRegistry::empty());
    let mut request = Message::new(SoapVersion::Soap12);
    request.add_header(mandatory("urn:x", "Foo"));
    request.add_header(mandatory("urn:y", "Bar"));
    request.add_header(mandatory("urn:x", "Foo"));
    request.set_soap_action(Some("urn:op".into()));

    let response = template
        .clone_instance()
        .run(&CallScope::new(), request)
        .expect("Fault 响应");
    assert!(response.is_fault());
    assert_eq!(response.soap_action(), Some("urn:op"));

    let not_understood = SoapVersion::Soap12.qname("NotUnderstood");
    let referenced: Vec<QName> = response
        .headers()
        .iter()
        .filter(|h| h.name() == &not_understood)
        .filter_map(|h| {
            let content = h.content();
            let value = content.attribute(&QName::local("qname"))?;
            content.resolve_prefixed(value)
        })
        .collect();
    assert_eq!(
        referenced,
        vec![QName::new("urn:x", "Foo"), QName::new("urn:y", "Bar")]
    );
}

#[test]
fn declared_header_passes_and_reaches_dispatcher() {
    let registry = HeaderRegistry::builder()
        .declare(QName::new("urn:x", "Foo"))
        .build();
    let template = server_template(SoapVersion::Soap11, registry);
    let mut request = Message::new(SoapVersion::Soap11);
    request.add_header(mandatory("urn:x", "Foo"));
    let response = template
        .clone_instance()
        .run(&CallScope::new(), request)
        .expect("调用成功");
    assert!(!response.is_fault());
}

#[test]
fn client_side_raises_error_carrying_the_fault() {
    let respond = |_: &CallScope, _: Message| -> Result<Message, SoapError> {
        let mut response = Message::new(SoapVersion::Soap12);
        response.add_header(mandatory("urn:x", "Session"));
        Ok(response)
    };
    let template = PipelineTemplate::builder(SoapVersion::Soap12)
        .stage(MustUnderstandFactory::client(RoleSet::new(SoapVersion::Soap12)))
        .build(respond);

    let mut request = Message::new(SoapVersion::Soap12);
    request.add_header(mandatory("urn:x", "Outbound"));
    let err = template
        .clone_instance()
        .run(&CallScope::new(), request)
        .expect_err("响应中的未知强制头导致失败");
    assert_eq!(err.code(), codes::MUST_UNDERSTAND);
    let fault = err.fault().expect("携带 Fault");
    assert_eq!(fault.not_understood(), &[QName::new("urn:x", "Session")]);
    assert_eq!(fault.headers().len(), 1);
}

#[test]
fn stage_marking_a_header_understood_satisfies_the_check() {
    use soapline_core::{CloneStageFactory, Stage, StageDescriptor};

    #[derive(Clone)]
    struct ClaimsFoo;

    impl Stage for ClaimsFoo {
        fn process_request(&mut self, _call: &CallScope, message: &mut Message) -> Action {
            let foo = QName::new("urn:x", "Foo");
            for header in message.headers_mut() {
                if header.name() == &foo {
                    header.mark_understood();
                }
            }
            Action::Continue
        }
    }

    let template = PipelineTemplate::builder(SoapVersion::Soap11)
        .stage(CloneStageFactory::new(StageDescriptor::anonymous("claims"), ClaimsFoo))
        .stage(MustUnderstandFactory::server(RoleSet::new(SoapVersion::Soap11)))
        .build(echo);
    let mut request = Message::new(SoapVersion::Soap11);
    request.add_header(mandatory("urn:x", "Foo"));
    let response = template
        .clone_instance()
        .run(&CallScope::new(), request)
        .expect("调用成功");
    assert!(!response.is_fault());
    assert!(response.headers()[0].is_understood());
}
