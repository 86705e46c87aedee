//! must-understand 阶段。
//!
//! # 算法（How）
//! 对入站消息中每个 `mustUnderstand` 为真的头块：
//! 1. 已被其他阶段标记为理解的，跳过；
//! 2. 目标角色不是本端点扮演的角色（可忽略）的，跳过；
//! 3. 不在有效注册表（声明集合 ∪ 本次调用的寻址身份）中的，记入结果。
//!
//! 结果按出现顺序去重。服务端以 [`Action::ReturnWith`] 直接返回 Fault 消息；
//! 客户端在响应方向检查，违规时以 [`Action::Fail`] 抛出携带同一 Fault 的错误。

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SoapError;
use crate::fault::Fault;
use crate::infoset::QName;
use crate::message::{Header, Message};
use crate::pipeline::{Action, CallScope, Stage, StageDescriptor, StageFactory, TemplateShared};
use crate::protocol::SoapVersion;
use crate::registry::{EffectiveRegistry, HeaderRegistry};

/// 阶段所在的一侧。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// 检查入站请求，违规时返回 Fault 响应。
    Server,
    /// 检查入站响应，违规时让调用失败。
    Client,
}

/// 端点扮演的角色集合。
///
/// # 契约说明（What）
/// - SOAP 1.1：扮演 `next` 与最终接收者（未声明或空 actor）；
/// - SOAP 1.2：扮演 `next` 与 `ultimateReceiver`，永不扮演 `none`；
/// - 另加配置的额外角色 URI。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleSet {
    version: SoapVersion,
    extra: BTreeSet<String>,
}

impl RoleSet {
    pub fn new(version: SoapVersion) -> Self {
        Self {
            version,
            extra: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.extra.insert(role.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    /// 端点是否扮演该角色。
    pub fn plays(&self, role: Option<&str>) -> bool {
        let Some(role) = role.filter(|role| !role.is_empty()) else {
            return true;
        };
        if self.version.role_none() == Some(role) {
            return false;
        }
        role == self.version.role_next()
            || self.version.role_ultimate_receiver() == Some(role)
            || self.extra.contains(role)
    }

    /// 头块是否因角色而可忽略。
    pub fn is_ignorable(&self, header: &Header) -> bool {
        !self.plays(header.role())
    }
}

/// 找出未被理解的强制头块名，按出现顺序去重。
///
/// 结果为空当且仅当每个强制头块都已理解、可按角色忽略，或位于有效注册表中。
pub fn not_understood(headers: &[Header], roles: &RoleSet, known: &EffectiveRegistry) -> Vec<QName> {
    let mut offending: Vec<QName> = Vec::new();
    for header in headers {
        if !header.must_understand() || header.is_understood() || roles.is_ignorable(header) {
            continue;
        }
        if known.contains(header.name()) || offending.contains(header.name()) {
            continue;
        }
        offending.push(header.name().clone());
    }
    offending
}

#[derive(Debug)]
struct MustUnderstandShared {
    roles: RoleSet,
    side: Side,
}

/// must-understand 阶段工厂，通常放在模板首位。
pub struct MustUnderstandFactory {
    shared: Arc<MustUnderstandShared>,
}

impl MustUnderstandFactory {
    pub fn new(roles: RoleSet, side: Side) -> Self {
        Self {
            shared: Arc::new(MustUnderstandShared { roles, side }),
        }
    }

    /// 服务端阶段。
    pub fn server(roles: RoleSet) -> Self {
        Self::new(roles, Side::Server)
    }

    /// 客户端阶段。
    pub fn client(roles: RoleSet) -> Self {
        Self::new(roles, Side::Client)
    }
}

impl StageFactory for MustUnderstandFactory {
    fn descriptor(&self) -> StageDescriptor {
        StageDescriptor::new(
            "soapline.must_understand",
            "protocol",
            "rejects mandatory headers that no stage or binding understands",
        )
    }

    fn instantiate(&self, shared: &TemplateShared) -> Box<dyn Stage> {
        Box::new(MustUnderstandStage {
            shared: Arc::clone(&self.shared),
            registry: Arc::clone(shared.registry()),
            version: shared.version(),
            effective: None,
        })
    }
}

/// 单次调用的阶段实例。
///
/// `effective` 是逐调用暂存：首次检查时由调用的寻址配置计算，之后复用。
struct MustUnderstandStage {
    shared: Arc<MustUnderstandShared>,
    registry: Arc<HeaderRegistry>,
    version: SoapVersion,
    effective: Option<EffectiveRegistry>,
}

impl MustUnderstandStage {
    fn check(&mut self, call: &CallScope, message: &Message) -> Option<Fault> {
        let registry = &self.registry;
        let effective = self
            .effective
            .get_or_insert_with(|| EffectiveRegistry::new(Arc::clone(registry), call.addressing()));
        let names = not_understood(message.headers(), &self.shared.roles, effective);
        if names.is_empty() {
            debug!(headers = message.headers().len(), "all mandatory headers understood");
            return None;
        }
        let listed = names.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        warn!(
            side = ?self.shared.side,
            not_understood = %listed,
            "mandatory headers not understood"
        );
        Some(
            Fault::must_understand(self.version, &names)
                .with_action(message.soap_action().map(str::to_owned)),
        )
    }
}

impl Stage for MustUnderstandStage {
    fn process_request(&mut self, call: &CallScope, message: &mut Message) -> Action {
        if self.shared.side != Side::Server {
            return Action::Continue;
        }
        match self.check(call, message) {
            Some(fault) => Action::ReturnWith(fault.into_message()),
            None => Action::Continue,
        }
    }

    fn process_response(&mut self, call: &CallScope, message: &mut Message) -> Action {
        if self.shared.side != Side::Client {
            return Action::Continue;
        }
        match self.check(call, message) {
            Some(fault) => Action::Fail(SoapError::must_understand(fault)),
            None => Action::Continue,
        }
    }
}
