//! 已知头注册表。

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::infoset::QName;
use crate::protocol::AddressingVersion;

/// 绑定层声明“已知”的头块限定名集合。
///
/// # 契约说明（What）
/// - 配置期构建，之后只读，可通过 `Arc` 在所有工作线程间无锁共享；
/// - 协议保留的寻址头不写入此集合，而是由 [`EffectiveRegistry::new`] 按调用时的
///   寻址配置临时叠加。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderRegistry {
    known: BTreeSet<QName>,
}

impl HeaderRegistry {
    /// 空注册表。
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> HeaderRegistryBuilder {
        HeaderRegistryBuilder::default()
    }

    pub fn contains(&self, name: &QName) -> bool {
        self.known.contains(name)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QName> {
        self.known.iter()
    }
}

impl FromIterator<QName> for HeaderRegistry {
    fn from_iter<I: IntoIterator<Item = QName>>(iter: I) -> Self {
        Self {
            known: iter.into_iter().collect(),
        }
    }
}

/// 注册表构建器。
#[derive(Debug, Default)]
pub struct HeaderRegistryBuilder {
    known: BTreeSet<QName>,
}

impl HeaderRegistryBuilder {
    /// 声明一个已知头。
    pub fn declare(mut self, name: QName) -> Self {
        self.known.insert(name);
        self
    }

    /// 批量声明。
    pub fn declare_all(mut self, names: impl IntoIterator<Item = QName>) -> Self {
        self.known.extend(names);
        self
    }

    pub fn build(self) -> HeaderRegistry {
        HeaderRegistry { known: self.known }
    }
}

/// 声明集合 ∪ 本次调用的保留寻址身份。
///
/// 声明集合按 `Arc` 共享，保留身份在构造时从寻址版本重新计算。
#[derive(Clone, Debug)]
pub struct EffectiveRegistry {
    declared: Arc<HeaderRegistry>,
    reserved: Vec<QName>,
}

impl EffectiveRegistry {
    pub fn new(declared: Arc<HeaderRegistry>, addressing: Option<AddressingVersion>) -> Self {
        Self {
            declared,
            reserved: addressing.map(AddressingVersion::known_headers).unwrap_or_default(),
        }
    }

    pub fn contains(&self, name: &QName) -> bool {
        self.declared.contains(name) || self.reserved.contains(name)
    }

    /// 本次调用叠加的保留身份。
    pub fn reserved(&self) -> &[QName] {
        &self.reserved
    }
}
