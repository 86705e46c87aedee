//! 阶段链、模板与逐调用实例。
//!
//! # 执行模型（How）
//! - [`PipelineTemplate`] 由有序的 [`StageFactory`] 组成，构建后只读，通过 `Arc` 共享；
//! - 每个调用执行 [`PipelineTemplate::clone_instance`]，得到私有的 [`PipelineInstance`]，
//!   其中每个阶段都是新实例：不可变配置按引用共享，暂存状态各自独立；
//! - 正向遍历依次调用 `process_request`，到达终点后交给 [`Dispatcher`]，再逆序调用
//!   `process_response`；
//! - 阶段返回 [`Action::ReturnWith`] 时跳过剩余正向阶段与分派，逆向遍历从该阶段之前的
//!   阶段开始；[`Action::Fail`] 立即终止并以 `Err` 返回。

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, debug_span};

use crate::error::{SoapError, codes};
use crate::infoset::QName;
use crate::message::Message;
use crate::protocol::{AddressingVersion, SoapVersion};
use crate::registry::HeaderRegistry;

/// 阶段对一次处理的裁决。
#[derive(Debug)]
pub enum Action {
    /// 交给下一个阶段。
    Continue,
    /// 终止正向遍历，以给定消息作为响应开始逆向遍历（逆向遍历中则替换当前响应）。
    ReturnWith(Message),
    /// 终止整个调用，作为硬错误交给传输层。
    Fail(SoapError),
}

impl Action {
    /// 以 [`codes::STAGE_FAILED`] 终止调用，`stage` 写入错误描述便于定位。
    pub fn fail(stage: &str, reason: impl fmt::Display) -> Self {
        Action::Fail(SoapError::new(
            codes::STAGE_FAILED,
            format!("stage `{stage}` rejected the call: {reason}"),
        ))
    }
}

/// 阶段描述信息，用于日志与诊断。
///
/// # 契约说明（What）
/// - `name`：稳定标识，建议使用 `vendor.component` 命名；
/// - `category`：分类，如 `protocol`、`security`、`app`；
/// - `summary`：人类可读描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageDescriptor {
    name: Cow<'static, str>,
    category: Cow<'static, str>,
    summary: Cow<'static, str>,
}

impl StageDescriptor {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        category: impl Into<Cow<'static, str>>,
        summary: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            summary: summary.into(),
        }
    }

    /// 匿名描述，常用于测试。
    pub fn anonymous(stage: impl Into<Cow<'static, str>>) -> Self {
        let stage = stage.into();
        Self {
            name: Cow::Owned(format!("anonymous.{stage}")),
            category: Cow::Borrowed("unspecified"),
            summary: Cow::Owned(format!("auto-generated descriptor for {stage}")),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }
}

/// 单次调用内的阶段实例。
///
/// 实例只被一个工作线程持有，方法因此接收 `&mut self`，暂存字段无需加锁。
pub trait Stage: Send {
    /// 处理请求（正向遍历）。
    fn process_request(&mut self, call: &CallScope, message: &mut Message) -> Action;

    /// 处理响应（逆向遍历），默认放行。
    fn process_response(&mut self, call: &CallScope, message: &mut Message) -> Action {
        let _ = (call, message);
        Action::Continue
    }
}

/// 模板构建期可见的共享配置。
#[derive(Debug)]
pub struct TemplateShared {
    version: SoapVersion,
    registry: Arc<HeaderRegistry>,
}

impl TemplateShared {
    pub fn version(&self) -> SoapVersion {
        self.version
    }

    /// 折叠了全部阶段声明后的已知头注册表。
    pub fn registry(&self) -> &Arc<HeaderRegistry> {
        &self.registry
    }

    #[cfg(test)]
    pub(crate) fn for_tests(version: SoapVersion) -> Self {
        Self {
            version,
            registry: Arc::new(HeaderRegistry::empty()),
        }
    }
}

/// 阶段工厂：模板中保存的是工厂，每次克隆都调用 [`StageFactory::instantiate`]。
pub trait StageFactory: Send + Sync {
    fn descriptor(&self) -> StageDescriptor;

    /// 阶段声明会处理的头块；模板构建时并入注册表。
    fn understood_headers(&self) -> Vec<QName> {
        Vec::new()
    }

    /// 为一次调用创建新实例。
    fn instantiate(&self, shared: &TemplateShared) -> Box<dyn Stage>;
}

/// 以原型克隆的方式生成实例的工厂，适用于暂存状态可由 `Clone` 复位的简单阶段。
pub struct CloneStageFactory<S> {
    descriptor: StageDescriptor,
    understood: Vec<QName>,
    prototype: S,
}

impl<S> CloneStageFactory<S>
where
    S: Stage + Clone + Sync + 'static,
{
    pub fn new(descriptor: StageDescriptor, prototype: S) -> Self {
        Self {
            descriptor,
            understood: Vec::new(),
            prototype,
        }
    }

    /// 声明该阶段处理的头块。
    pub fn understands(mut self, name: QName) -> Self {
        self.understood.push(name);
        self
    }
}

impl<S> StageFactory for CloneStageFactory<S>
where
    S: Stage + Clone + Sync + 'static,
{
    fn descriptor(&self) -> StageDescriptor {
        self.descriptor.clone()
    }

    fn understood_headers(&self) -> Vec<QName> {
        self.understood.clone()
    }

    fn instantiate(&self, _shared: &TemplateShared) -> Box<dyn Stage> {
        Box::new(self.prototype.clone())
    }
}

/// 链路终点：应用分派，属于外部协作方。
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, call: &CallScope, request: Message) -> Result<Message, SoapError>;
}

impl<F> Dispatcher for F
where
    F: Fn(&CallScope, Message) -> Result<Message, SoapError> + Send + Sync,
{
    fn dispatch(&self, call: &CallScope, request: Message) -> Result<Message, SoapError> {
        self(call, request)
    }
}

/// 协作式取消令牌，克隆后共享同一状态。
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    inner: Arc<AtomicBool>,
}

impl Cancellation {
    /// 创建处于“未取消”状态的令牌。
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }

    /// 标记取消；首次触发返回 `true`。
    pub fn cancel(&self) -> bool {
        self.inner
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// 单次调用的上下文。
///
/// # 契约说明（What）
/// - `addressing`：本次调用生效的寻址特性，决定哪些保留头被视为已知；
/// - `cancellation`：在每个阶段步骤之前检查。
#[derive(Clone, Debug)]
pub struct CallScope {
    id: u64,
    addressing: Option<AddressingVersion>,
    cancellation: Cancellation,
}

impl Default for CallScope {
    fn default() -> Self {
        Self::new()
    }
}

impl CallScope {
    pub fn new() -> Self {
        Self {
            id: NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed),
            addressing: None,
            cancellation: Cancellation::new(),
        }
    }

    pub fn with_addressing(mut self, addressing: Option<AddressingVersion>) -> Self {
        self.addressing = addressing;
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addressing(&self) -> Option<AddressingVersion> {
        self.addressing
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    fn ensure_active(&self) -> Result<(), SoapError> {
        if self.cancellation.is_cancelled() {
            Err(SoapError::new(codes::CANCELLED, "call was cancelled"))
        } else {
            Ok(())
        }
    }
}

struct TemplateInner {
    shared: TemplateShared,
    factories: Vec<Arc<dyn StageFactory>>,
    descriptors: Vec<StageDescriptor>,
    dispatcher: Arc<dyn Dispatcher>,
}

/// 不可变的管线蓝图。克隆模板只复制 `Arc`。
#[derive(Clone)]
pub struct PipelineTemplate {
    inner: Arc<TemplateInner>,
}

impl fmt::Debug for PipelineTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTemplate")
            .field("version", &self.inner.shared.version)
            .field("stages", &self.inner.descriptors)
            .finish()
    }
}

impl PipelineTemplate {
    pub fn builder(version: SoapVersion) -> TemplateBuilder {
        TemplateBuilder {
            version,
            registry: HeaderRegistry::empty(),
            factories: Vec::new(),
        }
    }

    pub fn version(&self) -> SoapVersion {
        self.inner.shared.version
    }

    pub fn registry(&self) -> &Arc<HeaderRegistry> {
        &self.inner.shared.registry
    }

    pub fn descriptors(&self) -> &[StageDescriptor] {
        &self.inner.descriptors
    }

    /// 生成一次调用专用的实例。
    pub fn clone_instance(&self) -> PipelineInstance {
        let stages = self
            .inner
            .factories
            .iter()
            .map(|factory| factory.instantiate(&self.inner.shared))
            .collect();
        PipelineInstance {
            template: Arc::clone(&self.inner),
            stages,
        }
    }
}

/// 模板构建器。
pub struct TemplateBuilder {
    version: SoapVersion,
    registry: HeaderRegistry,
    factories: Vec<Arc<dyn StageFactory>>,
}

impl TemplateBuilder {
    /// 绑定层声明的已知头。
    pub fn registry(mut self, registry: HeaderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// 追加阶段，顺序即正向执行顺序。
    pub fn stage(self, factory: impl StageFactory + 'static) -> Self {
        self.stage_arc(Arc::new(factory))
    }

    pub fn stage_arc(mut self, factory: Arc<dyn StageFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// 固化模板。阶段声明的头在此一次性并入注册表。
    pub fn build(self, dispatcher: impl Dispatcher + 'static) -> PipelineTemplate {
        let declared = self
            .factories
            .iter()
            .flat_map(|factory| factory.understood_headers());
        let registry = HeaderRegistry::builder()
            .declare_all(self.registry.iter().cloned())
            .declare_all(declared)
            .build();
        let descriptors = self.factories.iter().map(|f| f.descriptor()).collect();
        PipelineTemplate {
            inner: Arc::new(TemplateInner {
                shared: TemplateShared {
                    version: self.version,
                    registry: Arc::new(registry),
                },
                factories: self.factories,
                descriptors,
                dispatcher: Arc::new(dispatcher),
            }),
        }
    }
}

/// 单次调用的执行实例。
///
/// `run` 消费实例，调用结束时所有阶段实例（以及它们持有的租借）随之释放。
pub struct PipelineInstance {
    template: Arc<TemplateInner>,
    stages: Vec<Box<dyn Stage>>,
}

impl PipelineInstance {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// 执行一次完整的双向遍历。
    pub fn run(mut self, call: &CallScope, request: Message) -> Result<Message, SoapError> {
        let span = debug_span!("soapline.call", call_id = call.id(), stages = self.stages.len());
        let _guard = span.enter();

        let mut message = request;
        let mut reverse_end = self.stages.len();
        let mut returned = false;

        for (idx, stage) in self.stages.iter_mut().enumerate() {
            call.ensure_active()?;
            let name = self.template.descriptors[idx].name();
            match stage.process_request(call, &mut message) {
                Action::Continue => {
                    debug!(stage = name, "request step continued");
                }
                Action::ReturnWith(response) => {
                    debug!(stage = name, "request step returned early");
                    message = response;
                    reverse_end = idx;
                    returned = true;
                    break;
                }
                Action::Fail(err) => {
                    debug!(stage = name, code = err.code(), "request step failed");
                    return Err(err);
                }
            }
        }

        if !returned {
            call.ensure_active()?;
            message = self.template.dispatcher.dispatch(call, message)?;
        }

        for idx in (0..reverse_end).rev() {
            call.ensure_active()?;
            let name = self.template.descriptors[idx].name();
            match self.stages[idx].process_response(call, &mut message) {
                Action::Continue => {
                    debug!(stage = name, "response step continued");
                }
                Action::ReturnWith(response) => {
                    debug!(stage = name, "response step replaced message");
                    message = response;
                }
                Action::Fail(err) => {
                    debug!(stage = name, code = err.code(), "response step failed");
                    return Err(err);
                }
            }
        }
        Ok(message)
    }
}
