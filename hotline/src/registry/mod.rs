//! 热键注册表
//!
//! 持有当前生效的绑定表和后端实例，是唯一会创建或销毁后端的地方。
//!
//! - `configure` 只暂存经过完整校验的新绑定，失败时不影响正在运行的后端
//! - `activate` 丢弃旧后端，从工厂构造全新实例并启动
//! - `deactivate` 停止后端，可重复调用
//!
//! 激活、停用与恢复控制器的重建共享同一把锁（见 [`HotkeyRegistry::lock`]），
//! 因此两次重建不会交错。健康检查通过 [`HotkeyRegistry::live`] 无锁读取快照。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use arc_swap::ArcSwapOption;

use crate::backend::{
    BackendFactory, BackendHandle, BackendKind, CanaryStatus, HandleToken, HotkeyBackend, OsError,
    ResourceLeakWarning, TriggerCallback,
};
use crate::hotkey::{ActionId, BindingTable, ConfigError, HotkeyConfig, KeyCombination};

/// 一条生效中的绑定
#[derive(Debug, Clone, PartialEq)]
pub struct HotkeyBinding {
    pub action: ActionId,
    pub combo: KeyCombination,
    /// 所属后端实例
    pub backend_handle: HandleToken,
    pub registered_at: SystemTime,
}

/// 注册表运行期状态
///
/// 每次激活整体替换，从不原地修改
struct RegistryState {
    bindings: BTreeMap<ActionId, HotkeyBinding>,
    backend: Box<dyn HotkeyBackend>,
    handle: BackendHandle,
}

/// 供健康监控读取的只读快照
#[derive(Debug, Clone)]
pub struct LiveRegistry {
    pub bindings: BTreeMap<ActionId, HotkeyBinding>,
    pub handle: BackendHandle,
}

impl LiveRegistry {
    pub fn kind(&self) -> BackendKind {
        self.handle.kind()
    }

    /// 投递线程是否存活
    pub fn is_delivery_alive(&self) -> bool {
        self.handle.is_alive()
    }
}

#[derive(Default)]
struct RegistryInner {
    staged: Option<BindingTable>,
    state: Option<RegistryState>,
}

/// 热键注册表
pub struct HotkeyRegistry {
    inner: Mutex<RegistryInner>,
    live: ArcSwapOption<LiveRegistry>,
    factory: BackendFactory,
    on_trigger: TriggerCallback,
}

impl HotkeyRegistry {
    /// # Arguments
    ///
    /// * `factory` - 每次激活调用一次，返回全新的后端实例
    /// * `on_trigger` - 交给后端的触发回调
    pub fn new(factory: BackendFactory, on_trigger: TriggerCallback) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            live: ArcSwapOption::empty(),
            factory,
            on_trigger,
        }
    }

    /// 校验并暂存新的绑定
    ///
    /// 全有或全无：任何一项无效都返回错误，已暂存和已生效的绑定都保持不变。
    /// 新绑定在下一次 [`activate`](Self::activate) 时生效。
    pub fn configure(&self, config: &HotkeyConfig) -> Result<(), ConfigError> {
        let table = config.parse()?;
        tracing::debug!(bindings = table.len(), "Hotkey bindings staged");
        self.lock().inner.staged = Some(table);
        Ok(())
    }

    /// 用暂存的绑定构造并启动新后端
    pub fn activate(&self) -> Result<(), OsError> {
        self.lock().activate()
    }

    /// 停止当前后端
    pub fn deactivate(&self) -> Result<(), ResourceLeakWarning> {
        self.lock().deactivate()
    }

    /// 获取注册表锁
    ///
    /// 恢复控制器在整个"停用-等待-激活"过程中持有它
    pub fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            inner: self
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            registry: self,
        }
    }

    /// 当前快照，未激活时为 `None`
    pub fn live(&self) -> Option<Arc<LiveRegistry>> {
        self.live.load_full()
    }

    pub fn is_active(&self) -> bool {
        self.live.load().is_some()
    }

    /// 已暂存的绑定表
    pub fn configured(&self) -> Option<BindingTable> {
        self.lock().inner.staged.clone()
    }

    /// 对当前后端发起金丝雀探测
    pub fn probe_canary(&self) -> CanaryStatus {
        let guard = self.lock();
        match guard.inner.state.as_ref() {
            Some(state) => state.backend.probe(&state.handle),
            None => CanaryStatus::Lost("registry inactive".to_string()),
        }
    }
}

/// 持有注册表锁期间的操作句柄
pub struct RegistryGuard<'a> {
    inner: MutexGuard<'a, RegistryInner>,
    registry: &'a HotkeyRegistry,
}

impl RegistryGuard<'_> {
    /// 激活：丢弃旧后端，构造新实例并启动
    ///
    /// 启动失败时注册表保持停用状态
    pub fn activate(&mut self) -> Result<(), OsError> {
        let bindings = self.inner.staged.clone().ok_or(OsError::NotConfigured)?;

        if let Err(leak) = self.deactivate() {
            tracing::warn!(error = %leak, "Old backend leaked while activating");
        }

        let mut backend = (self.registry.factory)();
        let kind = backend.kind();
        let handle = backend
            .start(&bindings, Arc::clone(&self.registry.on_trigger))
            .inspect_err(|e| {
                tracing::warn!(backend = %kind, error = %e, "Failed to start hotkey backend");
            })?;

        let registered_at = SystemTime::now();
        let table: BTreeMap<ActionId, HotkeyBinding> = bindings
            .iter()
            .map(|(action, combo)| {
                (
                    *action,
                    HotkeyBinding {
                        action: *action,
                        combo: *combo,
                        backend_handle: handle.token(),
                        registered_at,
                    },
                )
            })
            .collect();

        self.registry.live.store(Some(Arc::new(LiveRegistry {
            bindings: table.clone(),
            handle: handle.clone(),
        })));

        tracing::info!(
            backend = %kind,
            handle = %handle.token(),
            native = handle.native(),
            bindings = table.len(),
            "Hotkey registry activated"
        );

        self.inner.state = Some(RegistryState {
            bindings: table,
            backend,
            handle,
        });
        Ok(())
    }

    /// 停用：停止后端并清空运行期状态
    ///
    /// 未激活时什么也不做
    pub fn deactivate(&mut self) -> Result<(), ResourceLeakWarning> {
        self.mark_inactive();

        let Some(mut state) = self.inner.state.take() else {
            return Ok(());
        };

        let token = state.handle.token();
        let result = state.backend.stop(state.handle);
        tracing::info!(
            handle = %token,
            bindings = state.bindings.len(),
            leaked = result.is_err(),
            "Hotkey registry deactivated"
        );
        result
    }

    /// 撤下快照，健康检查随即视注册表为未激活
    pub fn mark_inactive(&mut self) {
        self.registry.live.store(None);
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.is_some()
    }
}
