//! 低级键盘钩子策略
//!
//! 在专用线程上安装 `WH_KEYBOARD_LL` 钩子，由 [`KeyStateTracker`] 跟踪修饰键并匹配组合。
//! 用户按键都会继续传给下一个钩子，只有带标记的金丝雀事件被拦下。
//!
//! 钩子回调超时时系统会静默摘除钩子，线程本身依然存活。金丝雀探测通过
//! `SendInput` 注入一个带标记的 F24 抬起事件，钩子收到后计数；
//! 在超时内没有看到计数变化即视为捕获丢失。

#![cfg(target_os = "windows")]

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYEVENTF_KEYUP, SendInput, VK_F24,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, GetMessageW, HC_ACTION, HHOOK, KBDLLHOOKSTRUCT, MSG, PM_NOREMOVE,
    PeekMessageW, PostThreadMessageW, SetWindowsHookExW, UnhookWindowsHookEx, WH_KEYBOARD_LL,
    WM_APP, WM_KEYDOWN, WM_KEYUP, WM_SYSKEYDOWN, WM_SYSKEYUP,
};

use super::error::{OsError, ResourceLeakWarning};
use super::keystate::KeyStateTracker;
use super::thread::{DeliveryThread, StartupSignal};
use super::{
    BackendHandle, BackendKind, BackendOptions, CanaryStatus, HandleToken, HotkeyBackend,
    TriggerCallback,
};
use crate::hotkey::{ActionId, BindingTable};

const WM_HOOK_STOP: u32 = WM_APP + 2;

/// 金丝雀按键的 `dwExtraInfo` 标记（"HOTLINE\0"）
const CANARY_MARKER: usize = 0x484F_544C_494E_4500_u64 as usize;

struct HookContext {
    tracker: KeyStateTracker,
    on_trigger: TriggerCallback,
    canary_seen: Arc<AtomicU64>,
}

thread_local! {
    static HOOK_CONTEXT: RefCell<Option<HookContext>> = const { RefCell::new(None) };
}

struct HookInfo {
    thread_id: u32,
    hook: usize,
}

struct Running {
    thread: DeliveryThread,
    thread_id: u32,
    token: HandleToken,
    canary_seen: Arc<AtomicU64>,
    installed: Arc<AtomicUsize>,
}

/// 低级键盘钩子后端
pub struct LowLevelHookBackend {
    options: BackendOptions,
    running: Option<Running>,
}

impl LowLevelHookBackend {
    pub fn new(options: BackendOptions) -> Self {
        Self {
            options,
            running: None,
        }
    }

    fn shutdown(&mut self, running: Running) -> Result<(), ResourceLeakWarning> {
        let posted =
            unsafe { PostThreadMessageW(running.thread_id, WM_HOOK_STOP, WPARAM(0), LPARAM(0)) };
        if posted.is_err() {
            tracing::debug!("Hook thread already gone when stopping");
        }
        running.thread.join_timeout(self.options.join_timeout)
    }
}

impl HotkeyBackend for LowLevelHookBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LowLevelHook
    }

    fn start(
        &mut self,
        bindings: &BindingTable,
        on_trigger: TriggerCallback,
    ) -> Result<BackendHandle, OsError> {
        if let Some(previous) = self.running.take() {
            if let Err(leak) = self.shutdown(previous) {
                tracing::warn!(error = %leak, "Previous hook thread leaked");
            }
        }

        let canary_seen = Arc::new(AtomicU64::new(0));
        let installed = Arc::new(AtomicUsize::new(0));
        let tracker = KeyStateTracker::new(bindings, self.options.debounce);

        let context = HookContext {
            tracker,
            on_trigger,
            canary_seen: Arc::clone(&canary_seen),
        };
        let installed_flag = Arc::clone(&installed);
        let (thread, info) = DeliveryThread::spawn(
            "hotline-hook",
            self.options.startup_timeout,
            move |signal| run_hook_thread(context, installed_flag, signal),
        )?;

        let handle = BackendHandle::new(BackendKind::LowLevelHook, info.hook, thread.alive_flag());
        tracing::info!(
            bindings = bindings.len(),
            thread_id = info.thread_id,
            handle = %handle.token(),
            "Installed low-level keyboard hook"
        );

        self.running = Some(Running {
            thread,
            thread_id: info.thread_id,
            token: handle.token(),
            canary_seen,
            installed,
        });
        Ok(handle)
    }

    fn stop(&mut self, handle: BackendHandle) -> Result<(), ResourceLeakWarning> {
        match self.running.take() {
            Some(running) if running.token == handle.token() => self.shutdown(running),
            other => {
                self.running = other;
                Ok(())
            }
        }
    }

    fn probe(&self, handle: &BackendHandle) -> CanaryStatus {
        let Some(running) = self.running.as_ref().filter(|r| r.token == handle.token()) else {
            return CanaryStatus::Lost("backend not running".to_string());
        };

        if running.installed.load(Ordering::Acquire) == 0 {
            return CanaryStatus::Lost("hook slot is empty".to_string());
        }
        if !running.thread.is_alive() {
            return CanaryStatus::Unresponsive;
        }

        let before = running.canary_seen.load(Ordering::Acquire);
        if !send_canary_keystroke() {
            return CanaryStatus::Lost("failed to inject canary keystroke".to_string());
        }

        let deadline = Instant::now() + self.options.probe_timeout;
        while Instant::now() < deadline {
            if running.canary_seen.load(Ordering::Acquire) != before {
                return CanaryStatus::Owned;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        CanaryStatus::Lost("hook did not observe canary keystroke".to_string())
    }
}

fn run_hook_thread(
    context: HookContext,
    installed: Arc<AtomicUsize>,
    signal: StartupSignal<HookInfo>,
) {
    let mut msg = MSG::default();
    unsafe {
        let _ = PeekMessageW(&mut msg, None, WM_APP, WM_APP, PM_NOREMOVE);
    }
    let thread_id = unsafe { GetCurrentThreadId() };

    HOOK_CONTEXT.with(|slot| *slot.borrow_mut() = Some(context));

    let hook = match install_hook() {
        Ok(hook) => hook,
        Err(e) => {
            HOOK_CONTEXT.with(|slot| slot.borrow_mut().take());
            signal.fail(e);
            return;
        }
    };
    installed.store(hook.0 as usize, Ordering::Release);

    let started = signal.ready(HookInfo {
        thread_id,
        hook: hook.0 as usize,
    });
    if !started {
        tracing::warn!(thread_id, "Hook thread abandoned during startup, removing hook");
    }

    while started {
        let result = unsafe { GetMessageW(&mut msg, None, 0, 0) };
        if result.0 == 0 || result.0 == -1 {
            tracing::warn!(code = result.0, "Hook thread message loop ended");
            break;
        }
        if msg.message == WM_HOOK_STOP {
            break;
        }
    }

    if let Err(e) = unsafe { UnhookWindowsHookEx(hook) } {
        tracing::warn!(error = %e, "Failed to remove keyboard hook");
    }
    installed.store(0, Ordering::Release);
    HOOK_CONTEXT.with(|slot| slot.borrow_mut().take());
    tracing::debug!(thread_id, "Hook thread exited");
}

fn install_hook() -> Result<HHOOK, OsError> {
    unsafe {
        let module =
            GetModuleHandleW(None).map_err(|e| OsError::HookInstallFailed(e.to_string()))?;
        SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), Some(module.into()), 0)
            .map_err(|e| OsError::HookInstallFailed(e.to_string()))
    }
}

fn send_canary_keystroke() -> bool {
    let input = [INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VK_F24,
                wScan: 0,
                dwFlags: KEYEVENTF_KEYUP,
                time: 0,
                dwExtraInfo: CANARY_MARKER,
            },
        },
    }];
    let sent = unsafe { SendInput(&input, std::mem::size_of::<INPUT>() as i32) };
    sent == 1
}

unsafe extern "system" fn keyboard_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code == HC_ACTION as i32 {
        let info = unsafe { &*(lparam.0 as *const KBDLLHOOKSTRUCT) };

        if info.dwExtraInfo == CANARY_MARKER {
            HOOK_CONTEXT.with(|slot| {
                if let Some(context) = slot.borrow().as_ref() {
                    context.canary_seen.fetch_add(1, Ordering::AcqRel);
                }
            });
            // 金丝雀不传给其他程序
            return LRESULT(1);
        }

        let fired: Option<(ActionId, TriggerCallback)> = HOOK_CONTEXT.with(|slot| {
            let mut slot = slot.borrow_mut();
            let context = slot.as_mut()?;
            let action = match wparam.0 as u32 {
                WM_KEYDOWN | WM_SYSKEYDOWN => context.tracker.key_down(info.vkCode, Instant::now()),
                WM_KEYUP | WM_SYSKEYUP => {
                    context.tracker.key_up(info.vkCode);
                    None
                }
                _ => None,
            }?;
            Some((action, Arc::clone(&context.on_trigger)))
        });

        // 在借用结束后回调，回调内可能再次产生键盘事件
        if let Some((action, on_trigger)) = fired {
            on_trigger(action);
        }
    }

    unsafe { CallNextHookEx(None, code, wparam, lparam) }
}

