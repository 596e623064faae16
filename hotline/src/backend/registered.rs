//! 系统热键注册策略
//!
//! 在专用的"宿主线程"上创建仅消息窗口，把全部组合键注册到这个窗口，
//! 然后运行消息循环分发 `WM_HOTKEY`。
//!
//! Win32 的热键注册具有线程亲和性：只有注册它的线程能注销它。因此
//! 注销、金丝雀探测和窗口销毁都以命令的形式投递回宿主线程执行，
//! 其他线程从不直接调用 `UnregisterHotKey`。

#![cfg(target_os = "windows")]

use std::sync::mpsc;

use windows::Win32::Foundation::{ERROR_HOTKEY_ALREADY_REGISTERED, HWND, LPARAM, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    HOT_KEY_MODIFIERS, MOD_NOREPEAT, RegisterHotKey, UnregisterHotKey,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DestroyWindow, DispatchMessageW, GetMessageW, HWND_MESSAGE, MSG,
    PM_NOREMOVE, PeekMessageW, PostThreadMessageW, TranslateMessage, WINDOW_EX_STYLE,
    WINDOW_STYLE, WM_APP, WM_HOTKEY,
};
use windows::core::w;

use super::error::{OsError, ResourceLeakWarning};
use super::thread::{DeliveryThread, StartupSignal};
use super::{
    BackendHandle, BackendKind, BackendOptions, CanaryStatus, HotkeyBackend, TriggerCallback,
};
use crate::hotkey::{ActionId, BindingTable, KeyCombination};

/// 唤醒宿主线程处理命令队列
const WM_HOME_COMMAND: u32 = WM_APP + 1;

enum HomeCommand {
    Probe(mpsc::Sender<CanaryStatus>),
    Stop,
}

struct HomeInfo {
    thread_id: u32,
    hwnd: usize,
}

struct Running {
    thread: DeliveryThread,
    thread_id: u32,
    commands: mpsc::Sender<HomeCommand>,
    token: super::HandleToken,
}

impl Running {
    fn post(&self, command: HomeCommand) -> bool {
        if self.commands.send(command).is_err() {
            return false;
        }
        unsafe { PostThreadMessageW(self.thread_id, WM_HOME_COMMAND, WPARAM(0), LPARAM(0)) }
            .is_ok()
    }
}

/// 系统热键注册后端
pub struct RegisteredHotkeyBackend {
    options: BackendOptions,
    running: Option<Running>,
}

impl RegisteredHotkeyBackend {
    pub fn new(options: BackendOptions) -> Self {
        Self {
            options,
            running: None,
        }
    }

    fn shutdown(&mut self, running: Running) -> Result<(), ResourceLeakWarning> {
        if !running.post(HomeCommand::Stop) {
            tracing::debug!("Home thread already gone when stopping");
        }
        running.thread.join_timeout(self.options.join_timeout)
    }
}

impl HotkeyBackend for RegisteredHotkeyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Registered
    }

    fn start(
        &mut self,
        bindings: &BindingTable,
        on_trigger: TriggerCallback,
    ) -> Result<BackendHandle, OsError> {
        if let Some(previous) = self.running.take() {
            if let Err(leak) = self.shutdown(previous) {
                tracing::warn!(error = %leak, "Previous home thread leaked");
            }
        }

        let (tx, rx) = mpsc::channel();
        let table = bindings.clone();
        let (thread, info) = DeliveryThread::spawn(
            "hotline-registered",
            self.options.startup_timeout,
            move |signal| run_home_thread(table, on_trigger, rx, signal),
        )?;

        let handle = BackendHandle::new(BackendKind::Registered, info.hwnd, thread.alive_flag());
        tracing::info!(
            bindings = bindings.len(),
            thread_id = info.thread_id,
            handle = %handle.token(),
            "Registered hotkeys on home thread"
        );

        self.running = Some(Running {
            thread,
            thread_id: info.thread_id,
            commands: tx,
            token: handle.token(),
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

        let (reply_tx, reply_rx) = mpsc::channel();
        if !running.post(HomeCommand::Probe(reply_tx)) {
            return CanaryStatus::Unresponsive;
        }
        reply_rx
            .recv_timeout(self.options.probe_timeout)
            .unwrap_or(CanaryStatus::Unresponsive)
    }
}

fn run_home_thread(
    bindings: BindingTable,
    on_trigger: TriggerCallback,
    commands: mpsc::Receiver<HomeCommand>,
    signal: StartupSignal<HomeInfo>,
) {
    let mut msg = MSG::default();
    // 先建立线程消息队列，之后 PostThreadMessageW 才不会丢消息
    unsafe {
        let _ = PeekMessageW(&mut msg, None, WM_APP, WM_APP, PM_NOREMOVE);
    }
    let thread_id = unsafe { GetCurrentThreadId() };

    let hwnd = match create_message_window() {
        Ok(hwnd) => hwnd,
        Err(e) => {
            signal.fail(e);
            return;
        }
    };

    let mut registered: Vec<ActionId> = Vec::with_capacity(bindings.len());
    for (action, combo) in &bindings {
        if let Err(e) = register(hwnd, *action, combo) {
            unregister_all(hwnd, &registered);
            unsafe {
                let _ = DestroyWindow(hwnd);
            }
            signal.fail(e);
            return;
        }
        registered.push(*action);
    }

    let canary = bindings.iter().next().map(|(action, combo)| (*action, *combo));

    let started = signal.ready(HomeInfo {
        thread_id,
        hwnd: hwnd.0 as usize,
    });
    if !started {
        tracing::warn!(thread_id, "Home thread abandoned during startup, releasing hotkeys");
    }

    'pump: while started {
        let result = unsafe { GetMessageW(&mut msg, None, 0, 0) };
        // 0 为 WM_QUIT，-1 为错误
        if result.0 == 0 || result.0 == -1 {
            tracing::warn!(code = result.0, "Home thread message loop ended");
            break;
        }

        match msg.message {
            WM_HOTKEY => {
                if let Some(action) = ActionId::from_native_id(msg.wParam.0 as i32) {
                    on_trigger(action);
                }
            }
            WM_HOME_COMMAND => {
                while let Ok(command) = commands.try_recv() {
                    match command {
                        HomeCommand::Probe(reply) => {
                            let _ = reply.send(probe_canary(hwnd, canary));
                        }
                        HomeCommand::Stop => break 'pump,
                    }
                }
            }
            _ => unsafe {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            },
        }
    }

    unregister_all(hwnd, &registered);
    unsafe {
        let _ = DestroyWindow(hwnd);
    }
    tracing::debug!(thread_id, "Home thread released its hotkeys");
}

fn create_message_window() -> Result<HWND, OsError> {
    unsafe {
        let module =
            GetModuleHandleW(None).map_err(|e| OsError::WindowCreationFailed(e.to_string()))?;
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            w!("STATIC"),
            w!("hotline-hotkeys"),
            WINDOW_STYLE::default(),
            0,
            0,
            0,
            0,
            Some(HWND_MESSAGE),
            None,
            Some(module.into()),
            None,
        )
        .map_err(|e| OsError::WindowCreationFailed(e.to_string()))
    }
}

fn native_modifiers(combo: &KeyCombination) -> HOT_KEY_MODIFIERS {
    HOT_KEY_MODIFIERS(combo.modifiers().bits()) | MOD_NOREPEAT
}

fn register(hwnd: HWND, action: ActionId, combo: &KeyCombination) -> Result<(), OsError> {
    unsafe {
        RegisterHotKey(
            Some(hwnd),
            action.native_id(),
            native_modifiers(combo),
            combo.virtual_key(),
        )
    }
    .map_err(|e| {
        if e.code() == ERROR_HOTKEY_ALREADY_REGISTERED.to_hresult() {
            OsError::Occupied(combo.to_string())
        } else {
            OsError::RegistrationFailed {
                combo: combo.to_string(),
                reason: e.to_string(),
            }
        }
    })
}

fn unregister_all(hwnd: HWND, actions: &[ActionId]) {
    for action in actions {
        if let Err(e) = unsafe { UnregisterHotKey(Some(hwnd), action.native_id()) } {
            tracing::warn!(action = %action, error = %e, "Failed to unregister hotkey");
        }
    }
}

/// 对已注册的组合重新发起注册
///
/// 系统回答"已被注册"说明它仍归本窗口所有；注册竟然成功说明之前的注册已被
/// 系统悄悄撤销，此时视为捕获丢失
fn probe_canary(hwnd: HWND, canary: Option<(ActionId, KeyCombination)>) -> CanaryStatus {
    let Some((action, combo)) = canary else {
        return CanaryStatus::Lost("no canary binding".to_string());
    };

    match unsafe {
        RegisterHotKey(
            Some(hwnd),
            action.native_id(),
            native_modifiers(&combo),
            combo.virtual_key(),
        )
    } {
        Err(e) if e.code() == ERROR_HOTKEY_ALREADY_REGISTERED.to_hresult() => CanaryStatus::Owned,
        Ok(()) => CanaryStatus::Lost(format!("registration of '{combo}' had been revoked")),
        Err(e) => CanaryStatus::Lost(format!("re-registering '{combo}' failed: {e}")),
    }
}
