//! macOS-only monitor for the bare `Fn` key. The global-shortcut plugin
//! cannot observe it, so a CGEventTap on the flags-changed stream reports
//! press/release transitions instead. Events are deduped against the last
//! known state because macOS repeats flags-changed callbacks.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FnEvent {
    Pressed,
    Released,
    TapFailed,
}

// NX_SECONDARYFNMASK: the Fn/globe modifier bit in CGEventFlags.
const FN_FLAG_MASK: u64 = 0x0080_0000;

const K_CG_EVENT_FLAGS_CHANGED: u32 = 12;
const K_CG_HID_EVENT_TAP: u32 = 0;
const K_CG_HEAD_INSERT_EVENT_TAP: u32 = 0;
const K_CG_EVENT_TAP_OPTION_LISTEN_ONLY: u32 = 1;

type CGEventRef = *mut c_void;
type CGEventTapProxy = *mut c_void;
type CFMachPortRef = *mut c_void;
type CFRunLoopSourceRef = *mut c_void;
type CFRunLoopRef = *mut c_void;
type CFStringRef = *const c_void;
type CFAllocatorRef = *const c_void;

type CGEventTapCallBack = unsafe extern "C" fn(
    proxy: CGEventTapProxy,
    event_type: u32,
    event: CGEventRef,
    user_info: *mut c_void,
) -> CGEventRef;

extern "C" {
    fn CGEventTapCreate(
        tap: u32,
        place: u32,
        options: u32,
        events_of_interest: u64,
        callback: CGEventTapCallBack,
        user_info: *mut c_void,
    ) -> CFMachPortRef;

    fn CFMachPortCreateRunLoopSource(
        allocator: CFAllocatorRef,
        port: CFMachPortRef,
        order: i64,
    ) -> CFRunLoopSourceRef;

    fn CFRunLoopGetCurrent() -> CFRunLoopRef;
    fn CFRunLoopAddSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: CFStringRef);
    fn CFRunLoopRun();
    fn CGEventGetFlags(event: CGEventRef) -> u64;

    static kCFRunLoopDefaultMode: CFStringRef;
}

static FN_WAS_DOWN: AtomicBool = AtomicBool::new(false);

unsafe extern "C" fn flags_changed_callback(
    _proxy: CGEventTapProxy,
    event_type: u32,
    event: CGEventRef,
    user_info: *mut c_void,
) -> CGEventRef {
    if event_type == K_CG_EVENT_FLAGS_CHANGED {
        let sender = &*(user_info as *const mpsc::Sender<FnEvent>);
        let flags = CGEventGetFlags(event);
        let down_now = (flags & FN_FLAG_MASK) != 0;
        let was_down = FN_WAS_DOWN.swap(down_now, Ordering::SeqCst);
        if down_now && !was_down {
            let _ = sender.send(FnEvent::Pressed);
        } else if !down_now && was_down {
            let _ = sender.send(FnEvent::Released);
        }
    }
    event
}

/// Spawn the run-loop thread that feeds Fn transitions into `sender`. The
/// tap listens only; keystrokes are never consumed.
pub(crate) fn start_fn_listener(sender: mpsc::Sender<FnEvent>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || unsafe {
        let event_mask: u64 = 1 << K_CG_EVENT_FLAGS_CHANGED;

        let sender_box = Box::new(sender);
        let sender_ptr = Box::into_raw(sender_box) as *mut c_void;

        let tap = CGEventTapCreate(
            K_CG_HID_EVENT_TAP,
            K_CG_HEAD_INSERT_EVENT_TAP,
            K_CG_EVENT_TAP_OPTION_LISTEN_ONLY,
            event_mask,
            flags_changed_callback,
            sender_ptr,
        );

        if tap.is_null() {
            error!(
                "failed to create Fn event tap; grant Accessibility permission in \
                 System Settings > Privacy & Security > Accessibility"
            );
            let sender = Box::from_raw(sender_ptr as *mut mpsc::Sender<FnEvent>);
            let _ = sender.send(FnEvent::TapFailed);
            return;
        }

        let source = CFMachPortCreateRunLoopSource(std::ptr::null(), tap, 0);
        let run_loop = CFRunLoopGetCurrent();
        CFRunLoopAddSource(run_loop, source, kCFRunLoopDefaultMode);

        CFRunLoopRun();

        let _ = Box::from_raw(sender_ptr as *mut mpsc::Sender<FnEvent>);
    })
}
