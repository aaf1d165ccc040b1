//! Global keyboard tap using macOS CGEventTap
//!
//! The tap runs on a dedicated thread with its own CFRunLoop. Each event is
//! converted into a [`TapEvent`] and handed to the engine's [`TapHandler`];
//! the handler's decision is applied to the event before it returns to the
//! window server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::engine::{EventTap, HotkeyError, TapHandler};

#[cfg(target_os = "macos")]
pub use self::macos::MacEventTap;

/// The tap implementation for the current platform
pub fn system_tap() -> Box<dyn EventTap> {
    #[cfg(target_os = "macos")]
    {
        Box::new(MacEventTap::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        Box::new(UnsupportedEventTap)
    }
}

/// Stand-in for platforms without a session event tap
#[derive(Debug, Default)]
pub struct UnsupportedEventTap;

impl EventTap for UnsupportedEventTap {
    fn install(&mut self, _handler: Arc<dyn TapHandler>) -> Result<(), HotkeyError> {
        Err(HotkeyError::Unsupported)
    }

    fn remove(&mut self) {}
}

/// How long the tap thread stays in its run loop before rechecking the flag
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
const RUN_SLICE: Duration = Duration::from_millis(100);

/// Run slices of the event loop until `running` is cleared.
///
/// The flag is checked before every slice, so a stop requested before the
/// loop is entered still ends it.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn run_while(running: &AtomicBool, mut run_slice: impl FnMut()) {
    while running.load(Ordering::SeqCst) {
        run_slice();
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use std::ffi::c_void;
    use std::ptr;
    use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread::{self, JoinHandle};

    use core_foundation::base::TCFType;
    use core_foundation::mach_port::CFMachPortRef;
    use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
    use core_graphics::event::{
        CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement,
        CGEventTapProxy, CGEventType, EventField,
    };
    use tracing::{error, info, warn};

    use super::super::engine::{EventTap, HotkeyError, TapDecision, TapEvent, TapHandler};
    use super::{run_while, RUN_SLICE};

    #[link(name = "CoreGraphics", kind = "framework")]
    extern "C" {
        fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
    }

    type Ready = mpsc::Sender<Result<CFRunLoop, HotkeyError>>;

    /// Session-level CGEventTap in filter mode, so matched events can be
    /// suppressed
    #[derive(Default)]
    pub struct MacEventTap {
        running: Arc<AtomicBool>,
        run_loop: Option<CFRunLoop>,
        thread: Option<JoinHandle<()>>,
    }

    impl MacEventTap {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl EventTap for MacEventTap {
        fn install(&mut self, handler: Arc<dyn TapHandler>) -> Result<(), HotkeyError> {
            let (ready_tx, ready_rx) = mpsc::channel();
            self.running.store(true, Ordering::SeqCst);
            let running = Arc::clone(&self.running);

            let thread = thread::Builder::new()
                .name("hotkey-listener".to_string())
                .spawn(move || {
                    info!("hotkey listener thread started");

                    if let Err(e) = run_event_loop(handler, &running, &ready_tx) {
                        error!(?e, "hotkey listener error");
                        let _ = ready_tx.send(Err(e));
                    }

                    info!("hotkey listener thread stopped");
                })
                .map_err(|e| {
                    self.running.store(false, Ordering::SeqCst);
                    HotkeyError::ThreadSpawn(e.to_string())
                })?;

            match ready_rx.recv() {
                Ok(Ok(run_loop)) => {
                    self.run_loop = Some(run_loop);
                    self.thread = Some(thread);
                    Ok(())
                }
                Ok(Err(e)) => {
                    self.running.store(false, Ordering::SeqCst);
                    let _ = thread.join();
                    Err(e)
                }
                Err(_) => {
                    self.running.store(false, Ordering::SeqCst);
                    let _ = thread.join();
                    Err(HotkeyError::ListenerGone)
                }
            }
        }

        fn remove(&mut self) {
            // The thread rechecks the flag every slice, even if it had not
            // entered its run loop when stop() was sent
            self.running.store(false, Ordering::SeqCst);
            if let Some(run_loop) = self.run_loop.take() {
                run_loop.stop();
            }
            if let Some(thread) = self.thread.take() {
                if thread.join().is_err() {
                    warn!("hotkey listener thread panicked");
                }
            }
        }
    }

    impl Drop for MacEventTap {
        fn drop(&mut self) {
            self.remove();
        }
    }

    fn to_tap_event(event_type: CGEventType, event: &CGEvent) -> TapEvent {
        match event_type {
            CGEventType::KeyDown => TapEvent::KeyDown {
                code: event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16,
                flags: event.get_flags().bits(),
            },
            CGEventType::TapDisabledByTimeout => TapEvent::TapDisabled { timeout: true },
            CGEventType::TapDisabledByUserInput => TapEvent::TapDisabled { timeout: false },
            _ => TapEvent::Other,
        }
    }

    /// Install the tap on the current thread and run its CFRunLoop until
    /// stopped
    fn run_event_loop(
        handler: Arc<dyn TapHandler>,
        running: &AtomicBool,
        ready: &Ready,
    ) -> Result<(), HotkeyError> {
        // The callback needs the tap's own port to re-enable it, but the
        // port only exists once the tap is created
        let port = Arc::new(AtomicPtr::<c_void>::new(ptr::null_mut()));
        let callback_port = Arc::clone(&port);

        // CGEventTap callback - must be fast and non-blocking
        let callback = move |_proxy: CGEventTapProxy,
                             event_type: CGEventType,
                             event: &CGEvent|
                             -> Option<CGEvent> {
            match handler.handle(to_tap_event(event_type, event)) {
                TapDecision::PassThrough => None,
                TapDecision::Consume => {
                    // A null event is dropped by the window server
                    let consumed = event.clone();
                    consumed.set_type(CGEventType::Null);
                    Some(consumed)
                }
                TapDecision::ReenableAndPass => {
                    let port = callback_port.load(Ordering::Acquire);
                    if !port.is_null() {
                        unsafe { CGEventTapEnable(port as CFMachPortRef, true) };
                    }
                    None
                }
            }
        };

        let tap = CGEventTap::new(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::Default,
            vec![CGEventType::KeyDown],
            callback,
        )
        .map_err(|_| {
            error!("failed to create event tap - is Accessibility permission granted?");
            HotkeyError::EventTapCreation
        })?;

        port.store(
            tap.mach_port.as_concrete_TypeRef() as *mut c_void,
            Ordering::Release,
        );

        let source = tap
            .mach_port
            .create_runloop_source(0)
            .map_err(|_| HotkeyError::RunLoopSource)?;
        let run_loop = CFRunLoop::get_current();

        unsafe {
            run_loop.add_source(&source, kCFRunLoopCommonModes);
        }
        tap.enable();

        info!("event tap created and enabled");
        let _ = ready.send(Ok(run_loop.clone()));

        run_while(running, || unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, RUN_SLICE, false);
        });

        unsafe {
            run_loop.remove_source(&source, kCFRunLoopCommonModes);
        }
        port.store(ptr::null_mut(), Ordering::Release);

        // Tap is released when it goes out of scope
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::engine::{TapDecision, TapEvent};

    struct PassAll;

    impl TapHandler for PassAll {
        fn handle(&self, _event: TapEvent) -> TapDecision {
            TapDecision::PassThrough
        }
    }

    #[test]
    fn test_run_while_honors_stop_before_first_slice() {
        let running = AtomicBool::new(false);
        let mut slices = 0;
        run_while(&running, || slices += 1);
        assert_eq!(slices, 0);
    }

    #[test]
    fn test_run_while_returns_after_stop_from_another_thread() {
        let running = Arc::new(AtomicBool::new(true));
        let stopper = {
            let running = Arc::clone(&running);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                running.store(false, Ordering::SeqCst);
            })
        };

        let mut slices = 0;
        run_while(&running, || {
            slices += 1;
            std::thread::sleep(Duration::from_millis(5));
        });
        stopper.join().unwrap();
        assert!(slices >= 1);
        assert!(!running.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unsupported_tap_refuses_install() {
        let mut tap = UnsupportedEventTap;
        let result = tap.install(Arc::new(PassAll));
        assert!(matches!(result, Err(HotkeyError::Unsupported)));
        tap.remove();
    }
}
