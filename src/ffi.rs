//! FFI bindings for threatsense
//!
//! This module provides C-compatible functions for driving a monitor from other
//! languages. Structured values cross the boundary as JSON strings; every
//! returned string must be freed by the caller using `ts_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::slice;

use crate::config::MonitorConfig;
use crate::error::ThreatError;
use crate::monitor::{StopOutcome, ThreatMonitor};
use crate::motion::Frame;
use crate::speech::keyword_score;
use crate::types::{LocationContext, Transcript};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Map a fallible call to the 0 / -1 status convention
fn status(result: Result<(), ThreatError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Monitor API
// ============================================================================

/// Opaque handle to a ThreatMonitor
pub struct ThreatMonitorHandle {
    monitor: ThreatMonitor,
}

unsafe fn handle_ref<'a>(handle: *const ThreatMonitorHandle) -> Option<&'a ThreatMonitorHandle> {
    if handle.is_null() {
        set_last_error("Null monitor pointer");
        None
    } else {
        Some(&*handle)
    }
}

/// Create a monitor from a JSON config.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string, or NULL for defaults.
/// - Must be freed with `ts_monitor_free`.
/// - Returns NULL on error; call `ts_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ts_monitor_new(config_json: *const c_char) -> *mut ThreatMonitorHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        Ok(MonitorConfig::default())
    } else {
        match cstr_to_string(config_json) {
            Some(json) => MonitorConfig::from_json(&json),
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        }
    };

    match config.and_then(ThreatMonitor::new) {
        Ok(monitor) => Box::into_raw(Box::new(ThreatMonitorHandle { monitor })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Stop (if running) and free a monitor.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `ts_monitor_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn ts_monitor_free(handle: *mut ThreatMonitorHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Start monitoring. Returns `{"status": "started" | "already_running", "session_id": ...}`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `ts_monitor_new`.
/// - Returns a newly allocated string that must be freed with `ts_free_string`.
/// - Returns NULL on error; call `ts_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ts_monitor_start(handle: *const ThreatMonitorHandle) -> *mut c_char {
    clear_last_error();
    let Some(handle) = handle_ref(handle) else {
        return ptr::null_mut();
    };

    let result = handle
        .monitor
        .start()
        .and_then(|outcome| serde_json::to_string(&outcome).map_err(ThreatError::from));
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Stop monitoring. Returns 1 when a session was stopped, 0 when none was
/// running, -1 on a NULL handle.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `ts_monitor_new`.
#[no_mangle]
pub unsafe extern "C" fn ts_monitor_stop(handle: *const ThreatMonitorHandle) -> i32 {
    clear_last_error();
    let Some(handle) = handle_ref(handle) else {
        return -1;
    };
    match handle.monitor.stop() {
        StopOutcome::Stopped => 1,
        StopOutcome::NotRunning => 0,
    }
}

/// Current threat snapshot as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `ts_monitor_new`.
/// - Returns a newly allocated string that must be freed with `ts_free_string`.
/// - Returns NULL on error; call `ts_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ts_monitor_snapshot(handle: *const ThreatMonitorHandle) -> *mut c_char {
    clear_last_error();
    let Some(handle) = handle_ref(handle) else {
        return ptr::null_mut();
    };

    match serde_json::to_string(&handle.monitor.snapshot()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Rebuild the motion background model on the next tick.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `ts_monitor_new`.
#[no_mangle]
pub unsafe extern "C" fn ts_monitor_reset_motion(handle: *const ThreatMonitorHandle) -> i32 {
    clear_last_error();
    let Some(handle) = handle_ref(handle) else {
        return -1;
    };
    handle.monitor.reset_motion_background();
    0
}

/// Append normalized audio samples.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `ts_monitor_new`.
/// - `samples` must point to `len` readable floats (may be NULL when `len` is 0).
#[no_mangle]
pub unsafe extern "C" fn ts_monitor_push_audio(
    handle: *const ThreatMonitorHandle,
    samples: *const f32,
    len: usize,
) -> i32 {
    clear_last_error();
    let Some(handle) = handle_ref(handle) else {
        return -1;
    };
    if len == 0 {
        return 0;
    }
    if samples.is_null() {
        set_last_error("Null samples pointer");
        return -1;
    }
    handle.monitor.push_audio(slice::from_raw_parts(samples, len));
    0
}

/// Publish an 8-bit grayscale frame.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `ts_monitor_new`.
/// - `luma` must point to `width * height` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn ts_monitor_push_frame(
    handle: *const ThreatMonitorHandle,
    luma: *const u8,
    width: usize,
    height: usize,
) -> i32 {
    clear_last_error();
    let Some(handle) = handle_ref(handle) else {
        return -1;
    };
    if luma.is_null() {
        set_last_error("Null frame pointer");
        return -1;
    }
    let Some(len) = width.checked_mul(height) else {
        set_last_error("Frame dimensions overflow");
        return -1;
    };
    let pixels = slice::from_raw_parts(luma, len).to_vec();
    status(Frame::from_luma(width, height, pixels).map(|frame| handle.monitor.push_frame(frame)))
}

/// Deliver a transcript fragment for the next tick.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `ts_monitor_new`.
/// - `text` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn ts_monitor_submit_transcript(
    handle: *const ThreatMonitorHandle,
    text: *const c_char,
    confidence: f64,
) -> i32 {
    clear_last_error();
    let Some(handle) = handle_ref(handle) else {
        return -1;
    };
    let Some(text) = cstr_to_string(text) else {
        set_last_error("Invalid transcript string pointer");
        return -1;
    };
    handle.monitor.submit_transcript(Transcript { text, confidence });
    0
}

/// Update the coarse location from JSON
/// (`{"near_police": bool, "near_hospital": bool, "public_place": bool}`).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `ts_monitor_new`.
/// - `json` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn ts_monitor_update_location(
    handle: *const ThreatMonitorHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();
    let Some(handle) = handle_ref(handle) else {
        return -1;
    };
    let Some(json) = cstr_to_string(json) else {
        set_last_error("Invalid location string pointer");
        return -1;
    };
    status(
        serde_json::from_str::<LocationContext>(&json)
            .map(|location| handle.monitor.update_location(location))
            .map_err(ThreatError::from),
    )
}

// ============================================================================
// Stateless API
// ============================================================================

/// Keyword threat score of a text (0.0 - 1.0), or -1.0 on an invalid pointer.
///
/// # Safety
/// - `text` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn ts_keyword_score(text: *const c_char) -> f64 {
    clear_last_error();
    match cstr_to_string(text) {
        Some(text) => keyword_score(&text),
        None => {
            set_last_error("Invalid text string pointer");
            -1.0
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by threatsense functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a threatsense function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn ts_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next threatsense call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn ts_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn ts_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
