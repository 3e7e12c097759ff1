//! FFI bindings for Synheart Breath
//!
//! This module provides C-compatible functions for embedding Breath in a host
//! application. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using `breath_free_string`.
//!
//! Session status codes returned by the session functions:
//! `0` idle, `1` active, `2` awaiting final persistence, `3` complete,
//! `-1` error (see `breath_last_error`).

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;
use std::ptr;

use serde::Deserialize;

use crate::analyzer::{downsample_for_display, SessionAnalyzer};
use crate::error::BreathError;
use crate::filter::FilterPipeline;
use crate::phase::SessionStatus;
use crate::session::BreathingSession;
use crate::source::SampleSource;
use crate::types::{FilterKind, FilterSpec, NavigationSignal, SessionConfig, DEFAULT_WINDOW_SIZE};
use crate::{BREATH_VERSION, PRODUCER_NAME};

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

fn status_code(status: SessionStatus) -> i32 {
    match status {
        SessionStatus::Idle => 0,
        SessionStatus::Active => 1,
        SessionStatus::AwaitingFinalPersistence => 2,
        SessionStatus::Complete => 3,
    }
}

/// Amplitude handed over by the host on each tick
#[derive(Debug, Default)]
struct HostSource {
    rms: f64,
}

impl SampleSource for HostSource {
    fn read_rms(&mut self) -> f64 {
        self.rms
    }
}

// ============================================================================
// Session API
// ============================================================================

/// Opaque handle to a breathing session driver
pub struct BreathSessionHandle {
    session: BreathingSession<HostSource, Vec<NavigationSignal>>,
}

/// Create a session driver that writes recordings under `data_dir`.
///
/// # Safety
/// - `data_dir` must be a valid null-terminated C string.
/// - Must be freed with `breath_session_free`.
/// - Returns NULL on error; call `breath_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn breath_session_new(data_dir: *const c_char) -> *mut BreathSessionHandle {
    clear_last_error();

    let dir = match cstr_to_string(data_dir) {
        Some(s) => PathBuf::from(s),
        None => {
            set_last_error("Invalid data_dir string pointer");
            return ptr::null_mut();
        }
    };

    let session = BreathingSession::new(dir, HostSource::default(), Vec::new());
    Box::into_raw(Box::new(BreathSessionHandle { session }))
}

/// Free a session driver. A session still in progress is sealed first.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `breath_session_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn breath_session_free(handle: *mut BreathSessionHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Start a session. `config_json` is a `SessionConfig` object, or NULL for
/// the default 4-7-8-10 pattern over 4 cycles.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `breath_session_new`.
/// - `config_json` must be NULL or a valid null-terminated C string.
/// - Returns the session status code, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn breath_session_start(
    handle: *mut BreathSessionHandle,
    config_json: *const c_char,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }
    let handle = &mut *handle;

    let config = if config_json.is_null() {
        SessionConfig::default()
    } else {
        let json = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string pointer");
                return -1;
            }
        };
        match serde_json::from_str::<SessionConfig>(&json).map_err(BreathError::from) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return -1;
            }
        }
    };

    match handle.session.start(config) {
        Ok(()) => status_code(handle.session.status()),
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Record `rms` and advance the session by `delta_secs`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `breath_session_new`.
/// - Returns the session status code, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn breath_session_tick(
    handle: *mut BreathSessionHandle,
    delta_secs: f64,
    rms: f64,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }
    let handle = &mut *handle;

    handle.session.source_mut().rms = rms;
    status_code(handle.session.tick(delta_secs))
}

/// Skip the rest of the current rest phase.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `breath_session_new`.
/// - Returns 1 if the session advanced, 0 if not, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn breath_session_advance(handle: *mut BreathSessionHandle) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }
    let handle = &mut *handle;

    i32::from(handle.session.advance_manually())
}

/// Abandon the current session; recorded samples are still saved.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `breath_session_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn breath_session_reset(handle: *mut BreathSessionHandle) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }
    let handle = &mut *handle;

    handle.session.reset();
    0
}

/// Label of the current phase (`inhale`, `hold`, `exhale`, `rest`).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `breath_session_new`.
/// - Returns a newly allocated string that must be freed with `breath_free_string`.
/// - Returns NULL when no session is running or on error.
#[no_mangle]
pub unsafe extern "C" fn breath_session_phase_label(
    handle: *const BreathSessionHandle,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }
    let handle = &*handle;

    match handle.session.current_phase_label() {
        Some(label) => string_to_cstr(label),
        None => {
            set_last_error("No session is running");
            ptr::null_mut()
        }
    }
}

/// Whether the session has finished.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `breath_session_new`.
/// - Returns 1 if complete, 0 if not, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn breath_session_is_complete(handle: *const BreathSessionHandle) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return -1;
    }
    let handle = &*handle;

    i32::from(handle.session.is_complete())
}

/// Drain pending navigation signals as a JSON array, e.g.
/// `[{"signal":"phase_entered","phase":"hold"},{"signal":"session_finished"}]`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `breath_session_new`.
/// - Returns a newly allocated string that must be freed with `breath_free_string`.
/// - Returns NULL on error; call `breath_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn breath_session_take_signals(
    handle: *mut BreathSessionHandle,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }
    let handle = &mut *handle;

    let signals = std::mem::take(handle.session.navigator_mut());
    match serde_json::to_string(&signals) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

#[derive(Debug, Deserialize)]
struct FilterRequest {
    values: Vec<f64>,
    #[serde(default)]
    filter: FilterKind,
    #[serde(default = "default_window_size")]
    window_size: usize,
    #[serde(default)]
    max_points: Option<usize>,
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

/// Filter a trace locally and return the filtered values as a JSON array.
///
/// Request: `{"values":[...],"filter":"moving_average","window_size":5}`.
/// An optional `max_points` decimates the result for display.
///
/// # Safety
/// - `request_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `breath_free_string`.
/// - Returns NULL on error; call `breath_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn breath_filter_json(request_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json = match cstr_to_string(request_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    let request: FilterRequest = match serde_json::from_str(&json) {
        Ok(r) => r,
        Err(e) => {
            set_last_error(&format!("Invalid filter request: {e}"));
            return ptr::null_mut();
        }
    };

    let spec = FilterSpec {
        kind: request.filter,
        window_size: request.window_size,
    };
    let filtered = match FilterPipeline::local().apply_local(&request.values, &spec) {
        Ok(values) => values,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };
    let filtered = match request.max_points {
        Some(max) => downsample_for_display(&filtered, max),
        None => filtered,
    };

    match serde_json::to_string(&filtered) {
        Ok(out) => string_to_cstr(&out),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Summarize the most recent session under `data_dir` as JSON.
///
/// Never fails for missing data: the report then carries zeroed statistics
/// and an `error` field.
///
/// # Safety
/// - `data_dir` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `breath_free_string`.
/// - Returns NULL on error; call `breath_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn breath_summary_json(data_dir: *const c_char) -> *mut c_char {
    clear_last_error();

    let dir = match cstr_to_string(data_dir) {
        Some(s) => PathBuf::from(s),
        None => {
            set_last_error("Invalid data_dir string pointer");
            return ptr::null_mut();
        }
    };

    let report = SessionAnalyzer::default().report(&dir);
    let payload = serde_json::json!({
        "producer": PRODUCER_NAME,
        "version": BREATH_VERSION,
        "date": report.stamp.display(),
        "stamp_source": report.stamp.source,
        "summary": report.summary,
        "path": report.path,
        "error": report.error,
    });

    match serde_json::to_string(&payload) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Breath function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn breath_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the Breath library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn breath_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Breath functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Breath function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn breath_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}
