use lazy_static::lazy_static;
use libc::{c_char, c_int, size_t};
use std::ffi::{CStr, CString};
use std::ptr;
use std::slice;
use std::sync::{Mutex, MutexGuard};

use crate::harness::{Driver, DriverConfig, Status};
use crate::targets;

// --- Global State ---

lazy_static! {
    static ref LAST_ERROR: Mutex<Option<CString>> = Mutex::new(None);
    static ref DRIVER: Mutex<Driver> = Mutex::new(Driver::new(DriverConfig::from_env()));
    static ref TARGET_NAMES: Vec<CString> = targets::all()
        .iter()
        .filter_map(|t| CString::new(t.name).ok())
        .collect();
}

/// A panic inside a target poisons the lock; the state behind it is still
/// usable for the next input.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn update_last_error(message: impl Into<String>) {
    let msg = CString::new(message.into())
        .unwrap_or_else(|_| c"FFI: Unknown error".to_owned());
    *lock(&LAST_ERROR) = Some(msg);
}

/// Retrieves the last error message set by a failed API call.
///
/// The returned string is valid until the next API call.
/// Returns `null` if no error has occurred.
#[unsafe(no_mangle)]
pub extern "C" fn tensorfuzz_last_error_message() -> *const c_char {
    match lock(&LAST_ERROR).as_ref() {
        Some(s) => s.as_ptr(),
        None => ptr::null(),
    }
}

/// Runs the named target on `size` bytes at `data`.
///
/// Returns `0` to keep the input and `-1` to discard it, the libFuzzer
/// convention. An unknown target or a null name also returns `-1`.
///
/// # Safety
/// `name` must be null or a valid NUL-terminated string, and `data` must be
/// null or point to at least `size` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tensorfuzz_run_target(
    name: *const c_char,
    data: *const u8,
    size: size_t,
) -> c_int {
    if name.is_null() {
        update_last_error("Null pointer passed as target name");
        return Status::Discard.code();
    }
    let name = match unsafe { CStr::from_ptr(name) }.to_str() {
        Ok(s) => s,
        Err(_) => {
            update_last_error("Target name is not valid UTF-8");
            return Status::Discard.code();
        }
    };
    let input: &[u8] = if data.is_null() || size == 0 {
        &[]
    } else {
        unsafe { slice::from_raw_parts(data, size) }
    };
    match run_named(name, input) {
        Some(status) => status.code(),
        None => {
            update_last_error(format!("Unknown target '{name}'"));
            Status::Discard.code()
        }
    }
}

/// Runs the named target on the process-wide driver, configured from the
/// environment on first use. `None` for an unknown name.
pub fn run_named(name: &str, data: &[u8]) -> Option<Status> {
    let target = targets::find(name)?;
    Some(lock(&DRIVER).run(target, data))
}

/// Number of registered targets.
#[unsafe(no_mangle)]
pub extern "C" fn tensorfuzz_target_count() -> size_t {
    targets::all().len()
}

/// Name of the target at `index`, or `null` when out of range. The string is
/// owned by the library and lives for the whole process.
#[unsafe(no_mangle)]
pub extern "C" fn tensorfuzz_target_name(index: size_t) -> *const c_char {
    match TARGET_NAMES.get(index) {
        Some(name) => name.as_ptr(),
        None => {
            update_last_error(format!("Target index {index} out of range"));
            ptr::null()
        }
    }
}
