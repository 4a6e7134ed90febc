//! FFI (Foreign Function Interface) for C/Go interoperability

use crate::error::ErrorCode;
use crate::progress::Stage;
use crate::{available, compress_file, CompressOptions};
use libc::{c_char, c_void};
use std::ffi::{CStr, CString};
use std::path::PathBuf;
use std::ptr;

/// FFI result structure
///
/// On success `message` holds the output path, on failure the error message.
/// Either way it must be released with [`vidshrink_free_string`].
#[repr(C)]
pub struct FfiResult {
    pub code: ErrorCode,
    pub message: *mut c_char,
}

impl FfiResult {
    fn ok(message: Option<&str>) -> Self {
        Self {
            code: ErrorCode::Ok,
            message: message.map(into_c_string).unwrap_or(ptr::null_mut()),
        }
    }

    fn error(code: ErrorCode, message: &str) -> Self {
        Self {
            code,
            message: into_c_string(message),
        }
    }
}

fn into_c_string(s: &str) -> *mut c_char {
    CString::new(s.replace('\0', " "))
        .unwrap_or_default()
        .into_raw()
}

/// Progress callback: stage name, percent (0-100) and the caller's user data
pub type ProgressCallback =
    Option<unsafe extern "C" fn(stage: *const c_char, percent: u8, user_data: *mut c_void)>;

fn stage_name(stage: Stage) -> &'static CStr {
    match stage {
        Stage::Initializing => c"initializing",
        Stage::Preparing => c"preparing",
        Stage::Compressing => c"compressing",
        Stage::Packaging => c"packaging",
        Stage::Completed => c"completed",
    }
}

unsafe fn optional_path(ptr: *const c_char, what: &str) -> Result<Option<PathBuf>, FfiResult> {
    if ptr.is_null() {
        return Ok(None);
    }
    match CStr::from_ptr(ptr).to_str() {
        Ok(s) => Ok(Some(PathBuf::from(s))),
        Err(_) => Err(FfiResult::error(
            ErrorCode::InvalidInput,
            &format!("Invalid {}", what),
        )),
    }
}

/// Check whether compression is available
///
/// # Safety
/// - `ffmpeg_path` must be a valid null-terminated string or null
#[no_mangle]
pub unsafe extern "C" fn vidshrink_available(ffmpeg_path: *const c_char) -> FfiResult {
    let ffmpeg_path = match optional_path(ffmpeg_path, "ffmpeg path") {
        Ok(path) => path,
        Err(result) => return result,
    };

    let options = CompressOptions {
        ffmpeg_path,
        ..Default::default()
    };
    match available(&options) {
        Ok(_) => FfiResult::ok(None),
        Err(e) => FfiResult::error(ErrorCode::from(&e), &e.to_string()),
    }
}

/// Compress a video file into `output_dir`
///
/// A `target_size` or `bitrate` of 0 selects the default.
///
/// # Safety
/// - `input_path` and `output_dir` must be valid null-terminated strings
/// - `ffmpeg_path` must be a valid null-terminated string or null
/// - `progress` may be null; when set it is called on the calling thread with
///   `user_data` passed through untouched
#[no_mangle]
pub unsafe extern "C" fn vidshrink_compress(
    input_path: *const c_char,
    output_dir: *const c_char,
    target_size: u64,
    bitrate: u32,
    ffmpeg_path: *const c_char,
    progress: ProgressCallback,
    user_data: *mut c_void,
) -> FfiResult {
    if input_path.is_null() {
        return FfiResult::error(ErrorCode::InvalidInput, "Input path is null");
    }
    if output_dir.is_null() {
        return FfiResult::error(ErrorCode::InvalidInput, "Output directory is null");
    }

    let input_path = match CStr::from_ptr(input_path).to_str() {
        Ok(s) => s,
        Err(_) => return FfiResult::error(ErrorCode::InvalidInput, "Invalid input path"),
    };
    let output_dir = match CStr::from_ptr(output_dir).to_str() {
        Ok(s) => s,
        Err(_) => return FfiResult::error(ErrorCode::InvalidInput, "Invalid output directory"),
    };
    let ffmpeg_path = match optional_path(ffmpeg_path, "ffmpeg path") {
        Ok(path) => path,
        Err(result) => return result,
    };

    let mut options = CompressOptions {
        ffmpeg_path,
        ..Default::default()
    };
    if target_size > 0 {
        options.target_size = target_size;
        options.max_size = options.max_size.max(target_size);
    }
    if bitrate > 0 {
        options.bitrate = bitrate;
    }

    let on_progress = |event: crate::ProgressEvent| {
        if let Some(callback) = progress {
            unsafe { callback(stage_name(event.stage).as_ptr(), event.percent, user_data) };
        }
    };

    match compress_file(input_path, output_dir, &options, on_progress) {
        Ok(path) => FfiResult::ok(Some(&*path.to_string_lossy())),
        Err(e) => FfiResult::error(ErrorCode::from(&e), &e.to_string()),
    }
}

/// Free a string returned in an [`FfiResult`]
///
/// # Safety
/// - `s` must be null or a pointer returned by a vidshrink function, not yet freed
#[no_mangle]
pub unsafe extern "C" fn vidshrink_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Get version string
#[no_mangle]
pub extern "C" fn vidshrink_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
