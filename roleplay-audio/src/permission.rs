//! macOS microphone authorization via AVFoundation
//!
//! cpal talks to CoreAudio directly, which never surfaces a TCC refusal as a
//! distinct error. Querying `AVCaptureDevice` first lets a refusal be
//! reported as [`AudioError::PermissionDenied`] instead of a silent stream.

use std::ffi::CStr;
use std::os::raw::c_void;

use tracing::{debug, warn};

use crate::error::{AudioError, Result};

/// AVAuthorizationStatus values
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AVAuthorizationStatus {
    NotDetermined = 0,
    /// Parental controls or MDM
    Restricted = 1,
    Denied = 2,
    Authorized = 3,
}

impl From<i32> for AVAuthorizationStatus {
    fn from(value: i32) -> Self {
        match value {
            1 => Self::Restricted,
            2 => Self::Denied,
            3 => Self::Authorized,
            _ => Self::NotDetermined,
        }
    }
}

#[link(name = "AVFoundation", kind = "framework")]
extern "C" {}

#[link(name = "objc", kind = "dylib")]
extern "C" {
    fn objc_getClass(name: *const i8) -> *mut c_void;
    fn sel_registerName(name: *const i8) -> *mut c_void;
    fn objc_msgSend(obj: *mut c_void, sel: *mut c_void, ...) -> *mut c_void;
}

fn cstr_ptr(s: &CStr) -> *const i8 {
    s.as_ptr()
}

/// Current microphone authorization, without prompting
pub fn check_microphone_authorization_status() -> AVAuthorizationStatus {
    unsafe {
        let avcapturedevice = objc_getClass(cstr_ptr(c"AVCaptureDevice"));
        if avcapturedevice.is_null() {
            warn!("Failed to get AVCaptureDevice class");
            return AVAuthorizationStatus::NotDetermined;
        }

        let sel = sel_registerName(cstr_ptr(c"authorizationStatusForMediaType:"));

        // AVMediaTypeAudio is the four-char code "soun"
        let nsstring_class = objc_getClass(cstr_ptr(c"NSString"));
        let string_sel = sel_registerName(cstr_ptr(c"stringWithUTF8String:"));
        let media_type: *mut c_void = objc_msgSend(nsstring_class, string_sel, cstr_ptr(c"soun"));

        // NSInteger comes back in the pointer register
        let status_ptr = objc_msgSend(avcapturedevice, sel, media_type);
        let status = (status_ptr as isize) as i32;

        debug!("Microphone authorization status: {}", status);
        AVAuthorizationStatus::from(status)
    }
}

/// Fail fast when the user has already refused microphone access.
///
/// `NotDetermined` passes: opening the device is what triggers the prompt.
pub fn ensure_microphone_access() -> Result<()> {
    match check_microphone_authorization_status() {
        AVAuthorizationStatus::Denied => Err(AudioError::PermissionDenied(
            "enable it in System Settings > Privacy & Security > Microphone".to_string(),
        )),
        AVAuthorizationStatus::Restricted => Err(AudioError::PermissionDenied(
            "microphone access is restricted on this machine".to_string(),
        )),
        AVAuthorizationStatus::Authorized | AVAuthorizationStatus::NotDetermined => Ok(()),
    }
}
