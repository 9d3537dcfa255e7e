//! Capability seam for the game's proprietary compression codec.
//!
//! The codec is closed source and ships with the game client; it is only
//! reachable on Windows x86_64 through a thin C shim. Everything above this
//! module sees a single capability trait, chosen at construction time:
//! the native provider where available, otherwise a stub that fails every
//! bundle tagged with proprietary compression.

use std::sync::Arc;

use crate::error::OodleError;

/// Decompresses a proprietary-codec payload into a caller-allocated buffer.
///
/// `raw` must be sized to the bundle's declared decompressed length; the
/// codec fails rather than truncating.
pub trait OodleDecoder: Send + Sync {
    /// Decompress `compressed` into `raw`, filling it exactly.
    fn decode(&self, compressed: &[u8], raw: &mut [u8]) -> Result<(), OodleError>;
}

/// Stub provider for platforms without the proprietary codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedOodle;

impl OodleDecoder for UnsupportedOodle {
    fn decode(&self, _compressed: &[u8], _raw: &mut [u8]) -> Result<(), OodleError> {
        Err(OodleError::PlatformNotSupported)
    }
}

/// Pick the best available provider for this platform.
///
/// On Windows x86_64 the native shim is attempted when `AETHERTAP_OODLE`
/// names the shim library and `AETHERTAP_GAME_EXE` the game executable to
/// initialize it from; any failure falls back to the stub with a warning.
/// Everywhere else this is always the stub.
#[must_use]
pub fn default_decoder() -> Arc<dyn OodleDecoder> {
    #[cfg(all(windows, target_arch = "x86_64"))]
    {
        use std::env;

        if let (Ok(shim), Ok(game_exe)) =
            (env::var("AETHERTAP_OODLE"), env::var("AETHERTAP_GAME_EXE"))
        {
            match native::NativeOodle::setup(shim.as_ref(), &game_exe) {
                Ok(decoder) => return Arc::new(decoder),
                Err(err) => {
                    tracing::warn!(%err, "native codec unavailable, falling back to stub");
                },
            }
        }
    }

    Arc::new(UnsupportedOodle)
}

#[cfg(all(windows, target_arch = "x86_64"))]
mod native {
    #![allow(unsafe_code)]

    use std::{
        ffi::CString,
        os::raw::{c_char, c_void},
        path::Path,
        sync::Mutex,
    };

    use libloading::{Library, os::windows::Symbol};

    use super::OodleDecoder;
    use crate::error::OodleError;

    type InitFn = unsafe extern "C" fn(*const c_char) -> u32;
    type DeinitFn = unsafe extern "C" fn();
    type DecodeFn = unsafe extern "C" fn(*const c_void, i64, *mut c_void, i64) -> bool;

    /// Native provider backed by the game-shipped codec, loaded through a
    /// shim library exporting `init` / `deinit` / `decode`.
    pub struct NativeOodle {
        // Field order matters: symbols must drop before the library.
        decode: Symbol<DecodeFn>,
        deinit: Symbol<DeinitFn>,
        _lib: Library,
        // The codec is not documented as thread-safe; calls are serialized.
        guard: Mutex<()>,
    }

    impl NativeOodle {
        /// Load the shim and initialize the codec from the game executable.
        pub fn setup(shim: &Path, game_exe: &str) -> Result<Self, OodleError> {
            let lib = unsafe { Library::new(shim) }
                .map_err(|err| OodleError::Setup(err.to_string()))?;

            let init: Symbol<InitFn> = unsafe { lib.get(b"init") }
                .map_err(|err| OodleError::Setup(err.to_string()))?
                .into_raw();
            let deinit: Symbol<DeinitFn> = unsafe { lib.get(b"deinit") }
                .map_err(|err| OodleError::Setup(err.to_string()))?
                .into_raw();
            let decode: Symbol<DecodeFn> = unsafe { lib.get(b"decode") }
                .map_err(|err| OodleError::Setup(err.to_string()))?
                .into_raw();

            let exe = CString::new(game_exe)
                .map_err(|err| OodleError::Setup(err.to_string()))?;

            let status = unsafe { init(exe.as_ptr()) };
            if status != 0 {
                return Err(OodleError::Setup(format!(
                    "codec init from game executable returned status {status}"
                )));
            }

            tracing::info!(shim = %shim.display(), "native codec initialized");

            Ok(Self {
                decode,
                deinit,
                _lib: lib,
                guard: Mutex::new(()),
            })
        }
    }

    impl OodleDecoder for NativeOodle {
        fn decode(&self, compressed: &[u8], raw: &mut [u8]) -> Result<(), OodleError> {
            let _serialized = self.guard.lock().map_err(|_| OodleError::DecompressionFailed)?;

            let ok = unsafe {
                (self.decode)(
                    compressed.as_ptr().cast::<c_void>(),
                    compressed.len() as i64,
                    raw.as_mut_ptr().cast::<c_void>(),
                    raw.len() as i64,
                )
            };

            if ok { Ok(()) } else { Err(OodleError::DecompressionFailed) }
        }
    }

    impl Drop for NativeOodle {
        fn drop(&mut self) {
            unsafe { (self.deinit)() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_always_fails() {
        let mut out = [0u8; 8];
        assert_eq!(
            UnsupportedOodle.decode(b"anything", &mut out),
            Err(OodleError::PlatformNotSupported)
        );
    }
}
