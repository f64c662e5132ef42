//! SMU power-limit control through libryzenadj
//!
//! The library is resolved at runtime with `dlopen` so the daemon builds and
//! links on machines without it. Every status code is checked here and turned
//! into [`ApuError::NativeCall`] before it reaches the strategy.

use crate::Result;
use apu_error::ApuError;
use apu_protocol::PowerLimits;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use tracing::{debug, info, warn};

/// The three SMU power-limit classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitClass {
    Stapm,
    Slow,
    Fast,
}

impl LimitClass {
    pub const ALL: [LimitClass; 3] = [LimitClass::Stapm, LimitClass::Slow, LimitClass::Fast];

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitClass::Stapm => "stapm",
            LimitClass::Slow => "slow",
            LimitClass::Fast => "fast",
        }
    }
}

/// Exclusive handle on the SMU mailbox
pub trait SmuControl: Send {
    /// Set one limit in milliwatts
    fn set_limit(&mut self, class: LimitClass, milliwatts: u32) -> Result<()>;

    /// Re-read the power table; must precede every `get_limit`
    fn refresh(&mut self) -> Result<()>;

    /// Limit from the last refreshed table in milliwatts
    fn get_limit(&mut self, class: LimitClass) -> Option<u32>;

    /// Release the handle. Further calls fail; calling twice is a no-op.
    fn close(&mut self);

    /// Set every non-null limit, in stapm, slow, fast order
    fn apply(&mut self, limits: &PowerLimits) -> Result<()> {
        for (class, value) in LimitClass::ALL.into_iter().zip([limits.stapm, limits.slow, limits.fast]) {
            if let Some(mw) = value {
                self.set_limit(class, mw)?;
            }
        }
        Ok(())
    }

    /// Refresh and read back all three limits
    fn read_limits(&mut self) -> Result<PowerLimits> {
        self.refresh()?;
        Ok(PowerLimits {
            stapm: self.get_limit(LimitClass::Stapm),
            slow: self.get_limit(LimitClass::Slow),
            fast: self.get_limit(LimitClass::Fast),
        })
    }
}

// ============================================================================
// libryzenadj binding
// ============================================================================

type RyzenAccess = *mut c_void;

#[derive(Clone, Copy)]
struct Symbols {
    init: unsafe extern "C" fn() -> RyzenAccess,
    cleanup: unsafe extern "C" fn(RyzenAccess),
    init_table: unsafe extern "C" fn(RyzenAccess) -> c_int,
    refresh_table: unsafe extern "C" fn(RyzenAccess) -> c_int,
    set_stapm_limit: unsafe extern "C" fn(RyzenAccess, u32) -> c_int,
    set_slow_limit: unsafe extern "C" fn(RyzenAccess, u32) -> c_int,
    set_fast_limit: unsafe extern "C" fn(RyzenAccess, u32) -> c_int,
    get_stapm_limit: unsafe extern "C" fn(RyzenAccess) -> f32,
    get_slow_limit: unsafe extern "C" fn(RyzenAccess) -> f32,
    get_fast_limit: unsafe extern "C" fn(RyzenAccess) -> f32,
}

pub struct RyzenAdj {
    library: *mut c_void,
    access: RyzenAccess,
    symbols: Symbols,
}

// SAFETY: the raw pointers are only dereferenced by libryzenadj, and every
// call goes through `&mut self`, so at most one thread uses the handle at a time.
unsafe impl Send for RyzenAdj {}

fn dl_error() -> String {
    // SAFETY: dlerror returns NULL or a pointer to a thread-local C string
    unsafe {
        let err = libc::dlerror();
        if err.is_null() {
            "unknown dynamic loader error".to_string()
        } else {
            CStr::from_ptr(err as *const c_char).to_string_lossy().into_owned()
        }
    }
}

/// Resolve one symbol and reinterpret it as the given function pointer type
///
/// # Safety
/// `T` must be an `extern "C"` function pointer matching the symbol's C signature.
unsafe fn symbol<T: Copy>(library: *mut c_void, name: &CStr) -> Result<T> {
    let ptr = libc::dlsym(library, name.as_ptr());
    if ptr.is_null() {
        return Err(ApuError::NativeLibrary(format!(
            "missing symbol {}: {}",
            name.to_string_lossy(),
            dl_error()
        )));
    }
    Ok(std::mem::transmute_copy::<*mut c_void, T>(&ptr))
}

/// # Safety
/// `library` must be a live handle returned by `dlopen`.
unsafe fn load_symbols(library: *mut c_void) -> Result<Symbols> {
    // Signatures match ryzenadj.h
    Ok(Symbols {
        init: symbol(library, c"init_ryzenadj")?,
        cleanup: symbol(library, c"cleanup_ryzenadj")?,
        init_table: symbol(library, c"init_table")?,
        refresh_table: symbol(library, c"refresh_table")?,
        set_stapm_limit: symbol(library, c"set_stapm_limit")?,
        set_slow_limit: symbol(library, c"set_slow_limit")?,
        set_fast_limit: symbol(library, c"set_fast_limit")?,
        get_stapm_limit: symbol(library, c"get_stapm_limit")?,
        get_slow_limit: symbol(library, c"get_slow_limit")?,
        get_fast_limit: symbol(library, c"get_fast_limit")?,
    })
}

impl RyzenAdj {
    /// Load the library and initialise the SMU access handle and power table
    pub fn open(library_path: &str) -> Result<Self> {
        let path = CString::new(library_path)
            .map_err(|_| ApuError::NativeLibrary(format!("invalid library path {:?}", library_path)))?;

        // SAFETY: path is a valid NUL-terminated string
        let library = unsafe { libc::dlopen(path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if library.is_null() {
            return Err(ApuError::NativeLibrary(format!(
                "failed to load {}: {}",
                library_path,
                dl_error()
            )));
        }

        // SAFETY: library came from a successful dlopen
        let symbols = unsafe { load_symbols(library) };
        let symbols = match symbols {
            Ok(s) => s,
            Err(e) => {
                // SAFETY: library came from a successful dlopen
                unsafe { libc::dlclose(library) };
                return Err(e);
            }
        };

        // SAFETY: init_ryzenadj takes no arguments and returns NULL on failure
        let access = unsafe { (symbols.init)() };
        if access.is_null() {
            // SAFETY: as above
            unsafe { libc::dlclose(library) };
            return Err(ApuError::NativeLibrary(
                "init_ryzenadj failed (root and a supported APU are required)".to_string(),
            ));
        }

        let mut smu = Self { library, access, symbols };
        // SAFETY: access is a live handle returned by init_ryzenadj
        let status = unsafe { (smu.symbols.init_table)(smu.access) };
        if status != 0 {
            smu.close();
            return Err(ApuError::NativeCall { call: "init_table", status });
        }

        info!("SMU access initialised via {}", library_path);
        Ok(smu)
    }

    fn live(&self, call: &'static str) -> Result<RyzenAccess> {
        if self.access.is_null() {
            Err(ApuError::NativeLibrary(format!("{} called after SMU handle was released", call)))
        } else {
            Ok(self.access)
        }
    }
}

fn check(call: &'static str, status: c_int) -> Result<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(ApuError::NativeCall { call, status })
    }
}

/// Library getters report watts as float, NaN when the table lacks the field
fn watts_to_milliwatts(watts: f32) -> Option<u32> {
    (watts.is_finite() && watts >= 0.0).then(|| (watts * 1000.0).round() as u32)
}

impl SmuControl for RyzenAdj {
    fn set_limit(&mut self, class: LimitClass, milliwatts: u32) -> Result<()> {
        let (call, f) = match class {
            LimitClass::Stapm => ("set_stapm_limit", self.symbols.set_stapm_limit),
            LimitClass::Slow => ("set_slow_limit", self.symbols.set_slow_limit),
            LimitClass::Fast => ("set_fast_limit", self.symbols.set_fast_limit),
        };
        let access = self.live(call)?;
        // SAFETY: access is live until close() nulls it
        let status = unsafe { f(access, milliwatts) };
        check(call, status)?;
        debug!("SMU {} limit set to {} mW", class.as_str(), milliwatts);
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        let access = self.live("refresh_table")?;
        // SAFETY: access is live until close() nulls it
        check("refresh_table", unsafe { (self.symbols.refresh_table)(access) })
    }

    fn get_limit(&mut self, class: LimitClass) -> Option<u32> {
        let f = match class {
            LimitClass::Stapm => self.symbols.get_stapm_limit,
            LimitClass::Slow => self.symbols.get_slow_limit,
            LimitClass::Fast => self.symbols.get_fast_limit,
        };
        let access = self.live("get_limit").ok()?;
        // SAFETY: access is live until close() nulls it
        watts_to_milliwatts(unsafe { f(access) })
    }

    fn close(&mut self) {
        if !self.access.is_null() {
            // SAFETY: access is a live handle; it is nulled so cleanup runs once
            unsafe { (self.symbols.cleanup)(self.access) };
            self.access = std::ptr::null_mut();
            debug!("SMU handle released");
        }
        if !self.library.is_null() {
            // SAFETY: library came from dlopen and is closed once
            if unsafe { libc::dlclose(self.library) } != 0 {
                warn!("dlclose failed: {}", dl_error());
            }
            self.library = std::ptr::null_mut();
        }
    }
}

impl Drop for RyzenAdj {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(LimitClass, u32)>,
    }

    impl SmuControl for Recorder {
        fn set_limit(&mut self, class: LimitClass, milliwatts: u32) -> Result<()> {
            self.calls.push((class, milliwatts));
            Ok(())
        }
        fn refresh(&mut self) -> Result<()> {
            Ok(())
        }
        fn get_limit(&mut self, _class: LimitClass) -> Option<u32> {
            None
        }
        fn close(&mut self) {}
    }

    #[test]
    fn test_apply_skips_null_limits_in_order() {
        let mut smu = Recorder::default();
        smu.apply(&PowerLimits { stapm: Some(25_000), slow: None, fast: Some(35_000) }).unwrap();
        assert_eq!(smu.calls, vec![(LimitClass::Stapm, 25_000), (LimitClass::Fast, 35_000)]);
    }

    #[test]
    fn test_watts_conversion() {
        assert_eq!(watts_to_milliwatts(25.0), Some(25_000));
        assert_eq!(watts_to_milliwatts(12.3456), Some(12_346));
        assert_eq!(watts_to_milliwatts(f32::NAN), None);
        assert_eq!(watts_to_milliwatts(-1.0), None);
    }

    #[test]
    fn test_missing_library_reports_loader_error() {
        let err = RyzenAdj::open("/nonexistent/libryzenadj.so").err().unwrap();
        assert!(matches!(err, ApuError::NativeLibrary(ref msg) if msg.contains("libryzenadj")));
    }

    #[test]
    fn test_status_codes_become_typed_errors() {
        assert!(check("set_fast_limit", 0).is_ok());
        let err = check("set_fast_limit", -4).unwrap_err();
        assert!(err.to_string().contains("-4"));
    }
}
