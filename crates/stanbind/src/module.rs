//! Loaded model modules
//!
//! `ModelServices` is the evaluation surface of one compiled model.
//! `NativeLoader` provides it for shared libraries built against the glue
//! layer; other loaders can be plugged into a `Runtime`.

use crate::data::ModelData;
use crate::error::ModuleError;
use libloading::Library;
use std::ffi::{c_char, c_int, CStr, CString};
use std::path::Path;

/// ABI version exported by the glue layer as `stanbind_abi_version`
pub const ABI_VERSION: u32 = 1;

/// Which parameter names to report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamNames {
    /// Declared parameter names, one per variable
    Parameters,
    /// Flattened constrained names, including transformed parameters and
    /// generated quantities
    Constrained,
    /// Flattened unconstrained names
    Unconstrained,
}

impl ParamNames {
    pub fn abi_code(self) -> c_int {
        match self {
            ParamNames::Parameters => 0,
            ParamNames::Constrained => 1,
            ParamNames::Unconstrained => 2,
        }
    }
}

/// Operations a compiled model exposes. Every call receives the data the
/// model is instantiated with.
pub trait ModelServices: Send + Sync {
    fn n_pars(&self, data: &ModelData) -> Result<usize, ModuleError>;

    fn param_names(&self, data: &ModelData, kind: ParamNames) -> Result<Vec<String>, ModuleError>;

    /// Unconstrained -> constrained
    fn write_array(
        &self,
        data: &ModelData,
        upar: &[f64],
        include_tparams: bool,
        include_gqs: bool,
    ) -> Result<Vec<f64>, ModuleError>;

    /// Constrained -> unconstrained
    fn unconstrain_array(&self, data: &ModelData, cpar: &[f64]) -> Result<Vec<f64>, ModuleError>;

    fn log_prob(&self, data: &ModelData, upar: &[f64], jacobian: bool) -> Result<f64, ModuleError>;

    fn log_prob_grad(&self, data: &ModelData, upar: &[f64], jacobian: bool) -> Result<Vec<f64>, ModuleError>;

    /// Whether calls may run concurrently. Modules are serialized otherwise.
    fn is_reentrant(&self) -> bool {
        false
    }
}

/// Turns a module file into callable services
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn ModelServices>, ModuleError>;
}

/// Loads shared libraries through the C ABI
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl ModuleLoader for NativeLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn ModelServices>, ModuleError> {
        Ok(Box::new(NativeModule::load(path)?))
    }
}

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type FreeFn = unsafe extern "C" fn(*mut std::ffi::c_void);
type NParsFn = unsafe extern "C" fn(*const c_char, *mut usize, *mut *mut c_char) -> c_int;
type ParamNamesFn = unsafe extern "C" fn(*const c_char, c_int, *mut *mut c_char, *mut *mut c_char) -> c_int;
type WriteArrayFn = unsafe extern "C" fn(
    *const c_char,
    *const f64,
    usize,
    c_int,
    c_int,
    *mut *mut f64,
    *mut usize,
    *mut *mut c_char,
) -> c_int;
type UnconstrainArrayFn =
    unsafe extern "C" fn(*const c_char, *const f64, usize, *mut *mut f64, *mut usize, *mut *mut c_char) -> c_int;
type LogProbFn = unsafe extern "C" fn(*const c_char, *const f64, usize, c_int, *mut f64, *mut *mut c_char) -> c_int;
type LogProbGradFn = unsafe extern "C" fn(
    *const c_char,
    *const f64,
    usize,
    c_int,
    *mut *mut f64,
    *mut usize,
    *mut *mut c_char,
) -> c_int;

/// A model shared library with its entry points resolved
pub struct NativeModule {
    _library: Library,
    free: FreeFn,
    n_pars: NParsFn,
    param_names: ParamNamesFn,
    write_array: WriteArrayFn,
    unconstrain_array: UnconstrainArrayFn,
    log_prob: LogProbFn,
    log_prob_grad: LogProbGradFn,
}

// The entry points only touch call-local state; `_library` keeps them mapped.
unsafe impl Send for NativeModule {}
unsafe impl Sync for NativeModule {}

macro_rules! symbol {
    ($library:expr, $ty:ty, $name:literal) => {
        unsafe {
            *$library
                .get::<$ty>($name)
                .map_err(|e| ModuleError::SymbolNotFound(e.to_string()))?
        }
    };
}

impl NativeModule {
    pub fn load(path: &Path) -> Result<Self, ModuleError> {
        // Safety: running the library's initializers; modules come from our own builds.
        let library = unsafe { Library::new(path) }.map_err(|e| ModuleError::LibraryLoad(e.to_string()))?;

        let abi_version: AbiVersionFn = symbol!(library, AbiVersionFn, b"stanbind_abi_version");
        let found = unsafe { abi_version() };
        if found != ABI_VERSION {
            return Err(ModuleError::IncompatibleAbi {
                expected: ABI_VERSION,
                found,
            });
        }

        // Copy the function pointers out so the library can move into the struct
        let free: FreeFn = symbol!(library, FreeFn, b"stanbind_free");
        let n_pars: NParsFn = symbol!(library, NParsFn, b"stanbind_n_pars");
        let param_names: ParamNamesFn = symbol!(library, ParamNamesFn, b"stanbind_param_names");
        let write_array: WriteArrayFn = symbol!(library, WriteArrayFn, b"stanbind_write_array");
        let unconstrain_array: UnconstrainArrayFn =
            symbol!(library, UnconstrainArrayFn, b"stanbind_unconstrain_array");
        let log_prob: LogProbFn = symbol!(library, LogProbFn, b"stanbind_log_prob");
        let log_prob_grad: LogProbGradFn = symbol!(library, LogProbGradFn, b"stanbind_log_prob_grad");

        Ok(Self {
            _library: library,
            free,
            n_pars,
            param_names,
            write_array,
            unconstrain_array,
            log_prob,
            log_prob_grad,
        })
    }

    fn check(&self, status: c_int, err: *mut c_char) -> Result<(), ModuleError> {
        if status == 0 {
            return Ok(());
        }
        let message = if err.is_null() {
            format!("module returned status {}", status)
        } else {
            let text = unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned();
            unsafe { (self.free)(err.cast()) };
            text
        };
        Err(ModuleError::Raised(message))
    }

    fn take_doubles(&self, ptr: *mut f64, len: usize) -> Result<Vec<f64>, ModuleError> {
        if ptr.is_null() {
            return Err(ModuleError::InvalidOutput("module returned a null buffer".to_string()));
        }
        let values = unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec();
        unsafe { (self.free)(ptr.cast()) };
        Ok(values)
    }

    fn take_string(&self, ptr: *mut c_char) -> Result<String, ModuleError> {
        if ptr.is_null() {
            return Err(ModuleError::InvalidOutput("module returned a null string".to_string()));
        }
        let text = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        unsafe { (self.free)(ptr.cast()) };
        Ok(text)
    }

    fn call_vector(
        &self,
        call: impl FnOnce(*mut *mut f64, *mut usize, *mut *mut c_char) -> c_int,
    ) -> Result<Vec<f64>, ModuleError> {
        let mut out: *mut f64 = std::ptr::null_mut();
        let mut len: usize = 0;
        let mut err: *mut c_char = std::ptr::null_mut();
        let status = call(&mut out as *mut _, &mut len as *mut _, &mut err as *mut _);
        self.check(status, err)?;
        self.take_doubles(out, len)
    }
}

fn c_data(data: &ModelData) -> Result<CString, ModuleError> {
    CString::new(data.as_json()).map_err(|_| ModuleError::InvalidArgument("data contains a NUL byte".to_string()))
}

impl ModelServices for NativeModule {
    fn n_pars(&self, data: &ModelData) -> Result<usize, ModuleError> {
        let data = c_data(data)?;
        let mut out: usize = 0;
        let mut err: *mut c_char = std::ptr::null_mut();
        let status = unsafe { (self.n_pars)(data.as_ptr(), &mut out, &mut err) };
        self.check(status, err)?;
        Ok(out)
    }

    fn param_names(&self, data: &ModelData, kind: ParamNames) -> Result<Vec<String>, ModuleError> {
        let data = c_data(data)?;
        let mut out: *mut c_char = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        let status = unsafe { (self.param_names)(data.as_ptr(), kind.abi_code(), &mut out, &mut err) };
        self.check(status, err)?;
        let json = self.take_string(out)?;
        serde_json::from_str(&json).map_err(|e| ModuleError::InvalidOutput(format!("parameter names: {}", e)))
    }

    fn write_array(
        &self,
        data: &ModelData,
        upar: &[f64],
        include_tparams: bool,
        include_gqs: bool,
    ) -> Result<Vec<f64>, ModuleError> {
        let data = c_data(data)?;
        self.call_vector(|out, len, err| unsafe {
            (self.write_array)(
                data.as_ptr(),
                upar.as_ptr(),
                upar.len(),
                include_tparams as c_int,
                include_gqs as c_int,
                out,
                len,
                err,
            )
        })
    }

    fn unconstrain_array(&self, data: &ModelData, cpar: &[f64]) -> Result<Vec<f64>, ModuleError> {
        let data = c_data(data)?;
        self.call_vector(|out, len, err| unsafe {
            (self.unconstrain_array)(data.as_ptr(), cpar.as_ptr(), cpar.len(), out, len, err)
        })
    }

    fn log_prob(&self, data: &ModelData, upar: &[f64], jacobian: bool) -> Result<f64, ModuleError> {
        let data = c_data(data)?;
        let mut out: f64 = 0.0;
        let mut err: *mut c_char = std::ptr::null_mut();
        let status = unsafe {
            (self.log_prob)(
                data.as_ptr(),
                upar.as_ptr(),
                upar.len(),
                jacobian as c_int,
                &mut out,
                &mut err,
            )
        };
        self.check(status, err)?;
        Ok(out)
    }

    fn log_prob_grad(&self, data: &ModelData, upar: &[f64], jacobian: bool) -> Result<Vec<f64>, ModuleError> {
        let data = c_data(data)?;
        self.call_vector(|out, len, err| unsafe {
            (self.log_prob_grad)(
                data.as_ptr(),
                upar.as_ptr(),
                upar.len(),
                jacobian as c_int,
                out,
                len,
                err,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_name_kinds_match_the_glue() {
        assert_eq!(ParamNames::Parameters.abi_code(), 0);
        assert_eq!(ParamNames::Constrained.abi_code(), 1);
        assert_eq!(ParamNames::Unconstrained.abi_code(), 2);
    }

    #[test]
    fn missing_library_fails_to_load() {
        let err = NativeLoader.load(Path::new("/no/such/stanbind_model_x.so")).err().unwrap();
        assert!(matches!(err, ModuleError::LibraryLoad(_)));
    }

    #[test]
    fn non_library_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stanbind_model_bad_000000000000.so");
        std::fs::write(&path, "not a shared library").unwrap();
        assert!(matches!(NativeModule::load(&path), Err(ModuleError::LibraryLoad(_))));
    }
}
