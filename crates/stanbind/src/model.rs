//! Caller-held model wrapper

use crate::data::ModelData;
use crate::error::{EvalError, Result};
use crate::identity::ModelIdentity;
use crate::module::ParamNames;
use crate::runtime::{Compiled, Evaluation, Runtime};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Uncompiled,
    Compiling,
    Ready,
    /// The last compile attempt failed; compiling again retries
    Failed,
}

/// A named Stan program bound to its data.
///
/// The wrapper does not own the cache entry or the loaded module; those live
/// in the `Runtime`.
#[derive(Debug)]
pub struct Model {
    runtime: Arc<Runtime>,
    identity: ModelIdentity,
    source: String,
    data: ModelData,
    n_pars: Option<usize>,
    state: ModelState,
}

impl Model {
    pub fn new(runtime: Arc<Runtime>, name: &str, source: impl Into<String>, data: ModelData) -> Result<Self> {
        Ok(Self {
            runtime,
            identity: ModelIdentity::new(name)?,
            source: source.into(),
            data,
            n_pars: None,
            state: ModelState::Uncompiled,
        })
    }

    pub fn identity(&self) -> &ModelIdentity {
        &self.identity
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn data(&self) -> &ModelData {
        &self.data
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    /// Parameter count resolved by the last successful compile
    pub fn resolved_n_pars(&self) -> Option<usize> {
        self.n_pars
    }

    /// Compile, or reuse the cached module
    pub fn compile(&mut self) -> Result<Compiled> {
        self.state = ModelState::Compiling;
        match self.runtime.compile(&self.identity, &self.source) {
            Ok(compiled) => {
                self.n_pars = self.runtime.n_pars(&self.identity, &self.data);
                self.state = ModelState::Ready;
                Ok(compiled)
            },
            Err(e) => {
                self.n_pars = None;
                self.state = ModelState::Failed;
                Err(e)
            },
        }
    }

    pub fn exists(&self) -> bool {
        self.runtime.exists(&self.identity)
    }

    /// Remove the cache entry and any loaded module
    pub fn delete(&mut self) -> Result<()> {
        self.runtime.delete(&self.identity)?;
        self.n_pars = None;
        self.state = ModelState::Uncompiled;
        Ok(())
    }

    pub fn n_pars(&self) -> Option<usize> {
        self.runtime.n_pars(&self.identity, &self.data)
    }

    pub fn param_names(&self) -> Option<Vec<String>> {
        self.runtime.param_names(&self.identity, &self.data)
    }

    pub fn constrained_param_names(&self) -> Option<Vec<String>> {
        self.runtime.constrained_param_names(&self.identity, &self.data)
    }

    pub fn unconstrained_param_names(&self) -> Option<Vec<String>> {
        self.runtime.unconstrained_param_names(&self.identity, &self.data)
    }

    pub fn constrain_pars(&self, upar: &[f64], include_tparams: bool, include_gqs: bool) -> Option<Evaluation<Vec<f64>>> {
        self.runtime
            .constrain_pars(&self.identity, &self.data, upar, include_tparams, include_gqs)
    }

    pub fn unconstrain_pars(&self, cpar: &[f64]) -> Option<Evaluation<Vec<f64>>> {
        self.runtime.unconstrain_pars(&self.identity, &self.data, cpar)
    }

    pub fn log_prob(&self, upar: &[f64], adjust_transform: bool) -> Option<Evaluation<f64>> {
        self.runtime.log_prob(&self.identity, &self.data, upar, adjust_transform)
    }

    pub fn log_prob_grad(&self, upar: &[f64], adjust_transform: bool) -> Option<Evaluation<Vec<f64>>> {
        self.runtime
            .log_prob_grad(&self.identity, &self.data, upar, adjust_transform)
    }

    pub fn try_n_pars(&self) -> std::result::Result<usize, EvalError> {
        self.runtime.try_n_pars(&self.identity, &self.data)
    }

    pub fn try_param_names(&self, kind: ParamNames) -> std::result::Result<Vec<String>, EvalError> {
        self.runtime.try_param_names(&self.identity, &self.data, kind)
    }

    pub fn try_constrain_pars(
        &self,
        upar: &[f64],
        include_tparams: bool,
        include_gqs: bool,
    ) -> std::result::Result<Vec<f64>, EvalError> {
        self.runtime
            .try_constrain_pars(&self.identity, &self.data, upar, include_tparams, include_gqs)
    }

    pub fn try_unconstrain_pars(&self, cpar: &[f64]) -> std::result::Result<Vec<f64>, EvalError> {
        self.runtime.try_unconstrain_pars(&self.identity, &self.data, cpar)
    }

    pub fn try_log_prob(&self, upar: &[f64], adjust_transform: bool) -> std::result::Result<f64, EvalError> {
        self.runtime
            .try_log_prob(&self.identity, &self.data, upar, adjust_transform)
    }

    pub fn try_log_prob_grad(&self, upar: &[f64], adjust_transform: bool) -> std::result::Result<Vec<f64>, EvalError> {
        self.runtime
            .try_log_prob_grad(&self.identity, &self.data, upar, adjust_transform)
    }
}
