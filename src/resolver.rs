//! # Model Resolver
//!
//! Maps a `ModelChoice` to a loaded `ModelHandle`. Handles are cached per
//! choice until `clear()` is called. Every choice has its own slot mutex, so
//! two callers racing on the first access share a single load: the loser
//! blocks on the slot until the winner has stored the handle.
//!
//! `HighQuality` falls back to `Fast` exactly once when its backend cannot be
//! loaded. The fallback goes through the `Fast` slot, so a degraded
//! high-quality handle is the very same instance `resolve(Fast)` returns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::{BackendSpec, ModelChoice, ModelHandle, ModelProvider};
use crate::error::ModelLoadError;

/// Backend specs for each choice.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCatalog {
    pub fast: BackendSpec,
    pub high_quality: BackendSpec,
}

impl ModelCatalog {
    pub fn spec_for(&self, choice: ModelChoice) -> &BackendSpec {
        match choice {
            ModelChoice::Fast => &self.fast,
            ModelChoice::HighQuality => &self.high_quality,
        }
    }
}

/// Result of a resolve call.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub handle: ModelHandle,
    /// Warnings raised by this call. Empty on a cache hit.
    pub warnings: Vec<String>,
    /// Success messages raised by this call, such as a completed
    /// high-quality load. Empty on a cache hit.
    pub info: Vec<String>,
}

type Slot = Arc<Mutex<Option<ModelHandle>>>;

pub struct ModelResolver {
    provider: Arc<dyn ModelProvider>,
    catalog: ModelCatalog,
    slots: Mutex<HashMap<ModelChoice, Slot>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic inside a load leaves the slot empty, which is a valid state.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ModelResolver {
    pub fn new(provider: Arc<dyn ModelProvider>, catalog: ModelCatalog) -> Self {
        Self {
            provider,
            catalog,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn resolve(&self, choice: ModelChoice) -> Result<Resolved, ModelLoadError> {
        let slot = self.slot(choice);
        let mut cached = lock(&slot);
        if let Some(handle) = cached.as_ref() {
            log::debug!("Model cache hit for {}", choice);
            return Ok(Resolved {
                handle: handle.clone(),
                warnings: Vec::new(),
                info: Vec::new(),
            });
        }

        let resolved = self.load(choice)?;
        *cached = Some(resolved.handle.clone());
        Ok(resolved)
    }

    /// Returns the handle cached for `choice` without loading anything.
    pub fn cached(&self, choice: ModelChoice) -> Option<ModelHandle> {
        let slot = lock(&self.slots).get(&choice).cloned()?;
        let cached = lock(&slot);
        cached.clone()
    }

    /// Drops every cached handle. Returns how many were held.
    ///
    /// Blocks until any load still in flight has finished, then drops that
    /// handle as well and counts it. The caller of the in-flight `resolve`
    /// still gets its handle, but the next `resolve` loads again.
    pub fn clear(&self) -> usize {
        let drained: Vec<Slot> = lock(&self.slots).drain().map(|(_, slot)| slot).collect();
        let mut released = 0;
        for slot in drained {
            if lock(&slot).take().is_some() {
                released += 1;
            }
        }
        log::info!("Cleared model cache ({} handle(s) released)", released);
        released
    }

    fn slot(&self, choice: ModelChoice) -> Slot {
        Arc::clone(lock(&self.slots).entry(choice).or_default())
    }

    fn load(&self, choice: ModelChoice) -> Result<Resolved, ModelLoadError> {
        let spec = self.catalog.spec_for(choice);
        log::info!("Loading {} model: {}", choice, spec);

        match choice {
            ModelChoice::Fast => {
                let backend = self.provider.load(spec)?;
                log::info!("Loaded {}", spec);
                Ok(Resolved {
                    handle: ModelHandle::new(spec.clone(), backend),
                    warnings: Vec::new(),
                    info: Vec::new(),
                })
            }
            ModelChoice::HighQuality => match self.provider.load(spec) {
                Ok(backend) => {
                    log::info!("Loaded {}", spec);
                    Ok(Resolved {
                        handle: ModelHandle::new(spec.clone(), backend),
                        warnings: Vec::new(),
                        info: vec![format!("Loaded {}", spec)],
                    })
                }
                Err(primary) => {
                    let warning = format!(
                        "Failed to load {}: {}. Falling back to {}",
                        spec, primary, self.catalog.fast
                    );
                    log::warn!("{}", warning);
                    let fallback = self.resolve(ModelChoice::Fast).map_err(|fallback| {
                        ModelLoadError::FallbackFailed {
                            primary: Box::new(primary),
                            fallback: Box::new(fallback),
                        }
                    })?;
                    let mut warnings = vec![warning];
                    warnings.extend(fallback.warnings);
                    Ok(Resolved {
                        handle: fallback.handle,
                        warnings,
                        info: fallback.info,
                    })
                }
            },
        }
    }
}
