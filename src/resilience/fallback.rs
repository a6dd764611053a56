//! Remote-first routing with a local fallback

use super::classifier::classify;
use super::retry::{RetryExecutor, RetryOptions, UploadAttempt};
use crate::utils::error::{ClassifiedError, RawError};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Which side of the router produced a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Remote,
    Local,
}

/// Value produced by [`FallbackRouter::run`]
#[derive(Debug, Clone)]
pub struct Routed<T> {
    pub value: T,
    pub route: Route,
    /// Retry record of the primary operation, `None` when it was skipped
    pub primary: Option<UploadAttempt>,
}

/// Runs a primary operation under retry and falls back to a local operation
#[derive(Debug, Clone)]
pub struct FallbackRouter {
    backend_enabled: bool,
}

impl FallbackRouter {
    pub fn new(backend_enabled: bool) -> Self {
        Self { backend_enabled }
    }

    pub fn backend_enabled(&self) -> bool {
        self.backend_enabled
    }

    /// Runs `primary` through a [`RetryExecutor`] and `fallback` on failure
    ///
    /// When both fail, the primary error is returned. When the backend is
    /// disabled, `primary` is never invoked.
    pub async fn run<T, P, PFut, F, FFut>(
        &self,
        context: &str,
        options: &RetryOptions,
        primary: P,
        fallback: F,
    ) -> Result<Routed<T>, ClassifiedError>
    where
        P: FnMut(u32) -> PFut,
        PFut: Future<Output = Result<T, RawError>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<T, RawError>>,
    {
        if !self.backend_enabled {
            tracing::debug!("{}: backend disabled, using local fallback", context);
            return match fallback().await {
                Ok(value) => Ok(Routed {
                    value,
                    route: Route::Local,
                    primary: None,
                }),
                Err(raw) => Err(classify(&raw, context)),
            };
        }

        let executor = RetryExecutor::new(options.clone());
        let (result, record) = executor.run_tracked(context, primary).await;

        let primary_error = match result {
            Ok(value) => {
                return Ok(Routed {
                    value,
                    route: Route::Remote,
                    primary: Some(record),
                })
            }
            Err(error) => error,
        };

        tracing::warn!(
            "{}: remote failed after {} attempts ({}), trying local fallback",
            context,
            record.attempts,
            primary_error.kind
        );

        match fallback().await {
            Ok(value) => Ok(Routed {
                value,
                route: Route::Local,
                primary: Some(record),
            }),
            Err(fallback_error) => {
                tracing::error!(
                    "{}: local fallback failed too: {}",
                    context,
                    fallback_error
                );
                Err(primary_error)
            }
        }
    }
}
