use std::sync::Arc;

use service_core::retry::retry_call;
use tracing::warn;

use super::error::BackendError;
use super::full_auth::{FullAuthResponse, FullAuthenticator};
use crate::config::ConfigLoader;
use crate::models::ConnectionMetadata;

/// Every call into the [`FullAuthenticator`] goes through here.
///
/// Each attempt is bounded by the configured timeout. Transport failures,
/// timeouts and temporary-unavailable responses are retried with progressive
/// backoff; a rejected credential is returned immediately.
pub struct BackendCaller {
    backend: Arc<dyn FullAuthenticator>,
    loader: Arc<ConfigLoader>,
}

impl BackendCaller {
    pub fn new(backend: Arc<dyn FullAuthenticator>, loader: Arc<ConfigLoader>) -> Self {
        Self { backend, loader }
    }

    pub async fn authenticate(
        &self,
        connection: &ConnectionMetadata,
    ) -> Result<FullAuthResponse, BackendError> {
        let settings = self.loader.snapshot();
        let timeout = settings.backend.timeout();
        let retry = settings.backend.retry_config();
        let backend = self.backend.as_ref();

        retry_call(&retry, "full_authenticate", || async move {
            let response = match tokio::time::timeout(timeout, backend.authenticate(connection)).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "Auth backend call timed out");
                    return Err(BackendError::Timeout);
                }
            };

            if response.is_temporarily_unavailable() {
                return Err(BackendError::Unavailable(
                    response
                        .error_code
                        .clone()
                        .unwrap_or_else(|| "TEMPORARILY_UNAVAILABLE".to_string()),
                ));
            }

            Ok(response)
        })
        .await
    }

    pub fn probe(&self) -> Result<(), BackendError> {
        self.backend.probe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewaySettings;
    use crate::models::UserIdentity;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies from a script; `None` never completes. The last reply repeats.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Option<FullAuthResponse>>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Option<FullAuthResponse>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FullAuthenticator for ScriptedBackend {
        async fn authenticate(
            &self,
            _connection: &ConnectionMetadata,
        ) -> Result<FullAuthResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = {
                let mut replies = self.replies.lock().unwrap();
                if replies.len() > 1 {
                    replies.pop_front().flatten()
                } else {
                    replies.front().cloned().flatten()
                }
            };
            match reply {
                Some(response) => Ok(response),
                None => std::future::pending().await,
            }
        }
    }

    fn caller(backend: Arc<ScriptedBackend>) -> BackendCaller {
        let loader = Arc::new(ConfigLoader::from_settings(GatewaySettings::safe_defaults()));
        BackendCaller::new(backend, loader)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_then_reported() {
        let backend = ScriptedBackend::new(vec![None]);
        let result = caller(backend.clone()).authenticate(&ConnectionMetadata::new()).await;

        assert_eq!(result, Err(BackendError::Timeout));
        assert_eq!(backend.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_temporary_unavailable_response_is_retried() {
        let backend = ScriptedBackend::new(vec![
            Some(FullAuthResponse::rejected("SERVICE_UNAVAILABLE", "draining")),
            Some(FullAuthResponse::accepted(UserIdentity::new("u-1"))),
        ]);

        let result = caller(backend.clone()).authenticate(&ConnectionMetadata::new()).await;

        assert!(result.unwrap().success);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let backend = ScriptedBackend::new(vec![Some(FullAuthResponse::rejected(
            "TOKEN_EXPIRED",
            "expired",
        ))]);
        let result = caller(backend.clone()).authenticate(&ConnectionMetadata::new()).await;

        let response = result.unwrap();
        assert!(!response.success);
        assert_eq!(response.error_code.as_deref(), Some("TOKEN_EXPIRED"));
        assert_eq!(backend.calls(), 1);
    }
}
