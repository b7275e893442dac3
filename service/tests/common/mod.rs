//! Shared stubs for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use keystone_service::providers::{AuthCheck, Provider, ProviderError, Validator};

#[derive(Clone, Copy)]
pub enum Mode {
    Accept,
    Reject,
    Unreachable,
}

/// Auth check whose answer the test can change between calls.
#[derive(Clone)]
pub struct ScriptedCheck {
    pub provider: Provider,
    pub mode: Arc<Mutex<Mode>>,
}

impl AuthCheck for ScriptedCheck {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn check_auth(&self, _raw_key: &str) -> Result<(), ProviderError> {
        let mode = *self.mode.lock().unwrap();
        match mode {
            Mode::Accept => Ok(()),
            Mode::Reject => Err(ProviderError::Auth("HTTP 401".into())),
            Mode::Unreachable => Err(ProviderError::Unavailable(503)),
        }
    }
}

/// A validator with a scripted auth check for every provider, all sharing `mode`.
pub fn scripted_validator(mode: &Arc<Mutex<Mode>>) -> Validator {
    Provider::ALL
        .into_iter()
        .fold(Validator::new(Duration::from_secs(5), 4), |v, provider| {
            v.with_check(ScriptedCheck {
                provider,
                mode: Arc::clone(mode),
            })
        })
}
