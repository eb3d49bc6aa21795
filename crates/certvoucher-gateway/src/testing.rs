//! Scripted collaborators for tests. **Never use in production.**

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use certvoucher_types::IssuerSituation;
use tokio::time::Instant;

use crate::{
    error::GatewayError,
    issuer::IssuerClient,
    notifier::{CompletionNotice, CompletionNotifier},
};

/// Canned answer for one voucher code.
#[derive(Debug, Clone)]
pub enum Reply {
    Situation(IssuerSituation),
    /// Answer with a non-2xx status.
    Status(u16),
    /// Sleep this long before answering "unused".
    Hang(Duration),
}

/// [`IssuerClient`] answering from a per-code script.
///
/// Codes without a script are reported as not used yet.
#[derive(Debug, Default)]
pub struct ScriptedIssuer {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, code: &str, reply: Reply) {
        lock(&self.replies).insert(code.to_string(), reply);
    }

    pub fn situation(&self, code: &str, situation: IssuerSituation) {
        self.set(code, Reply::Situation(situation));
    }

    /// Codes queried so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|(code, _)| code.clone()).collect()
    }

    /// When each call arrived, in call order. Follows tokio's clock, so
    /// paused-time tests see exact delays.
    pub fn call_times(&self) -> Vec<Instant> {
        lock(&self.calls).iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl IssuerClient for ScriptedIssuer {
    async fn query_situation(&self, code: &str) -> Result<IssuerSituation, GatewayError> {
        lock(&self.calls).push((code.to_string(), Instant::now()));
        let reply = lock(&self.replies).get(code).cloned();
        match reply {
            None => Ok(IssuerSituation::unused()),
            Some(Reply::Situation(s)) => Ok(s),
            Some(Reply::Status(status)) => Err(GatewayError::Status {
                status,
                body: "scripted".into(),
            }),
            Some(Reply::Hang(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(IssuerSituation::unused())
            }
        }
    }
}

/// [`CompletionNotifier`] that keeps every notice it receives.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<CompletionNotice>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every delivery fails (after recording the notice).
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.failing.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn notices(&self) -> Vec<CompletionNotice> {
        lock(&self.notices).clone()
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), GatewayError> {
        lock(&self.notices).push(notice.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 502,
                body: "scripted".into(),
            });
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
