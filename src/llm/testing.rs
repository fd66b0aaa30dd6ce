//! Scripted language model for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::client::{LanguageModel, ModelRequest, ModelTask};
use super::offline::OfflineModel;
use crate::error::ModelError;

type Responder = Box<dyn Fn(&ModelRequest) -> Result<String, ModelError> + Send + Sync>;

/// Replies from per-task queues first, then from a fallback responder
pub struct ScriptedModel {
    queued: Mutex<HashMap<ModelTask, VecDeque<Result<String, ModelError>>>>,
    fallback: Responder,
    calls: Mutex<Vec<ModelTask>>,
}

impl ScriptedModel {
    pub fn new(fallback: impl Fn(&ModelRequest) -> Result<String, ModelError> + Send + Sync + 'static) -> Self {
        Self {
            queued: Mutex::new(HashMap::new()),
            fallback: Box::new(fallback),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Falls back to the offline model's answers
    pub fn offline() -> Self {
        let offline = OfflineModel::new();
        Self::new(move |request| offline.respond(request))
    }

    /// Queue a reply for the next call of `task`
    pub fn push(&self, task: ModelTask, reply: Result<String, ModelError>) -> &Self {
        self.queued
            .lock()
            .unwrap()
            .entry(task)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self, task: ModelTask) -> usize {
        self.calls.lock().unwrap().iter().filter(|t| **t == task).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        self.calls.lock().unwrap().push(request.task);
        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&request.task)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(reply) => reply,
            None => (self.fallback)(request),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
