//! Processor pipelines over the turns of a list

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use weft_message::Turn;

use crate::{
    error::{Error, Result},
    message_list::{MessageList, MessageSource},
};

/// How a processor can fail
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// The processor tripped the pipeline on purpose
    #[error("{0}")]
    Abort(String),

    #[error("{0}")]
    Failed(String),
}

impl ProcessorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Handed to each processor so it can halt the pipeline
#[derive(Debug, Clone)]
pub struct Tripwire {
    processor: String,
}

impl Tripwire {
    pub fn new(processor: impl Into<String>) -> Self {
        Self {
            processor: processor.into(),
        }
    }

    pub fn processor(&self) -> &str {
        &self.processor
    }

    /// Build the abort error for this processor; return it from `process`
    pub fn trigger(&self, reason: Option<String>) -> ProcessorError {
        ProcessorError::Abort(
            reason.unwrap_or_else(|| format!("Tripwire triggered by {}", self.processor)),
        )
    }
}

/// A named transformation over turns
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    /// Transform, filter or replace turns. Return `tripwire.trigger(..)` to
    /// stop the pipeline.
    async fn process(
        &self,
        turns: Vec<Turn>,
        tripwire: &Tripwire,
    ) -> std::result::Result<Vec<Turn>, ProcessorError>;
}

/// Runs processors in registration order, each fed the previous output
#[derive(Clone, Default)]
pub struct ProcessorRunner {
    processors: Vec<Arc<dyn Processor>>,
    cancel: Option<CancellationToken>,
}

impl ProcessorRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a processor
    pub fn with_processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    pub fn add(&mut self, processor: Arc<dyn Processor>) {
        self.processors.push(processor);
    }

    /// Stop before the next processor once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Run the pipeline. The first abort stops it; later processors never run.
    pub async fn run(&self, mut turns: Vec<Turn>) -> Result<Vec<Turn>> {
        for processor in &self.processors {
            let name = processor.name();
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                debug!(processor = name, "Pipeline cancelled");
                return Err(Error::Aborted {
                    processor: name.to_string(),
                    reason: "cancelled".to_string(),
                });
            }

            debug!(processor = name, turns = turns.len(), "Running processor");
            let tripwire = Tripwire::new(name);
            turns = match processor.process(turns, &tripwire).await {
                Ok(turns) => turns,
                Err(ProcessorError::Abort(reason)) => {
                    warn!(processor = name, reason = %reason, "Pipeline aborted");
                    return Err(Error::Aborted {
                        processor: name.to_string(),
                        reason,
                    });
                }
                Err(ProcessorError::Failed(message)) => {
                    return Err(Error::Processor {
                        processor: name.to_string(),
                        message,
                    });
                }
            };
        }
        Ok(turns)
    }

    /// Run the pipeline over the list's new user turns
    pub async fn run_input(&self, list: &mut MessageList) -> Result<()> {
        self.run_source(list, MessageSource::User).await
    }

    /// Run the pipeline over the list's new response turns
    pub async fn run_output(&self, list: &mut MessageList) -> Result<()> {
        self.run_source(list, MessageSource::Response).await
    }

    /// Run the turns of `source` and put the results back in place. After an
    /// abort those turns are removed; after any other failure the list is
    /// left as it was.
    async fn run_source(&self, list: &mut MessageList, source: MessageSource) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let turns = list.by_source(source);
        if turns.is_empty() {
            return Ok(());
        }

        match self.run(turns).await {
            Ok(processed) => list.replace_source(processed, source),
            Err(e) if e.is_abort() => {
                list.take_source(source);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
