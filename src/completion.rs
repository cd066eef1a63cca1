//! Completion tokens for event handlers.
//!
//! Work a handler registers with [`Completion::wait_until`] keeps running after
//! the handler returns; the host awaits [`Completion::settled`] before it
//! considers the event finished.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::future::Future;
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct Completion {
  tasks: Vec<JoinHandle<Result<()>>>,
}

impl Completion {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start `work` and keep the event alive until it finishes.
  pub fn wait_until<F>(&mut self, work: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    self.tasks.push(tokio::spawn(work));
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  /// Wait for all registered work. Every task runs to completion; the first
  /// failure, if any, is returned.
  pub async fn settled(self) -> Result<()> {
    let mut first_error = None;

    for outcome in join_all(self.tasks).await {
      let result = outcome.map_err(|e| eyre!("Event task panicked: {}", e)).and_then(|r| r);
      if let Err(e) = result {
        first_error.get_or_insert(e);
      }
    }

    match first_error {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}
