//! Single-consumer queue of state updates.
//!
//! Background tasks never touch shared state. They enqueue closures through an
//! [`UpdateSender`]; the thread that owns the state and the presentation tree drains the
//! matching [`UpdateQueue`], applying closures one at a time in enqueue order.

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};

pub type Update<S> = Box<dyn FnOnce(&mut S) + Send>;

pub trait Redraw {
    fn request_redraw(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("update queue is closed")]
    Closed,
}

#[must_use]
pub fn update_channel<S>() -> (UpdateSender<S>, UpdateQueue<S>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UpdateSender { tx }, UpdateQueue { rx })
}

pub struct UpdateSender<S> {
    tx: mpsc::UnboundedSender<Update<S>>,
}

impl<S> Clone for UpdateSender<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S> std::fmt::Debug for UpdateSender<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<S> UpdateSender<S> {
    pub fn enqueue<F>(&self, update: F) -> Result<(), DispatchError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx
            .send(Box::new(update))
            .map_err(|_| DispatchError::Closed)
    }
}

pub struct UpdateQueue<S> {
    rx: mpsc::UnboundedReceiver<Update<S>>,
}

impl<S> std::fmt::Debug for UpdateQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateQueue").finish_non_exhaustive()
    }
}

impl<S: Redraw> UpdateQueue<S> {
    pub fn apply_pending(&mut self, state: &mut S) -> usize {
        let mut applied = 0;
        loop {
            match self.rx.try_recv() {
                Ok(update) => {
                    Self::apply(update, state);
                    applied += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return applied,
            }
        }
    }

    pub async fn apply_next(&mut self, state: &mut S) -> bool {
        match self.rx.recv().await {
            Some(update) => {
                Self::apply(update, state);
                true
            }
            None => false,
        }
    }

    fn apply(update: Update<S>, state: &mut S) {
        update(state);
        state.request_redraw();
    }
}
