//! Message channel between the pipeline and a front-end.
//!
//! The pipeline holds a [`PresentationHandle`] and pushes every exchange
//! through it. Questions carry a oneshot reply sender; the pipeline blocks
//! on it only while gathering requirements. A dropped receiver or reply
//! sender is the cancellation path and surfaces as [`Error::Presentation`].

use std::fmt;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// One message to the front-end.
#[derive(Debug)]
pub struct PresentationMessage {
    pub sender: String,
    pub text: String,
    reply: Option<oneshot::Sender<String>>,
}

impl PresentationMessage {
    /// Whether the pipeline is waiting for an answer.
    pub fn is_question(&self) -> bool {
        self.reply.is_some()
    }

    /// Delivers the answer to a question. No-op for plain messages.
    pub fn respond(self, answer: impl Into<String>) -> Result<()> {
        match self.reply {
            Some(tx) => tx
                .send(answer.into())
                .map_err(|_| Error::Presentation("pipeline stopped waiting for the reply".to_string())),
            None => Ok(()),
        }
    }
}

/// Sending side, held by the pipeline.
#[derive(Debug, Clone)]
pub struct PresentationHandle {
    tx: mpsc::Sender<PresentationMessage>,
}

impl PresentationHandle {
    /// Shows a message; does not wait for an answer.
    pub async fn show(&self, sender: impl fmt::Display, text: impl Into<String>) -> Result<()> {
        let message = PresentationMessage {
            sender: sender.to_string(),
            text: text.into(),
            reply: None,
        };
        self.tx
            .send(message)
            .await
            .map_err(|_| Error::Presentation("front-end is gone".to_string()))
    }

    /// Asks a question and blocks until the front-end replies.
    pub async fn ask(&self, sender: impl fmt::Display, text: impl Into<String>) -> Result<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let message = PresentationMessage {
            sender: sender.to_string(),
            text: text.into(),
            reply: Some(reply_tx),
        };
        self.tx
            .send(message)
            .await
            .map_err(|_| Error::Presentation("front-end is gone".to_string()))?;

        reply_rx
            .await
            .map_err(|_| Error::Presentation("question was dropped without a reply".to_string()))
    }
}

/// Receiving side, owned by the front-end.
#[derive(Debug)]
pub struct PresentationReceiver {
    rx: mpsc::Receiver<PresentationMessage>,
}

impl PresentationReceiver {
    pub async fn recv(&mut self) -> Option<PresentationMessage> {
        self.rx.recv().await
    }
}

/// Creates a bounded presentation channel.
pub fn channel(capacity: usize) -> (PresentationHandle, PresentationReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PresentationHandle { tx }, PresentationReceiver { rx })
}

/// Terminal front-end: prints messages and reads answers from stdin.
pub struct ConsolePresenter;

impl ConsolePresenter {
    /// Runs the presenter on its own task until the pipeline drops its handle.
    pub fn spawn(mut receiver: PresentationReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut stdin = BufReader::new(tokio::io::stdin()).lines();
            let mut stdout = tokio::io::stdout();

            while let Some(message) = receiver.recv().await {
                let block = format!("\n[{}]\n{}\n", message.sender, message.text);
                if stdout.write_all(block.as_bytes()).await.is_err() {
                    break;
                }

                if message.is_question() {
                    let _ = stdout.write_all(b"> ").await;
                    let _ = stdout.flush().await;
                    let answer = match stdin.next_line().await {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to read reply from stdin");
                            break;
                        }
                    };
                    if let Err(e) = message.respond(answer) {
                        tracing::warn!(error = %e, "reply not delivered");
                    }
                }
                let _ = stdout.flush().await;
            }
        })
    }
}

/// Headless front-end: logs messages and answers questions with `answer`.
pub fn spawn_headless(mut receiver: PresentationReceiver, answer: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            tracing::debug!(sender = %message.sender, chars = message.text.len(), "presentation message");
            if message.is_question() {
                if let Err(e) = message.respond(answer.clone()) {
                    tracing::warn!(error = %e, "reply not delivered");
                }
            }
        }
    })
}
