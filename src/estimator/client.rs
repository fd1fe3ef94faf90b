use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::error::EstimatorError;

/// Message-level access to the learning server.
pub trait LearningClient: Send {
    fn connect(&mut self) -> impl Future<Output = Result<(), EstimatorError>> + Send;

    /// Send one message; a trailing newline is added.
    fn send(&mut self, message: &str) -> impl Future<Output = Result<(), EstimatorError>> + Send;

    /// Wait for the next line from the server, without its newline.
    fn receive(&mut self) -> impl Future<Output = Result<String, EstimatorError>> + Send;

    fn is_connected(&self) -> bool;
}

pub struct TcpLearningClient {
    addr: String,
    stream: Option<BufReader<TcpStream>>,
    reply_timeout: Duration,
}

impl TcpLearningClient {
    pub fn with_timeout(addr: impl Into<String>, reply_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
            reply_timeout,
        }
    }

    // Any I/O failure drops the stream; the next call reconnects.
    fn reset<T>(&mut self, err: EstimatorError) -> Result<T, EstimatorError> {
        self.stream = None;
        Err(err)
    }
}

impl LearningClient for TcpLearningClient {
    async fn connect(&mut self) -> Result<(), EstimatorError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| EstimatorError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;
        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    async fn send(&mut self, message: &str) -> Result<(), EstimatorError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(EstimatorError::NotConnected);
        };
        let mut line = message.trim_end().to_string();
        line.push('\n');
        let write = async {
            let inner = stream.get_mut();
            inner.write_all(line.as_bytes()).await?;
            inner.flush().await
        };
        match write.await {
            Ok(()) => Ok(()),
            Err(e) => self.reset(e.into()),
        }
    }

    async fn receive(&mut self) -> Result<String, EstimatorError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(EstimatorError::NotConnected);
        };
        let mut line = String::new();
        let millis = self.reply_timeout.as_millis() as u64;
        match timeout(self.reply_timeout, stream.read_line(&mut line)).await {
            Err(_) => self.reset(EstimatorError::Timeout(millis)),
            Ok(Err(e)) => self.reset(e.into()),
            Ok(Ok(0)) => self.reset(EstimatorError::Closed),
            Ok(Ok(_)) => Ok(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
