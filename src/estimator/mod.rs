//! Learned property estimator.
//!
//! [`Estimator`] is what the search asks ("how good will this linker be?").
//! Finished linkers are fed back to it, so the model keeps learning while the
//! run goes on. [`RemoteEstimator`] does both by talking to the learning
//! server through a [`LearningClient`] using the line protocol in [`protocol`].

pub mod client;
pub mod error;
pub mod protocol;

use std::future::Future;

use tokio::sync::Mutex;
use tracing::debug;

pub use client::{LearningClient, TcpLearningClient};
pub use error::EstimatorError;
pub use protocol::{AddRequest, PredictRequest, Reply, Scope};

pub trait Estimator: Send + Sync + 'static {
    /// Predicted property for a linker whose features have already been
    /// computed into the `scope` feature directory.
    fn predict(
        &self,
        linker_id: &str,
        scope: Scope,
    ) -> impl Future<Output = Result<f64, EstimatorError>> + Send;

    /// Add a finished linker, whose feature and property files are on disk,
    /// to the training set. Returns the training set size.
    fn add_observation(
        &self,
        linker_id: &str,
    ) -> impl Future<Output = Result<usize, EstimatorError>> + Send;
}

/// Estimator backed by the learning server. Requests are serialized over a
/// single connection, opened lazily and reopened after a failure.
pub struct RemoteEstimator<C> {
    client: Mutex<C>,
}

impl<C: LearningClient> RemoteEstimator<C> {
    pub fn new(client: C) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }

    /// One request line, one reply line.
    async fn exchange(&self, request: &str) -> Result<Reply, EstimatorError> {
        let mut client = self.client.lock().await;
        if !client.is_connected() {
            client.connect().await?;
        }
        client.send(request).await?;
        let line = client.receive().await?;
        debug!(%request, reply = %line, "estimator reply");
        Reply::parse(&line)
    }
}

impl<C: LearningClient + 'static> Estimator for RemoteEstimator<C> {
    async fn predict(&self, linker_id: &str, scope: Scope) -> Result<f64, EstimatorError> {
        let request = PredictRequest { linker_id, scope };
        match self.exchange(&request.to_line()).await? {
            Reply::Value(value) => Ok(value),
            Reply::Error(reason) => Err(EstimatorError::Server(reason)),
        }
    }

    async fn add_observation(&self, linker_id: &str) -> Result<usize, EstimatorError> {
        let request = AddRequest { linker_id };
        self.exchange(&request.to_line()).await?.into_count()
    }
}
