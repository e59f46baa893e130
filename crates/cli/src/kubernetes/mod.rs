//! Kubernetes access for the controller
//!
//! All cluster calls go through [`ClusterApi`]. The controller builds one
//! [`KubeCluster`] per invocation and passes it to every component; tests
//! substitute an in-memory fake.

pub mod job;
pub mod logs;
pub mod pod;
pub mod watch;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio_util::compat::FuturesAsyncReadCompatExt;

/// Label key identifying the resources of one profiling job
pub const JOB_ID_LABEL: &str = "kubectl-flame/id";

/// Name of the agent container inside the profiling pod
pub const AGENT_CONTAINER_NAME: &str = "kubectl-flame";

/// Selector matching the pod created for `job_id`
pub fn label_selector(job_id: &str) -> String {
    format!("{JOB_ID_LABEL}={job_id}")
}

/// Live, buffered log output of a container
pub type LogStream = Box<dyn AsyncBufRead + Send + Unpin>;

/// Errors from the lifecycle and streaming side of a job
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("no running pod matched {selector} within {waited:?}")]
    Timeout { selector: String, waited: Duration },

    #[error("profiling pod {namespace}/{name} failed")]
    Failed { namespace: String, name: String },

    #[error("failed to attach to logs of {namespace}/{name}: {source}")]
    Attach {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("could not find container id for {container} in pod {pod}")]
    ContainerNotFound { container: String, pod: String },

    #[error("wait for pod {selector} was cancelled")]
    Cancelled { selector: String },

    #[error("kubernetes API error: {0}")]
    Api(#[from] kube::Error),
}

/// The cluster operations the controller needs
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, kube::Error>;

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, kube::Error>;

    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        follow: bool,
    ) -> Result<LogStream, kube::Error>;

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, kube::Error>;

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;
}

/// [`ClusterApi`] backed by a real API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, kube::Error> {
        self.pods(namespace).get_opt(name).await
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, kube::Error> {
        let params = ListParams::default().labels(selector);
        Ok(self.pods(namespace).list(&params).await?.items)
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        follow: bool,
    ) -> Result<LogStream, kube::Error> {
        let params = LogParams {
            follow,
            container: Some(container.to_string()),
            ..LogParams::default()
        };

        let reader = self.pods(namespace).log_stream(name, &params).await?;
        Ok(Box::new(tokio::io::BufReader::new(
            Box::pin(reader).compat(),
        )))
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, kube::Error> {
        self.jobs(namespace).create(&PostParams::default(), job).await
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.jobs(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
    }
}
