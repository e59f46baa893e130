//! In-memory [`ClusterApi`] for tests

use super::{ClusterApi, LogStream};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Pod on `node-a` with containers `server` and `sidecar`
pub fn pod_with_phase(name: &str, namespace: &str, phase: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            node_name: Some("node-a".to_string()),
            containers: ["server", "sidecar"]
                .iter()
                .map(|name| Container {
                    name: name.to_string(),
                    ..Container::default()
                })
                .collect(),
            ..PodSpec::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            container_statuses: Some(vec![
                ContainerStatus {
                    name: "server".to_string(),
                    container_id: Some("containerd://server-0001".to_string()),
                    ..ContainerStatus::default()
                },
                ContainerStatus {
                    name: "sidecar".to_string(),
                    container_id: Some("containerd://sidecar-0002".to_string()),
                    ..ContainerStatus::default()
                },
            ]),
            ..PodStatus::default()
        }),
    }
}

pub fn api_error(code: u16) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "scripted failure".to_string(),
        reason: "InternalError".to_string(),
        code,
    })
}

/// One scripted answer to `list_pods`
pub enum ListAnswer {
    Pods(Vec<Pod>),
    Error(u16),
}

#[derive(Default)]
pub struct FakeCluster {
    pods: Mutex<Vec<Pod>>,
    list_answers: Mutex<VecDeque<ListAnswer>>,
    list_calls: Mutex<Vec<String>>,
    logs: Mutex<Option<Vec<u8>>>,
    log_requests: Mutex<Vec<(String, String, bool)>>,
    created: Mutex<Vec<Job>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pod(self, pod: Pod) -> Self {
        self.pods.lock().unwrap().push(pod);
        self
    }

    /// Queue answers for successive `list_pods` calls; the last one repeats
    pub fn with_list_answers(self, answers: Vec<ListAnswer>) -> Self {
        self.list_answers.lock().unwrap().extend(answers);
        self
    }

    pub fn with_logs(self, logs: &[u8]) -> Self {
        *self.logs.lock().unwrap() = Some(logs.to_vec());
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.lock().unwrap().len()
    }

    pub fn selectors(&self) -> Vec<String> {
        self.list_calls.lock().unwrap().clone()
    }

    pub fn log_requests(&self) -> Vec<(String, String, bool)> {
        self.log_requests.lock().unwrap().clone()
    }

    pub fn created_jobs(&self) -> Vec<Job> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted_jobs(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, kube::Error> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .find(|pod| {
                pod.metadata.name.as_deref() == Some(name)
                    && pod.metadata.namespace.as_deref() == Some(namespace)
            })
            .cloned())
    }

    async fn list_pods(&self, _namespace: &str, selector: &str) -> Result<Vec<Pod>, kube::Error> {
        self.list_calls.lock().unwrap().push(selector.to_string());

        let mut answers = self.list_answers.lock().unwrap();
        let answer = if answers.len() > 1 {
            answers.pop_front()
        } else {
            answers.front().map(|answer| match answer {
                ListAnswer::Pods(pods) => ListAnswer::Pods(pods.clone()),
                ListAnswer::Error(code) => ListAnswer::Error(*code),
            })
        };

        match answer {
            Some(ListAnswer::Pods(pods)) => Ok(pods),
            Some(ListAnswer::Error(code)) => Err(api_error(code)),
            None => Ok(Vec::new()),
        }
    }

    async fn pod_logs(
        &self,
        _namespace: &str,
        name: &str,
        container: &str,
        follow: bool,
    ) -> Result<LogStream, kube::Error> {
        self.log_requests
            .lock()
            .unwrap()
            .push((name.to_string(), container.to_string(), follow));

        match self.logs.lock().unwrap().clone() {
            Some(bytes) => Ok(Box::new(tokio::io::BufReader::new(std::io::Cursor::new(
                bytes,
            )))),
            None => Err(api_error(400)),
        }
    }

    async fn create_job(&self, _namespace: &str, job: &Job) -> Result<Job, kube::Error> {
        self.created.lock().unwrap().push(job.clone());
        Ok(job.clone())
    }

    async fn delete_job(&self, _namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }
}
