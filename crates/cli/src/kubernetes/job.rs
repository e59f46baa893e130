//! Manifest of the ephemeral profiling job

use super::{AGENT_CONTAINER_NAME, JOB_ID_LABEL};
use flame_lib::ProfilingJob;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, HostPathVolumeSource, PodSpec, PodTemplateSpec, SecurityContext, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Finished jobs are garbage collected after this many seconds
const JOB_TTL_SECONDS: i32 = 60;

/// Host directories the agent reads for kernel-level profilers
///
/// Must not cover `/usr/src`: the image stages kernel sources there.
const HOST_MOUNTS: [(&str, &str); 1] = [("modules", "/lib/modules")];

/// Where and how the job is scheduled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    /// Agent image
    pub image: String,
    /// Node hosting the target pod
    pub node_name: String,
    /// Namespace the job is created in
    pub namespace: String,
}

/// Name of the job created for `job_id`
pub fn job_name(job_id: &str) -> String {
    format!("kubectl-flame-{job_id}")
}

/// Build the job running the agent next to the target
pub fn build_job(job: &ProfilingJob, settings: &JobSettings) -> Job {
    let labels = BTreeMap::from([(JOB_ID_LABEL.to_string(), job.id.clone())]);

    let container = Container {
        name: AGENT_CONTAINER_NAME.to_string(),
        image: Some(settings.image.clone()),
        env: Some(agent_env(job)),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..SecurityContext::default()
        }),
        volume_mounts: Some(
            HOST_MOUNTS
                .iter()
                .map(|(name, path)| VolumeMount {
                    name: name.to_string(),
                    mount_path: path.to_string(),
                    read_only: Some(true),
                    ..VolumeMount::default()
                })
                .collect(),
        ),
        ..Container::default()
    };

    let volumes = HOST_MOUNTS
        .iter()
        .map(|(name, path)| Volume {
            name: name.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: path.to_string(),
                type_: Some("Directory".to_string()),
            }),
            ..Volume::default()
        })
        .collect();

    Job {
        metadata: ObjectMeta {
            name: Some(job_name(&job.id)),
            namespace: Some(settings.namespace.clone()),
            labels: Some(labels.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(JOB_TTL_SECONDS),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    host_pid: Some(true),
                    node_name: Some(settings.node_name.clone()),
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..PodSpec::default()
                }),
            },
            ..JobSpec::default()
        }),
        status: None,
    }
}

/// Environment read back by the agent's `FLAME_*` configuration
fn agent_env(job: &ProfilingJob) -> Vec<EnvVar> {
    let target = &job.target;
    let mut vars = vec![
        ("FLAME_JOB_ID", job.id.clone()),
        ("FLAME_LANGUAGE", job.language.to_string()),
        ("FLAME_DURATION_SECS", job.duration_secs().to_string()),
        ("FLAME_NAMESPACE", job.namespace.clone()),
        ("FLAME_POD_NAME", target.pod_name.clone()),
        ("FLAME_POD_UID", target.pod_uid.clone()),
        ("FLAME_CONTAINER_NAME", target.container_name.clone()),
        ("FLAME_CONTAINER_ID", target.container_id.clone()),
    ];
    if let Some(process) = &target.process_name {
        vars.push(("FLAME_PROCESS_NAME", process.clone()));
    }

    vars.into_iter()
        .map(|(name, value)| EnvVar {
            name: name.to_string(),
            value: Some(value),
            ..EnvVar::default()
        })
        .collect()
}
