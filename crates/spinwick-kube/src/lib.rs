//! Kubernetes collaborator for namespace-based SpinWicks. One namespace per
//! environment; the workspace runs as a single deployment fronted by a
//! LoadBalancer service whose ingress hostname becomes the access URL.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Namespace, PodSpec, PodTemplateSpec, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Config};
use thiserror::Error;

pub use k8s_openapi::api::apps::v1::Deployment as WorkspaceDeployment;
pub use k8s_openapi::api::core::v1::Service as WorkspaceService;

const WORKSPACE_PORT: i32 = 8065;

#[derive(Debug, Error)]
pub enum KubeError {
    #[error("kubernetes request failed: {0}")]
    Client(#[from] kube::Error),
    #[error("kubernetes config error: {0}")]
    Configuration(String),
    #[error("no deployment {name} in namespace {namespace}")]
    MissingDeployment { namespace: String, name: String },
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn namespace_exists(&self, name: &str) -> Result<bool, KubeError>;
    async fn ensure_namespace(&self, name: &str) -> Result<(), KubeError>;
    async fn delete_namespace(&self, name: &str) -> Result<(), KubeError>;
    async fn apply_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), KubeError>;
    async fn apply_service(&self, namespace: &str, service: &Service) -> Result<(), KubeError>;
    async fn set_deployment_image(
        &self,
        namespace: &str,
        name: &str,
        image: &str,
    ) -> Result<(), KubeError>;
    /// Single-shot ingress lookup; polling cadence is the caller's policy.
    async fn load_balancer_ingress(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Option<String>, KubeError>;
}

pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Connects using the inferred config (in-cluster service account or the
    /// local kubeconfig).
    pub async fn connect() -> Result<Self, KubeError> {
        let config = Config::infer()
            .await
            .map_err(|error| KubeError::Configuration(error.to_string()))?;
        let client = Client::try_from(config)?;
        Ok(Self { client })
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterClient {
    async fn namespace_exists(&self, name: &str) -> Result<bool, KubeError> {
        Ok(self.namespaces().get_opt(name).await?.is_some())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<(), KubeError> {
        if self.namespaces().get_opt(name).await?.is_some() {
            return Ok(());
        }

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        self.namespaces()
            .create(&PostParams::default(), &namespace)
            .await?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), KubeError> {
        self.namespaces()
            .delete(name, &DeleteParams::foreground().grace_period(0))
            .await?;
        Ok(())
    }

    async fn apply_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), KubeError> {
        let api = self.deployments(namespace);
        let name = deployment.metadata.name.clone().unwrap_or_default();
        match api.get_opt(&name).await? {
            Some(_) => {
                api.replace(&name, &PostParams::default(), deployment)
                    .await?;
            }
            None => {
                api.create(&PostParams::default(), deployment).await?;
            }
        }
        Ok(())
    }

    async fn apply_service(&self, namespace: &str, service: &Service) -> Result<(), KubeError> {
        let api = self.services(namespace);
        let name = service.metadata.name.clone().unwrap_or_default();
        if api.get_opt(&name).await?.is_none() {
            api.create(&PostParams::default(), service).await?;
        }
        Ok(())
    }

    async fn set_deployment_image(
        &self,
        namespace: &str,
        name: &str,
        image: &str,
    ) -> Result<(), KubeError> {
        let api = self.deployments(namespace);
        let Some(mut deployment) = api.get_opt(name).await? else {
            return Err(KubeError::MissingDeployment {
                namespace: namespace.to_owned(),
                name: name.to_owned(),
            });
        };

        if let Some(spec) = deployment.spec.as_mut() {
            if let Some(pod_spec) = spec.template.spec.as_mut() {
                for container in &mut pod_spec.containers {
                    container.image = Some(image.to_owned());
                }
                if let Some(init_containers) = pod_spec.init_containers.as_mut() {
                    for container in init_containers {
                        container.image = Some(image.to_owned());
                    }
                }
            }
        }

        api.replace(name, &PostParams::default(), &deployment)
            .await?;
        Ok(())
    }

    async fn load_balancer_ingress(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Option<String>, KubeError> {
        let Some(service) = self.services(namespace).get_opt(service).await? else {
            return Ok(None);
        };

        let ingress = service
            .status
            .and_then(|status| status.load_balancer)
            .and_then(|lb| lb.ingress)
            .and_then(|entries| entries.into_iter().next());

        Ok(ingress.and_then(|entry| entry.hostname.or(entry.ip)))
    }
}

/// Builds the single-pod workspace deployment for a namespace SpinWick.
pub fn workspace_deployment(
    name: &str,
    namespace: &str,
    image: &str,
    tag: &str,
    env: &[(String, String)],
) -> Deployment {
    let labels = selector_labels(name);
    let env = env
        .iter()
        .map(|(key, value)| EnvVar {
            name: key.clone(),
            value: Some(value.clone()),
            ..EnvVar::default()
        })
        .collect::<Vec<_>>();

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            labels: Some(labels.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: name.to_owned(),
                        image: Some(format!("{image}:{tag}")),
                        env: if env.is_empty() { None } else { Some(env) },
                        ports: Some(vec![ContainerPort {
                            container_port: WORKSPACE_PORT,
                            ..ContainerPort::default()
                        }]),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

/// Builds the LoadBalancer service fronting the workspace deployment.
pub fn workspace_service(name: &str, namespace: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_owned()),
            selector: Some(selector_labels(name)),
            ports: Some(vec![ServicePort {
                port: 80,
                target_port: Some(IntOrString::Int(WORKSPACE_PORT)),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_owned(), name.to_owned())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_image_includes_tag() {
        let deployment = workspace_deployment("cws-test", "repo-pr-1", "example/cws", "abc1234", &[]);
        let containers = deployment.spec.unwrap().template.spec.unwrap().containers;
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].image.as_deref(), Some("example/cws:abc1234"));
        assert!(containers[0].env.is_none());
    }

    #[test]
    fn deployment_selector_matches_pod_labels() {
        let deployment = workspace_deployment("cws-test", "repo-pr-1", "img", "t", &[]);
        let spec = deployment.spec.unwrap();
        let selector = spec.selector.match_labels.unwrap();
        let pod_labels = spec.template.metadata.unwrap().labels.unwrap();
        assert_eq!(selector, pod_labels);
    }

    #[test]
    fn service_targets_workspace_port() {
        let service = workspace_service("cws-test", "repo-pr-1");
        let ports = service.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].port, 80);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(WORKSPACE_PORT)));
    }

    #[test]
    fn deployment_env_is_forwarded() {
        let env = vec![("SERVER_ID".to_owned(), "repo-pr-1".to_owned())];
        let deployment = workspace_deployment("cws-test", "repo-pr-1", "img", "t", &env);
        let containers = deployment.spec.unwrap().template.spec.unwrap().containers;
        let rendered = containers[0].env.as_ref().unwrap();
        assert_eq!(rendered[0].name, "SERVER_ID");
        assert_eq!(rendered[0].value.as_deref(), Some("repo-pr-1"));
    }
}
