use super::error::K8sError;
use super::utils::{get_name, get_type_meta, gvk_from_type_meta, is_not_found};
use crate::poll::PollSchedule;
use duration_str::deserialize_duration;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod};
use k8s_openapi::NamespaceResourceScope;
use kube::core::{DynamicObject, GroupVersionKind, ObjectMeta};
use kube::discovery::ApiResource;
use kube::{
    api::{DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams},
    config::KubeConfigOptions,
    Api, Client, Config, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Field manager used for every server-side apply performed by the suite.
pub const FIELD_MANAGER: &str = "oadp-e2e";

/// Same as upstream kube-rs default client timeout (read/write).
const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(295);

fn default_client_timeout() -> Duration {
    DEFAULT_CLIENT_TIMEOUT
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfig {
    /// The maximum duration the client will wait for a response from the API server.
    #[serde(
        default = "default_client_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub client_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }
}

/// Thin layer over [kube::Client] with the operations the suite performs against the cluster.
#[derive(Clone)]
pub struct AsyncK8sClient {
    client: Client,
}

impl AsyncK8sClient {
    /// Constructs a new Kubernetes client.
    ///
    /// If loading from the inCluster config fail we fall back to kube-config
    /// This will respect the `$KUBECONFIG` envvar, but otherwise default to `~/.kube/config`.
    pub async fn try_new(client_config: &ClientConfig) -> Result<Self, K8sError> {
        debug!("trying inClusterConfig for k8s client");

        let mut config = match Config::incluster() {
            Ok(c) => c,
            Err(e) => {
                debug!("inClusterConfig {}, trying kubeconfig for k8s client", e);
                let c = KubeConfigOptions::default();
                Config::from_kubeconfig(&c).await?
            }
        };
        config.read_timeout = Some(client_config.client_timeout);
        config.write_timeout = Some(client_config.client_timeout);

        let client = Client::try_from(config)?;
        debug!("k8s client initialization succeeded");

        Ok(Self::new(client))
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, K8sError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    pub async fn create<K>(&self, namespace: &str, obj: &K) -> Result<K, K8sError>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), obj).await?)
    }

    /// Creates the object or replaces the existing one keeping its `resourceVersion`.
    pub async fn create_or_replace<K>(&self, namespace: &str, obj: &K) -> Result<K, K8sError>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let name = obj.name_any();
        match api.get_opt(&name).await? {
            Some(existing) => {
                let mut obj = obj.clone();
                obj.meta_mut().resource_version = existing.resource_version();
                Ok(api.replace(&name, &PostParams::default(), &obj).await?)
            }
            None => Ok(api.create(&PostParams::default(), obj).await?),
        }
    }

    /// Deletes the object. Returns `false` if it did not exist.
    pub async fn delete_if_exists<K>(&self, namespace: &str, name: &str) -> Result<bool, K8sError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn list<K>(&self, namespace: &str, label_selector: &str) -> Result<Vec<K>, K8sError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(label_selector);
        Ok(api.list(&lp).await?.items)
    }

    pub async fn get_configmap(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, K8sError> {
        self.get_opt::<ConfigMap>(namespace, name).await
    }

    /// Creates the namespace if it does not exist yet.
    pub async fn ensure_namespace(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), K8sError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api.get_opt(name).await?.is_some() {
            debug!(namespace = name, "namespace already exists");
            return Ok(());
        }
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &ns).await?;
        info!(namespace = name, "namespace created");
        Ok(())
    }

    /// Deletes the namespace and waits until the API server no longer returns it.
    /// A namespace that does not exist is considered deleted.
    pub async fn delete_namespace_and_wait(
        &self,
        name: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), K8sError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => debug!(namespace = name, "namespace deletion requested"),
            Err(err) if is_not_found(&err) => return Ok(()),
            Err(err) => return Err(err.into()),
        }

        let schedule = PollSchedule::new(timeout, interval);
        loop {
            if api.get_opt(name).await?.is_none() {
                info!(namespace = name, "namespace deleted");
                return Ok(());
            }
            if !schedule.wait_next().await {
                return Err(K8sError::Timeout(
                    timeout,
                    format!("namespace `{name}` deletion"),
                ));
            }
        }
    }

    pub async fn api_resource(&self, gvk: &GroupVersionKind) -> Result<ApiResource, K8sError> {
        let (api_resource, _) = kube::discovery::pinned_kind(&self.client, gvk)
            .await
            .map_err(|_| K8sError::MissingKind(gvk.api_version(), gvk.kind.clone()))?;
        Ok(api_resource)
    }

    pub async fn dynamic_api(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
    ) -> Result<Api<DynamicObject>, K8sError> {
        Ok(Api::namespaced_with(
            self.client.clone(),
            namespace,
            &self.api_resource(gvk).await?,
        ))
    }

    pub async fn get_dynamic_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, K8sError> {
        let api = self.dynamic_api(gvk, namespace).await?;
        Ok(api.get_opt(name).await?)
    }

    pub async fn list_dynamic_objects(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
    ) -> Result<Vec<DynamicObject>, K8sError> {
        let api = self.dynamic_api(gvk, namespace).await?;
        Ok(api.list(&ListParams::default()).await?.items)
    }

    /// Deletes the dynamic object. Returns `false` if it did not exist.
    pub async fn delete_dynamic_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<bool, K8sError> {
        let api = self.dynamic_api(gvk, namespace).await?;
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Server-side applies the object in the provided namespace.
    pub async fn apply_dynamic_object(
        &self,
        obj: &DynamicObject,
        namespace: &str,
    ) -> Result<(), K8sError> {
        let gvk = gvk_from_type_meta(&get_type_meta(obj)?)?;
        let name = get_name(obj)?;
        let api = self.dynamic_api(&gvk, namespace).await?;
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(obj),
        )
        .await?;
        debug!(kind = gvk.kind, name, namespace, "object applied");
        Ok(())
    }

    /// Applies every document of the multi-document YAML manifest in `path`.
    pub async fn apply_manifest_file(
        &self,
        path: &Path,
        namespace: &str,
    ) -> Result<usize, K8sError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| K8sError::ManifestRead(path.display().to_string(), err))?;
        let objects = parse_manifest(&content)?;
        for obj in objects.iter() {
            self.apply_dynamic_object(obj, namespace).await?;
        }
        info!(manifest = %path.display(), namespace, objects = objects.len(), "manifest applied");
        Ok(objects.len())
    }

    /// Removes every finalizer of the object so the API server can complete its deletion.
    /// Returns `false` if the object did not exist anymore.
    pub async fn strip_finalizers(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<bool, K8sError> {
        let api = self.dynamic_api(gvk, namespace).await?;
        let patch = serde_json::json!({ "metadata": { "finalizers": null } });
        match api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Returns the last `tail_lines` of the logs of each pod matching the selector, keyed by pod name.
    pub async fn pod_logs(
        &self,
        namespace: &str,
        label_selector: &str,
        container: Option<String>,
        tail_lines: i64,
    ) -> Result<BTreeMap<String, String>, K8sError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(label_selector);
        let log_params = LogParams {
            container,
            tail_lines: Some(tail_lines),
            ..Default::default()
        };

        let mut logs = BTreeMap::new();
        for pod in pods.list(&lp).await?.items {
            let pod_name = pod.name_any();
            let content = pods.logs(&pod_name, &log_params).await?;
            logs.insert(pod_name, content);
        }
        Ok(logs)
    }
}

/// Parses a multi-document YAML manifest, empty documents are skipped.
pub fn parse_manifest(content: &str) -> Result<Vec<DynamicObject>, K8sError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        objects.push(serde_yaml::from_value::<DynamicObject>(value)?);
    }
    Ok(objects)
}
