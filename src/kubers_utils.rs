use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, ObjectList};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;

use crate::errors::EngineError;

pub async fn kube_delete_all_from_selector<K>(
    client: &kube::Client,
    selector: &str,
    namespace: &str,
) -> Result<(), EngineError>
where
    K: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    let obj_name = K::kind(&K::DynamicType::default()).to_string();
    debug!("Deleting k8s {} from selector {}", obj_name, selector);

    let list_params = ListParams::default().labels(selector);
    let delete_params = DeleteParams::background();

    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    api.delete_collection(&delete_params, &list_params)
        .await
        .map_err(|err| EngineError::new_k8s_error("delete collection of", &format!("{obj_name} {selector}"), err))?;

    Ok(())
}

pub async fn kube_get_resources_by_selector<K>(
    client: &kube::Client,
    namespace: &str,
    selector: &str,
) -> Result<ObjectList<K>, EngineError>
where
    K: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    let obj_name = K::kind(&K::DynamicType::default()).to_string();
    debug!("Getting k8s {} from selector {}", obj_name, selector);

    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(selector);
    let resources = api
        .list(&params)
        .await
        .map_err(|err| EngineError::new_k8s_error("get", &format!("{obj_name} {selector}"), err))?;

    Ok(resources)
}
