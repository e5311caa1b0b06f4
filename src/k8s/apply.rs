use crate::error::{Error, Result};
use crate::k8s::FIELD_MANAGER;

use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::debug;

/// Result of a guarded apply
#[derive(Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The existing object already carried the desired spec hash; no API write
    Unchanged,
    /// The object was created or patched
    Applied,
}

/// Server-side apply without ownership checks.
///
/// Used for RBAC objects where in-place rewrite is the contract and no
/// owner-reference tree exists (cluster-scoped objects cannot be owned by a
/// namespaced custom resource).
pub async fn apply<K>(api: &Api<K>, name: &str, desired: &K) -> Result<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let params = PatchParams::apply(FIELD_MANAGER).force();
    Ok(api.patch(name, &params, &Patch::Apply(desired)).await?)
}

/// Server-side apply guarded by the spec-hash annotation and ownership.
///
/// - If an object with the target name exists, is not owned by `owner_uid`,
///   and was not opted into adoption, the apply is refused with
///   [`Error::OwnershipConflict`]; foreign objects are never force-taken.
/// - If the existing object's `annotation` already equals `hash`, the Update
///   call is skipped entirely.
pub async fn apply_owned<K>(
    api: &Api<K>,
    name: &str,
    desired: &K,
    annotation: &str,
    hash: &str,
    owner_uid: &str,
    adopt_orphans: bool,
) -> Result<ApplyOutcome>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    if let Some(existing) = api.get_opt(name).await? {
        let refs = existing.owner_references();
        let owned_by_us = refs.iter().any(|r| r.uid == owner_uid);
        if !owned_by_us && !(adopt_orphans && refs.is_empty()) {
            return Err(Error::OwnershipConflict {
                kind: K::kind(&()).to_string(),
                name: name.to_string(),
            });
        }
        if existing.annotations().get(annotation).map(String::as_str) == Some(hash) {
            debug!(name, hash, "spec hash unchanged, skipping update");
            return Ok(ApplyOutcome::Unchanged);
        }
    }
    let params = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(name, &params, &Patch::Apply(desired)).await?;
    Ok(ApplyOutcome::Applied)
}
