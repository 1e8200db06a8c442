use super::require_entry_fields;
use crate::auth::AuthConfig;
use crate::error::ResolveError;
use crate::resolver::{ResolveRequest, SecretSource, TargetContainer};
use crate::secret::ResolvedSecret;
use async_trait::async_trait;

const ID: &str = "env";

/// Parameters taken from the scale target's container environment.
///
/// An entry without `containerName` reads from the first container.
pub struct EnvSource;

fn container<'a>(
    containers: &'a [TargetContainer],
    name: Option<&str>,
) -> Result<&'a TargetContainer, ResolveError> {
    match name.filter(|n| !n.is_empty()) {
        Some(name) => containers.iter().find(|c| c.name == name).ok_or_else(|| {
            ResolveError::configuration(format!("container {} not found in scale target", name))
        }),
        None => containers
            .first()
            .ok_or_else(|| ResolveError::configuration("scale target has no containers")),
    }
}

#[async_trait]
impl SecretSource for EnvSource {
    fn id(&self) -> &'static str {
        ID
    }

    fn applies(&self, auth: &AuthConfig) -> bool {
        !auth.env.is_empty()
    }

    fn validate(
        &self,
        auth: &AuthConfig,
        request: &ResolveRequest<'_>,
    ) -> Result<(), ResolveError> {
        for (index, entry) in auth.env.iter().enumerate() {
            require_entry_fields(
                ID,
                index,
                &[
                    ("parameter", entry.parameter.as_str()),
                    ("name", entry.name.as_str()),
                ],
            )?;
            container(request.containers, entry.container_name.as_deref())?;
        }
        Ok(())
    }

    async fn fetch(
        &self,
        auth: &AuthConfig,
        request: &ResolveRequest<'_>,
    ) -> Result<ResolvedSecret, ResolveError> {
        let mut resolved = ResolvedSecret::new();
        let mut missing = Vec::new();

        for entry in &auth.env {
            let container = container(request.containers, entry.container_name.as_deref())?;
            match container.env.get(&entry.name) {
                Some(value) => resolved.insert(&entry.parameter, value, ID),
                None => missing.push(entry.parameter.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(super::incomplete(
                ID,
                "environment variables are not set on the scale target",
                missing,
            ));
        }
        Ok(resolved)
    }
}
