//! HashiCorp Vault source against a mock Vault server.

use auth_resolver::{
    AuthConfig, InMemorySecretStore, ProviderEndpoints, ResolveError, ResolveRequest, Resolver,
    ResolverDeps,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn resolver(endpoints: ProviderEndpoints) -> Resolver {
    Resolver::with_defaults(ResolverDeps {
        store: Arc::new(InMemorySecretStore::new()),
        http: reqwest::Client::new(),
        endpoints,
        token_refresh_margin: Duration::from_secs(60),
    })
}

fn token_auth(address: &str, path: &str) -> AuthConfig {
    serde_json::from_value(json!({
        "hashiCorpVault": {
            "address": address,
            "namespace": "team-a",
            "credential": { "token": "root-token" },
            "secrets": [ { "parameter": "password", "path": path, "key": "password" } ]
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn test_kubernetes_login_is_reused() {
    let vault = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/k8s/login"))
        .and(body_partial_json(json!({ "jwt": "sa-jwt", "role": "scaler" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auth": { "client_token": "login-token", "lease_duration": 3600 }
        })))
        .expect(1)
        .mount(&vault)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/app"))
        .and(header("X-Vault-Token", "login-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "apiKey": "kv1-value" }
        })))
        .expect(2)
        .mount(&vault)
        .await;

    let sa_token = NamedTempFile::new().unwrap();
    std::fs::write(sa_token.path(), "sa-jwt").unwrap();
    let endpoints = ProviderEndpoints {
        vault_service_account_token_path: sa_token.path().to_path_buf(),
        ..Default::default()
    };
    let auth: AuthConfig = serde_json::from_value(json!({
        "hashiCorpVault": {
            "address": vault.uri(),
            "authentication": "kubernetes",
            "role": "scaler",
            "mount": "k8s",
            "secrets": [ { "parameter": "apiKey", "path": "kv/app", "key": "apiKey" } ]
        }
    }))
    .unwrap();

    let resolver = resolver(endpoints);
    for _ in 0..2 {
        let secret = resolver
            .resolve(&auth, &ResolveRequest::new("apps"))
            .await
            .unwrap();
        assert_eq!(secret.get("apiKey"), Some("kv1-value"));
    }
}

#[tokio::test]
async fn test_namespace_header_and_not_found() {
    let vault = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/absent"))
        .and(header("X-Vault-Namespace", "team-a"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&vault)
        .await;

    let err = resolver(ProviderEndpoints::default())
        .resolve(
            &token_auth(&vault.uri(), "secret/data/absent"),
            &ResolveRequest::new("apps"),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ResolveError::SecretNotFound {
            store: format!("vault {}", vault.uri()),
            name: "secret/data/absent".to_string(),
        }
    );
}

#[tokio::test]
async fn test_server_errors_are_retried_then_reported() {
    let vault = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&vault)
        .await;

    let err = resolver(ProviderEndpoints::default())
        .resolve(
            &token_auth(&vault.uri(), "secret/data/flaky"),
            &ResolveRequest::new("apps"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Backend { .. }));
    assert!(err.to_string().contains("Server error"));
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let vault = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/locked"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&vault)
        .await;

    let err = resolver(ProviderEndpoints::default())
        .resolve(
            &token_auth(&vault.uri(), "secret/data/locked"),
            &ResolveRequest::new("apps"),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Vault authentication failed"));
}

#[tokio::test]
async fn test_token_authentication_requires_token() {
    let auth: AuthConfig = serde_json::from_value(json!({
        "hashiCorpVault": {
            "address": "http://127.0.0.1:8200",
            "secrets": [ { "parameter": "p", "path": "secret/data/x", "key": "k" } ]
        }
    }))
    .unwrap();

    let err = resolver(ProviderEndpoints::default())
        .resolve(&auth, &ResolveRequest::new("apps"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::IncompleteCredentials { .. }));
}
