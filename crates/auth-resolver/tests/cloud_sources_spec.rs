//! Cloud secret stores against mock backends.

use auth_resolver::{
    AuthConfig, InMemorySecretStore, ProviderEndpoints, ResolveError, ResolveRequest, Resolver,
    ResolverDeps,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const TEST_KEY_PEM: &str = include_str!("fixtures/gcp-test-key.pem");

fn resolver(store: Arc<InMemorySecretStore>, endpoints: ProviderEndpoints) -> Resolver {
    Resolver::with_defaults(ResolverDeps {
        store,
        http: reqwest::Client::new(),
        endpoints,
        token_refresh_margin: Duration::from_secs(60),
    })
}

fn auth(value: serde_json::Value) -> AuthConfig {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_azure_key_vault_with_client_secret() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_secret=sp-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "kv-token",
            "expires_in": "3599"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secrets/db-password/"))
        .and(header("authorization", "Bearer kv-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": "p@ssw0rd",
            "id": "https://kv/secrets/db-password/abc"
        })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secrets/missing/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = Arc::new(InMemorySecretStore::new());
    store.insert("apps", "sp", [("secret", "sp-secret")]);
    let resolver = resolver(store, ProviderEndpoints::default());

    let vault = |secret_name: &str| {
        auth(json!({
            "azureKeyVault": {
                "vaultUri": server.uri(),
                "credentials": {
                    "clientId": "client-1",
                    "tenantId": "tenant-1",
                    "clientSecret": { "valueFrom": { "secretKeyRef": { "name": "sp", "key": "secret" } } }
                },
                "cloud": {
                    "type": "Private",
                    "activeDirectoryEndpoint": server.uri(),
                    "keyVaultResourceURL": "https://vault.local"
                },
                "secrets": [ { "parameter": "password", "name": secret_name } ]
            }
        }))
    };

    for _ in 0..2 {
        let secret = resolver
            .resolve(&vault("db-password"), &ResolveRequest::new("apps"))
            .await
            .unwrap();
        assert_eq!(secret.get("password"), Some("p@ssw0rd"));
        assert_eq!(secret.provider_of("password"), Some("azureKeyVault"));
    }

    let err = resolver
        .resolve(&vault("missing"), &ResolveRequest::new("apps"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::SecretNotFound { .. }));
}

#[tokio::test]
async fn test_gcp_secret_manager_with_metadata_identity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/computeMetadata/v1/instance/service-accounts/default/token",
        ))
        .and(header("Metadata-Flavor", "Google"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "gce-token",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/computeMetadata/v1/project/project-id"))
        .respond_with(ResponseTemplate::new(200).set_body_string("my-project"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(
            "/v1/projects/my-project/secrets/api-key/versions/latest:access",
        ))
        .and(header("authorization", "Bearer gce-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "projects/my-project/secrets/api-key/versions/3",
            "payload": { "data": "c2VjcmV0LWFwaS1rZXk=" }
        })))
        .mount(&server)
        .await;

    let endpoints = ProviderEndpoints {
        gcp_metadata_host: server.uri(),
        gcp_secret_manager_endpoint: server.uri(),
        ..Default::default()
    };
    let auth = auth(json!({
        "gcpSecretManager": {
            "podIdentity": { "provider": "gcp" },
            "secrets": [ { "parameter": "apiKey", "id": "api-key" } ]
        }
    }));

    let secret = resolver(Arc::new(InMemorySecretStore::new()), endpoints)
        .resolve(&auth, &ResolveRequest::new("apps"))
        .await
        .unwrap();
    assert_eq!(secret.get("apiKey"), Some("secret-api-key"));
}

#[tokio::test]
async fn test_gcp_secret_manager_with_service_account_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "sa-token",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/projects/sa-project/secrets/db/versions/2:access"))
        .and(header("authorization", "Bearer sa-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payload": { "data": "aHVudGVyMg==" }
        })))
        .mount(&server)
        .await;

    let key_json = json!({
        "type": "service_account",
        "project_id": "sa-project",
        "client_email": "scaler@sa-project.iam.gserviceaccount.com",
        "private_key": TEST_KEY_PEM,
        "token_uri": format!("{}/token", server.uri())
    })
    .to_string();
    let store = Arc::new(InMemorySecretStore::new());
    store.insert("apps", "gcp-sa", [("key.json", key_json.as_str())]);

    let endpoints = ProviderEndpoints {
        gcp_secret_manager_endpoint: server.uri(),
        ..Default::default()
    };
    let auth = auth(json!({
        "gcpSecretManager": {
            "credentials": {
                "clientSecret": { "valueFrom": { "secretKeyRef": { "name": "gcp-sa", "key": "key.json" } } }
            },
            "secrets": [ { "parameter": "password", "id": "db", "version": "2" } ]
        }
    }));

    let secret = resolver(store, endpoints)
        .resolve(&auth, &ResolveRequest::new("apps"))
        .await
        .unwrap();
    assert_eq!(secret.get("password"), Some("hunter2"));
}

#[tokio::test]
async fn test_aws_secrets_manager_with_static_keys() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("x-amz-target", "secretsmanager.GetSecretValue"))
        .and(body_string_contains("\"SecretId\":\"prod/db\""))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/x-amz-json-1.1")
                .set_body_string(
                    json!({
                        "ARN": "arn:aws:secretsmanager:eu-west-1:123456789012:secret:prod/db",
                        "Name": "prod/db",
                        "SecretString": "{\"username\":\"svc\",\"password\":\"aws-pw\"}",
                        "VersionId": "v1"
                    })
                    .to_string(),
                ),
        )
        .mount(&server)
        .await;

    let store = Arc::new(InMemorySecretStore::new());
    store.insert("apps", "aws", [("id", "AKIDEXAMPLE"), ("secret", "wJalrXUtnFEMI")]);
    let endpoints = ProviderEndpoints {
        aws_endpoint_url: Some(server.uri()),
        ..Default::default()
    };
    let auth = auth(json!({
        "awsSecretManager": {
            "region": "eu-west-1",
            "credentials": {
                "accessKey": { "valueFrom": { "secretKeyRef": { "name": "aws", "key": "id" } } },
                "accessSecretKey": { "valueFrom": { "secretKeyRef": { "name": "aws", "key": "secret" } } }
            },
            "secrets": [
                { "parameter": "password", "name": "prod/db", "secretKey": "password" },
                { "parameter": "raw", "name": "prod/db" }
            ]
        }
    }));

    let secret = resolver(store, endpoints)
        .resolve(&auth, &ResolveRequest::new("apps"))
        .await
        .unwrap();
    assert_eq!(secret.get("password"), Some("aws-pw"));
    assert!(secret.get("raw").unwrap().contains("\"username\":\"svc\""));
}

#[tokio::test]
async fn test_aws_parameter_store_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("x-amz-target", "AmazonSSM.GetParameter"))
        .respond_with(
            ResponseTemplate::new(400)
                .insert_header("content-type", "application/x-amz-json-1.1")
                .set_body_string(
                    json!({ "__type": "ParameterNotFound", "message": "" }).to_string(),
                ),
        )
        .mount(&server)
        .await;

    let store = Arc::new(InMemorySecretStore::new());
    store.insert("apps", "aws", [("id", "AKIDEXAMPLE"), ("secret", "wJalrXUtnFEMI")]);
    let endpoints = ProviderEndpoints {
        aws_endpoint_url: Some(server.uri()),
        ..Default::default()
    };
    let auth = auth(json!({
        "awsParameterStore": {
            "region": "eu-west-1",
            "credentials": {
                "accessKey": { "valueFrom": { "secretKeyRef": { "name": "aws", "key": "id" } } },
                "accessSecretKey": { "valueFrom": { "secretKeyRef": { "name": "aws", "key": "secret" } } }
            },
            "secrets": [ { "parameter": "token", "name": "/app/token" } ]
        }
    }));

    let err = resolver(store, endpoints)
        .resolve(&auth, &ResolveRequest::new("apps"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ResolveError::SecretNotFound {
            store: "aws parameter store eu-west-1".to_string(),
            name: "/app/token".to_string(),
        }
    );
}
