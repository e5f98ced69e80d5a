use jsonwebtoken::{EncodingKey, Header, encode};
use roadnet::{
    AppConfig, AppState, auth::Claims, create_router, models::NetworkResponse,
    repository::{MemoryRepository, RepositoryState},
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;

// --- Test App Bootstrap ---

pub struct TestApp {
    pub address: String,
}

async fn spawn_app() -> TestApp {
    let repo = Arc::new(MemoryRepository::new()) as RepositoryState;
    let state = AppState {
        repo,
        config: AppConfig::default(),
    };
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().expect("local addr").port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    TestApp { address }
}

fn token_for(sub: &str) -> String {
    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs() as usize
        + 3600;
    let claims = Claims {
        sub: sub.to_string(),
        exp: Some(exp),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test"))
        .expect("token encoding")
}

const MAIN_ST: &str = r#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":{"type":"LineString","coordinates":[[7.0,51.0],[7.1,51.1]]},"properties":{"name":"Main St"}}]}"#;

fn geojson_form(payload: &str) -> reqwest::multipart::Form {
    let part = reqwest::multipart::Part::bytes(payload.as_bytes().to_vec())
        .file_name("roads.geojson")
        .mime_str("application/geo+json")
        .expect("mime");
    reqwest::multipart::Form::new().part("file", part)
}

// --- Tests ---

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("req fail");
    assert!(response.status().is_success());
}

#[tokio::test]
async fn test_network_lifecycle() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let token = token_for("alice");

    // Create: 201 with the freshly assigned identity.
    let response = client
        .post(format!("{}/", app.address))
        .bearer_auth(&token)
        .multipart(geojson_form(MAIN_ST))
        .send()
        .await
        .expect("post fail");
    assert_eq!(response.status(), 201);
    let created: NetworkResponse = response.json().await.expect("json");
    assert_eq!(created.id, 1);
    assert_eq!(created.version, 1);
    assert_eq!(created.owner, "alice");
    assert_eq!(created.features.len(), 1);
    assert_eq!(created.features[0]["properties"]["name"], "Main St");

    // Update: 201 with the next version.
    let response = client
        .put(format!("{}/{}", app.address, created.id))
        .bearer_auth(&token)
        .multipart(geojson_form(MAIN_ST))
        .send()
        .await
        .expect("put fail");
    assert_eq!(response.status(), 201);
    let updated: NetworkResponse = response.json().await.expect("json");
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.version, 2);

    // Get latest via the query-parameter credential.
    let response = client
        .get(format!("{}/{}", app.address, created.id))
        .query(&[("authorization", token.as_str())])
        .send()
        .await
        .expect("get fail");
    assert_eq!(response.status(), 200);
    let latest: NetworkResponse = response.json().await.expect("json");
    assert_eq!(latest.version, 2);

    // Get the first version explicitly; it is still intact.
    let response = client
        .get(format!("{}/{}", app.address, created.id))
        .query(&[("version", "1"), ("authorization", token.as_str())])
        .send()
        .await
        .expect("get fail");
    assert_eq!(response.status(), 200);
    let first: NetworkResponse = response.json().await.expect("json");
    assert_eq!(first.version, 1);
    assert_eq!(first.features[0]["properties"]["name"], "Main St");
}

#[tokio::test]
async fn test_create_accepts_the_authorization_form_field() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let form = geojson_form(MAIN_ST).text("authorization", token_for("alice"));
    let response = client
        .post(format!("{}/", app.address))
        .multipart(form)
        .send()
        .await
        .expect("post fail");
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn test_create_without_credentials_is_400() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/", app.address))
        .multipart(geojson_form(MAIN_ST))
        .send()
        .await
        .expect("post fail");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_create_with_garbage_token_is_401() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/", app.address))
        .bearer_auth("not-a-jwt")
        .multipart(geojson_form(MAIN_ST))
        .send()
        .await
        .expect("post fail");
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_create_with_non_geojson_file_is_400() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let part = reqwest::multipart::Part::bytes(MAIN_ST.as_bytes().to_vec())
        .file_name("roads.txt")
        .mime_str("text/plain")
        .expect("mime");
    let form = reqwest::multipart::Form::new().part("file", part);

    let response = client
        .post(format!("{}/", app.address))
        .bearer_auth(token_for("alice"))
        .multipart(form)
        .send()
        .await
        .expect("post fail");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_create_with_polygon_is_400() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let polygon = r#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":{"type":"Polygon","coordinates":[[[0.0,0.0],[4.0,0.0],[4.0,4.0],[0.0,0.0]]]},"properties":{}}]}"#;
    let response = client
        .post(format!("{}/", app.address))
        .bearer_auth(token_for("alice"))
        .multipart(geojson_form(polygon))
        .send()
        .await
        .expect("post fail");
    assert_eq!(response.status(), 400);

    // Nothing was persisted for the failed call.
    let response = client
        .get(format!("{}/1", app.address))
        .query(&[("authorization", token_for("alice").as_str())])
        .send()
        .await
        .expect("get fail");
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_get_by_non_owner_is_401() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/", app.address))
        .bearer_auth(token_for("alice"))
        .multipart(geojson_form(MAIN_ST))
        .send()
        .await
        .expect("post fail");
    assert_eq!(response.status(), 201);

    let response = client
        .get(format!("{}/1", app.address))
        .query(&[("authorization", token_for("bob").as_str())])
        .send()
        .await
        .expect("get fail");
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_update_of_unknown_network_is_404() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .put(format!("{}/99", app.address))
        .bearer_auth(token_for("alice"))
        .multipart(geojson_form(MAIN_ST))
        .send()
        .await
        .expect("put fail");
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_get_without_credentials_is_400() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/", app.address))
        .bearer_auth(token_for("alice"))
        .multipart(geojson_form(MAIN_ST))
        .send()
        .await
        .expect("post fail");
    assert_eq!(response.status(), 201);

    let response = client
        .get(format!("{}/1", app.address))
        .send()
        .await
        .expect("get fail");
    assert_eq!(response.status(), 400);
}
