use axum::{
    Router,
    extract::{DefaultBodyLimit, State},
    middleware,
    routing::{delete, get, post},
};
use tower_http::services::ServeDir;

use crate::announcements;
use crate::auth;
use crate::blocking;
use crate::error::ApiError;
use crate::middleware::require_auth;
use crate::photos::{self, MAX_PHOTO_SIZE};
use crate::state::AppState;

/// Room above the photo limit so oversized photos reach the service and get
/// its JSON 413 instead of the framework's.
const BODY_LIMIT: usize = MAX_PHOTO_SIZE + 1024 * 1024;

/// All API routes plus static photo serving. Tracing and CORS layers are
/// added by the binary.
pub fn router(state: AppState) -> Router {
    let image_dir = state.photos.image_dir().to_path_buf();
    let auth_layer = middleware::from_fn_with_state(state.clone(), require_auth);

    Router::new()
        .route("/api/v1/users", post(auth::register))
        .route("/api/v1/users/login", post(auth::login))
        .route(
            "/api/v1/announcements",
            get(announcements::list_announcements).post(announcements::create_announcement),
        )
        .route(
            "/api/v1/announcements/{id}",
            get(announcements::get_announcement)
                .merge(delete(announcements::delete_announcement).route_layer(auth_layer)),
        )
        .route("/api/v1/announcements/{id}/photos", post(photos::upload_photo))
        .route("/health", get(health))
        .nest_service("/images", ServeDir::new(image_dir))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    let db = state.db.clone();
    blocking(move || Ok(db.ping()?)).await?;
    Ok("ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as B64;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::test_support::{PNG_BYTES, TestApp, test_app};

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn upload(id: &str, password: &str, bytes: &'static [u8]) -> Request<Body> {
        let basic = B64.encode(format!("{}:{}", id, password));
        Request::builder()
            .method("POST")
            .uri(format!("/api/v1/announcements/{}/photos", id))
            .header(header::AUTHORIZATION, format!("Basic {}", basic))
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from(bytes))
            .unwrap()
    }

    fn announcement_body() -> Value {
        json!({
            "petName": "Luna",
            "species": "CAT",
            "sex": "FEMALE",
            "locationLatitude": 52.2297,
            "locationLongitude": 21.0122,
            "lastSeenDate": "2025-02-01",
            "phone": "+48 600 700 800"
        })
    }

    async fn create_announcement(app: &Router) -> (String, String) {
        let (status, body) = send(app, post_json("/api/v1/announcements", announcement_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        (
            body["id"].as_str().unwrap().to_string(),
            body["managementPassword"].as_str().unwrap().to_string(),
        )
    }

    fn setup() -> (TestApp, Router) {
        let app = test_app();
        let router = router(app.state.clone());
        (app, router)
    }

    #[tokio::test]
    async fn register_stores_lowercase_email() {
        let (app, router) = setup();
        let (status, body) = send(
            &router,
            post_json(
                "/api/v1/users",
                json!({"email": "MixedCase@Example.COM", "password": "password123"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert!(body["userId"].is_string());
        assert_eq!(body["accessToken"].as_str().unwrap().split('.').count(), 3);

        let user = app.state.db.find_user_by_email("mixedcase@example.com").unwrap().unwrap();
        assert_eq!(user.email, "mixedcase@example.com");
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let (_app, router) = setup();
        let payload = json!({"email": "dup@example.com", "password": "password123"});

        let (first, _) = send(&router, post_json("/api/v1/users", payload.clone())).await;
        let (second, body) = send(&router, post_json("/api/v1/users", payload)).await;

        assert_eq!(first, StatusCode::CREATED);
        assert_eq!(second, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn malformed_registration_is_stable() {
        let (_app, router) = setup();
        let payload = json!({"email": "not-an-email", "password": "password123"});

        for _ in 0..2 {
            let (status, body) = send(&router, post_json("/api/v1/users", payload.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"]["field"], "email");
            assert_eq!(body["error"]["code"], "INVALID_FORMAT");
        }

        let (status, body) = send(&router, post_json("/api/v1/users", json!({"email": "a@b.co"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["field"], "password");
        assert_eq!(body["error"]["code"], "MISSING_VALUE");
    }

    #[tokio::test]
    async fn unparseable_json_is_bad_request() {
        let (_app, router) = setup();
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/announcements")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, body) = send(&router, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["field"], "body");
    }

    #[tokio::test]
    async fn login_failures_share_one_response() {
        let (_app, router) = setup();
        send(
            &router,
            post_json("/api/v1/users", json!({"email": "a@example.com", "password": "password123"})),
        )
        .await;

        let (ok, body) = send(
            &router,
            post_json("/api/v1/users/login", json!({"email": "a@example.com", "password": "password123"})),
        )
        .await;
        assert_eq!(ok, StatusCode::OK);
        assert!(body["accessToken"].is_string());

        let (wrong_status, wrong_body) = send(
            &router,
            post_json("/api/v1/users/login", json!({"email": "a@example.com", "password": "nope-nope"})),
        )
        .await;
        let (unknown_status, unknown_body) = send(
            &router,
            post_json("/api/v1/users/login", json!({"email": "b@example.com", "password": "nope-nope"})),
        )
        .await;

        assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_body, unknown_body);
    }

    #[tokio::test]
    async fn announcement_lifecycle() {
        let (_app, router) = setup();
        let (id, password) = create_announcement(&router).await;

        // Not listed until it has a photo
        let (_, list) = send(&router, Request::get("/api/v1/announcements").body(Body::empty()).unwrap()).await;
        assert_eq!(list.as_array().unwrap().len(), 0);

        let (status, body) = send(&router, upload(&id, &password, PNG_BYTES)).await;
        assert_eq!(status, StatusCode::OK);
        let photo_url = body["photoUrl"].as_str().unwrap().to_string();
        assert_eq!(photo_url, format!("/images/{}.png", id));

        let (status, _) = send(&router, Request::get(photo_url.as_str()).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        let (_, list) = send(
            &router,
            Request::get("/api/v1/announcements?lat=52.23&lng=21.01&range=10")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let list = list.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["status"], "MISSING");
        assert!(list[0].get("managementPasswordHash").is_none());

        let (status, _) = send(
            &router,
            Request::delete(format!("/api/v1/announcements/{}", id)).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, auth) = send(
            &router,
            post_json("/api/v1/users", json!({"email": "mod@example.com", "password": "password123"})),
        )
        .await;
        let token = auth["accessToken"].as_str().unwrap();

        let (status, _) = send(
            &router,
            Request::delete(format!("/api/v1/announcements/{}", id))
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(
            &router,
            Request::get(format!("/api/v1/announcements/{}", id)).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn non_image_upload_keeps_photo_url() {
        let (app, router) = setup();
        let (id, password) = create_announcement(&router).await;

        let (status, body) = send(&router, upload(&id, &password, b"plain text, no image")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_FILE_FORMAT");

        let row = app.state.db.find_announcement(&id).unwrap().unwrap();
        assert!(row.photo_url.is_none());
    }

    #[tokio::test]
    async fn upload_requires_management_password() {
        let (_app, router) = setup();
        let (id, _password) = create_announcement(&router).await;

        let (status, _) = send(&router, upload(&id, "wrong-password", PNG_BYTES)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&router, upload("unknown-id", "whatever", PNG_BYTES)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let req = Request::builder()
            .method("POST")
            .uri(format!("/api/v1/announcements/{}/photos", id))
            .body(Body::from(PNG_BYTES))
            .unwrap();
        let (status, _) = send(&router, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn duplicate_microchip_conflicts() {
        let (_app, router) = setup();
        let mut body = announcement_body();
        body["microchipNumber"] = json!("616093900012345");

        let (first, _) = send(&router, post_json("/api/v1/announcements", body.clone())).await;
        let (second, err) = send(&router, post_json("/api/v1/announcements", body)).await;
        assert_eq!(first, StatusCode::CREATED);
        assert_eq!(second, StatusCode::CONFLICT);
        assert_eq!(err["error"]["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (_app, router) = setup();
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
