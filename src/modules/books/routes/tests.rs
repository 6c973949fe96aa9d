use super::*;
use crate::modules::books::memory::InMemoryBookStore;
use crate::modules::books::models::{VoteDirection, VoteEntry};
use crate::modules::books::policy::VoteLedgerPolicy;
use crate::modules::books::store::{self, BookStore};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
};
use catalog_kernel::settings::AuthSettings;
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

/// A store that fails the test if a handler ever reaches it.
struct UnreachableStore;

#[async_trait]
impl BookStore for UnreachableStore {
    async fn get_book(&self, _: &CallContext, _: Uuid) -> store::Result<Book> {
        panic!("store reached")
    }
    async fn create_book(&self, _: &CallContext, _: Book) -> store::Result<Book> {
        panic!("store reached")
    }
    async fn update_book(&self, _: &CallContext, _: Book) -> store::Result<Book> {
        panic!("store reached")
    }
    async fn delete_book(&self, _: &CallContext, _: Uuid) -> store::Result<()> {
        panic!("store reached")
    }
    async fn get_vote(
        &self,
        _: &CallContext,
        _: Uuid,
        _: Uuid,
    ) -> store::Result<Option<VoteEntry>> {
        panic!("store reached")
    }
    async fn record_vote(
        &self,
        _: &CallContext,
        _: Uuid,
        _: Uuid,
        _: VoteDirection,
        _: Option<VoteDirection>,
    ) -> store::Result<VoteEntry> {
        panic!("store reached")
    }
    async fn recompute_upvote_count(&self, _: &CallContext, _: Uuid) -> store::Result<i64> {
        panic!("store reached")
    }
    async fn get_upvote_count(&self, _: &CallContext, _: Uuid) -> store::Result<i64> {
        panic!("store reached")
    }
}

fn verifier() -> Arc<TokenVerifier> {
    Arc::new(TokenVerifier::new(&AuthSettings {
        jwt_secret: "test-secret".to_string(),
        leeway_secs: 0,
    }))
}

fn app(store: Arc<dyn BookStore>) -> Router {
    router(BooksState {
        service: BookService::new(store, VoteLedgerPolicy::default()),
        verifier: verifier(),
        shutdown: CancellationToken::new(),
    })
}

fn token_for(account: Option<Uuid>) -> String {
    verifier().issue(account, Some(300)).unwrap()
}

fn request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn mutations_without_token_never_reach_the_store() {
    let app = app(Arc::new(UnreachableStore));
    let (account, book) = (Uuid::now_v7(), Uuid::now_v7());

    let requests = vec![
        request("POST", "/", None, Some(json!({"title": "Go in Action"}))),
        request("PATCH", &format!("/{book}"), None, Some(json!({"title": "x"}))),
        request("DELETE", &format!("/{book}"), None, None),
        request("PATCH", &format!("/upvote/{account}/{book}"), None, None),
        request("PATCH", &format!("/downvote/{account}/{book}"), None, None),
    ];

    for request in requests {
        let uri = request.uri().clone();
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
}

#[tokio::test]
async fn forged_token_is_rejected() {
    let app = app(Arc::new(UnreachableStore));
    let forged = TokenVerifier::new(&AuthSettings {
        jwt_secret: "other-secret".to_string(),
        leeway_secs: 0,
    })
    .issue(None, None)
    .unwrap();

    let response = send(
        &app,
        request(
            "PATCH",
            &format!("/downvote/{}/{}", Uuid::now_v7(), Uuid::now_v7()),
            Some(&forged),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_ids_are_bad_requests() {
    let app = app(Arc::new(UnreachableStore));
    let token = token_for(None);

    let response = send(&app, request("GET", "/not-a-uuid", None, None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        request("PATCH", &format!("/upvote/nope/{}", Uuid::now_v7()), Some(&token), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn voting_for_another_account_is_forbidden() {
    let app = app(Arc::new(UnreachableStore));
    let token = token_for(Some(Uuid::now_v7()));

    let response = send(
        &app,
        request(
            "PATCH",
            &format!("/upvote/{}/{}", Uuid::now_v7(), Uuid::now_v7()),
            Some(&token),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn create_needs_an_owner() {
    let app = app(Arc::new(InMemoryBookStore::new()));
    let token = token_for(None);

    let response = send(
        &app,
        request("POST", "/", Some(&token), Some(json!({"title": "Go in Action"}))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let owner = Uuid::now_v7();
    let response = send(
        &app,
        request(
            "POST",
            "/",
            Some(&token),
            Some(json!({"title": "Go in Action", "account_id": owner})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["account_id"], owner.to_string());
}

#[tokio::test]
async fn book_lifecycle_with_votes() {
    let app = app(Arc::new(InMemoryBookStore::new()));
    let (a1, a2) = (Uuid::now_v7(), Uuid::now_v7());
    let (t1, t2) = (token_for(Some(a1)), token_for(Some(a2)));

    let response = send(
        &app,
        request(
            "POST",
            "/",
            Some(&t1),
            Some(json!({"title": "Go in Action", "author": "William Kennedy", "year": 2015})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let book = json_body(response).await;
    assert_eq!(book["account_id"], a1.to_string());
    assert_eq!(book["upvotes"], 0);
    let id = book["id"].as_str().unwrap().to_string();

    let vote = |path: &str, account: Uuid, token: &str| {
        request("PATCH", &format!("/{path}/{account}/{id}"), Some(token), None)
    };

    let body = json_body(send(&app, vote("upvote", a1, &t1)).await).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["message"], "Successfully upvoted");

    let body = json_body(send(&app, vote("upvote", a2, &t2)).await).await;
    assert_eq!(body["count"], 2);

    let body = json_body(send(&app, vote("upvote", a2, &t2)).await).await;
    assert_eq!(body["count"], 2);
    assert_eq!(body["message"], "Vote already recorded");

    let body = json_body(send(&app, vote("downvote", a1, &t1)).await).await;
    assert_eq!(body["count"], 0);

    let response = send(&app, request("GET", &format!("/upvote-count/{id}"), None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"status": 200, "message": "Upvote count", "count": 0})
    );

    let response = send(
        &app,
        request("PATCH", &format!("/{id}"), Some(&t1), Some(json!({"year": 2016}))),
    )
    .await;
    let updated = json_body(response).await;
    assert_eq!(updated["year"], 2016);
    assert_eq!(updated["title"], "Go in Action");

    let response = send(&app, request("DELETE", &format!("/{id}"), Some(&t1), None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, request("GET", &format!("/upvote-count/{id}"), None, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[test]
fn store_errors_map_to_statuses() {
    use axum::response::IntoResponse;

    let id = Uuid::now_v7();
    let cases = vec![
        (StoreError::book_not_found(id), StatusCode::NOT_FOUND),
        (StoreError::Validation("empty".into()), StatusCode::BAD_REQUEST),
        (StoreError::vote_conflict(id, id), StatusCode::CONFLICT),
        (
            StoreError::Conflict {
                book_id: id,
                account_id: None,
            },
            StatusCode::CONFLICT,
        ),
        (
            StoreError::Cancelled(catalog_kernel::Cancelled),
            StatusCode::SERVICE_UNAVAILABLE,
        ),
        (
            StoreError::Database(sqlx::Error::RowNotFound),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (err, status) in cases {
        assert_eq!(AppError::from(err).into_response().status(), status);
    }
}
