use std::sync::Arc;

use axum::{
    extract::{FromRef, Path, State},
    routing::{get, post},
    Json, Router,
};
use catalog_authz::TokenVerifier;
use catalog_http::{auth::Authenticated, error::AppError, response::Envelope};
use catalog_kernel::CallContext;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::models::{Account, CreateAccount, UpdateAccount};
use super::store::{AccountError, AccountStore};
use crate::utils::parse_id;

#[derive(Clone)]
pub struct AccountsState {
    pub store: Arc<dyn AccountStore>,
    pub verifier: Arc<TokenVerifier>,
    pub shutdown: CancellationToken,
}

impl FromRef<AccountsState> for Arc<TokenVerifier> {
    fn from_ref(state: &AccountsState) -> Self {
        state.verifier.clone()
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::NotFound(_) => AppError::not_found(err.to_string()),
            AccountError::Validation(message) => AppError::validation(vec![], message),
            AccountError::Conflict(id) => AppError::conflict(
                vec![json!({ "retryable": true, "account_id": id })],
                "request collided with a concurrent update, retry it",
            ),
            AccountError::Cancelled(_) => AppError::unavailable("request cancelled"),
            AccountError::Database(e) => AppError::Internal(anyhow::Error::new(e)),
        }
    }
}

fn validate(account: &Account) -> Result<(), AppError> {
    let problems = account.problems();
    if problems.is_empty() {
        return Ok(());
    }
    let details = problems
        .into_iter()
        .map(|(field, error)| json!({ "field": field, "error": error }))
        .collect();
    Err(AppError::validation(details, "invalid account"))
}

pub fn router(state: AccountsState) -> Router {
    Router::new()
        .route("/", post(create_account))
        .route(
            "/{id}",
            get(get_account)
                .patch(update_account)
                .delete(delete_account),
        )
        .with_state(state)
}

async fn create_account(
    State(state): State<AccountsState>,
    Authenticated(_principal): Authenticated,
    Json(request): Json<CreateAccount>,
) -> Result<Json<Account>, AppError> {
    let account = Account::new(request.name, request.email);
    validate(&account)?;

    let ctx = CallContext::child_of(&state.shutdown);
    let created = state.store.create(&ctx, account).await?;
    tracing::info!(account_id = %created.id, "account created");
    Ok(Json(created))
}

async fn get_account(
    State(state): State<AccountsState>,
    Path(id): Path<String>,
) -> Result<Json<Account>, AppError> {
    let id = parse_id("account", &id)?;
    let ctx = CallContext::child_of(&state.shutdown);
    Ok(Json(state.store.get(&ctx, id).await?))
}

async fn update_account(
    State(state): State<AccountsState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(changes): Json<UpdateAccount>,
) -> Result<Json<Account>, AppError> {
    let id = parse_id("account", &id)?;
    if !principal.may_act_for(id) {
        return Err(AppError::forbidden("cannot modify another account"));
    }

    let ctx = CallContext::child_of(&state.shutdown);
    let account = changes.apply_to(state.store.get(&ctx, id).await?);
    validate(&account)?;

    Ok(Json(state.store.update(&ctx, account).await?))
}

async fn delete_account(
    State(state): State<AccountsState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Envelope, AppError> {
    let id = parse_id("account", &id)?;
    if !principal.may_act_for(id) {
        return Err(AppError::forbidden("cannot delete another account"));
    }

    state
        .store
        .delete(&CallContext::child_of(&state.shutdown), id)
        .await?;
    tracing::info!(account_id = %id, "account deleted");
    Ok(Envelope::ok("Successfully deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::accounts::store::{SqliteAccountStore, CREATE_ACCOUNT_TABLES};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use catalog_kernel::settings::AuthSettings;
    use http_body_util::BodyExt;
    use sqlx::sqlite::SqlitePoolOptions;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn verifier() -> Arc<TokenVerifier> {
        Arc::new(TokenVerifier::new(&AuthSettings {
            jwt_secret: "test-secret".to_string(),
            leeway_secs: 0,
        }))
    }

    async fn app() -> Router {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::raw_sql(CREATE_ACCOUNT_TABLES)
            .execute(&pool)
            .await
            .unwrap();

        router(AccountsState {
            store: Arc::new(SqliteAccountStore::new(pool)),
            verifier: verifier(),
            shutdown: CancellationToken::new(),
        })
    }

    fn request(
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: serde_json::Value,
    ) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn account_crud_over_http() {
        let app = app().await;
        let service_token = verifier().issue(None, Some(300)).unwrap();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/",
                Some(&service_token),
                json!({"name": "Ada", "email": "ada@example.com"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = json_body(response).await;
        let id = created["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request("GET", &format!("/{id}"), None, json!(null)))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["email"], "ada@example.com");

        let own_token = verifier()
            .issue(Some(Uuid::parse_str(&id).unwrap()), Some(300))
            .unwrap();
        let response = app
            .clone()
            .oneshot(request(
                "PATCH",
                &format!("/{id}"),
                Some(&own_token),
                json!({"name": "Ada Lovelace"}),
            ))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["name"], "Ada Lovelace");

        let response = app
            .clone()
            .oneshot(request("DELETE", &format!("/{id}"), Some(&own_token), json!(null)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", &format!("/{id}"), None, json!(null)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_account_lists_fields() {
        let app = app().await;
        let token = verifier().issue(None, None).unwrap();

        let response = app
            .oneshot(request(
                "POST",
                "/",
                Some(&token),
                json!({"name": "", "email": "nobody"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["details"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn other_accounts_cannot_be_modified() {
        let app = app().await;
        let token = verifier().issue(Some(Uuid::now_v7()), None).unwrap();

        let response = app
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/{}", Uuid::now_v7()),
                Some(&token),
                json!(null),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(request("POST", "/", None, json!({"name": "x", "email": "x@y"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
