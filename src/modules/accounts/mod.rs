pub mod models;
pub mod routes;
pub mod store;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use catalog_authz::TokenVerifier;
use catalog_kernel::{InitCtx, Migration, Module};
use once_cell::sync::OnceCell;
use serde_json::json;

use routes::AccountsState;
use store::SqliteAccountStore;

/// Account CRUD under `/api/v1/account`
pub struct AccountsModule {
    state: OnceCell<AccountsState>,
}

impl AccountsModule {
    pub const fn new() -> Self {
        Self {
            state: OnceCell::new(),
        }
    }
}

impl Default for AccountsModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for AccountsModule {
    fn name(&self) -> &'static str {
        "accounts"
    }

    fn base_path(&self) -> String {
        "/api/v1/account".to_string()
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let state = AccountsState {
            store: Arc::new(SqliteAccountStore::new(ctx.db.clone())),
            verifier: Arc::new(TokenVerifier::new(&ctx.settings.auth)),
            shutdown: ctx.shutdown.clone(),
        };
        if self.state.set(state).is_err() {
            tracing::warn!(module = self.name(), "accounts module already initialized");
        }

        tracing::info!(module = self.name(), "accounts module initialized");
        Ok(())
    }

    fn routes(&self) -> Router {
        match self.state.get() {
            Some(state) => routes::router(state.clone()),
            None => {
                tracing::error!(module = self.name(), "routes requested before init");
                Router::new()
            }
        }
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        let account = json!({
            "description": "Account",
            "content": {
                "application/json": {
                    "schema": { "$ref": "#/components/schemas/Account" }
                }
            }
        });
        let error = |description: &str| {
            json!({
                "description": description,
                "content": {
                    "application/json": {
                        "schema": { "$ref": "#/components/schemas/ErrorResponse" }
                    }
                }
            })
        };
        let id_param = json!([{
            "name": "id", "in": "path", "required": true,
            "schema": { "type": "string", "format": "uuid" }
        }]);
        let bearer = json!([{ "bearer": [] }]);

        Some(json!({
            "paths": {
                "/": {
                    "post": {
                        "summary": "Create an account",
                        "tags": ["Accounts"],
                        "security": bearer,
                        "responses": {
                            "200": account,
                            "400": error("Validation error"),
                            "401": error("Missing or invalid bearer token")
                        }
                    }
                },
                "/{id}": {
                    "get": {
                        "summary": "Get an account",
                        "tags": ["Accounts"],
                        "parameters": id_param,
                        "responses": {
                            "200": account,
                            "404": error("Account not found")
                        }
                    },
                    "patch": {
                        "summary": "Update name or email",
                        "tags": ["Accounts"],
                        "security": bearer,
                        "parameters": id_param,
                        "responses": {
                            "200": account,
                            "403": error("Token belongs to another account"),
                            "404": error("Account not found")
                        }
                    },
                    "delete": {
                        "summary": "Delete an account",
                        "tags": ["Accounts"],
                        "security": bearer,
                        "parameters": id_param,
                        "responses": {
                            "200": {
                                "description": "Deleted",
                                "content": {
                                    "application/json": {
                                        "schema": { "$ref": "#/components/schemas/Envelope" }
                                    }
                                }
                            },
                            "403": error("Token belongs to another account"),
                            "404": error("Account not found")
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Account": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string", "format": "uuid" },
                            "name": { "type": "string" },
                            "email": { "type": "string", "format": "email" },
                            "created_at": { "type": "integer", "description": "Unix seconds" }
                        },
                        "required": ["id", "name", "email", "created_at"]
                    }
                }
            }
        }))
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![Migration {
            id: "001_init",
            up: store::CREATE_ACCOUNT_TABLES,
        }]
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "accounts module stopped");
        Ok(())
    }
}

/// Create a new instance of the accounts module
pub fn create_module() -> Arc<dyn Module> {
    Arc::new(AccountsModule::new())
}
