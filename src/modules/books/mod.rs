pub mod memory;
pub mod models;
pub mod policy;
pub mod routes;
pub mod service;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use catalog_authz::TokenVerifier;
use catalog_kernel::{InitCtx, Migration, Module};
use once_cell::sync::OnceCell;
use serde_json::json;

use policy::VoteLedgerPolicy;
use routes::BooksState;
use service::BookService;
use sqlite::SqliteBookStore;

/// Books and the vote ledger, served under `/api/v1/book`
pub struct BooksModule {
    state: OnceCell<BooksState>,
}

impl BooksModule {
    pub const fn new() -> Self {
        Self {
            state: OnceCell::new(),
        }
    }
}

impl Default for BooksModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    fn base_path(&self) -> String {
        "/api/v1/book".to_string()
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let store = Arc::new(SqliteBookStore::new(ctx.db.clone()));
        let service = BookService::new(store, VoteLedgerPolicy::new(&ctx.settings.voting));

        let state = BooksState {
            service,
            verifier: Arc::new(TokenVerifier::new(&ctx.settings.auth)),
            shutdown: ctx.shutdown.clone(),
        };
        if self.state.set(state).is_err() {
            tracing::warn!(module = self.name(), "books module already initialized");
        }

        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            conflict_retries = ctx.settings.voting.conflict_retries,
            "books module initialized"
        );
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
        let envelope = |description: &str| {
            json!({
                "description": description,
                "content": {
                    "application/json": {
                        "schema": { "$ref": "#/components/schemas/Envelope" }
                    }
                }
            })
        };
        let book = json!({
            "description": "Book",
            "content": {
                "application/json": {
                    "schema": { "$ref": "#/components/schemas/Book" }
                }
            }
        });
        let id_param = json!({
            "name": "id", "in": "path", "required": true,
            "schema": { "type": "string", "format": "uuid" }
        });
        let account_param = json!({
            "name": "account_id", "in": "path", "required": true,
            "schema": { "type": "string", "format": "uuid" }
        });
        let bearer = json!([{ "bearer": [] }]);

        let vote = |summary: &str| {
            json!({
                "patch": {
                    "summary": summary,
                    "tags": ["Books"],
                    "security": bearer,
                    "parameters": [account_param, id_param],
                    "responses": {
                        "200": envelope("Net vote count after the vote"),
                        "401": error("Missing or invalid bearer token"),
                        "403": error("Token belongs to another account"),
                        "404": error("Book not found"),
                        "409": error("Concurrent vote collision; retry")
                    }
                }
            })
        };

        Some(json!({
            "paths": {
                "/": {
                    "post": {
                        "summary": "Create a book",
                        "tags": ["Books"],
                        "security": bearer,
                        "requestBody": {
                            "required": true,
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/CreateBook" }
                                }
                            }
                        },
                        "responses": {
                            "200": book,
                            "400": error("Validation error"),
                            "401": error("Missing or invalid bearer token")
                        }
                    }
                },
                "/{id}": {
                    "get": {
                        "summary": "Get a book",
                        "tags": ["Books"],
                        "parameters": [id_param],
                        "responses": {
                            "200": book,
                            "404": error("Book not found")
                        }
                    },
                    "patch": {
                        "summary": "Update title, author or year",
                        "tags": ["Books"],
                        "security": bearer,
                        "parameters": [id_param],
                        "requestBody": {
                            "required": true,
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/UpdateBook" }
                                }
                            }
                        },
                        "responses": {
                            "200": book,
                            "401": error("Missing or invalid bearer token"),
                            "404": error("Book not found")
                        }
                    },
                    "delete": {
                        "summary": "Delete a book and its votes",
                        "tags": ["Books"],
                        "security": bearer,
                        "parameters": [id_param],
                        "responses": {
                            "200": envelope("Deleted"),
                            "401": error("Missing or invalid bearer token"),
                            "404": error("Book not found")
                        }
                    }
                },
                "/upvote-count/{id}": {
                    "get": {
                        "summary": "Net vote count",
                        "tags": ["Books"],
                        "parameters": [id_param],
                        "responses": {
                            "200": envelope("Net vote count"),
                            "404": error("Book not found")
                        }
                    }
                },
                "/upvote/{account_id}/{id}": vote("Upvote a book"),
                "/downvote/{account_id}/{id}": vote("Downvote a book")
            },
            "components": {
                "schemas": {
                    "Book": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string", "format": "uuid" },
                            "account_id": { "type": "string", "format": "uuid" },
                            "title": { "type": "string" },
                            "author": { "type": "string" },
                            "year": { "type": "integer" },
                            "upvotes": { "type": "integer" }
                        },
                        "required": ["id", "account_id", "title", "author", "year", "upvotes"]
                    },
                    "CreateBook": {
                        "type": "object",
                        "properties": {
                            "account_id": { "type": "string", "format": "uuid" },
                            "title": { "type": "string" },
                            "author": { "type": "string" },
                            "year": { "type": "integer" }
                        },
                        "required": ["title"]
                    },
                    "UpdateBook": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "author": { "type": "string" },
                            "year": { "type": "integer" }
                        }
                    }
                }
            }
        }))
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![Migration {
            id: "001_init",
            up: sqlite::CREATE_BOOK_TABLES,
        }]
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module stopped");
        Ok(())
    }
}

/// Create a new instance of the books module
pub fn create_module() -> Arc<dyn Module> {
    Arc::new(BooksModule::new())
}
