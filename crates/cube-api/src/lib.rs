//! kubecube API
//!
//! JSON over HTTP for the fleet control plane. Every response is an
//! envelope: `{"success": true, "data": ...}` or
//! `{"success": false, "code": ..., "message": ...}`.
//!
//! # Endpoints
//!
//! - `GET /api/v1/cube/clusters/info?cluster=` - cluster details with live stats
//! - `GET /api/v1/cube/clusters/namespaces?namespace=` - clusters holding a namespace
//! - `GET /api/v1/cube/clusters/resources?cluster=` - capacity against quota
//! - `GET /api/v1/cube/clusters/subnamespaces?tenant=&diagnostics=` - subnamespace search
//! - `POST /api/v1/cube/clusters/add` - render a join script
//! - `POST /api/v1/cube/clusters/register` - join script callback
//! - `POST /login` - authenticate
//! - `GET /healthz` - health check

#![deny(missing_docs)]

pub mod auth;
pub mod error;
pub mod response;
pub mod routes;
pub mod server;

pub use error::{ApiError, Result};
pub use routes::router;
pub use server::{start_server, AppState};
