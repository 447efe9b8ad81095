pub mod client;
pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::database::store::SessionStore;
use crate::services::{session_service::SessionService, submission_service::SubmissionService};

#[derive(Clone)]
pub struct AppState {
    pub session_service: SessionService,
    pub submission_service: SubmissionService,
}

impl AppState {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        let session_service = SessionService::new(store.clone());
        let submission_service = SubmissionService::new(store);

        Self {
            session_service,
            submission_service,
        }
    }
}
