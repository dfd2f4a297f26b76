use std::sync::Arc;

use crate::database::Database;
use crate::engine::PredictionEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PredictionEngine>,
    pub db: Arc<Database>,
}
