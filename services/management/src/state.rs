use std::sync::Arc;

use tokio::sync::Mutex;
use vl_credential::CredentialCodec;

use crate::db::Db;

/// Shared handler state. The store sits behind an async mutex — management
/// traffic is operator-scale, not telemetry-scale.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Db>>,
    pub codec: Arc<CredentialCodec>,
}

impl AppState {
    pub fn new(db: Db, codec: CredentialCodec) -> Self {
        AppState {
            db: Arc::new(Mutex::new(db)),
            codec: Arc::new(codec),
        }
    }
}
