use crate::config::Config;
use crate::db::Db;
use crate::explorer::ExplorerClient;
use crate::membership::AddressSet;
use crate::node::NodeClient;
use crate::tracker::ConfirmationTracker;
use std::sync::Arc;

/// Shared handles wired once at startup and passed to every component and
/// request handler.
pub struct AppState {
    pub config: Config,
    pub db: Db,
    pub membership: Arc<AddressSet>,
    pub node: Arc<dyn NodeClient>,
    pub explorer: Arc<dyn ExplorerClient>,
    pub tracker: Arc<ConfirmationTracker>,
}
