use crate::config::Config;
use crate::db::{StoreError, ACTIVE_TRANSACTIONS, ARCHIVED_TRANSACTIONS, TRACKED_ADDRESSES, WEBHOOKS, WEBHOOK_QUEUE};
use crate::models::{ActiveTransaction, ArchivedTransaction, WatchedAddress, Webhook, WebhookDelivery};
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use tracing::info;

/// Handle to the document store. Cheap to clone; every component keeps its
/// own copy.
#[derive(Clone)]
pub struct Db {
    database: Database,
}

impl Db {
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(&config.mongodb_url).await?;
        options.app_name = Some("bsv-address-monitor".to_string());

        let client = Client::with_options(options)?;
        let database = client.database(&config.mongodb_db);

        // Fail startup early if the store is unreachable.
        database.run_command(doc! { "ping": 1 }, None).await?;
        info!("Connected to store database {}", config.mongodb_db);

        Ok(Self { database })
    }

    /// Round trip to the server, used at startup and by the liveness
    /// watchdog.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.database.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    pub fn addresses(&self) -> Collection<WatchedAddress> {
        self.database.collection(TRACKED_ADDRESSES)
    }

    pub fn active_txs(&self) -> Collection<ActiveTransaction> {
        self.database.collection(ACTIVE_TRANSACTIONS)
    }

    pub fn archived_txs(&self) -> Collection<ArchivedTransaction> {
        self.database.collection(ARCHIVED_TRANSACTIONS)
    }

    pub fn webhooks(&self) -> Collection<Webhook> {
        self.database.collection(WEBHOOKS)
    }

    pub fn webhook_queue(&self) -> Collection<WebhookDelivery> {
        self.database.collection(WEBHOOK_QUEUE)
    }
}
