use std::sync::Arc;

use tracing::info;

use nagbot_core::{
    config::Config,
    store::{reconcile_active_flags, JsonUserStore, UserStore},
};

#[tokio::main]
async fn main() -> Result<(), nagbot_core::Error> {
    nagbot_core::logging::init("nagbot")?;

    let cfg = Arc::new(Config::load()?);
    let store: Arc<dyn UserStore> = Arc::new(JsonUserStore::open(cfg.store_file.clone())?);

    // Delivery loops are not restored across restarts; correct any `active`
    // flags the previous process left behind.
    let corrected = reconcile_active_flags(store.as_ref())?;
    if corrected > 0 {
        info!(corrected, "reconciled stale active flags");
    }

    nagbot_telegram::router::run_polling(cfg, store)
        .await
        .map_err(|e| nagbot_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
