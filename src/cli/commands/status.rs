use anyhow::Result;

use crate::cli::output::{StatusInfo, get_formatter};
use crate::models::{Config, OutputFormat, VectorDriver};
use crate::services::{HttpEmbeddingProvider, create_backend};

pub async fn handle_status(config: &Config, format: OutputFormat, _verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);
    let collection = config.collection.name.clone();

    let (vector_store_connected, collection_status) = match create_backend(&config.vector_store) {
        Ok(store) => {
            let connected = store.health_check().await.unwrap_or(false);
            let status = if connected && store.collection_exists(&collection).await.unwrap_or(false)
            {
                store.collection_status(&collection).await.ok()
            } else {
                None
            };
            (connected, status)
        }
        Err(_) => (false, None),
    };

    let embedding_connected = match HttpEmbeddingProvider::new(&config.embedding) {
        Ok(provider) => provider.health_check().await.unwrap_or(false),
        Err(_) => false,
    };

    let status = StatusInfo {
        vector_store_driver: config.vector_store.driver.to_string(),
        vector_store_url: config.vector_store.url.clone(),
        vector_store_connected,
        embedding_url: config.embedding.url.clone(),
        embedding_connected,
        collection,
        collection_status,
    };

    print!("{}", formatter.format_status(&status));

    if !vector_store_connected && config.vector_store.driver == VectorDriver::Qdrant {
        eprintln!();
        eprintln!("Warning: Qdrant not running. Start with: docker-compose up -d qdrant");
    }
    if !embedding_connected {
        eprintln!();
        eprintln!(
            "Warning: embedding server not reachable at {}",
            config.embedding.url
        );
    }

    Ok(())
}
