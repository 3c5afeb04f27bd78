use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use crate::cli::output::get_formatter;
use crate::models::{CollectionConfig, Config, OutputFormat, PayloadFieldType};
use crate::services::{VectorStore, create_backend};

#[derive(Debug, Subcommand)]
pub enum CollectionCommand {
    #[command(about = "Create the configured collection with indexing disabled")]
    Create {
        #[arg(long, help = "Drop the collection first if it exists")]
        recreate: bool,
    },
    #[command(about = "Delete the configured collection")]
    Delete,
    #[command(about = "Create a payload index used by filters")]
    IndexField {
        #[arg(help = "Payload field name")]
        field: String,
        #[arg(
            long = "type",
            short = 't',
            default_value = "keyword",
            help = "Field type: keyword, integer, float, bool, text"
        )]
        field_type: PayloadFieldType,
    },
}

pub async fn handle_collection(
    cmd: CollectionCommand,
    config: &Config,
    format: OutputFormat,
    _verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let store = create_backend(&config.vector_store)?;
    let name = &config.collection.name;

    match cmd {
        CollectionCommand::Create { recreate } => {
            let created = ensure_collection(store.as_ref(), &config.collection, recreate).await?;
            let message = if created {
                format!("Created collection: {}", name)
            } else {
                format!("Collection already exists: {}", name)
            };
            print!("{}", formatter.format_message(&message));
        }
        CollectionCommand::Delete => {
            store
                .delete_collection(name)
                .await
                .with_context(|| format!("failed to delete collection {}", name))?;
            print!(
                "{}",
                formatter.format_message(&format!("Deleted collection: {}", name))
            );
        }
        CollectionCommand::IndexField { field, field_type } => {
            store
                .create_payload_index(name, &field, field_type)
                .await
                .with_context(|| format!("failed to index payload field {}", field))?;
            print!(
                "{}",
                formatter.format_message(&format!(
                    "Indexed payload field {} ({}) on {}",
                    field, field_type, name
                ))
            );
        }
    }

    Ok(())
}

/// Create the collection and its configured payload indexes unless it exists.
///
/// Returns whether the collection was created.
pub async fn ensure_collection(
    store: &dyn VectorStore,
    collection: &CollectionConfig,
    recreate: bool,
) -> Result<bool> {
    let exists = store.collection_exists(&collection.name).await?;
    if exists && !recreate {
        return Ok(false);
    }
    if exists {
        info!(collection = %collection.name, "dropping existing collection");
        store.delete_collection(&collection.name).await?;
    }

    store
        .create_collection(&collection.to_schema())
        .await
        .with_context(|| format!("failed to create collection {}", collection.name))?;
    for (field, field_type) in &collection.payload_indexes {
        store
            .create_payload_index(&collection.name, field, *field_type)
            .await
            .with_context(|| format!("failed to index payload field {}", field))?;
    }
    info!(
        collection = %collection.name,
        payload_indexes = collection.payload_indexes.len(),
        "collection created"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryBackend;

    fn collection() -> CollectionConfig {
        let mut config = CollectionConfig {
            name: "ensure".to_string(),
            dense_size: 4,
            ..Default::default()
        };
        config
            .payload_indexes
            .insert("category".to_string(), PayloadFieldType::Keyword);
        config
    }

    #[tokio::test]
    async fn test_ensure_collection_creates_once() {
        let store = MemoryBackend::new();
        assert!(ensure_collection(&store, &collection(), false).await.unwrap());
        assert!(!ensure_collection(&store, &collection(), false).await.unwrap());

        let indexes = store.payload_indexes("ensure").await;
        assert_eq!(indexes.get("category"), Some(&PayloadFieldType::Keyword));
        assert_eq!(store.hnsw_m("ensure").await, Some(0));
    }

    #[tokio::test]
    async fn test_ensure_collection_recreate_drops_points() {
        use crate::models::{EmbeddedPoint, PointId};

        let store = MemoryBackend::new();
        ensure_collection(&store, &collection(), false).await.unwrap();
        let point = EmbeddedPoint::new(PointId::Num(1), Default::default())
            .with_vector("dense", vec![1.0, 0.0, 0.0, 0.0]);
        store.upsert("ensure", vec![point]).await.unwrap();

        assert!(ensure_collection(&store, &collection(), true).await.unwrap());
        let status = store.collection_status("ensure").await.unwrap();
        assert_eq!(status.point_count, 0);
    }
}
