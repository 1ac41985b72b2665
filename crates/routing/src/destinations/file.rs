//! FileDestination - appends changes as JSON lines, one file per table

use contracts::{ChangeRecord, ContractError, DeliveryResult, Destination, DestinationType};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, instrument};

/// Configuration for FileDestination
#[derive(Debug, Clone)]
pub struct FileDestinationConfig {
    /// Base output directory
    pub base_path: PathBuf,
}

impl FileDestinationConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let base_path = params
            .get("base_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output"));

        Self { base_path }
    }
}

/// One output line; readable back by the `route` command
#[derive(Serialize)]
struct ChangeLine<'a> {
    table: &'a str,
    #[serde(flatten)]
    change: &'a ChangeRecord,
}

/// Destination that appends changes to `<base_path>/<table>.jsonl`
pub struct FileDestination {
    name: String,
    enabled: bool,
    config: FileDestinationConfig,
    files: HashMap<PathBuf, File>,
}

impl FileDestination {
    /// Create a new FileDestination
    pub fn new(name: impl Into<String>, config: FileDestinationConfig) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.base_path)?;

        Ok(Self {
            name: name.into(),
            enabled: true,
            config,
            files: HashMap::new(),
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        Self::new(name, FileDestinationConfig::from_params(params))
    }

    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    /// Output file for a table
    pub fn path_for(&self, table: &str) -> PathBuf {
        self.config
            .base_path
            .join(format!("{}.jsonl", sanitize_table(table)))
    }

    async fn append(&mut self, path: PathBuf, line: &[u8]) -> std::io::Result<()> {
        let file = match self.files.entry(path) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(entry.key())
                    .await?;
                entry.insert(file)
            }
        };
        file.write_all(line).await?;
        file.flush().await
    }
}

/// Keep table names usable as file names
fn sanitize_table(table: &str) -> String {
    let cleaned: String = table
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

impl Destination for FileDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn destination_type(&self) -> DestinationType {
        DestinationType::FileSystem
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[instrument(
        name = "file_destination_deliver",
        skip(self, change),
        fields(destination = %self.name, change_id = %change.id)
    )]
    async fn deliver(
        &mut self,
        change: &ChangeRecord,
        table: &str,
    ) -> Result<DeliveryResult, ContractError> {
        if !self.enabled {
            return Ok(DeliveryResult::disabled());
        }

        let mut line = serde_json::to_vec(&ChangeLine { table, change })?;
        line.push(b'\n');

        let path = self.path_for(table);
        match self.append(path, &line).await {
            Ok(()) => Ok(DeliveryResult::success(Duration::ZERO)),
            Err(e) => {
                error!(destination = %self.name, table, error = %e, "Write failed");
                Ok(DeliveryResult::failure(format!("write failed: {e}")))
            }
        }
    }

    #[instrument(name = "file_destination_dispose", skip(self))]
    async fn dispose(&mut self) -> Result<(), ContractError> {
        for (path, mut file) in self.files.drain() {
            file.flush().await?;
            debug!(destination = %self.name, path = %path.display(), "File closed");
        }
        debug!(destination = %self.name, "FileDestination closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ChangeOperation;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_destination_appends_lines() {
        let dir = tempdir().unwrap();
        let config = FileDestinationConfig {
            base_path: dir.path().join("out"),
        };
        let mut dest = FileDestination::new("archive", config).unwrap();

        for id in ["c1", "c2"] {
            let change = ChangeRecord::new(id, ChangeOperation::Insert, "0/1")
                .with_metadata("amount", 42);
            let result = dest.deliver(&change, "public.orders").await.unwrap();
            assert!(result.success);
        }
        dest.dispose().await.unwrap();

        let content = std::fs::read_to_string(dir.path().join("out/public.orders.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["table"], "public.orders");
        assert_eq!(lines[1]["id"], "c2");
        assert_eq!(lines[0]["metadata"]["amount"], 42);
    }

    #[tokio::test]
    async fn test_disabled_file_destination_writes_nothing() {
        let dir = tempdir().unwrap();
        let mut dest = FileDestination::from_params(
            "archive",
            &HashMap::from([(
                "base_path".to_string(),
                dir.path().display().to_string(),
            )]),
        )
        .unwrap();
        dest.set_enabled(false);

        let change = ChangeRecord::new("c1", ChangeOperation::Delete, "0/1");
        let result = dest.deliver(&change, "orders").await.unwrap();

        assert!(!result.success);
        assert!(!dest.path_for("orders").exists());
    }

    #[test]
    fn test_sanitize_table() {
        assert_eq!(sanitize_table("public.orders"), "public.orders");
        assert_eq!(sanitize_table("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_table(".."), "_");
        assert_eq!(sanitize_table(""), "_");
    }
}
