use chrono::DateTime;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use erp_offline::queue::{OperationStatus, OperationType, SyncOperation, SyncQueue};
use erp_offline::{logging, Config, SqliteStorage, TtlCache};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "erp-offline")]
#[command(about = "Inspect and maintain the local ERP cache and sync queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/erp-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Storage database to operate on (overrides store.path)
  #[arg(short, long)]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Cached reads
  #[command(subcommand)]
  Cache(CacheCommand),
  /// Pending mutations
  #[command(subcommand)]
  Queue(QueueCommand),
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Entry count, total size and keys
  Stats,
  /// Print a cached value
  Get { key: String },
  /// Evict expired entries
  Clean,
  /// Remove one entry
  Remove { key: String },
  /// Remove every entry
  Clear,
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// List queued operations, oldest first
  List {
    /// Only operations that ran out of retries
    #[arg(long)]
    exhausted: bool,
    /// Only operations in this state (pending, syncing or failed)
    #[arg(long)]
    status: Option<String>,
  },
  /// Counts by status and operation type
  Stats,
  /// Queue a mutation
  Enqueue {
    /// Target collection, e.g. "customers"
    entity_type: String,
    /// create, update or delete
    operation: String,
    /// JSON payload
    payload: String,
    /// Entity id (required for update and delete)
    #[arg(long)]
    id: Option<String>,
  },
  /// Remove one operation
  Remove { id: String },
  /// Remove every operation and reset sync state
  Clear,
}

fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let path = match args.store {
    Some(path) => path,
    None => config.store_path()?,
  };
  let storage = Arc::new(SqliteStorage::open(&path)?);

  match args.command {
    Command::Cache(command) => {
      let cache = TtlCache::new(storage).with_defaults(config.cache.options());
      run_cache(&cache, command)
    }
    Command::Queue(command) => {
      let queue = SyncQueue::new(storage).with_max_retries(config.queue.max_retries);
      run_queue(&queue, command)
    }
  }
}

fn run_cache(cache: &TtlCache<SqliteStorage>, command: CacheCommand) -> Result<()> {
  match command {
    CacheCommand::Stats => print_json(&cache.stats()),
    CacheCommand::Get { key } => match cache.get_value(&key) {
      Some(value) => print_json(&value),
      None => Err(eyre!("No valid cache entry for '{}'", key)),
    },
    CacheCommand::Clean => {
      println!("Removed {} expired entries", cache.clean_expired());
      Ok(())
    }
    CacheCommand::Remove { key } => {
      if cache.remove(&key) {
        println!("Removed {}", key);
      } else {
        println!("No entry for {}", key);
      }
      Ok(())
    }
    CacheCommand::Clear => {
      if !cache.clear() {
        return Err(eyre!("Failed to clear cache"));
      }
      println!("Cache cleared");
      Ok(())
    }
  }
}

fn run_queue(queue: &SyncQueue<SqliteStorage>, command: QueueCommand) -> Result<()> {
  match command {
    QueueCommand::List { exhausted, status } => {
      let status = status
        .map(|s| s.parse::<OperationStatus>())
        .transpose()?;
      let mut operations = if exhausted {
        queue.exhausted_operations()
      } else {
        queue.operations()
      };
      if let Some(status) = status {
        operations.retain(|op| op.status == status);
      }

      if operations.is_empty() {
        println!("No matching operations");
      }
      for op in &operations {
        println!("{}", format_operation(op, queue.max_retries()));
      }
      Ok(())
    }
    QueueCommand::Stats => print_json(&queue.get_stats()),
    QueueCommand::Enqueue {
      entity_type,
      operation,
      payload,
      id,
    } => {
      let operation_type: OperationType = operation.parse()?;
      let payload: serde_json::Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Payload is not valid JSON: {}", e))?;
      let op_id = queue.enqueue(&entity_type, operation_type, &payload, id.as_deref())?;
      println!("{}", op_id);
      Ok(())
    }
    QueueCommand::Remove { id } => {
      if queue.remove_operation(&id) {
        println!("Removed {}", id);
      } else {
        println!("No operation {}", id);
      }
      Ok(())
    }
    QueueCommand::Clear => {
      if !queue.clear_queue() {
        return Err(eyre!("Failed to clear sync queue"));
      }
      println!("Sync queue cleared");
      Ok(())
    }
  }
}

fn format_operation(op: &SyncOperation, max_retries: u32) -> String {
  let enqueued = DateTime::from_timestamp_millis(op.enqueued_at)
    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
    .unwrap_or_else(|| op.enqueued_at.to_string());

  let mut line = format!(
    "{}  {:<9} {:<6} {}",
    op.id, op.status, op.operation_type, op.entity_type
  );
  if let Some(entity_id) = &op.entity_id {
    line.push_str(&format!("/{}", entity_id));
  }
  line.push_str(&format!(
    "  enqueued={} retries={}/{}",
    enqueued, op.retry_count, max_retries
  ));
  if let Some(error) = &op.last_error {
    line.push_str(&format!("  error={}", error));
  }
  line
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to render output: {}", e))?;
  println!("{}", text);
  Ok(())
}
