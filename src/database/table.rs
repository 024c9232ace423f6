//! Table header and row-level table handle
//!
//! A table is one file: block 0 holds the bincode-encoded [`TableHeader`],
//! block 1 the allocation graph, and the remaining blocks tree nodes and
//! records. Every row operation runs in its own logged transaction
//! (Begin, page images, Commit) and rewrites the header when the tree's
//! entry points or the row count changed.

use super::persistence::CheckpointPolicy;
use crate::index::{BPlusTree, NodeLayout, TreeMeta, TreeStats};
use crate::query::predicate::{self, Assignment, Logic, Predicate};
use crate::storage::{BlockId, BlockStore, BlockType, HEADER_BLOCK};
use crate::types::{decode_record, encode_record, Attribute, DataType, ForeignRef, Key, Row, TableSchema};
use crate::{Result, StorageError};
use ahash::AHashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::RangeBounds;
use std::sync::Arc;
use tracing::{debug, warn};

/// Magic number for table headers (ASCII "TTBL")
const HEADER_MAGIC: u32 = 0x5454_424C;

const HEADER_VERSION: u32 = 1;

/// Longest table name accepted
const MAX_TABLE_NAME: usize = 64;

/// Names of tables with a live handle
pub(crate) type OpenTables = Arc<Mutex<AHashSet<String>>>;

/// Table metadata stored in block 0
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TableHeader {
    magic: u32,
    version: u32,
    pub name: String,
    pub block_size: u32,
    /// B+Tree order V
    pub order: u32,
    pub key_type: DataType,
    pub tree: TreeMeta,
    pub schema: TableSchema,
    pub row_count: u64,
}

impl TableHeader {
    pub fn new(name: &str, block_size: usize, order: usize, schema: TableSchema) -> Self {
        Self {
            magic: HEADER_MAGIC,
            version: HEADER_VERSION,
            name: name.to_string(),
            block_size: block_size as u32,
            order: order as u32,
            key_type: schema.key_type(),
            tree: TreeMeta::default(),
            schema,
            row_count: 0,
        }
    }

    /// `[len u32][bincode header]`, zero padded to a full block
    pub fn encode(&self, block_size: usize) -> Result<Vec<u8>> {
        let bytes = bincode::serialize(self)?;
        if bytes.len() + 4 > block_size {
            return Err(StorageError::InvalidArgument(format!(
                "header of table '{}' needs {} bytes, block is {}",
                self.name,
                bytes.len() + 4,
                block_size
            )));
        }
        let mut block = vec![0u8; block_size];
        block[..4].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        block[4..4 + bytes.len()].copy_from_slice(&bytes);
        Ok(block)
    }

    pub fn decode(block: &[u8]) -> Result<Self> {
        if block.len() < 4 {
            return Err(StorageError::Corruption("header block too short".into()));
        }
        let len = u32::from_le_bytes([block[0], block[1], block[2], block[3]]) as usize;
        let bytes = block
            .get(4..4 + len)
            .ok_or_else(|| StorageError::Corruption(format!("header length {} exceeds block", len)))?;
        let header: TableHeader = bincode::deserialize(bytes)?;
        if header.magic != HEADER_MAGIC {
            return Err(StorageError::Corruption(format!(
                "bad header magic {:#x}",
                header.magic
            )));
        }
        if header.version != HEADER_VERSION {
            return Err(StorageError::Corruption(format!(
                "unsupported header version {}",
                header.version
            )));
        }
        // Re-run schema validation on what came off disk.
        TableSchema::new(header.schema.attributes().to_vec())?;
        if header.key_type != header.schema.key_type() {
            return Err(StorageError::Corruption(format!(
                "header key type {} disagrees with schema key {}",
                header.key_type.name(),
                header.schema.key_type().name()
            )));
        }
        Ok(header)
    }
}

pub(crate) fn validate_table_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TABLE_NAME
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidArgument(format!(
            "table name '{}' must be 1..={} ASCII letters, digits or '_'",
            name, MAX_TABLE_NAME
        )))
    }
}

/// Handle to one open table
pub struct Table {
    header: TableHeader,
    store: BlockStore,
    tree: BPlusTree,
    checkpoints: Arc<CheckpointPolicy>,
    open_tables: OpenTables,
}

impl Table {
    /// Lay out a new table file and write its header
    pub(crate) fn create(
        store: BlockStore,
        name: &str,
        schema: TableSchema,
        order: usize,
        checkpoints: Arc<CheckpointPolicy>,
        open_tables: OpenTables,
    ) -> Result<Self> {
        validate_table_name(name)?;
        let block_size = store.block_size();
        let layout = NodeLayout::new(order, schema.key_type(), block_size)?;
        if schema.record_width() > block_size {
            return Err(StorageError::InvalidArgument(format!(
                "records of table '{}' need {} bytes, block is {}",
                name,
                schema.record_width(),
                block_size
            )));
        }
        let header = TableHeader::new(name, block_size, order, schema);
        let image = header.encode(block_size)?;
        if store.pool().disk().exists(name) {
            return Err(StorageError::TableExists(name.to_string()));
        }
        Self::claim(&open_tables, name)?;

        let created = (|| {
            store.begin()?;
            store.create_file(name)?;
            store.write_block(name, HEADER_BLOCK, &image)?;
            store.commit()
        })();
        if let Err(e) = created {
            open_tables.lock().remove(name);
            if store.current_txn() != 0 {
                if let Err(abort_err) = store.abort() {
                    warn!(table = name, error = %abort_err, "failed to log abort");
                }
            }
            return Err(e);
        }
        debug!(table = name, order, block_size, "table created");

        let tree = BPlusTree::new(store.clone(), name, layout, header.tree);
        let table = Self {
            header,
            store,
            tree,
            checkpoints,
            open_tables,
        };
        table.checkpoints.record_op(&table.store);
        Ok(table)
    }

    /// Open an existing table file
    pub(crate) fn open(
        store: BlockStore,
        name: &str,
        checkpoints: Arc<CheckpointPolicy>,
        open_tables: OpenTables,
    ) -> Result<Self> {
        validate_table_name(name)?;
        if !store.pool().disk().exists(name) {
            return Err(StorageError::TableNotFound(name.to_string()));
        }
        let header = TableHeader::decode(&store.read_block(name, HEADER_BLOCK)?)?;
        if header.block_size as usize != store.block_size() {
            return Err(StorageError::Config(format!(
                "table '{}' uses {}-byte blocks, database is configured for {}",
                name,
                header.block_size,
                store.block_size()
            )));
        }
        if header.name != name {
            return Err(StorageError::Corruption(format!(
                "file '{}' holds table '{}'",
                name, header.name
            )));
        }
        let layout = NodeLayout::new(header.order as usize, header.key_type, store.block_size())?;
        Self::claim(&open_tables, name)?;

        let tree = BPlusTree::new(store.clone(), name, layout, header.tree);
        Ok(Self {
            header,
            store,
            tree,
            checkpoints,
            open_tables,
        })
    }

    fn claim(open_tables: &OpenTables, name: &str) -> Result<()> {
        if !open_tables.lock().insert(name.to_string()) {
            return Err(StorageError::InvalidArgument(format!(
                "table '{}' is already open",
                name
            )));
        }
        Ok(())
    }

    // ==================== Introspection ====================

    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    pub fn schema(&self) -> &TableSchema {
        &self.header.schema
    }

    pub fn key_attribute(&self) -> &Attribute {
        self.header.schema.key_attribute()
    }

    pub fn foreign_references(&self) -> Vec<(&Attribute, ForeignRef)> {
        self.header.schema.foreign_references()
    }

    pub fn len(&self) -> u64 {
        self.header.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.header.row_count == 0
    }

    pub fn tree_stats(&self) -> Result<TreeStats> {
        self.tree.stats()
    }

    /// Full structural check of the table's tree
    pub fn check(&self) -> Result<TreeStats> {
        let stats = self.tree.check_tree()?;
        if stats.keys as u64 != self.header.row_count {
            return Err(StorageError::Corruption(format!(
                "table '{}' header counts {} rows, tree holds {}",
                self.name(),
                self.header.row_count,
                stats.keys
            )));
        }
        Ok(stats)
    }

    // ==================== Transactions ====================

    /// Run `op` as one logged transaction. Once Commit is logged the
    /// operation succeeds even if the automatic checkpoint after it fails.
    ///
    /// On failure the handle falls back to the last committed header and an
    /// Abort record is written, but nothing is undone: pages `op` wrote
    /// before failing keep their new images, in the pool and in the log.
    /// A failure part way through a split or merge therefore leaves nodes
    /// that disagree with the header, which [`Table::check`] reports. The
    /// pre-checks in the row operations keep the expected failures
    /// (duplicate keys, bad rows, full files) ahead of `Begin`.
    fn in_txn<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let committed = self.header.clone();
        self.store.begin()?;
        let result = op(self).and_then(|value| {
            self.sync_header(&committed)?;
            Ok(value)
        });
        match result {
            Ok(value) => {
                self.store.commit()?;
                self.checkpoints.record_op(&self.store);
                Ok(value)
            }
            Err(e) => {
                self.tree.reset_meta(committed.tree);
                self.header = committed;
                if let Err(abort_err) = self.store.abort() {
                    warn!(table = %self.header.name, error = %abort_err, "failed to log abort");
                }
                Err(e)
            }
        }
    }

    /// Rewrite block 0 if the tree entry points or the row count moved
    fn sync_header(&mut self, committed: &TableHeader) -> Result<()> {
        self.header.tree = self.tree.meta();
        if self.header == *committed {
            return Ok(());
        }
        let image = self.header.encode(self.store.block_size())?;
        self.store.update_block(&self.header.name, HEADER_BLOCK, &image)
    }

    /// Fail before touching the tree when an insert could run out of blocks:
    /// one record plus a split on every level and a new root.
    fn ensure_capacity(&self) -> Result<()> {
        let graph = self.store.read_graph(self.name())?;
        let available = graph.count(BlockType::Free) + graph.count(BlockType::Unavailable);
        let needed = self.tree.meta().depth as usize + 2;
        if available < needed {
            return Err(StorageError::AllocationExhausted {
                file: self.name().to_string(),
                limit: graph.capacity(),
            });
        }
        Ok(())
    }

    fn read_row(&self, record: BlockId) -> Result<Row> {
        let page = self.store.page(self.name(), record)?;
        let row = decode_record(&self.header.schema, &page.read());
        row
    }

    // ==================== Rows ====================

    /// Insert a row. Returns the block holding the record.
    pub fn insert_row(&mut self, row: Row) -> Result<BlockId> {
        self.header.schema.check_row(&row)?;
        let key = row[self.header.schema.key_index()].clone();
        if self.tree.contains_key(&key)? {
            return Err(StorageError::DuplicateKey(key.to_string()));
        }
        self.ensure_capacity()?;
        let image = encode_record(&self.header.schema, &row, self.store.block_size())?;

        self.in_txn(|table| {
            let name = table.header.name.clone();
            let record = table.store.allocate_block(&name, BlockType::Record)?;
            table.store.write_block(&name, record, &image)?;
            table.tree.insert(key, record)?;
            table.header.row_count += 1;
            Ok(record)
        })
    }

    pub fn get_row(&self, key: &Key) -> Result<Option<Row>> {
        match self.tree.search(key)? {
            Some(record) => Ok(Some(self.read_row(record)?)),
            None => Ok(None),
        }
    }

    /// Delete the row stored under `key`. Returns false if absent.
    pub fn delete_row(&mut self, key: &Key) -> Result<bool> {
        if !self.tree.contains_key(key)? {
            return Ok(false);
        }
        self.in_txn(|table| {
            let deleted = table.tree.delete(key)?;
            if deleted {
                table.header.row_count = table.header.row_count.saturating_sub(1);
            }
            Ok(deleted)
        })
    }

    /// Rows with keys in `range`, in key order
    pub fn range<R: RangeBounds<Key>>(&self, range: R) -> Result<Vec<Row>> {
        self.tree
            .range(range)
            .and_then(|entries| entries.into_iter().map(|(_, record)| self.read_row(record)).collect())
    }

    /// `(record block, row)` pairs matching the condition list, in key order
    fn matching(&self, predicates: &[Predicate], logic: &[Logic]) -> Result<Vec<(BlockId, Row)>> {
        predicate::check_connectors(predicates, logic)?;
        let schema = &self.header.schema;

        if let [only] = predicates {
            if only.is_key_lookup(schema) {
                return Ok(match self.tree.search(&only.value)? {
                    Some(record) => vec![(record, self.read_row(record)?)],
                    None => Vec::new(),
                });
            }
        }

        let mut rows = Vec::new();
        for (_, record) in self.tree.scan()? {
            let row = self.read_row(record)?;
            if predicate::evaluate(schema, &row, predicates, logic)? {
                rows.push((record, row));
            }
        }
        Ok(rows)
    }

    /// Rows matching the condition list, in key order
    pub fn scan(&self, predicates: &[Predicate], logic: &[Logic]) -> Result<Vec<Row>> {
        Ok(self
            .matching(predicates, logic)?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    /// Apply `assignments` to every matching row. The key attribute cannot
    /// be assigned. Returns the number of rows updated.
    pub fn update(
        &mut self,
        predicates: &[Predicate],
        logic: &[Logic],
        assignments: &[Assignment],
    ) -> Result<usize> {
        if assignments.is_empty() {
            return Err(StorageError::InvalidArgument("update without assignments".into()));
        }
        let schema = self.header.schema.clone();
        for assignment in assignments {
            if schema.position(&assignment.attribute)? == schema.key_index() {
                return Err(StorageError::InvalidArgument(format!(
                    "key attribute '{}' cannot be updated",
                    assignment.attribute
                )));
            }
        }

        let mut images = Vec::new();
        for (record, mut row) in self.matching(predicates, logic)? {
            for assignment in assignments {
                assignment.apply(&schema, &mut row)?;
            }
            images.push((record, encode_record(&schema, &row, self.store.block_size())?));
        }
        if images.is_empty() {
            return Ok(0);
        }

        self.in_txn(|table| {
            for (record, image) in &images {
                table.store.update_block(&table.header.name, *record, image)?;
            }
            Ok(images.len())
        })
    }

    /// Delete every matching row. With no predicates the whole tree is
    /// cleared. Returns the number of rows deleted.
    pub fn delete_where(&mut self, predicates: &[Predicate], logic: &[Logic]) -> Result<usize> {
        if predicates.is_empty() {
            predicate::check_connectors(predicates, logic)?;
            return self.in_txn(|table| {
                let freed = table.tree.clear()?;
                table.header.row_count = 0;
                Ok(freed)
            });
        }

        let key_index = self.header.schema.key_index();
        let keys: Vec<Key> = self
            .matching(predicates, logic)?
            .into_iter()
            .map(|(_, mut row)| row.swap_remove(key_index))
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }

        self.in_txn(|table| {
            let mut deleted = 0;
            for key in &keys {
                if table.tree.delete(key)? {
                    deleted += 1;
                }
            }
            table.header.row_count = table.header.row_count.saturating_sub(deleted as u64);
            Ok(deleted)
        })
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        self.open_tables.lock().remove(&self.header.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DBConfig;
    use crate::txn::LogType;
    use crate::types::Value;
    use crate::Database;
    use tempfile::TempDir;

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            Attribute::new("id", DataType::Int).primary_key(),
            Attribute::new("owner", DataType::Str(12)).with_constraint("REF(users(name))"),
        ])
        .unwrap()
    }

    #[test]
    fn test_header_round_trip() {
        let mut header = TableHeader::new("pets", 512, 2, schema());
        header.tree = TreeMeta {
            root: Some(7),
            head: Some(3),
            tail: Some(9),
            depth: 2,
        };
        header.row_count = 12;

        let block = header.encode(512).unwrap();
        assert_eq!(block.len(), 512);
        assert_eq!(TableHeader::decode(&block).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_garbage() {
        assert!(TableHeader::decode(&[0u8; 512]).is_err());

        let mut header = TableHeader::new("pets", 512, 2, schema());
        header.magic = 0xdead_beef;
        let block = header.encode(512).unwrap();
        assert!(matches!(TableHeader::decode(&block), Err(StorageError::Corruption(_))));

        let mut block = TableHeader::new("pets", 512, 2, schema()).encode(512).unwrap();
        block[0..4].copy_from_slice(&5000u32.to_le_bytes());
        assert!(TableHeader::decode(&block).is_err());
    }

    #[test]
    fn test_header_too_large() {
        let attributes = (0..40)
            .map(|i| {
                let attr = Attribute::new(format!("column_with_a_long_name_{}", i), DataType::Int);
                if i == 0 {
                    attr.primary_key()
                } else {
                    attr
                }
            })
            .collect();
        let header = TableHeader::new("wide", 512, 2, TableSchema::new(attributes).unwrap());
        assert!(header.encode(512).is_err());
        assert!(header.encode(4096).is_ok());
    }

    #[test]
    fn test_table_names() {
        assert!(validate_table_name("users_2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("../etc").is_err());
        assert!(validate_table_name("a b").is_err());
        assert!(validate_table_name(&"x".repeat(65)).is_err());
    }

    fn pet(id: i32) -> Row {
        vec![Value::Int(id), Value::from("ann")]
    }

    #[test]
    fn test_failed_operation_is_aborted_without_undo() {
        let temp_dir = TempDir::new().unwrap();
        let config = DBConfig::for_testing().with_order(2);
        let db = Database::open_with_config(temp_dir.path(), "main", config).unwrap();
        let mut table = db.create_table("pets", schema()).unwrap();
        for id in 0..4 {
            table.insert_row(pet(id)).unwrap();
        }
        let committed = table.header.clone();
        let header_image = table.store.read_block("pets", HEADER_BLOCK).unwrap();

        // Fails after the leaf split and the new root were logged.
        let image = encode_record(&table.header.schema, &pet(4), table.store.block_size()).unwrap();
        let result: Result<()> = table.in_txn(|t| {
            let name = t.header.name.clone();
            let record = t.store.allocate_block(&name, BlockType::Record)?;
            t.store.write_block(&name, record, &image)?;
            t.tree.insert(Value::Int(4), record)?;
            t.header.row_count += 1;
            assert_eq!(t.tree.meta().depth, 2);
            Err(std::io::Error::new(std::io::ErrorKind::Other, "device lost").into())
        });
        assert!(matches!(result, Err(StorageError::Io(_))));

        assert_eq!(table.header, committed);
        assert_eq!(table.tree.meta(), committed.tree);
        assert_eq!(table.store.read_block("pets", HEADER_BLOCK).unwrap(), header_image);
        assert_eq!(table.store.current_txn(), 0);

        let records = table.store.wal().read_records().unwrap();
        let abort = records.last().unwrap();
        assert_eq!(abort.log_type, LogType::Abort);
        let begin = records
            .iter()
            .rposition(|r| r.log_type == LogType::Begin)
            .unwrap();
        let images = &records[begin + 1..records.len() - 1];
        assert!(images.len() >= 5);
        assert!(images
            .iter()
            .all(|r| r.txn_id == abort.txn_id && matches!(r.log_type, LogType::Insert | LogType::Update)));

        // The split leaf kept its new image and link; the check sees it.
        assert!(matches!(table.check(), Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_committed_operation_survives_failed_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        let config = DBConfig {
            auto_checkpoint_interval: Some(1),
            ..DBConfig::for_testing()
        };
        let db = Database::open_with_config(temp_dir.path(), "main", config.clone()).unwrap();
        let mut table = db.create_table("pets", schema()).unwrap();
        table.insert_row(pet(1)).unwrap();

        // The checkpoint side file cannot be rewritten over a directory.
        let side_file = temp_dir.path().join("main.wal.ckpt");
        std::fs::remove_file(&side_file).unwrap();
        std::fs::create_dir(&side_file).unwrap();
        table.insert_row(pet(2)).unwrap();
        assert!(table.delete_row(&Value::Int(1)).unwrap());
        assert_eq!(table.len(), 1);

        std::fs::remove_dir(&side_file).unwrap();
        drop(table);
        db.close().unwrap();

        let db = Database::open_with_config(temp_dir.path(), "main", config).unwrap();
        let table = db.open_table("pets").unwrap();
        assert_eq!(table.scan(&[], &[]).unwrap(), vec![pet(2)]);
    }
}
