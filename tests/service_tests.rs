//! Tests for the metadata service
//!
//! These tests verify:
//! - The lifecycle gate
//! - Block, replica, file and directory operations end to end
//! - Metadata surviving a restart through the WAL

use nsmeta::config::WalSyncStrategy;
use nsmeta::model::{Block, BlockMeta, INode, INodeFile, INodeKind, StorageLocation};
use nsmeta::service::MAX_TIMESTAMPS;
use nsmeta::{Config, Context, ErrorKind, MemoryStore, MetaService};
use tempfile::TempDir;

const TOP: i64 = 1;

// =============================================================================
// Helpers
// =============================================================================

fn service() -> MetaService {
    MetaService::with_memory_store(MemoryStore::new())
}

fn ctx() -> Context {
    Context::background()
}

fn named(name: &str, parent_id: i64) -> INode {
    INode {
        name: name.to_string(),
        parent_id,
        ..Default::default()
    }
}

fn block(id: i64, bytes: i64, replicas: &[&str]) -> Block {
    Block {
        id,
        generation: 1,
        number_bytes: bytes,
        replication: 3,
        storage: replicas.iter().map(|dn| StorageLocation::new(*dn, "disk0")).collect(),
        ..Default::default()
    }
}

// =============================================================================
// Lifecycle & Oracle
// =============================================================================

#[test]
fn test_closed_service_rejects_everything() {
    let svc = service();
    svc.put_directory(&ctx(), 2, named("home", TOP)).unwrap();
    svc.close();
    svc.close();

    assert!(!svc.is_available());
    assert_eq!(svc.get_directory(&ctx(), 2).unwrap_err().kind(), ErrorKind::Unavailable);
    assert_eq!(svc.timestamps(1).unwrap_err().kind(), ErrorKind::Unavailable);
    assert_eq!(svc.delete_directory(&ctx(), 2).unwrap_err().kind(), ErrorKind::Unavailable);
}

#[test]
fn test_timestamps() {
    let svc = service();
    let ts = svc.timestamps(4).unwrap();
    assert_eq!(ts.count, 4);
    assert!(ts.timestamp.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(svc.timestamps(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(svc.timestamps(MAX_TIMESTAMPS).unwrap().count, MAX_TIMESTAMPS);
    assert_eq!(
        svc.timestamps(MAX_TIMESTAMPS + 1).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

// =============================================================================
// Blocks & Replicas
// =============================================================================

#[test]
fn test_block_meta_roundtrip() {
    let svc = service();
    let meta = BlockMeta {
        generation: 9,
        number_bytes: 128,
        replication: 2,
        block_pool_id: "BP-1".to_string(),
        ..Default::default()
    };
    svc.put_block_meta(&ctx(), 50, meta).unwrap();

    let block = svc.get_block(&ctx(), 50).unwrap();
    assert_eq!(block.id, 50);
    assert_eq!(block.generation, 9);
    assert!(block.storage.is_empty());

    svc.delete_block_meta(&ctx(), 50).unwrap();
    assert_eq!(svc.get_block(&ctx(), 50).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_block_meta_validation() {
    let svc = service();
    let meta = BlockMeta {
        number_bytes: -5,
        ..Default::default()
    };
    assert_eq!(svc.put_block_meta(&ctx(), 50, meta).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(
        svc.get_block(&ctx(), 0).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

#[test]
fn test_replica_add_is_idempotent_and_remove() {
    let svc = service();
    let dn1 = StorageLocation::new("dn1", "s1");
    let dn2 = StorageLocation::new("dn2", "s1");

    svc.add_block_storage(&ctx(), 50, dn1.clone()).unwrap();
    svc.add_block_storage(&ctx(), 50, dn1.clone()).unwrap();
    svc.add_block_storage(&ctx(), 50, dn2.clone()).unwrap();
    assert_eq!(svc.get_block_storage(&ctx(), 50).unwrap().nodes, vec![dn1.clone(), dn2.clone()]);

    svc.remove_block_storage(&ctx(), 50, dn1).unwrap();
    assert_eq!(svc.get_block_storage(&ctx(), 50).unwrap().nodes, vec![dn2]);

    let err = svc
        .remove_block_storage(&ctx(), 51, StorageLocation::new("dn1", "s1"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = svc
        .add_block_storage(&ctx(), 50, StorageLocation::new("", "s1"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

// =============================================================================
// Files
// =============================================================================

#[test]
fn test_put_file_forces_kind() {
    let svc = service();
    let mut node = named("a.txt", TOP);
    node.kind = INodeKind::Directory;
    svc.put_file(&ctx(), 3, node).unwrap();

    let file = svc.get_file(&ctx(), 3, false).unwrap();
    assert_eq!(file.inode.kind, INodeKind::File);
    assert!(file.blocks.is_empty());
    assert_eq!(svc.get_directory(&ctx(), 3).unwrap_err().kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_file_blocks_through_service() {
    let svc = service();
    svc.put_file(&ctx(), 3, named("a.txt", TOP)).unwrap();

    assert_eq!(svc.put_file_block(&ctx(), 3, 31, 1001).unwrap(), 0);
    let stored = svc.update_file_block(&ctx(), 3, 32, block(0, 64, &["dn1"])).unwrap();
    assert_eq!(stored.id, 32);
    assert_eq!(stored.storage.len(), 1);
    let stored = svc.update_file_block(&ctx(), 3, 32, block(32, 64, &["dn2"])).unwrap();
    assert_eq!(stored.storage.len(), 2);

    let file = svc.get_file(&ctx(), 3, false).unwrap();
    assert_eq!(file.blocks.iter().map(|b| b.id).collect::<Vec<_>>(), vec![31, 32]);
    assert_eq!(file.blocks[0].generation, 1001);
    assert!(svc.get_file(&ctx(), 3, true).unwrap().blocks.is_empty());

    assert_eq!(svc.get_file_block(&ctx(), 3, 32).unwrap().number_bytes, 64);
    svc.delete_file_block(&ctx(), 3, 32).unwrap();
    assert_eq!(svc.get_file_block(&ctx(), 3, 32).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_update_file_rewrites_chain() {
    let svc = service();
    svc.put_file(&ctx(), 3, named("a.txt", TOP)).unwrap();
    svc.put_file_block(&ctx(), 3, 31, 1).unwrap();

    let file = INodeFile {
        inode: INode {
            modification_time: 77,
            ..named("a.txt", TOP)
        },
        blocks: vec![block(41, 10, &["dn1"]), block(42, 10, &["dn2"]), block(43, 3, &[])],
    };
    svc.update_file(&ctx(), 3, file).unwrap();

    let stored = svc.get_file(&ctx(), 3, false).unwrap();
    assert_eq!(stored.inode.modification_time, 77);
    assert_eq!(stored.blocks.iter().map(|b| b.id).collect::<Vec<_>>(), vec![41, 42, 43]);
    assert_eq!(svc.get_block(&ctx(), 31).unwrap_err().kind(), ErrorKind::NotFound);

    let links: Vec<_> = svc
        .chain()
        .entries(&ctx(), 3)
        .unwrap()
        .iter()
        .map(|e| e.entry.next_block_id)
        .collect();
    assert_eq!(links, vec![42, 43, 0]);
}

#[test]
fn test_update_missing_file_is_not_found() {
    let svc = service();
    let file = INodeFile {
        inode: named("a.txt", TOP),
        blocks: vec![],
    };
    assert_eq!(svc.update_file(&ctx(), 3, file).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_truncate_file() {
    let svc = service();
    svc.put_file(&ctx(), 3, named("a.txt", TOP)).unwrap();
    svc.update_file_block(&ctx(), 3, 31, block(31, 10, &[])).unwrap();
    svc.update_file_block(&ctx(), 3, 32, block(32, 10, &[])).unwrap();

    svc.truncate_file(&ctx(), 3, 12).unwrap();
    let sizes: Vec<_> = svc
        .get_file(&ctx(), 3, false)
        .unwrap()
        .blocks
        .iter()
        .map(|b| b.number_bytes)
        .collect();
    assert_eq!(sizes, vec![10, 2]);

    assert_eq!(svc.truncate_file(&ctx(), 3, 13).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(svc.truncate_file(&ctx(), 9, 0).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_delete_file_removes_everything() {
    let svc = service();
    svc.put_directory(&ctx(), 2, named("home", TOP)).unwrap();
    svc.put_file(&ctx(), 3, named("a.txt", 2)).unwrap();
    svc.update_file_block(&ctx(), 3, 31, block(31, 10, &["dn1"])).unwrap();

    svc.delete_file(&ctx(), 3).unwrap();
    assert_eq!(svc.get_file(&ctx(), 3, true).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(svc.get_block(&ctx(), 31).unwrap_err().kind(), ErrorKind::NotFound);
    assert!(svc.list_children(&ctx(), 2, true).unwrap().is_empty());
}

// =============================================================================
// Directories
// =============================================================================

#[test]
fn test_directory_operations() {
    let svc = service();
    svc.put_directory(&ctx(), 2, named("home", TOP)).unwrap();
    svc.put_child(&ctx(), 2, "docs", INode { id: 3, kind: INodeKind::Directory, ..Default::default() })
        .unwrap();
    svc.put_child(&ctx(), 2, "a.txt", INode { id: 4, ..Default::default() }).unwrap();

    let child = svc.get_child(&ctx(), 2, "docs").unwrap();
    assert_eq!(child.id, 3);
    assert_eq!(child.parent_id, 2);

    let names: Vec<_> = svc
        .list_children(&ctx(), 2, false)
        .unwrap()
        .into_iter()
        .map(|c| (c.name, c.kind))
        .collect();
    assert_eq!(
        names,
        vec![("a.txt".to_string(), INodeKind::File), ("docs".to_string(), INodeKind::Directory)]
    );

    svc.update_directory(&ctx(), 2, INode { permission: 0o700, ..named("home", TOP) })
        .unwrap();
    assert_eq!(svc.get_directory(&ctx(), 2).unwrap().permission, 0o700);
    assert_eq!(svc.list_children(&ctx(), 2, true).unwrap().len(), 2);

    svc.reparent(&ctx(), 4, 2, 3).unwrap();
    assert_eq!(svc.get_child(&ctx(), 3, "a.txt").unwrap().id, 4);

    svc.delete_child(&ctx(), 2, "docs").unwrap();
    assert_eq!(svc.get_child(&ctx(), 2, "docs").unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_delete_directory_cascades() {
    let svc = service();
    svc.put_directory(&ctx(), 2, named("home", TOP)).unwrap();
    svc.put_directory(&ctx(), 3, named("docs", 2)).unwrap();
    svc.put_file(&ctx(), 4, named("a.txt", 3)).unwrap();
    svc.update_file_block(&ctx(), 4, 41, block(41, 10, &["dn1"])).unwrap();

    assert_eq!(svc.delete_directory(&ctx(), 2).unwrap(), 3);
    assert_eq!(svc.get_directory(&ctx(), 3).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(svc.get_file(&ctx(), 4, true).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(svc.get_block(&ctx(), 41).unwrap_err().kind(), ErrorKind::NotFound);
    assert!(svc.list_children(&ctx(), TOP, true).unwrap().is_empty());
}

// =============================================================================
// Durability
// =============================================================================

#[test]
fn test_metadata_survives_restart() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 4 })
        .build();

    {
        let svc = MetaService::with_memory_store(MemoryStore::open(&config).unwrap());
        svc.put_directory(&ctx(), 2, named("home", TOP)).unwrap();
        svc.put_file(&ctx(), 3, named("a.txt", 2)).unwrap();
        svc.update_file_block(&ctx(), 3, 31, block(31, 10, &["dn1"])).unwrap();
        svc.update_file_block(&ctx(), 3, 32, block(32, 5, &["dn2"])).unwrap();
        svc.truncate_file(&ctx(), 3, 12).unwrap();
    }

    let svc = MetaService::with_memory_store(MemoryStore::open(&config).unwrap());
    let file = svc.get_file(&ctx(), 3, false).unwrap();
    assert_eq!(file.inode.name, "a.txt");
    assert_eq!(file.blocks.iter().map(|b| b.number_bytes).collect::<Vec<_>>(), vec![10, 2]);
    assert_eq!(svc.get_child(&ctx(), 2, "a.txt").unwrap().id, 3);

    let read_only = MemoryStore::open_read_only(temp.path()).unwrap();
    assert!(read_only.key_count() > 0);
}
