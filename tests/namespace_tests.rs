//! Tests for the namespace tree manager
//!
//! These tests verify:
//! - Inode records and parent links are written and removed together
//! - Children listing order and detail levels
//! - Recursive directory deletion, including cyclic links
//! - Reparenting preconditions

use std::sync::Arc;

use nsmeta::chain::BlockChain;
use nsmeta::kv::MemoryStore;
use nsmeta::model::{BlockMeta, BlockStorage, ChildLink, INode, INodeKind};
use nsmeta::namespace::Namespace;
use nsmeta::txn::Executor;
use nsmeta::{keys, Context, ErrorKind};

/// Parent of the test tree's top directory; never stored itself
const TOP: i64 = 1;

// =============================================================================
// Helpers
// =============================================================================

struct Fixture {
    executor: Executor,
    ns: Namespace,
    chain: BlockChain,
    ctx: Context,
}

fn setup() -> Fixture {
    let executor = Executor::new(Arc::new(MemoryStore::new()));
    Fixture {
        ns: Namespace::new(executor.clone()),
        chain: BlockChain::new(executor.clone()),
        executor,
        ctx: Context::background(),
    }
}

fn node(id: i64, parent_id: i64, name: &str, kind: INodeKind) -> INode {
    INode {
        id,
        parent_id,
        name: name.to_string(),
        kind,
        permission: 0o755,
        modification_time: 1_000,
        client_name: "client".to_string(),
        ..Default::default()
    }
}

impl Fixture {
    fn dir(&self, id: i64, parent_id: i64, name: &str) {
        self.ns
            .create_or_replace(&self.ctx, &node(id, parent_id, name, INodeKind::Directory))
            .unwrap();
    }

    fn file(&self, id: i64, parent_id: i64, name: &str) {
        self.ns
            .create_or_replace(&self.ctx, &node(id, parent_id, name, INodeKind::File))
            .unwrap();
    }

    fn add_block(&self, file_id: i64, block_id: i64) {
        let meta = BlockMeta {
            id: block_id,
            number_bytes: 8,
            ..Default::default()
        };
        self.chain
            .upsert_block(&self.ctx, file_id, block_id, meta, BlockStorage::new(block_id))
            .unwrap();
    }

    fn exists(&self, key: Vec<u8>) -> bool {
        self.executor.with_tx(&self.ctx, |tx| tx.exists(&key)).unwrap()
    }

    fn link(&self, parent_id: i64, name: &str, id: i64) {
        self.executor
            .with_tx(&self.ctx, |tx| tx.set(keys::directory_child(parent_id, name), &ChildLink { id }))
            .unwrap();
    }

    fn names(&self, parent_id: i64) -> Vec<String> {
        self.ns
            .list_children(&self.ctx, parent_id, true)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect()
    }
}

// =============================================================================
// Create / Get Tests
// =============================================================================

#[test]
fn test_create_writes_record_and_link() {
    let f = setup();
    f.dir(2, TOP, "home");

    assert!(f.exists(keys::inode(2)));
    assert!(f.exists(keys::directory_child(TOP, "home")));

    let simple = f.ns.get_child(&f.ctx, TOP, "home", false).unwrap();
    assert_eq!(simple.id, 2);
    assert_eq!(simple.name, "home");
    assert_eq!(simple.permission, 0);

    let detailed = f.ns.get_child(&f.ctx, TOP, "home", true).unwrap();
    assert_eq!(detailed.permission, 0o755);
    assert!(detailed.is_directory());
    assert!(detailed.client_name.is_empty());
}

#[test]
fn test_create_validates_input() {
    let f = setup();
    for bad in [
        node(0, TOP, "x", INodeKind::File),
        node(2, 0, "x", INodeKind::File),
        node(2, TOP, "", INodeKind::File),
        node(2, 2, "x", INodeKind::Directory),
    ] {
        let err = f.ns.create_or_replace(&f.ctx, &bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
    assert!(!f.exists(keys::inode(2)));
}

#[test]
fn test_replace_under_new_name_moves_link() {
    let f = setup();
    f.dir(2, TOP, "home");
    f.file(3, 2, "draft.txt");
    f.file(3, 2, "final.txt");

    assert!(!f.exists(keys::directory_child(2, "draft.txt")));
    assert_eq!(f.names(2), vec!["final.txt"]);
    assert_eq!(f.ns.get_inode(&f.ctx, 3).unwrap().name, "final.txt");
}

#[test]
fn test_create_rejects_taken_name() {
    let f = setup();
    f.dir(2, TOP, "home");
    f.file(3, 2, "a");

    let err = f
        .ns
        .create_or_replace(&f.ctx, &node(4, 2, "a", INodeKind::File))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(f.ns.get_child(&f.ctx, 2, "a", false).unwrap().id, 3);
}

#[test]
fn test_create_rejects_kind_change() {
    let f = setup();
    f.dir(2, TOP, "home");
    let err = f
        .ns
        .create_or_replace(&f.ctx, &node(2, TOP, "home", INodeKind::File))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_missing_child_and_dangling_link() {
    let f = setup();
    f.dir(2, TOP, "home");

    let err = f.ns.get_child(&f.ctx, 2, "nope", true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    f.link(2, "ghost", 99);
    let simple = f.ns.get_child(&f.ctx, 2, "ghost", false).unwrap();
    assert_eq!(simple.id, 99);

    let err = f.ns.get_child(&f.ctx, 2, "ghost", true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("99"));

    let err = f.ns.list_children(&f.ctx, 2, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// =============================================================================
// Listing Tests
// =============================================================================

#[test]
fn test_list_children_in_name_order() {
    let f = setup();
    f.dir(2, TOP, "home");
    f.dir(20, 3, "unrelated");
    f.file(5, 2, "zeta");
    f.file(4, 2, "alpha");
    f.dir(6, 2, "mid");

    assert_eq!(f.names(2), vec!["alpha", "mid", "zeta"]);

    let detailed = f.ns.list_children(&f.ctx, 2, false).unwrap();
    assert_eq!(detailed.iter().map(|c| c.id).collect::<Vec<_>>(), vec![4, 6, 5]);
    assert!(detailed.iter().all(|c| c.parent_id == 2 && c.permission == 0o755));
    assert_eq!(detailed[1].kind, INodeKind::Directory);
}

#[test]
fn test_list_empty_directory() {
    let f = setup();
    f.dir(2, TOP, "home");
    assert!(f.names(2).is_empty());
    assert!(f.names(42).is_empty());
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_child_only_unlinks() {
    let f = setup();
    f.dir(2, TOP, "home");
    f.file(3, 2, "a");

    f.ns.delete_child(&f.ctx, 2, "a").unwrap();
    f.ns.delete_child(&f.ctx, 2, "a").unwrap();

    assert!(f.names(2).is_empty());
    assert!(f.exists(keys::inode(3)));
}

#[test]
fn test_delete_file_removes_chain_and_link() {
    let f = setup();
    f.dir(2, TOP, "home");
    f.file(3, 2, "a");
    f.add_block(3, 31);
    f.add_block(3, 32);

    f.ns.delete_file(&f.ctx, 3).unwrap();

    assert!(!f.exists(keys::inode(3)));
    assert!(!f.exists(keys::directory_child(2, "a")));
    assert!(!f.exists(keys::block_meta(31)));
    assert!(!f.exists(keys::block_storage(32)));
    assert!(!f.exists(keys::file_block(3, 1)));

    assert_eq!(f.ns.delete_file(&f.ctx, 3).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(f.ns.delete_file(&f.ctx, 2).unwrap_err().kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_delete_directory_recursive() {
    let f = setup();
    f.dir(2, TOP, "home");
    f.file(3, 2, "a.txt");
    f.add_block(3, 31);
    f.dir(4, 2, "sub");
    f.file(5, 4, "b.txt");
    f.add_block(5, 51);
    f.dir(6, 4, "deeper");
    f.file(7, 6, "c.txt");
    f.dir(8, TOP, "sibling");

    let removed = f.ns.delete_directory(&f.ctx, 2).unwrap();
    assert_eq!(removed, 6);

    for id in 2..=7 {
        assert!(!f.exists(keys::inode(id)), "inode {} survived", id);
    }
    for (parent, name) in [(TOP, "home"), (2, "a.txt"), (2, "sub"), (4, "b.txt"), (4, "deeper"), (6, "c.txt")] {
        assert!(!f.exists(keys::directory_child(parent, name)), "{}/{} survived", parent, name);
    }
    assert!(!f.exists(keys::block_meta(31)));
    assert!(!f.exists(keys::block_meta(51)));
    assert!(!f.exists(keys::file_block(5, 0)));

    assert!(f.exists(keys::inode(8)));
    assert_eq!(f.names(TOP), vec!["sibling"]);
}

#[test]
fn test_delete_directory_terminates_on_cycle() {
    let f = setup();
    f.dir(2, TOP, "home");
    f.dir(3, 2, "sub");
    f.link(3, "back", 2);

    f.ns.delete_directory(&f.ctx, 2).unwrap();
    assert!(!f.exists(keys::inode(2)));
    assert!(!f.exists(keys::inode(3)));
    assert!(!f.exists(keys::directory_child(3, "back")));
}

#[test]
fn test_delete_directory_preconditions() {
    let f = setup();
    f.dir(2, TOP, "home");
    f.file(3, 2, "a");

    assert_eq!(f.ns.delete_directory(&f.ctx, 99).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(f.ns.delete_directory(&f.ctx, 3).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert!(f.exists(keys::inode(3)));
}

// =============================================================================
// Reparent Tests
// =============================================================================

#[test]
fn test_reparent_moves_link_and_record() {
    let f = setup();
    f.dir(2, TOP, "src");
    f.dir(3, TOP, "dst");
    f.file(4, 2, "a");

    f.ns.reparent(&f.ctx, 4, 2, 3).unwrap();

    assert!(f.names(2).is_empty());
    assert_eq!(f.names(3), vec!["a"]);
    assert_eq!(f.ns.get_inode(&f.ctx, 4).unwrap().parent_id, 3);
}

#[test]
fn test_reparent_missing_records() {
    let f = setup();
    f.dir(2, TOP, "src");
    f.dir(3, TOP, "dst");
    f.file(4, 2, "a");

    assert_eq!(f.ns.reparent(&f.ctx, 99, 2, 3).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(f.ns.reparent(&f.ctx, 4, 3, 2).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(f.ns.reparent(&f.ctx, 4, 2, 99).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(f.names(2), vec!["a"]);
}

#[test]
fn test_reparent_invalid_targets() {
    let f = setup();
    f.dir(2, TOP, "src");
    f.dir(3, TOP, "dst");
    f.file(4, 2, "a");
    f.file(5, 3, "a");
    f.file(6, 2, "plain");
    f.dir(7, 2, "inner");

    // destination name taken by another inode
    assert_eq!(f.ns.reparent(&f.ctx, 4, 2, 3).unwrap_err().kind(), ErrorKind::InvalidArgument);
    // new parent is a file
    assert_eq!(f.ns.reparent(&f.ctx, 4, 2, 6).unwrap_err().kind(), ErrorKind::InvalidArgument);
    // directory into its own subtree
    assert_eq!(f.ns.reparent(&f.ctx, 2, TOP, 7).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(f.ns.reparent(&f.ctx, 2, TOP, 2).unwrap_err().kind(), ErrorKind::InvalidArgument);

    assert_eq!(f.ns.get_inode(&f.ctx, 4).unwrap().parent_id, 2);
}

#[test]
fn test_reparent_directory_below_itself_rejected() {
    let f = setup();
    f.dir(2, TOP, "top");
    f.dir(3, 2, "a");
    f.dir(4, 3, "b");
    f.dir(5, 2, "c");

    let err = f.ns.reparent(&f.ctx, 3, 2, 4).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    f.ns.reparent(&f.ctx, 3, 2, 5).unwrap();
    assert_eq!(f.names(5), vec!["a"]);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_creates_of_same_name_conflict() {
    let f = setup();
    f.dir(2, TOP, "home");

    let mut first = f.executor.begin(&f.ctx).unwrap();
    let mut second = f.executor.begin(&f.ctx).unwrap();
    Namespace::create_or_replace_in(&mut first, &node(3, 2, "a", INodeKind::File)).unwrap();
    Namespace::create_or_replace_in(&mut second, &node(4, 2, "a", INodeKind::File)).unwrap();

    first.commit().unwrap();
    assert_eq!(second.commit().unwrap_err().kind(), ErrorKind::Conflict);

    assert_eq!(f.ns.get_child(&f.ctx, 2, "a", false).unwrap().id, 3);
    assert!(!f.exists(keys::inode(4)));
}

#[test]
fn test_reparent_conflicts_with_delete_of_new_parent() {
    let f = setup();
    f.dir(2, TOP, "src");
    f.dir(3, TOP, "dst");
    f.file(4, 2, "a");

    let mut mover = f.executor.begin(&f.ctx).unwrap();
    let mut deleter = f.executor.begin(&f.ctx).unwrap();
    Namespace::reparent_in(&mut mover, 4, 2, 3).unwrap();
    assert_eq!(Namespace::delete_directory_in(&mut deleter, 3).unwrap(), 1);

    mover.commit().unwrap();
    assert_eq!(deleter.commit().unwrap_err().kind(), ErrorKind::Conflict);

    assert!(f.exists(keys::inode(3)));
    assert_eq!(f.ns.get_child(&f.ctx, 3, "a", false).unwrap().id, 4);
}

#[test]
fn test_delete_directory_conflicts_with_create_inside() {
    let f = setup();
    f.dir(2, TOP, "home");

    let mut deleter = f.executor.begin(&f.ctx).unwrap();
    let mut creator = f.executor.begin(&f.ctx).unwrap();
    Namespace::delete_directory_in(&mut deleter, 2).unwrap();
    Namespace::create_or_replace_in(&mut creator, &node(3, 2, "a", INodeKind::File)).unwrap();

    deleter.commit().unwrap();
    assert_eq!(creator.commit().unwrap_err().kind(), ErrorKind::Conflict);

    assert!(!f.exists(keys::inode(3)));
    assert!(!f.exists(keys::directory_child(2, "a")));
}
