//! Record serialization
//!
//! Stored values are bincode-encoded domain records.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{MetaError, Result};

/// A value that can be stored in the key space
pub trait Record: Sized {
    fn encode(&self) -> Result<Vec<u8>>;
    fn decode(bytes: &[u8]) -> Result<Self>;
}

impl<T> Record for T
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| MetaError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| MetaError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileBlock, INode, INodeKind};

    #[test]
    fn test_inode_record() {
        let node = INode {
            id: 42,
            name: "dir".into(),
            kind: INodeKind::Directory,
            parent_id: 1,
            ..Default::default()
        };
        let decoded = INode::decode(&node.encode().unwrap()).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        let err = FileBlock::decode(&[1, 2]).unwrap_err();
        assert!(matches!(err, MetaError::Serialization(_)));
    }
}
