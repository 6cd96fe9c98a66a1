//! In-memory filesystem, used as the root filesystem.
//!
//! Every node lives in a `BTreeMap` keyed by name; there is no backing
//! store, so this is only the fallback root — persistent state goes
//! through [`super::blockfs`] with [`super::journal`] behind it.

use alloc::{collections::BTreeMap, string::String, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use spin::RwLock;

use super::{DirEntry, Filesystem, Metadata, NodeType, Permissions, VfsNode};

static NEXT_INODE: AtomicU64 = AtomicU64::new(1);

fn now() -> u64 {
    crate::arch::x86::timer::ticks()
}

struct RamNode {
    node_type: NodeType,
    data: RwLock<Vec<u8>>,
    children: RwLock<BTreeMap<String, Arc<RamNode>>>,
    metadata: RwLock<Metadata>,
    inode: u64,
}

impl RamNode {
    fn new(node_type: NodeType, inode: u64, permissions: Permissions) -> Self {
        let t = now();
        Self {
            node_type,
            data: RwLock::new(Vec::new()),
            children: RwLock::new(BTreeMap::new()),
            metadata: RwLock::new(Metadata {
                node_type,
                size: 0,
                permissions,
                uid: 0,
                gid: 0,
                created: t,
                modified: t,
                accessed: t,
            }),
            inode,
        }
    }
}

impl VfsNode for RamNode {
    fn node_type(&self) -> NodeType {
        self.node_type
    }

    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<usize, &'static str> {
        if self.node_type != NodeType::File {
            return Err("not a file");
        }
        let data = self.data.read();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = core::cmp::min(buffer.len(), data.len() - offset);
        buffer[..n].copy_from_slice(&data[offset..offset + n]);
        self.metadata.write().accessed = now();
        Ok(n)
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<usize, &'static str> {
        if self.node_type != NodeType::File {
            return Err("not a file");
        }
        let mut file_data = self.data.write();
        if offset + data.len() > file_data.len() {
            file_data.resize(offset + data.len(), 0);
        }
        file_data[offset..offset + data.len()].copy_from_slice(data);
        let mut meta = self.metadata.write();
        meta.size = file_data.len();
        meta.modified = now();
        Ok(data.len())
    }

    fn metadata(&self) -> Result<Metadata, &'static str> {
        Ok(self.metadata.read().clone())
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, &'static str> {
        if self.node_type != NodeType::Directory {
            return Err("not a directory");
        }
        let children = self.children.read();
        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push(DirEntry {
            name: String::from("."),
            node_type: NodeType::Directory,
            inode: self.inode,
        });
        entries.push(DirEntry {
            name: String::from(".."),
            node_type: NodeType::Directory,
            inode: self.inode,
        });
        for (name, child) in children.iter() {
            entries.push(DirEntry {
                name: name.clone(),
                node_type: child.node_type,
                inode: child.inode,
            });
        }
        Ok(entries)
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn VfsNode>, &'static str> {
        if self.node_type != NodeType::Directory {
            return Err("not a directory");
        }
        self.children
            .read()
            .get(name)
            .map(|n| n.clone() as Arc<dyn VfsNode>)
            .ok_or("not found")
    }

    fn create(
        &self,
        name: &str,
        permissions: Permissions,
    ) -> Result<Arc<dyn VfsNode>, &'static str> {
        if self.node_type != NodeType::Directory {
            return Err("not a directory");
        }
        let mut children = self.children.write();
        if children.contains_key(name) {
            return Err("already exists");
        }
        let inode = NEXT_INODE.fetch_add(1, Ordering::Relaxed);
        let node = Arc::new(RamNode::new(NodeType::File, inode, permissions));
        children.insert(String::from(name), node.clone());
        Ok(node as Arc<dyn VfsNode>)
    }

    fn mkdir(
        &self,
        name: &str,
        permissions: Permissions,
    ) -> Result<Arc<dyn VfsNode>, &'static str> {
        if self.node_type != NodeType::Directory {
            return Err("not a directory");
        }
        let mut children = self.children.write();
        if children.contains_key(name) {
            return Err("already exists");
        }
        let inode = NEXT_INODE.fetch_add(1, Ordering::Relaxed);
        let node = Arc::new(RamNode::new(NodeType::Directory, inode, permissions));
        children.insert(String::from(name), node.clone());
        Ok(node as Arc<dyn VfsNode>)
    }

    fn unlink(&self, name: &str) -> Result<(), &'static str> {
        if self.node_type != NodeType::Directory {
            return Err("not a directory");
        }
        let mut children = self.children.write();
        let child = children.get(name).ok_or("not found")?;
        if child.node_type == NodeType::Directory && !child.children.read().is_empty() {
            return Err("directory not empty");
        }
        children.remove(name);
        Ok(())
    }

    fn truncate(&self, size: usize) -> Result<(), &'static str> {
        if self.node_type != NodeType::File {
            return Err("not a file");
        }
        let mut data = self.data.write();
        data.resize(size, 0);
        self.metadata.write().size = size;
        Ok(())
    }
}

/// Root filesystem backing: an in-memory tree with no persistence.
pub struct RamFs {
    root: Arc<RamNode>,
}

impl RamFs {
    pub fn new() -> Self {
        let inode = NEXT_INODE.fetch_add(1, Ordering::Relaxed);
        Self {
            root: Arc::new(RamNode::new(NodeType::Directory, inode, Permissions::default())),
        }
    }
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Filesystem for RamFs {
    fn root(&self) -> Arc<dyn VfsNode> {
        self.root.clone()
    }

    fn name(&self) -> &str {
        "ramfs"
    }

    fn is_readonly(&self) -> bool {
        false
    }

    fn sync(&self) -> Result<(), &'static str> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_read_write_roundtrip() {
        let fs = RamFs::new();
        let root = fs.root();
        let file = root.create("a.txt", Permissions::default()).unwrap();
        assert_eq!(file.write(0, b"hello").unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(file.read(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn mkdir_then_lookup() {
        let fs = RamFs::new();
        let root = fs.root();
        root.mkdir("etc", Permissions::default()).unwrap();
        let etc = root.lookup("etc").unwrap();
        assert_eq!(etc.node_type(), NodeType::Directory);
    }

    #[test]
    fn unlink_nonempty_dir_fails() {
        let fs = RamFs::new();
        let root = fs.root();
        let dir = root.mkdir("d", Permissions::default()).unwrap();
        dir.create("f", Permissions::default()).unwrap();
        assert!(root.unlink("d").is_err());
    }
}
