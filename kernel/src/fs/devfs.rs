//! Device filesystem: a flat directory of character devices mounted at
//! `/dev`. Only `console`, backed by the serial port, exists today.

use alloc::{string::String, sync::Arc, vec::Vec};

use super::{DirEntry, Filesystem, Metadata, NodeType, Permissions, VfsNode};

struct ConsoleNode;

impl VfsNode for ConsoleNode {
    fn node_type(&self) -> NodeType {
        NodeType::CharDevice
    }

    fn read(&self, _offset: usize, _buffer: &mut [u8]) -> Result<usize, &'static str> {
        // No input device wired up yet; reads see EOF rather than blocking
        // forever.
        Ok(0)
    }

    fn write(&self, _offset: usize, data: &[u8]) -> Result<usize, &'static str> {
        for &b in data {
            crate::serial::_serial_print(format_args!("{}", b as char));
        }
        Ok(data.len())
    }

    fn metadata(&self) -> Result<Metadata, &'static str> {
        Ok(Metadata {
            node_type: NodeType::CharDevice,
            size: 0,
            permissions: Permissions::default(),
            uid: 0,
            gid: 0,
            created: 0,
            modified: 0,
            accessed: 0,
        })
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, &'static str> {
        Err("not a directory")
    }

    fn lookup(&self, _name: &str) -> Result<Arc<dyn VfsNode>, &'static str> {
        Err("not a directory")
    }

    fn create(&self, _name: &str, _permissions: Permissions) -> Result<Arc<dyn VfsNode>, &'static str> {
        Err("not a directory")
    }

    fn mkdir(&self, _name: &str, _permissions: Permissions) -> Result<Arc<dyn VfsNode>, &'static str> {
        Err("not a directory")
    }

    fn unlink(&self, _name: &str) -> Result<(), &'static str> {
        Err("not a directory")
    }

    fn truncate(&self, _size: usize) -> Result<(), &'static str> {
        Err("not a file")
    }
}

struct DevRoot;

impl VfsNode for DevRoot {
    fn node_type(&self) -> NodeType {
        NodeType::Directory
    }

    fn read(&self, _offset: usize, _buffer: &mut [u8]) -> Result<usize, &'static str> {
        Err("not a file")
    }

    fn write(&self, _offset: usize, _data: &[u8]) -> Result<usize, &'static str> {
        Err("not a file")
    }

    fn metadata(&self) -> Result<Metadata, &'static str> {
        Ok(Metadata {
            node_type: NodeType::Directory,
            size: 0,
            permissions: Permissions::default(),
            uid: 0,
            gid: 0,
            created: 0,
            modified: 0,
            accessed: 0,
        })
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, &'static str> {
        Ok(alloc::vec![DirEntry {
            name: String::from("console"),
            node_type: NodeType::CharDevice,
            inode: 1,
        }])
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn VfsNode>, &'static str> {
        if name == "console" {
            Ok(Arc::new(ConsoleNode))
        } else {
            Err("not found")
        }
    }

    fn create(&self, _name: &str, _permissions: Permissions) -> Result<Arc<dyn VfsNode>, &'static str> {
        Err("read-only filesystem")
    }

    fn mkdir(&self, _name: &str, _permissions: Permissions) -> Result<Arc<dyn VfsNode>, &'static str> {
        Err("read-only filesystem")
    }

    fn unlink(&self, _name: &str) -> Result<(), &'static str> {
        Err("read-only filesystem")
    }

    fn truncate(&self, _size: usize) -> Result<(), &'static str> {
        Err("not a file")
    }
}

pub struct DevFs;

impl DevFs {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DevFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Filesystem for DevFs {
    fn root(&self) -> Arc<dyn VfsNode> {
        Arc::new(DevRoot)
    }

    fn name(&self) -> &str {
        "devfs"
    }

    fn is_readonly(&self) -> bool {
        true
    }

    fn sync(&self) -> Result<(), &'static str> {
        Ok(())
    }
}
