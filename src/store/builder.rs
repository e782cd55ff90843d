use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{GroveError, Result};
use crate::hash::Hash;
use crate::path::{join_components, split_relative};
use crate::store::{Blob, EntryKind, MemoryBackingStore, Tree, TreeEntry};

#[derive(Debug, Clone)]
enum Node {
    Dir(BTreeMap<String, Node>),
    File { contents: Vec<u8>, executable: bool },
    Symlink(String),
}

#[derive(Debug, Clone, Copy)]
enum ObjectId {
    Tree(Hash),
    Blob(Hash),
}

struct Finalized {
    store: Arc<MemoryBackingStore>,
    root: Hash,
    objects: HashMap<String, ObjectId>,
}

/// Builds a commit tree from path/contents pairs and loads it into a
/// [`MemoryBackingStore`].
///
/// Objects can be inserted not-ready and released one path at a time with
/// [`TreeBuilder::set_ready`].
#[derive(Default)]
pub struct TreeBuilder {
    root: BTreeMap<String, Node>,
    finalized: Option<Finalized>,
}

impl Clone for TreeBuilder {
    /// The clone starts unfinalized so it can be modified and finalized into
    /// a new commit.
    fn clone(&self) -> Self {
        TreeBuilder {
            root: self.root.clone(),
            finalized: None,
        }
    }
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_file(&mut self, path: &str, contents: impl Into<Vec<u8>>) -> Result<&mut Self> {
        self.insert(
            path,
            Node::File {
                contents: contents.into(),
                executable: false,
            },
            false,
        )?;
        Ok(self)
    }

    pub fn set_executable(&mut self, path: &str, contents: impl Into<Vec<u8>>) -> Result<&mut Self> {
        self.insert(
            path,
            Node::File {
                contents: contents.into(),
                executable: true,
            },
            false,
        )?;
        Ok(self)
    }

    pub fn set_symlink(&mut self, path: &str, target: &str) -> Result<&mut Self> {
        self.insert(path, Node::Symlink(target.to_string()), false)?;
        Ok(self)
    }

    /// Overwrite the contents of an existing regular file.
    pub fn replace_file(&mut self, path: &str, contents: impl Into<Vec<u8>>) -> Result<&mut Self> {
        self.insert(
            path,
            Node::File {
                contents: contents.into(),
                executable: false,
            },
            true,
        )?;
        Ok(self)
    }

    /// Create `path` and any missing parents as (possibly empty) directories.
    pub fn mkdir(&mut self, path: &str) -> Result<&mut Self> {
        self.ensure_not_finalized()?;
        let components = split_relative(path)?;
        let mut dir = &mut self.root;
        for (i, name) in components.iter().enumerate() {
            let node = dir
                .entry(name.clone())
                .or_insert_with(|| Node::Dir(BTreeMap::new()));
            dir = match node {
                Node::Dir(children) => children,
                _ => {
                    return Err(GroveError::NotADirectory(join_components(
                        &components[..=i],
                    )))
                }
            };
        }
        Ok(self)
    }

    fn insert(&mut self, path: &str, node: Node, replace: bool) -> Result<()> {
        self.ensure_not_finalized()?;
        let mut components = split_relative(path)?;
        let name = components
            .pop()
            .ok_or_else(|| GroveError::InvalidArgument("cannot replace the root".to_string()))?;

        let mut dir = &mut self.root;
        for (i, component) in components.iter().enumerate() {
            let child = dir
                .entry(component.clone())
                .or_insert_with(|| Node::Dir(BTreeMap::new()));
            dir = match child {
                Node::Dir(children) => children,
                _ => {
                    return Err(GroveError::NotADirectory(join_components(
                        &components[..=i],
                    )))
                }
            };
        }

        let existing_file = matches!(dir.get(&name), Some(Node::File { .. }));
        let existing_dir = matches!(dir.get(&name), Some(Node::Dir(_)));
        let exists = dir.contains_key(&name);
        match (replace, exists) {
            (true, _) if existing_dir => Err(GroveError::IsADirectory(path.to_string())),
            (true, _) if !existing_file => Err(GroveError::NotFound(path.to_string())),
            (false, true) => Err(GroveError::AlreadyExists(path.to_string())),
            _ => {
                dir.insert(name, node);
                Ok(())
            }
        }
    }

    fn ensure_not_finalized(&self) -> Result<()> {
        if self.finalized.is_some() {
            return Err(GroveError::InvalidState(
                "tree builder has already been finalized".to_string(),
            ));
        }
        Ok(())
    }

    /// Store every tree and blob, each initially `ready` or not. Returns the
    /// root tree id.
    pub fn finalize(&mut self, store: Arc<MemoryBackingStore>, ready: bool) -> Result<Hash> {
        self.ensure_not_finalized()?;
        let mut objects = HashMap::new();
        let mut prefix = Vec::new();
        let root = store_dir(&store, &self.root, ready, &mut prefix, &mut objects);
        objects.insert(String::new(), ObjectId::Tree(root));
        tracing::debug!("finalized tree {} ({} objects)", root, objects.len());
        self.finalized = Some(Finalized {
            store,
            root,
            objects,
        });
        Ok(root)
    }

    pub fn root_tree_id(&self) -> Option<Hash> {
        self.finalized.as_ref().map(|f| f.root)
    }

    /// Register `commit` as pointing at the finalized root tree.
    pub fn commit(&self, commit: Hash, ready: bool) -> Result<()> {
        let finalized = self.finalized()?;
        finalized.store.put_commit(commit, finalized.root, ready);
        Ok(())
    }

    /// Mark the object at `path` ready. The empty path names the root tree.
    pub fn set_ready(&self, path: &str) -> Result<()> {
        let finalized = self.finalized()?;
        let key = join_components(&split_relative(path)?);
        match finalized.objects.get(&key) {
            Some(ObjectId::Tree(id)) => {
                finalized.store.set_tree_ready(id);
            }
            Some(ObjectId::Blob(id)) => {
                finalized.store.set_blob_ready(id);
            }
            None => return Err(GroveError::NotFound(path.to_string())),
        }
        Ok(())
    }

    pub fn set_all_ready(&self) -> Result<()> {
        let finalized = self.finalized()?;
        for object in finalized.objects.values() {
            match object {
                ObjectId::Tree(id) => finalized.store.set_tree_ready(id),
                ObjectId::Blob(id) => finalized.store.set_blob_ready(id),
            };
        }
        Ok(())
    }

    fn finalized(&self) -> Result<&Finalized> {
        self.finalized.as_ref().ok_or_else(|| {
            GroveError::InvalidState("tree builder has not been finalized".to_string())
        })
    }
}

fn store_dir(
    store: &MemoryBackingStore,
    dir: &BTreeMap<String, Node>,
    ready: bool,
    prefix: &mut Vec<String>,
    objects: &mut HashMap<String, ObjectId>,
) -> Hash {
    let mut entries = Vec::with_capacity(dir.len());
    for (name, node) in dir {
        prefix.push(name.clone());
        let (kind, object) = match node {
            Node::Dir(children) => {
                let id = store_dir(store, children, ready, prefix, objects);
                (EntryKind::Tree, ObjectId::Tree(id))
            }
            Node::File {
                contents,
                executable,
            } => {
                let id = store.put_blob(Blob::new(contents.clone()), ready);
                let kind = if *executable {
                    EntryKind::Executable
                } else {
                    EntryKind::Regular
                };
                (kind, ObjectId::Blob(id))
            }
            Node::Symlink(target) => {
                let id = store.put_blob(Blob::new(target.as_bytes()), ready);
                (EntryKind::Symlink, ObjectId::Blob(id))
            }
        };
        let id = match object {
            ObjectId::Tree(id) | ObjectId::Blob(id) => id,
        };
        objects.insert(join_components(prefix), object);
        prefix.pop();
        entries.push(TreeEntry {
            name: name.clone(),
            kind,
            id,
        });
    }
    store.put_tree(Tree::new(entries), ready)
}
