use git2::{ObjectType, Oid, Repository};

use crate::error::{Result, StageError};

/// Writes blobs into the repository's object store.
///
/// Writing the same content twice yields the same id and leaves the store
/// unchanged. Blobs written by an operation that later fails stay behind as
/// unreferenced objects for `git gc` to collect.
pub struct ObjectWriter<'repo> {
    repo: &'repo Repository,
}

impl<'repo> ObjectWriter<'repo> {
    pub fn new(repo: &'repo Repository) -> Self {
        Self { repo }
    }

    /// Store `content` as a blob and return its id.
    pub fn insert_blob(&self, content: &[u8]) -> Result<Oid> {
        let oid = self.repo.blob(content).map_err(StageError::ObjectWrite)?;
        tracing::trace!("wrote blob {} ({} bytes)", oid, content.len());
        Ok(oid)
    }
}

/// The id `content` would get as a blob, without writing it.
pub fn hash_blob(content: &[u8]) -> Result<Oid> {
    Ok(Oid::hash_object(ObjectType::Blob, content)?)
}
