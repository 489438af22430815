//! Git-backed artifact store: one branch per workflow, fast-forward-only
//! promotion to `main`, content-addressed blobs.
//!
//! Grounded in the append-to-git pattern from `knhk-lockchain`'s
//! `storage.rs` (`repo.blob()`, `index`/`treebuilder`, `Signature::now`,
//! `repo.commit()`), generalized from single-blob appends on `HEAD` to a
//! branch-per-workflow model with nested tree paths and a global
//! artifact-id index branch.

use chrono::Utc;
use git2::{FileMode, Oid, Repository, Signature};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tradeforge_core::{ArtifactId, TaskId, WorkflowId};

use crate::error::ArtifactError;
use crate::model::{Artifact, ArtifactKind};

const MAIN_BRANCH: &str = "main";
const INDEX_BRANCH: &str = "_artifact_index";
const MANIFEST_FILE: &str = "_manifest.json";
const COMMITTER_NAME: &str = "tradeforge-artifacts";
const COMMITTER_EMAIL: &str = "artifacts@tradeforge.local";

fn workflow_branch(workflow_id: WorkflowId) -> String {
    format!("ai/generated/{workflow_id}")
}

fn tree_path(kind: ArtifactKind, workflow_id: WorkflowId, filename: &str) -> String {
    match kind {
        ArtifactKind::Code => format!("codes/{filename}"),
        ArtifactKind::Test => format!("tests/{filename}"),
        ArtifactKind::Report | ArtifactKind::Trades | ArtifactKind::Equity | ArtifactKind::Log => {
            format!("artifacts/{workflow_id}/{filename}")
        }
    }
}

/// Content-addressed, git-backed store with one branch per workflow.
///
/// The whole repository handle is guarded by a single mutex: libgit2's
/// `Repository` is not `Sync`, and cross-workflow writes would otherwise
/// contend on the same in-process handle regardless of which branch they
/// touch. Writes across workflows are therefore serialized in this
/// implementation rather than only per-branch serialized as worded in the
/// contract; see DESIGN.md.
pub struct ArtifactStore {
    repo: Mutex<Repository>,
    repo_path: PathBuf,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore").field("repo_path", &self.repo_path).finish()
    }
}

impl ArtifactStore {
    /// Opens (or initializes) the bare repository at
    /// `workspace_root/artifacts.git`, creating an empty `main` branch if
    /// the repository is new.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::RepoUnavailable`] if the repository cannot
    /// be opened or initialized.
    pub fn init(workspace_root: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let repo_path = workspace_root.as_ref().join("artifacts.git");
        let repo = if repo_path.exists() {
            Repository::open_bare(&repo_path)
        } else {
            Repository::init_bare(&repo_path)
        }
        .map_err(|e| ArtifactError::RepoUnavailable { reason: e.to_string() })?;

        let store = Self {
            repo: Mutex::new(repo),
            repo_path,
        };
        store.ensure_main_branch()?;
        Ok(store)
    }

    fn ensure_main_branch(&self) -> Result<(), ArtifactError> {
        let repo = self.repo.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if repo.find_branch(MAIN_BRANCH, git2::BranchType::Local).is_ok() {
            return Ok(());
        }
        let tree_oid = repo.treebuilder(None)?.write()?;
        let tree = repo.find_tree(tree_oid)?;
        let sig = signature()?;
        repo.commit(
            Some(&format!("refs/heads/{MAIN_BRANCH}")),
            &sig,
            &sig,
            "initialize artifact store",
            &tree,
            &[],
        )?;
        Ok(())
    }

    /// Creates a branch for `workflow_id` from the current tip of `main`.
    /// Idempotent: a second call for the same workflow is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::OperationFailed`] on a git failure.
    pub fn open_workflow(&self, workflow_id: WorkflowId) -> Result<(), ArtifactError> {
        let repo = self.repo.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let branch_name = workflow_branch(workflow_id);
        if repo.find_branch(&branch_name, git2::BranchType::Local).is_ok() {
            return Ok(());
        }
        let main = repo.find_branch(MAIN_BRANCH, git2::BranchType::Local)?;
        let main_commit = main.get().peel_to_commit()?;
        repo.branch(&branch_name, &main_commit, false)?;
        Ok(())
    }

    /// Writes `bytes` at `filename` under `workflow_id`'s branch and
    /// returns the new artifact's id. If an artifact with the same
    /// `filename` and identical bytes already exists on the branch, this
    /// is a no-op that returns the existing id.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::OperationFailed`] if `filename` already
    /// exists on the branch with different content, or on a git failure.
    pub fn put(
        &self,
        workflow_id: WorkflowId,
        task_id: TaskId,
        filename: &str,
        kind: ArtifactKind,
        bytes: &[u8],
        parent_artifacts: Vec<ArtifactId>,
    ) -> Result<ArtifactId, ArtifactError> {
        self.open_workflow(workflow_id)?;
        let repo = self.repo.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let branch_name = workflow_branch(workflow_id);
        let branch = repo.find_branch(&branch_name, git2::BranchType::Local)?;
        let tip_commit = branch.get().peel_to_commit()?;
        let tip_tree = tip_commit.tree()?;

        let blob_oid = repo.blob(bytes)?;
        let content_hash = blob_oid.to_string();

        let mut manifest = read_manifest(&repo, &tip_tree)?;
        if let Some(existing) = manifest.iter().find(|a| a.filename == filename) {
            if existing.content_hash == content_hash {
                return Ok(existing.artifact_id);
            }
            return Err(ArtifactError::OperationFailed {
                reason: format!("filename {filename} already exists on workflow branch with different content"),
            });
        }

        let artifact = Artifact {
            artifact_id: ArtifactId::new(),
            workflow_id,
            task_id,
            filename: filename.to_string(),
            filepath: tree_path(kind, workflow_id, filename),
            content_hash,
            size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            created_at: Utc::now(),
            kind,
            parent_artifacts,
        };

        let tree_after_file = write_path_into_tree(&repo, Some(tip_tree.id()), &segments(&artifact.filepath), blob_oid, i32::from(FileMode::Blob))?;

        manifest.push(artifact.clone());
        let manifest_bytes = serde_json::to_vec_pretty(&manifest).map_err(|e| ArtifactError::OperationFailed { reason: e.to_string() })?;
        let manifest_oid = repo.blob(&manifest_bytes)?;
        let final_tree = write_path_into_tree(&repo, Some(tree_after_file), &[MANIFEST_FILE], manifest_oid, i32::from(FileMode::Blob))?;

        let tree = repo.find_tree(final_tree)?;
        let sig = signature()?;
        let message = format!(
            "put artifact\n\nworkflow_id: {workflow_id}\ntask_id: {task_id}\ncontent_hash: {}\nfilename: {filename}\n",
            artifact.content_hash
        );
        repo.commit(Some(&format!("refs/heads/{branch_name}")), &sig, &sig, &message, &tree, &[&tip_commit])?;

        self.index_artifact(&repo, &artifact)?;

        Ok(artifact.artifact_id)
    }

    fn index_artifact(&self, repo: &Repository, artifact: &Artifact) -> Result<(), ArtifactError> {
        let index_ref = format!("refs/heads/{INDEX_BRANCH}");
        let parent = repo.find_branch(INDEX_BRANCH, git2::BranchType::Local).ok().and_then(|b| b.get().peel_to_commit().ok());
        let base_tree = parent.as_ref().and_then(|c| c.tree().ok()).map(|t| t.id());

        let entry_bytes = serde_json::to_vec_pretty(artifact).map_err(|e| ArtifactError::OperationFailed { reason: e.to_string() })?;
        let entry_oid = repo.blob(&entry_bytes)?;
        let path = format!("{}.json", artifact.artifact_id);
        let tree_oid = write_path_into_tree(repo, base_tree, &[path.as_str()], entry_oid, i32::from(FileMode::Blob))?;
        let tree = repo.find_tree(tree_oid)?;

        let sig = signature()?;
        let message = format!("index artifact {}", artifact.artifact_id);
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        repo.commit(Some(&index_ref), &sig, &sig, &message, &tree, &parents)?;
        Ok(())
    }

    /// Adds an annotated tag at the current tip of `workflow_id`'s branch.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::WorkflowNotFound`] if the branch does not
    /// exist, or [`ArtifactError::OperationFailed`] on a git failure.
    pub fn tag(&self, workflow_id: WorkflowId, label: &str) -> Result<(), ArtifactError> {
        let repo = self.repo.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let branch_name = workflow_branch(workflow_id);
        let branch = repo.find_branch(&branch_name, git2::BranchType::Local).map_err(|_| ArtifactError::WorkflowNotFound {
            workflow_id: workflow_id.to_string(),
        })?;
        let commit = branch.get().peel_to_commit()?;
        let sig = signature()?;
        repo.tag(label, commit.as_object(), &sig, &format!("tag {label}"), false)?;
        Ok(())
    }

    /// Fast-forward merges `workflow_id`'s branch into `main`.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::PromotionConflict`] if `main` has diverged
    /// past the branch's fork point, or [`ArtifactError::WorkflowNotFound`]
    /// if the branch does not exist.
    pub fn promote(&self, workflow_id: WorkflowId) -> Result<(), ArtifactError> {
        let repo = self.repo.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let branch_name = workflow_branch(workflow_id);
        let branch = repo.find_branch(&branch_name, git2::BranchType::Local).map_err(|_| ArtifactError::WorkflowNotFound {
            workflow_id: workflow_id.to_string(),
        })?;
        let branch_oid = branch.get().peel_to_commit()?.id();

        let main = repo.find_branch(MAIN_BRANCH, git2::BranchType::Local)?;
        let main_oid = main.get().peel_to_commit()?.id();

        if main_oid == branch_oid {
            return Ok(());
        }

        let merge_base = repo.merge_base(main_oid, branch_oid)?;
        if merge_base != main_oid {
            return Err(ArtifactError::PromotionConflict {
                workflow_id: workflow_id.to_string(),
            });
        }

        repo.reference(&format!("refs/heads/{MAIN_BRANCH}"), branch_oid, true, "fast-forward promote")?;
        Ok(())
    }

    /// Retrieves the bytes for `artifact_id` via the global artifact index.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::ArtifactNotFound`] if no artifact with that
    /// id has ever been committed.
    pub fn read(&self, artifact_id: ArtifactId) -> Result<Vec<u8>, ArtifactError> {
        let repo = self.repo.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let artifact = self.lookup_artifact(&repo, artifact_id)?;
        let oid = Oid::from_str(&artifact.content_hash)?;
        let blob = repo.find_blob(oid)?;
        Ok(blob.content().to_vec())
    }

    /// Returns the metadata record for `artifact_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::ArtifactNotFound`] if no artifact with that
    /// id has ever been committed.
    pub fn metadata(&self, artifact_id: ArtifactId) -> Result<Artifact, ArtifactError> {
        let repo = self.repo.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.lookup_artifact(&repo, artifact_id)
    }

    fn lookup_artifact(&self, repo: &Repository, artifact_id: ArtifactId) -> Result<Artifact, ArtifactError> {
        let branch = repo.find_branch(INDEX_BRANCH, git2::BranchType::Local).map_err(|_| ArtifactError::ArtifactNotFound {
            artifact_id: artifact_id.to_string(),
        })?;
        let tree = branch.get().peel_to_commit()?.tree()?;
        let path = format!("{artifact_id}.json");
        let entry = tree.get_path(Path::new(&path)).map_err(|_| ArtifactError::ArtifactNotFound {
            artifact_id: artifact_id.to_string(),
        })?;
        let blob = repo.find_blob(entry.id())?;
        serde_json::from_slice(blob.content()).map_err(|e| ArtifactError::OperationFailed { reason: e.to_string() })
    }

    /// Enumerates every artifact committed to `workflow_id`'s branch.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::WorkflowNotFound`] if the branch does not
    /// exist.
    pub fn list(&self, workflow_id: WorkflowId) -> Result<Vec<Artifact>, ArtifactError> {
        let repo = self.repo.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let branch_name = workflow_branch(workflow_id);
        let branch = repo.find_branch(&branch_name, git2::BranchType::Local).map_err(|_| ArtifactError::WorkflowNotFound {
            workflow_id: workflow_id.to_string(),
        })?;
        let tree = branch.get().peel_to_commit()?.tree()?;
        read_manifest(&repo, &tree)
    }
}

fn signature() -> Result<Signature<'static>, ArtifactError> {
    Signature::now(COMMITTER_NAME, COMMITTER_EMAIL).map_err(|e| ArtifactError::OperationFailed { reason: e.to_string() })
}

fn read_manifest(repo: &Repository, tree: &git2::Tree<'_>) -> Result<Vec<Artifact>, ArtifactError> {
    match tree.get_name(MANIFEST_FILE) {
        Some(entry) => {
            let blob = repo.find_blob(entry.id())?;
            serde_json::from_slice(blob.content()).map_err(|e| ArtifactError::OperationFailed { reason: e.to_string() })
        }
        None => Ok(Vec::new()),
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').collect()
}

/// Writes `leaf_oid` at the nested path `segments` into the tree
/// identified by `base` (or a fresh empty tree if `base` is `None`),
/// preserving every sibling entry along the path, and returns the new
/// tree's oid.
fn write_path_into_tree(repo: &Repository, base: Option<Oid>, segments: &[&str], leaf_oid: Oid, leaf_mode: i32) -> Result<Oid, git2::Error> {
    let base_tree = match base {
        Some(oid) => Some(repo.find_tree(oid)?),
        None => None,
    };
    let mut builder = repo.treebuilder(base_tree.as_ref())?;

    if segments.len() == 1 {
        builder.insert(segments[0], leaf_oid, leaf_mode)?;
        return builder.write();
    }

    let head = segments[0];
    let child_base = base_tree
        .as_ref()
        .and_then(|t| t.get_name(head))
        .and_then(|entry| entry.to_object(repo).ok())
        .and_then(|obj| obj.into_tree().ok())
        .map(|t| t.id());

    let child_oid = write_path_into_tree(repo, child_base, &segments[1..], leaf_oid, leaf_mode)?;
    builder.insert(head, child_oid, i32::from(FileMode::Tree))?;
    builder.write()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArtifactKind;
    use tempfile::tempdir;

    fn store() -> (ArtifactStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::init(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn open_workflow_is_idempotent() {
        let (store, _dir) = store();
        let wf = WorkflowId::new();
        store.open_workflow(wf).unwrap();
        store.open_workflow(wf).unwrap();
    }

    #[test]
    fn put_then_list_then_read_roundtrips() {
        let (store, _dir) = store();
        let wf = WorkflowId::new();
        let task = TaskId::new();
        let id = store.put(wf, task, "strategy.py", ArtifactKind::Code, b"print('hi')", vec![]).unwrap();

        let listed = store.list(wf).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].artifact_id, id);

        let bytes = store.read(id).unwrap();
        assert_eq!(bytes, b"print('hi')");
    }

    #[test]
    fn put_same_filename_identical_bytes_is_noop() {
        let (store, _dir) = store();
        let wf = WorkflowId::new();
        let task = TaskId::new();
        let first = store.put(wf, task, "strategy.py", ArtifactKind::Code, b"same", vec![]).unwrap();
        let second = store.put(wf, task, "strategy.py", ArtifactKind::Code, b"same", vec![]).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list(wf).unwrap().len(), 1);
    }

    #[test]
    fn put_same_filename_different_bytes_is_an_error() {
        let (store, _dir) = store();
        let wf = WorkflowId::new();
        let task = TaskId::new();
        store.put(wf, task, "strategy.py", ArtifactKind::Code, b"one", vec![]).unwrap();
        let err = store.put(wf, task, "strategy.py", ArtifactKind::Code, b"two", vec![]).unwrap_err();
        assert!(matches!(err, ArtifactError::OperationFailed { .. }));
    }

    #[test]
    fn promote_fast_forwards_main() {
        let (store, _dir) = store();
        let wf = WorkflowId::new();
        let task = TaskId::new();
        store.put(wf, task, "strategy.py", ArtifactKind::Code, b"v1", vec![]).unwrap();
        store.promote(wf).unwrap();

        let repo = store.repo.lock().unwrap();
        let main = repo.find_branch(MAIN_BRANCH, git2::BranchType::Local).unwrap();
        let branch = repo.find_branch(&workflow_branch(wf), git2::BranchType::Local).unwrap();
        assert_eq!(main.get().peel_to_commit().unwrap().id(), branch.get().peel_to_commit().unwrap().id());
    }

    #[test]
    fn promote_is_idempotent_when_already_at_tip() {
        let (store, _dir) = store();
        let wf = WorkflowId::new();
        store.open_workflow(wf).unwrap();
        store.promote(wf).unwrap();
        store.promote(wf).unwrap();
    }

    #[test]
    fn promote_conflicts_when_main_has_diverged() {
        let (store, _dir) = store();
        let wf_a = WorkflowId::new();
        let wf_b = WorkflowId::new();
        store.put(wf_a, TaskId::new(), "a.py", ArtifactKind::Code, b"a", vec![]).unwrap();
        store.put(wf_b, TaskId::new(), "b.py", ArtifactKind::Code, b"b", vec![]).unwrap();

        store.promote(wf_a).unwrap();
        let err = store.promote(wf_b).unwrap_err();
        assert!(matches!(err, ArtifactError::PromotionConflict { .. }));
    }

    #[test]
    fn tag_fails_for_unknown_workflow() {
        let (store, _dir) = store();
        let err = store.tag(WorkflowId::new(), "v1").unwrap_err();
        assert!(matches!(err, ArtifactError::WorkflowNotFound { .. }));
    }

    #[test]
    fn read_unknown_artifact_fails() {
        let (store, _dir) = store();
        let err = store.read(ArtifactId::new()).unwrap_err();
        assert!(matches!(err, ArtifactError::ArtifactNotFound { .. }));
    }

    #[test]
    fn list_preserves_artifacts_across_multiple_puts() {
        let (store, _dir) = store();
        let wf = WorkflowId::new();
        let task = TaskId::new();
        store.put(wf, task, "a.py", ArtifactKind::Code, b"a", vec![]).unwrap();
        store.put(wf, task, "b.py", ArtifactKind::Test, b"b", vec![]).unwrap();
        store.put(wf, task, "report.json", ArtifactKind::Report, b"{}", vec![]).unwrap();

        let listed = store.list(wf).unwrap();
        assert_eq!(listed.len(), 3);
    }

    #[test]
    fn repo_reopens_with_state_intact() {
        let dir = tempdir().unwrap();
        let wf = WorkflowId::new();
        let id = {
            let store = ArtifactStore::init(dir.path()).unwrap();
            store.put(wf, TaskId::new(), "a.py", ArtifactKind::Code, b"content", vec![]).unwrap()
        };

        let reopened = ArtifactStore::init(dir.path()).unwrap();
        assert_eq!(reopened.read(id).unwrap(), b"content");
    }
}
