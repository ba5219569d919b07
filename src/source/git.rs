//! History source backed by a real repository.
//!
//! References, HEAD and name resolution go through libgit2. The log and
//! diff streams come from the `git` binary, since its topological ordering,
//! boundary marks and rename detection are what the lane layout and the
//! file lists expect.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use git2::{ErrorCode, Repository};
use parking_lot::Mutex;

use crate::graph::{CommitId, RefRecord, RefType};
use crate::parser::LOG_FORMAT;
use crate::source::error::{ToolError, ToolResult};
use crate::source::{DiffRequest, HistorySource, LogRequest, LogStream};

pub struct GitSource {
    repo: Mutex<Repository>,
    git_dir: PathBuf,
    /// directory the git binary runs in
    workdir: PathBuf,
    git: PathBuf,
}

impl GitSource {
    /// Open the repository containing `path`.
    pub fn open(path: impl AsRef<Path>) -> ToolResult<Self> {
        let repo = Repository::discover(path.as_ref())?;
        let git_dir = repo.path().to_path_buf();
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| git_dir.clone());

        tracing::debug!(git_dir = %git_dir.display(), "opened repository");
        Ok(Self {
            repo: Mutex::new(repo),
            git_dir,
            workdir,
            git: PathBuf::from("git"),
        })
    }

    /// use another git executable
    pub fn with_git_binary(mut self, git: impl Into<PathBuf>) -> Self {
        self.git = git.into();
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn command(&self, args: &[String]) -> (Command, String) {
        let mut cmd = Command::new(&self.git);
        cmd.arg("-C")
            .arg(&self.workdir)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let label = format!("git {}", args.first().map(String::as_str).unwrap_or_default());
        (cmd, label)
    }

    /// run to completion and collect stdout
    fn run(&self, args: &[String]) -> ToolResult<String> {
        let (mut cmd, label) = self.command(args);
        let output = cmd.output().map_err(|source| ToolError::Spawn {
            command: label.clone(),
            source,
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::exit(label, output.status.code(), stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// run to completion with `input` on stdin
    fn run_with_input(&self, args: &[String], input: String) -> ToolResult<String> {
        let (mut cmd, label) = self.command(args);
        let mut child = cmd
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| ToolError::Spawn {
                command: label.clone(),
                source,
            })?;

        // fed from another thread so a full stdout pipe cannot stall us
        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || {
                if let Err(e) = stdin.write_all(input.as_bytes()) {
                    tracing::debug!(error = %e, "stdin closed early");
                }
            })
        });
        let output = child.wait_with_output()?;
        if let Some(writer) = writer {
            writer.join().ok();
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::exit(label, output.status.code(), stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn diff_args(request: &DiffRequest, renames: bool) -> Vec<String> {
        let mut args: Vec<String> = ["diff-tree", "-r", "--root", "--no-color"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if request.all_merge_files {
            args.push("-m".to_string());
        }
        if renames {
            args.push("-C".to_string());
        }
        if let Some(diff_to) = request.diff_to {
            args.push(diff_to.to_string());
        }
        args.push(request.id.to_string());
        args
    }
}

impl HistorySource for GitSource {
    fn identity(&self) -> String {
        self.git_dir
            .canonicalize()
            .unwrap_or_else(|_| self.git_dir.clone())
            .display()
            .to_string()
    }

    fn cache_dir(&self) -> Option<PathBuf> {
        Some(self.git_dir.join("revgraph"))
    }

    fn head(&self) -> ToolResult<Option<CommitId>> {
        let repo = self.repo.lock();
        let result = match repo.head() {
            Ok(head) => Ok(Some(CommitId::new(head.peel_to_commit()?.id()))),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        };
        result
    }

    fn references(&self) -> ToolResult<Vec<RefRecord>> {
        let repo = self.repo.lock();
        let head = repo.head().ok();
        let current = head
            .as_ref()
            .filter(|h| h.is_branch())
            .and_then(|h| h.name().map(str::to_string));
        let head_id = head.as_ref().and_then(|h| h.target());

        let mut records = Vec::new();
        for reference in repo.references()? {
            let reference = reference?;
            let Some(full) = reference.name().map(str::to_string) else {
                continue;
            };
            // tags may point at trees or blobs
            let Ok(target) = reference.peel_to_commit().map(|c| c.id()) else {
                continue;
            };
            let id = CommitId::new(target);

            let record = if let Some(name) = full.strip_prefix("refs/tags/") {
                let mut record = RefRecord::new(id, RefType::Tag, name);
                record.tag_object = reference
                    .target()
                    .filter(|object| *object != target)
                    .map(|object| object.to_string());
                record
            } else if let Some(name) = full.strip_prefix("refs/heads/") {
                let record = RefRecord::new(id, RefType::Branch, name);
                if current.as_deref() == Some(full.as_str()) {
                    record.current()
                } else {
                    record
                }
            } else if let Some(name) = full.strip_prefix("refs/remotes/") {
                if name.ends_with("/HEAD") {
                    continue;
                }
                RefRecord::new(id, RefType::RemoteBranch, name)
            } else if let Some(name) = full.strip_prefix("refs/patches/") {
                // refs/patches/<branch>/<patch>
                if name.ends_with(".log") {
                    continue;
                }
                let patch = name.rsplit('/').next().unwrap_or(name);
                let applied = match head_id {
                    Some(head) => head == target || repo.graph_descendant_of(head, target)?,
                    None => false,
                };
                let kind = if applied {
                    RefType::Applied
                } else {
                    RefType::Unapplied
                };
                RefRecord::new(id, kind, patch)
            } else if full == "refs/stash" || full.starts_with("refs/notes/") {
                continue;
            } else {
                let name = full.strip_prefix("refs/").unwrap_or(&full);
                RefRecord::new(id, RefType::Ref, name)
            };
            records.push(record);
        }

        tracing::debug!(count = records.len(), "read references");
        Ok(records)
    }

    fn log(&self, request: &LogRequest) -> ToolResult<LogStream> {
        let mut args: Vec<String> = ["log", "-z", "--topo-order", "--boundary", "--no-color"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(format!("--pretty=format:{}", LOG_FORMAT));
        if let Some(max) = request.max_count {
            args.push(format!("--max-count={}", max));
        }
        args.extend(request.extra_args.iter().cloned());
        if request.revisions.is_empty() {
            args.push("HEAD".to_string());
        } else {
            args.extend(request.revisions.iter().cloned());
        }
        args.push("--".to_string());
        args.extend(request.paths.iter().cloned());

        let (mut cmd, label) = self.command(&args);
        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            command: label.clone(),
            source,
        })?;
        tracing::debug!(pid = child.id(), args = ?args, "spawned log process");

        let stdout = child.stdout.take().ok_or_else(|| {
            ToolError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "log process has no stdout",
            ))
        })?;
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                if let Err(e) = pipe.read_to_string(&mut text) {
                    tracing::debug!(error = %e, "could not read log stderr");
                }
                text
            })
        });

        Ok(LogStream::from_child(label, child, stdout, stderr))
    }

    fn diff_tree(&self, request: &DiffRequest) -> ToolResult<String> {
        if !request.rename_detection {
            return self.run(&Self::diff_args(request, false));
        }
        match self.run(&Self::diff_args(request, true)) {
            Ok(text) => Ok(text),
            Err(e @ ToolError::Exit { .. }) => {
                tracing::warn!(id = %request.id, error = %e, "rename detection failed, retrying without it");
                self.run(&Self::diff_args(request, false))
            }
            Err(e) => Err(e),
        }
    }

    fn pickaxe(&self, ids: &[CommitId], exp: &str, regex: bool) -> ToolResult<Vec<CommitId>> {
        let mut args: Vec<String> = ["diff-tree", "--no-color", "-r", "-s", "--root", "--stdin"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if regex {
            args.push("--pickaxe-regex".to_string());
        }
        args.push(format!("-S{}", exp));

        let mut input = String::with_capacity(ids.len() * (CommitId::HEX_LEN + 1));
        for id in ids {
            input.push_str(&id.to_string());
            input.push('\n');
        }

        let output = self.run_with_input(&args, input)?;
        let mut found = Vec::new();
        for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match CommitId::from_hex(line) {
                Ok(id) => found.push(id),
                Err(_) => tracing::debug!(line, "unexpected diff-tree output"),
            }
        }
        Ok(found)
    }

    fn resolve(&self, name: &str) -> ToolResult<Option<CommitId>> {
        let repo = self.repo.lock();
        let result = match repo.revparse_single(name) {
            Ok(object) => Ok(object.peel_to_commit().ok().map(|c| CommitId::new(c.id()))),
            Err(e)
                if matches!(
                    e.code(),
                    ErrorCode::NotFound | ErrorCode::Ambiguous | ErrorCode::InvalidSpec
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Oid, Signature};
    use tempfile::TempDir;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn commit_file(repo: &Repository, file: &str, message: &str) -> Oid {
        let workdir = repo.workdir().unwrap();
        std::fs::write(workdir.join(file), message).unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new(file)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

        let sig = Signature::now("Test", "test@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    /// two commits, a branch and both kinds of tags on them
    fn setup() -> (TempDir, Oid, Oid) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let first = commit_file(&repo, "a.txt", "first");
        let second = commit_file(&repo, "b.txt", "second");

        let first_commit = repo.find_commit(first).unwrap();
        repo.branch("topic", &first_commit, false).unwrap();
        repo.tag_lightweight("v1", first_commit.as_object(), false)
            .unwrap();

        let sig = Signature::now("Test", "test@example.com").unwrap();
        let second_object = repo.find_object(second, None).unwrap();
        repo.tag("v2", &second_object, &sig, "release 2", false)
            .unwrap();
        (dir, first, second)
    }

    #[test]
    fn test_head_and_references() {
        let (dir, first, second) = setup();
        let source = GitSource::open(dir.path()).unwrap();

        assert_eq!(source.head().unwrap(), Some(CommitId::new(second)));

        let refs = source.references().unwrap();
        let current: Vec<_> = refs.iter().filter(|r| r.current).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, CommitId::new(second));

        let topic = refs.iter().find(|r| r.name == "topic").unwrap();
        assert_eq!(topic.kind, RefType::Branch);
        assert_eq!(topic.id, CommitId::new(first));
        assert!(!topic.current);

        let v1 = refs.iter().find(|r| r.name == "v1").unwrap();
        assert_eq!(v1.kind, RefType::Tag);
        assert!(v1.tag_object.is_none());

        let v2 = refs.iter().find(|r| r.name == "v2").unwrap();
        assert_eq!(v2.id, CommitId::new(second));
        assert!(v2.tag_object.is_some());
    }

    #[test]
    fn test_resolve() {
        let (dir, first, _) = setup();
        let source = GitSource::open(dir.path()).unwrap();
        let id = CommitId::new(first);

        assert_eq!(source.resolve(&id.short()).unwrap(), Some(id));
        assert_eq!(source.resolve("v1").unwrap(), Some(id));
        assert_eq!(source.resolve("no-such-thing").unwrap(), None);
    }

    #[test]
    fn test_unborn_head() {
        let dir = TempDir::new().unwrap();
        Repository::init(dir.path()).unwrap();
        let source = GitSource::open(dir.path()).unwrap();

        assert_eq!(source.head().unwrap(), None);
        assert!(source.references().unwrap().is_empty());
        assert!(source.cache_dir().unwrap().ends_with("revgraph"));
    }

    #[test]
    fn test_log_stream() {
        if !git_available() {
            return;
        }
        let (dir, first, second) = setup();
        let source = GitSource::open(dir.path()).unwrap();

        let mut stream = source.log(&LogRequest::default()).unwrap();
        let records: Vec<_> = stream.records().map(|r| r.unwrap()).collect();
        stream.finish().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, CommitId::new(second));
        assert_eq!(records[0].parents, vec![CommitId::new(first)]);
        assert_eq!(records[0].short_log, "second");
        assert!(records[1].parents.is_empty());
    }

    #[test]
    fn test_log_bad_revision() {
        if !git_available() {
            return;
        }
        let (dir, _, _) = setup();
        let source = GitSource::open(dir.path()).unwrap();

        let request = LogRequest {
            revisions: vec!["no-such-branch".to_string()],
            ..LogRequest::default()
        };
        let mut stream = source.log(&request).unwrap();
        assert_eq!(stream.records().count(), 0);
        assert!(matches!(stream.finish(), Err(ToolError::Exit { .. })));
    }

    #[test]
    fn test_diff_tree() {
        if !git_available() {
            return;
        }
        let (dir, first, second) = setup();
        let source = GitSource::open(dir.path()).unwrap();

        let text = source.diff_tree(&DiffRequest::new(CommitId::new(second))).unwrap();
        let changes = crate::parser::parse_diff(&text);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "b.txt");

        let mut request = DiffRequest::new(CommitId::new(first));
        request.rename_detection = false;
        let changes = crate::parser::parse_diff(&source.diff_tree(&request).unwrap());
        assert_eq!(changes[0].path, "a.txt");
    }

    #[test]
    fn test_pickaxe() {
        if !git_available() {
            return;
        }
        let (dir, first, second) = setup();
        let source = GitSource::open(dir.path()).unwrap();
        let ids = [CommitId::new(second), CommitId::new(first)];

        assert_eq!(source.pickaxe(&ids, "second", false).unwrap(), vec![ids[0]]);
        // the root commit is searched too
        assert_eq!(source.pickaxe(&ids, "fir.t", true).unwrap(), vec![ids[1]]);
        assert!(source.pickaxe(&ids, "fir.t", false).unwrap().is_empty());
    }
}
