use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// The three request channels, in the fixed order a sweep services them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// `<name>.request`: Kaniko image build from `<name>.tar.gz`
    Build,
    /// `<name>.apply`: `kubectl apply -f <name>.yaml`
    Apply,
    /// `<name>.kubectl`: `bash <name>.sh` with cluster credentials
    Kubectl,
}

impl RequestKind {
    pub const SWEEP_ORDER: [RequestKind; 3] =
        [RequestKind::Build, RequestKind::Apply, RequestKind::Kubectl];

    pub fn trigger_suffix(&self) -> &'static str {
        match self {
            RequestKind::Build => ".request",
            RequestKind::Apply => ".apply",
            RequestKind::Kubectl => ".kubectl",
        }
    }

    pub fn log_suffix(&self) -> &'static str {
        match self {
            RequestKind::Build => ".log",
            RequestKind::Apply => ".apply-log",
            RequestKind::Kubectl => ".kubectl-log",
        }
    }

    pub fn exitcode_suffix(&self) -> &'static str {
        match self {
            RequestKind::Build => ".exitcode",
            RequestKind::Apply => ".apply-exitcode",
            RequestKind::Kubectl => ".kubectl-exitcode",
        }
    }

    pub fn done_suffix(&self) -> &'static str {
        match self {
            RequestKind::Build => ".done",
            RequestKind::Apply => ".apply-done",
            RequestKind::Kubectl => ".kubectl-done",
        }
    }
}

/// One claimed or unclaimed request in the shared directory
#[derive(Debug, Clone)]
pub struct Request {
    pub kind: RequestKind,
    /// Base name shared by all files of the request
    pub name: String,
    dir: PathBuf,
}

impl Request {
    pub fn new(dir: &Path, kind: RequestKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            dir: dir.to_path_buf(),
        }
    }

    fn path(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}{}", self.name, suffix))
    }

    pub fn trigger_path(&self) -> PathBuf {
        self.path(self.kind.trigger_suffix())
    }

    pub fn processing_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}{}.processing", self.name, self.kind.trigger_suffix()))
    }

    pub fn log_path(&self) -> PathBuf {
        self.path(self.kind.log_suffix())
    }

    pub fn exitcode_path(&self) -> PathBuf {
        self.path(self.kind.exitcode_suffix())
    }

    pub fn done_path(&self) -> PathBuf {
        self.path(self.kind.done_suffix())
    }

    /// Build context tarball (Build requests)
    pub fn context_path(&self) -> PathBuf {
        self.path(".tar.gz")
    }

    /// Destination image reference (Build requests)
    pub fn dest_path(&self) -> PathBuf {
        self.path(".dest")
    }

    /// Optional Dockerfile path relative to the context (Build requests)
    pub fn dockerfile_path(&self) -> PathBuf {
        self.path(".dockerfile")
    }

    /// Optional per-request timeout override in seconds (Build requests)
    pub fn timeout_path(&self) -> PathBuf {
        self.path(".timeout")
    }

    /// Manifest to apply (Apply requests)
    pub fn manifest_path(&self) -> PathBuf {
        self.path(".yaml")
    }

    /// Shell snippet to execute (Kubectl requests)
    pub fn script_path(&self) -> PathBuf {
        self.path(".sh")
    }

    /// Atomically claim the request by renaming the trigger file to
    /// `.processing`. Only one claimant can win the rename, which is the
    /// protocol's entire locking story.
    pub fn claim(&self) -> io::Result<()> {
        fs::rename(self.trigger_path(), self.processing_path())
    }

    /// Release the claim after the results are durable
    pub fn release(&self) -> io::Result<()> {
        fs::remove_file(self.processing_path())
    }
}

/// Enumerate unclaimed requests of one kind, in directory order
pub fn discover(dir: &Path, kind: RequestKind) -> io::Result<Vec<Request>> {
    let mut requests = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(name) = file_name.strip_suffix(kind.trigger_suffix()) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        requests.push(Request::new(dir, kind, name));
    }
    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_result_file_names() {
        let dir = Path::new("/builds");
        let build = Request::new(dir, RequestKind::Build, "foo");
        assert_eq!(build.trigger_path(), dir.join("foo.request"));
        assert_eq!(build.processing_path(), dir.join("foo.request.processing"));
        assert_eq!(build.log_path(), dir.join("foo.log"));
        assert_eq!(build.exitcode_path(), dir.join("foo.exitcode"));
        assert_eq!(build.done_path(), dir.join("foo.done"));

        let apply = Request::new(dir, RequestKind::Apply, "foo");
        assert_eq!(apply.log_path(), dir.join("foo.apply-log"));
        assert_eq!(apply.exitcode_path(), dir.join("foo.apply-exitcode"));
        assert_eq!(apply.done_path(), dir.join("foo.apply-done"));
        assert_eq!(apply.manifest_path(), dir.join("foo.yaml"));

        let kubectl = Request::new(dir, RequestKind::Kubectl, "foo");
        assert_eq!(kubectl.script_path(), dir.join("foo.sh"));
        assert_eq!(kubectl.log_path(), dir.join("foo.kubectl-log"));
    }

    #[test]
    fn test_discover_skips_processing_and_foreign_files() {
        let tmp = tempfile::tempdir().unwrap();
        File::create(tmp.path().join("a.request")).unwrap();
        File::create(tmp.path().join("b.request.processing")).unwrap();
        File::create(tmp.path().join("c.apply")).unwrap();
        File::create(tmp.path().join("a.tar.gz")).unwrap();

        let builds = discover(tmp.path(), RequestKind::Build).unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].name, "a");

        let applies = discover(tmp.path(), RequestKind::Apply).unwrap();
        assert_eq!(applies.len(), 1);
        assert_eq!(applies[0].name, "c");
    }

    #[test]
    fn test_claim_is_exclusive() {
        let tmp = tempfile::tempdir().unwrap();
        File::create(tmp.path().join("a.request")).unwrap();
        let request = Request::new(tmp.path(), RequestKind::Build, "a");

        request.claim().unwrap();
        assert!(!request.trigger_path().exists());
        assert!(request.processing_path().exists());

        // A second claim of the same request fails: the trigger is gone
        assert!(request.claim().is_err());

        request.release().unwrap();
        assert!(!request.processing_path().exists());
    }
}
