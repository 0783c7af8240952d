// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Checkpoint deployment.
//!
//! Utilities to push a checkpoint out to a __deployment target__, i.e., a
//! directory on a remote host reachable through SSH, or a plain local
//! directory. Deployment is laid out as a fixed [`DeployPlan`] of shell steps
//! that is executed through a [`Shell`]. The shell is picked once based on
//! whether the target names a host.
//!
//! # Failure Policy
//!
//! Not every step needs to succeed. Backing up the current deployment,
//! stopping its compose stack, and clearing it out may all fail on a target
//! that was never initialized, or that is partially broken. These steps only
//! produce warnings. Creating the backup directory, transferring the archive,
//! extracting it, and running the clean script of the target are fatal.

use crate::{
    compose::COMPOSE_FILES,
    config::DeploySettings,
    store::ArchiveEntry,
    syscall::{shell_quote, syscall_interactive, SyscallError},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::copy,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{info, instrument, warn};

/// Tooling scripts refreshed from the scripts source after deployment.
pub const TOOLING_SCRIPTS: [&str; 3] = crate::checkpoint::PROTECTED_SCRIPTS;

/// Where deployment archives are parked on the target before extraction.
pub const TRANSFER_DIR: &str = "/tmp";

/// Deployment target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployTarget {
    /// Directory on a remote host, reached through SSH.
    Remote { host: String, path: String },

    /// Directory on this machine.
    Local { path: String },
}

impl DeployTarget {
    /// Path of target directory on the target host.
    pub fn path(&self) -> &str {
        match self {
            Self::Remote { path, .. } => path,
            Self::Local { path } => path,
        }
    }
}

impl FromStr for DeployTarget {
    type Err = DeployError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let data = data.trim();
        let invalid = || DeployError::InvalidTarget {
            target: data.to_string(),
        };

        if data.is_empty() {
            return Err(invalid());
        }

        // INVARIANT: "host:path" only if the part before the colon is not a path itself.
        match data.split_once(':') {
            Some((host, path)) if !host.is_empty() && !host.contains('/') => {
                let path = path.trim_end_matches('/');
                if path.is_empty() {
                    return Err(invalid());
                }
                Ok(Self::Remote {
                    host: host.into(),
                    path: path.into(),
                })
            }
            // INVARIANT: Never deploy into the file system root.
            _ => match data.trim_end_matches('/') {
                "" => Err(invalid()),
                path => Ok(Self::Local { path: path.into() }),
            },
        }
    }
}

impl Display for DeployTarget {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Remote { host, path } => write!(fmt, "{host}:{path}"),
            Self::Local { path } => write!(fmt, "{path}"),
        }
    }
}

/// Way of running deployment steps on the target host.
pub trait Shell {
    /// Run shell script on target host.
    fn run(&self, script: &str) -> Result<(), SyscallError>;

    /// Copy local file to a path on target host.
    fn upload(&self, local: &Path, remote: &str) -> Result<(), SyscallError>;
}

/// Shell session on a remote host through ssh and scp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshShell {
    host: String,
}

impl SshShell {
    /// Construct new SSH shell for `user@host` or `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Shell for SshShell {
    fn run(&self, script: &str) -> Result<(), SyscallError> {
        syscall_interactive("ssh", [self.host.as_str(), script], None)
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<(), SyscallError> {
        let local = local.to_string_lossy();
        let remote = format!("{}:{remote}", self.host);
        syscall_interactive("scp", ["-q", local.as_ref(), remote.as_str()], None)
    }
}

/// Local subshell.
///
/// Scripts run through `sh -c` from within the given directory, so relative
/// target paths are relative to the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalShell {
    cwd: PathBuf,
}

impl LocalShell {
    /// Construct new local shell running from target directory.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

impl Shell for LocalShell {
    fn run(&self, script: &str) -> Result<(), SyscallError> {
        syscall_interactive("sh", ["-c", script], Some(&self.cwd))
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<(), SyscallError> {
        let dest = self.cwd.join(remote);
        copy(local, &dest).map_err(|err| SyscallError::Spawn {
            source: err,
            command: format!("cp {} {}", local.display(), dest.display()),
        })?;
        Ok(())
    }
}

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Abort deployment.
    Abort,

    /// Log warning, and move on to the next step.
    Warn,
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Run shell script on target host.
    Run(String),

    /// Copy local file to target host.
    Upload { local: PathBuf, remote: String },
}

/// Single deployment step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub description: String,
    pub action: StepAction,
    pub on_failure: OnFailure,
}

impl Step {
    fn run(description: impl Into<String>, script: impl Into<String>, on_failure: OnFailure) -> Self {
        Self {
            description: description.into(),
            action: StepAction::Run(script.into()),
            on_failure,
        }
    }
}

/// Ordered deployment steps for one archive and one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployPlan {
    steps: Vec<Step>,
    backup_path: String,
}

impl DeployPlan {
    /// Lay out deployment of archive to target.
    ///
    /// The timestamp names the backup of the current deployment, e.g.,
    /// "20250101_120000".
    pub fn new(
        target: &DeployTarget,
        settings: &DeploySettings,
        archive: &ArchiveEntry,
        timestamp: &str,
    ) -> Self {
        let path = target.path();
        let quoted = shell_path(path);
        let backup_dir = settings
            .backup_dir
            .clone()
            .unwrap_or_else(|| default_backup_dir(path));
        let backup_path = join_path(&backup_dir, &format!("backup_{timestamp}.tar.gz"));
        let transfer_path = join_path(TRANSFER_DIR, &format!("chkpt_{}", archive.file_name));
        let (parent, name) = split_path(path);

        let mut steps = vec![
            Step::run(
                "ensure backup directory exists",
                format!("mkdir -p {}", shell_path(&backup_dir)),
                OnFailure::Abort,
            ),
            Step::run(
                "back up current deployment",
                format!(
                    "if [ -d {quoted} ] && [ -n \"$(ls -A {quoted} 2>/dev/null)\" ]; then \
                     tar -czf {} -C {} {}; fi",
                    shell_path(&backup_path),
                    shell_path(&parent),
                    shell_quote(&name),
                ),
                OnFailure::Warn,
            ),
            Step::run(
                "stop compose stack",
                format!(
                    "cd {quoted} 2>/dev/null || exit 0; for f in {}; do \
                     if [ -f \"$f\" ]; then exec docker compose -f \"$f\" down --remove-orphans; fi; \
                     done",
                    COMPOSE_FILES.join(" "),
                ),
                OnFailure::Warn,
            ),
            Step::run(
                "clear deployment directory",
                format!(
                    "mkdir -p {quoted} && find {quoted} -mindepth 1 -maxdepth 1 -exec rm -rf {{}} +"
                ),
                OnFailure::Warn,
            ),
            Step {
                description: "transfer archive".into(),
                action: StepAction::Upload {
                    local: archive.path.clone(),
                    remote: transfer_path.clone(),
                },
                on_failure: OnFailure::Abort,
            },
            Step::run(
                "extract archive",
                format!(
                    "mkdir -p {quoted} && tar -xzf {transfer} -C {quoted} --strip-components=1 \
                     && rm -f {transfer}",
                    transfer = shell_path(&transfer_path),
                ),
                OnFailure::Abort,
            ),
        ];

        if let Some(source) = &settings.scripts_source {
            steps.push(Step::run(
                "refresh tooling scripts",
                format!(
                    "for s in {}; do if [ -f {source}/\"$s\" ]; then \
                     cp -f {source}/\"$s\" {quoted}/\"$s\" && chmod +x {quoted}/\"$s\" || exit 1; \
                     fi; done",
                    TOOLING_SCRIPTS.join(" "),
                    source = shell_path(source),
                ),
                OnFailure::Warn,
            ));
        }

        steps.push(Step::run(
            "run clean script",
            format!("if [ -x {quoted}/clean.sh ]; then cd {quoted} && ./clean.sh; fi"),
            OnFailure::Abort,
        ));

        Self { steps, backup_path }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Path on the target host the current deployment is backed up to.
    pub fn backup_path(&self) -> &str {
        &self.backup_path
    }
}

/// Outcome of a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
    /// Steps that failed without aborting deployment.
    pub warnings: Vec<String>,

    /// Number of steps that ran successfully.
    pub completed: usize,
}

/// Deployment executor.
#[derive(Debug)]
pub struct Deployer<S>
where
    S: Shell,
{
    shell: S,
}

impl<S> Deployer<S>
where
    S: Shell,
{
    /// Construct new deployer on top of a shell.
    pub fn new(shell: S) -> Self {
        Self { shell }
    }

    /// Execute deployment plan step by step.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::Step`] if a step that must succeed fails.
    #[instrument(skip(self, plan), level = "debug")]
    pub fn execute(&self, plan: &DeployPlan) -> Result<DeployReport> {
        let mut report = DeployReport::default();
        let total = plan.steps().len();

        for (index, step) in plan.steps().iter().enumerate() {
            info!("[{}/{total}] {}", index + 1, step.description);
            let result = match &step.action {
                StepAction::Run(script) => self.shell.run(script),
                StepAction::Upload { local, remote } => self.shell.upload(local, remote),
            };

            match (result, step.on_failure) {
                (Ok(()), _) => report.completed += 1,
                (Err(error), OnFailure::Warn) => {
                    warn!("{} failed, continuing: {error}", step.description);
                    report.warnings.push(format!("{}: {error}", step.description));
                }
                (Err(error), OnFailure::Abort) => {
                    return Err(DeployError::Step {
                        description: step.description.clone(),
                        source: error,
                    });
                }
            }
        }

        Ok(report)
    }
}

/// Deploy archive to target described by deployment settings.
///
/// Picks the shell based on the target, lays out the plan with the current
/// local time as backup timestamp, and executes it. Local targets run from
/// the given working directory.
///
/// # Errors
///
/// - Return [`DeployError::InvalidTarget`] if target cannot be parsed.
/// - Return [`DeployError::Step`] if a step that must succeed fails.
pub fn deploy(
    work_dir: impl AsRef<Path>,
    settings: &DeploySettings,
    archive: &ArchiveEntry,
) -> Result<DeployReport> {
    let target: DeployTarget = settings.target.as_deref().unwrap_or_default().parse()?;
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let plan = DeployPlan::new(&target, settings, archive, &timestamp);
    info!(
        "deploy {} to {target}, backup goes to {}",
        archive.file_name,
        plan.backup_path()
    );

    match &target {
        DeployTarget::Remote { host, .. } => Deployer::new(SshShell::new(host)).execute(&plan),
        DeployTarget::Local { .. } => Deployer::new(LocalShell::new(work_dir.as_ref())).execute(&plan),
    }
}

fn default_backup_dir(path: &str) -> String {
    let (parent, name) = split_path(path);
    join_path(&parent, &format!("{name}_backups"))
}

fn split_path(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/".into(), name.into()),
        Some((parent, name)) => (parent.into(), name.into()),
        None => (".".into(), path.into()),
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

// INVARIANT: Leading "~" must stay outside of quotes to be expanded.
fn shell_path(path: &str) -> String {
    if path == "~" {
        return "\"$HOME\"".into();
    }

    match path.strip_prefix("~/") {
        Some(rest) => format!("\"$HOME\"/{}", shell_quote(rest)),
        None => shell_quote(path),
    }
}

/// Deployment error types.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Deployment target cannot be understood.
    #[error("invalid deployment target {target:?}, expected user@host:path or a local path")]
    InvalidTarget { target: String },

    /// Step that must succeed failed.
    #[error("deployment step {description:?} failed")]
    Step {
        description: String,
        #[source]
        source: SyscallError,
    },
}

/// Friendly result alias :3
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::{cell::RefCell, time::SystemTime};

    fn archive() -> ArchiveEntry {
        ArchiveEntry {
            path: PathBuf::from("/home/dev/.local/share/chkpt-store/widget/1.2_fix.tar.gz"),
            file_name: "1.2_fix.tar.gz".into(),
            name: None,
            modified: SystemTime::UNIX_EPOCH,
            size: 0,
        }
    }

    #[test_case("deploy@example.org:/srv/widget", Some(("deploy@example.org", "/srv/widget")); "user and host")]
    #[test_case("example.org:apps/widget/", Some(("example.org", "apps/widget")); "host with relative path")]
    #[test_case("/srv/widget", None; "absolute local path")]
    #[test_case("./deploy:here", None; "local path with colon")]
    #[test]
    fn parse_remote_and_local_targets(input: &str, expect: Option<(&str, &str)>) -> anyhow::Result<()> {
        let target: DeployTarget = input.parse()?;
        match (target, expect) {
            (DeployTarget::Remote { host, path }, Some((ehost, epath))) => {
                pretty_assertions::assert_eq!((host.as_str(), path.as_str()), (ehost, epath));
            }
            (DeployTarget::Local { path }, None) => {
                pretty_assertions::assert_eq!(path, input.trim_end_matches('/'));
            }
            (target, expect) => panic!("unexpected {target:?} for {expect:?}"),
        }
        Ok(())
    }

    #[test_case(""; "empty")]
    #[test_case("   "; "blank")]
    #[test_case("example.org:"; "host without path")]
    #[test_case("example.org:/"; "remote root")]
    #[test_case("/"; "local root")]
    #[test_case("//"; "local root with extra slash")]
    #[test]
    fn reject_invalid_targets(input: &str) {
        assert!(matches!(
            input.parse::<DeployTarget>(),
            Err(DeployError::InvalidTarget { .. })
        ));
    }

    #[test_case("/srv/widget", "/srv/widget_backups"; "absolute")]
    #[test_case("/widget", "/widget_backups"; "top level")]
    #[test_case("widget", "./widget_backups"; "bare name")]
    #[test_case("~/widget", "~/widget_backups"; "home")]
    #[test]
    fn derive_default_backup_dir(path: &str, expect: &str) {
        pretty_assertions::assert_eq!(default_backup_dir(path), expect);
    }

    #[test]
    fn keep_tilde_expandable() {
        assert_eq!(shell_path("~/my apps"), "\"$HOME\"/'my apps'");
        assert_eq!(shell_path("/srv/widget"), "/srv/widget");
    }

    #[test]
    fn plan_follows_failure_policy() {
        let target: DeployTarget = "deploy@example.org:/srv/widget".parse().unwrap();
        let settings = DeploySettings {
            target: Some(target.to_string()),
            backup_dir: None,
            scripts_source: Some("/opt/devtools".into()),
        };
        let plan = DeployPlan::new(&target, &settings, &archive(), "20250101_120000");

        let result = plan
            .steps()
            .iter()
            .map(|step| (step.description.as_str(), step.on_failure))
            .collect::<Vec<_>>();
        let expect = vec![
            ("ensure backup directory exists", OnFailure::Abort),
            ("back up current deployment", OnFailure::Warn),
            ("stop compose stack", OnFailure::Warn),
            ("clear deployment directory", OnFailure::Warn),
            ("transfer archive", OnFailure::Abort),
            ("extract archive", OnFailure::Abort),
            ("refresh tooling scripts", OnFailure::Warn),
            ("run clean script", OnFailure::Abort),
        ];
        assert_eq!(result, expect);
        assert_eq!(plan.backup_path(), "/srv/widget_backups/backup_20250101_120000.tar.gz");

        assert_eq!(
            plan.steps()[4].action,
            StepAction::Upload {
                local: archive().path,
                remote: "/tmp/chkpt_1.2_fix.tar.gz".into(),
            }
        );
        assert_eq!(
            plan.steps()[5].action,
            StepAction::Run(
                "mkdir -p /srv/widget && tar -xzf /tmp/chkpt_1.2_fix.tar.gz -C /srv/widget \
                 --strip-components=1 && rm -f /tmp/chkpt_1.2_fix.tar.gz"
                    .into()
            )
        );
    }

    #[test]
    fn plan_without_scripts_source() {
        let target: DeployTarget = "/srv/widget".parse().unwrap();
        let settings = DeploySettings {
            target: Some(target.to_string()),
            backup_dir: Some("/var/backups/widget".into()),
            scripts_source: None,
        };
        let plan = DeployPlan::new(&target, &settings, &archive(), "20250101_120000");

        assert_eq!(plan.steps().len(), 7);
        assert!(plan
            .steps()
            .iter()
            .all(|step| step.description != "refresh tooling scripts"));
        assert_eq!(
            plan.backup_path(),
            "/var/backups/widget/backup_20250101_120000.tar.gz"
        );
    }

    #[derive(Default)]
    struct FakeShell {
        fail_on: Vec<(&'static str, i32)>,
        ran: RefCell<Vec<String>>,
    }

    impl FakeShell {
        fn outcome(&self, label: String) -> Result<(), SyscallError> {
            let failure = self
                .fail_on
                .iter()
                .find(|(needle, _)| label.contains(needle))
                .map(|(_, code)| *code);
            self.ran.borrow_mut().push(label.clone());
            match failure {
                Some(code) => Err(SyscallError::Failed {
                    command: label,
                    code: Some(code),
                    output: String::new(),
                }),
                None => Ok(()),
            }
        }
    }

    impl Shell for FakeShell {
        fn run(&self, script: &str) -> Result<(), SyscallError> {
            self.outcome(script.to_string())
        }

        fn upload(&self, local: &Path, remote: &str) -> Result<(), SyscallError> {
            self.outcome(format!("upload {} {remote}", local.display()))
        }
    }

    fn plan() -> DeployPlan {
        let target: DeployTarget = "deploy@example.org:/srv/widget".parse().unwrap();
        let settings = DeploySettings {
            target: Some(target.to_string()),
            ..Default::default()
        };
        DeployPlan::new(&target, &settings, &archive(), "20250101_120000")
    }

    #[test]
    fn tolerated_failures_only_warn() -> anyhow::Result<()> {
        let shell = FakeShell {
            fail_on: vec![("tar -czf", 2), ("docker compose", 1), ("find ", 1)],
            ..Default::default()
        };
        let deployer = Deployer::new(shell);
        let report = deployer.execute(&plan())?;

        assert_eq!(report.warnings.len(), 3);
        assert_eq!(report.completed, 4);
        assert_eq!(deployer.shell.ran.borrow().len(), 7);
        Ok(())
    }

    #[test]
    fn fatal_failure_aborts_with_exit_code() {
        let shell = FakeShell {
            fail_on: vec![("upload", 255)],
            ..Default::default()
        };
        let deployer = Deployer::new(shell);
        let result = deployer.execute(&plan());

        match result {
            Err(DeployError::Step {
                description,
                source,
            }) => {
                assert_eq!(description, "transfer archive");
                assert_eq!(source.exit_code(), Some(255));
            }
            other => panic!("expected aborted deployment, got {other:?}"),
        }
        assert_eq!(deployer.shell.ran.borrow().len(), 5);
    }
}
