//! Process launcher - spawn, capture, time out, settle once

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, warn};

use crate::{
    config::{ExecConfig, ExecOptions, ExecRequest},
    env::{EnvironmentProvider, ProcessEnvironment},
    error::{ExecError, KillReason, Result},
    kill::{self, HandleState, KillListener, KillSignal, ProcessHandle, ProcessState},
    normalize::{normalize_resolved, NormalizedCommand},
    outcome::{decide, CapturedOutput, Outcome, Termination},
    platform::Platform,
    resolve::resolve_program,
};

/// How long a killed process's pipes may stay open before we stop reading
const READER_GRACE_MS: u64 = 200;

/// How long a timed out process gets to exit after SIGTERM before SIGKILL
const SIGKILL_TIMEOUT_MS: u64 = 200;

/// Bytes requested per read from stdout/stderr
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Chunks buffered between the readers and the launcher task
const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Result of an execution that has not finished yet
///
/// Resolves exactly once, to the value the launcher settled on.
#[derive(Debug)]
pub struct PendingOutcome {
    rx: oneshot::Receiver<Result<Outcome>>,
}

impl Future for PendingOutcome {
    type Output = Result<Outcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ExecError::Detached)))
    }
}

/// Launches child processes
pub struct Launcher {
    platform: Platform,
    environment: Option<Arc<dyn EnvironmentProvider>>,
    interpreter: Option<PathBuf>,
    comspec: Option<String>,
}

impl Launcher {
    /// Launcher for the current platform, reading `COMSPEC` from the environment
    pub fn new() -> Self {
        Self {
            platform: Platform::current(),
            environment: None,
            interpreter: None,
            comspec: std::env::var("COMSPEC").ok(),
        }
    }

    /// Launch as if on `platform` instead of the host
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Replace the default [`ProcessEnvironment`]
    pub fn with_environment_provider(mut self, provider: impl EnvironmentProvider + 'static) -> Self {
        self.environment = Some(Arc::new(provider));
        self
    }

    /// Interpreter used by [`Launcher::execute_via_interpreter`]
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Command interpreter path used for Windows shimming
    pub fn with_comspec(mut self, comspec: impl Into<String>) -> Self {
        self.comspec = Some(comspec.into());
        self
    }

    /// Platform this launcher spawns for
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Validate and start an execution
    ///
    /// Returns as soon as the launch is scheduled. Validation errors are
    /// returned here; every other failure arrives through the
    /// [`PendingOutcome`].
    ///
    /// # Panics
    /// Must be called from within a tokio runtime.
    ///
    /// # Examples
    /// ```no_run
    /// use subexec::{ExecOptions, Launcher};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let launcher = Launcher::new();
    /// let (handle, outcome) = launcher.execute("sleep", &["10"], ExecOptions::new())?;
    /// handle.terminate();
    /// assert!(outcome.await.is_err());
    /// # Ok(())
    /// # }
    /// ```
    pub fn execute<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        options: ExecOptions,
    ) -> Result<(ProcessHandle, PendingOutcome)> {
        let request = options.validate(program, args)?;
        Ok(self.launch(request))
    }

    /// Start an already validated request
    pub fn launch(&self, request: ExecRequest) -> (ProcessHandle, PendingOutcome) {
        let (handle, listener) = kill::channel();
        let (tx, rx) = oneshot::channel();
        let environment = self
            .environment
            .clone()
            .unwrap_or_else(|| Arc::new(ProcessEnvironment::new(self.platform)));

        let task = LaunchTask {
            request,
            platform: self.platform,
            environment,
            comspec: self.comspec.clone(),
            resolver: Resolver::new(tx, listener.shared()),
            listener,
        };
        tokio::spawn(task.run());

        (handle, PendingOutcome { rx })
    }

    /// Execute and wait for the outcome
    ///
    /// # Examples
    /// ```no_run
    /// use subexec::{ExecOptions, Launcher};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let outcome = Launcher::new().exec("echo", &["hello"], ExecOptions::new()).await?;
    /// assert_eq!(outcome.value(), Some("hello"));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn exec<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        options: ExecOptions,
    ) -> Result<Outcome> {
        let (_handle, outcome) = self.execute(program, args, options)?;
        outcome.await
    }

    /// Run `script` with the configured interpreter
    ///
    /// The interpreter defaults to the current executable.
    pub fn execute_via_interpreter<S: AsRef<str>>(
        &self,
        script: &str,
        args: &[S],
        options: ExecOptions,
    ) -> Result<(ProcessHandle, PendingOutcome)> {
        if script.is_empty() {
            return Err(ExecError::invalid("script", "must be a non-empty string"));
        }
        let interpreter = match &self.interpreter {
            Some(path) => path.clone(),
            None => std::env::current_exe().map_err(|source| ExecError::SpawnFailure {
                program: "<current executable>".to_string(),
                source,
            })?,
        };

        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(script.to_string());
        full_args.extend(args.iter().map(|a| a.as_ref().to_string()));

        self.execute(&interpreter.to_string_lossy(), &full_args, options)
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Single resolution point for an execution
struct Resolver {
    tx: Option<oneshot::Sender<Result<Outcome>>>,
    state: Arc<HandleState>,
}

impl Resolver {
    fn new(tx: oneshot::Sender<Result<Outcome>>, state: Arc<HandleState>) -> Self {
        Self { tx: Some(tx), state }
    }

    /// Returns `false` if an outcome was already settled
    fn settle(&mut self, result: Result<Outcome>) -> bool {
        let Some(tx) = self.tx.take() else {
            return false;
        };
        self.state.mark_settled();
        // Nobody awaiting the outcome is fine
        let _ = tx.send(result);
        true
    }
}

enum Chunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

struct LaunchTask {
    request: ExecRequest,
    platform: Platform,
    environment: Arc<dyn EnvironmentProvider>,
    comspec: Option<String>,
    listener: KillListener,
    resolver: Resolver,
}

impl LaunchTask {
    async fn run(self) {
        let LaunchTask {
            request,
            platform,
            environment,
            comspec,
            mut listener,
            mut resolver,
        } = self;

        let result = drive(
            &request,
            &platform,
            environment.as_ref(),
            comspec.as_deref(),
            &mut listener,
        )
        .await;

        match &result {
            Ok(_) => debug!(program = %request.program, "Execution settled"),
            Err(e) => debug!(program = %request.program, error = %e, "Execution failed"),
        }
        resolver.settle(result);
    }
}

async fn drive(
    request: &ExecRequest,
    platform: &Platform,
    environment: &dyn EnvironmentProvider,
    comspec: Option<&str>,
    listener: &mut KillListener,
) -> Result<Outcome> {
    let ExecRequest {
        program,
        args,
        config,
    } = request;

    listener.set_state(ProcessState::Spawning);
    let env = match environment.resolve(config).await {
        Ok(env) => env,
        Err(e) => {
            listener.set_state(ProcessState::SpawnError);
            return Err(e);
        }
    };
    let resolved = resolve_program(program, &env, platform, config.working_dir.as_deref());
    let command = normalize_resolved(program, &resolved, args, config.use_shell, platform, comspec);
    let grouped = cfg!(unix) && platform.process_groups && !config.inherit_stdio;

    debug!(
        program = %command.program,
        args = ?command.args,
        "Spawning process"
    );
    let mut child = match build_command(&command, &env, config, grouped).spawn() {
        Ok(child) => child,
        Err(source) => {
            listener.set_state(ProcessState::SpawnError);
            warn!(program = %program, error = %source, "Failed to spawn process");
            return Err(ExecError::SpawnFailure {
                program: program.clone(),
                source,
            });
        }
    };
    let pid = child.id();
    if let Some(pid) = pid {
        listener.publish_pid(pid);
    }
    listener.set_state(ProcessState::Running);
    info!(pid = ?pid, program = %program, "Process spawned");

    let (chunk_tx, mut chunks) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
    let mut readers = JoinSet::new();
    if let Some(stdout) = child.stdout.take() {
        readers.spawn(forward(stdout, chunk_tx.clone(), Chunk::Stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.spawn(forward(stderr, chunk_tx.clone(), Chunk::Stderr));
    }
    drop(chunk_tx);

    if let Some(mut stdin) = child.stdin.take() {
        let payload = config.stdin.clone();
        tokio::spawn(async move {
            // The child may never read stdin
            if let Some(payload) = payload {
                let _ = stdin.write_all(&payload).await;
            }
            let _ = stdin.shutdown().await;
        });
    }

    let mut captured = CapturedOutput::new();
    let mut deadline = config.timeout.map(|t| Box::pin(sleep(t)));
    let mut grace: Option<Pin<Box<Sleep>>> = None;
    let mut escalation: Option<Pin<Box<Sleep>>> = None;
    let mut exit: Option<ExitStatus> = None;
    let mut kill_cause: Option<KillReason> = None;
    let mut streams_open = true;

    // Closed means exited with both pipes drained
    while exit.is_none() || streams_open {
        if exit.is_some() && kill_cause.is_some() && grace.is_none() {
            grace = Some(Box::pin(sleep(Duration::from_millis(READER_GRACE_MS))));
        }

        tokio::select! {
            status = child.wait(), if exit.is_none() => {
                let status = status.map_err(|source| ExecError::SpawnFailure {
                    program: program.clone(),
                    source,
                })?;
                debug!(pid = ?pid, code = ?status.code(), "Process exited");
                exit = Some(status);
            }
            chunk = chunks.recv(), if streams_open => match chunk {
                Some(Chunk::Stdout(bytes)) => captured.push_stdout(&bytes),
                Some(Chunk::Stderr(bytes)) => captured.push_stderr(&bytes),
                None => streams_open = false,
            },
            () = expire(&mut deadline) => {
                deadline = None;
                debug!(pid = ?pid, "Process execution timed out");
                kill_cause.get_or_insert(KillReason::Timeout);
                if exit.is_none() {
                    deliver(&mut child, KillSignal::default(), platform, grouped, listener).await;
                    escalation = Some(Box::pin(sleep(Duration::from_millis(SIGKILL_TIMEOUT_MS))));
                }
            }
            () = expire(&mut escalation), if exit.is_none() => {
                escalation = None;
                debug!(pid = ?pid, "Process ignored SIGTERM, sending SIGKILL");
                deliver(&mut child, KillSignal::Kill, platform, grouped, listener).await;
            }
            signal = listener.requested(), if exit.is_none() => {
                kill_cause.get_or_insert(KillReason::Requested);
                deliver(&mut child, signal, platform, grouped, listener).await;
            }
            () = expire(&mut grace) => {
                debug!(pid = ?pid, "Output pipes still open after kill, abandoning readers");
                readers.abort_all();
                break;
            }
        }
    }

    // The loop only ends once the exit status is known
    let Some(status) = exit else {
        return Err(ExecError::Detached);
    };
    let termination = match kill_cause {
        Some(reason) => Termination::Killed(reason),
        None => Termination::Exited(status.code()),
    };
    listener.set_state(match termination {
        Termination::Exited(Some(_)) => ProcessState::Closed,
        _ => ProcessState::Killed,
    });
    info!(pid = ?pid, code = ?status.code(), killed = kill_cause.is_some(), "Process closed");

    decide(
        captured.finalize(config.raw_output),
        termination,
        config,
        command.substituted.as_ref(),
    )
}

fn build_command(
    command: &NormalizedCommand,
    env: &HashMap<String, String>,
    config: &ExecConfig,
    grouped: bool,
) -> Command {
    let mut cmd = Command::new(&command.program);
    if command.verbatim_args {
        append_verbatim(&mut cmd, &command.args);
    } else {
        cmd.args(&command.args);
    }

    cmd.env_clear();
    cmd.envs(env);

    if let Some(ref dir) = config.working_dir {
        cmd.current_dir(dir);
    }

    if config.inherit_stdio {
        cmd.stdin(Stdio::inherit());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
    } else {
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
    }

    if grouped {
        lead_process_group(&mut cmd);
    }

    cmd.kill_on_drop(true);
    cmd
}

/// Start the child as leader of a new process group
#[cfg(unix)]
fn lead_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn lead_process_group(_cmd: &mut Command) {}

#[cfg(windows)]
fn append_verbatim(cmd: &mut Command, args: &[String]) {
    for arg in args {
        cmd.raw_arg(arg);
    }
}

#[cfg(not(windows))]
fn append_verbatim(cmd: &mut Command, args: &[String]) {
    cmd.args(args);
}

async fn deliver(
    child: &mut Child,
    signal: KillSignal,
    platform: &Platform,
    grouped: bool,
    listener: &KillListener,
) {
    match kill::signal_process(child, signal, platform, grouped).await {
        Ok(()) => listener.mark_killed(),
        Err(e) => warn!(pid = ?child.id(), error = %e, "Failed to kill process"),
    }
}

async fn expire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn forward<R>(mut reader: R, tx: mpsc::Sender<Chunk>, wrap: fn(Vec<u8>) -> Chunk)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(wrap(buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use async_trait::async_trait;

    struct FailingEnvironment;

    #[async_trait]
    impl EnvironmentProvider for FailingEnvironment {
        async fn resolve(&self, _config: &ExecConfig) -> Result<HashMap<String, String>> {
            Err(ExecError::invalid("env", "unavailable"))
        }
    }

    #[tokio::test]
    async fn test_resolver_settles_once() {
        let (handle, listener) = kill::channel();
        let (tx, rx) = oneshot::channel();
        let mut resolver = Resolver::new(tx, listener.shared());

        assert!(resolver.settle(Ok(Outcome::Value("first".into()))));
        assert!(!resolver.settle(Err(ExecError::Killed {
            reason: KillReason::Requested,
        })));
        assert!(handle.is_settled());
        assert!(!handle.terminate());

        let outcome = PendingOutcome { rx }.await.unwrap();
        assert_eq!(outcome, Outcome::Value("first".into()));
    }

    #[tokio::test]
    async fn test_dropped_resolver_is_detached() {
        let (_handle, listener) = kill::channel();
        let (tx, rx) = oneshot::channel();
        drop(Resolver::new(tx, listener.shared()));
        let err = PendingOutcome { rx }.await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Detached);
    }

    #[tokio::test]
    async fn test_validation_errors_are_synchronous() {
        let err = Launcher::new()
            .execute::<&str>("", &[], ExecOptions::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = Launcher::new()
            .execute_via_interpreter::<&str>("", &[], ExecOptions::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_environment_failure_surfaces() {
        let launcher = Launcher::new().with_environment_provider(FailingEnvironment);
        let (handle, outcome) = launcher
            .execute::<&str>("true", &[], ExecOptions::new())
            .unwrap();
        let err = outcome.await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(handle.state(), ProcessState::SpawnError);
        assert_eq!(handle.pid(), None);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let outcome = Launcher::new()
            .with_platform(Platform::unix())
            .exec::<&str>("/definitely/not/here", &[], ExecOptions::new())
            .await;
        let err = outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SpawnFailure);
        assert_eq!(err.code(), Some("ENOENT"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_value() {
        let outcome = Launcher::new()
            .exec("echo", &["  hello  "], ExecOptions::new())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Value("hello".into()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_escalates_when_term_is_ignored() {
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            Launcher::new().exec(
                "sh",
                &["-c", "trap '' TERM; sleep 8; echo late"],
                ExecOptions::new().timeout_ms(300),
            ),
        )
        .await
        .expect("timeout never settled");
        let err = outcome.unwrap_err();
        assert!(matches!(
            err,
            ExecError::Killed {
                reason: KillReason::Timeout
            }
        ));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_raw_output_is_not_decoded() {
        let outcome = Launcher::new()
            .exec(
                "sh",
                &["-c", "printf ' \\377\\376 '"],
                ExecOptions::new().raw_output(true),
            )
            .await
            .unwrap();
        assert_eq!(outcome.bytes(), Some(&[b' ', 0xff, 0xfe, b' '][..]));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_states_after_close() {
        let (handle, outcome) = Launcher::new()
            .execute("sh", &["-c", "exit 0"], ExecOptions::new())
            .unwrap();
        outcome.await.unwrap();
        assert_eq!(handle.state(), ProcessState::Closed);
        assert!(handle.pid().is_some());
        assert!(!handle.is_killed());
    }
}
