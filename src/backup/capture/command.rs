use crate::backup::cancel::CancelToken;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::process::{Command, Stdio};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Only the end of stderr is kept, that is where the tools print the failure.
const STDERR_TAIL_BYTES: u64 = 4096;

/// Runs `command` to completion, killing it if `cancel` fires first.
///
/// Stdin defaults to null. Stderr is captured and attached to the error on a
/// non-zero exit. Arguments are never logged since some tools take
/// credentials on the command line.
#[named]
pub fn run(mut command: Command, cancel: &CancelToken) -> Result<()> {
    let program = command.get_program().to_string_lossy().into_owned();
    cancel.check()?;

    let mut stderr = tempfile::tempfile()?;
    command.stderr(stderr.try_clone()?);

    tracing::debug!("Spawning {:?}", program);
    let mut child = command
        .spawn()
        .map_err(Error::from)
        .add_msg(format!("Failed to spawn {:?}", program))
        .add_fn_name(function_path!())?;

    loop {
        if let Some(status) = child.try_wait()? {
            if status.success() {
                tracing::debug!("{:?} finished", program);
                return Ok(());
            }
            let tail = read_tail(&mut stderr)?;
            return Err(Error::process_exit(program, status, tail));
        }
        if cancel.is_cancelled() {
            tracing::warn!("Killing {:?} (pid {}) after cancellation", program, child.id());
            if let Err(e) = child.kill() {
                tracing::warn!("Failed to kill {:?}: {}", program, e);
            }
            child.wait()?;
            return Err(Error::Cancelled);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Convenience for the common "stdout goes to the artifact" case.
pub fn run_to_file(mut command: Command, output: &std::path::Path, cancel: &CancelToken) -> Result<()> {
    let out = File::create(output)
        .map_err(Error::from)
        .add_msg(format!("Failed to create {:?}", output))?;
    command.stdin(Stdio::null()).stdout(out);
    run(command, cancel)
}

/// Convenience for the "artifact is fed on stdin" case.
pub fn run_from_file(mut command: Command, input: &std::path::Path, cancel: &CancelToken) -> Result<()> {
    let inp = File::open(input)
        .map_err(Error::from)
        .add_msg(format!("Failed to open {:?}", input))?;
    command.stdin(inp).stdout(Stdio::null());
    run(command, cancel)
}

fn read_tail(file: &mut File) -> Result<String> {
    let len = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(len.saturating_sub(STDERR_TAIL_BYTES)))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).trim().to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backup::result_error::error::ErrorKind;
    use std::time::Instant;
    use tempfile::TempDir;

    fn sh(script: &str) -> Command {
        let mut c = Command::new("sh");
        c.arg("-c").arg(script).stdin(Stdio::null()).stdout(Stdio::null());
        c
    }

    #[test]
    fn test_run_success() {
        assert!(run(sh("exit 0"), &CancelToken::new()).is_ok());
    }

    #[test]
    fn test_run_non_zero_exit_carries_stderr() {
        let err = run(sh("echo 'access denied for user' >&2; exit 2"), &CancelToken::new())
            .unwrap_err();
        match &err {
            Error::ProcessExit { program, status, stderr } => {
                assert_eq!(program, "sh");
                assert_eq!(status.code(), Some(2));
                assert_eq!(stderr, "access denied for user");
            }
            e => panic!("Expected ProcessExit, got {e:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_run_missing_program() {
        let err = run(
            Command::new("/nonexistent/definitely-not-a-binary"),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }

    #[test]
    fn test_run_kills_on_cancel() {
        let token = CancelToken::with_timeout(Some(Duration::from_millis(200)));
        let started = Instant::now();
        let err = run(sh("sleep 10"), &token).unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_run_does_not_spawn_when_already_cancelled() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("spawned");
        let token = CancelToken::new();
        token.cancel();
        let err = run(sh(&format!("touch {:?}", marker)), &token).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!marker.exists());
    }

    #[test]
    fn test_run_to_file_and_from_file() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("dump.sql");
        run_to_file(sh("printf 'CREATE TABLE t (id int);'"), &out, &CancelToken::new()).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "CREATE TABLE t (id int);");

        let copy = dir.path().join("copy.sql");
        let mut c = Command::new("sh");
        c.arg("-c").arg(format!("cat > {:?}", copy));
        run_from_file(c, &out, &CancelToken::new()).unwrap();
        assert_eq!(std::fs::read(&copy).unwrap(), std::fs::read(&out).unwrap());
    }

    #[test]
    fn test_read_tail_truncates() {
        let mut f = tempfile::tempfile().unwrap();
        std::io::Write::write_all(&mut f, &vec![b'x'; 10_000]).unwrap();
        std::io::Write::write_all(&mut f, b"END").unwrap();
        let tail = read_tail(&mut f).unwrap();
        assert_eq!(tail.len() as u64, STDERR_TAIL_BYTES);
        assert!(tail.ends_with("END"));
    }
}
