use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;

use tracing::info;

use crate::error::{Error, Result};

const MAX_LOG_CHARS: usize = 4096;
const MAX_PENDING_BYTES: usize = 16 * 1024;

/// Runs external tools and touches the filesystem on behalf of the pipeline.
/// In dry-run mode every action is logged instead of performed.
#[derive(Debug, Clone, Default)]
pub struct ExecCtx {
    pub dry_run: bool,
}

impl ExecCtx {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Run `cmd`, streaming its output into the log. A non-zero exit is an
    /// external tool failure.
    pub fn run_cmd(&self, tool: &str, mut cmd: Command) -> Result<()> {
        if self.dry_run {
            info!("DRY-RUN: {:?}", cmd);
            return Ok(());
        }

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::external(format!("failed to start {tool}: {e}")))?;

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            std::thread::spawn(move || forward_lines(out, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || forward_lines(err, tx));
        }
        drop(tx);

        for line in rx {
            let line = sanitize_output_line(&line);
            if !line.is_empty() {
                info!("[{tool}] {line}");
            }
        }

        let status = child
            .wait()
            .map_err(|e| Error::external(format!("failed waiting for {tool}: {e}")))?;
        if !status.success() {
            return Err(Error::external(format!("{tool} failed: {status}")));
        }
        Ok(())
    }

    pub fn ensure_dir(&self, p: &Path) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        fs::create_dir_all(p)
            .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", p.display())))
    }

    pub fn write_text(&self, p: &Path, s: &str) -> Result<()> {
        if self.dry_run {
            info!("DRY-RUN: write {} ({} bytes)", p.display(), s.len());
            return Ok(());
        }
        if let Some(parent) = p.parent() {
            self.ensure_dir(parent)?;
        }
        fs::write(p, s).map_err(|e| Error::msg(format!("failed to write {}: {e}", p.display())))
    }

    pub fn write_json_pretty<T: serde::Serialize>(&self, p: &Path, v: &T) -> Result<()> {
        let s = serde_json::to_string_pretty(v)
            .map_err(|e| Error::msg(format!("json encode error: {e}")))?;
        self.write_text(p, &s)
    }

    pub fn copy_file(&self, src: &Path, dst: &Path) -> Result<()> {
        if self.dry_run {
            info!("DRY-RUN: copy {} -> {}", src.display(), dst.display());
            return Ok(());
        }
        if let Some(parent) = dst.parent() {
            self.ensure_dir(parent)?;
        }
        fs::copy(src, dst).map_err(|e| {
            Error::msg(format!(
                "failed to copy {} -> {}: {e}",
                src.display(),
                dst.display()
            ))
        })?;
        Ok(())
    }

    pub fn rename(&self, src: &Path, dst: &Path) -> Result<()> {
        if self.dry_run {
            info!("DRY-RUN: move {} -> {}", src.display(), dst.display());
            return Ok(());
        }
        fs::rename(src, dst).map_err(|e| {
            Error::msg(format!(
                "failed to move {} -> {}: {e}",
                src.display(),
                dst.display()
            ))
        })
    }
}

// Reads raw bytes so that non-UTF-8 output never stops the drain; an early
// return would close the pipe under a still-running child.
fn forward_lines<R: Read>(stream: R, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(stream);
    let mut buf = [0u8; 8192];
    let mut pending: Vec<u8> = Vec::with_capacity(1024);

    let flush = |pending: &mut Vec<u8>| {
        let line = String::from_utf8_lossy(pending).into_owned();
        pending.clear();
        let _ = tx.send(line);
    };

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &b in &buf[..n] {
            if b == b'\n' || b == b'\r' {
                if !pending.is_empty() {
                    flush(&mut pending);
                }
            } else {
                pending.push(b);
                if pending.len() >= MAX_PENDING_BYTES {
                    flush(&mut pending);
                }
            }
        }
    }

    if !pending.is_empty() {
        flush(&mut pending);
    }
}

/// Locate `name` on `PATH`.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Strip terminal escape sequences and control characters from tool output,
/// and cap its length.
pub fn sanitize_output_line(input: &str) -> String {
    #[derive(Clone, Copy)]
    enum State {
        Text,
        Esc,
        Csi,
        // OSC/DCS style strings, terminated by BEL or ESC '\'.
        Str { after_esc: bool },
    }

    let mut out = String::with_capacity(input.len().min(MAX_LOG_CHARS));
    let mut state = State::Text;
    let mut count = 0usize;

    for c in input.chars() {
        state = match state {
            State::Esc => match c {
                '[' => State::Csi,
                ']' | 'P' | 'X' | '^' | '_' => State::Str { after_esc: false },
                _ => State::Text,
            },
            State::Csi if ('@'..='~').contains(&c) => State::Text,
            State::Csi => State::Csi,
            State::Str { .. } if c == '\x07' => State::Text,
            State::Str { after_esc: true } if c == '\\' => State::Text,
            State::Str { .. } => State::Str {
                after_esc: c == '\x1b',
            },
            State::Text => {
                if c == '\x1b' {
                    State::Esc
                } else {
                    if c == '\t' {
                        out.push(' ');
                        count += 1;
                    } else if !c.is_control() && !is_bidi_control(c) {
                        out.push(c);
                        count += 1;
                    }
                    State::Text
                }
            }
        };
        if count >= MAX_LOG_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
    }
    out
}

fn is_bidi_control(c: char) -> bool {
    matches!(c, '\u{061C}' | '\u{200E}' | '\u{200F}')
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_colour_and_title_sequences() {
        let input = "P: \u{1b}[31mBuilding\u{1b}[0m \u{1b}]0;lb build\u{7}chroot";
        assert_eq!(sanitize_output_line(input), "P: Building chroot");
    }

    #[test]
    fn strips_st_terminated_strings() {
        assert_eq!(sanitize_output_line("a\u{1b}Ppayload\u{1b}\\b"), "ab");
    }

    #[test]
    fn drops_controls_and_expands_tabs() {
        assert_eq!(sanitize_output_line("a\tb\r\u{202e}c"), "a bc");
    }

    #[test]
    fn truncates_long_lines() {
        let long = "x".repeat(MAX_LOG_CHARS + 10);
        let got = sanitize_output_line(&long);
        assert!(got.ends_with("...[truncated]"));
    }

    #[test]
    fn dry_run_touches_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = ExecCtx::new(true);
        let target = dir.path().join("nested").join("file.txt");
        ctx.write_text(&target, "hello").expect("dry write");
        assert!(!target.exists());
        ctx.run_cmd("false", Command::new("false")).expect("dry run skips command");
    }

    #[test]
    fn invalid_utf8_output_does_not_break_the_pipe() {
        let ctx = ExecCtx::new(false);
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("printf 'caf\\351\\n'; i=0; while [ $i -lt 20000 ]; do echo line $i; i=$((i+1)); done; exit 0");
        ctx.run_cmd("sh", cmd).expect("tool succeeded");
    }

    #[test]
    fn forwarded_lines_are_lossy_and_split_on_cr() {
        let (tx, rx) = mpsc::channel();
        forward_lines(&b"caf\xe9\nprogress 1\rprogress 2\n\ntail"[..], tx);
        let lines: Vec<String> = rx.iter().collect();
        assert_eq!(lines, vec!["caf\u{fffd}", "progress 1", "progress 2", "tail"]);
    }

    #[test]
    fn overlong_unterminated_output_is_chunked() {
        let (tx, rx) = mpsc::channel();
        let blob = vec![b'x'; MAX_PENDING_BYTES + 10];
        forward_lines(&blob[..], tx);
        let lens: Vec<usize> = rx.iter().map(|l| l.len()).collect();
        assert_eq!(lens, vec![MAX_PENDING_BYTES, 10]);
    }

    #[test]
    fn failing_command_is_external_error() {
        let ctx = ExecCtx::new(false);
        let err = ctx
            .run_cmd("sh", {
                let mut c = Command::new("sh");
                c.arg("-c").arg("exit 3");
                c
            })
            .expect_err("must fail");
        assert_eq!(err.kind(), crate::error::ErrorKind::ExternalTool);
    }
}
