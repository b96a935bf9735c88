//! Stand-in shell scripts for the external tools.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ToolCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fake {
    /// Exit zero and write the artifact.
    Ok,
    /// Print to stderr and exit non-zero.
    Fail,
    /// Exit zero without writing anything.
    NoOutput,
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn tail(fake: Fake, write: &str, error: &str) -> String {
    match fake {
        Fake::Ok => write.to_string(),
        Fake::Fail => format!("echo '{error}' >&2\nexit 1\n"),
        Fake::NoOutput => "exit 0\n".to_string(),
    }
}

/// Synthesis tool called as `--text T --output P`. Appends each received
/// text to `synth.log` in `dir`.
pub fn fake_synth(dir: &Path, fake: Fake) -> ToolCommand {
    let log = dir.join("synth.log");
    let body = format!(
        r#"text=""
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --text) text="$2"; shift ;;
    --output) out="$2"; shift ;;
  esac
  shift
done
printf '%s\n' "$text" >> '{log}'
{tail}"#,
        log = log.display(),
        tail = tail(fake, "printf 'RIFF-fake-audio' > \"$out\"\n", "tts quota exceeded"),
    );
    let script = write_script(dir, "synth.sh", &body);
    ToolCommand {
        program: "sh".to_string(),
        args: vec![script.display().to_string()],
    }
}

/// Animation tool. Writes its arguments, one per line, to `animate.log`
/// in `dir`, then drops `<name>` into the `--result_dir` it was given.
pub fn fake_animate(dir: &Path, fake: Fake, name: &str) -> ToolCommand {
    let log = dir.join("animate.log");
    let body = format!(
        r#"for a in "$@"; do printf '%s\n' "$a"; done > '{log}'
result=""
while [ $# -gt 0 ]; do
  case "$1" in
    --result_dir) result="$2"; shift ;;
  esac
  shift
done
mkdir -p "$result"
{tail}"#,
        log = log.display(),
        tail = tail(
            fake,
            &format!("printf 'fake-mp4' > \"$result/{name}\"\n"),
            "face not detected"
        ),
    );
    let script = write_script(dir, "animate.sh", &body);
    ToolCommand {
        program: "sh".to_string(),
        args: vec![script.display().to_string()],
    }
}

pub fn animate_log(dir: &Path) -> Option<Vec<String>> {
    let data = fs::read_to_string(dir.join("animate.log")).ok()?;
    Some(data.lines().map(str::to_string).collect())
}

pub fn synth_log(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("synth.log"))
        .map(|d| d.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Value following `flag` in a logged argument list.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}
